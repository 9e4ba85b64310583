//! 하이브리드 검색 - 벡터 유사도 + 퍼지 키워드 점수
//!
//! 1. 벡터 스토어에서 `max(k * factor, min_candidates)`개를 넉넉히 가져오고
//! 2. 각 후보에 `alpha * sim + (1 - alpha) * lexical` 점수를 매긴 뒤
//! 3. 점수 내림차순(안정 정렬)으로 상위 k개를 반환합니다.
//!
//! `sim = clamp(1 - distance, 0, 1)`, 거리가 없으면 0으로 취급합니다.

use std::collections::BTreeSet;
use std::sync::Arc;

use rapidfuzz::distance::indel;

use crate::embedding::EmbeddingProvider;
use crate::error::{RagError, Result};

use super::vector::{HitMeta, Neighbor, VectorStore};

// ============================================================================
// Types
// ============================================================================

/// 재정렬된 검색 결과
#[derive(Debug, Clone, PartialEq)]
pub struct Hit {
    pub id: String,
    pub document: String,
    pub meta: HitMeta,
    pub distance: Option<f32>,
    /// 최종 점수 (0.0 ~ 1.0)
    pub score: f32,
}

/// 검색 설정
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetrievalConfig {
    /// 벡터 유사도 가중치 (1.0 = 벡터만, 0.0 = 키워드만)
    pub alpha: f32,
    /// 후보 배수
    pub over_fetch_factor: usize,
    /// 최소 후보 수
    pub min_candidates: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            alpha: 0.6,
            over_fetch_factor: 2,
            min_candidates: 10,
        }
    }
}

impl RetrievalConfig {
    pub fn with_alpha(alpha: f32) -> Result<Self> {
        let config = Self {
            alpha,
            ..Default::default()
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if !(0.0..=1.0).contains(&self.alpha) {
            return Err(RagError::InvalidConfig(format!(
                "alpha must be within [0, 1], got {}",
                self.alpha
            )));
        }
        if self.over_fetch_factor == 0 {
            return Err(RagError::InvalidConfig(
                "over-fetch factor must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    /// k개를 돌려주기 위해 스토어에 요청할 후보 수
    pub fn candidates_for(&self, k: usize) -> usize {
        k.saturating_mul(self.over_fetch_factor)
            .max(self.min_candidates)
    }
}

// ============================================================================
// Lexical Scoring
// ============================================================================

/// 키워드 유사도 (0.0 ~ 1.0)
///
/// 점수를 낼 수 없으면 `None` (재정렬에서 0으로 취급).
pub trait LexicalScorer: Send + Sync {
    fn score(&self, query: &str, document: &str) -> Option<f32>;
}

/// 토큰 집합 퍼지 비율
///
/// 공백 기준 토큰 집합의 교집합/차집합을 정렬해 이어 붙인 세 문자열
/// `sect`, `sect + diff_ab`, `sect + diff_ba` 중 가장 비슷한 쌍의 Indel 비율.
/// 한쪽 토큰이 다른 쪽에 모두 포함되면 1.0입니다.
#[derive(Debug, Clone, Copy, Default)]
pub struct TokenSetRatio {
    /// 비교 전 소문자 변환
    pub lowercase: bool,
}

impl TokenSetRatio {
    pub fn ratio(&self, a: &str, b: &str) -> f32 {
        let (a, b) = if self.lowercase {
            (a.to_lowercase(), b.to_lowercase())
        } else {
            (a.to_string(), b.to_string())
        };

        let tokens_a: BTreeSet<&str> = a.split_whitespace().collect();
        let tokens_b: BTreeSet<&str> = b.split_whitespace().collect();
        if tokens_a.is_empty() || tokens_b.is_empty() {
            return 0.0;
        }

        let sect = join(tokens_a.intersection(&tokens_b));
        let diff_ab = join(tokens_a.difference(&tokens_b));
        let diff_ba = join(tokens_b.difference(&tokens_a));

        let combined_ab = concat(&sect, &diff_ab);
        let combined_ba = concat(&sect, &diff_ba);

        let mut best = indel_ratio(&combined_ab, &combined_ba);
        if !sect.is_empty() {
            best = best
                .max(indel_ratio(&sect, &combined_ab))
                .max(indel_ratio(&sect, &combined_ba));
        }
        best
    }
}

impl LexicalScorer for TokenSetRatio {
    fn score(&self, query: &str, document: &str) -> Option<f32> {
        Some(self.ratio(query, document))
    }
}

fn join<'a, 'b: 'a>(tokens: impl Iterator<Item = &'a &'b str>) -> String {
    tokens.copied().collect::<Vec<_>>().join(" ")
}

fn concat(sect: &str, diff: &str) -> String {
    match (sect.is_empty(), diff.is_empty()) {
        (true, _) => diff.to_string(),
        (_, true) => sect.to_string(),
        _ => format!("{} {}", sect, diff),
    }
}

/// `1 - indel_distance / (len_a + len_b)` (문자 단위)
fn indel_ratio(a: &str, b: &str) -> f32 {
    if a.is_empty() && b.is_empty() {
        return 1.0;
    }
    indel::normalized_similarity(a.chars(), b.chars()) as f32
}

// ============================================================================
// Rerank
// ============================================================================

/// 후보 재정렬 (순수 함수)
///
/// 점수가 같으면 스토어가 돌려준 순서를 유지합니다.
pub fn rerank(
    query: &str,
    candidates: Vec<Neighbor>,
    alpha: f32,
    scorer: &dyn LexicalScorer,
) -> Vec<Hit> {
    let mut hits: Vec<Hit> = candidates
        .into_iter()
        .map(|neighbor| {
            let similarity = (1.0 - neighbor.distance.unwrap_or(0.0)).clamp(0.0, 1.0);
            let lexical = scorer
                .score(query, &neighbor.document)
                .filter(|s| s.is_finite())
                .map_or(0.0, |s| s.clamp(0.0, 1.0));
            let score = (alpha * similarity + (1.0 - alpha) * lexical).clamp(0.0, 1.0);

            Hit {
                id: neighbor.id,
                document: neighbor.document,
                meta: neighbor.meta,
                distance: neighbor.distance,
                score,
            }
        })
        .collect();

    hits.sort_by(|a, b| b.score.total_cmp(&a.score));
    hits
}

// ============================================================================
// HybridRetriever
// ============================================================================

/// 하이브리드 검색기
///
/// 임베딩 프로바이더와 벡터 스토어는 생성 시 주입합니다.
pub struct HybridRetriever {
    embedder: Arc<dyn EmbeddingProvider>,
    store: Arc<dyn VectorStore>,
    scorer: Box<dyn LexicalScorer>,
    config: RetrievalConfig,
}

impl HybridRetriever {
    pub fn new(
        embedder: Arc<dyn EmbeddingProvider>,
        store: Arc<dyn VectorStore>,
        config: RetrievalConfig,
    ) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            embedder,
            store,
            scorer: Box::new(TokenSetRatio::default()),
            config,
        })
    }

    /// 키워드 점수기 교체
    pub fn with_scorer(mut self, scorer: Box<dyn LexicalScorer>) -> Self {
        self.scorer = scorer;
        self
    }

    pub fn config(&self) -> &RetrievalConfig {
        &self.config
    }

    /// 하이브리드 검색
    ///
    /// 결과가 없으면 빈 벡터 (에러 아님). 임베딩/스토어 에러는 그대로 전파됩니다.
    pub async fn query(&self, text: &str, k: usize, course: Option<&str>) -> Result<Vec<Hit>> {
        if k == 0 {
            return Ok(Vec::new());
        }

        let embedding = self.embedder.embed(text).await?;
        let limit = self.config.candidates_for(k);
        let candidates = self.store.query_nearest(&embedding, limit, course).await?;

        tracing::debug!(
            "Query {:?}: {} candidates (limit {}, course {:?})",
            text,
            candidates.len(),
            limit,
            course
        );

        let mut hits = rerank(text, candidates, self.config.alpha, self.scorer.as_ref());
        hits.truncate(k);
        Ok(hits)
    }
}

// ============================================================================
// Tests
// ============================================================================
