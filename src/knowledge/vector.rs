//! Vector Store - 벡터 저장소 트레이트 및 메모리 구현
//!
//! 같은 ID로 다시 추가하면 기존 행을 덮어씁니다 (upsert).
//! 거리는 코사인 거리 `1 - cos` 이며, 작을수록 가깝습니다.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;

use crate::error::{RagError, Result};

use super::chunker::TextChunk;

// ============================================================================
// Types
// ============================================================================

/// 저장되는 청크 (텍스트 + 메타데이터 + 임베딩)
#[derive(Debug, Clone, PartialEq)]
pub struct Chunk {
    pub id: String,
    pub text: String,
    pub source: String,
    pub course: String,
    pub page_start: u32,
    pub page_end: u32,
    pub embedding: Vec<f32>,
}

impl Chunk {
    /// 청커 출력에 임베딩을 붙여 저장용 청크로 변환
    pub fn embedded(chunk: TextChunk, embedding: Vec<f32>) -> Self {
        Self {
            id: chunk.id,
            text: chunk.text,
            source: chunk.source,
            course: chunk.course,
            page_start: chunk.page_start,
            page_end: chunk.page_end,
            embedding,
        }
    }

    pub fn meta(&self) -> HitMeta {
        HitMeta {
            source: self.source.clone(),
            course: self.course.clone(),
            page_start: Some(self.page_start),
            page_end: Some(self.page_end),
        }
    }
}

/// 검색 결과에 붙는 메타데이터
#[derive(Debug, Clone, Default, PartialEq)]
pub struct HitMeta {
    pub source: String,
    pub course: String,
    pub page_start: Option<u32>,
    pub page_end: Option<u32>,
}

/// 최근접 이웃 (재정렬 전 후보)
#[derive(Debug, Clone, PartialEq)]
pub struct Neighbor {
    pub id: String,
    pub document: String,
    pub meta: HitMeta,
    /// 스토어가 돌려준 거리 (없을 수 있음)
    pub distance: Option<f32>,
}

// ============================================================================
// VectorStore Trait
// ============================================================================

/// VectorStore 트레이트 (async)
///
/// 모든 구현은 같은 ID를 upsert로 처리합니다.
#[async_trait]
pub trait VectorStore: Send + Sync {
    /// 청크 배치 저장, 기록된 행 수 반환
    async fn add_chunks(&self, chunks: &[Chunk]) -> Result<usize>;

    /// 거리 오름차순으로 최대 `limit`개, `course`가 있으면 정확히 일치하는 것만
    async fn query_nearest(
        &self,
        embedding: &[f32],
        limit: usize,
        course: Option<&str>,
    ) -> Result<Vec<Neighbor>>;

    /// 저장된 청크 수
    async fn count(&self) -> Result<usize>;
}

// ============================================================================
// Utility Functions
// ============================================================================

/// 코사인 유사도 (-1.0 ~ 1.0)
///
/// 길이가 다르거나 영벡터면 0.0
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let dot_product: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();

    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }

    dot_product / (norm_a * norm_b)
}

/// 코사인 거리 (0.0 ~ 2.0)
pub fn cosine_distance(a: &[f32], b: &[f32]) -> f32 {
    1.0 - cosine_similarity(a, b)
}

/// 배치 안의 중복 ID 제거 (마지막 것 유지, 순서는 첫 등장 기준)
pub(crate) fn dedupe_by_id(chunks: &[Chunk]) -> Vec<&Chunk> {
    let mut position: HashMap<&str, usize> = HashMap::new();
    let mut unique: Vec<&Chunk> = Vec::with_capacity(chunks.len());

    for chunk in chunks {
        match position.get(chunk.id.as_str()) {
            Some(&index) => unique[index] = chunk,
            None => {
                position.insert(chunk.id.as_str(), unique.len());
                unique.push(chunk);
            }
        }
    }

    unique
}

/// 모든 청크가 스토어 차원과 맞는지 확인
pub(crate) fn check_dimension(chunks: &[Chunk], dimension: usize) -> Result<()> {
    match chunks.iter().find(|c| c.embedding.len() != dimension) {
        Some(chunk) => Err(RagError::StoreUnavailable(format!(
            "chunk {} has {} dimensions, store expects {}",
            chunk.id,
            chunk.embedding.len(),
            dimension
        ))),
        None => Ok(()),
    }
}

// ============================================================================
// MemoryVectorStore
// ============================================================================

/// 프로세스 내 벡터 저장소
///
/// 삽입 순서를 유지하므로 거리가 같으면 먼저 들어온 청크가 앞에 옵니다.
pub struct MemoryVectorStore {
    dimension: usize,
    chunks: Mutex<Vec<Chunk>>,
}

impl MemoryVectorStore {
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension,
            chunks: Mutex::new(Vec::new()),
        }
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Vec<Chunk>>> {
        self.chunks
            .lock()
            .map_err(|_| RagError::StoreUnavailable("memory store lock poisoned".to_string()))
    }
}

#[async_trait]
impl VectorStore for MemoryVectorStore {
    async fn add_chunks(&self, chunks: &[Chunk]) -> Result<usize> {
        check_dimension(chunks, self.dimension)?;
        let unique = dedupe_by_id(chunks);

        let mut stored = self.lock()?;
        for chunk in &unique {
            match stored.iter_mut().find(|c| c.id == chunk.id) {
                Some(existing) => *existing = (*chunk).clone(),
                None => stored.push((*chunk).clone()),
            }
        }

        Ok(unique.len())
    }

    async fn query_nearest(
        &self,
        embedding: &[f32],
        limit: usize,
        course: Option<&str>,
    ) -> Result<Vec<Neighbor>> {
        if limit == 0 {
            return Ok(Vec::new());
        }
        if embedding.len() != self.dimension {
            return Err(RagError::StoreUnavailable(format!(
                "query has {} dimensions, store expects {}",
                embedding.len(),
                self.dimension
            )));
        }

        let stored = self.lock()?;
        let mut scored: Vec<(f32, &Chunk)> = stored
            .iter()
            .filter(|c| course.map_or(true, |course| c.course == course))
            .map(|c| (cosine_distance(embedding, &c.embedding), c))
            .collect();

        // sort_by는 안정 정렬
        scored.sort_by(|a, b| a.0.total_cmp(&b.0));

        Ok(scored
            .into_iter()
            .take(limit)
            .map(|(distance, chunk)| Neighbor {
                id: chunk.id.clone(),
                document: chunk.text.clone(),
                meta: chunk.meta(),
                distance: Some(distance),
            })
            .collect())
    }

    async fn count(&self) -> Result<usize> {
        Ok(self.lock()?.len())
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) fn make_chunk(id: &str, text: &str, course: &str, embedding: Vec<f32>) -> Chunk {
        Chunk {
            id: id.to_string(),
            text: text.to_string(),
            source: format!("{}.pdf", id.split('-').next().unwrap_or(id)),
            course: course.to_string(),
            page_start: 1,
            page_end: 1,
            embedding,
        }
    }

    #[test]
    fn test_cosine_similarity_same() {
        let a = vec![1.0, 0.0, 0.0];
        assert!((cosine_similarity(&a, &a) - 1.0).abs() < 0.0001);
        assert!(cosine_distance(&a, &a).abs() < 0.0001);
    }

    #[test]
    fn test_cosine_similarity_orthogonal_and_opposite() {
        let a = vec![1.0, 0.0, 0.0];
        let c = vec![0.0, 1.0, 0.0];
        let d = vec![-1.0, 0.0, 0.0];
        assert!(cosine_similarity(&a, &c).abs() < 0.0001);
        assert!((cosine_distance(&a, &d) - 2.0).abs() < 0.0001);
    }

    #[test]
    fn test_cosine_similarity_degenerate() {
        assert_eq!(cosine_similarity(&[], &[]), 0.0);
        assert_eq!(cosine_similarity(&[1.0], &[1.0, 2.0]), 0.0);
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 2.0]), 0.0);
    }

    #[test]
    fn test_dedupe_keeps_last() {
        let chunks = vec![
            make_chunk("a-00000", "old", "Info1", vec![1.0, 0.0]),
            make_chunk("b-00000", "b", "Info1", vec![0.0, 1.0]),
            make_chunk("a-00000", "new", "Info1", vec![1.0, 0.0]),
        ];
        let unique = dedupe_by_id(&chunks);
        assert_eq!(unique.len(), 2);
        assert_eq!(unique[0].text, "new");
        assert_eq!(unique[1].id, "b-00000");
    }

    #[tokio::test]
    async fn test_memory_store_nearest_order() {
        let store = MemoryVectorStore::new(2);
        store
            .add_chunks(&[
                make_chunk("a-00000", "east", "Info1", vec![1.0, 0.0]),
                make_chunk("b-00000", "north", "Info1", vec![0.0, 1.0]),
                make_chunk("c-00000", "north-east", "Info1", vec![1.0, 1.0]),
            ])
            .await
            .unwrap();

        let hits = store.query_nearest(&[1.0, 0.1], 2, None).await.unwrap();
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].id, "a-00000");
        assert_eq!(hits[1].id, "c-00000");
        assert!(hits[0].distance.unwrap() <= hits[1].distance.unwrap());
        assert_eq!(hits[0].meta.page_start, Some(1));
    }

    #[tokio::test]
    async fn test_memory_store_upsert() {
        let store = MemoryVectorStore::new(2);
        store
            .add_chunks(&[make_chunk("a-00000", "first", "Info1", vec![1.0, 0.0])])
            .await
            .unwrap();
        let added = store
            .add_chunks(&[make_chunk("a-00000", "second", "Info1", vec![1.0, 0.0])])
            .await
            .unwrap();

        assert_eq!(added, 1);
        assert_eq!(store.count().await.unwrap(), 1);
        let hits = store.query_nearest(&[1.0, 0.0], 5, None).await.unwrap();
        assert_eq!(hits[0].document, "second");
    }

    #[tokio::test]
    async fn test_memory_store_course_filter() {
        let store = MemoryVectorStore::new(2);
        store
            .add_chunks(&[
                make_chunk("a-00000", "one", "Info1", vec![1.0, 0.0]),
                make_chunk("b-00000", "two", "Info2", vec![1.0, 0.0]),
            ])
            .await
            .unwrap();

        let hits = store
            .query_nearest(&[1.0, 0.0], 10, Some("Info2"))
            .await
            .unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].meta.course, "Info2");

        let none = store
            .query_nearest(&[1.0, 0.0], 10, Some("Mathe"))
            .await
            .unwrap();
        assert!(none.is_empty());
    }

    #[tokio::test]
    async fn test_memory_store_ties_keep_insertion_order() {
        let store = MemoryVectorStore::new(2);
        store
            .add_chunks(&[
                make_chunk("z-00000", "z", "Info1", vec![1.0, 0.0]),
                make_chunk("a-00000", "a", "Info1", vec![1.0, 0.0]),
            ])
            .await
            .unwrap();

        let hits = store.query_nearest(&[1.0, 0.0], 2, None).await.unwrap();
        assert_eq!(hits[0].id, "z-00000");
        assert_eq!(hits[1].id, "a-00000");
    }

    #[tokio::test]
    async fn test_memory_store_rejects_wrong_dimension() {
        let store = MemoryVectorStore::new(3);
        let result = store
            .add_chunks(&[make_chunk("a-00000", "a", "Info1", vec![1.0, 0.0])])
            .await;
        assert!(matches!(result, Err(RagError::StoreUnavailable(_))));
        assert!(store.query_nearest(&[1.0], 1, None).await.is_err());
    }
}
