//! 임베딩 모듈 - 텍스트 배치를 고정 차원 벡터로 변환
//!
//! 두 가지 구현을 제공합니다:
//! - [`HashEmbedding`]: SHA-256 기반 결정적 임베딩 (오프라인/테스트용)
//! - [`OpenAiEmbedding`]: OpenAI 호환 `/embeddings` API
//!
//! 어떤 구현을 쓸지는 생성 시점에 [`EmbeddingMode`]로 주입합니다.
//! 환경변수는 CLI 레이어에서만 읽습니다.
//!
//! ## 사용법
//! ```rust,ignore
//! let embedder = create_embedder(&EmbeddingMode::hash())?;
//! let vectors = embedder.embed_batch(&["Ohmsches Gesetz".to_string()]).await?;
//! ```

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use url::Url;

use crate::error::{RagError, Result};

// ============================================================================
// EmbeddingProvider Trait
// ============================================================================

/// 임베딩 프로바이더 트레이트
///
/// `embed_batch`는 길이와 순서를 보존해야 합니다 (입력 1개당 벡터 1개).
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// 배치 임베딩
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;

    /// 단일 텍스트 임베딩 (기본 구현: 크기 1 배치)
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        self.embed_batch(&[text.to_string()])
            .await?
            .pop()
            .ok_or_else(|| RagError::EmbeddingFailure("provider returned no vector".to_string()))
    }

    /// 임베딩 차원 수
    fn dimension(&self) -> usize;

    /// 프로바이더 이름
    fn name(&self) -> &str;
}

// ============================================================================
// Mode Selection
// ============================================================================

/// 결정적 임베딩 기본 차원
pub const HASH_DIMENSION: usize = 64;

/// OpenAI 기본 모델
pub const DEFAULT_OPENAI_MODEL: &str = "text-embedding-3-small";

/// OpenAI 기본 엔드포인트
pub const DEFAULT_OPENAI_BASE_URL: &str = "https://api.openai.com/v1/";

/// 요청 1회당 최대 입력 수
const MAX_INPUTS_PER_REQUEST: usize = 128;

/// 네트워크 임베딩 설정
#[derive(Debug, Clone)]
pub struct OpenAiConfig {
    pub api_key: String,
    pub base_url: String,
    pub model: String,
}

/// 임베딩 전략
#[derive(Debug, Clone)]
pub enum EmbeddingMode {
    /// SHA-256 기반 결정적 벡터 (네트워크 없음)
    Hash { dimension: usize },
    /// OpenAI 호환 API
    OpenAi(OpenAiConfig),
}

impl EmbeddingMode {
    /// 기본 차원의 결정적 모드
    pub fn hash() -> Self {
        EmbeddingMode::Hash {
            dimension: HASH_DIMENSION,
        }
    }

    pub fn is_offline(&self) -> bool {
        matches!(self, EmbeddingMode::Hash { .. })
    }
}

/// 임베딩 프로바이더 생성
pub fn create_embedder(mode: &EmbeddingMode) -> Result<Box<dyn EmbeddingProvider>> {
    match mode {
        EmbeddingMode::Hash { dimension } => {
            let embedder = HashEmbedding::with_dimension(*dimension)?;
            tracing::info!("Using deterministic hash embedding (dimension: {})", dimension);
            Ok(Box::new(embedder))
        }
        EmbeddingMode::OpenAi(config) => {
            let embedder = OpenAiEmbedding::new(config.clone())?;
            tracing::info!(
                "Using {} embedding (dimension: {})",
                embedder.model,
                embedder.dimension
            );
            Ok(Box::new(embedder))
        }
    }
}

// ============================================================================
// HashEmbedding
// ============================================================================

/// 결정적 해시 임베딩
///
/// 입력 문자열의 SHA-256 다이제스트를 차원 수만큼 순환하며
/// 각 바이트를 `[-0.5, 0.5]` 범위로 스케일합니다.
/// 같은 입력이면 프로세스/실행이 달라도 항상 같은 벡터가 나옵니다.
#[derive(Debug, Clone, Copy)]
pub struct HashEmbedding {
    dimension: usize,
}

impl Default for HashEmbedding {
    fn default() -> Self {
        Self {
            dimension: HASH_DIMENSION,
        }
    }
}

impl HashEmbedding {
    pub fn with_dimension(dimension: usize) -> Result<Self> {
        if dimension == 0 {
            return Err(RagError::InvalidConfig(
                "embedding dimension must be greater than zero".to_string(),
            ));
        }
        Ok(Self { dimension })
    }

    /// 텍스트 하나를 벡터로 변환 (순수 함수)
    pub fn vector_for(&self, text: &str) -> Vec<f32> {
        let digest = Sha256::digest(text.as_bytes());
        (0..self.dimension)
            .map(|i| (digest[i % digest.len()] as f32 / 255.0) - 0.5)
            .collect()
    }
}

#[async_trait]
impl EmbeddingProvider for HashEmbedding {
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        Ok(texts.iter().map(|text| self.vector_for(text)).collect())
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn name(&self) -> &str {
        "sha256-hash"
    }
}

// ============================================================================
// OpenAI Embedding
// ============================================================================

/// OpenAI 호환 임베딩 구현체
///
/// 재시도는 하지 않습니다. 실패는 그대로 `EmbeddingFailure`로 올라갑니다.
#[derive(Debug)]
pub struct OpenAiEmbedding {
    api_key: String,
    endpoint: Url,
    model: String,
    dimension: usize,
    client: reqwest::Client,
}

impl OpenAiEmbedding {
    pub fn new(config: OpenAiConfig) -> Result<Self> {
        if config.api_key.trim().is_empty() {
            return Err(RagError::InvalidConfig(
                "OPENAI_API_KEY is required for network embeddings".to_string(),
            ));
        }

        let dimension = model_dimension(&config.model).ok_or_else(|| {
            RagError::InvalidConfig(format!("unknown embedding model: {}", config.model))
        })?;

        let endpoint = embeddings_endpoint(&config.base_url)?;

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(60))
            .build()
            .map_err(|e| RagError::InvalidConfig(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            api_key: config.api_key,
            endpoint,
            model: config.model,
            dimension,
            client,
        })
    }

    async fn request(&self, inputs: &[String]) -> Result<Vec<Vec<f32>>> {
        let request = EmbedRequest {
            model: &self.model,
            input: inputs,
        };

        let response = self
            .client
            .post(self.endpoint.clone())
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;

        if !status.is_success() {
            if let Ok(error) = serde_json::from_str::<ApiError>(&body) {
                return Err(RagError::EmbeddingFailure(format!(
                    "embedding API error ({}): {}",
                    status, error.error.message
                )));
            }
            return Err(RagError::EmbeddingFailure(format!(
                "embedding API error ({}): {}",
                status, body
            )));
        }

        parse_embed_response(&body, inputs.len(), self.dimension)
    }
}

#[async_trait]
impl EmbeddingProvider for OpenAiEmbedding {
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let mut vectors = Vec::with_capacity(texts.len());

        for (i, batch) in texts.chunks(MAX_INPUTS_PER_REQUEST).enumerate() {
            tracing::debug!(
                "Embedding request {} ({} inputs, model={})",
                i + 1,
                batch.len(),
                self.model
            );
            vectors.extend(self.request(batch).await?);
        }

        Ok(vectors)
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn name(&self) -> &str {
        &self.model
    }
}

/// 모델별 출력 차원
fn model_dimension(model: &str) -> Option<usize> {
    match model {
        "text-embedding-3-small" | "text-embedding-ada-002" => Some(1536),
        "text-embedding-3-large" => Some(3072),
        _ => None,
    }
}

/// `{base_url}/embeddings` 조립 (끝 슬래시 유무와 무관)
fn embeddings_endpoint(base_url: &str) -> Result<Url> {
    let mut base = base_url.trim().to_string();
    if !base.ends_with('/') {
        base.push('/');
    }
    Url::parse(&base)
        .and_then(|url| url.join("embeddings"))
        .map_err(|e| RagError::InvalidConfig(format!("invalid embedding base url {base_url}: {e}")))
}

/// API 응답 파싱
///
/// `data[].index` 기준으로 재정렬하고, 개수와 차원을 검증합니다.
fn parse_embed_response(body: &str, expected: usize, dimension: usize) -> Result<Vec<Vec<f32>>> {
    let mut response: EmbedResponse = serde_json::from_str(body)
        .map_err(|e| RagError::EmbeddingFailure(format!("malformed embedding response: {e}")))?;

    if response.data.len() != expected {
        return Err(RagError::EmbeddingFailure(format!(
            "expected {} embeddings, got {}",
            expected,
            response.data.len()
        )));
    }

    response.data.sort_by_key(|item| item.index);

    response
        .data
        .into_iter()
        .enumerate()
        .map(|(position, item)| {
            if item.index != position {
                return Err(RagError::EmbeddingFailure(format!(
                    "embedding index {} missing from response",
                    position
                )));
            }
            if item.embedding.len() != dimension {
                return Err(RagError::EmbeddingFailure(format!(
                    "embedding dimension {} != {}",
                    item.embedding.len(),
                    dimension
                )));
            }
            Ok(item.embedding)
        })
        .collect()
}

// ============================================================================
// API Types
// ============================================================================

#[derive(Debug, Serialize)]
struct EmbedRequest<'a> {
    model: &'a str,
    input: &'a [String],
}

#[derive(Debug, Deserialize)]
struct EmbedResponse {
    data: Vec<EmbeddingItem>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingItem {
    embedding: Vec<f32>,
    index: usize,
}

#[derive(Debug, Deserialize)]
struct ApiError {
    error: ApiErrorDetail,
}

#[derive(Debug, Deserialize)]
struct ApiErrorDetail {
    message: String,
}

// ============================================================================
// Tests
// ============================================================================
