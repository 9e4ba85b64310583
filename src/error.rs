//! 에러 타입 - 수집/검색 파이프라인 공통
//!
//! 파일 단위 에러(InvalidSource, ExtractionFailure)는 배치 수집에서
//! 잡혀서 skip 리포트로 들어가고, 나머지는 호출자에게 그대로 전파됩니다.

use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum RagError {
    /// PDF 시그니처(`%PDF`) 불일치
    #[error("invalid source {path}: {reason}")]
    InvalidSource { path: PathBuf, reason: String },

    /// 파싱 또는 OCR 실패
    #[error("extraction failed: {0}")]
    ExtractionFailure(String),

    /// 임베딩 프로바이더 에러 (전송, 상태 코드, 응답 형식)
    #[error("embedding failed: {0}")]
    EmbeddingFailure(String),

    /// 벡터 스토어를 열거나 읽거나 쓸 수 없음
    #[error("vector store unavailable: {0}")]
    StoreUnavailable(String),

    #[error("invalid config: {0}")]
    InvalidConfig(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl RagError {
    /// 배치 수집에서 파일 하나만 건너뛰면 되는 에러인지
    pub fn is_per_file(&self) -> bool {
        matches!(
            self,
            RagError::InvalidSource { .. }
                | RagError::ExtractionFailure(_)
                | RagError::EmbeddingFailure(_)
        )
    }
}

impl From<reqwest::Error> for RagError {
    fn from(error: reqwest::Error) -> Self {
        RagError::EmbeddingFailure(error.to_string())
    }
}

pub type Result<T, E = RagError> = std::result::Result<T, E>;
