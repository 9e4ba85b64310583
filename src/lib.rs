//! course-rag - 강의 PDF 검색 코어
//!
//! PDF 페이지 텍스트(OCR 폴백 포함)를 토큰 윈도우로 나눠 LanceDB에 저장하고,
//! 벡터 유사도와 퍼지 키워드 점수를 섞어 재정렬한 결과로
//! 독일어 튜터 프롬프트를 만듭니다.

pub mod cli;
pub mod collector;
pub mod embedding;
pub mod error;
pub mod extractor;
pub mod knowledge;
pub mod tutor;

// Re-exports
pub use collector::{collect_pdfs, PdfCollector};
pub use embedding::{create_embedder, EmbeddingMode, EmbeddingProvider, HashEmbedding};
pub use error::{RagError, Result};
pub use extractor::{OcrConfig, PageReader, PageText, PdfSource};
pub use knowledge::{
    get_data_dir, ChunkConfig, Chunk, Hit, HitMeta, HybridRetriever, IngestionReport, Ingestor,
    LanceVectorStore, MemoryVectorStore, PageChunker, RetrievalConfig, StoreConfig, TextChunk,
    VectorStore,
};
pub use tutor::{Tutor, TutorReply};
