//! Knowledge 모듈 - 청킹, 벡터 저장소, 하이브리드 검색, 수집 파이프라인
//!
//! - Chunker: 토큰 윈도우 분할 (페이지 범위 기록)
//! - Vector: 저장소 트레이트 + 메모리 구현
//! - LanceDB: 디스크 기반 벡터 저장소 (코사인 거리)
//! - Hybrid: 벡터 유사도 + 퍼지 키워드 점수 재정렬
//! - Ingest: 폴더 단위 최선 노력 수집

mod chunker;
mod hybrid;
mod ingest;
mod lance;
pub(crate) mod vector;

// Re-exports
pub use chunker::{
    chunk_id, ChunkConfig, Cl100kTokenizer, CourseRule, PageChunker, TextChunk, TokenWindow,
    Tokenizer, Window, UNKNOWN_COURSE,
};
pub use hybrid::{
    rerank, Hit, HybridRetriever, LexicalScorer, RetrievalConfig, TokenSetRatio,
};
pub use ingest::{
    estimate_tokens, IngestionReport, Ingestor, SkippedFile, TokenEstimate, EMBED_PRICE_PER_MILLION,
};
pub use lance::{get_data_dir, LanceVectorStore, StoreConfig, DEFAULT_COLLECTION};
pub use vector::{
    cosine_distance, cosine_similarity, Chunk, HitMeta, MemoryVectorStore, Neighbor, VectorStore,
};
