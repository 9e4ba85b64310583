//! 수집 파이프라인 - PDF 폴더를 청크로 만들어 벡터 스토어에 저장
//!
//! 파일 단위 최선 노력: 헤더 불일치, 추출 실패, 임베딩 실패는 해당 파일만
//! 건너뛰고 리포트에 남깁니다. 스토어 에러는 배치 전체를 중단합니다.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::collector::collect_pdfs;
use crate::embedding::EmbeddingProvider;
use crate::error::{RagError, Result};
use crate::extractor::pdf::document_text;
use crate::extractor::{PageReader, PdfSource};

use super::chunker::{Cl100kTokenizer, PageChunker, TextChunk};
use super::vector::{Chunk, VectorStore};

// ============================================================================
// Report
// ============================================================================

/// 건너뛴 파일
#[derive(Debug, Clone, PartialEq)]
pub struct SkippedFile {
    pub path: PathBuf,
    pub reason: String,
}

/// 수집 결과 리포트
#[derive(Debug, Clone, Default, PartialEq)]
pub struct IngestionReport {
    pub files_attempted: usize,
    /// 청커가 만든 청크 수 (임베딩 실패 파일 포함)
    pub chunks_attempted: usize,
    /// 스토어에 기록된 청크 수
    pub chunks_added: usize,
    pub skipped: Vec<SkippedFile>,
}

impl IngestionReport {
    fn skip(&mut self, path: &Path, error: &RagError) {
        tracing::warn!("Skipped {:?}: {}", path, error);
        self.skipped.push(SkippedFile {
            path: path.to_path_buf(),
            reason: skip_reason(error),
        });
    }

    pub fn files_ingested(&self) -> usize {
        self.files_attempted - self.skipped.len()
    }
}

/// 리포트용 사유 문자열
fn skip_reason(error: &RagError) -> String {
    match error {
        RagError::InvalidSource { reason, .. } => reason.clone(),
        other => other.to_string(),
    }
}

// ============================================================================
// Ingestor
// ============================================================================

/// PDF -> 페이지 텍스트 -> 청크 -> 임베딩 -> 스토어
pub struct Ingestor {
    reader: PageReader,
    chunker: PageChunker,
    embedder: Arc<dyn EmbeddingProvider>,
    store: Arc<dyn VectorStore>,
}

impl Ingestor {
    pub fn new(
        reader: PageReader,
        chunker: PageChunker,
        embedder: Arc<dyn EmbeddingProvider>,
        store: Arc<dyn VectorStore>,
    ) -> Self {
        Self {
            reader,
            chunker,
            embedder,
            store,
        }
    }

    /// PDF 하나를 청크로 (동기, 스토어 접근 없음)
    pub fn chunk_file(&self, path: &Path) -> Result<Vec<TextChunk>> {
        let source = PdfSource::open(path)?;
        let pages = self.reader.read_pages(&source)?;
        Ok(self.chunker.chunk_document(path, &pages))
    }

    /// 청크 임베딩 후 저장
    async fn store_chunks(&self, chunks: Vec<TextChunk>) -> Result<usize> {
        let texts: Vec<String> = chunks.iter().map(|c| c.text.clone()).collect();
        let embeddings = self.embedder.embed_batch(&texts).await?;

        if embeddings.len() != chunks.len() {
            return Err(RagError::EmbeddingFailure(format!(
                "expected {} embeddings, got {}",
                chunks.len(),
                embeddings.len()
            )));
        }

        let embedded: Vec<Chunk> = chunks
            .into_iter()
            .zip(embeddings)
            .map(|(chunk, embedding)| Chunk::embedded(chunk, embedding))
            .collect();

        self.store.add_chunks(&embedded).await
    }

    /// 파일 목록 수집 (주어진 순서대로)
    pub async fn ingest_paths(&self, paths: &[PathBuf]) -> Result<IngestionReport> {
        let mut report = IngestionReport::default();

        for path in paths {
            report.files_attempted += 1;

            let chunks = match self.chunk_file(path) {
                Ok(chunks) => chunks,
                Err(e) if e.is_per_file() => {
                    report.skip(path, &e);
                    continue;
                }
                Err(e) => return Err(e),
            };

            let name = path.file_name().unwrap_or_default().to_string_lossy();
            report.chunks_attempted += chunks.len();

            if chunks.is_empty() {
                tracing::info!("Ingest: {} -> 0 chunks (no text)", name);
                continue;
            }

            let count = chunks.len();
            match self.store_chunks(chunks).await {
                Ok(added) => {
                    report.chunks_added += added;
                    tracing::info!("Ingest: {} -> {} chunks", name, count);
                }
                Err(e) if e.is_per_file() => report.skip(path, &e),
                Err(e) => return Err(e),
            }
        }

        tracing::info!(
            "Done. Added {} of {} chunks from {} files ({} skipped)",
            report.chunks_added,
            report.chunks_attempted,
            report.files_attempted,
            report.skipped.len()
        );

        Ok(report)
    }

    /// 폴더 아래 모든 PDF 수집
    pub async fn ingest_folder(&self, root: &Path) -> Result<IngestionReport> {
        let paths = collect_pdfs(root)?;
        if paths.is_empty() {
            tracing::info!("No PDFs found under {:?}", root);
        }
        self.ingest_paths(&paths).await
    }
}

// ============================================================================
// Token Estimate
// ============================================================================

/// text-embedding-3-small 가격 (USD / 1M 토큰)
pub const EMBED_PRICE_PER_MILLION: f64 = 0.02;

/// 코퍼스 토큰 수 추정 결과
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TokenEstimate {
    /// 파일별 토큰 수 (수집 순서)
    pub files: Vec<(PathBuf, usize)>,
    pub skipped: Vec<SkippedFile>,
}

impl TokenEstimate {
    pub fn total_tokens(&self) -> usize {
        self.files.iter().map(|(_, tokens)| tokens).sum()
    }

    /// 임베딩 비용 추정 (USD)
    pub fn cost_usd(&self) -> f64 {
        self.total_tokens() as f64 / 1_000_000.0 * EMBED_PRICE_PER_MILLION
    }
}

/// 내장 텍스트 기준 토큰 수 추정 (OCR 없음)
pub fn estimate_tokens(paths: &[PathBuf], tokenizer: &Cl100kTokenizer) -> TokenEstimate {
    let mut estimate = TokenEstimate::default();

    for path in paths {
        let counted = PdfSource::open(path)
            .and_then(|source| document_text(&source))
            .map(|text| tokenizer.count(&text));

        match counted {
            Ok(tokens) => estimate.files.push((path.clone(), tokens)),
            Err(e) => estimate.skipped.push(SkippedFile {
                path: path.clone(),
                reason: skip_reason(&e),
            }),
        }
    }

    estimate
}

// ============================================================================
// Tests
// ============================================================================
