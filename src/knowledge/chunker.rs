//! Token Window Chunking Module
//!
//! 페이지별 정규화 텍스트를 토큰 윈도우로 분할합니다.
//! 각 청크는 시작/끝 페이지를 기록하고, 다음 청크는 이전 청크의
//! 마지막 `overlap` 토큰에서 시작합니다.

use std::ops::Range;
use std::path::Path;
use std::sync::Arc;

use tiktoken_rs::CoreBPE;

use crate::error::{RagError, Result};
use crate::extractor::PageText;

/// 코스 폴더로 인식되지 않을 때의 코스 이름
pub const UNKNOWN_COURSE: &str = "Unknown";

// ============================================================================
// Chunk Configuration
// ============================================================================

/// 청킹 설정 (토큰 단위)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkConfig {
    /// 청크당 최대 토큰 수 (오버랩 포함)
    pub target_tokens: usize,
    /// 다음 청크로 이어지는 토큰 수
    pub overlap_tokens: usize,
}

impl Default for ChunkConfig {
    fn default() -> Self {
        Self {
            target_tokens: 1000,
            overlap_tokens: 150,
        }
    }
}

impl ChunkConfig {
    pub fn new(target_tokens: usize, overlap_tokens: usize) -> Result<Self> {
        let config = Self {
            target_tokens,
            overlap_tokens,
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.target_tokens == 0 {
            return Err(RagError::InvalidConfig(
                "chunk target must be at least one token".to_string(),
            ));
        }
        if self.overlap_tokens >= self.target_tokens {
            return Err(RagError::InvalidConfig(format!(
                "chunk overlap ({}) must be smaller than target ({})",
                self.overlap_tokens, self.target_tokens
            )));
        }
        Ok(())
    }
}

// ============================================================================
// Tokenizer
// ============================================================================

/// 토크나이저 트레이트
pub trait Tokenizer: Send + Sync {
    fn encode(&self, text: &str) -> Vec<usize>;

    /// 토큰 열을 문자열로 복원
    ///
    /// 멀티바이트 문자 중간에서 끝나는 토큰 열이면 `None`.
    fn decode(&self, tokens: &[usize]) -> Option<String>;

    fn name(&self) -> &'static str;
}

/// OpenAI `cl100k_base` 토크나이저
#[derive(Clone)]
pub struct Cl100kTokenizer {
    bpe: Arc<CoreBPE>,
}

impl Cl100kTokenizer {
    pub fn new() -> Result<Self> {
        let bpe = tiktoken_rs::cl100k_base().map_err(|e| {
            RagError::InvalidConfig(format!("Failed to load cl100k_base tokenizer: {}", e))
        })?;
        Ok(Self { bpe: Arc::new(bpe) })
    }

    /// 텍스트의 토큰 수
    pub fn count(&self, text: &str) -> usize {
        self.bpe.encode_with_special_tokens(text).len()
    }
}

impl Tokenizer for Cl100kTokenizer {
    fn encode(&self, text: &str) -> Vec<usize> {
        self.bpe.encode_with_special_tokens(text)
    }

    fn decode(&self, tokens: &[usize]) -> Option<String> {
        self.bpe.decode(tokens.to_vec()).ok()
    }

    fn name(&self) -> &'static str {
        "cl100k_base"
    }
}

// ============================================================================
// Token Window
// ============================================================================

/// 윈도우에서 잘려 나온 텍스트 조각
#[derive(Debug, Clone, PartialEq)]
pub struct Window {
    pub text: String,
    pub page_start: u32,
    pub page_end: u32,
    /// 문서 전체 토큰 스트림에서의 위치
    pub token_range: Range<usize>,
}

/// 페이지를 순서대로 받아 토큰 윈도우를 잘라내는 버퍼
///
/// - 버퍼가 `target` 토큰에 도달하면 앞부분을 청크로 방출
/// - 방출한 청크의 마지막 `overlap` 토큰이 다음 윈도우의 시드
/// - 자르는 위치는 UTF-8 경계로 내림 (멀티바이트 문자를 쪼개지 않음)
pub struct TokenWindow<'a> {
    tokenizer: &'a dyn Tokenizer,
    config: ChunkConfig,
    /// (토큰, 페이지 번호)
    buffer: Vec<(usize, u32)>,
    /// buffer[0]의 절대 토큰 위치
    offset: usize,
    /// 마지막 방출 이후 추가된 토큰 수
    fresh: usize,
    last_page: Option<u32>,
    separator: Vec<usize>,
}

impl<'a> TokenWindow<'a> {
    pub fn new(tokenizer: &'a dyn Tokenizer, config: ChunkConfig) -> Self {
        Self {
            tokenizer,
            config,
            buffer: Vec::new(),
            offset: 0,
            fresh: 0,
            last_page: None,
            separator: tokenizer.encode("\n"),
        }
    }

    /// 페이지 하나 추가, 가득 찬 윈도우를 반환
    ///
    /// 빈 페이지는 마지막 페이지 번호만 갱신합니다.
    pub fn push_page(&mut self, page: u32, text: &str) -> Vec<Window> {
        self.last_page = Some(page);
        if text.trim().is_empty() {
            return Vec::new();
        }

        let mut incoming = Vec::new();
        if !self.buffer.is_empty() {
            incoming.extend(self.separator.iter().copied());
        }
        incoming.extend(self.tokenizer.encode(text));

        self.fresh += incoming.len();
        self.buffer
            .extend(incoming.into_iter().map(|token| (token, page)));

        let mut windows = Vec::new();
        while self.buffer.len() >= self.config.target_tokens {
            if let Some(window) = self.cut(page) {
                windows.push(window);
            }
        }
        windows
    }

    /// 남은 버퍼를 마지막 청크로 방출, `page_end`는 문서의 마지막 페이지
    ///
    /// 이미 방출된 토큰(시드)만 남았거나 공백뿐이면 `None`.
    pub fn finish(self) -> Option<Window> {
        let page_end = self.last_page?;
        if self.fresh == 0 || self.buffer.is_empty() {
            return None;
        }

        let text = self.decode_prefix(self.buffer.len())?;
        if text.trim().is_empty() {
            return None;
        }

        let start = self.offset;
        Some(Window {
            text,
            page_start: self.buffer[0].1,
            page_end,
            token_range: start..start + self.buffer.len(),
        })
    }

    fn decode_prefix(&self, end: usize) -> Option<String> {
        let tokens: Vec<usize> = self.buffer[..end].iter().map(|(t, _)| *t).collect();
        self.tokenizer.decode(&tokens)
    }

    /// buffer[0]이 문자 경계이므로 앞부분이 디코딩되면 `end`도 경계
    fn is_boundary(&self, end: usize) -> bool {
        end == 0 || self.decode_prefix(end).is_some()
    }

    /// 앞쪽 `target` 토큰 이내에서 한 윈도우를 잘라냄
    fn cut(&mut self, current_page: u32) -> Option<Window> {
        let target = self.config.target_tokens;

        // 목표 이하의 가장 큰 경계. 없으면(극단적으로 작은 target) 위로 탐색,
        // 버퍼 끝은 항상 페이지 끝이므로 경계가 존재함
        let cut = (1..=target)
            .rev()
            .find(|&end| self.is_boundary(end))
            .or_else(|| (target + 1..=self.buffer.len()).find(|&end| self.is_boundary(end)))
            .unwrap_or(self.buffer.len());

        let text = self.decode_prefix(cut).unwrap_or_default();
        let page_start = self.buffer[0].1;
        let start = self.offset;

        // 시드는 최소 한 토큰 앞으로 전진해야 루프가 끝남
        let seed_from = cut.saturating_sub(self.config.overlap_tokens).max(1);
        let seed_start = (seed_from..cut)
            .find(|&end| self.is_boundary(end))
            .unwrap_or(cut);

        self.buffer.drain(..seed_start);
        self.offset += seed_start;
        self.fresh = self.buffer.len() - (cut - seed_start);

        if text.trim().is_empty() {
            return None;
        }

        Some(Window {
            text,
            page_start,
            page_end: current_page,
            token_range: start..start + cut,
        })
    }
}

// ============================================================================
// Course Rule
// ============================================================================

/// 상위 폴더 이름으로 코스를 결정하는 규칙
#[derive(Debug, Clone)]
pub struct CourseRule {
    /// 인식할 코스 폴더 접두어 (대소문자 무시)
    pub prefixes: Vec<String>,
}

impl Default for CourseRule {
    fn default() -> Self {
        Self {
            prefixes: vec!["info".to_string()],
        }
    }
}

impl CourseRule {
    /// 파일 경로의 코스 이름 (인식 못 하면 `"Unknown"`)
    pub fn course_for(&self, path: &Path) -> String {
        let folder = path
            .parent()
            .and_then(|p| p.file_name())
            .and_then(|name| name.to_str());

        match folder {
            Some(name) if self.matches(name) => name.to_string(),
            _ => UNKNOWN_COURSE.to_string(),
        }
    }

    fn matches(&self, folder: &str) -> bool {
        let folder = folder.to_lowercase();
        self.prefixes
            .iter()
            .any(|prefix| !prefix.is_empty() && folder.starts_with(&prefix.to_lowercase()))
    }
}

// ============================================================================
// Page Chunker
// ============================================================================

/// 임베딩 전의 청크
#[derive(Debug, Clone, PartialEq)]
pub struct TextChunk {
    /// `<문서 stem>-<순번:05>`
    pub id: String,
    pub text: String,
    /// 파일 이름
    pub source: String,
    pub course: String,
    pub page_start: u32,
    pub page_end: u32,
    pub token_range: Range<usize>,
}

/// 문서 단위 청커
pub struct PageChunker {
    tokenizer: Arc<dyn Tokenizer>,
    config: ChunkConfig,
    course_rule: CourseRule,
}

impl PageChunker {
    pub fn new(tokenizer: Arc<dyn Tokenizer>, config: ChunkConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            tokenizer,
            config,
            course_rule: CourseRule::default(),
        })
    }

    /// cl100k_base + 기본 설정
    pub fn with_defaults() -> Result<Self> {
        Self::new(Arc::new(Cl100kTokenizer::new()?), ChunkConfig::default())
    }

    pub fn with_course_rule(mut self, rule: CourseRule) -> Self {
        self.course_rule = rule;
        self
    }

    pub fn config(&self) -> &ChunkConfig {
        &self.config
    }

    /// 페이지 순서대로 윈도우 생성 (메타데이터 없음)
    pub fn windows(&self, pages: &[PageText]) -> Vec<Window> {
        let mut window = TokenWindow::new(self.tokenizer.as_ref(), self.config);
        let mut out = Vec::new();

        for page in pages {
            out.extend(window.push_page(page.number, &page.text));
        }
        out.extend(window.finish());
        out
    }

    /// 문서 하나의 청크 생성
    pub fn chunk_document(&self, path: &Path, pages: &[PageText]) -> Vec<TextChunk> {
        let stem = path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();
        let source = path
            .file_name()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();
        let course = self.course_rule.course_for(path);

        let chunks: Vec<TextChunk> = self
            .windows(pages)
            .into_iter()
            .enumerate()
            .map(|(index, window)| TextChunk {
                id: chunk_id(&stem, index),
                text: window.text,
                source: source.clone(),
                course: course.clone(),
                page_start: window.page_start,
                page_end: window.page_end,
                token_range: window.token_range,
            })
            .collect();

        tracing::debug!(
            "{} -> {} chunks ({} pages, course {})",
            source,
            chunks.len(),
            pages.len(),
            course
        );

        chunks
    }
}

/// 청크 ID: `<stem>-<index:05>`
pub fn chunk_id(stem: &str, index: usize) -> String {
    format!("{}-{:05}", stem, index)
}

// ============================================================================
// Tests
// ============================================================================
