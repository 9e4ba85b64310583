//! CLI 모듈
//!
//! course-rag 명령어 정의 및 구현. 설정은 플래그 또는 환경 변수로 받습니다.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{ArgAction, Args, Parser, Subcommand};

use crate::collector::PdfCollector;
use crate::embedding::{
    create_embedder, EmbeddingMode, EmbeddingProvider, OpenAiConfig, DEFAULT_OPENAI_BASE_URL,
    DEFAULT_OPENAI_MODEL,
};
use crate::extractor::{OcrConfig, PageReader};
use crate::knowledge::{
    estimate_tokens, get_data_dir, ChunkConfig, Cl100kTokenizer, Hit, HybridRetriever, Ingestor,
    LanceVectorStore, PageChunker, RetrievalConfig, SkippedFile, StoreConfig, VectorStore,
    DEFAULT_COLLECTION, EMBED_PRICE_PER_MILLION,
};
use crate::tutor::{format_citation, Tutor, TutorReply};

// ============================================================================
// CLI Definition
// ============================================================================

#[derive(Parser)]
#[command(name = "course-rag")]
#[command(version, about = "강의 PDF 검색 기반 튜터 (LanceDB + 하이브리드 재정렬)", long_about = None)]
pub struct Cli {
    #[command(flatten)]
    pub settings: Settings,

    #[command(subcommand)]
    pub command: Commands,
}

/// 공통 설정 (환경 변수 지원)
#[derive(Args, Debug, Clone)]
pub struct Settings {
    /// 데이터 디렉토리 (기본: 로컬 데이터 폴더/.course-rag)
    #[arg(long, env = "RAG_DATA_DIR", global = true)]
    pub data_dir: Option<PathBuf>,

    /// 컬렉션 이름
    #[arg(long, env = "COLLECTION_NAME", default_value = DEFAULT_COLLECTION, global = true)]
    pub collection: String,

    /// 벡터 유사도 가중치 (0.0 ~ 1.0)
    #[arg(long, env = "HYBRID_ALPHA", default_value_t = 0.6, global = true)]
    pub alpha: f32,

    /// 결정적 해시 임베딩 사용 (기본: CI에서만 켜짐)
    #[arg(
        long,
        env = "USE_FAKE_EMBEDDINGS",
        action = ArgAction::Set,
        value_parser = parse_switch,
        global = true
    )]
    pub fake_embeddings: Option<bool>,

    /// 임베딩 모델
    #[arg(long, env = "EMBED_MODEL", default_value = DEFAULT_OPENAI_MODEL, global = true)]
    pub embed_model: String,

    /// OpenAI API 키
    #[arg(long, env = "OPENAI_API_KEY", hide_env_values = true, global = true)]
    pub api_key: Option<String>,

    /// OpenAI 호환 엔드포인트
    #[arg(long, env = "OPENAI_BASE_URL", default_value = DEFAULT_OPENAI_BASE_URL, global = true)]
    pub base_url: String,

    /// 텍스트가 부족한 페이지에 OCR 폴백 사용
    #[arg(
        long,
        env = "OCR_ENABLE",
        action = ArgAction::Set,
        value_parser = parse_switch,
        default_value = "1",
        global = true
    )]
    pub ocr: bool,

    /// tesseract 언어
    #[arg(long, env = "OCR_LANGS", default_value = "deu+eng", global = true)]
    pub ocr_langs: String,

    /// 이 글자 수 미만이면 OCR 시도
    #[arg(long, env = "OCR_MIN_CHARS", default_value_t = 30, global = true)]
    pub ocr_min_chars: usize,

    /// OCR 렌더링 배율
    #[arg(long, env = "OCR_RENDER_SCALE", default_value_t = 2.0, global = true)]
    pub ocr_render_scale: f32,
}

#[derive(Subcommand)]
pub enum Commands {
    /// 폴더(또는 PDF 하나)를 수집
    Ingest {
        /// 코퍼스 루트
        #[arg(default_value = "docs")]
        root: PathBuf,

        /// 청크 크기 (토큰)
        #[arg(long, default_value_t = 1000)]
        chunk_tokens: usize,

        /// 청크 겹침 (토큰)
        #[arg(long, default_value_t = 150)]
        overlap: usize,
    },

    /// 하이브리드 검색
    Query {
        /// 검색 쿼리
        query: String,

        /// 결과 개수
        #[arg(short, default_value_t = 6)]
        k: usize,

        /// 과목 필터 ("Alle"는 전체)
        #[arg(short, long)]
        course: Option<String>,
    },

    /// 질문 답변 프롬프트 (오프라인이면 데모 답변)
    Ask {
        /// 질문
        question: String,

        /// 컨텍스트 개수
        #[arg(short, default_value_t = 6)]
        k: usize,

        /// 과목 필터 ("Alle"는 전체)
        #[arg(short, long)]
        course: Option<String>,
    },

    /// 퀴즈 프롬프트 (오프라인이면 데모 퀴즈)
    Quiz {
        /// 주제
        topic: String,

        /// 문제 수
        #[arg(short = 'n', long, default_value_t = 5)]
        questions: usize,

        /// 컨텍스트 개수 (최대 20)
        #[arg(short, default_value_t = 20)]
        k: usize,

        /// 과목 필터 ("Alle"는 전체)
        #[arg(short, long)]
        course: Option<String>,
    },

    /// 코퍼스 토큰 수와 임베딩 비용 추정
    EstimateTokens {
        /// 코퍼스 루트
        #[arg(default_value = "docs")]
        root: PathBuf,
    },

    /// 상태 확인
    Status,
}

// ============================================================================
// Settings
// ============================================================================

/// `1/true/yes/on` 또는 `0/false/no/off`
fn parse_switch(value: &str) -> std::result::Result<bool, String> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" | "" => Ok(false),
        other => Err(format!("expected 0/1, got {:?}", other)),
    }
}

/// GitHub Actions 안에서 실행 중인지
fn running_in_ci() -> bool {
    std::env::var("GITHUB_ACTIONS")
        .map(|value| value == "true")
        .unwrap_or(false)
}

/// "Alle" / "all" / 빈 문자열은 필터 없음
fn course_filter(course: Option<&str>) -> Option<&str> {
    course.map(str::trim).filter(|c| {
        !c.is_empty() && !c.eq_ignore_ascii_case("alle") && !c.eq_ignore_ascii_case("all")
    })
}

impl Settings {
    pub fn embedding_mode(&self) -> Result<EmbeddingMode> {
        if self.fake_embeddings.unwrap_or_else(running_in_ci) {
            return Ok(EmbeddingMode::hash());
        }

        let api_key = match self.api_key.as_deref().map(str::trim) {
            Some(key) if !key.is_empty() => key.to_string(),
            _ => bail!(
                "OPENAI_API_KEY가 설정되지 않았습니다.\n\n\
                 설정 방법:\n  \
                 export OPENAI_API_KEY=your-api-key\n  \
                 또는 오프라인 모드:\n  \
                 export USE_FAKE_EMBEDDINGS=1"
            ),
        };

        Ok(EmbeddingMode::OpenAi(OpenAiConfig {
            api_key,
            base_url: self.base_url.clone(),
            model: self.embed_model.clone(),
        }))
    }

    pub fn ocr_config(&self) -> Result<OcrConfig> {
        let config = OcrConfig {
            enabled: self.ocr,
            languages: self.ocr_langs.clone(),
            min_chars: self.ocr_min_chars,
            render_scale: self.ocr_render_scale,
            ..Default::default()
        };
        config.validate()?;
        Ok(config)
    }

    pub fn store_config(&self) -> StoreConfig {
        StoreConfig {
            data_dir: self.data_dir.clone().unwrap_or_else(get_data_dir),
            collection: self.collection.clone(),
        }
    }

    pub fn retrieval_config(&self) -> Result<RetrievalConfig> {
        Ok(RetrievalConfig::with_alpha(self.alpha)?)
    }
}

/// 임베더 + 스토어 준비
async fn open_backend(
    settings: &Settings,
) -> Result<(EmbeddingMode, Arc<dyn EmbeddingProvider>, Arc<dyn VectorStore>)> {
    let mode = settings.embedding_mode()?;
    let embedder: Arc<dyn EmbeddingProvider> =
        Arc::from(create_embedder(&mode).context("임베더 생성 실패")?);

    let store = LanceVectorStore::from_config(&settings.store_config(), embedder.dimension())
        .await
        .context("LanceDB 열기 실패")?;

    Ok((mode, embedder, Arc::new(store)))
}

async fn open_tutor(settings: &Settings) -> Result<Tutor> {
    let (mode, embedder, store) = open_backend(settings).await?;
    let retriever = HybridRetriever::new(embedder, store, settings.retrieval_config()?)?;
    Ok(Tutor::new(retriever, mode.is_offline()))
}

// ============================================================================
// CLI Runner
// ============================================================================

/// CLI 명령어 실행
pub async fn run(cli: Cli) -> Result<()> {
    let settings = cli.settings;

    match cli.command {
        Commands::Ingest {
            root,
            chunk_tokens,
            overlap,
        } => cmd_ingest(&settings, &root, chunk_tokens, overlap).await,
        Commands::Query { query, k, course } => {
            cmd_query(&settings, &query, k, course.as_deref()).await
        }
        Commands::Ask {
            question,
            k,
            course,
        } => cmd_ask(&settings, &question, k, course.as_deref()).await,
        Commands::Quiz {
            topic,
            questions,
            k,
            course,
        } => cmd_quiz(&settings, &topic, questions, k, course.as_deref()).await,
        Commands::EstimateTokens { root } => cmd_estimate_tokens(&root),
        Commands::Status => cmd_status(&settings).await,
    }
}

// ============================================================================
// Command Implementations
// ============================================================================

/// 수집 명령어 (ingest)
async fn cmd_ingest(
    settings: &Settings,
    root: &Path,
    chunk_tokens: usize,
    overlap: usize,
) -> Result<()> {
    let files = PdfCollector::with_defaults()
        .collect(root)
        .with_context(|| format!("PDF 수집 실패: {}", root.display()))?;

    if files.is_empty() {
        println!("[!] 수집할 PDF가 없습니다: {}", root.display());
        return Ok(());
    }

    let total_size: u64 = files.iter().map(|f| f.size).sum();
    println!("[*] 수집 대상: {} PDF", files.len());
    println!("    총 크기: {}", format_bytes(total_size as usize));

    let reader = PageReader::from_config(&settings.ocr_config()?);
    let tokenizer = Cl100kTokenizer::new().context("토크나이저 로드 실패")?;
    let chunker = PageChunker::new(
        Arc::new(tokenizer),
        ChunkConfig::new(chunk_tokens, overlap)?,
    )?;
    let (_, embedder, store) = open_backend(settings).await?;

    let paths: Vec<PathBuf> = files.into_iter().map(|f| f.path).collect();
    let report = Ingestor::new(reader, chunker, embedder, store)
        .ingest_paths(&paths)
        .await
        .context("수집 중단")?;

    println!();
    println!(
        "[OK] 완료: 파일 {}/{}, 청크 {}/{}",
        report.files_ingested(),
        report.files_attempted,
        report.chunks_added,
        report.chunks_attempted
    );
    print_skipped(&report.skipped);

    Ok(())
}

/// 검색 명령어 (query)
async fn cmd_query(settings: &Settings, query: &str, k: usize, course: Option<&str>) -> Result<()> {
    let (_, embedder, store) = open_backend(settings).await?;
    let retriever = HybridRetriever::new(embedder, store, settings.retrieval_config()?)?;

    println!("[*] 검색 중: \"{}\"", query);

    let hits = retriever
        .query(query, k, course_filter(course))
        .await
        .context("검색 실패")?;

    if hits.is_empty() {
        println!("\n[!] 검색 결과가 없습니다.");
        return Ok(());
    }

    println!("\n[OK] 검색 결과 ({} 건):\n", hits.len());
    print_hits(&hits);

    Ok(())
}

/// 질문 명령어 (ask)
async fn cmd_ask(settings: &Settings, question: &str, k: usize, course: Option<&str>) -> Result<()> {
    let reply = open_tutor(settings)
        .await?
        .answer(question, course_filter(course), k)
        .await
        .context("답변 생성 실패")?;

    print_reply(&reply);
    Ok(())
}

/// 퀴즈 명령어 (quiz)
async fn cmd_quiz(
    settings: &Settings,
    topic: &str,
    questions: usize,
    k: usize,
    course: Option<&str>,
) -> Result<()> {
    let reply = open_tutor(settings)
        .await?
        .quiz(topic, course_filter(course), questions, k)
        .await
        .context("퀴즈 생성 실패")?;

    print_reply(&reply);
    Ok(())
}

/// 토큰 추정 명령어 (estimate-tokens)
fn cmd_estimate_tokens(root: &Path) -> Result<()> {
    let paths = crate::collector::collect_pdfs(root)
        .with_context(|| format!("PDF 수집 실패: {}", root.display()))?;
    let tokenizer = Cl100kTokenizer::new().context("토크나이저 로드 실패")?;

    let estimate = estimate_tokens(&paths, &tokenizer);

    for (path, tokens) in &estimate.files {
        println!("{}: ~{} tokens", path.display(), tokens);
    }
    println!("TOTAL ~{} tokens", estimate.total_tokens());
    println!(
        "EST_EMBED_COST (text-embedding-3-small @ ${}/M) ≈ ${:.2}",
        EMBED_PRICE_PER_MILLION,
        estimate.cost_usd()
    );
    print_skipped(&estimate.skipped);

    Ok(())
}

/// 상태 명령어 (status)
async fn cmd_status(settings: &Settings) -> Result<()> {
    println!("course-rag v{}", env!("CARGO_PKG_VERSION"));
    println!();

    let store_config = settings.store_config();
    println!("[*] 데이터 디렉토리: {}", store_config.data_dir.display());
    println!("[*] 컬렉션: {}", store_config.collection);

    if settings.ocr {
        println!(
            "[*] OCR: 사용 ({}, {}자 미만, x{})",
            settings.ocr_langs, settings.ocr_min_chars, settings.ocr_render_scale
        );
    } else {
        println!("[*] OCR: 미사용");
    }

    let mode = match settings.embedding_mode() {
        Ok(mode) => mode,
        Err(e) => {
            println!("[!] 임베딩: {}", e);
            return Ok(());
        }
    };

    match &mode {
        EmbeddingMode::Hash { dimension } => {
            println!("[OK] 임베딩: 해시 (오프라인, {} 차원)", dimension)
        }
        EmbeddingMode::OpenAi(config) => println!("[OK] 임베딩: {}", config.model),
    }

    match open_backend(settings).await {
        Ok((_, _, store)) => match store.count().await {
            Ok(count) => println!("[OK] 저장된 청크: {} 건", count),
            Err(e) => println!("[!] 청크 수 조회 실패: {}", e),
        },
        Err(e) => println!("[!] 벡터 스토어 열기 실패: {:#}", e),
    }

    Ok(())
}

// ============================================================================
// Helper Functions
// ============================================================================

fn print_hits(hits: &[Hit]) {
    for (i, hit) in hits.iter().enumerate() {
        println!(
            "{}. [점수: {:.4}] [{}] {}",
            i + 1,
            hit.score,
            hit.meta.course,
            format_citation(&hit.meta)
        );
        println!("   내용: {}", truncate_text(&hit.document, 200));
        println!();
    }
}

fn print_reply(reply: &TutorReply) {
    if !reply.is_demo {
        tracing::debug!("Built prompt from {} contexts", reply.hits.len());
    }
    println!("{}", reply.text);
}

fn print_skipped(skipped: &[SkippedFile]) {
    if skipped.is_empty() {
        return;
    }

    println!("\nSkipped files:");
    for file in skipped {
        let name = file
            .path
            .file_name()
            .map(|n| n.to_string_lossy())
            .unwrap_or_else(|| file.path.to_string_lossy());
        println!(" - {}  [{}]", name, file.reason);
    }
}

/// 텍스트 자르기 (UTF-8 안전)
fn truncate_text(text: &str, max_chars: usize) -> String {
    let cleaned = text.replace('\n', " ").replace('\r', "");
    let cleaned = cleaned.trim();

    if cleaned.chars().count() <= max_chars {
        cleaned.to_string()
    } else {
        let truncated: String = cleaned.chars().take(max_chars).collect();
        format!("{}...", truncated)
    }
}

/// 바이트 크기 포맷팅
fn format_bytes(bytes: usize) -> String {
    const KB: usize = 1024;
    const MB: usize = KB * 1024;

    if bytes >= MB {
        format!("{:.2} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.2} KB", bytes as f64 / KB as f64)
    } else {
        format!("{} B", bytes)
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Cli {
        let mut argv = vec!["course-rag"];
        argv.extend_from_slice(args);
        Cli::try_parse_from(argv).unwrap()
    }

    #[test]
    fn test_truncate_text() {
        assert_eq!(truncate_text("hello", 10), "hello");
        assert_eq!(truncate_text("hello world", 5), "hello...");
        assert_eq!(truncate_text("hello\nworld", 20), "hello world");
    }

    #[test]
    fn test_format_bytes() {
        assert_eq!(format_bytes(500), "500 B");
        assert_eq!(format_bytes(1024), "1.00 KB");
        assert_eq!(format_bytes(1536), "1.50 KB");
        assert_eq!(format_bytes(1048576), "1.00 MB");
    }

    #[test]
    fn test_truncate_unicode() {
        let german = "Widerstände über Spannung";
        assert_eq!(truncate_text(german, 11), "Widerstände...");
    }

    #[test]
    fn test_parse_switch() {
        assert_eq!(parse_switch("1"), Ok(true));
        assert_eq!(parse_switch("TRUE"), Ok(true));
        assert_eq!(parse_switch("0"), Ok(false));
        assert_eq!(parse_switch("off"), Ok(false));
        assert!(parse_switch("maybe").is_err());
    }

    #[test]
    fn test_course_filter() {
        assert_eq!(course_filter(None), None);
        assert_eq!(course_filter(Some("Alle")), None);
        assert_eq!(course_filter(Some("all")), None);
        assert_eq!(course_filter(Some("  ")), None);
        assert_eq!(course_filter(Some("Info1")), Some("Info1"));
    }

    #[test]
    fn test_parse_quiz_command() {
        let cli = parse(&["quiz", "Ohm", "-n", "3", "-c", "Info2"]);
        match cli.command {
            Commands::Quiz {
                topic,
                questions,
                k,
                course,
            } => {
                assert_eq!(topic, "Ohm");
                assert_eq!(questions, 3);
                assert_eq!(k, 20);
                assert_eq!(course.as_deref(), Some("Info2"));
            }
            _ => panic!("expected quiz"),
        }
    }

    #[test]
    fn test_fake_embeddings_flag() {
        let cli = parse(&["--fake-embeddings", "1", "--alpha", "0.3", "status"]);
        let mode = cli.settings.embedding_mode().unwrap();
        assert!(mode.is_offline());
        assert!((cli.settings.retrieval_config().unwrap().alpha - 0.3).abs() < 1e-6);
    }

    #[test]
    fn test_network_mode_requires_api_key() {
        let mut settings = parse(&["--fake-embeddings", "0", "status"]).settings;
        settings.api_key = None;
        assert!(settings.embedding_mode().is_err());

        settings.api_key = Some("sk-test".to_string());
        match settings.embedding_mode().unwrap() {
            EmbeddingMode::OpenAi(config) => {
                assert_eq!(config.api_key, "sk-test");
                assert_eq!(config.model, settings.embed_model);
            }
            other => panic!("unexpected mode: {:?}", other),
        }
    }

    #[test]
    fn test_invalid_alpha_rejected() {
        let cli = parse(&["--alpha", "1.5", "status"]);
        assert!(cli.settings.retrieval_config().is_err());
    }

    #[test]
    fn test_store_config_uses_data_dir() {
        let cli = parse(&["--data-dir", "/tmp/rag", "--collection", "ei", "status"]);
        let config = cli.settings.store_config();
        assert_eq!(config.data_dir, PathBuf::from("/tmp/rag"));
        assert_eq!(config.collection, "ei");
        assert_eq!(config.lance_path(), PathBuf::from("/tmp/rag/lance"));
    }
}
