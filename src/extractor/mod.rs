//! 페이지 텍스트 추출 모듈
//!
//! 페이지마다 텍스트 소스를 순서대로 시도하는 체인입니다.
//! - [`DirectExtract`]: PDF에 내장된 텍스트 (lopdf)
//! - [`OcrRender`]: 페이지를 이미지로 렌더링 후 tesseract OCR
//!
//! 정리된 텍스트가 `min_chars`보다 짧으면 다음 소스로 넘어가고,
//! 후보 중 가장 긴 텍스트를 채택합니다. 폴백 소스의 실패는
//! 로그만 남기고 빈 문자열로 취급합니다.

pub mod ocr;
pub mod pdf;

use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use lopdf::Document;
use regex::Regex;

use crate::error::{RagError, Result};

pub use ocr::{OcrConfig, OcrRender};
pub use pdf::DirectExtract;

/// PDF 파일 시그니처
const PDF_SIGNATURE: &[u8; 4] = b"%PDF";

// ============================================================================
// Source Document
// ============================================================================

/// 열린 PDF 문서
///
/// 페이지는 0부터 시작하는 인덱스로 접근합니다.
pub struct PdfSource {
    path: PathBuf,
    document: Document,
    page_numbers: Vec<u32>,
}

impl PdfSource {
    /// PDF 열기
    ///
    /// 시그니처가 맞지 않으면 `InvalidSource`, 파싱 실패는 `ExtractionFailure`.
    pub fn open(path: &Path) -> Result<Self> {
        if !is_probably_pdf(path) {
            return Err(RagError::InvalidSource {
                path: path.to_path_buf(),
                reason: "invalid header".to_string(),
            });
        }

        let document = Document::load(path).map_err(|e| {
            RagError::ExtractionFailure(format!("{}: {}", path.display(), e))
        })?;

        // get_pages()는 1부터 시작하는 페이지 번호 순으로 정렬된 BTreeMap
        let page_numbers = document.get_pages().keys().copied().collect();

        Ok(Self {
            path: path.to_path_buf(),
            document,
            page_numbers,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn page_count(&self) -> usize {
        self.page_numbers.len()
    }

    pub(crate) fn document(&self) -> &Document {
        &self.document
    }

    /// 0-based 인덱스 -> PDF 페이지 번호
    pub(crate) fn page_number(&self, page_index: usize) -> Result<u32> {
        self.page_numbers.get(page_index).copied().ok_or_else(|| {
            RagError::ExtractionFailure(format!(
                "page index {} out of range ({} pages) in {}",
                page_index,
                self.page_numbers.len(),
                self.path.display()
            ))
        })
    }
}

/// 앞 4바이트가 `%PDF`인지 확인 (읽기 실패도 false)
pub fn is_probably_pdf(path: &Path) -> bool {
    let mut signature = [0u8; 4];
    std::fs::File::open(path)
        .and_then(|mut file| file.read_exact(&mut signature))
        .map(|_| &signature == PDF_SIGNATURE)
        .unwrap_or(false)
}

// ============================================================================
// Text Sources
// ============================================================================

/// 페이지 텍스트 소스
pub trait TextSource: Send + Sync {
    /// 로그용 이름
    fn name(&self) -> &'static str;

    /// `page_index`(0부터) 페이지의 원문 텍스트
    fn page_text(&self, source: &PdfSource, page_index: usize) -> Result<String>;
}

/// 정규화된 페이지 텍스트
#[derive(Debug, Clone, PartialEq)]
pub struct PageText {
    /// 페이지 번호 (1부터)
    pub number: u32,
    /// 정규화된 텍스트 (빈 문자열 가능)
    pub text: String,
}

/// 텍스트 소스 체인
///
/// 1차 소스 에러는 문서 전체 실패로 전파되고,
/// 폴백 소스 에러는 경고 후 빈 문자열로 강등됩니다.
pub struct PageReader {
    primary: Box<dyn TextSource>,
    fallbacks: Vec<Box<dyn TextSource>>,
    min_chars: usize,
}

impl PageReader {
    /// 1차 소스와 신뢰도 기준(최소 글자 수)으로 생성
    pub fn new(primary: Box<dyn TextSource>, min_chars: usize) -> Self {
        Self {
            primary,
            fallbacks: Vec::new(),
            min_chars,
        }
    }

    /// 폴백 소스 추가 (추가한 순서대로 평가)
    pub fn with_fallback(mut self, source: Box<dyn TextSource>) -> Self {
        self.fallbacks.push(source);
        self
    }

    /// 기본 체인: DirectExtract -> (활성화 시) OcrRender
    pub fn from_config(ocr: &OcrConfig) -> Self {
        let reader = Self::new(Box::new(DirectExtract), ocr.min_chars);
        if ocr.enabled {
            reader.with_fallback(Box::new(OcrRender::new(ocr.clone())))
        } else {
            reader
        }
    }

    /// 신뢰도 기준 통과 여부
    fn is_confident(&self, text: &str) -> bool {
        text.chars().count() >= self.min_chars
    }

    /// 문서 전체를 페이지 순서대로 읽기
    pub fn read_pages(&self, source: &PdfSource) -> Result<Vec<PageText>> {
        (0..source.page_count())
            .map(|index| {
                Ok(PageText {
                    number: source.page_number(index)?,
                    text: self.read_page(source, index)?,
                })
            })
            .collect()
    }

    fn read_page(&self, source: &PdfSource, page_index: usize) -> Result<String> {
        let mut best = normalize_text(&self.primary.page_text(source, page_index)?);

        for fallback in &self.fallbacks {
            if self.is_confident(&best) {
                break;
            }

            tracing::debug!(
                "Page {} of {:?} below {} chars, trying {}",
                page_index + 1,
                source.path(),
                self.min_chars,
                fallback.name()
            );

            let candidate = match fallback.page_text(source, page_index) {
                Ok(text) => normalize_text(&text),
                Err(e) => {
                    tracing::warn!(
                        "{} skipped ({:?} p{}): {}",
                        fallback.name(),
                        source.path().file_name().unwrap_or_default(),
                        page_index + 1,
                        e
                    );
                    String::new()
                }
            };

            if candidate.chars().count() > best.chars().count() {
                best = candidate;
            }
        }

        Ok(best)
    }
}

// ============================================================================
// Normalization
// ============================================================================

fn horizontal_whitespace() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"[^\S\n]+").expect("Invalid regex"))
}

fn blank_lines() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\n(?:[^\S\n]*\n)+").expect("Invalid regex"))
}

/// 텍스트 정규화
///
/// - 가로 공백 연속 -> 공백 하나
/// - 연속 줄바꿈(공백뿐인 줄 포함) -> 줄바꿈 하나
/// - 앞뒤 공백 제거
///
/// 멱등: `normalize_text(normalize_text(s)) == normalize_text(s)`
pub fn normalize_text(text: &str) -> String {
    let collapsed = horizontal_whitespace().replace_all(text, " ");
    let collapsed = blank_lines().replace_all(&collapsed, "\n");
    collapsed.trim().to_string()
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::collections::HashMap;
    use tempfile::TempDir;

    /// 페이지별 고정 텍스트를 돌려주는 테스트용 소스
    pub(crate) struct FixedSource {
        pub name: &'static str,
        pub pages: HashMap<usize, String>,
        pub fail: bool,
    }

    impl TextSource for FixedSource {
        fn name(&self) -> &'static str {
            self.name
        }

        fn page_text(&self, _source: &PdfSource, page_index: usize) -> Result<String> {
            if self.fail {
                return Err(RagError::ExtractionFailure("renderer missing".to_string()));
            }
            Ok(self.pages.get(&page_index).cloned().unwrap_or_default())
        }
    }

    fn fixed(name: &'static str, pages: &[(usize, &str)]) -> Box<dyn TextSource> {
        Box::new(FixedSource {
            name,
            pages: pages.iter().map(|(i, t)| (*i, t.to_string())).collect(),
            fail: false,
        })
    }

    #[test]
    fn test_normalize_collapses_whitespace() {
        let input = "  Ohm's \t law\u{a0} states\n\n\n V=IR.  \n \n\nEnde ";
        assert_eq!(normalize_text(input), "Ohm's law states\n V=IR. \nEnde");
    }

    #[test]
    fn test_normalize_is_idempotent() {
        let samples = [
            "a\n \n\nb",
            "x \n \n y\t\tz",
            "\r\nZeile 1\r\n\r\nZeile 2\r\n",
            "   ",
            "Kein  Umbruch",
        ];
        for sample in samples {
            let once = normalize_text(sample);
            assert_eq!(normalize_text(&once), once, "not idempotent for {:?}", sample);
        }
    }

    #[test]
    fn test_signature_check() {
        let dir = TempDir::new().unwrap();
        let good = dir.path().join("good.pdf");
        let bad = dir.path().join("bad.pdf");
        let short = dir.path().join("short.pdf");
        std::fs::write(&good, b"%PDF-1.4\n%fake").unwrap();
        std::fs::write(&bad, b"<html></html>").unwrap();
        std::fs::write(&short, b"%P").unwrap();

        assert!(is_probably_pdf(&good));
        assert!(!is_probably_pdf(&bad));
        assert!(!is_probably_pdf(&short));
        assert!(!is_probably_pdf(&dir.path().join("missing.pdf")));
    }

    #[test]
    fn test_open_rejects_invalid_header() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("fake.pdf");
        std::fs::write(&path, b"not a pdf").unwrap();

        let result = PdfSource::open(&path);
        assert!(matches!(result, Err(RagError::InvalidSource { .. })));
    }

    #[test]
    fn test_open_reports_parse_failure() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("broken.pdf");
        std::fs::write(&path, b"%PDF-1.4\n%broken").unwrap();

        let result = PdfSource::open(&path);
        assert!(matches!(result, Err(RagError::ExtractionFailure(_))));
    }

    #[test]
    fn test_reader_keeps_longer_fallback_text() {
        let dir = TempDir::new().unwrap();
        let page_two = "Genug eingebetteter Text auf Seite zwei.";
        let path = pdf::tests::write_pdf(dir.path(), "scan.pdf", &["", page_two]);
        let source = PdfSource::open(&path).unwrap();

        let reader = PageReader::new(fixed("direct", &[(0, "ab"), (1, page_two)]), 30)
            .with_fallback(fixed(
                "ocr",
                &[(0, "Gescannter   Text\n\n\nvon Seite eins"), (1, "x")],
            ));

        let pages = reader.read_pages(&source).unwrap();
        assert_eq!(pages.len(), 2);
        assert_eq!(pages[0].number, 1);
        assert_eq!(pages[0].text, "Gescannter Text\nvon Seite eins");
        // 기준을 넘었으므로 폴백을 쓰지 않음
        assert_eq!(pages[1].text, "Genug eingebetteter Text auf Seite zwei.");
    }

    #[test]
    fn test_reader_keeps_direct_text_when_fallback_shorter() {
        let dir = TempDir::new().unwrap();
        let path = pdf::tests::write_pdf(dir.path(), "short.pdf", &["kurz"]);
        let source = PdfSource::open(&path).unwrap();

        let reader = PageReader::new(fixed("direct", &[(0, "kurzer Text")]), 30)
            .with_fallback(fixed("ocr", &[(0, "kurz")]));

        let pages = reader.read_pages(&source).unwrap();
        assert_eq!(pages[0].text, "kurzer Text");
    }

    #[test]
    fn test_reader_degrades_fallback_failure() {
        let dir = TempDir::new().unwrap();
        let path = pdf::tests::write_pdf(dir.path(), "fail.pdf", &["x"]);
        let source = PdfSource::open(&path).unwrap();

        let reader = PageReader::new(fixed("direct", &[(0, "wenig")]), 30).with_fallback(Box::new(
            FixedSource {
                name: "ocr",
                pages: HashMap::new(),
                fail: true,
            },
        ));

        let pages = reader.read_pages(&source).unwrap();
        assert_eq!(pages[0].text, "wenig");
    }

    #[test]
    fn test_reader_propagates_primary_failure() {
        let dir = TempDir::new().unwrap();
        let path = pdf::tests::write_pdf(dir.path(), "primary.pdf", &["x"]);
        let source = PdfSource::open(&path).unwrap();

        let reader = PageReader::new(
            Box::new(FixedSource {
                name: "direct",
                pages: HashMap::new(),
                fail: true,
            }),
            30,
        );

        assert!(matches!(
            reader.read_pages(&source),
            Err(RagError::ExtractionFailure(_))
        ));
    }
}
