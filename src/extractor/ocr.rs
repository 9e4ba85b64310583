//! OCR 폴백 모듈
//!
//! 페이지 하나를 `pdftoppm`으로 PNG 렌더링한 뒤 `tesseract`로 글자를 읽습니다.
//! 두 도구 모두 외부 프로세스이며, 없거나 실패하면 `ExtractionFailure`를
//! 돌려줍니다 (체인에서 빈 문자열로 강등됨).

use std::path::{Path, PathBuf};
use std::process::Command;

use tempfile::TempDir;

use crate::error::{RagError, Result};

use super::{PdfSource, TextSource};

/// pdftoppm 기준 해상도 (scale 1.0 = 72 DPI)
const BASE_DPI: f32 = 72.0;

// ============================================================================
// Configuration
// ============================================================================

/// OCR 설정
#[derive(Debug, Clone)]
pub struct OcrConfig {
    /// OCR 폴백 사용 여부
    pub enabled: bool,
    /// tesseract 언어 (예: `deu+eng`)
    pub languages: String,
    /// 이 글자 수 미만이면 OCR 시도
    pub min_chars: usize,
    /// 렌더링 배율
    pub render_scale: f32,
    /// pdftoppm 실행 파일
    pub pdftoppm_bin: String,
    /// tesseract 실행 파일
    pub tesseract_bin: String,
}

impl Default for OcrConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            languages: "deu+eng".to_string(),
            min_chars: 30,
            render_scale: 2.0,
            pdftoppm_bin: "pdftoppm".to_string(),
            tesseract_bin: "tesseract".to_string(),
        }
    }
}

impl OcrConfig {
    /// OCR 비활성화 (내장 텍스트만 사용)
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            ..Default::default()
        }
    }

    pub fn validate(&self) -> Result<()> {
        if !(self.render_scale.is_finite() && self.render_scale > 0.0) {
            return Err(RagError::InvalidConfig(format!(
                "OCR render scale must be positive, got {}",
                self.render_scale
            )));
        }
        if self.enabled && self.languages.trim().is_empty() {
            return Err(RagError::InvalidConfig(
                "OCR languages must not be empty".to_string(),
            ));
        }
        Ok(())
    }

    /// 렌더링 DPI
    pub fn dpi(&self) -> u32 {
        (BASE_DPI * self.render_scale).round().max(1.0) as u32
    }
}

// ============================================================================
// OcrRender
// ============================================================================

/// 렌더링 + OCR 텍스트 소스
#[derive(Debug, Clone)]
pub struct OcrRender {
    config: OcrConfig,
}

impl OcrRender {
    pub fn new(config: OcrConfig) -> Self {
        Self { config }
    }

    /// 페이지 하나를 PNG로 렌더링
    ///
    /// `page_number`는 1부터 (pdftoppm 규칙)
    fn render_page(&self, pdf: &Path, page_number: u32, work_dir: &Path) -> Result<PathBuf> {
        let root = work_dir.join("page");
        let page = page_number.to_string();

        let output = Command::new(&self.config.pdftoppm_bin)
            .arg("-f")
            .arg(&page)
            .arg("-l")
            .arg(&page)
            .arg("-r")
            .arg(self.config.dpi().to_string())
            .args(["-png", "-singlefile"])
            .arg(pdf)
            .arg(&root)
            .output()
            .map_err(|e| {
                RagError::ExtractionFailure(format!(
                    "{} not runnable: {}",
                    self.config.pdftoppm_bin, e
                ))
            })?;

        if !output.status.success() {
            return Err(RagError::ExtractionFailure(format!(
                "pdftoppm exited with {}: {}",
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }

        Ok(root.with_extension("png"))
    }

    /// 이미지에서 텍스트 인식
    fn recognize(&self, image: &Path) -> Result<String> {
        let output = Command::new(&self.config.tesseract_bin)
            .arg(image)
            .arg("stdout")
            .arg("-l")
            .arg(&self.config.languages)
            .output()
            .map_err(|e| {
                RagError::ExtractionFailure(format!(
                    "{} not runnable: {}",
                    self.config.tesseract_bin, e
                ))
            })?;

        if !output.status.success() {
            return Err(RagError::ExtractionFailure(format!(
                "tesseract exited with {}: {}",
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }

        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

impl TextSource for OcrRender {
    fn name(&self) -> &'static str {
        "ocr"
    }

    fn page_text(&self, source: &PdfSource, page_index: usize) -> Result<String> {
        let page_number = source.page_number(page_index)?;
        let work_dir = scratch_dir()?;

        // work_dir는 drop 시 삭제
        self.render_page(source.path(), page_number, work_dir.path())
            .and_then(|image| self.recognize(&image))
    }
}

/// 렌더링용 임시 디렉토리
fn scratch_dir() -> Result<TempDir> {
    Ok(tempfile::Builder::new()
        .prefix("course-rag-ocr-")
        .tempdir()?)
}

// ============================================================================
// Tests
// ============================================================================
