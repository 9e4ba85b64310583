//! 파일 수집 모듈
//!
//! 코퍼스 루트 아래의 PDF 파일을 재귀적으로 모두 찾습니다.
//! 기본값은 .gitignore 패턴을 적용하지 않고 숨김 폴더도 포함합니다.
//! 결과는 경로순으로 정렬됩니다.

use std::path::{Path, PathBuf};

use ignore::WalkBuilder;

use crate::error::{RagError, Result};

/// 확장자가 `.pdf`인지 (대소문자 무시)
pub fn has_pdf_extension(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.eq_ignore_ascii_case("pdf"))
        .unwrap_or(false)
}

// ============================================================================
// Collected File
// ============================================================================

/// 수집된 파일 정보
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CollectedFile {
    pub path: PathBuf,
    /// 파일 크기 (바이트)
    pub size: u64,
}

impl CollectedFile {
    /// PDF 확장자 파일이면 `Some`
    pub fn from_path(path: PathBuf) -> Result<Option<Self>> {
        if !has_pdf_extension(&path) {
            return Ok(None);
        }

        let metadata = std::fs::metadata(&path)?;
        if !metadata.is_file() {
            return Ok(None);
        }

        Ok(Some(Self {
            path,
            size: metadata.len(),
        }))
    }
}

// ============================================================================
// PDF Collector
// ============================================================================

/// 수집기 설정
#[derive(Debug, Clone)]
pub struct CollectorConfig {
    /// .gitignore 패턴 존중 여부
    pub respect_gitignore: bool,
    /// 숨김 파일 포함 여부
    pub include_hidden: bool,
    /// 최대 파일 크기 (바이트, 0이면 제한 없음)
    pub max_file_size: u64,
}

impl Default for CollectorConfig {
    fn default() -> Self {
        Self {
            respect_gitignore: false,
            include_hidden: true,
            max_file_size: 0,
        }
    }
}

/// PDF 수집기
pub struct PdfCollector {
    config: CollectorConfig,
}

impl PdfCollector {
    pub fn new(config: CollectorConfig) -> Self {
        Self { config }
    }

    pub fn with_defaults() -> Self {
        Self::new(CollectorConfig::default())
    }

    /// 루트(폴더 또는 단일 파일) 아래 PDF 수집, 경로순 정렬
    ///
    /// 루트가 없으면 `Io` 에러.
    pub fn collect(&self, root: &Path) -> Result<Vec<CollectedFile>> {
        let metadata = std::fs::metadata(root)?;

        if metadata.is_file() {
            return Ok(CollectedFile::from_path(root.to_path_buf())?
                .filter(|file| self.should_include(file))
                .into_iter()
                .collect());
        }

        let mut files = Vec::new();

        // ignore 크레이트로 .gitignore 지원 (켠 경우에만)
        let walker = WalkBuilder::new(root)
            .hidden(!self.config.include_hidden)
            .parents(self.config.respect_gitignore)
            .ignore(self.config.respect_gitignore)
            .git_ignore(self.config.respect_gitignore)
            .git_global(self.config.respect_gitignore)
            .git_exclude(self.config.respect_gitignore)
            .require_git(false)
            .build();

        for entry in walker {
            let entry = match entry {
                Ok(e) => e,
                Err(e) => {
                    tracing::warn!("Failed to read entry: {}", e);
                    continue;
                }
            };

            // 파일만 처리
            if !entry.file_type().map(|ft| ft.is_file()).unwrap_or(false) {
                continue;
            }

            match CollectedFile::from_path(entry.path().to_path_buf()) {
                Ok(Some(file)) if self.should_include(&file) => files.push(file),
                Ok(_) => {}
                Err(e) => {
                    tracing::warn!("Failed to collect {:?}: {}", entry.path(), e);
                }
            }
        }

        files.sort_by(|a, b| a.path.cmp(&b.path));

        tracing::info!("Collected {} PDFs from {:?}", files.len(), root);
        Ok(files)
    }

    /// 파일이 필터 조건을 만족하는지 확인
    fn should_include(&self, file: &CollectedFile) -> bool {
        if self.config.max_file_size > 0 && file.size > self.config.max_file_size {
            tracing::debug!("Skipping large file: {:?} ({} bytes)", file.path, file.size);
            return false;
        }
        true
    }
}

/// 기본 설정으로 PDF 경로 수집
pub fn collect_pdfs(root: &Path) -> Result<Vec<PathBuf>> {
    if root.as_os_str().is_empty() {
        return Err(RagError::InvalidConfig("corpus root is empty".to_string()));
    }

    Ok(PdfCollector::with_defaults()
        .collect(root)?
        .into_iter()
        .map(|file| file.path)
        .collect())
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_has_pdf_extension() {
        assert!(has_pdf_extension(Path::new("a/b.pdf")));
        assert!(has_pdf_extension(Path::new("B.PDF")));
        assert!(!has_pdf_extension(Path::new("notes.txt")));
        assert!(!has_pdf_extension(Path::new("pdf")));
    }

    #[test]
    fn test_collect_sorted_recursive() {
        let dir = TempDir::new().unwrap();
        let root = dir.path();
        fs::create_dir_all(root.join("Info2")).unwrap();
        fs::create_dir_all(root.join("Info1/sub")).unwrap();
        fs::write(root.join("Info2/b.pdf"), b"%PDF-1.5").unwrap();
        fs::write(root.join("Info1/sub/a.PDF"), b"%PDF-1.5").unwrap();
        fs::write(root.join("Info1/readme.txt"), b"hello").unwrap();

        let files = collect_pdfs(root).unwrap();
        assert_eq!(
            files,
            vec![root.join("Info1/sub/a.PDF"), root.join("Info2/b.pdf")]
        );
    }

    #[test]
    fn test_collect_single_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("one.pdf");
        fs::write(&path, b"%PDF-1.5").unwrap();

        assert_eq!(collect_pdfs(&path).unwrap(), vec![path]);
    }

    #[test]
    fn test_collect_respects_size_limit() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("big.pdf"), vec![b'x'; 64]).unwrap();
        fs::write(dir.path().join("small.pdf"), b"%PDF").unwrap();

        let collector = PdfCollector::new(CollectorConfig {
            max_file_size: 16,
            ..Default::default()
        });
        let files = collector.collect(dir.path()).unwrap();
        assert_eq!(files.len(), 1);
        assert!(files[0].path.ends_with("small.pdf"));
    }

    #[test]
    fn test_collect_missing_root() {
        let dir = TempDir::new().unwrap();
        let result = collect_pdfs(&dir.path().join("nope"));
        assert!(matches!(result, Err(RagError::Io(_))));
    }

    #[test]
    fn test_collect_ignores_gitignore_and_hidden_by_default() {
        let dir = TempDir::new().unwrap();
        let root = dir.path();
        fs::write(root.join(".gitignore"), "*.pdf\n").unwrap();
        fs::create_dir_all(root.join("Info1")).unwrap();
        fs::create_dir_all(root.join(".archive/Info2")).unwrap();
        fs::write(root.join("Info1/ohm.pdf"), b"%PDF-1.5").unwrap();
        fs::write(root.join(".archive/Info2/b.pdf"), b"%PDF-1.5").unwrap();

        let files = collect_pdfs(root).unwrap();
        assert_eq!(
            files,
            vec![root.join(".archive/Info2/b.pdf"), root.join("Info1/ohm.pdf")]
        );

        let strict = PdfCollector::new(CollectorConfig {
            respect_gitignore: true,
            include_hidden: false,
            ..Default::default()
        });
        assert!(strict.collect(root).unwrap().is_empty());
    }
}
