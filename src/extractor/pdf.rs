//! PDF 텍스트 추출 모듈
//!
//! lopdf로 페이지별 내장 텍스트를 추출합니다.
//! 스캔 문서처럼 내장 텍스트가 없는 페이지는 빈 문자열이 나오고,
//! 그 판단은 [`super::PageReader`]가 합니다.

use crate::error::{RagError, Result};

use super::{PdfSource, TextSource};

/// 내장 텍스트 추출 소스
#[derive(Debug, Default, Clone, Copy)]
pub struct DirectExtract;

impl TextSource for DirectExtract {
    fn name(&self) -> &'static str {
        "direct"
    }

    fn page_text(&self, source: &PdfSource, page_index: usize) -> Result<String> {
        let page_number = source.page_number(page_index)?;

        source
            .document()
            .extract_text(&[page_number])
            .map_err(|e| {
                RagError::ExtractionFailure(format!(
                    "{} p{}: {}",
                    source.path().display(),
                    page_number,
                    e
                ))
            })
    }
}

/// 문서 전체의 내장 텍스트 (OCR 없음, 페이지 사이 줄바꿈)
///
/// 토큰 수 추정처럼 페이지 구분이 필요 없는 곳에서 사용합니다.
pub fn document_text(source: &PdfSource) -> Result<String> {
    let mut text = String::new();
    for index in 0..source.page_count() {
        text.push_str(&DirectExtract.page_text(source, index)?);
        text.push('\n');
    }
    Ok(text)
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use lopdf::content::{Content, Operation};
    use lopdf::{dictionary, Document, Object, Stream};
    use std::path::{Path, PathBuf};
    use tempfile::TempDir;

    /// 페이지마다 한 줄씩 텍스트를 넣은 테스트용 PDF 생성
    ///
    /// 빈 문자열 페이지는 텍스트 없는 페이지(스캔본 흉내)가 됩니다.
    pub(crate) fn write_pdf(dir: &Path, name: &str, pages: &[&str]) -> PathBuf {
        let mut doc = Document::with_version("1.5");
        let pages_id = doc.new_object_id();
        let font_id = doc.add_object(dictionary! {
            "Type" => "Font",
            "Subtype" => "Type1",
            "BaseFont" => "Courier",
        });
        let resources_id = doc.add_object(dictionary! {
            "Font" => dictionary! {
                "F1" => font_id,
            },
        });

        let mut kids: Vec<Object> = Vec::new();
        for text in pages {
            let operations = if text.is_empty() {
                Vec::new()
            } else {
                vec![
                    Operation::new("BT", vec![]),
                    Operation::new("Tf", vec!["F1".into(), 12.into()]),
                    Operation::new("Td", vec![72.into(), 720.into()]),
                    Operation::new("Tj", vec![Object::string_literal(*text)]),
                    Operation::new("ET", vec![]),
                ]
            };
            let content = Content { operations };
            let content_id = doc.add_object(Stream::new(
                dictionary! {},
                content.encode().expect("content should encode"),
            ));
            let page_id = doc.add_object(dictionary! {
                "Type" => "Page",
                "Parent" => pages_id,
                "Contents" => content_id,
                "Resources" => resources_id,
                "MediaBox" => vec![0.into(), 0.into(), 595.into(), 842.into()],
            });
            kids.push(page_id.into());
        }

        let count = kids.len() as i64;
        doc.objects.insert(
            pages_id,
            Object::Dictionary(dictionary! {
                "Type" => "Pages",
                "Kids" => kids,
                "Count" => count,
            }),
        );
        let catalog_id = doc.add_object(dictionary! {
            "Type" => "Catalog",
            "Pages" => pages_id,
        });
        doc.trailer.set("Root", catalog_id);

        let path = dir.join(name);
        doc.save(&path).expect("test pdf should save");
        path
    }

    #[test]
    fn test_direct_extract_per_page() {
        let dir = TempDir::new().unwrap();
        let path = write_pdf(dir.path(), "two.pdf", &["Erste Seite", "Zweite Seite"]);
        let source = PdfSource::open(&path).unwrap();

        assert_eq!(source.page_count(), 2);
        let first = DirectExtract.page_text(&source, 0).unwrap();
        let second = DirectExtract.page_text(&source, 1).unwrap();
        assert!(first.contains("Erste Seite"));
        assert!(second.contains("Zweite Seite"));
        assert!(!first.contains("Zweite"));
    }

    #[test]
    fn test_direct_extract_empty_page() {
        let dir = TempDir::new().unwrap();
        let path = write_pdf(dir.path(), "scan.pdf", &[""]);
        let source = PdfSource::open(&path).unwrap();

        let text = DirectExtract.page_text(&source, 0).unwrap();
        assert!(text.trim().is_empty());
    }

    #[test]
    fn test_direct_extract_out_of_range() {
        let dir = TempDir::new().unwrap();
        let path = write_pdf(dir.path(), "one.pdf", &["Seite"]);
        let source = PdfSource::open(&path).unwrap();

        assert!(DirectExtract.page_text(&source, 5).is_err());
    }

    #[test]
    fn test_document_text_joins_pages() {
        let dir = TempDir::new().unwrap();
        let path = write_pdf(dir.path(), "doc.pdf", &["Alpha", "Beta"]);
        let source = PdfSource::open(&path).unwrap();

        let text = document_text(&source).unwrap();
        let alpha = text.find("Alpha").unwrap();
        let beta = text.find("Beta").unwrap();
        assert!(alpha < beta);
    }
}
