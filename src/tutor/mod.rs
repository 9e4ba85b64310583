//! 튜터 모듈 - 검색 결과로 독일어 프롬프트와 출처 표기 생성
//!
//! 생성 모델은 호출하지 않습니다. 오프라인 모드에서는
//! 결정적인 데모 답변/퀴즈를 만들어 파이프라인 전체를 점검할 수 있습니다.

use crate::error::Result;
use crate::knowledge::{Hit, HitMeta, HybridRetriever};

/// 검색 결과가 없을 때 컨텍스트 자리 표시
pub const EMPTY_CONTEXT: &str = "(kein Kontext gefunden)";

/// 퀴즈 검색 상한
pub const MAX_QUIZ_CONTEXTS: usize = 20;

/// 데모 출력에 붙는 출처 수
const DEMO_CITATIONS: usize = 2;

// ============================================================================
// Citations
// ============================================================================

fn source_name(meta: &HitMeta) -> &str {
    if meta.source.is_empty() {
        "Unknown"
    } else {
        &meta.source
    }
}

/// 페이지 표기 (`3` 또는 `3-5`), 페이지 정보가 없으면 `None`
pub fn page_label(meta: &HitMeta) -> Option<String> {
    match (meta.page_start, meta.page_end) {
        (Some(start), Some(end)) if start != end => Some(format!("{}-{}", start, end)),
        (Some(page), _) | (None, Some(page)) => Some(page.to_string()),
        (None, None) => None,
    }
}

/// `[Quelle: datei.pdf, S. 3-5]` / 페이지 없으면 `[Quelle: datei.pdf]`
pub fn format_citation(meta: &HitMeta) -> String {
    match page_label(meta) {
        Some(pages) => format!("[Quelle: {}, S. {}]", source_name(meta), pages),
        None => format!("[Quelle: {}]", source_name(meta)),
    }
}

/// 번호 붙은 컨텍스트 블록, 결과가 없으면 자리 표시 문자열
pub fn context_block(hits: &[Hit]) -> String {
    if hits.is_empty() {
        return EMPTY_CONTEXT.to_string();
    }

    hits.iter()
        .enumerate()
        .map(|(i, hit)| {
            let source = source_name(&hit.meta);
            let header = match page_label(&hit.meta) {
                Some(pages) => format!("[{}] Quelle: {}, S. {}", i + 1, source, pages),
                None => format!("[{}] Quelle: {}", i + 1, source),
            };
            format!("{}\n{}\n", header, hit.document)
        })
        .collect::<Vec<_>>()
        .join("\n---\n")
}

fn demo_citations(hits: &[Hit]) -> String {
    if hits.is_empty() {
        return String::new();
    }

    let citations: Vec<String> = hits
        .iter()
        .take(DEMO_CITATIONS)
        .map(|hit| format_citation(&hit.meta))
        .collect();
    format!("\n\n{}", citations.join(" "))
}

// ============================================================================
// Prompts
// ============================================================================

/// 질문 답변 프롬프트
pub fn build_answer_prompt(question: &str, hits: &[Hit]) -> String {
    format!(
        "Du bist ein Tutor für HSD EI. Antworte **ausschließlich auf Deutsch**.\n\
         Benutze NUR den gegebenen Kontext; erfinde keine Informationen.\n\
         Gib am Ende Quellen in der Form [Quelle: Datei.pdf, S. x–y] an. \
         Wenn unsicher oder Kontext fehlt, erkläre, was fehlt.\n\n\
         FRAGE:\n{}\n\n\
         KONTEXT:\n{}\n\n\
         ANTWORT:",
        question,
        context_block(hits)
    )
}

/// 퀴즈 생성 프롬프트
pub fn build_quiz_prompt(topic: &str, hits: &[Hit], questions: usize) -> String {
    format!(
        "Du bist ein Tutor für HSD EI. Erstelle prüfungsnahe Fragen **auf Deutsch**.\n\
         Thema: {}\n\
         Erzeuge genau {} Fragen. Für jede Frage liefere **kurze Lösung**.\n\
         Nutze NUR den Kontext. Am Ende liste die Quellen im Format [Quelle: Datei.pdf, S. x–y].\n\
         Format:\n\
         1) Frage...\n   Lösung: ...\n\
         2) Frage...\n   Lösung: ...\n\
         ...\n\
         \nKONTEXT:\n\
         {}\n\nANTWORT:",
        topic,
        questions,
        context_block(hits)
    )
}

/// 오프라인 데모 답변
pub fn demo_answer(question: &str, hits: &[Hit]) -> String {
    format!("(Demo-Antwort) {}{}", question, demo_citations(hits))
}

/// 오프라인 데모 퀴즈
pub fn demo_quiz(topic: &str, questions: usize, hits: &[Hit]) -> String {
    let body = (1..=questions)
        .map(|i| format!("{}) Frage zu {}\n   Lösung: (Demo)", i, topic))
        .collect::<Vec<_>>()
        .join("\n");
    format!("{}{}", body, demo_citations(hits))
}

// ============================================================================
// Tutor
// ============================================================================

/// 튜터 출력
#[derive(Debug, Clone)]
pub struct TutorReply {
    /// 데모 답변 또는 외부 모델에 넘길 프롬프트
    pub text: String,
    /// 오프라인 데모 출력인지
    pub is_demo: bool,
    pub hits: Vec<Hit>,
}

/// 검색 + 프롬프트 조립
pub struct Tutor {
    retriever: HybridRetriever,
    offline: bool,
}

impl Tutor {
    pub fn new(retriever: HybridRetriever, offline: bool) -> Self {
        Self { retriever, offline }
    }

    /// 질문 답변 (기본 k = 6)
    pub async fn answer(
        &self,
        question: &str,
        course: Option<&str>,
        k: usize,
    ) -> Result<TutorReply> {
        let hits = self.retriever.query(question, k, course).await?;

        let text = if self.offline {
            demo_answer(question, &hits)
        } else {
            build_answer_prompt(question, &hits)
        };

        Ok(TutorReply {
            text,
            is_demo: self.offline,
            hits,
        })
    }

    /// 퀴즈 (검색은 최대 20개)
    pub async fn quiz(
        &self,
        topic: &str,
        course: Option<&str>,
        questions: usize,
        k: usize,
    ) -> Result<TutorReply> {
        let hits = self
            .retriever
            .query(topic, k.min(MAX_QUIZ_CONTEXTS), course)
            .await?;

        let text = if self.offline {
            demo_quiz(topic, questions, &hits)
        } else {
            build_quiz_prompt(topic, &hits, questions)
        };

        Ok(TutorReply {
            text,
            is_demo: self.offline,
            hits,
        })
    }
}

// ============================================================================
// Tests
// ============================================================================
