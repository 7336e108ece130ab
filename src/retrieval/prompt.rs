//! 리랭크/답변 프롬프트와 리랭크 응답 검증

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use super::RerankFallback;
use crate::knowledge::Candidate;
use crate::notes::Document;

#[derive(Serialize)]
struct CandidateView<'a> {
    id: &'a str,
    source: &'a str,
    title: Option<&'a str>,
    section: String,
    tags: &'a [String],
    text: String,
}

/// 리랭크 프롬프트
///
/// 후보는 잘린 텍스트와 메타데이터만 JSON 배열로 제시합니다.
pub fn rerank_prompt(question: &str, candidates: &[Candidate], snippet_chars: usize) -> String {
    let views: Vec<CandidateView<'_>> = candidates
        .iter()
        .map(|c| CandidateView {
            id: &c.chunk_id,
            source: &c.metadata.source_path,
            title: c.metadata.title.as_deref(),
            section: c.metadata.section_path.join(" > "),
            tags: &c.metadata.tags,
            text: truncate_chars(&c.text, snippet_chars),
        })
        .collect();

    // 직렬화 실패는 문자열 필드만 있어 발생하지 않음
    let list = serde_json::to_string_pretty(&views).unwrap_or_else(|_| "[]".to_string());

    format!(
        "You are selecting the single note excerpt that best answers a question.\n\
         \n\
         Question: {question}\n\
         \n\
         <CANDIDATES>\n{list}\n</CANDIDATES>\n\
         \n\
         Reply with JSON only, in the form {{\"id\": \"<candidate id>\"}}.\n\
         The id must be copied exactly from the list above.\n\
         If none of the candidates is relevant, reply {{\"id\": null}}."
    )
}

/// 답변 프롬프트 (문서 전체를 근거로 제공)
pub fn answer_prompt(question: &str, document: &Document) -> String {
    format!(
        "Answer the question using only the note below.\n\
         If the note does not contain the answer, say that it does not.\n\
         \n\
         <NOTE path=\"{path}\">\n{text}\n</NOTE>\n\
         \n\
         Question: {question}\n\
         Answer:",
        path = document.path,
        text = document.full_text(),
    )
}

#[derive(Deserialize)]
struct RerankResponse {
    id: Option<serde_json::Value>,
}

/// 리랭크 응답 검증
///
/// 제시된 후보 ID 중 하나면 그 ID를, 아니면 폴백 사유를 반환합니다.
/// `{"id": "..."}` JSON (코드 펜스/앞뒤 잡담 허용) 또는 ID 단독 응답을 받습니다.
pub fn parse_rerank_response(raw: &str, candidate_ids: &[&str]) -> Result<String, RerankFallback> {
    let allowed: HashSet<&str> = candidate_ids.iter().copied().collect();
    let text = strip_code_fence(raw.trim());

    if let (Some(start), Some(end)) = (text.find('{'), text.rfind('}')) {
        if start < end {
            let Ok(response) = serde_json::from_str::<RerankResponse>(&text[start..=end]) else {
                return Err(RerankFallback::Unparseable);
            };
            return match response.id {
                None | Some(serde_json::Value::Null) => Err(RerankFallback::Declined),
                Some(serde_json::Value::String(id)) => check_id(id.trim(), &allowed),
                Some(_) => Err(RerankFallback::Unparseable),
            };
        }
    }

    let bare = text.trim().trim_matches(|c: char| c == '"' || c == '\'' || c == '`');
    if bare.is_empty() {
        return Err(RerankFallback::Unparseable);
    }
    if allowed.contains(bare) {
        return Ok(bare.to_string());
    }
    if bare.eq_ignore_ascii_case("none") || bare.eq_ignore_ascii_case("[none]") {
        return Err(RerankFallback::Declined);
    }
    if bare.contains(char::is_whitespace) {
        Err(RerankFallback::Unparseable)
    } else {
        Err(RerankFallback::UnknownId)
    }
}

fn check_id(id: &str, allowed: &HashSet<&str>) -> Result<String, RerankFallback> {
    if id.eq_ignore_ascii_case("none") {
        Err(RerankFallback::Declined)
    } else if allowed.contains(id) {
        Ok(id.to_string())
    } else {
        Err(RerankFallback::UnknownId)
    }
}

/// ```json ... ``` 감싸기 제거
fn strip_code_fence(text: &str) -> &str {
    let Some(rest) = text.strip_prefix("```") else {
        return text;
    };
    let rest = match rest.find('\n') {
        Some(i) => &rest[i + 1..],
        None => rest,
    };
    rest.trim_end().strip_suffix("```").unwrap_or(rest).trim()
}

/// 문자 수 기준 자르기 (잘리면 `...` 추가)
pub fn truncate_chars(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => format!("{}...", &text[..idx]),
        None => text.to_string(),
    }
}
