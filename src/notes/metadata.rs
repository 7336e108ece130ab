//! 메타데이터 추출
//!
//! 노트 원문에서 제목(첫 줄의 `# ` 헤더)과 태그(마지막 줄의 `:a:b:` 형식)를
//! 분리합니다. 둘 다 선택 사항이며 서로 독립적입니다.

use std::collections::BTreeSet;

use once_cell::sync::Lazy;
use regex::Regex;

/// `:tag1:tag2:` - 구분자로 시작/끝나고 토큰에 공백이 없는 줄
static TAG_LINE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^:(?:[^\s:]+:)+$").expect("static tag pattern"));

/// 추출 결과
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtractedMetadata {
    pub title: Option<String>,
    pub tags: BTreeSet<String>,
    /// 제목/태그 줄이 제거된 본문
    pub body: String,
}

/// 원문에서 제목, 태그, 본문 분리
///
/// 제목도 태그도 없으면 본문은 원문 그대로입니다.
pub fn extract(raw: &str) -> ExtractedMetadata {
    let mut lines: Vec<&str> = raw.lines().collect();
    let mut changed = false;

    let title = match lines.iter().position(|l| !l.trim().is_empty()) {
        Some(idx) => match heading_title(lines[idx]) {
            Some(title) => {
                lines.remove(idx);
                changed = true;
                Some(title)
            }
            None => None,
        },
        None => None,
    };

    let mut tags = BTreeSet::new();
    if let Some(idx) = lines.iter().rposition(|l| !l.trim().is_empty()) {
        let candidate = lines[idx].trim();
        if TAG_LINE.is_match(candidate) {
            tags = candidate
                .split(':')
                .filter(|t| !t.is_empty())
                .map(str::to_string)
                .collect();
            lines.remove(idx);
            changed = true;
        }
    }

    let body = if changed {
        trim_blank_lines(&lines)
    } else {
        raw.to_string()
    };

    ExtractedMetadata { title, tags, body }
}

/// `# Title` 형식의 1단계 헤더면 제목 반환
fn heading_title(line: &str) -> Option<String> {
    let rest = line.trim().strip_prefix('#')?;
    if !rest.starts_with([' ', '\t']) {
        // `##` 이상이거나 `#tag` 형식
        return None;
    }
    let title = rest.trim().trim_end_matches('#').trim();
    if title.is_empty() {
        None
    } else {
        Some(title.to_string())
    }
}

/// 앞뒤 빈 줄 제거 후 다시 합치기
fn trim_blank_lines(lines: &[&str]) -> String {
    let start = lines.iter().position(|l| !l.trim().is_empty());
    let end = lines.iter().rposition(|l| !l.trim().is_empty());
    match (start, end) {
        (Some(s), Some(e)) => lines[s..=e].join("\n"),
        _ => String::new(),
    }
}
