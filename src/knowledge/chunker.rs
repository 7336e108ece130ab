//! Text Chunking Module
//!
//! Markdown 구조 인식 텍스트 분할을 제공합니다.
//!
//! 1. `##` 헤더 경계로 섹션 분할 (헤더는 `section_path`로 이동)
//! 2. 펜스 코드 블록은 원자 단위 - 너무 크면 내용을 나누고 각 조각을 같은 펜스로 다시 감쌈
//! 3. 리스트는 항목 경계에서만 분할
//! 4. 나머지 문단은 고정 크기 슬라이딩 윈도우 (공백 경계로 스냅)

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::notes::Document;

static LIST_MARKER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\s*(?:[-*+]|\d{1,9}[.)])(?:\s|$)").expect("static list pattern"));

// ============================================================================
// Chunk Configuration
// ============================================================================

/// 청킹 설정 (모두 문자 수 기준)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkConfig {
    /// 최대 청크 크기 - 이보다 큰 섹션/블록만 분할
    pub max_characters: usize,
    /// 일반 문단 슬라이딩 윈도우 크기
    pub window_characters: usize,
    /// 연속 윈도우 간 오버랩
    pub overlap_characters: usize,
}

impl Default for ChunkConfig {
    fn default() -> Self {
        Self {
            max_characters: 1500,
            window_characters: 500,
            overlap_characters: 50,
        }
    }
}

impl ChunkConfig {
    /// 진행이 보장되도록 값 보정 (overlap < window, 모두 1 이상)
    pub fn normalized(mut self) -> Self {
        self.max_characters = self.max_characters.max(1);
        self.window_characters = self.window_characters.max(1);
        if self.overlap_characters >= self.window_characters {
            self.overlap_characters = self.window_characters - 1;
        }
        self
    }
}

// ============================================================================
// Chunk Types
// ============================================================================

/// 청크 종류
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChunkKind {
    HeadingSection,
    CodeBlock,
    List,
    Paragraph,
}

impl ChunkKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChunkKind::HeadingSection => "heading_section",
            ChunkKind::CodeBlock => "code_block",
            ChunkKind::List => "list",
            ChunkKind::Paragraph => "paragraph",
        }
    }
}

impl fmt::Display for ChunkKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ChunkKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "heading_section" => Ok(ChunkKind::HeadingSection),
            "code_block" => Ok(ChunkKind::CodeBlock),
            "list" => Ok(ChunkKind::List),
            "paragraph" => Ok(ChunkKind::Paragraph),
            other => Err(format!("unknown chunk kind: {}", other)),
        }
    }
}

/// 문서와 무관한 분할 결과
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkPiece {
    pub text: String,
    pub kind: ChunkKind,
    pub section_path: Vec<String>,
    /// 앞 윈도우와 겹치는 선두 바이트 수 (문단 윈도우에서만 0 이상)
    pub overlap: usize,
}

/// 인덱싱 단위 청크
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    /// (경로, 위치)로 결정되는 안정적 ID
    pub id: String,
    pub position: usize,
    pub text: String,
    pub kind: ChunkKind,
    /// 원본 문서 경로 (소유가 아닌 참조)
    pub source_path: String,
    pub title: Option<String>,
    pub section_path: Vec<String>,
    pub tags: BTreeSet<String>,
    pub overlap: usize,
}

impl Chunk {
    /// 임베딩 입력 텍스트
    ///
    /// 제목 > 섹션 경로, 청크 본문, 태그를 함께 넣어 짧은 청크도
    /// 문서 맥락을 갖도록 합니다. 저장되는 `text`는 그대로입니다.
    pub fn embedding_text(&self) -> String {
        let header: Vec<&str> = self
            .title
            .iter()
            .map(String::as_str)
            .chain(self.section_path.iter().map(String::as_str))
            .collect();

        let mut text = String::new();
        if !header.is_empty() {
            text.push_str(&header.join(" > "));
            text.push_str("\n\n");
        }
        text.push_str(&self.text);
        if !self.tags.is_empty() {
            text.push_str("\n\nTags: ");
            text.push_str(&self.tags.iter().cloned().collect::<Vec<_>>().join(", "));
        }
        text
    }
}

/// 청크 ID: `sha256(path)` 앞 16자리 + 위치
pub fn chunk_id(path: &str, position: usize) -> String {
    let digest = Sha256::digest(path.as_bytes());
    let prefix: String = digest.iter().take(8).map(|b| format!("{:02x}", b)).collect();
    format!("{}-{}", prefix, position)
}

// ============================================================================
// Chunker Trait
// ============================================================================

/// 텍스트 청킹 전략 트레이트
pub trait Chunker: Send + Sync {
    /// 본문을 문서 순서대로 분할
    fn split(&self, body: &str) -> Vec<ChunkPiece>;

    /// 청커 이름
    fn name(&self) -> &'static str;

    /// 문서를 ID/메타데이터가 붙은 청크로 변환
    fn chunk_document(&self, doc: &Document) -> Vec<Chunk> {
        self.split(&doc.body)
            .into_iter()
            .enumerate()
            .map(|(position, piece)| Chunk {
                id: chunk_id(&doc.path, position),
                position,
                text: piece.text,
                kind: piece.kind,
                source_path: doc.path.clone(),
                title: doc.title.clone(),
                section_path: piece.section_path,
                tags: doc.tags.clone(),
                overlap: piece.overlap,
            })
            .collect()
    }
}

// ============================================================================
// Markdown Structure
// ============================================================================

/// 펜스 코드 블록 여는 줄 정보
#[derive(Debug, Clone, PartialEq, Eq)]
struct Fence {
    ch: char,
    len: usize,
    /// 들여쓰기를 제거한 여는 줄 (언어 태그 포함)
    open_line: String,
}

impl Fence {
    fn open(line: &str) -> Option<Self> {
        let trimmed = line.trim_start();
        if line.len() - trimmed.len() > 3 {
            return None;
        }
        let ch = trimmed.chars().next().filter(|c| *c == '`' || *c == '~')?;
        let len = trimmed.chars().take_while(|c| *c == ch).count();
        if len < 3 {
            return None;
        }
        let info = &trimmed[len..];
        if ch == '`' && info.contains('`') {
            return None;
        }
        Some(Self {
            ch,
            len,
            open_line: trimmed.trim_end().to_string(),
        })
    }

    fn closes(&self, line: &str) -> bool {
        let trimmed = line.trim();
        let run = trimmed.chars().take_while(|c| *c == self.ch).count();
        run >= self.len && trimmed.chars().all(|c| c == self.ch)
    }

    fn close_line(&self) -> String {
        std::iter::repeat(self.ch).take(self.len).collect()
    }

    fn wrap(&self, content: &[&str]) -> String {
        let mut text = self.open_line.clone();
        text.push('\n');
        if !content.is_empty() {
            text.push_str(&content.join("\n"));
            text.push('\n');
        }
        text.push_str(&self.close_line());
        text
    }
}

/// `## Title` 형식이면 제목 반환 (`###` 이상은 아님)
fn section_heading(line: &str) -> Option<String> {
    let trimmed = line.trim_start();
    if line.len() - trimmed.len() > 3 {
        return None;
    }
    let rest = trimmed.strip_prefix("##")?;
    if !rest.starts_with([' ', '\t']) {
        return None;
    }
    let title = rest.trim().trim_end_matches('#').trim();
    if title.is_empty() {
        None
    } else {
        Some(title.to_string())
    }
}

struct Section<'a> {
    heading: Option<String>,
    heading_line: Option<&'a str>,
    lines: Vec<&'a str>,
}

/// 코드 펜스 밖의 `##` 헤더 경계로 섹션 분할
fn split_sections(body: &str) -> Vec<Section<'_>> {
    let mut sections = Vec::new();
    let mut current = Section {
        heading: None,
        heading_line: None,
        lines: Vec::new(),
    };
    let mut open: Option<Fence> = None;

    for line in body.lines() {
        if open.is_some() {
            if open.as_ref().map_or(false, |f| f.closes(line)) {
                open = None;
            }
        } else if let Some(fence) = Fence::open(line) {
            open = Some(fence);
        } else if let Some(heading) = section_heading(line) {
            let next = Section {
                heading: Some(heading),
                heading_line: Some(line),
                lines: Vec::new(),
            };
            sections.push(std::mem::replace(&mut current, next));
            continue;
        }
        current.lines.push(line);
    }

    sections.push(current);
    sections
}

/// 섹션 내부 블록
enum Block<'a> {
    Code {
        fence: Fence,
        content: Vec<&'a str>,
        closed: bool,
    },
    List(Vec<String>),
    Prose(String),
}

impl Block<'_> {
    fn kind(&self) -> ChunkKind {
        match self {
            Block::Code { .. } => ChunkKind::CodeBlock,
            Block::List(_) => ChunkKind::List,
            Block::Prose(_) => ChunkKind::Paragraph,
        }
    }
}

fn split_blocks<'a>(lines: &[&'a str]) -> Vec<Block<'a>> {
    let mut blocks = Vec::new();
    let mut text_run: Vec<&str> = Vec::new();
    let mut i = 0;

    while i < lines.len() {
        if let Some(fence) = Fence::open(lines[i]) {
            split_text_run(&text_run, &mut blocks);
            text_run.clear();

            // 닫히지 않은 펜스는 섹션 끝까지 코드로 취급
            let mut content = Vec::new();
            let mut closed = false;
            i += 1;
            while i < lines.len() {
                if fence.closes(lines[i]) {
                    closed = true;
                    i += 1;
                    break;
                }
                content.push(lines[i]);
                i += 1;
            }
            blocks.push(Block::Code {
                fence,
                content,
                closed,
            });
            continue;
        }
        text_run.push(lines[i]);
        i += 1;
    }

    split_text_run(&text_run, &mut blocks);
    blocks
}

/// 코드 밖 텍스트를 리스트 런과 문단으로 분리
fn split_text_run(lines: &[&str], blocks: &mut Vec<Block<'_>>) {
    let mut prose: Vec<&str> = Vec::new();
    let mut i = 0;

    while i < lines.len() {
        if LIST_MARKER.is_match(lines[i]) {
            push_prose(&prose, blocks);
            prose.clear();
            let (items, next) = collect_list(lines, i);
            blocks.push(Block::List(items));
            i = next;
            continue;
        }
        prose.push(lines[i]);
        i += 1;
    }

    push_prose(&prose, blocks);
}

fn push_prose(lines: &[&str], blocks: &mut Vec<Block<'_>>) {
    let text = join_trimmed(lines);
    if !text.is_empty() {
        blocks.push(Block::Prose(text));
    }
}

fn indent(line: &str) -> usize {
    line.len() - line.trim_start().len()
}

/// `start`에서 시작하는 연속 리스트 항목 수집
///
/// 항목에는 중첩 항목, 들여쓴 줄, 바로 이어지는 줄이 포함됩니다.
/// 반환값은 (항목 텍스트 목록, 리스트 다음 줄 인덱스)입니다.
fn collect_list(lines: &[&str], start: usize) -> (Vec<String>, usize) {
    let base = indent(lines[start]);
    let is_item = |line: &str| LIST_MARKER.is_match(line) && indent(line) <= base;

    let mut items: Vec<Vec<&str>> = Vec::new();
    let mut i = start;

    while i < lines.len() {
        let line = lines[i];

        if line.trim().is_empty() {
            let mut j = i;
            while j < lines.len() && lines[j].trim().is_empty() {
                j += 1;
            }
            let continues = j < lines.len() && (is_item(lines[j]) || indent(lines[j]) > base);
            if !continues {
                break;
            }
            if let Some(item) = items.last_mut() {
                item.extend_from_slice(&lines[i..j]);
            }
            i = j;
            continue;
        }

        if is_item(line) {
            items.push(vec![line]);
        } else if indent(line) > base || !lines[i - 1].trim().is_empty() {
            match items.last_mut() {
                Some(item) => item.push(line),
                None => break,
            }
        } else {
            break;
        }
        i += 1;
    }

    let items = items
        .iter()
        .map(|item| item.join("\n").trim_end().to_string())
        .collect();
    (items, i)
}

/// 앞뒤 빈 줄을 제거하고 합친 뒤 양끝 공백 제거
fn join_trimmed(lines: &[&str]) -> String {
    lines.join("\n").trim().to_string()
}

fn char_len(s: &str) -> usize {
    s.chars().count()
}

// ============================================================================
// MarkdownChunker
// ============================================================================

/// Markdown 인식 청커
///
/// 크기 제한은 권장 사항이고 경계 규칙은 필수입니다. 코드 펜스 내부나
/// 리스트 항목 중간에서는 절대 자르지 않으며, 그 결과 하나의 항목이
/// `max_characters`를 넘는 청크가 될 수 있습니다.
pub struct MarkdownChunker {
    config: ChunkConfig,
}

impl MarkdownChunker {
    /// 설정으로 생성
    pub fn new(config: ChunkConfig) -> Self {
        Self {
            config: config.normalized(),
        }
    }

    /// 기본 설정으로 생성
    pub fn with_defaults() -> Self {
        Self::new(ChunkConfig::default())
    }

    fn split_section(&self, section: &Section<'_>, out: &mut Vec<ChunkPiece>) {
        let path: Vec<String> = section.heading.iter().cloned().collect();
        let mut body = join_trimmed(&section.lines);

        if body.is_empty() {
            // 헤더만 있는 섹션도 헤더를 잃지 않도록 청크 하나로 남김
            if let Some(line) = section.heading_line {
                out.push(piece(line.trim().to_string(), ChunkKind::HeadingSection, &path));
            }
            return;
        }

        let blocks = split_blocks(&section.lines);

        if char_len(&body) <= self.config.max_characters {
            let kind = match (&section.heading, blocks.as_slice()) {
                (Some(_), _) => ChunkKind::HeadingSection,
                (None, [only]) => only.kind(),
                (None, _) => ChunkKind::Paragraph,
            };
            // 닫히지 않은 펜스는 섹션 끝까지 이어지므로 끝에 닫는 줄 추가
            if let Some(Block::Code {
                fence,
                closed: false,
                ..
            }) = blocks.last()
            {
                body.push('\n');
                body.push_str(&fence.close_line());
            }
            out.push(piece(body, kind, &path));
            return;
        }

        for block in blocks {
            match block {
                Block::Code { fence, content, .. } => self.split_code(&fence, &content, &path, out),
                Block::List(items) => self.split_list(items, &path, out),
                Block::Prose(text) => self.split_prose(&text, &path, out),
            }
        }
    }

    /// 코드 블록: 들어가면 통째로, 아니면 내용을 나눠 각각 같은 펜스로 감쌈
    fn split_code(&self, fence: &Fence, content: &[&str], path: &[String], out: &mut Vec<ChunkPiece>) {
        let whole = fence.wrap(content);
        if char_len(&whole) <= self.config.max_characters {
            out.push(piece(whole, ChunkKind::CodeBlock, path));
            return;
        }

        let wrapper = char_len(&fence.open_line) + char_len(&fence.close_line()) + 2;
        let budget = self.config.max_characters.saturating_sub(wrapper).max(1);

        let mut current: Vec<&str> = Vec::new();
        let mut current_len = 0;

        for &line in content {
            let line_len = char_len(line);

            if line_len > budget {
                // 한 줄이 예산보다 길면 문자 단위로 자름
                if !current.is_empty() {
                    out.push(piece(fence.wrap(&current), ChunkKind::CodeBlock, path));
                    current.clear();
                    current_len = 0;
                }
                for part in split_chars(line, budget) {
                    out.push(piece(fence.wrap(&[part]), ChunkKind::CodeBlock, path));
                }
                continue;
            }

            let added = if current.is_empty() { line_len } else { line_len + 1 };
            if !current.is_empty() && current_len + added > budget {
                out.push(piece(fence.wrap(&current), ChunkKind::CodeBlock, path));
                current.clear();
                current_len = 0;
            }
            current_len += if current.is_empty() { line_len } else { line_len + 1 };
            current.push(line);
        }

        if !current.is_empty() {
            out.push(piece(fence.wrap(&current), ChunkKind::CodeBlock, path));
        }
    }

    /// 리스트: 항목 단위로 greedy 패킹
    fn split_list(&self, items: Vec<String>, path: &[String], out: &mut Vec<ChunkPiece>) {
        let mut current = String::new();

        for item in items {
            if current.is_empty() {
                current = item;
                continue;
            }
            if char_len(&current) + 1 + char_len(&item) > self.config.max_characters {
                out.push(piece(std::mem::take(&mut current), ChunkKind::List, path));
                current = item;
            } else {
                current.push('\n');
                current.push_str(&item);
            }
        }

        if !current.trim().is_empty() {
            out.push(piece(current, ChunkKind::List, path));
        }
    }

    /// 문단: 들어가면 통째로, 아니면 슬라이딩 윈도우
    fn split_prose(&self, text: &str, path: &[String], out: &mut Vec<ChunkPiece>) {
        if char_len(text) <= self.config.max_characters {
            out.push(piece(text.to_string(), ChunkKind::Paragraph, path));
            return;
        }

        for (window, overlap) in sliding_window(
            text,
            self.config.window_characters,
            self.config.overlap_characters,
        ) {
            if window.trim().is_empty() {
                continue;
            }
            out.push(ChunkPiece {
                text: window,
                kind: ChunkKind::Paragraph,
                section_path: path.to_vec(),
                overlap,
            });
        }
    }
}

impl Chunker for MarkdownChunker {
    fn split(&self, body: &str) -> Vec<ChunkPiece> {
        if body.trim().is_empty() {
            return vec![];
        }

        let mut pieces = Vec::new();
        for section in split_sections(body) {
            self.split_section(&section, &mut pieces);
        }
        pieces
    }

    fn name(&self) -> &'static str {
        "MarkdownChunker"
    }
}

fn piece(text: String, kind: ChunkKind, path: &[String]) -> ChunkPiece {
    ChunkPiece {
        text,
        kind,
        section_path: path.to_vec(),
        overlap: 0,
    }
}

// ============================================================================
// Helper Functions
// ============================================================================

/// 문자 수 기준으로 문자열 자르기 (UTF-8 안전)
fn split_chars(s: &str, size: usize) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut start = 0;
    let mut count = 0;
    for (idx, _) in s.char_indices() {
        if count == size {
            parts.push(&s[start..idx]);
            start = idx;
            count = 0;
        }
        count += 1;
    }
    if start < s.len() {
        parts.push(&s[start..]);
    }
    parts
}

/// 고정 크기 슬라이딩 윈도우
///
/// 반환값은 (윈도우 텍스트, 앞 윈도우와 겹치는 선두 바이트 수)입니다.
/// 끝 경계는 직전 공백으로, 다음 시작은 단어 시작으로 스냅합니다.
/// 모든 윈도우에서 선두 오버랩을 떼고 이어 붙이면 원문과 같습니다.
fn sliding_window(text: &str, window: usize, overlap: usize) -> Vec<(String, usize)> {
    let chars: Vec<(usize, char)> = text.char_indices().collect();
    let n = chars.len();
    let byte_at = |i: usize| if i >= n { text.len() } else { chars[i].0 };

    let mut windows = Vec::new();
    let mut start = 0;
    let mut prev_end = 0;

    loop {
        let overlap_bytes = byte_at(prev_end.max(start)) - byte_at(start);

        if n - start <= window {
            windows.push((text[byte_at(start)..].to_string(), overlap_bytes));
            break;
        }

        let mut end = start + window;
        if let Some(p) = (start + overlap + 1..=end)
            .rev()
            .find(|&p| chars[p].1.is_whitespace())
        {
            end = p;
        }
        windows.push((text[byte_at(start)..byte_at(end)].to_string(), overlap_bytes));

        let mut next = end - overlap;
        if next > 0 && !chars[next - 1].1.is_whitespace() && !chars[next].1.is_whitespace() {
            if let Some(q) = (next + 1..=end).find(|&q| chars[q - 1].1.is_whitespace()) {
                next = q;
            }
        }
        while next < end && chars[next].1.is_whitespace() {
            next += 1;
        }

        prev_end = end;
        start = next;
    }

    windows
}

// ============================================================================
// Factory Functions
// ============================================================================

/// 기본 청커 생성
pub fn default_chunker() -> Box<dyn Chunker> {
    Box::new(MarkdownChunker::with_defaults())
}

/// Markdown 청커 생성 (설정 지정)
pub fn markdown_chunker(config: ChunkConfig) -> Box<dyn Chunker> {
    Box::new(MarkdownChunker::new(config))
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn small(max: usize, window: usize, overlap: usize) -> MarkdownChunker {
        MarkdownChunker::new(ChunkConfig {
            max_characters: max,
            window_characters: window,
            overlap_characters: overlap,
        })
    }

    /// 공백, 펜스 줄, `##` 헤더 줄을 뺀 문자열
    fn signature(text: &str) -> String {
        text.lines()
            .filter(|l| Fence::open(l).is_none() && !l.trim().chars().all(|c| c == '`'))
            .filter(|l| section_heading(l).is_none())
            .flat_map(|l| l.chars())
            .filter(|c| !c.is_whitespace())
            .collect()
    }

    fn reconstruct(pieces: &[ChunkPiece]) -> String {
        pieces
            .iter()
            .map(|p| &p.text[p.overlap..])
            .collect::<Vec<_>>()
            .join("\n")
    }

    fn words(count: usize) -> String {
        (0..count)
            .map(|i| format!("w{:03}", i))
            .collect::<Vec<_>>()
            .join(" ")
    }

    #[test]
    fn test_chunker_empty() {
        let chunker = MarkdownChunker::with_defaults();
        assert!(chunker.split("").is_empty());
        assert!(chunker.split("  \n\n\t").is_empty());
    }

    #[test]
    fn test_chunker_single_character() {
        let chunker = MarkdownChunker::with_defaults();
        let pieces = chunker.split("x");
        assert_eq!(pieces.len(), 1);
        assert_eq!(pieces[0].text, "x");
        assert_eq!(pieces[0].kind, ChunkKind::Paragraph);
        assert!(pieces[0].section_path.is_empty());
    }

    #[test]
    fn test_sections_move_heading_to_path() {
        let chunker = MarkdownChunker::with_defaults();
        let text = "Intro text.\n\n## First\n\nBody one.\n\n## Second\nBody two.";
        let pieces = chunker.split(text);

        assert_eq!(pieces.len(), 3);
        assert_eq!(pieces[0].text, "Intro text.");
        assert!(pieces[0].section_path.is_empty());

        assert_eq!(pieces[1].text, "Body one.");
        assert_eq!(pieces[1].section_path, vec!["First".to_string()]);
        assert_eq!(pieces[1].kind, ChunkKind::HeadingSection);

        assert_eq!(pieces[2].text, "Body two.");
        assert_eq!(pieces[2].section_path, vec!["Second".to_string()]);
    }

    #[test]
    fn test_heading_only_section_keeps_heading() {
        let chunker = MarkdownChunker::with_defaults();
        let pieces = chunker.split("## Empty\n\n## Full\ncontent");

        assert_eq!(pieces.len(), 2);
        assert_eq!(pieces[0].text, "## Empty");
        assert_eq!(pieces[0].kind, ChunkKind::HeadingSection);
        assert_eq!(pieces[1].text, "content");
    }

    #[test]
    fn test_heading_inside_code_fence_is_not_a_section() {
        let chunker = MarkdownChunker::with_defaults();
        let text = "```bash\n## not a heading\necho hi\n```";
        let pieces = chunker.split(text);

        assert_eq!(pieces.len(), 1);
        assert_eq!(pieces[0].kind, ChunkKind::CodeBlock);
        assert!(pieces[0].text.contains("## not a heading"));
    }

    #[test]
    fn test_small_code_block_is_atomic() {
        let chunker = small(120, 40, 5);
        let code = "```rust\nfn main() {\n    println!(\"hi\");\n}\n```";
        let text = format!("## Code\n\n{}\n\n{}", words(30), code);
        let pieces = chunker.split(&text);

        let code_pieces: Vec<_> = pieces.iter().filter(|p| p.kind == ChunkKind::CodeBlock).collect();
        assert_eq!(code_pieces.len(), 1);
        assert_eq!(code_pieces[0].text, code);
        assert_eq!(code_pieces[0].section_path, vec!["Code".to_string()]);
    }

    #[test]
    fn test_oversized_code_block_is_rewrapped() {
        let chunker = small(80, 40, 5);
        let body: Vec<String> = (0..30).map(|i| format!("print({})", i)).collect();
        let text = format!("```python\n{}\n```", body.join("\n"));
        let pieces = chunker.split(&text);

        assert!(pieces.len() > 1);
        for p in &pieces {
            assert_eq!(p.kind, ChunkKind::CodeBlock);
            let lines: Vec<&str> = p.text.lines().collect();
            assert_eq!(lines.first(), Some(&"```python"));
            assert_eq!(lines.last(), Some(&"```"));
            assert!(lines[1..lines.len() - 1].iter().all(|l| !l.starts_with("```")));
            assert!(char_len(&p.text) <= 80);
        }
        assert_eq!(signature(&reconstruct(&pieces)), signature(&text));
    }

    #[test]
    fn test_oversized_code_block_keeps_long_fence() {
        let chunker = small(60, 40, 5);
        let body: Vec<String> = (0..20).map(|i| format!("line {}", i)).collect();
        let text = format!("~~~~ sh\n{}\n~~~~", body.join("\n"));
        let pieces = chunker.split(&text);

        assert!(pieces.len() > 1);
        for p in &pieces {
            assert!(p.text.starts_with("~~~~ sh\n"));
            assert!(p.text.ends_with("\n~~~~"));
        }
    }

    #[test]
    fn test_unclosed_fence_is_closed_in_chunk() {
        let chunker = small(60, 40, 5);
        let body: Vec<String> = (0..20).map(|i| format!("x = {}", i)).collect();
        let text = format!("```py\n{}", body.join("\n"));
        let pieces = chunker.split(&text);

        for p in &pieces {
            assert!(p.text.starts_with("```py\n"));
            assert!(p.text.ends_with("\n```"));
        }
    }

    #[test]
    fn test_small_unclosed_fence_is_closed() {
        let pieces = MarkdownChunker::with_defaults().split("```py\nprint(1)");

        assert_eq!(pieces.len(), 1);
        assert_eq!(pieces[0].kind, ChunkKind::CodeBlock);
        assert_eq!(pieces[0].text, "```py\nprint(1)\n```");
    }

    #[test]
    fn test_small_section_with_unclosed_fence_is_balanced() {
        let pieces = MarkdownChunker::with_defaults().split("## Setup\nRun this:\n~~~~ sh\nmake\n");

        assert_eq!(pieces.len(), 1);
        assert_eq!(pieces[0].kind, ChunkKind::HeadingSection);
        assert!(pieces[0].text.ends_with("make\n~~~~"));
    }

    #[test]
    fn test_list_splits_only_at_item_boundaries() {
        let chunker = small(100, 40, 5);
        let items: Vec<String> = (0..20).map(|i| format!("- item number {} here", i)).collect();
        let text = items.join("\n");
        let pieces = chunker.split(&text);

        assert!(pieces.len() > 1);
        for p in &pieces {
            assert_eq!(p.kind, ChunkKind::List);
            assert!(p.text.starts_with("- "));
            assert!(char_len(&p.text) <= 100);
        }
        for item in &items {
            let holders = pieces.iter().filter(|p| p.text.lines().any(|l| l == item)).count();
            assert_eq!(holders, 1, "item split or duplicated: {}", item);
        }
    }

    #[test]
    fn test_oversized_list_item_stands_alone() {
        let chunker = small(60, 40, 5);
        let long_item = format!("- {}", words(30));
        let text = format!("- short one\n{}\n- short two", long_item);
        let pieces = chunker.split(&text);

        assert_eq!(pieces.len(), 3);
        assert_eq!(pieces[1].text, long_item);
        assert!(char_len(&pieces[1].text) > 60);
    }

    #[test]
    fn test_nested_items_stay_with_parent() {
        let chunker = small(40, 20, 2);
        let text = "- parent one\n  - child a\n  - child b\n- parent two\n  continued line";
        let pieces = chunker.split(text);

        assert_eq!(pieces.len(), 2);
        assert_eq!(pieces[0].text, "- parent one\n  - child a\n  - child b");
        assert_eq!(pieces[1].text, "- parent two\n  continued line");
    }

    #[test]
    fn test_loose_list_items_keep_inner_paragraphs() {
        let items = collect_list(&["1. first", "", "   more about first", "2. second", "", "after"], 0);
        assert_eq!(items.0, vec!["1. first\n\n   more about first", "2. second"]);
        assert_eq!(items.1, 4);
    }

    #[test]
    fn test_sliding_window_overlap_and_word_boundaries() {
        let chunker = small(150, 60, 12);
        let text = words(120);
        let pieces = chunker.split(&text);

        assert!(pieces.len() > 2);
        assert_eq!(pieces[0].overlap, 0);
        for p in &pieces {
            assert_eq!(p.kind, ChunkKind::Paragraph);
            assert!(char_len(&p.text) <= 60);
            for token in p.text.split_whitespace() {
                assert_eq!(token.len(), 4, "mid-word split: {:?}", token);
            }
        }
        assert!(pieces[1..].iter().all(|p| p.overlap > 0));
        assert_eq!(pieces.iter().map(|p| &p.text[p.overlap..]).collect::<String>(), text);
    }

    #[test]
    fn test_sliding_window_without_whitespace_hard_cuts() {
        let text = "a".repeat(25);
        let windows = sliding_window(&text, 10, 3);
        let rebuilt: String = windows.iter().map(|(w, o)| &w[*o..]).collect();
        assert_eq!(rebuilt, text);
        assert!(windows.iter().all(|(w, _)| w.len() <= 10));
    }

    #[test]
    fn test_sliding_window_unicode() {
        let text = "안녕하세요 세계 ".repeat(40);
        let windows = sliding_window(text.trim(), 30, 5);
        let rebuilt: String = windows.iter().map(|(w, o)| &w[*o..]).collect();
        assert_eq!(rebuilt, text.trim());
    }

    #[test]
    fn test_mixed_document_covers_all_content() {
        let chunker = small(120, 50, 10);
        let code: Vec<String> = (0..15).map(|i| format!("let v{} = {};", i, i)).collect();
        let text = format!(
            "Preamble {}\n\n## Setup\n\n{}\n\n```rust\n{}\n```\n\n- alpha item\n- beta item\n  nested detail\n- gamma item {}\n\n## Empty\n\n## Notes\n\nShort note.",
            words(10),
            words(40),
            code.join("\n"),
            words(25),
        );
        let pieces = chunker.split(&text);

        assert_eq!(signature(&reconstruct(&pieces)), signature(&text));
        assert!(pieces.iter().any(|p| p.text == "## Empty"));
        assert!(pieces.iter().any(|p| p.kind == ChunkKind::CodeBlock));
        assert!(pieces.iter().any(|p| p.kind == ChunkKind::List));
        assert!(pieces
            .iter()
            .filter(|p| p.section_path == vec!["Setup".to_string()])
            .count() > 2);
    }

    #[test]
    fn test_never_panics_on_odd_input() {
        let chunker = small(10, 4, 3);
        for text in [
            "```",
            "~~~\n",
            "- ",
            "##",
            "## ",
            "1)",
            "\n\n\n- a\n\n\n",
            "é",
            "````\n```\n````",
            "   ```js\n   code\n   ```",
            "#\n##\n###",
        ] {
            let _ = chunker.split(text);
        }
    }

    #[test]
    fn test_chunk_document_ids_are_deterministic() {
        let chunker = MarkdownChunker::with_defaults();
        let doc = Document::parse("dir/a.md", "# Cats\nCats are great.\n:pets:");
        let first = chunker.chunk_document(&doc);
        let second = chunker.chunk_document(&doc);

        assert_eq!(first, second);
        assert_eq!(first.len(), 1);
        assert_eq!(first[0].id, chunk_id("dir/a.md", 0));
        assert_eq!(first[0].source_path, "dir/a.md");
        assert!(first[0].tags.contains("pets"));
        assert_ne!(chunk_id("dir/a.md", 0), chunk_id("dir/b.md", 0));
    }

    #[test]
    fn test_embedding_text_adds_context() {
        let chunker = MarkdownChunker::with_defaults();
        let doc = Document::parse("a.md", "# Cats\n## Food\nTuna.\n:pets:");
        let chunks = chunker.chunk_document(&doc);

        assert_eq!(chunks[0].text, "Tuna.");
        assert_eq!(chunks[0].embedding_text(), "Cats > Food\n\nTuna.\n\nTags: pets");
    }

    #[test]
    fn test_config_normalized() {
        let config = ChunkConfig {
            max_characters: 0,
            window_characters: 10,
            overlap_characters: 50,
        }
        .normalized();
        assert_eq!(config.max_characters, 1);
        assert_eq!(config.overlap_characters, 9);
    }

    #[test]
    fn test_chunk_kind_round_trip_names() {
        for kind in [
            ChunkKind::HeadingSection,
            ChunkKind::CodeBlock,
            ChunkKind::List,
            ChunkKind::Paragraph,
        ] {
            assert_eq!(kind.as_str().parse::<ChunkKind>(), Ok(kind));
        }
    }
}
