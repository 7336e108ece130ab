//! 노트 수집 모듈
//!
//! 노트 디렉토리를 재귀적으로 순회하여 마크다운 파일을 수집하고
//! 메타데이터를 분리한 [`Document`]로 읽어들입니다.
//! 숨김 디렉토리(`.`으로 시작)는 하위 전체가 순회에서 제외됩니다.

pub mod metadata;

use std::collections::BTreeSet;
use std::path::{Component, Path, PathBuf};

use ignore::WalkBuilder;
use serde::{Deserialize, Serialize};

use crate::error::{RagError, Result};

/// 마크다운 확장자
const MARKDOWN_EXTENSION: &str = "md";

// ============================================================================
// Document
// ============================================================================

/// 파싱된 노트 문서
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Document {
    /// 노트 루트 기준 상대 경로 (`/` 구분자) - 문서 식별자
    pub path: String,
    pub title: Option<String>,
    pub tags: BTreeSet<String>,
    /// 제목/태그 줄이 제거된 본문
    pub body: String,
}

impl Document {
    /// 원문에서 문서 생성
    pub fn parse(path: impl Into<String>, raw: &str) -> Self {
        let meta = metadata::extract(raw);
        Self {
            path: path.into(),
            title: meta.title,
            tags: meta.tags,
            body: meta.body,
        }
    }

    /// LLM에 전달할 전체 문서 텍스트
    pub fn full_text(&self) -> String {
        let mut text = String::new();
        if let Some(ref title) = self.title {
            text.push_str("# ");
            text.push_str(title);
            text.push_str("\n\n");
        }
        text.push_str(&self.body);
        if !self.tags.is_empty() {
            text.push_str("\n\nTags: ");
            text.push_str(&self.tags.iter().cloned().collect::<Vec<_>>().join(", "));
        }
        text
    }
}

// ============================================================================
// Note Tree
// ============================================================================

/// 수집된 노트 파일
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NoteFile {
    pub abs_path: PathBuf,
    /// 루트 기준 상대 경로
    pub rel_path: String,
}

/// 트리 순회 결과
#[derive(Debug, Default)]
pub struct NoteScan {
    /// 경로 순 정렬
    pub files: Vec<NoteFile>,
    /// 읽지 못한 항목 (디렉토리 권한 등)
    pub unreadable: Vec<String>,
}

impl NoteScan {
    /// 순회 중 오류가 없었는지 여부
    ///
    /// 불완전한 순회에서는 보이지 않는 노트를 삭제된 것으로 볼 수 없습니다.
    pub fn is_complete(&self) -> bool {
        self.unreadable.is_empty()
    }
}

/// 노트 트리 순회 설정
#[derive(Debug, Clone, Default)]
pub struct NoteTreeConfig {
    /// .gitignore 패턴 존중 여부
    pub respect_gitignore: bool,
}

/// 노트 디렉토리
#[derive(Debug, Clone)]
pub struct NoteTree {
    root: PathBuf,
    config: NoteTreeConfig,
}

impl NoteTree {
    pub fn new(root: impl Into<PathBuf>, config: NoteTreeConfig) -> Self {
        Self {
            root: root.into(),
            config,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// 마크다운 파일 재귀 수집
    ///
    /// 개별 항목 오류는 건너뛰고 [`NoteScan::unreadable`]에 기록합니다.
    pub fn collect(&self) -> Result<NoteScan> {
        if !self.root.is_dir() {
            return Err(RagError::Config(format!(
                "notes directory not found: {}",
                self.root.display()
            )));
        }

        let respect_gitignore = self.config.respect_gitignore;
        let walker = WalkBuilder::new(&self.root)
            .hidden(true)
            .ignore(false)
            .parents(false)
            .git_ignore(respect_gitignore)
            .git_global(respect_gitignore)
            .git_exclude(respect_gitignore)
            .require_git(false)
            .follow_links(false)
            .sort_by_file_path(|a, b| a.cmp(b))
            .build();

        let mut scan = NoteScan::default();

        for entry in walker {
            let entry = match entry {
                Ok(e) => e,
                Err(e) => {
                    tracing::warn!("Failed to read entry: {}", e);
                    scan.unreadable.push(e.to_string());
                    continue;
                }
            };

            if !entry.file_type().map(|ft| ft.is_file()).unwrap_or(false) {
                continue;
            }

            let path = entry.path();
            if !is_markdown(path) {
                continue;
            }

            let Some(rel_path) = relative_path(&self.root, path) else {
                tracing::warn!("Skipping file outside notes root: {:?}", path);
                continue;
            };

            scan.files.push(NoteFile {
                abs_path: path.to_path_buf(),
                rel_path,
            });
        }

        tracing::info!(
            "Collected {} notes from {:?} ({} unreadable entries)",
            scan.files.len(),
            self.root,
            scan.unreadable.len()
        );
        Ok(scan)
    }

    /// 노트 파일 읽기 + 메타데이터 분리
    ///
    /// UTF-8이 아닌 파일은 [`RagError::Parse`]로 보고됩니다.
    pub async fn load(&self, file: &NoteFile) -> Result<Document> {
        let bytes = tokio::fs::read(&file.abs_path)
            .await
            .map_err(|e| RagError::io(&file.abs_path, e))?;

        let raw = String::from_utf8(bytes).map_err(|e| RagError::Parse {
            path: file.rel_path.clone(),
            reason: format!("not valid UTF-8: {}", e.utf8_error()),
        })?;

        Ok(Document::parse(file.rel_path.clone(), &raw))
    }
}

fn is_markdown(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.eq_ignore_ascii_case(MARKDOWN_EXTENSION))
        .unwrap_or(false)
}

/// 루트 기준 상대 경로를 `/` 구분자 문자열로 변환
fn relative_path(root: &Path, path: &Path) -> Option<String> {
    let rel = path.strip_prefix(root).ok()?;
    let parts: Vec<String> = rel
        .components()
        .filter_map(|c| match c {
            Component::Normal(s) => Some(s.to_string_lossy().into_owned()),
            _ => None,
        })
        .collect();
    if parts.is_empty() {
        None
    } else {
        Some(parts.join("/"))
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn write(root: &Path, rel: &str, content: &str) {
        let path = root.join(rel);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, content).unwrap();
    }

    #[test]
    fn test_collect_prunes_hidden_directories() {
        let dir = TempDir::new().unwrap();
        write(dir.path(), "a.md", "# A");
        write(dir.path(), "sub/b.md", "# B");
        write(dir.path(), "sub/notes.txt", "not markdown");
        write(dir.path(), ".obsidian/c.md", "# hidden");
        write(dir.path(), "sub/.trash/deep/d.md", "# hidden too");

        let tree = NoteTree::new(dir.path(), NoteTreeConfig::default());
        let files = tree.collect().unwrap().files;
        let paths: Vec<&str> = files.iter().map(|f| f.rel_path.as_str()).collect();

        assert_eq!(paths, vec!["a.md", "sub/b.md"]);
    }

    #[cfg(unix)]
    #[test]
    fn test_collect_reports_unreadable_directory() {
        use std::os::unix::fs::PermissionsExt;

        let dir = TempDir::new().unwrap();
        write(dir.path(), "a.md", "# A");
        write(dir.path(), "locked/b.md", "# B");
        let locked = dir.path().join("locked");
        std::fs::set_permissions(&locked, std::fs::Permissions::from_mode(0o000)).unwrap();

        // root는 권한과 무관하게 읽을 수 있음
        let readable = std::fs::read_dir(&locked).is_ok();
        let scan = NoteTree::new(dir.path(), NoteTreeConfig::default()).collect().unwrap();
        std::fs::set_permissions(&locked, std::fs::Permissions::from_mode(0o755)).unwrap();

        if readable {
            assert!(scan.is_complete());
            return;
        }
        assert!(!scan.is_complete());
        assert_eq!(scan.files.len(), 1);
        assert_eq!(scan.files[0].rel_path, "a.md");
    }

    #[test]
    fn test_collect_uppercase_extension() {
        let dir = TempDir::new().unwrap();
        write(dir.path(), "README.MD", "x");

        let tree = NoteTree::new(dir.path(), NoteTreeConfig::default());
        assert_eq!(tree.collect().unwrap().files.len(), 1);
    }

    #[test]
    fn test_collect_missing_root_is_config_error() {
        let tree = NoteTree::new("/definitely/not/here", NoteTreeConfig::default());
        assert!(matches!(tree.collect(), Err(RagError::Config(_))));
    }

    #[tokio::test]
    async fn test_load_parses_metadata() {
        let dir = TempDir::new().unwrap();
        write(dir.path(), "cats.md", "# Cats\nCats are great.\n:pets:");

        let tree = NoteTree::new(dir.path(), NoteTreeConfig::default());
        let files = tree.collect().unwrap().files;
        let doc = tree.load(&files[0]).await.unwrap();

        assert_eq!(doc.path, "cats.md");
        assert_eq!(doc.title.as_deref(), Some("Cats"));
        assert!(doc.tags.contains("pets"));
        assert_eq!(doc.body, "Cats are great.");
    }

    #[tokio::test]
    async fn test_load_rejects_invalid_utf8() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("bad.md"), [0xff, 0xfe, 0x00, 0x41]).unwrap();

        let tree = NoteTree::new(dir.path(), NoteTreeConfig::default());
        let files = tree.collect().unwrap().files;
        let err = tree.load(&files[0]).await.unwrap_err();

        assert!(matches!(err, RagError::Parse { ref path, .. } if path == "bad.md"));
    }

    #[test]
    fn test_full_text_includes_title_and_tags() {
        let doc = Document::parse("a.md", "# Cats\nCats are great.\n:pets:");
        let text = doc.full_text();
        assert!(text.starts_with("# Cats"));
        assert!(text.contains("Cats are great."));
        assert!(text.ends_with("Tags: pets"));
    }
}
