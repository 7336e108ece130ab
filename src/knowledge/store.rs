//! Note Store - rusqlite 기반 문서 스냅샷/인덱스 매니페스트 저장소
//!
//! 인덱싱된 노트 원문 스냅샷과, 인덱스를 만든 임베딩 모델 정보(매니페스트)를
//! 저장합니다. 저장 위치: ~/.notes-rag/notes.db

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OpenFlags, OptionalExtension};
use serde::{Deserialize, Serialize};

use crate::error::{RagError, Result};
use crate::notes::Document;

const MANIFEST_KEY: &str = "index_manifest";

// ============================================================================
// Data Directory
// ============================================================================

/// 데이터 디렉토리 경로 (~/.notes-rag/)
pub fn get_data_dir() -> PathBuf {
    dirs::data_local_dir()
        .or_else(dirs::home_dir)
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".notes-rag")
}

// ============================================================================
// Types
// ============================================================================

/// 인덱스 매니페스트
///
/// 질의 시 현재 임베딩 모델과 비교해 불일치를 감지합니다.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexManifest {
    /// `provider:model@dimension`
    pub embedding_model: String,
    pub dimension: usize,
    pub built_at: DateTime<Utc>,
    pub document_count: usize,
    pub chunk_count: usize,
}

/// 저장된 문서 스냅샷
#[derive(Debug, Clone, PartialEq)]
pub struct StoredDocument {
    pub document: Document,
    pub chunk_count: usize,
    pub indexed_at: DateTime<Utc>,
}

/// 저장소 통계
#[derive(Debug, Clone, Serialize)]
pub struct StoreStats {
    pub document_count: usize,
    pub total_body_bytes: usize,
    pub db_path: PathBuf,
}

// ============================================================================
// NoteStore
// ============================================================================

/// Note Store - 동기 문서 저장소
pub struct NoteStore {
    conn: Arc<Mutex<Connection>>,
    db_path: PathBuf,
}

impl NoteStore {
    /// 저장소 열기 (없으면 생성)
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.exists() {
                std::fs::create_dir_all(parent).map_err(|e| RagError::io(parent, e))?;
            }
        }

        let conn = Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_WRITE
                | OpenFlags::SQLITE_OPEN_CREATE
                | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )
        .map_err(store_err("Failed to open SQLite database"))?;

        let store = Self {
            conn: Arc::new(Mutex::new(conn)),
            db_path: path.to_path_buf(),
        };

        store.initialize()?;
        Ok(store)
    }

    /// 메모리 DB (테스트용)
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(store_err("Failed to open in-memory database"))?;
        let store = Self {
            conn: Arc::new(Mutex::new(conn)),
            db_path: PathBuf::from(":memory:"),
        };
        store.initialize()?;
        Ok(store)
    }

    /// 기본 위치에서 열기 (`data_dir`/notes.db)
    pub fn open_in(data_dir: &Path) -> Result<Self> {
        Self::open(&data_dir.join("notes.db"))
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| RagError::StoreUnavailable(format!("Lock error: {}", e)))
    }

    /// 스키마 초기화
    fn initialize(&self) -> Result<()> {
        let conn = self.lock()?;

        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS documents (
                path TEXT PRIMARY KEY,
                title TEXT,
                tags TEXT NOT NULL,
                body TEXT NOT NULL,
                chunk_count INTEGER NOT NULL,
                indexed_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS meta (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL
            );
            "#,
        )
        .map_err(store_err("Failed to create tables"))?;

        tracing::debug!("Note store initialized at {:?}", self.db_path);
        Ok(())
    }

    /// 문서 스냅샷 저장 (경로가 같으면 교체)
    pub fn put_document(&self, doc: &Document, chunk_count: usize) -> Result<()> {
        self.write_snapshot(doc, chunk_count, Utc::now())?;
        tracing::debug!("Stored document snapshot: {} ({} chunks)", doc.path, chunk_count);
        Ok(())
    }

    /// 이전에 읽어 둔 스냅샷을 그대로 되돌림 (색인 시각 포함)
    pub fn restore_document(&self, stored: &StoredDocument) -> Result<()> {
        self.write_snapshot(&stored.document, stored.chunk_count, stored.indexed_at)?;
        tracing::debug!(
            "Restored snapshot of {} indexed at {}",
            stored.document.path,
            stored.indexed_at
        );
        Ok(())
    }

    fn write_snapshot(&self, doc: &Document, chunk_count: usize, indexed_at: DateTime<Utc>) -> Result<()> {
        let conn = self.lock()?;
        let tags = serde_json::to_string(&doc.tags)
            .map_err(|e| RagError::StoreUnavailable(format!("Failed to encode tags: {}", e)))?;

        conn.execute(
            "INSERT OR REPLACE INTO documents (path, title, tags, body, chunk_count, indexed_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                doc.path,
                doc.title,
                tags,
                doc.body,
                chunk_count as i64,
                indexed_at.to_rfc3339()
            ],
        )
        .map_err(store_err("Failed to insert document"))?;
        Ok(())
    }

    /// 경로로 문서 조회
    pub fn get_document(&self, path: &str) -> Result<Option<StoredDocument>> {
        let conn = self.lock()?;

        let row = conn
            .query_row(
                "SELECT path, title, tags, body, chunk_count, indexed_at FROM documents WHERE path = ?1",
                params![path],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, Option<String>>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, String>(3)?,
                        row.get::<_, i64>(4)?,
                        row.get::<_, String>(5)?,
                    ))
                },
            )
            .optional()
            .map_err(store_err("Failed to query document"))?;

        let Some((path, title, tags, body, chunk_count, indexed_at)) = row else {
            return Ok(None);
        };

        let tags: BTreeSet<String> = serde_json::from_str(&tags).unwrap_or_else(|e| {
            tracing::warn!("Corrupt tag list for {}: {}", path, e);
            BTreeSet::new()
        });

        Ok(Some(StoredDocument {
            document: Document {
                path,
                title,
                tags,
                body,
            },
            chunk_count: chunk_count.max(0) as usize,
            indexed_at: parse_datetime(indexed_at),
        }))
    }

    /// 저장된 문서 경로 전체 (정렬)
    pub fn list_paths(&self) -> Result<Vec<String>> {
        let conn = self.lock()?;
        let mut stmt = conn
            .prepare("SELECT path FROM documents ORDER BY path")
            .map_err(store_err("Failed to list documents"))?;

        let paths = stmt
            .query_map([], |row| row.get::<_, String>(0))
            .map_err(store_err("Failed to list documents"))?
            .filter_map(|r| r.ok())
            .collect();

        Ok(paths)
    }

    /// 문서 삭제
    pub fn remove_document(&self, path: &str) -> Result<bool> {
        let conn = self.lock()?;
        let rows = conn
            .execute("DELETE FROM documents WHERE path = ?1", params![path])
            .map_err(store_err("Failed to delete document"))?;
        Ok(rows > 0)
    }

    /// 매니페스트 기록 (인덱싱 완료 시)
    pub fn record_manifest(&self, manifest: &IndexManifest) -> Result<()> {
        let conn = self.lock()?;
        let value = serde_json::to_string(manifest)
            .map_err(|e| RagError::StoreUnavailable(format!("Failed to encode manifest: {}", e)))?;

        conn.execute(
            "INSERT OR REPLACE INTO meta (key, value) VALUES (?1, ?2)",
            params![MANIFEST_KEY, value],
        )
        .map_err(store_err("Failed to write manifest"))?;

        tracing::info!(
            "Recorded index manifest: {} ({} docs, {} chunks)",
            manifest.embedding_model,
            manifest.document_count,
            manifest.chunk_count
        );
        Ok(())
    }

    /// 매니페스트 조회 (인덱싱 전이면 None)
    pub fn manifest(&self) -> Result<Option<IndexManifest>> {
        let conn = self.lock()?;
        let value: Option<String> = conn
            .query_row(
                "SELECT value FROM meta WHERE key = ?1",
                params![MANIFEST_KEY],
                |row| row.get(0),
            )
            .optional()
            .map_err(store_err("Failed to read manifest"))?;

        match value {
            Some(v) => serde_json::from_str(&v)
                .map(Some)
                .map_err(|e| RagError::StoreUnavailable(format!("Corrupt index manifest: {}", e))),
            None => Ok(None),
        }
    }

    /// 해당 경로의 스냅샷 쓰기가 항상 실패하도록 트리거 설치
    #[cfg(test)]
    pub(crate) fn fail_writes_for(&self, path: &str) -> Result<()> {
        let conn = self.lock()?;
        conn.execute_batch(&format!(
            "CREATE TRIGGER IF NOT EXISTS reject_snapshot BEFORE INSERT ON documents
             WHEN NEW.path = '{}'
             BEGIN SELECT RAISE(ABORT, 'database is locked'); END;",
            path.replace('\'', "''")
        ))
        .map_err(store_err("Failed to install trigger"))
    }

    /// 저장소 통계
    pub fn stats(&self) -> Result<StoreStats> {
        let conn = self.lock()?;

        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM documents", [], |row| row.get(0))
            .unwrap_or(0);

        let total_size: i64 = conn
            .query_row(
                "SELECT COALESCE(SUM(LENGTH(CAST(body AS BLOB))), 0) FROM documents",
                [],
                |row| row.get(0),
            )
            .unwrap_or(0);

        Ok(StoreStats {
            document_count: count as usize,
            total_body_bytes: total_size as usize,
            db_path: self.db_path.clone(),
        })
    }
}

// ============================================================================
// Helper Functions
// ============================================================================

fn store_err(context: &'static str) -> impl Fn(rusqlite::Error) -> RagError {
    move |e| RagError::StoreUnavailable(format!("{}: {}", context, e))
}

/// RFC3339 문자열을 DateTime<Utc>로 파싱
fn parse_datetime(s: String) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(&s)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn create_test_store() -> (TempDir, NoteStore) {
        let dir = TempDir::new().unwrap();
        let db_path = dir.path().join("nested").join("test.db");
        let store = NoteStore::open(&db_path).unwrap();
        (dir, store)
    }

    fn manifest(model: &str) -> IndexManifest {
        IndexManifest {
            embedding_model: model.to_string(),
            dimension: 768,
            built_at: Utc::now(),
            document_count: 2,
            chunk_count: 5,
        }
    }

    #[test]
    fn test_put_and_get_document() {
        let (_dir, store) = create_test_store();
        let doc = Document::parse("pets/cats.md", "# Cats\nCats are great.\n:pets:cats:");

        store.put_document(&doc, 1).unwrap();

        let stored = store.get_document("pets/cats.md").unwrap().unwrap();
        assert_eq!(stored.document, doc);
        assert_eq!(stored.chunk_count, 1);
        assert!(store.get_document("missing.md").unwrap().is_none());
    }

    #[test]
    fn test_put_replaces_existing_snapshot() {
        let (_dir, store) = create_test_store();
        store.put_document(&Document::parse("a.md", "old"), 1).unwrap();
        store.put_document(&Document::parse("a.md", "new"), 2).unwrap();

        let stored = store.get_document("a.md").unwrap().unwrap();
        assert_eq!(stored.document.body, "new");
        assert_eq!(stored.chunk_count, 2);
        assert_eq!(store.list_paths().unwrap(), vec!["a.md".to_string()]);
    }

    #[test]
    fn test_list_and_remove() {
        let store = NoteStore::open_in_memory().unwrap();
        store.put_document(&Document::parse("b.md", "b"), 1).unwrap();
        store.put_document(&Document::parse("a.md", "a"), 1).unwrap();

        assert_eq!(store.list_paths().unwrap(), vec!["a.md", "b.md"]);
        assert!(store.remove_document("a.md").unwrap());
        assert!(!store.remove_document("a.md").unwrap());
        assert_eq!(store.list_paths().unwrap(), vec!["b.md"]);
    }

    #[test]
    fn test_manifest_absent_until_recorded() {
        let store = NoteStore::open_in_memory().unwrap();
        assert!(store.manifest().unwrap().is_none());

        store.record_manifest(&manifest("gemini:gemini-embedding-001@768")).unwrap();
        store.record_manifest(&manifest("ollama:bge-m3@1024")).unwrap();

        let loaded = store.manifest().unwrap().unwrap();
        assert_eq!(loaded.embedding_model, "ollama:bge-m3@1024");
        assert_eq!(loaded.chunk_count, 5);
    }

    #[test]
    fn test_manifest_survives_reopen() {
        let dir = TempDir::new().unwrap();
        {
            let store = NoteStore::open_in(dir.path()).unwrap();
            store.record_manifest(&manifest("m@3")).unwrap();
        }
        let store = NoteStore::open_in(dir.path()).unwrap();
        assert_eq!(store.manifest().unwrap().unwrap().embedding_model, "m@3");
    }

    #[test]
    fn test_restore_keeps_previous_indexed_at() {
        let store = NoteStore::open_in_memory().unwrap();
        store.put_document(&Document::parse("a.md", "first"), 1).unwrap();
        let previous = store.get_document("a.md").unwrap().unwrap();

        store.put_document(&Document::parse("a.md", "second"), 3).unwrap();
        store.restore_document(&previous).unwrap();

        assert_eq!(store.get_document("a.md").unwrap().unwrap(), previous);
    }

    #[test]
    fn test_rejected_snapshot_leaves_old_row() {
        let store = NoteStore::open_in_memory().unwrap();
        store.put_document(&Document::parse("a.md", "old"), 1).unwrap();
        store.fail_writes_for("a.md").unwrap();

        let err = store.put_document(&Document::parse("a.md", "new"), 1).unwrap_err();
        assert!(err.is_retryable());
        assert_eq!(store.get_document("a.md").unwrap().unwrap().document.body, "old");
        store.put_document(&Document::parse("b.md", "other"), 1).unwrap();
    }

    #[test]
    fn test_stats() {
        let (_dir, store) = create_test_store();
        store.put_document(&Document::parse("a.md", "1234567890"), 1).unwrap();

        let stats = store.stats().unwrap();
        assert!(stats.db_path.ends_with("nested/test.db"));
        assert_eq!(stats.document_count, 1);
        assert_eq!(stats.total_body_bytes, 10);
    }
}
