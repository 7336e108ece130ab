//! In-memory [`VectorStore`]
//!
//! `RwLock<HashMap>` 기반 brute-force 코사인 거리 검색입니다.
//! 테스트와 작은 노트 모음에 사용합니다.

use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;

use super::vector::{cosine_distance, Candidate, StoredChunk, VectorEntry, VectorStore};
use crate::error::{RagError, Result};

/// 메모리 벡터 저장소
#[derive(Default)]
pub struct InMemoryVectorStore {
    entries: RwLock<HashMap<String, VectorEntry>>,
}

impl InMemoryVectorStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// 저장된 전체 엔트리 (ID 순)
    pub fn snapshot(&self) -> Result<Vec<VectorEntry>> {
        let entries = self.read()?;
        let mut all: Vec<VectorEntry> = entries.values().cloned().collect();
        all.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(all)
    }

    fn read(&self) -> Result<std::sync::RwLockReadGuard<'_, HashMap<String, VectorEntry>>> {
        self.entries
            .read()
            .map_err(|e| RagError::StoreUnavailable(format!("Lock error: {}", e)))
    }

    fn write(&self) -> Result<std::sync::RwLockWriteGuard<'_, HashMap<String, VectorEntry>>> {
        self.entries
            .write()
            .map_err(|e| RagError::StoreUnavailable(format!("Lock error: {}", e)))
    }
}

fn stored(entry: &VectorEntry) -> StoredChunk {
    StoredChunk {
        id: entry.id.clone(),
        text: entry.text.clone(),
        metadata: entry.metadata.clone(),
    }
}

#[async_trait]
impl VectorStore for InMemoryVectorStore {
    async fn upsert(&self, entries: &[VectorEntry]) -> Result<usize> {
        let mut map = self.write()?;
        for entry in entries {
            map.insert(entry.id.clone(), entry.clone());
        }
        Ok(entries.len())
    }

    async fn query(&self, embedding: &[f32], k: usize) -> Result<Vec<Candidate>> {
        let map = self.read()?;
        let mut candidates: Vec<Candidate> = map
            .values()
            .map(|e| Candidate {
                chunk_id: e.id.clone(),
                distance: cosine_distance(embedding, &e.embedding),
                text: e.text.clone(),
                metadata: e.metadata.clone(),
            })
            .collect();

        candidates.sort_by(|a, b| {
            a.distance
                .partial_cmp(&b.distance)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.chunk_id.cmp(&b.chunk_id))
        });
        candidates.truncate(k);
        Ok(candidates)
    }

    async fn get_by_id(&self, id: &str) -> Result<Option<StoredChunk>> {
        Ok(self.read()?.get(id).map(stored))
    }

    async fn get_by_source_path(&self, source_path: &str) -> Result<Vec<StoredChunk>> {
        let map = self.read()?;
        let mut chunks: Vec<StoredChunk> = map
            .values()
            .filter(|e| e.metadata.source_path == source_path)
            .map(stored)
            .collect();
        chunks.sort_by_key(|c| c.metadata.position);
        Ok(chunks)
    }

    async fn delete(&self, ids: &[String]) -> Result<usize> {
        let mut map = self.write()?;
        Ok(ids.iter().filter(|id| map.remove(id.as_str()).is_some()).count())
    }

    async fn count(&self) -> Result<usize> {
        Ok(self.read()?.len())
    }

    async fn clear(&self) -> Result<()> {
        self.write()?.clear();
        Ok(())
    }
}
