//! Index Writer - 노트 트리 전체 재색인
//!
//! 노트 수집 → 메타데이터 분리 → 청킹 → 배치 임베딩 → 벡터 저장소 upsert.
//! 문서 단위 실패는 격리되어 보고되고 나머지 문서는 계속 처리됩니다.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::Utc;
use futures::stream::{self, StreamExt};

use super::chunker::{Chunk, Chunker};
use super::store::{IndexManifest, NoteStore, StoredDocument};
use super::vector::{VectorEntry, VectorStore};
use crate::config::IndexConfig;
use crate::embedding::EmbeddingProvider;
use crate::error::{RagError, Result};
use crate::notes::{Document, NoteFile, NoteTree};
use crate::retry::{with_retry, RetryPolicy};

// ============================================================================
// Report
// ============================================================================

/// 문서 단위 실패
#[derive(Debug)]
pub struct DocumentFailure {
    pub path: String,
    pub error: RagError,
}

/// 인덱싱 실행 결과
#[derive(Debug, Default)]
pub struct IndexReport {
    pub documents_indexed: usize,
    pub chunks_written: usize,
    /// 이전 실행보다 줄어든 문서의 남은 청크 + 사라진 문서의 청크
    pub stale_chunks_removed: usize,
    pub orphan_documents_removed: usize,
    /// 순회가 불완전해 삭제 노트 정리를 건너뛰었는지 여부
    pub orphan_pruning_skipped: bool,
    pub failures: Vec<DocumentFailure>,
    /// 임베딩 모델이 바뀌어 저장소를 비웠는지 여부
    pub model_changed: bool,
}

/// 저장 직전 상태의 문서
struct PreparedDocument {
    document: Document,
    chunks: Vec<Chunk>,
    embeddings: Vec<Vec<f32>>,
}

// ============================================================================
// IndexWriter
// ============================================================================

pub struct IndexWriter {
    tree: NoteTree,
    chunker: Box<dyn Chunker>,
    embedder: Arc<dyn EmbeddingProvider>,
    vectors: Arc<dyn VectorStore>,
    notes: Arc<NoteStore>,
    config: IndexConfig,
    retry: RetryPolicy,
}

impl IndexWriter {
    pub fn new(
        tree: NoteTree,
        chunker: Box<dyn Chunker>,
        embedder: Arc<dyn EmbeddingProvider>,
        vectors: Arc<dyn VectorStore>,
        notes: Arc<NoteStore>,
        config: IndexConfig,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            tree,
            chunker,
            embedder,
            vectors,
            notes,
            config,
            retry,
        }
    }

    /// 전체 재색인 실행
    ///
    /// 노트 루트가 없거나 저장소를 쓸 수 없으면 에러, 그 외 실패는 보고서에 담깁니다.
    pub async fn run(&self) -> Result<IndexReport> {
        let scan = self.tree.collect()?;
        let model_id = self.embedder.model_id();
        let mut report = IndexReport::default();

        if let Some(previous) = self.notes.manifest()? {
            if previous.embedding_model != model_id {
                tracing::warn!(
                    "Embedding model changed ({} -> {}), clearing vector store",
                    previous.embedding_model,
                    model_id
                );
                self.store_write("clear", || self.vectors.clear()).await?;
                report.model_changed = true;
            }
        }

        let seen: HashSet<String> = scan.files.iter().map(|f| f.rel_path.clone()).collect();
        let complete = scan.is_complete();

        tracing::info!(
            "Indexing {} notes under {:?} with {} (workers: {})",
            scan.files.len(),
            self.tree.root(),
            self.chunker.name(),
            self.config.workers
        );

        let mut prepared = stream::iter(scan.files)
            .map(|file| self.prepare(file))
            .buffer_unordered(self.config.workers.max(1));

        while let Some((path, outcome)) = prepared.next().await {
            let result = match outcome {
                Ok(doc) => self.write(doc).await,
                Err(e) => Err(e),
            };

            match result {
                Ok((written, stale)) => {
                    tracing::debug!("Indexed {} ({} chunks)", path, written);
                    report.documents_indexed += 1;
                    report.chunks_written += written;
                    report.stale_chunks_removed += stale;
                }
                Err(error) => {
                    tracing::warn!("Failed to index {}: {}", path, error);
                    report.failures.push(DocumentFailure { path, error });
                }
            }
        }

        if self.config.prune_orphans {
            if complete {
                self.prune_orphans(&seen, &mut report).await?;
            } else {
                tracing::warn!("Note tree was not fully readable, skipping orphan cleanup");
                report.orphan_pruning_skipped = true;
            }
        }

        let manifest = IndexManifest {
            embedding_model: model_id,
            dimension: self.embedder.dimension(),
            built_at: Utc::now(),
            document_count: self.notes.list_paths()?.len(),
            chunk_count: self.vectors.count().await?,
        };
        self.notes.record_manifest(&manifest)?;

        tracing::info!(
            "Indexing finished: {} documents, {} chunks, {} failures",
            report.documents_indexed,
            report.chunks_written,
            report.failures.len()
        );
        Ok(report)
    }

    /// 읽기 → 청킹 → 임베딩 (저장소는 건드리지 않음)
    async fn prepare(&self, file: NoteFile) -> (String, Result<PreparedDocument>) {
        let path = file.rel_path.clone();
        let outcome = async {
            let document = self.tree.load(&file).await?;
            let chunks = self.chunker.chunk_document(&document);
            let texts: Vec<String> = chunks.iter().map(Chunk::embedding_text).collect();

            let mut embeddings = Vec::with_capacity(texts.len());
            for batch in texts.chunks(self.config.batch_size.max(1)) {
                let vectors = with_retry(&self.retry, "embedding batch", RagError::EmbeddingUnavailable, || {
                    self.embedder.embed_batch(batch)
                })
                .await?;

                if vectors.len() != batch.len() {
                    return Err(RagError::EmbeddingUnavailable(format!(
                        "expected {} embeddings, got {}",
                        batch.len(),
                        vectors.len()
                    )));
                }
                embeddings.extend(vectors);
            }

            Ok::<_, RagError>(PreparedDocument {
                document,
                chunks,
                embeddings,
            })
        }
        .await;

        (path, outcome)
    }

    /// 한 문서의 스냅샷 저장 + 청크 교체
    ///
    /// 스냅샷을 먼저 쓰고, 청크 upsert가 실패하면 이전 스냅샷으로 되돌립니다.
    /// 스냅샷 쓰기가 실패하면 벡터 저장소는 건드리지 않습니다.
    ///
    /// 반환: (기록한 청크 수, 제거한 이전 청크 수)
    async fn write(&self, prepared: PreparedDocument) -> Result<(usize, usize)> {
        let PreparedDocument {
            document,
            chunks,
            embeddings,
        } = prepared;

        let existing = self
            .store_write("lookup", || self.vectors.get_by_source_path(&document.path))
            .await?;
        let previous = self
            .store_write("snapshot lookup", || async { self.notes.get_document(&document.path) })
            .await?;

        self.store_write("snapshot", || async {
            self.notes.put_document(&document, chunks.len())
        })
        .await?;

        let entries: Vec<VectorEntry> = chunks
            .iter()
            .zip(embeddings)
            .map(|(chunk, embedding)| VectorEntry::from_chunk(chunk, embedding))
            .collect();
        let written = match self
            .store_write("upsert", || self.vectors.upsert(&entries))
            .await
        {
            Ok(n) => n,
            Err(e) => {
                self.rollback_snapshot(&document.path, previous.as_ref());
                return Err(e);
            }
        };

        // 여기서 실패해도 새 청크와 새 스냅샷은 일치하고, 남은 청크는 다음 실행에서 정리됨
        let fresh: HashSet<&str> = chunks.iter().map(|c| c.id.as_str()).collect();
        let stale: Vec<String> = existing
            .into_iter()
            .map(|c| c.id)
            .filter(|id| !fresh.contains(id.as_str()))
            .collect();
        let removed = if stale.is_empty() {
            0
        } else {
            self.store_write("delete", || self.vectors.delete(&stale)).await?
        };

        Ok((written, removed))
    }

    fn rollback_snapshot(&self, path: &str, previous: Option<&StoredDocument>) {
        let restored = match previous {
            Some(stored) => self.notes.restore_document(stored),
            None => self.notes.remove_document(path).map(|_| ()),
        };
        if let Err(e) = restored {
            tracing::error!("Failed to roll back snapshot of {}: {}", path, e);
        }
    }

    /// 트리에서 사라진 문서의 청크/스냅샷 제거
    ///
    /// 이번 실행에서 실패한 문서는 트리에 남아 있으므로 이전 항목이 유지됩니다.
    async fn prune_orphans(&self, seen: &HashSet<String>, report: &mut IndexReport) -> Result<()> {
        for path in self.notes.list_paths()? {
            if seen.contains(&path) {
                continue;
            }

            let ids: Vec<String> = self
                .store_write("lookup", || self.vectors.get_by_source_path(&path))
                .await?
                .into_iter()
                .map(|c| c.id)
                .collect();
            let removed = if ids.is_empty() {
                0
            } else {
                self.store_write("delete", || self.vectors.delete(&ids)).await?
            };
            self.notes.remove_document(&path)?;

            tracing::info!("Removed orphaned note {} ({} chunks)", path, removed);
            report.orphan_documents_removed += 1;
            report.stale_chunks_removed += removed;
        }
        Ok(())
    }

    /// 저장소 쓰기는 백오프와 함께 재시도
    async fn store_write<T, F, Fut>(&self, what: &str, op: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = Result<T>>,
    {
        with_retry(&self.retry, what, RagError::StoreUnavailable, op).await
    }
}

// ============================================================================
// Tests
// ============================================================================
