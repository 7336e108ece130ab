//! LanceDB Vector Store - 디스크 기반 벡터 검색
//!
//! 청크 텍스트, 메타데이터, 임베딩을 한 테이블에 저장하고
//! 코사인 거리로 최근접 이웃을 찾습니다.
//! ref: https://lancedb.github.io/lancedb/

use std::path::Path;
use std::sync::Arc;

use arrow_array::{
    Array, FixedSizeListArray, Float32Array, Int64Array, RecordBatch, RecordBatchIterator,
    StringArray,
};
use arrow_schema::{DataType, Field, Schema};
use async_trait::async_trait;
use futures::TryStreamExt;
use lancedb::connection::Connection;
use lancedb::query::{ExecutableQuery, QueryBase};
use lancedb::table::Table;
use lancedb::DistanceType;

use super::chunker::ChunkKind;
use super::vector::{Candidate, ChunkMetadata, StoredChunk, VectorEntry, VectorStore};
use crate::error::{RagError, Result};

/// 벡터 테이블 이름
const TABLE_NAME: &str = "chunks";

fn lance_err(context: &'static str) -> impl Fn(lancedb::Error) -> RagError {
    move |e| RagError::StoreUnavailable(format!("{}: {}", context, e))
}

fn corrupt(what: &str) -> RagError {
    RagError::StoreUnavailable(format!("Corrupt chunk table: {}", what))
}

// ============================================================================
// LanceVectorStore
// ============================================================================

/// LanceDB 벡터 저장소 구현
pub struct LanceVectorStore {
    db: Connection,
    dimension: i32,
}

impl LanceVectorStore {
    /// LanceDB 저장소 열기
    ///
    /// # Arguments
    /// * `path` - .lance 디렉토리 경로
    /// * `dimension` - 임베딩 차원 (현재 모델 기준)
    pub async fn open(path: &Path, dimension: usize) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.exists() {
                tokio::fs::create_dir_all(parent)
                    .await
                    .map_err(|e| RagError::io(parent, e))?;
            }
        }

        let path_str = path
            .to_str()
            .ok_or_else(|| RagError::Config(format!("Invalid path encoding: {:?}", path)))?;

        let db = lancedb::connect(path_str)
            .execute()
            .await
            .map_err(lance_err("Failed to connect to LanceDB"))?;

        let dimension = i32::try_from(dimension)
            .map_err(|_| RagError::Config(format!("Embedding dimension too large: {}", dimension)))?;

        Ok(Self { db, dimension })
    }

    /// 벡터 테이블 스키마
    fn create_schema(dimension: i32) -> Schema {
        Schema::new(vec![
            Field::new("id", DataType::Utf8, false),
            Field::new("source_path", DataType::Utf8, false),
            Field::new("position", DataType::Int64, false),
            Field::new("title", DataType::Utf8, true),
            Field::new("tags", DataType::Utf8, false),
            Field::new("kind", DataType::Utf8, false),
            Field::new("section_path", DataType::Utf8, false),
            Field::new("chunk_text", DataType::Utf8, false),
            Field::new(
                "embedding",
                DataType::FixedSizeList(
                    Arc::new(Field::new("item", DataType::Float32, true)),
                    dimension,
                ),
                false,
            ),
        ])
    }

    /// 엔트리들을 Arrow RecordBatch로 변환
    fn entries_to_batch(&self, entries: &[VectorEntry]) -> Result<RecordBatch> {
        for entry in entries {
            if entry.embedding.len() != self.dimension as usize {
                return Err(RagError::DimensionMismatch {
                    expected: self.dimension as usize,
                    actual: entry.embedding.len(),
                });
            }
        }

        let encode = |v: &Vec<String>| {
            serde_json::to_string(v).map_err(|e| corrupt(&format!("encode list: {}", e)))
        };

        let ids: Vec<&str> = entries.iter().map(|e| e.id.as_str()).collect();
        let paths: Vec<&str> = entries.iter().map(|e| e.metadata.source_path.as_str()).collect();
        let positions: Vec<i64> = entries.iter().map(|e| e.metadata.position as i64).collect();
        let titles: Vec<Option<&str>> = entries.iter().map(|e| e.metadata.title.as_deref()).collect();
        let tags = entries
            .iter()
            .map(|e| encode(&e.metadata.tags))
            .collect::<Result<Vec<_>>>()?;
        let kinds: Vec<&str> = entries.iter().map(|e| e.metadata.kind.as_str()).collect();
        let sections = entries
            .iter()
            .map(|e| encode(&e.metadata.section_path))
            .collect::<Result<Vec<_>>>()?;
        let texts: Vec<&str> = entries.iter().map(|e| e.text.as_str()).collect();

        let embeddings_flat: Vec<f32> = entries
            .iter()
            .flat_map(|e| e.embedding.iter().copied())
            .collect();

        let values = Float32Array::from(embeddings_flat);
        let field = Arc::new(Field::new("item", DataType::Float32, true));
        let embeddings_list = FixedSizeListArray::try_new(
            field,
            self.dimension,
            Arc::new(values) as Arc<dyn Array>,
            None,
        )
        .map_err(|e| corrupt(&format!("embedding array: {}", e)))?;

        RecordBatch::try_new(
            Arc::new(Self::create_schema(self.dimension)),
            vec![
                Arc::new(StringArray::from(ids)),
                Arc::new(StringArray::from(paths)),
                Arc::new(Int64Array::from(positions)),
                Arc::new(StringArray::from(titles)),
                Arc::new(StringArray::from(tags)),
                Arc::new(StringArray::from(kinds)),
                Arc::new(StringArray::from(sections)),
                Arc::new(StringArray::from(texts)),
                Arc::new(embeddings_list),
            ],
        )
        .map_err(|e| corrupt(&format!("record batch: {}", e)))
    }

    /// 테이블 열기 (아직 없으면 None)
    async fn table(&self) -> Result<Option<Table>> {
        let names = self
            .db
            .table_names()
            .execute()
            .await
            .map_err(lance_err("Failed to list tables"))?;

        if !names.iter().any(|n| n == TABLE_NAME) {
            return Ok(None);
        }

        self.db
            .open_table(TABLE_NAME)
            .execute()
            .await
            .map(Some)
            .map_err(lance_err("Failed to open table"))
    }

    async fn filtered(&self, filter: String) -> Result<Vec<StoredChunk>> {
        let Some(table) = self.table().await? else {
            return Ok(vec![]);
        };

        let batches: Vec<RecordBatch> = table
            .query()
            .only_if(filter)
            .execute()
            .await
            .map_err(lance_err("Failed to execute query"))?
            .try_collect()
            .await
            .map_err(lance_err("Failed to read query results"))?;

        let mut chunks = Vec::new();
        for batch in &batches {
            chunks.extend(batch_to_chunks(batch)?);
        }
        Ok(chunks)
    }
}

/// SQL 필터용 문자열 리터럴
fn quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}

fn string_column<'a>(batch: &'a RecordBatch, name: &str) -> Result<&'a StringArray> {
    batch
        .column_by_name(name)
        .and_then(|c| c.as_any().downcast_ref::<StringArray>())
        .ok_or_else(|| corrupt(&format!("missing {} column", name)))
}

/// RecordBatch 행을 청크로 변환
fn batch_to_chunks(batch: &RecordBatch) -> Result<Vec<StoredChunk>> {
    let ids = string_column(batch, "id")?;
    let paths = string_column(batch, "source_path")?;
    let titles = string_column(batch, "title")?;
    let tags = string_column(batch, "tags")?;
    let kinds = string_column(batch, "kind")?;
    let sections = string_column(batch, "section_path")?;
    let texts = string_column(batch, "chunk_text")?;
    let positions = batch
        .column_by_name("position")
        .and_then(|c| c.as_any().downcast_ref::<Int64Array>())
        .ok_or_else(|| corrupt("missing position column"))?;

    let decode = |s: &str| -> Result<Vec<String>> {
        serde_json::from_str(s).map_err(|e| corrupt(&format!("decode list: {}", e)))
    };

    (0..batch.num_rows())
        .map(|i| {
            let kind: ChunkKind = kinds.value(i).parse().map_err(|e: String| corrupt(&e))?;
            Ok(StoredChunk {
                id: ids.value(i).to_string(),
                text: texts.value(i).to_string(),
                metadata: ChunkMetadata {
                    source_path: paths.value(i).to_string(),
                    position: positions.value(i).max(0) as usize,
                    title: (!titles.is_null(i)).then(|| titles.value(i).to_string()),
                    tags: decode(tags.value(i))?,
                    section_path: decode(sections.value(i))?,
                    kind,
                },
            })
        })
        .collect()
}

#[async_trait]
impl VectorStore for LanceVectorStore {
    async fn upsert(&self, entries: &[VectorEntry]) -> Result<usize> {
        if entries.is_empty() {
            return Ok(0);
        }

        let batch = self.entries_to_batch(entries)?;
        let schema = batch.schema();
        let batches = RecordBatchIterator::new(vec![Ok(batch)], schema);

        match self.table().await? {
            Some(table) => {
                // 같은 ID는 갱신, 새 ID는 추가 (한 번의 커밋이라 실패 시 기존 행 유지)
                let mut merge = table.merge_insert(&["id"]);
                merge.when_matched_update_all(None).when_not_matched_insert_all();
                merge
                    .execute(Box::new(batches))
                    .await
                    .map_err(lance_err("Failed to upsert vectors"))?;
            }
            None => {
                self.db
                    .create_table(TABLE_NAME, batches)
                    .execute()
                    .await
                    .map_err(lance_err("Failed to create table"))?;
            }
        }

        Ok(entries.len())
    }

    async fn query(&self, embedding: &[f32], k: usize) -> Result<Vec<Candidate>> {
        if embedding.len() != self.dimension as usize {
            return Err(RagError::DimensionMismatch {
                expected: self.dimension as usize,
                actual: embedding.len(),
            });
        }

        let Some(table) = self.table().await? else {
            return Ok(vec![]);
        };

        let batches: Vec<RecordBatch> = table
            .vector_search(embedding.to_vec())
            .map_err(lance_err("Failed to create vector search"))?
            .distance_type(DistanceType::Cosine)
            .limit(k)
            .execute()
            .await
            .map_err(lance_err("Failed to execute vector search"))?
            .try_collect()
            .await
            .map_err(lance_err("Failed to read search results"))?;

        let mut candidates = Vec::new();
        for batch in &batches {
            // _distance 컬럼 (LanceDB가 자동 추가)
            let distances = batch
                .column_by_name("_distance")
                .and_then(|c| c.as_any().downcast_ref::<Float32Array>())
                .ok_or_else(|| corrupt("missing _distance column"))?;

            for (i, chunk) in batch_to_chunks(batch)?.into_iter().enumerate() {
                candidates.push(Candidate {
                    chunk_id: chunk.id,
                    distance: distances.value(i).max(0.0),
                    text: chunk.text,
                    metadata: chunk.metadata,
                });
            }
        }

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
        Ok(self
            .filtered(format!("id = {}", quote(id)))
            .await?
            .into_iter()
            .next())
    }

    async fn get_by_source_path(&self, source_path: &str) -> Result<Vec<StoredChunk>> {
        let mut chunks = self
            .filtered(format!("source_path = {}", quote(source_path)))
            .await?;
        chunks.sort_by_key(|c| c.metadata.position);
        Ok(chunks)
    }

    async fn delete(&self, ids: &[String]) -> Result<usize> {
        if ids.is_empty() {
            return Ok(0);
        }
        let Some(table) = self.table().await? else {
            return Ok(0);
        };

        let filter = format!(
            "id IN ({})",
            ids.iter().map(|id| quote(id)).collect::<Vec<_>>().join(", ")
        );

        let before = table
            .count_rows(Some(filter.clone()))
            .await
            .map_err(lance_err("Failed to count rows"))?;

        table
            .delete(&filter)
            .await
            .map_err(lance_err("Failed to delete vectors"))?;

        Ok(before)
    }

    async fn count(&self) -> Result<usize> {
        match self.table().await? {
            Some(table) => table
                .count_rows(None)
                .await
                .map_err(lance_err("Failed to count rows")),
            None => Ok(0),
        }
    }

    async fn clear(&self) -> Result<()> {
        if self.table().await?.is_some() {
            self.db
                .drop_table(TABLE_NAME)
                .await
                .map_err(lance_err("Failed to drop table"))?;
            tracing::info!("Dropped vector table {}", TABLE_NAME);
        }
        Ok(())
    }
}

// ============================================================================
// Tests
// ============================================================================
