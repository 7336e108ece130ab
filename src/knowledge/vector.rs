//! Vector Store - 벡터 저장소 트레이트 및 유틸리티
//!
//! 인덱서(유일한 writer)와 검색 파이프라인(read-only)이 공유하는
//! 최근접 이웃 저장소 인터페이스입니다. 거리 값은 작을수록 유사합니다.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::chunker::{Chunk, ChunkKind};
use crate::error::Result;

// ============================================================================
// Types
// ============================================================================

/// 청크와 함께 저장되는 메타데이터
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkMetadata {
    pub source_path: String,
    pub position: usize,
    pub title: Option<String>,
    pub tags: Vec<String>,
    pub section_path: Vec<String>,
    pub kind: ChunkKind,
}

/// 벡터 엔트리 (저장용)
#[derive(Debug, Clone, PartialEq)]
pub struct VectorEntry {
    pub id: String,
    pub embedding: Vec<f32>,
    pub text: String,
    pub metadata: ChunkMetadata,
}

impl VectorEntry {
    pub fn from_chunk(chunk: &Chunk, embedding: Vec<f32>) -> Self {
        Self {
            id: chunk.id.clone(),
            embedding,
            text: chunk.text.clone(),
            metadata: ChunkMetadata {
                source_path: chunk.source_path.clone(),
                position: chunk.position,
                title: chunk.title.clone(),
                tags: chunk.tags.iter().cloned().collect(),
                section_path: chunk.section_path.clone(),
                kind: chunk.kind,
            },
        }
    }
}

/// 저장된 청크 (벡터 제외)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredChunk {
    pub id: String,
    pub text: String,
    pub metadata: ChunkMetadata,
}

/// 벡터 검색 후보 (질의 1회 동안만 유효)
#[derive(Debug, Clone, PartialEq)]
pub struct Candidate {
    pub chunk_id: String,
    /// 0 이상, 작을수록 유사 (코사인 거리)
    pub distance: f32,
    pub text: String,
    pub metadata: ChunkMetadata,
}

// ============================================================================
// VectorStore Trait
// ============================================================================

/// VectorStore 트레이트 (async)
#[async_trait]
pub trait VectorStore: Send + Sync {
    /// ID 기준 삽입 또는 교체
    async fn upsert(&self, entries: &[VectorEntry]) -> Result<usize>;

    /// 거리 오름차순 상위 `k`개
    async fn query(&self, embedding: &[f32], k: usize) -> Result<Vec<Candidate>>;

    async fn get_by_id(&self, id: &str) -> Result<Option<StoredChunk>>;

    /// 한 문서의 청크 전체 (위치 순)
    async fn get_by_source_path(&self, source_path: &str) -> Result<Vec<StoredChunk>>;

    /// ID 목록 삭제, 삭제된 개수 반환
    async fn delete(&self, ids: &[String]) -> Result<usize>;

    async fn count(&self) -> Result<usize>;

    /// 전체 삭제 (임베딩 모델 변경 시)
    async fn clear(&self) -> Result<()>;
}

// ============================================================================
// Utility Functions
// ============================================================================

/// 코사인 유사도 계산
///
/// 결과는 -1.0 ~ 1.0 범위이며, 길이가 다르거나 영벡터면 0.0입니다.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let dot_product: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();

    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }

    dot_product / (norm_a * norm_b)
}

/// 코사인 거리 (0.0 ~ 2.0)
pub fn cosine_distance(a: &[f32], b: &[f32]) -> f32 {
    (1.0 - cosine_similarity(a, b)).max(0.0)
}

// ============================================================================
// Tests
// ============================================================================
