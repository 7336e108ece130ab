//! 에러 타입
//!
//! 인덱싱/검색 파이프라인 전체에서 쓰는 에러 종류입니다.
//! 일시적 장애(재시도 대상)와 영구 실패를 구분합니다.

use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum RagError {
    /// 문서 파싱 실패 (문서 단위로 격리됨)
    #[error("failed to parse document {path}: {reason}")]
    Parse { path: String, reason: String },

    #[error("embedding service unavailable: {0}")]
    EmbeddingUnavailable(String),

    #[error("embedding input rejected: {0}")]
    EmbeddingInvalidInput(String),

    /// 인덱스와 질의가 서로 다른 임베딩 모델을 사용 (치명적)
    #[error(
        "embedding model mismatch: index was built with `{indexed}` but the active model is `{current}`"
    )]
    EmbeddingModelMismatch { indexed: String, current: String },

    #[error("embedding dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("vector store unavailable: {0}")]
    StoreUnavailable(String),

    #[error("index not ready: no index manifest found, run indexing first")]
    IndexNotReady,

    #[error("language model unavailable: {0}")]
    LlmUnavailable(String),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("I/O error on {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl RagError {
    /// 재시도하면 성공할 수 있는 일시적 장애인지 여부
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            RagError::EmbeddingUnavailable(_)
                | RagError::StoreUnavailable(_)
                | RagError::LlmUnavailable(_)
        )
    }

    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        RagError::Io {
            path: path.into(),
            source,
        }
    }
}

pub type Result<T> = std::result::Result<T, RagError>;
