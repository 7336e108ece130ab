//! 설정 모듈
//!
//! 기본값 위에 환경변수를 덮어써 [`RagConfig`]를 만듭니다.
//! CLI 플래그는 이후 개별 값을 다시 덮어씁니다.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::error::{RagError, Result};
use crate::knowledge::{get_data_dir, ChunkConfig};
use crate::retry::RetryPolicy;

pub const DEFAULT_OLLAMA_HOST: &str = "http://localhost:11434";

// ============================================================================
// Provider Selection
// ============================================================================

/// 외부 모델 프로바이더
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Provider {
    Gemini,
    Ollama,
}

impl Provider {
    pub fn as_str(&self) -> &'static str {
        match self {
            Provider::Gemini => "gemini",
            Provider::Ollama => "ollama",
        }
    }
}

impl FromStr for Provider {
    type Err = RagError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "gemini" | "google" => Ok(Provider::Gemini),
            "ollama" => Ok(Provider::Ollama),
            other => Err(RagError::Config(format!(
                "unknown provider `{}` (expected gemini or ollama)",
                other
            ))),
        }
    }
}

// ============================================================================
// Sub-configs
// ============================================================================

/// 임베딩 게이트웨이 설정
#[derive(Debug, Clone, PartialEq)]
pub struct EmbeddingConfig {
    pub provider: Provider,
    pub model: String,
    pub dimension: usize,
    pub ollama_host: String,
}

impl EmbeddingConfig {
    /// 매니페스트에 기록되는 모델 식별자 (`provider:model@dimension`)
    pub fn model_id(&self) -> String {
        format!("{}:{}@{}", self.provider.as_str(), self.model, self.dimension)
    }
}

/// 답변/리랭크 LLM 설정
#[derive(Debug, Clone, PartialEq)]
pub struct LlmConfig {
    pub provider: Provider,
    pub model: String,
    pub ollama_host: String,
}

/// 인덱서 설정
#[derive(Debug, Clone, PartialEq)]
pub struct IndexConfig {
    /// 동시에 처리할 문서 수
    pub workers: usize,
    /// 임베딩 요청 1회당 청크 수
    pub batch_size: usize,
    /// 사라진 문서/청크 정리 여부
    pub prune_orphans: bool,
    pub respect_gitignore: bool,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            workers: 4,
            batch_size: 32,
            prune_orphans: true,
            respect_gitignore: false,
        }
    }
}

/// 검색 파이프라인 설정
#[derive(Debug, Clone, PartialEq)]
pub struct RetrievalConfig {
    pub top_k: usize,
    /// 코사인 거리 임계값 - 최상위 후보가 이보다 멀면 답변하지 않음
    pub max_distance: f32,
    pub rerank_enabled: bool,
    /// 리랭크 프롬프트에 넣는 후보별 최대 문자 수
    pub rerank_snippet_chars: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            top_k: 8,
            max_distance: 0.65,
            rerank_enabled: true,
            rerank_snippet_chars: 600,
        }
    }
}

impl RetrievalConfig {
    /// 후보 수와 임계값 검사 (CLI 덮어쓰기 후에도 호출)
    pub fn validate(&self) -> Result<()> {
        if self.top_k == 0 {
            return Err(RagError::Config("top_k must be at least 1".to_string()));
        }
        if !self.max_distance.is_finite() || self.max_distance < 0.0 {
            return Err(RagError::Config(format!(
                "max_distance must be a non-negative number, got {}",
                self.max_distance
            )));
        }
        Ok(())
    }
}

// ============================================================================
// RagConfig
// ============================================================================

/// 전체 설정
#[derive(Debug, Clone)]
pub struct RagConfig {
    pub notes_dir: PathBuf,
    pub data_dir: PathBuf,
    pub embedding: EmbeddingConfig,
    pub llm: LlmConfig,
    pub chunk: ChunkConfig,
    pub index: IndexConfig,
    pub retrieval: RetrievalConfig,
    pub retry: RetryPolicy,
}

impl RagConfig {
    /// 환경변수에서 설정 로드
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// 임의의 키-값 조회 함수에서 설정 로드
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let ollama_host = get("OLLAMA_HOST")
            .map(|h| h.trim_end_matches('/').to_string())
            .unwrap_or_else(|| DEFAULT_OLLAMA_HOST.to_string());

        let embedding_provider = match get("NOTES_RAG_EMBEDDING_PROVIDER") {
            Some(p) => p.parse()?,
            None => Provider::Gemini,
        };
        let (default_model, default_dimension) = match embedding_provider {
            Provider::Gemini => ("gemini-embedding-001", 768),
            Provider::Ollama => ("bge-m3", 1024),
        };
        let embedding = EmbeddingConfig {
            provider: embedding_provider,
            model: get("NOTES_RAG_EMBEDDING_MODEL").unwrap_or_else(|| default_model.to_string()),
            dimension: parse_or(&get, "NOTES_RAG_EMBEDDING_DIMENSION", default_dimension)?,
            ollama_host: ollama_host.clone(),
        };
        if embedding.dimension == 0 {
            return Err(RagError::Config(
                "NOTES_RAG_EMBEDDING_DIMENSION must be positive".to_string(),
            ));
        }

        let llm_provider = match get("NOTES_RAG_LLM_PROVIDER") {
            Some(p) => p.parse()?,
            None => Provider::Gemini,
        };
        let llm = LlmConfig {
            provider: llm_provider,
            model: get("NOTES_RAG_LLM_MODEL").unwrap_or_else(|| {
                match llm_provider {
                    Provider::Gemini => "gemini-2.0-flash",
                    Provider::Ollama => "llama3.2",
                }
                .to_string()
            }),
            ollama_host,
        };

        let defaults = ChunkConfig::default();
        let chunk = ChunkConfig {
            max_characters: parse_or(&get, "NOTES_RAG_MAX_CHUNK_CHARS", defaults.max_characters)?,
            window_characters: parse_or(&get, "NOTES_RAG_WINDOW_CHARS", defaults.window_characters)?,
            overlap_characters: parse_or(
                &get,
                "NOTES_RAG_OVERLAP_CHARS",
                defaults.overlap_characters,
            )?,
        };
        if chunk.overlap_characters >= chunk.window_characters {
            return Err(RagError::Config(format!(
                "overlap ({}) must be smaller than window ({})",
                chunk.overlap_characters, chunk.window_characters
            )));
        }

        let index_defaults = IndexConfig::default();
        let index = IndexConfig {
            workers: parse_or(&get, "NOTES_RAG_WORKERS", index_defaults.workers)?.max(1),
            ..index_defaults
        };

        let retrieval_defaults = RetrievalConfig::default();
        let retrieval = RetrievalConfig {
            top_k: parse_or(&get, "NOTES_RAG_TOP_K", retrieval_defaults.top_k)?,
            max_distance: parse_or(&get, "NOTES_RAG_MAX_DISTANCE", retrieval_defaults.max_distance)?,
            ..retrieval_defaults
        };
        retrieval.validate()?;

        let retry_defaults = RetryPolicy::default();
        let retry = RetryPolicy {
            max_retries: parse_or(&get, "NOTES_RAG_MAX_RETRIES", retry_defaults.max_retries)?,
            timeout: Duration::from_secs(parse_or(
                &get,
                "NOTES_RAG_TIMEOUT_SECS",
                retry_defaults.timeout.as_secs(),
            )?),
            ..retry_defaults
        };

        Ok(Self {
            notes_dir: get("NOTES_PATH")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("./notes")),
            data_dir: get("NOTES_RAG_DATA_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(get_data_dir),
            embedding,
            llm,
            chunk,
            index,
            retrieval,
            retry,
        })
    }

    /// LanceDB 디렉토리
    pub fn lance_path(&self) -> PathBuf {
        self.data_dir.join("vectors.lance")
    }
}

fn parse_or<T, G>(get: &G, key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
    G: Fn(&str) -> Option<String>,
{
    match get(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|e| RagError::Config(format!("{}={:?}: {}", key, raw, e))),
        None => Ok(default),
    }
}
