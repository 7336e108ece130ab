//! 임베딩 모듈 - 텍스트 벡터화 게이트웨이
//!
//! 텍스트를 고정 차원 벡터로 변환하는 프로바이더 인터페이스입니다.
//! 인덱싱과 질의는 반드시 같은 모델(`model_id`)을 사용해야 합니다.
//!
//! ## 사용법
//! ```rust,ignore
//! let embedder = create_embedder(&config.embedding)?;
//! let embedding = embedder.embed("Hello, world!").await?;
//! ```

mod gemini;
mod ollama;

use std::sync::Arc;

use async_trait::async_trait;

use crate::config::{EmbeddingConfig, Provider};
use crate::error::{RagError, Result};

pub use gemini::GeminiEmbedding;
pub use ollama::OllamaEmbedding;

// ============================================================================
// EmbeddingProvider Trait
// ============================================================================

/// 임베딩 프로바이더 트레이트
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// 단일 텍스트 임베딩
    ///
    /// 빈 텍스트는 [`RagError::EmbeddingInvalidInput`]입니다.
    async fn embed(&self, text: &str) -> Result<Vec<f32>>;

    /// 배치 임베딩 (기본 구현: 순차 호출)
    ///
    /// 결과는 입력과 같은 순서이며 `embed`를 반복 호출한 것과 같아야 합니다.
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let mut results = Vec::with_capacity(texts.len());
        for text in texts {
            results.push(self.embed(text).await?);
        }
        Ok(results)
    }

    /// 임베딩 차원 수
    fn dimension(&self) -> usize;

    /// 모델 식별자 (`provider:model@dimension`) - 인덱스 매니페스트와 비교됨
    fn model_id(&self) -> String;
}

// ============================================================================
// Shared Helpers
// ============================================================================

/// 빈 입력 거부
pub(crate) fn validate_input(text: &str) -> Result<()> {
    if text.trim().is_empty() {
        return Err(RagError::EmbeddingInvalidInput(
            "cannot embed empty text".to_string(),
        ));
    }
    Ok(())
}

/// 응답 벡터 차원 확인
pub(crate) fn check_dimension(expected: usize, vector: Vec<f32>) -> Result<Vec<f32>> {
    if vector.len() != expected {
        return Err(RagError::DimensionMismatch {
            expected,
            actual: vector.len(),
        });
    }
    Ok(vector)
}

/// HTTP 상태 코드를 에러 종류로 분류
///
/// * 400/413/422 - 입력 문제 (재시도 안 함)
/// * 401/403/404 - 키/모델 설정 문제 (재시도 안 함)
/// * 그 외 (429, 5xx 등) - 일시적 장애
pub(crate) fn classify_status(status: u16, message: &str) -> RagError {
    match status {
        400 | 413 | 422 => RagError::EmbeddingInvalidInput(format!("HTTP {}: {}", status, message)),
        401 | 403 | 404 => RagError::Config(format!("embedding service HTTP {}: {}", status, message)),
        _ => RagError::EmbeddingUnavailable(format!("HTTP {}: {}", status, message)),
    }
}

/// 전송 실패 (연결 거부, 타임아웃 등)
pub(crate) fn transport_error(e: reqwest::Error) -> RagError {
    RagError::EmbeddingUnavailable(format!("request failed: {}", e))
}

// ============================================================================
// API Key Management
// ============================================================================

/// API 키 로드 (환경변수에서)
///
/// 우선순위:
/// 1. `GEMINI_API_KEY` 환경변수
/// 2. `GOOGLE_AI_API_KEY` 환경변수
pub fn get_api_key() -> Result<String> {
    for var in ["GEMINI_API_KEY", "GOOGLE_AI_API_KEY"] {
        if let Ok(key) = std::env::var(var) {
            if !key.is_empty() {
                tracing::debug!("Using API key from {}", var);
                return Ok(key);
            }
        }
    }

    Err(RagError::Config(
        "API key not found. Set GEMINI_API_KEY or GOOGLE_AI_API_KEY environment variable.\n\
         Get your API key at: https://aistudio.google.com/app/apikey"
            .to_string(),
    ))
}

/// API 키 존재 여부 확인
pub fn has_api_key() -> bool {
    get_api_key().is_ok()
}

// ============================================================================
// Factory Function
// ============================================================================

/// 설정에 맞는 임베딩 프로바이더 생성
pub fn create_embedder(config: &EmbeddingConfig) -> Result<Arc<dyn EmbeddingProvider>> {
    let embedder: Arc<dyn EmbeddingProvider> = match config.provider {
        Provider::Gemini => Arc::new(GeminiEmbedding::new(
            get_api_key()?,
            config.model.clone(),
            config.dimension,
        )?),
        Provider::Ollama => Arc::new(OllamaEmbedding::new(
            config.ollama_host.clone(),
            config.model.clone(),
            config.dimension,
        )?),
    };

    tracing::info!("Using embedding model {}", embedder.model_id());
    Ok(embedder)
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_input() {
        assert!(validate_input("hello").is_ok());
        assert!(matches!(
            validate_input(" \n\t"),
            Err(RagError::EmbeddingInvalidInput(_))
        ));
    }

    #[test]
    fn test_check_dimension() {
        assert_eq!(check_dimension(2, vec![0.1, 0.2]).unwrap().len(), 2);
        assert!(matches!(
            check_dimension(3, vec![0.1]),
            Err(RagError::DimensionMismatch { expected: 3, actual: 1 })
        ));
    }

    #[test]
    fn test_classify_status() {
        assert!(classify_status(429, "slow down").is_retryable());
        assert!(classify_status(503, "overloaded").is_retryable());
        assert!(matches!(
            classify_status(400, "bad"),
            RagError::EmbeddingInvalidInput(_)
        ));
        assert!(matches!(classify_status(403, "denied"), RagError::Config(_)));
    }

    #[test]
    fn test_create_ollama_embedder_needs_no_key() {
        let config = EmbeddingConfig {
            provider: Provider::Ollama,
            model: "bge-m3".to_string(),
            dimension: 1024,
            ollama_host: "http://localhost:11434".to_string(),
        };
        let embedder = create_embedder(&config).unwrap();
        assert_eq!(embedder.model_id(), config.model_id());
        assert_eq!(embedder.dimension(), 1024);
    }
}
