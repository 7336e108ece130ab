//! LLM 모듈 - 리랭크/답변 생성용 언어 모델
//!
//! 프롬프트 하나를 받아 텍스트 하나를 돌려주는 최소 인터페이스입니다.

mod gemini;
mod ollama;

use std::sync::Arc;

use async_trait::async_trait;

use crate::config::{LlmConfig, Provider};
use crate::embedding::get_api_key;
use crate::error::{RagError, Result};

pub use gemini::GeminiChat;
pub use ollama::OllamaChat;

/// 언어 모델 트레이트
#[async_trait]
pub trait LanguageModel: Send + Sync {
    /// 프롬프트에 대한 응답 텍스트 생성
    async fn generate(&self, prompt: &str) -> Result<String>;

    /// 모델 이름
    fn name(&self) -> String;
}

/// HTTP 실패 분류 - 인증 문제만 설정 에러, 나머지는 일시적 장애
pub(crate) fn classify_status(status: u16, message: &str) -> RagError {
    match status {
        401 | 403 | 404 => RagError::Config(format!("language model HTTP {}: {}", status, message)),
        _ => RagError::LlmUnavailable(format!("HTTP {}: {}", status, message)),
    }
}

pub(crate) fn transport_error(e: reqwest::Error) -> RagError {
    RagError::LlmUnavailable(format!("request failed: {}", e))
}

/// 설정에 맞는 언어 모델 생성
pub fn create_language_model(config: &LlmConfig) -> Result<Arc<dyn LanguageModel>> {
    let model: Arc<dyn LanguageModel> = match config.provider {
        Provider::Gemini => Arc::new(GeminiChat::new(get_api_key()?, config.model.clone())?),
        Provider::Ollama => Arc::new(OllamaChat::new(
            config.ollama_host.clone(),
            config.model.clone(),
        )?),
    };

    tracing::info!("Using language model {}", model.name());
    Ok(model)
}
