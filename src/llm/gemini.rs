//! Gemini generateContent 클라이언트

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::{classify_status, transport_error, LanguageModel};
use crate::error::{RagError, Result};

const GEMINI_API_BASE: &str = "https://generativelanguage.googleapis.com/v1beta";

/// Gemini 채팅 모델
#[derive(Debug)]
pub struct GeminiChat {
    api_key: String,
    model: String,
    client: reqwest::Client,
}

impl GeminiChat {
    pub fn new(api_key: String, model: String) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(120))
            .build()
            .map_err(|e| RagError::Config(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            api_key,
            model,
            client,
        })
    }
}

// ============================================================================
// API Types
// ============================================================================

#[derive(Debug, Serialize)]
struct GenerateRequest {
    contents: Vec<Content>,
    #[serde(rename = "generationConfig")]
    generation_config: GenerationConfig,
}

#[derive(Debug, Serialize)]
struct Content {
    role: String,
    parts: Vec<Part>,
}

#[derive(Debug, Serialize, Deserialize)]
struct Part {
    #[serde(default)]
    text: String,
}

#[derive(Debug, Serialize)]
struct GenerationConfig {
    temperature: f32,
    #[serde(rename = "maxOutputTokens")]
    max_output_tokens: u32,
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: Option<CandidateContent>,
}

#[derive(Debug, Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<Part>,
}

fn build_request(prompt: &str) -> GenerateRequest {
    GenerateRequest {
        contents: vec![Content {
            role: "user".to_string(),
            parts: vec![Part {
                text: prompt.to_string(),
            }],
        }],
        generation_config: GenerationConfig {
            temperature: 0.1,
            max_output_tokens: 2048,
        },
    }
}

/// 첫 후보의 텍스트 파트를 이어붙임
fn parse_response(body: &str) -> Result<String> {
    let response: GenerateResponse = serde_json::from_str(body)
        .map_err(|e| RagError::LlmUnavailable(format!("malformed generate response: {}", e)))?;

    let text: String = response
        .candidates
        .into_iter()
        .next()
        .and_then(|c| c.content)
        .map(|c| c.parts.into_iter().map(|p| p.text).collect())
        .unwrap_or_default();

    if text.is_empty() {
        tracing::warn!("Gemini returned no text");
    }
    Ok(text)
}

#[async_trait]
impl LanguageModel for GeminiChat {
    async fn generate(&self, prompt: &str) -> Result<String> {
        let url = format!("{}/models/{}:generateContent", GEMINI_API_BASE, self.model);
        let response = self
            .client
            .post(&url)
            .header("x-goog-api-key", &self.api_key)
            .json(&build_request(prompt))
            .send()
            .await
            .map_err(transport_error)?;

        let status = response.status();
        let body = response.text().await.map_err(transport_error)?;

        if !status.is_success() {
            return Err(classify_status(status.as_u16(), &body));
        }
        parse_response(&body)
    }

    fn name(&self) -> String {
        format!("gemini:{}", self.model)
    }
}
