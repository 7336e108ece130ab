//! Ollama 로컬 채팅 (`/api/chat`, stream=false)

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::{classify_status, transport_error, LanguageModel};
use crate::error::{RagError, Result};

/// Ollama 채팅 모델
#[derive(Debug)]
pub struct OllamaChat {
    host: String,
    model: String,
    client: reqwest::Client,
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<Message<'a>>,
    stream: bool,
}

#[derive(Debug, Serialize)]
struct Message<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    message: ResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    #[serde(default)]
    content: String,
}

impl OllamaChat {
    pub fn new(host: String, model: String) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(300))
            .build()
            .map_err(|e| RagError::Config(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            host: host.trim_end_matches('/').to_string(),
            model,
            client,
        })
    }
}

fn parse_response(body: &str) -> Result<String> {
    serde_json::from_str::<ChatResponse>(body)
        .map(|r| r.message.content)
        .map_err(|e| RagError::LlmUnavailable(format!("malformed chat response: {}", e)))
}

#[async_trait]
impl LanguageModel for OllamaChat {
    async fn generate(&self, prompt: &str) -> Result<String> {
        let request = ChatRequest {
            model: &self.model,
            messages: vec![Message {
                role: "user",
                content: prompt,
            }],
            stream: false,
        };

        let response = self
            .client
            .post(format!("{}/api/chat", self.host))
            .json(&request)
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
        format!("ollama:{}", self.model)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_response() {
        let body = r#"{"model":"llama3.2","message":{"role":"assistant","content":"hi"},"done":true}"#;
        assert_eq!(parse_response(body).unwrap(), "hi");
        assert!(parse_response(r#"{"error":"model not found"}"#).is_err());
    }

    #[tokio::test]
    async fn test_unreachable_host_is_transient() {
        let chat = OllamaChat::new("http://127.0.0.1:9".into(), "llama3.2".into()).unwrap();
        let err = chat.generate("hello").await.unwrap_err();
        assert!(err.is_retryable());
    }
}
