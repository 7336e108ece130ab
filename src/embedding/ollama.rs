//! Ollama 로컬 임베딩 (`/api/embed`)

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::{check_dimension, classify_status, transport_error, validate_input, EmbeddingProvider};
use crate::error::{RagError, Result};

/// Ollama 임베딩 구현체
#[derive(Debug)]
pub struct OllamaEmbedding {
    host: String,
    model: String,
    dimension: usize,
    client: reqwest::Client,
}

#[derive(Debug, Serialize)]
struct EmbedRequest<'a> {
    model: &'a str,
    input: &'a [String],
}

#[derive(Debug, Deserialize)]
struct EmbedResponse {
    #[serde(default)]
    embeddings: Vec<Vec<f32>>,
}

#[derive(Debug, Deserialize)]
struct OllamaError {
    error: String,
}

impl OllamaEmbedding {
    pub fn new(host: String, model: String, dimension: usize) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(120))
            .build()
            .map_err(|e| RagError::Config(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            host: host.trim_end_matches('/').to_string(),
            model,
            dimension,
            client,
        })
    }

    async fn request(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let url = format!("{}/api/embed", self.host);
        let response = self
            .client
            .post(&url)
            .json(&EmbedRequest {
                model: &self.model,
                input: texts,
            })
            .send()
            .await
            .map_err(transport_error)?;

        let status = response.status();
        let body = response.text().await.map_err(transport_error)?;

        if !status.is_success() {
            let message = serde_json::from_str::<OllamaError>(&body)
                .map(|e| e.error)
                .unwrap_or(body);
            return Err(classify_status(status.as_u16(), &message));
        }

        parse_response(&body, texts.len())?
            .into_iter()
            .map(|v| check_dimension(self.dimension, v))
            .collect()
    }
}

fn parse_response(body: &str, expected: usize) -> Result<Vec<Vec<f32>>> {
    let response: EmbedResponse = serde_json::from_str(body)
        .map_err(|e| RagError::EmbeddingUnavailable(format!("malformed embed response: {}", e)))?;

    if response.embeddings.len() != expected {
        return Err(RagError::EmbeddingUnavailable(format!(
            "embed response has {} vectors for {} inputs",
            response.embeddings.len(),
            expected
        )));
    }
    Ok(response.embeddings)
}

#[async_trait]
impl EmbeddingProvider for OllamaEmbedding {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        validate_input(text)?;
        let mut vectors = self.request(&[text.to_string()]).await?;
        vectors
            .pop()
            .ok_or_else(|| RagError::EmbeddingUnavailable("empty embed response".to_string()))
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(vec![]);
        }
        for text in texts {
            validate_input(text)?;
        }
        self.request(texts).await
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn model_id(&self) -> String {
        format!("ollama:{}@{}", self.model, self.dimension)
    }
}
