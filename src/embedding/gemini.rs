//! Google Gemini 임베딩
//!
//! source: https://ai.google.dev/gemini-api/docs/embeddings

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use super::{check_dimension, classify_status, transport_error, validate_input, EmbeddingProvider};
use crate::error::{RagError, Result};

const GEMINI_API_BASE: &str = "https://generativelanguage.googleapis.com/v1beta";

/// 분당 요청 한도 (무료 티어). batchEmbedContents 한 번도 1 요청으로 셈
const REQUESTS_PER_MINUTE: usize = 60;
/// 연속 요청 간 최소 간격
const MIN_SPACING: Duration = Duration::from_millis(1000);
/// batchEmbedContents 요청 1회당 최대 항목 수
const MAX_BATCH: usize = 100;

/// Google Gemini 임베딩 구현체
#[derive(Debug)]
pub struct GeminiEmbedding {
    api_key: String,
    model: String,
    client: reqwest::Client,
    dimension: usize,
    pacer: Arc<Mutex<RequestPacer>>,
}

/// 요청 페이서
///
/// 최근 1분 동안 보낸 요청 시각을 기억해 한도를 넘기 전에 쉬고,
/// 배치 색인 중 연속 요청 사이에 최소 간격을 둡니다.
#[derive(Debug)]
struct RequestPacer {
    sent: VecDeque<Instant>,
    per_minute: usize,
    spacing: Duration,
}

impl RequestPacer {
    fn new(per_minute: usize, spacing: Duration) -> Self {
        Self {
            sent: VecDeque::new(),
            per_minute: per_minute.max(1),
            spacing,
        }
    }

    /// 다음 요청을 보내도 될 때까지 대기 (대기한 시간 반환)
    async fn wait_turn(&mut self) -> Duration {
        let started = Instant::now();
        let wait = self.delay_at(started);
        if !wait.is_zero() {
            tracing::debug!("Pacing Gemini requests: waiting {:?}", wait);
            tokio::time::sleep(wait).await;
        }

        let now = Instant::now();
        self.sent.push_back(now);
        now.duration_since(started)
    }

    fn delay_at(&mut self, now: Instant) -> Duration {
        while let Some(&first) = self.sent.front() {
            if now.duration_since(first) >= Duration::from_secs(60) {
                self.sent.pop_front();
            } else {
                break;
            }
        }

        let spacing = self
            .sent
            .back()
            .map(|&last| self.spacing.saturating_sub(now.duration_since(last)))
            .unwrap_or_default();

        let quota = if self.sent.len() >= self.per_minute {
            self.sent
                .front()
                .map(|&first| Duration::from_secs(60).saturating_sub(now.duration_since(first)))
                .unwrap_or_default()
        } else {
            Duration::ZERO
        };

        spacing.max(quota)
    }
}

impl GeminiEmbedding {
    /// # Arguments
    /// * `api_key` - Google AI API 키
    /// * `model` - 임베딩 모델 (예: gemini-embedding-001)
    /// * `dimension` - 임베딩 차원 (768, 1536, 3072 중 선택)
    pub fn new(api_key: String, model: String, dimension: usize) -> Result<Self> {
        if ![768, 1536, 3072].contains(&dimension) {
            return Err(RagError::Config(format!(
                "Invalid dimension: {}. Must be 768, 1536, or 3072",
                dimension
            )));
        }

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(60))
            .build()
            .map_err(|e| RagError::Config(format!("Failed to create HTTP client: {}", e)))?;

        let pacer = Arc::new(Mutex::new(RequestPacer::new(REQUESTS_PER_MINUTE, MIN_SPACING)));

        Ok(Self {
            api_key,
            model,
            client,
            dimension,
            pacer,
        })
    }

    fn request_for(&self, text: &str) -> EmbedRequest {
        EmbedRequest {
            model: format!("models/{}", self.model),
            content: EmbedContent {
                parts: vec![EmbedPart {
                    text: text.to_string(),
                }],
            },
            task_type: "RETRIEVAL_DOCUMENT".to_string(),
            output_dimensionality: Some(self.dimension),
        }
    }

    /// API 호출 1회 (재시도는 호출자 몫)
    async fn post<Req: Serialize + Sync>(&self, method: &str, request: &Req) -> Result<String> {
        self.pacer.lock().await.wait_turn().await;

        // API 키는 URL이 아닌 헤더로 전송
        let url = format!("{}/models/{}:{}", GEMINI_API_BASE, self.model, method);
        let response = self
            .client
            .post(&url)
            .header("x-goog-api-key", &self.api_key)
            .json(request)
            .send()
            .await
            .map_err(transport_error)?;

        let status = response.status();
        let body = response.text().await.map_err(transport_error)?;

        if status.is_success() {
            return Ok(body);
        }

        let message = serde_json::from_str::<GeminiError>(&body)
            .map(|e| format!("{} {}", e.error.status, e.error.message))
            .unwrap_or(body);
        if status.as_u16() == 429 {
            tracing::warn!("Rate limit hit (429) on {}", method);
        }
        Err(classify_status(status.as_u16(), &message))
    }
}

// ============================================================================
// API Types
// ============================================================================

/// Gemini API 요청 본문
#[derive(Debug, Serialize)]
struct EmbedRequest {
    model: String,
    content: EmbedContent,
    #[serde(rename = "taskType")]
    task_type: String,
    #[serde(rename = "outputDimensionality", skip_serializing_if = "Option::is_none")]
    output_dimensionality: Option<usize>,
}

#[derive(Debug, Serialize)]
struct EmbedContent {
    parts: Vec<EmbedPart>,
}

#[derive(Debug, Serialize)]
struct EmbedPart {
    text: String,
}

#[derive(Debug, Serialize)]
struct BatchEmbedRequest {
    requests: Vec<EmbedRequest>,
}

/// Gemini API 응답
#[derive(Debug, Deserialize)]
struct EmbedResponse {
    embedding: EmbeddingValues,
}

#[derive(Debug, Deserialize)]
struct BatchEmbedResponse {
    #[serde(default)]
    embeddings: Vec<EmbeddingValues>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingValues {
    values: Vec<f32>,
}

/// Gemini API 에러 응답
#[derive(Debug, Deserialize)]
struct GeminiError {
    error: GeminiErrorDetail,
}

#[derive(Debug, Deserialize)]
struct GeminiErrorDetail {
    message: String,
    #[serde(default)]
    status: String,
}

fn parse_single(body: &str) -> Result<Vec<f32>> {
    serde_json::from_str::<EmbedResponse>(body)
        .map(|r| r.embedding.values)
        .map_err(|e| RagError::EmbeddingUnavailable(format!("malformed embedding response: {}", e)))
}

fn parse_batch(body: &str, expected: usize) -> Result<Vec<Vec<f32>>> {
    let response: BatchEmbedResponse = serde_json::from_str(body).map_err(|e| {
        RagError::EmbeddingUnavailable(format!("malformed batch embedding response: {}", e))
    })?;

    if response.embeddings.len() != expected {
        return Err(RagError::EmbeddingUnavailable(format!(
            "batch response has {} embeddings for {} inputs",
            response.embeddings.len(),
            expected
        )));
    }
    Ok(response.embeddings.into_iter().map(|e| e.values).collect())
}

#[async_trait]
impl EmbeddingProvider for GeminiEmbedding {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        validate_input(text)?;
        let body = self.post("embedContent", &self.request_for(text)).await?;
        check_dimension(self.dimension, parse_single(&body)?)
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        for text in texts {
            validate_input(text)?;
        }

        let mut results = Vec::with_capacity(texts.len());
        for (i, group) in texts.chunks(MAX_BATCH).enumerate() {
            tracing::debug!("Embedding batch {} ({} texts)", i + 1, group.len());
            let request = BatchEmbedRequest {
                requests: group.iter().map(|t| self.request_for(t)).collect(),
            };
            let body = self.post("batchEmbedContents", &request).await?;
            for vector in parse_batch(&body, group.len())? {
                results.push(check_dimension(self.dimension, vector)?);
            }
        }
        Ok(results)
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn model_id(&self) -> String {
        format!("gemini:{}@{}", self.model, self.dimension)
    }
}

// ============================================================================
// Tests
// ============================================================================
