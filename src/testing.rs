//! 테스트 전용 협력 객체
//!
//! 네트워크 없이 인덱싱/검색 파이프라인을 돌리기 위한 결정적 임베딩과
//! 스크립트 LLM입니다.

use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;

use crate::embedding::EmbeddingProvider;
use crate::error::{RagError, Result};
use crate::knowledge::{Candidate, InMemoryVectorStore, StoredChunk, VectorEntry, VectorStore};
use crate::llm::LanguageModel;
use crate::retry::RetryPolicy;

/// 단어 빈도 기반 결정적 임베딩
///
/// 어휘 목록의 각 단어가 한 차원입니다. 끝의 `s`는 떼고 비교합니다.
/// `fail_marker`가 포함된 텍스트는 잘못된 입력으로 거부합니다.
pub struct FakeEmbedding {
    vocabulary: Vec<&'static str>,
    model: String,
    fail_marker: Option<&'static str>,
    pub calls: AtomicUsize,
}

pub const VOCABULARY: &[&str] = &["cat", "dog", "pet", "great", "tell", "about"];

impl FakeEmbedding {
    pub fn new() -> Self {
        Self {
            vocabulary: VOCABULARY.to_vec(),
            model: "fake:vocab".to_string(),
            fail_marker: None,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn with_model(mut self, model: &str) -> Self {
        self.model = model.to_string();
        self
    }

    pub fn failing_on(mut self, marker: &'static str) -> Self {
        self.fail_marker = Some(marker);
        self
    }

    pub fn vector(&self, text: &str) -> Vec<f32> {
        let mut v = vec![0.0; self.vocabulary.len()];
        for word in text.split(|c: char| !c.is_alphanumeric()) {
            let word = word.to_lowercase();
            let word = word.strip_suffix('s').unwrap_or(&word);
            if let Some(i) = self.vocabulary.iter().position(|w| *w == word) {
                v[i] += 1.0;
            }
        }
        v
    }
}

#[async_trait]
impl EmbeddingProvider for FakeEmbedding {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        crate::embedding::validate_input(text)?;
        if let Some(marker) = self.fail_marker {
            if text.contains(marker) {
                return Err(RagError::EmbeddingInvalidInput(format!("refused: {}", marker)));
            }
        }
        Ok(self.vector(text))
    }

    fn dimension(&self) -> usize {
        self.vocabulary.len()
    }

    fn model_id(&self) -> String {
        format!("{}@{}", self.model, self.vocabulary.len())
    }
}

/// 리랭크 응답 스크립트
pub enum RerankScript {
    /// 제시된 첫 번째 후보 ID 반환
    FirstCandidate,
    /// 고정 응답
    Fixed(String),
    /// LLM 장애
    Unavailable,
}

/// 프롬프트 종류에 따라 정해진 응답을 돌려주는 LLM
///
/// 답변 프롬프트에는 `<NOTE>` 블록 안의 문서 텍스트를 그대로 돌려줍니다.
pub struct ScriptedLlm {
    rerank: RerankScript,
    pub rerank_calls: AtomicUsize,
    pub answer_calls: AtomicUsize,
    pub prompts: Mutex<Vec<String>>,
}

impl ScriptedLlm {
    pub fn new(rerank: RerankScript) -> Self {
        Self {
            rerank,
            rerank_calls: AtomicUsize::new(0),
            answer_calls: AtomicUsize::new(0),
            prompts: Mutex::new(Vec::new()),
        }
    }

    pub fn total_calls(&self) -> usize {
        self.rerank_calls.load(Ordering::SeqCst) + self.answer_calls.load(Ordering::SeqCst)
    }
}

fn between<'a>(text: &'a str, open: &str, close: &str) -> Option<&'a str> {
    let start = text.find(open)? + open.len();
    let end = start + text[start..].find(close)?;
    Some(&text[start..end])
}

#[async_trait]
impl LanguageModel for ScriptedLlm {
    async fn generate(&self, prompt: &str) -> Result<String> {
        if let Ok(mut prompts) = self.prompts.lock() {
            prompts.push(prompt.to_string());
        }

        if let Some(candidates) = between(prompt, "<CANDIDATES>", "</CANDIDATES>") {
            self.rerank_calls.fetch_add(1, Ordering::SeqCst);
            return match &self.rerank {
                RerankScript::FirstCandidate => {
                    let list: Vec<serde_json::Value> = serde_json::from_str(candidates.trim())
                        .map_err(|e| RagError::LlmUnavailable(e.to_string()))?;
                    let id = list
                        .first()
                        .and_then(|c| c["id"].as_str())
                        .unwrap_or_default();
                    Ok(format!("{{\"id\": \"{}\"}}", id))
                }
                RerankScript::Fixed(response) => Ok(response.clone()),
                RerankScript::Unavailable => {
                    Err(RagError::LlmUnavailable("scripted outage".to_string()))
                }
            };
        }

        self.answer_calls.fetch_add(1, Ordering::SeqCst);
        let note = between(prompt, "\">\n", "\n</NOTE>").unwrap_or_default();
        Ok(note.to_string())
    }

    fn name(&self) -> String {
        "scripted".to_string()
    }
}

/// 장애를 흉내 내는 벡터 저장소
///
/// 내부는 [`InMemoryVectorStore`]이고, 지정한 횟수만큼 일시 장애를 내거나
/// 특정 노트의 upsert를 계속 거부합니다. 실패한 호출은 내부 상태를 바꾸지 않습니다.
pub struct FlakyVectorStore {
    pub inner: InMemoryVectorStore,
    upsert_failures: AtomicUsize,
    query_failures: AtomicUsize,
    broken_path: Mutex<Option<String>>,
    pub upsert_calls: AtomicUsize,
    pub query_calls: AtomicUsize,
}

impl FlakyVectorStore {
    pub fn new() -> Self {
        Self {
            inner: InMemoryVectorStore::new(),
            upsert_failures: AtomicUsize::new(0),
            query_failures: AtomicUsize::new(0),
            broken_path: Mutex::new(None),
            upsert_calls: AtomicUsize::new(0),
            query_calls: AtomicUsize::new(0),
        }
    }

    /// 이후 이 노트의 청크가 포함된 upsert는 항상 실패
    pub fn reject_upserts_for(&self, path: &str) {
        if let Ok(mut broken) = self.broken_path.lock() {
            *broken = Some(path.to_string());
        }
    }

    pub fn fail_next_upserts(&self, n: usize) {
        self.upsert_failures.store(n, Ordering::SeqCst);
    }

    pub fn fail_next_queries(&self, n: usize) {
        self.query_failures.store(n, Ordering::SeqCst);
    }

    fn take(counter: &AtomicUsize) -> bool {
        counter
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

#[async_trait]
impl VectorStore for FlakyVectorStore {
    async fn upsert(&self, entries: &[VectorEntry]) -> Result<usize> {
        self.upsert_calls.fetch_add(1, Ordering::SeqCst);
        if Self::take(&self.upsert_failures) {
            return Err(RagError::StoreUnavailable("transient upsert failure".to_string()));
        }
        let broken = self.broken_path.lock().ok().and_then(|b| b.clone());
        if let Some(broken) = broken {
            if entries.iter().any(|e| e.metadata.source_path == broken) {
                return Err(RagError::StoreUnavailable(format!("cannot write {}", broken)));
            }
        }
        self.inner.upsert(entries).await
    }

    async fn query(&self, embedding: &[f32], k: usize) -> Result<Vec<Candidate>> {
        self.query_calls.fetch_add(1, Ordering::SeqCst);
        if Self::take(&self.query_failures) {
            return Err(RagError::StoreUnavailable("vector table locked".to_string()));
        }
        self.inner.query(embedding, k).await
    }

    async fn get_by_id(&self, id: &str) -> Result<Option<StoredChunk>> {
        self.inner.get_by_id(id).await
    }

    async fn get_by_source_path(&self, source_path: &str) -> Result<Vec<StoredChunk>> {
        self.inner.get_by_source_path(source_path).await
    }

    async fn delete(&self, ids: &[String]) -> Result<usize> {
        self.inner.delete(ids).await
    }

    async fn count(&self) -> Result<usize> {
        self.inner.count().await
    }

    async fn clear(&self) -> Result<()> {
        self.inner.clear().await
    }
}

/// 백오프 없는 재시도 정책
pub fn fast_retry() -> RetryPolicy {
    RetryPolicy {
        max_retries: 1,
        initial_backoff: Duration::from_millis(1),
        timeout: Duration::from_secs(5),
    }
}

/// 노트 파일 작성 (상위 디렉토리 생성)
pub fn write_note(root: &Path, rel: &str, content: &str) {
    let path = root.join(rel);
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).unwrap();
    }
    std::fs::write(path, content).unwrap();
}
