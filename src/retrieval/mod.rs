//! Retrieval Pipeline - 질문에서 답변까지
//!
//! ```text
//! Embed → Search → {NoMatch*, Gate} → {LowConfidence*, Rerank} → DocumentFetch → AnswerGeneration*
//! ```
//!
//! 저장소는 읽기 전용으로만 사용하며, 질의별 상태는 모두 지역 변수입니다.
//! 따라서 하나의 파이프라인으로 여러 질의를 동시에 처리할 수 있습니다.

pub mod prompt;

use std::sync::Arc;

use serde::Serialize;

use crate::config::RetrievalConfig;
use crate::embedding::EmbeddingProvider;
use crate::error::{RagError, Result};
use crate::knowledge::{Candidate, IndexManifest, NoteStore, VectorStore};
use crate::llm::LanguageModel;
use crate::notes::Document;
use crate::retry::{with_retry, RetryPolicy};

// ============================================================================
// Types
// ============================================================================

/// 신뢰도 판정
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum ConfidenceState {
    /// 인덱스가 비어 후보가 없음
    NoMatch,
    /// 최상위 후보가 임계값보다 멂
    LowConfidence { best_distance: f32, threshold: f32 },
    Confident { best_distance: f32 },
}

/// 리랭크 폴백 사유
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RerankFallback {
    /// 응답 형식을 해석할 수 없음
    Unparseable,
    /// 제시되지 않은 ID
    UnknownId,
    /// 모델이 관련 후보 없음으로 응답
    Declined,
    /// 재시도 후에도 LLM 호출 실패
    LlmUnavailable,
    /// 리랭크 비활성화
    Disabled,
}

/// 리랭크 결과
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "decision", rename_all = "snake_case")]
pub enum RerankDecision {
    Selected { chunk_id: String },
    /// 최소 거리 후보로 대체
    Fallback { chunk_id: String, reason: RerankFallback },
}

impl RerankDecision {
    pub fn chunk_id(&self) -> &str {
        match self {
            RerankDecision::Selected { chunk_id } | RerankDecision::Fallback { chunk_id, .. } => {
                chunk_id
            }
        }
    }
}

/// 선택된 문서
#[derive(Debug, Clone, PartialEq)]
pub struct SelectedDocument {
    pub document: Document,
    /// 선택 근거가 된 청크
    pub chunk_id: String,
    pub distance: f32,
}

/// 질의 결과
#[derive(Debug, Clone)]
pub struct QueryResult {
    pub confidence_state: ConfidenceState,
    pub selected_document: Option<SelectedDocument>,
    pub answer_text: Option<String>,
    pub rerank: Option<RerankDecision>,
    pub candidates: Vec<Candidate>,
}

impl QueryResult {
    fn without_answer(confidence_state: ConfidenceState, candidates: Vec<Candidate>) -> Self {
        Self {
            confidence_state,
            selected_document: None,
            answer_text: None,
            rerank: None,
            candidates,
        }
    }
}

// ============================================================================
// Retriever
// ============================================================================

/// 검색 단계 (LLM 없이 임베딩 + 벡터 저장소만 사용)
///
/// `search`처럼 답변이 필요 없는 경로는 이것만으로 충분합니다.
pub struct Retriever {
    embedder: Arc<dyn EmbeddingProvider>,
    vectors: Arc<dyn VectorStore>,
    notes: Arc<NoteStore>,
    retry: RetryPolicy,
}

impl Retriever {
    pub fn new(
        embedder: Arc<dyn EmbeddingProvider>,
        vectors: Arc<dyn VectorStore>,
        notes: Arc<NoteStore>,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            embedder,
            vectors,
            notes,
            retry,
        }
    }

    /// 인덱스가 현재 임베딩 모델로 만들어졌는지 확인
    pub fn ensure_compatible(&self) -> Result<IndexManifest> {
        let manifest = self.notes.manifest()?.ok_or(RagError::IndexNotReady)?;
        let current = self.embedder.model_id();
        if manifest.embedding_model != current {
            return Err(RagError::EmbeddingModelMismatch {
                indexed: manifest.embedding_model,
                current,
            });
        }
        Ok(manifest)
    }

    /// 질문과 가까운 청크 상위 `k`개
    pub async fn retrieve(&self, question: &str, k: usize) -> Result<Vec<Candidate>> {
        if k == 0 {
            return Err(RagError::Config("top_k must be at least 1".to_string()));
        }
        self.ensure_compatible()?;

        let embedding = with_retry(&self.retry, "question embedding", RagError::EmbeddingUnavailable, || {
            self.embedder.embed(question)
        })
        .await?;

        // 질의 시 저장소 오류는 재시도 없이 바로 반환
        let candidates = self.vectors.query(&embedding, k).await?;
        tracing::debug!(
            "Search returned {} candidates (best distance: {:?})",
            candidates.len(),
            candidates.first().map(|c| c.distance)
        );
        Ok(candidates)
    }

    /// 후보가 속한 문서 전체 로드
    ///
    /// 스냅샷이 없으면 저장된 청크를 위치 순으로 이어 붙여 복원합니다.
    pub async fn fetch_document(&self, candidate: &Candidate) -> Result<Document> {
        let path = &candidate.metadata.source_path;
        if let Some(stored) = self.notes.get_document(path)? {
            return Ok(stored.document);
        }

        tracing::warn!("No snapshot for {}, rebuilding from stored chunks", path);
        let chunks = self.vectors.get_by_source_path(path).await?;
        let body = if chunks.is_empty() {
            candidate.text.clone()
        } else {
            chunks
                .iter()
                .map(|c| c.text.as_str())
                .collect::<Vec<_>>()
                .join("\n\n")
        };

        Ok(Document {
            path: path.clone(),
            title: candidate.metadata.title.clone(),
            tags: candidate.metadata.tags.iter().cloned().collect(),
            body,
        })
    }
}

// ============================================================================
// RetrievalPipeline
// ============================================================================

pub struct RetrievalPipeline {
    retriever: Retriever,
    llm: Arc<dyn LanguageModel>,
    config: RetrievalConfig,
    retry: RetryPolicy,
}

impl RetrievalPipeline {
    pub fn new(
        embedder: Arc<dyn EmbeddingProvider>,
        vectors: Arc<dyn VectorStore>,
        notes: Arc<NoteStore>,
        llm: Arc<dyn LanguageModel>,
        config: RetrievalConfig,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            retriever: Retriever::new(embedder, vectors, notes, retry.clone()),
            llm,
            config,
            retry,
        }
    }

    pub fn ensure_compatible(&self) -> Result<IndexManifest> {
        self.retriever.ensure_compatible()
    }

    pub async fn retrieve(&self, question: &str, k: usize) -> Result<Vec<Candidate>> {
        self.retriever.retrieve(question, k).await
    }

    pub async fn fetch_document(&self, candidate: &Candidate) -> Result<Document> {
        self.retriever.fetch_document(candidate).await
    }

    /// 질문 하나를 끝까지 처리
    pub async fn ask(&self, question: &str) -> Result<QueryResult> {
        let candidates = self.retrieve(question, self.config.top_k).await?;

        let Some(best) = candidates.first() else {
            tracing::info!("No candidates: index is empty");
            return Ok(QueryResult::without_answer(ConfidenceState::NoMatch, candidates));
        };

        let best_distance = best.distance;
        if best_distance > self.config.max_distance {
            tracing::info!(
                "Best distance {:.3} exceeds threshold {:.3}",
                best_distance,
                self.config.max_distance
            );
            return Ok(QueryResult::without_answer(
                ConfidenceState::LowConfidence {
                    best_distance,
                    threshold: self.config.max_distance,
                },
                candidates,
            ));
        }

        let decision = self.rerank(question, &candidates).await?;
        let chosen = candidates
            .iter()
            .find(|c| c.chunk_id == decision.chunk_id())
            .unwrap_or(best);

        let document = self.fetch_document(chosen).await?;
        let answer = self.generate_answer(question, &document).await?;

        Ok(QueryResult {
            confidence_state: ConfidenceState::Confident { best_distance },
            selected_document: Some(SelectedDocument {
                document,
                chunk_id: chosen.chunk_id.clone(),
                distance: chosen.distance,
            }),
            answer_text: Some(answer),
            rerank: Some(decision),
            candidates,
        })
    }

    /// LLM으로 후보 하나 선택
    ///
    /// 응답이 유효하지 않거나 LLM이 응답하지 않으면 최소 거리 후보로 대체합니다.
    pub async fn rerank(&self, question: &str, candidates: &[Candidate]) -> Result<RerankDecision> {
        let Some(best) = candidates.first() else {
            return Err(RagError::IndexNotReady);
        };
        let fallback = |reason: RerankFallback| {
            tracing::warn!("Rerank fallback to {} ({:?})", best.chunk_id, reason);
            RerankDecision::Fallback {
                chunk_id: best.chunk_id.clone(),
                reason,
            }
        };

        if !self.config.rerank_enabled {
            return Ok(RerankDecision::Fallback {
                chunk_id: best.chunk_id.clone(),
                reason: RerankFallback::Disabled,
            });
        }

        let prompt = prompt::rerank_prompt(question, candidates, self.config.rerank_snippet_chars);
        let response = match with_retry(&self.retry, "rerank", RagError::LlmUnavailable, || {
            self.llm.generate(&prompt)
        })
        .await
        {
            Ok(r) => r,
            Err(e) if e.is_retryable() => {
                tracing::warn!("Rerank call failed: {}", e);
                return Ok(fallback(RerankFallback::LlmUnavailable));
            }
            Err(e) => return Err(e),
        };

        let ids: Vec<&str> = candidates.iter().map(|c| c.chunk_id.as_str()).collect();
        match prompt::parse_rerank_response(&response, &ids) {
            Ok(chunk_id) => {
                tracing::debug!("Rerank selected {}", chunk_id);
                Ok(RerankDecision::Selected { chunk_id })
            }
            Err(reason) => {
                tracing::debug!("Unusable rerank response: {:?}", response);
                Ok(fallback(reason))
            }
        }
    }

    /// 문서 전체를 근거로 답변 생성
    pub async fn generate_answer(&self, question: &str, document: &Document) -> Result<String> {
        let prompt = prompt::answer_prompt(question, document);
        let answer = with_retry(&self.retry, "answer generation", RagError::LlmUnavailable, || {
            self.llm.generate(&prompt)
        })
        .await?;
        Ok(answer.trim().to_string())
    }
}

// ============================================================================
// Tests
// ============================================================================
