//! notes-rag - 마크다운 노트 RAG 시스템
//!
//! 노트 트리를 구조 인식 청킹 + 임베딩으로 색인하고,
//! 벡터 검색 → 신뢰도 게이트 → LLM 리랭크 → 문서 전체 기반 답변 순으로
//! 질문에 답합니다.

pub mod cli;
pub mod config;
pub mod embedding;
pub mod error;
pub mod knowledge;
pub mod llm;
pub mod notes;
pub mod retrieval;
pub mod retry;

#[cfg(test)]
pub(crate) mod testing;

// Re-exports
pub use config::RagConfig;
pub use embedding::{create_embedder, get_api_key, has_api_key, EmbeddingProvider};
pub use error::{RagError, Result};
pub use knowledge::{
    default_chunker, markdown_chunker, Candidate, Chunk, ChunkConfig, ChunkKind, Chunker,
    IndexManifest, IndexReport, IndexWriter, InMemoryVectorStore, LanceVectorStore,
    MarkdownChunker, NoteStore, VectorEntry, VectorStore,
};
pub use llm::{create_language_model, LanguageModel};
pub use notes::{Document, NoteScan, NoteTree, NoteTreeConfig};
pub use retrieval::{
    ConfidenceState, QueryResult, RerankDecision, RerankFallback, RetrievalPipeline, Retriever,
    SelectedDocument,
};
