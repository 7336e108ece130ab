//! Knowledge 모듈 - 노트 인덱스 저장소
//!
//! - Chunker: Markdown 구조 인식 텍스트 분할
//! - VectorStore: 청크 임베딩 최근접 이웃 검색 (LanceDB / 메모리)
//! - NoteStore: SQLite 문서 스냅샷 + 인덱스 매니페스트
//! - IndexWriter: 노트 트리 전체 재색인

mod chunker;
mod indexer;
mod lance;
mod memory;
mod store;
mod vector;

// Re-exports
pub use chunker::{
    chunk_id, default_chunker, markdown_chunker, Chunk, ChunkConfig, ChunkKind, ChunkPiece,
    Chunker, MarkdownChunker,
};
pub use indexer::{DocumentFailure, IndexReport, IndexWriter};
pub use lance::LanceVectorStore;
pub use memory::InMemoryVectorStore;
pub use store::{get_data_dir, IndexManifest, NoteStore, StoreStats, StoredDocument};
pub use vector::{
    cosine_distance, cosine_similarity, Candidate, ChunkMetadata, StoredChunk, VectorEntry,
    VectorStore,
};
