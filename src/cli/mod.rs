//! CLI 모듈
//!
//! notes-rag CLI 명령어 정의 및 구현

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

use crate::config::{Provider, RagConfig};
use crate::embedding::{create_embedder, has_api_key};
use crate::knowledge::{markdown_chunker, IndexWriter, LanceVectorStore, NoteStore, VectorStore};
use crate::llm::create_language_model;
use crate::notes::{NoteTree, NoteTreeConfig};
use crate::retrieval::{ConfidenceState, RerankDecision, RetrievalPipeline, Retriever};

// ============================================================================
// CLI Definition
// ============================================================================

#[derive(Parser)]
#[command(name = "notes-rag")]
#[command(version, about = "마크다운 노트 RAG 시스템", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// 노트 폴더 전체 재색인
    Index {
        /// 노트 폴더 (기본: NOTES_PATH 또는 ./notes)
        #[arg(short, long)]
        notes: Option<PathBuf>,

        /// 삭제된 노트의 인덱스 항목 유지
        #[arg(long)]
        keep_orphans: bool,

        /// .gitignore 패턴 존중
        #[arg(long)]
        gitignore: bool,
    },

    /// 노트를 근거로 질문에 답변
    Ask {
        /// 질문
        question: String,

        /// 검색 후보 수 (1 이상)
        #[arg(short = 'k', long, value_parser = parse_positive)]
        top_k: Option<usize>,

        /// 코사인 거리 임계값
        #[arg(short = 'd', long)]
        max_distance: Option<f32>,

        /// LLM 리랭크 생략 (최소 거리 후보 사용)
        #[arg(long)]
        no_rerank: bool,
    },

    /// 답변 없이 가까운 청크만 검색
    Search {
        /// 검색 쿼리
        query: String,

        /// 결과 개수 제한
        #[arg(short, long, default_value = "5", value_parser = parse_positive)]
        limit: usize,
    },

    /// 청크 하나 조회
    Show {
        /// 청크 ID
        chunk_id: String,
    },

    /// 상태 확인
    Status,
}

// ============================================================================
// CLI Runner
// ============================================================================

/// CLI 명령어 실행
pub async fn run(cli: Cli) -> Result<()> {
    let mut config = RagConfig::from_env().context("설정 로드 실패")?;

    match cli.command {
        Commands::Index {
            notes,
            keep_orphans,
            gitignore,
        } => {
            if let Some(notes) = notes {
                config.notes_dir = notes;
            }
            config.index.prune_orphans = !keep_orphans;
            config.index.respect_gitignore = gitignore;
            cmd_index(&config).await
        }
        Commands::Ask {
            question,
            top_k,
            max_distance,
            no_rerank,
        } => {
            if let Some(k) = top_k {
                config.retrieval.top_k = k;
            }
            if let Some(d) = max_distance {
                config.retrieval.max_distance = d;
            }
            if no_rerank {
                config.retrieval.rerank_enabled = false;
            }
            config.retrieval.validate().context("잘못된 검색 설정")?;
            cmd_ask(&config, &question).await
        }
        Commands::Search { query, limit } => cmd_search(&config, &query, limit).await,
        Commands::Show { chunk_id } => cmd_show(&config, &chunk_id).await,
        Commands::Status => cmd_status(&config).await,
    }
}

// ============================================================================
// Shared Setup
// ============================================================================

fn ensure_api_key(config: &RagConfig) -> Result<()> {
    let needs_key =
        config.embedding.provider == Provider::Gemini || config.llm.provider == Provider::Gemini;
    if needs_key && !has_api_key() {
        anyhow::bail!(
            "API 키가 설정되지 않았습니다.\n\n\
             설정 방법:\n  \
             export GEMINI_API_KEY=your-api-key\n  \
             또는 NOTES_RAG_EMBEDDING_PROVIDER=ollama / NOTES_RAG_LLM_PROVIDER=ollama\n\n\
             API 키 발급: https://aistudio.google.com/app/apikey"
        );
    }
    Ok(())
}

async fn open_stores(config: &RagConfig) -> Result<(Arc<NoteStore>, Arc<LanceVectorStore>)> {
    let notes = NoteStore::open_in(&config.data_dir).context("NoteStore 열기 실패")?;
    let vectors = LanceVectorStore::open(&config.lance_path(), config.embedding.dimension)
        .await
        .context("LanceDB 열기 실패")?;
    Ok((Arc::new(notes), Arc::new(vectors)))
}

async fn build_pipeline(config: &RagConfig) -> Result<RetrievalPipeline> {
    ensure_api_key(config)?;
    let (notes, vectors) = open_stores(config).await?;
    let embedder = create_embedder(&config.embedding).context("임베딩 프로바이더 생성 실패")?;
    let llm = create_language_model(&config.llm).context("언어 모델 생성 실패")?;

    Ok(RetrievalPipeline::new(
        embedder,
        vectors,
        notes,
        llm,
        config.retrieval.clone(),
        config.retry.clone(),
    ))
}

// ============================================================================
// Command Implementations
// ============================================================================

/// 재색인 명령어 (index)
async fn cmd_index(config: &RagConfig) -> Result<()> {
    // 색인에는 LLM이 필요 없음
    if config.embedding.provider == Provider::Gemini {
        ensure_api_key(config)?;
    }

    println!("[*] 노트 폴더: {}", config.notes_dir.display());

    let (notes, vectors) = open_stores(config).await?;
    let embedder = create_embedder(&config.embedding).context("임베딩 프로바이더 생성 실패")?;
    let tree = NoteTree::new(
        config.notes_dir.clone(),
        NoteTreeConfig {
            respect_gitignore: config.index.respect_gitignore,
        },
    );

    let writer = IndexWriter::new(
        tree,
        markdown_chunker(config.chunk.clone()),
        embedder,
        vectors,
        notes,
        config.index.clone(),
        config.retry.clone(),
    );

    let report = writer.run().await.context("색인 실패")?;

    if report.model_changed {
        println!("[!] 임베딩 모델이 바뀌어 기존 벡터 인덱스를 비웠습니다.");
    }

    println!(
        "[OK] 완료: 문서 {}, 청크 {}, 실패 {}",
        report.documents_indexed,
        report.chunks_written,
        report.failures.len()
    );
    if report.orphan_pruning_skipped {
        println!("[!] 일부 폴더를 읽지 못해 삭제된 노트 정리를 건너뛰었습니다.");
    }
    if report.stale_chunks_removed > 0 || report.orphan_documents_removed > 0 {
        println!(
            "     정리: 삭제된 노트 {}, 오래된 청크 {}",
            report.orphan_documents_removed, report.stale_chunks_removed
        );
    }

    for failure in &report.failures {
        println!("[!] {}: {}", failure.path, failure.error);
    }

    Ok(())
}

/// 질문 명령어 (ask)
async fn cmd_ask(config: &RagConfig, question: &str) -> Result<()> {
    let pipeline = build_pipeline(config).await?;

    println!("[*] 질문: \"{}\"", question);

    let result = pipeline.ask(question).await.context("질의 실패")?;

    match result.confidence_state {
        ConfidenceState::NoMatch => {
            println!("\n[!] 인덱스가 비어 있습니다. 먼저 `notes-rag index`를 실행하세요.");
            return Ok(());
        }
        ConfidenceState::LowConfidence {
            best_distance,
            threshold,
        } => {
            println!(
                "\n[!] 충분히 관련된 노트를 찾지 못했습니다 (최소 거리 {:.3} > 임계값 {:.3})",
                best_distance, threshold
            );
            return Ok(());
        }
        ConfidenceState::Confident { .. } => {}
    }

    if let Some(ref selected) = result.selected_document {
        let title = selected.document.title.as_deref().unwrap_or("-");
        println!(
            "\n[OK] 선택된 노트: {} ({}) [거리: {:.4}]",
            selected.document.path, title, selected.distance
        );
    }

    if let Some(RerankDecision::Fallback { reason, .. }) = result.rerank {
        println!("     (리랭크 대체: {:?})", reason);
    }

    if let Some(ref answer) = result.answer_text {
        println!("\n{}", answer);
    }

    Ok(())
}

/// 검색 명령어 (search) - LLM 없이 임베딩 + 벡터 검색만
async fn cmd_search(config: &RagConfig, query: &str, limit: usize) -> Result<()> {
    if config.embedding.provider == Provider::Gemini {
        ensure_api_key(config)?;
    }
    let (notes, vectors) = open_stores(config).await?;
    let embedder = create_embedder(&config.embedding).context("임베딩 프로바이더 생성 실패")?;
    let retriever = Retriever::new(embedder, vectors, notes, config.retry.clone());

    println!("[*] 검색 중: \"{}\"", query);

    let candidates = retriever.retrieve(query, limit).await.context("검색 실패")?;

    if candidates.is_empty() {
        println!("\n[!] 검색 결과가 없습니다.");
        return Ok(());
    }

    println!("\n[OK] 검색 결과 ({} 건):\n", candidates.len());

    for (i, candidate) in candidates.iter().enumerate() {
        println!(
            "{}. [거리: {:.4}] [{}] {}",
            i + 1,
            candidate.distance,
            candidate.metadata.kind,
            candidate.chunk_id
        );
        println!("   노트: {}", candidate.metadata.source_path);
        if !candidate.metadata.section_path.is_empty() {
            println!("   섹션: {}", candidate.metadata.section_path.join(" > "));
        }
        println!("   내용: {}", truncate_text(&candidate.text, 200));
        println!();
    }

    Ok(())
}

/// 청크 조회 명령어 (show)
async fn cmd_show(config: &RagConfig, chunk_id: &str) -> Result<()> {
    let (_, vectors) = open_stores(config).await?;

    let Some(chunk) = vectors.get_by_id(chunk_id).await.context("청크 조회 실패")? else {
        anyhow::bail!("ID '{}'인 청크를 찾을 수 없습니다", chunk_id);
    };

    let meta = &chunk.metadata;
    println!("[OK] 청크 {}", chunk.id);
    println!("     노트: {} (위치 {})", meta.source_path, meta.position);
    println!("     제목: {}", meta.title.as_deref().unwrap_or("-"));
    println!("     종류: {}", meta.kind);
    if !meta.section_path.is_empty() {
        println!("     섹션: {}", meta.section_path.join(" > "));
    }
    if !meta.tags.is_empty() {
        println!("     태그: {}", meta.tags.join(", "));
    }
    println!();
    println!("{}", chunk.text);

    Ok(())
}

/// 상태 명령어 (status)
async fn cmd_status(config: &RagConfig) -> Result<()> {
    println!("notes-rag v{}", env!("CARGO_PKG_VERSION"));
    println!();

    println!("[*] 노트 폴더: {}", config.notes_dir.display());
    println!("[*] 데이터 디렉토리: {}", config.data_dir.display());
    println!("[*] 임베딩 모델: {}", config.embedding.model_id());
    println!("[*] 언어 모델: {}:{}", config.llm.provider.as_str(), config.llm.model);

    if has_api_key() {
        println!("[OK] API 키: 설정됨");
    } else {
        println!("[!] API 키: 미설정");
        println!("    설정: export GEMINI_API_KEY=your-key");
    }

    let (notes, vectors) = match open_stores(config).await {
        Ok(stores) => stores,
        Err(e) => {
            println!("[!] 저장소 열기 실패: {:#}", e);
            return Ok(());
        }
    };

    match notes.stats() {
        Ok(stats) => {
            println!("[OK] 색인된 노트: {} 건", stats.document_count);
            println!("     총 본문: {}", format_bytes(stats.total_body_bytes));
            println!("     DB: {}", stats.db_path.display());
        }
        Err(e) => println!("[!] 통계 조회 실패: {}", e),
    }

    match vectors.count().await {
        Ok(count) => println!("[OK] 벡터 인덱스: {} 청크", count),
        Err(e) => tracing::debug!("벡터 통계 조회 실패: {}", e),
    }

    match notes.manifest() {
        Ok(Some(manifest)) => {
            println!(
                "[OK] 마지막 색인: {} ({})",
                manifest.built_at.format("%Y-%m-%d %H:%M"),
                manifest.embedding_model
            );
            if manifest.embedding_model != config.embedding.model_id() {
                println!("[!] 현재 임베딩 모델과 다릅니다. `notes-rag index`로 재색인하세요.");
            }
        }
        Ok(None) => println!("[!] 아직 색인되지 않았습니다."),
        Err(e) => println!("[!] 매니페스트 조회 실패: {}", e),
    }

    Ok(())
}

// ============================================================================
// Helper Functions
// ============================================================================

/// 1 이상 정수 파싱 (clap value_parser)
fn parse_positive(s: &str) -> std::result::Result<usize, String> {
    match s.parse::<usize>() {
        Ok(0) => Err("1 이상이어야 합니다".to_string()),
        Ok(n) => Ok(n),
        Err(e) => Err(e.to_string()),
    }
}

/// 텍스트 자르기 (UTF-8 안전)
fn truncate_text(text: &str, max_chars: usize) -> String {
    let cleaned = text.replace('\n', " ").replace('\r', "");
    let cleaned = cleaned.trim();

    if cleaned.chars().count() <= max_chars {
        cleaned.to_string()
    } else {
        let truncated: String = cleaned.chars().take(max_chars).collect();
        format!("{}...", truncated)
    }
}

/// 바이트 크기 포맷팅
fn format_bytes(bytes: usize) -> String {
    const KB: usize = 1024;
    const MB: usize = KB * 1024;

    if bytes >= MB {
        format!("{:.2} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.2} KB", bytes as f64 / KB as f64)
    } else {
        format!("{} B", bytes)
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_ask_flags() {
        let cli = Cli::try_parse_from([
            "notes-rag",
            "ask",
            "What do cats eat?",
            "--top-k",
            "3",
            "--max-distance",
            "0.5",
            "--no-rerank",
        ])
        .unwrap();

        match cli.command {
            Commands::Ask {
                question,
                top_k,
                max_distance,
                no_rerank,
            } => {
                assert_eq!(question, "What do cats eat?");
                assert_eq!(top_k, Some(3));
                assert_eq!(max_distance, Some(0.5));
                assert!(no_rerank);
            }
            _ => panic!("expected ask"),
        }
    }

    #[test]
    fn test_zero_counts_are_rejected() {
        assert!(Cli::try_parse_from(["notes-rag", "ask", "q", "--top-k", "0"]).is_err());
        assert!(Cli::try_parse_from(["notes-rag", "search", "q", "--limit", "0"]).is_err());
        assert!(Cli::try_parse_from(["notes-rag", "search", "q", "--limit", "2"]).is_ok());
    }

    #[test]
    fn test_parse_index_flags() {
        let cli = Cli::try_parse_from(["notes-rag", "index", "--notes", "/tmp/n", "--keep-orphans"])
            .unwrap();
        assert!(matches!(
            cli.command,
            Commands::Index { keep_orphans: true, gitignore: false, .. }
        ));
    }

    #[test]
    fn test_truncate_text() {
        assert_eq!(truncate_text("hello", 10), "hello");
        assert_eq!(truncate_text("hello world", 5), "hello...");
        assert_eq!(truncate_text("hello\nworld", 20), "hello world");
    }

    #[test]
    fn test_format_bytes() {
        assert_eq!(format_bytes(500), "500 B");
        assert_eq!(format_bytes(1536), "1.50 KB");
        assert_eq!(format_bytes(1048576), "1.00 MB");
    }
}
