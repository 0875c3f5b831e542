use std::fs;
use std::path::Path;
use std::time::Instant;

use indicatif::{ProgressBar, ProgressStyle};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use docqa_core::chunker::Chunker;
use docqa_core::config::{AppConfig, ChunkingConfig};
use docqa_core::error::{Error, Result};
use docqa_core::loader::DocumentLoader;
use docqa_core::traits::Embedder;
use docqa_core::types::{elapsed_ms, token_cost, Document, TokenUsage};

use crate::index::VectorIndex;
use crate::store::IndexStore;

/// Summary written to `stats.json` after each build.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IngestStats {
    pub version: String,
    pub documents: usize,
    pub chunks: usize,
    pub dim: usize,
    pub embedder_id: String,
    pub chunking: ChunkingConfig,
    pub embed_batches: usize,
    pub embed_usage: TokenUsage,
    pub embed_cost_usd: f64,
    pub build_time_ms: f64,
    pub built_at: String,
}

pub struct BuiltIndex {
    pub index: VectorIndex,
    pub embed_batches: usize,
    pub usage: TokenUsage,
}

/// Chunk and embed `docs` into a fresh in-memory index.
pub async fn build_index(
    docs: &[Document],
    chunker: &Chunker,
    embedder: &dyn Embedder,
    batch_size: usize,
    cancel: &CancellationToken,
    show_progress: bool,
) -> Result<BuiltIndex> {
    let chunks = chunker.chunk_all(docs);
    if chunks.is_empty() {
        return Err(Error::validation("no chunks produced; nothing to index"));
    }
    let mut index = VectorIndex::new(embedder.dim())?;
    let pb = progress_bar(chunks.len(), show_progress);
    let mut usage = TokenUsage::default();
    let mut embed_batches = 0usize;

    for batch in chunks.chunks(batch_size.max(1)) {
        let texts: Vec<String> = batch.iter().map(|c| c.text.clone()).collect();
        let out = embedder.embed(&texts, cancel).await?;
        if out.vectors.len() != batch.len() {
            return Err(Error::retrieval(
                format!("embedder returned {} vectors for {} chunks", out.vectors.len(), batch.len()),
                false,
            ));
        }
        index.add(batch.to_vec(), out.vectors)?;
        usage.add(out.usage);
        embed_batches += 1;
        pb.inc(batch.len() as u64);
        tracing::debug!(batch = embed_batches, rows = index.len(), "embedded batch");
    }
    pb.finish_with_message("embedded");
    Ok(BuiltIndex { index, embed_batches, usage })
}

/// Load documents from `cfg.data.docs_dir`, build a new index version,
/// publish it under `cfg.data.index_dir` and write `stats.json`.
pub async fn ingest_directory(
    cfg: &AppConfig,
    embedder: &dyn Embedder,
    cancel: &CancellationToken,
    show_progress: bool,
) -> Result<IngestStats> {
    ingest_from(&cfg.data.docs_dir, &IndexStore::new(&cfg.data.index_dir), cfg, embedder, cancel, show_progress).await
}

pub async fn ingest_from(
    docs_dir: &Path,
    store: &IndexStore,
    cfg: &AppConfig,
    embedder: &dyn Embedder,
    cancel: &CancellationToken,
    show_progress: bool,
) -> Result<IngestStats> {
    let start = Instant::now();
    let docs = DocumentLoader::new().load_directory(docs_dir)?;
    if docs.is_empty() {
        return Err(Error::validation(format!("no documents found under {}", docs_dir.display())));
    }
    let chunker = Chunker::new(cfg.chunking)?;
    let built = build_index(&docs, &chunker, embedder, cfg.embedding.batch_size, cancel, show_progress).await?;
    let version = store.publish(&built.index, embedder.embedder_id(), cfg.chunking)?;

    let stats = IngestStats {
        version,
        documents: docs.len(),
        chunks: built.index.len(),
        dim: built.index.dim(),
        embedder_id: embedder.embedder_id().to_string(),
        chunking: cfg.chunking,
        embed_batches: built.embed_batches,
        embed_usage: built.usage,
        embed_cost_usd: token_cost(built.usage.input_tokens, cfg.embedding.price_input_per_1m),
        build_time_ms: elapsed_ms(start),
        built_at: chrono::Utc::now().to_rfc3339(),
    };
    let path = store.stats_path();
    let mut bytes = serde_json::to_vec_pretty(&stats)?;
    bytes.push(b'\n');
    fs::write(&path, bytes).map_err(|e| Error::io(&path, e))?;
    tracing::info!(
        version = %stats.version,
        documents = stats.documents,
        chunks = stats.chunks,
        dim = stats.dim,
        build_time_ms = stats.build_time_ms,
        "ingest complete"
    );
    Ok(stats)
}

fn progress_bar(len: usize, visible: bool) -> ProgressBar {
    if !visible {
        return ProgressBar::hidden();
    }
    let pb = ProgressBar::new(len as u64);
    let style = ProgressStyle::with_template(
        "{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} chunks ({percent}%) {msg}",
    )
    .map_or_else(|_| ProgressStyle::default_bar(), |s| s.progress_chars("#>-"));
    pb.set_style(style);
    pb
}
