use std::sync::Arc;

use docqa_core::config::{AppConfig, EmbeddingProviderKind, GenerationProviderKind};
use docqa_core::error::Result;
use docqa_core::retry::RetryPolicy;
use docqa_core::traits::{ChatModel, Embedder};
use docqa_embed::get_default_embedder;
use docqa_rag::{get_chat_model, Pipeline};
use docqa_vector::{IndexStore, SnapshotStore};

/// Switch both providers to their deterministic local implementations.
pub fn force_offline(cfg: &mut AppConfig) {
    cfg.embedding.provider = EmbeddingProviderKind::Hash;
    cfg.generation.provider = GenerationProviderKind::Offline;
}

pub fn embedder(cfg: &AppConfig) -> Result<Arc<dyn Embedder>> {
    get_default_embedder(&cfg.embedding, RetryPolicy::from(cfg.retry))
}

pub fn chat_model(cfg: &AppConfig) -> Result<Arc<dyn ChatModel>> {
    get_chat_model(&cfg.generation, RetryPolicy::from(cfg.retry))
}

/// Everything needed to answer questions against the published index.
pub struct QueryStack {
    pub pipeline: Arc<Pipeline>,
    pub snapshots: Arc<SnapshotStore>,
    pub store: IndexStore,
}

impl QueryStack {
    /// Load the current index and check it against the configured embedder
    /// before anything is served.
    pub fn open(cfg: &AppConfig, embedder: Arc<dyn Embedder>, model: Arc<dyn ChatModel>) -> Result<Self> {
        let store = IndexStore::new(&cfg.data.index_dir);
        let snapshot = store.load_current()?;
        let pipeline = Pipeline::new(cfg, embedder, model);
        pipeline.retriever().check_compatible(&snapshot)?;
        tracing::info!(
            version = %snapshot.version,
            chunks = snapshot.index.len(),
            embedder = %snapshot.manifest.embedder_id,
            "index loaded"
        );
        Ok(Self { pipeline: Arc::new(pipeline), snapshots: Arc::new(SnapshotStore::new(snapshot)), store })
    }

    pub fn from_config(cfg: &AppConfig) -> Result<Self> { Self::open(cfg, embedder(cfg)?, chat_model(cfg)?) }
}
