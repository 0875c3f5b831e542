//! Embedder implementations.
//!
//! `APP_USE_FAKE_EMBEDDINGS=1` forces the hashed embedder regardless of
//! configuration, which keeps tests and offline runs fast and deterministic.

use std::sync::Arc;

use docqa_core::config::{EmbeddingConfig, EmbeddingProviderKind};
use docqa_core::error::Result;
use docqa_core::retry::RetryPolicy;
use docqa_core::traits::Embedder;

pub mod hash;
pub mod http;

pub use hash::HashEmbedder;
pub use http::HttpEmbedder;

pub fn use_fake_embeddings() -> bool {
    std::env::var("APP_USE_FAKE_EMBEDDINGS")
        .ok()
        .is_some_and(|v| v == "1" || v.eq_ignore_ascii_case("true"))
}

pub fn get_default_embedder(cfg: &EmbeddingConfig, retry: RetryPolicy) -> Result<Arc<dyn Embedder>> {
    if use_fake_embeddings() || cfg.provider == EmbeddingProviderKind::Hash {
        tracing::info!(dim = cfg.dim, "using hashed embedder");
        return Ok(Arc::new(HashEmbedder::new(cfg.dim)));
    }
    tracing::info!(model = %cfg.model, base_url = %cfg.base_url, "using HTTP embedder");
    Ok(Arc::new(HttpEmbedder::from_config(cfg, retry)?))
}
