use std::hash::{Hash, Hasher};

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use twox_hash::XxHash64;

use docqa_core::chunker::count_tokens;
use docqa_core::error::{Error, Result};
use docqa_core::traits::{Embedder, Embeddings};
use docqa_core::types::TokenUsage;

/// Hashed bag-of-words embedder. Deterministic and offline; lowercased
/// alphanumeric tokens are hashed into `dim` buckets and the result is
/// L2-normalized.
pub struct HashEmbedder {
    dim: usize,
    id: String,
}

impl HashEmbedder {
    pub fn new(dim: usize) -> Self { Self { dim, id: format!("hash:xxh64:d{dim}") } }

    #[allow(clippy::cast_possible_truncation, clippy::cast_precision_loss)]
    pub fn embed_text(&self, text: &str) -> Vec<f32> {
        let mut v = vec![0f32; self.dim];
        let mut any = false;
        for token in tokens(text) {
            let h = hash_token(&token);
            let idx = (h as usize) % self.dim;
            v[idx] += 1.0 + ((h >> 32) as u32) as f32 / u32::MAX as f32;
            any = true;
        }
        if !any {
            // Punctuation-only input still needs a non-zero direction.
            let idx = (hash_token("") as usize) % self.dim;
            v[idx] = 1.0;
        }
        let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt().max(1e-6);
        for x in &mut v {
            *x /= norm;
        }
        v
    }
}

fn hash_token(token: &str) -> u64 {
    let mut hasher = XxHash64::with_seed(0);
    token.hash(&mut hasher);
    hasher.finish()
}

fn tokens(text: &str) -> impl Iterator<Item = String> + '_ {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(str::to_lowercase)
}

#[async_trait]
impl Embedder for HashEmbedder {
    fn embedder_id(&self) -> &str { &self.id }

    fn dim(&self) -> usize { self.dim }

    async fn embed(&self, texts: &[String], cancel: &CancellationToken) -> Result<Embeddings> {
        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }
        let vectors = texts.iter().map(|t| self.embed_text(t)).collect();
        let input: usize = texts.iter().map(|t| count_tokens(t)).sum();
        Ok(Embeddings { vectors, usage: TokenUsage::new(input as u64, 0) })
    }
}
