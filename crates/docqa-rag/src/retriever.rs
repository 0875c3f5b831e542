use std::sync::Arc;
use std::time::Instant;

use tokio_util::sync::CancellationToken;

use docqa_core::error::{Error, Result};
use docqa_core::traits::Embedder;
use docqa_core::types::{elapsed_ms, RetrievalResult, TokenUsage};
use docqa_vector::IndexSnapshot;

#[derive(Debug, Clone, Default)]
pub struct RetrieveMetrics {
    pub embed_ms: f64,
    pub search_ms: f64,
    pub candidates: usize,
    pub returned: usize,
    pub top_score: Option<f32>,
    pub usage: TokenUsage,
}

#[derive(Debug, Clone, Default)]
pub struct Retrieval {
    /// Raw top-k, before the similarity threshold.
    pub candidates: Vec<RetrievalResult>,
    /// Candidates with `score >= min_score`, in rank order.
    pub results: Vec<RetrievalResult>,
    pub metrics: RetrieveMetrics,
}

pub struct Retriever {
    embedder: Arc<dyn Embedder>,
}

impl Retriever {
    pub fn new(embedder: Arc<dyn Embedder>) -> Self { Self { embedder } }

    pub fn embedder(&self) -> &Arc<dyn Embedder> { &self.embedder }

    /// Scores are only comparable under the model that built the index.
    pub fn check_compatible(&self, snapshot: &IndexSnapshot) -> Result<()> {
        let built_with = &snapshot.manifest.embedder_id;
        if built_with != self.embedder.embedder_id() {
            return Err(Error::InvalidConfig(format!(
                "index {} was built with embedder '{built_with}' but '{}' is configured; re-ingest first",
                snapshot.version,
                self.embedder.embedder_id()
            )));
        }
        if snapshot.index.dim() != self.embedder.dim() {
            return Err(Error::DimensionMismatch { expected: snapshot.index.dim(), actual: self.embedder.dim() });
        }
        Ok(())
    }

    pub async fn retrieve(
        &self,
        snapshot: &IndexSnapshot,
        question: &str,
        k: usize,
        min_score: f32,
        cancel: &CancellationToken,
    ) -> Result<Retrieval> {
        let question = question.trim();
        if question.is_empty() {
            return Err(Error::validation("question is empty"));
        }
        if k == 0 {
            return Err(Error::validation("k must be >= 1"));
        }
        self.check_compatible(snapshot)?;

        let start = Instant::now();
        let embedded = self.embedder.embed(&[question.to_string()], cancel).await?;
        let embed_ms = elapsed_ms(start);
        let query = embedded
            .vectors
            .into_iter()
            .next()
            .ok_or_else(|| Error::retrieval("embedder returned no vector for the question", false))?;

        let start = Instant::now();
        let candidates = snapshot.index.search(&query, k)?;
        let search_ms = elapsed_ms(start);

        let results: Vec<RetrievalResult> = candidates.iter().filter(|r| r.score >= min_score).cloned().collect();
        let metrics = RetrieveMetrics {
            embed_ms,
            search_ms,
            candidates: candidates.len(),
            returned: results.len(),
            top_score: candidates.first().map(|r| r.score),
            usage: embedded.usage,
        };
        tracing::debug!(
            version = %snapshot.version,
            candidates = metrics.candidates,
            returned = metrics.returned,
            top_score = ?metrics.top_score,
            embed_ms,
            search_ms,
            "retrieved"
        );
        Ok(Retrieval { candidates, results, metrics })
    }
}
