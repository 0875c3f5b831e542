use docqa_core::config::RetrievalConfig;
use docqa_core::types::{DecisionOutcome, DecisionReason, Grounding, RetrievalResult};

/// Grounded iff at least `min_hits` results score `>= min_score`.
///
/// Pure: the outcome depends on nothing but the arguments. `retained` holds
/// the qualifying results in their input order.
pub fn decide(results: &[RetrievalResult], min_score: f32, min_hits: usize) -> DecisionOutcome {
    let top_score = results.iter().map(|r| r.score).reduce(f32::max);
    let retained: Vec<RetrievalResult> = results.iter().filter(|r| r.score >= min_score).cloned().collect();

    let (grounding, reason) = if results.is_empty() {
        (Grounding::Insufficient, DecisionReason::NoHits)
    } else if retained.is_empty() {
        (Grounding::Insufficient, DecisionReason::BelowThreshold)
    } else if retained.len() < min_hits {
        (Grounding::Insufficient, DecisionReason::TooFewHits)
    } else {
        (Grounding::Grounded, DecisionReason::Supported)
    };
    DecisionOutcome { grounding, reason, top_score, retained }
}

/// `decide` with thresholds from config and the retained list capped for prompting.
#[derive(Debug, Clone, Copy)]
pub struct Decider {
    pub min_score: f32,
    pub min_hits: usize,
    pub max_context_hits: usize,
}

impl From<&RetrievalConfig> for Decider {
    fn from(c: &RetrievalConfig) -> Self {
        Self { min_score: c.min_score, min_hits: c.min_hits, max_context_hits: c.max_context_hits }
    }
}

impl Decider {
    pub fn decide(&self, results: &[RetrievalResult]) -> DecisionOutcome {
        let mut outcome = decide(results, self.min_score, self.min_hits);
        outcome.retained.truncate(self.max_context_hits.max(self.min_hits));
        outcome
    }
}
