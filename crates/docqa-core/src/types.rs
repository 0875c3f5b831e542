//! Domain types shared by ingestion, retrieval and generation.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Fixed answer returned whenever the corpus does not support an answer.
pub const REFUSAL_TEXT: &str = "I don't know based on the provided documents.";

/// Page separator in pre-extracted text (form feed, as emitted by `pdftotext`).
pub const PAGE_BREAK: char = '\x0c';

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentMetadata {
    /// Char offsets into `raw_text` where each page begins. Page `n` (1-based)
    /// starts at `page_starts[n - 1]`.
    pub page_starts: Vec<usize>,
}

/// A source document as handed over by the extraction step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Document {
    pub doc_id: String,
    pub source_path: PathBuf,
    pub raw_text: String,
    pub metadata: DocumentMetadata,
}

impl Document {
    /// Build a document from extracted text, deriving page boundaries from
    /// form-feed separators.
    pub fn from_text(doc_id: impl Into<String>, source_path: impl Into<PathBuf>, raw_text: impl Into<String>) -> Self {
        let raw_text = raw_text.into();
        let mut page_starts = vec![0];
        for (offset, ch) in raw_text.chars().enumerate() {
            if ch == PAGE_BREAK {
                page_starts.push(offset + 1);
            }
        }
        Self {
            doc_id: doc_id.into(),
            source_path: source_path.into(),
            raw_text,
            metadata: DocumentMetadata { page_starts },
        }
    }

    /// Text of each page, paired with its 1-based page number.
    pub fn pages(&self) -> Vec<(u32, String)> {
        let chars: Vec<char> = self.raw_text.chars().collect();
        let starts = &self.metadata.page_starts;
        let mut out = Vec::with_capacity(starts.len());
        for (i, &start) in starts.iter().enumerate() {
            let end = starts.get(i + 1).map_or(chars.len(), |next| next.saturating_sub(1));
            let start = start.min(chars.len());
            let end = end.clamp(start, chars.len());
            let page_no = u32::try_from(i + 1).unwrap_or(u32::MAX);
            out.push((page_no, chars[start..end].iter().collect()));
        }
        out
    }
}

/// A citable window of a document. Immutable once produced by the chunker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chunk {
    /// Unique within `doc_id`; assigned in reading order.
    pub chunk_id: u32,
    pub doc_id: String,
    pub source_path: String,
    pub page: u32,
    pub text: String,
    pub token_count: usize,
    pub start_char: usize,
    pub end_char: usize,
}

impl Chunk {
    /// Citation identifier used in prompts and model output.
    pub fn key(&self) -> String { citation_key(&self.doc_id, self.chunk_id) }
}

pub fn citation_key(doc_id: &str, chunk_id: u32) -> String { format!("{doc_id}:{chunk_id}") }

/// A scored search hit. Lists are ordered by score descending, then
/// `chunk_id` ascending, then `doc_id` ascending.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetrievalResult {
    pub chunk_id: u32,
    pub doc_id: String,
    pub source_path: String,
    pub page: u32,
    pub score: f32,
    pub text: String,
}

impl RetrievalResult {
    pub fn key(&self) -> String { citation_key(&self.doc_id, self.chunk_id) }

    /// Total order used for every ranked list.
    pub fn rank_cmp(a: &Self, b: &Self) -> std::cmp::Ordering {
        b.score
            .total_cmp(&a.score)
            .then_with(|| a.chunk_id.cmp(&b.chunk_id))
            .then_with(|| a.doc_id.cmp(&b.doc_id))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecisionReason {
    NoHits,
    BelowThreshold,
    TooFewHits,
    Supported,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Grounding {
    Grounded,
    Insufficient,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecisionOutcome {
    pub grounding: Grounding,
    pub reason: DecisionReason,
    pub top_score: Option<f32>,
    /// Results at or above the threshold, capped for prompting.
    pub retained: Vec<RetrievalResult>,
}

impl DecisionOutcome {
    pub fn is_grounded(&self) -> bool { self.grounding == Grounding::Grounded }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub total_tokens: u64,
}

impl TokenUsage {
    pub fn new(input_tokens: u64, output_tokens: u64) -> Self {
        Self { input_tokens, output_tokens, total_tokens: input_tokens + output_tokens }
    }

    pub fn add(&mut self, other: TokenUsage) {
        self.input_tokens += other.input_tokens;
        self.output_tokens += other.output_tokens;
        self.total_tokens += other.total_tokens;
    }
}

/// Price per million tokens times tokens used.
#[allow(clippy::cast_precision_loss)]
pub fn token_cost(tokens: u64, price_per_1m: f64) -> f64 { tokens as f64 / 1_000_000.0 * price_per_1m }

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Answer {
    pub text: String,
    pub sources: Vec<RetrievalResult>,
    pub refused: bool,
}

impl Answer {
    pub fn refusal() -> Self { Self { text: REFUSAL_TEXT.to_string(), sources: Vec::new(), refused: true } }
}

/// Wall-clock milliseconds spent in each query stage.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct StageTimings {
    pub embed_ms: f64,
    pub search_ms: f64,
    pub decide_ms: f64,
    pub prompt_ms: f64,
    pub generate_ms: f64,
    pub total_ms: f64,
}

/// Milliseconds elapsed since `start`, as a float.
pub fn elapsed_ms(start: std::time::Instant) -> f64 { start.elapsed().as_secs_f64() * 1000.0 }
