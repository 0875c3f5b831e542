use std::collections::HashSet;

use serde::Serialize;
use tokio_util::sync::CancellationToken;

use docqa_core::types::StageTimings;
use docqa_rag::{AskOutcome, Pipeline};
use docqa_vector::IndexSnapshot;

use crate::cases::EvalCase;
use crate::metrics::{rate, Summary};

/// Outcome of one case. Holds no wall-clock values so that two runs over the
/// same inputs compare equal.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CaseRecord {
    pub id: String,
    pub passed: bool,
    pub refused: bool,
    /// Cited doc ids in citation order.
    pub sources: Vec<String>,
    /// Whether an expected doc was retrieved; `None` when nothing is expected.
    pub hit: Option<bool>,
    pub cost_usd: f64,
    pub notes: Vec<String>,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct QualityMetrics {
    pub cases: usize,
    pub completed: usize,
    pub errors: usize,
    pub passed: usize,
    pub hit_at_k: f64,
    pub grounded_rate: f64,
    pub refusal_quality: f64,
    pub keyword_rate: f64,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct StageLatency {
    pub embed_ms: Summary,
    pub search_ms: Summary,
    pub prompt_ms: Summary,
    pub generate_ms: Summary,
    pub total_ms: Summary,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct EvalResult {
    pub index_version: String,
    pub top_k: usize,
    pub quality: QualityMetrics,
    pub latency: StageLatency,
    pub cost_usd: Summary,
    pub total_cost_usd: f64,
    pub cases: Vec<CaseRecord>,
}

#[derive(Default)]
struct Tally {
    hit_den: usize,
    hit_num: usize,
    grounded_den: usize,
    grounded_num: usize,
    refusal_den: usize,
    refusal_num: usize,
    keyword_den: usize,
    keyword_num: usize,
}

#[derive(Default)]
struct Samples {
    embed: Vec<f64>,
    search: Vec<f64>,
    prompt: Vec<f64>,
    generate: Vec<f64>,
    total: Vec<f64>,
    cost: Vec<f64>,
}

impl Samples {
    fn push(&mut self, t: &StageTimings, cost: f64) {
        self.embed.push(t.embed_ms);
        self.search.push(t.search_ms);
        self.prompt.push(t.prompt_ms);
        self.generate.push(t.generate_ms);
        self.total.push(t.total_ms);
        self.cost.push(cost);
    }
}

pub struct Evaluator<'a> {
    pipeline: &'a Pipeline,
}

impl<'a> Evaluator<'a> {
    pub fn new(pipeline: &'a Pipeline) -> Self { Self { pipeline } }

    /// Run every case in order against one snapshot. A failing case is
    /// recorded and counted; it never aborts the run.
    pub async fn evaluate(&self, snapshot: &IndexSnapshot, cases: &[EvalCase], cancel: &CancellationToken) -> EvalResult {
        let mut tally = Tally::default();
        let mut samples = Samples::default();
        let mut records = Vec::with_capacity(cases.len());
        let mut errors = 0usize;

        for case in cases {
            if cancel.is_cancelled() {
                tracing::warn!(remaining = cases.len() - records.len(), "evaluation cancelled");
                break;
            }
            let record = match self.pipeline.ask(snapshot, &case.question, cancel).await {
                Ok(outcome) => {
                    samples.push(&outcome.timings, outcome.cost_usd);
                    score_case(case, &outcome, &mut tally)
                }
                Err(e) => {
                    errors += 1;
                    tracing::warn!(case = %case.id, error = %e, "case failed");
                    failed_case(case, &e.to_string(), &mut tally)
                }
            };
            tracing::debug!(case = %record.id, passed = record.passed, notes = ?record.notes, "case scored");
            records.push(record);
        }

        let quality = QualityMetrics {
            cases: records.len(),
            completed: records.len() - errors,
            errors,
            passed: records.iter().filter(|r| r.passed).count(),
            hit_at_k: rate(tally.hit_num, tally.hit_den),
            grounded_rate: rate(tally.grounded_num, tally.grounded_den),
            refusal_quality: rate(tally.refusal_num, tally.refusal_den),
            keyword_rate: rate(tally.keyword_num, tally.keyword_den),
        };
        tracing::info!(
            cases = quality.cases,
            errors = quality.errors,
            hit_at_k = quality.hit_at_k,
            grounded_rate = quality.grounded_rate,
            refusal_quality = quality.refusal_quality,
            "evaluation finished"
        );
        EvalResult {
            index_version: snapshot.version.clone(),
            top_k: self.pipeline.top_k(),
            quality,
            latency: StageLatency {
                embed_ms: Summary::from_samples(&samples.embed),
                search_ms: Summary::from_samples(&samples.search),
                prompt_ms: Summary::from_samples(&samples.prompt),
                generate_ms: Summary::from_samples(&samples.generate),
                total_ms: Summary::from_samples(&samples.total),
            },
            cost_usd: Summary::from_samples(&samples.cost),
            total_cost_usd: samples.cost.iter().sum(),
            cases: records,
        }
    }
}

fn score_case(case: &EvalCase, outcome: &AskOutcome, tally: &mut Tally) -> CaseRecord {
    let answer = &outcome.answer;
    let sources: Vec<String> = answer.sources.iter().map(|s| s.doc_id.clone()).collect();
    let expected: HashSet<&str> = case.expected_doc_ids.iter().map(String::as_str).collect();
    let mut notes = Vec::new();

    let hit = (!expected.is_empty()).then(|| outcome.retrieval.iter().any(|r| expected.contains(r.doc_id.as_str())));
    if let Some(hit) = hit {
        tally.hit_den += 1;
        tally.hit_num += usize::from(hit);
        if !hit {
            notes.push("missed_expected".to_string());
        }
    }

    if !answer.refused {
        tally.grounded_den += 1;
        // An answer to a case that expects no docs is never grounded.
        let grounded = sources.iter().any(|d| expected.contains(d.as_str()));
        tally.grounded_num += usize::from(grounded);

        if !case.keywords.is_empty() {
            tally.keyword_den += 1;
            let text = answer.text.to_lowercase();
            if case.keywords.iter().all(|k| text.contains(&k.to_lowercase())) {
                tally.keyword_num += 1;
            } else {
                notes.push("missing_keywords".to_string());
            }
        }
    }

    if case.expect_refusal {
        tally.refusal_den += 1;
        if answer.refused && answer.sources.is_empty() {
            tally.refusal_num += 1;
        } else {
            notes.push("did_not_refuse".to_string());
        }
    } else {
        if answer.refused {
            notes.push("refused".to_string());
        }
        if answer.sources.is_empty() {
            notes.push("no_sources".to_string());
        }
    }

    CaseRecord {
        id: case.id.clone(),
        passed: notes.is_empty(),
        refused: answer.refused,
        sources,
        hit,
        cost_usd: outcome.cost_usd,
        notes,
        error: None,
    }
}

fn failed_case(case: &EvalCase, error: &str, tally: &mut Tally) -> CaseRecord {
    if !case.expected_doc_ids.is_empty() {
        tally.hit_den += 1;
    }
    if case.expect_refusal {
        tally.refusal_den += 1;
    }
    CaseRecord {
        id: case.id.clone(),
        passed: false,
        refused: false,
        sources: Vec::new(),
        hit: None,
        cost_usd: 0.0,
        notes: vec![format!("error: {error}")],
        error: Some(error.to_string()),
    }
}
