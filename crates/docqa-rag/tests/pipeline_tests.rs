use std::fs;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use pretty_assertions::assert_eq;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

use docqa_core::config::{AppConfig, EmbeddingProviderKind};
use docqa_core::traits::{ChatMessage, ChatModel, Completion, Embedder};
use docqa_core::types::{DecisionReason, TokenUsage, REFUSAL_TEXT};
use docqa_core::{Error, Result};
use docqa_embed::HashEmbedder;
use docqa_rag::generator::CORRECTIVE_INSTRUCTION;
use docqa_rag::{OfflineChatModel, Pipeline};
use docqa_vector::{ingest_from, IndexSnapshot, IndexStore};

const DIM: usize = 256;

/// Replays canned replies in order, repeating the last one, and records
/// every message list it receives.
struct Scripted {
    replies: Vec<String>,
    calls: AtomicUsize,
    seen: Mutex<Vec<Vec<ChatMessage>>>,
}

impl Scripted {
    fn new(replies: &[&str]) -> Arc<Self> {
        Arc::new(Self {
            replies: replies.iter().map(|r| (*r).to_string()).collect(),
            calls: AtomicUsize::new(0),
            seen: Mutex::new(Vec::new()),
        })
    }

    fn calls(&self) -> usize { self.calls.load(Ordering::SeqCst) }
}

#[async_trait]
impl ChatModel for Scripted {
    fn model_id(&self) -> &str { "scripted" }

    async fn complete(&self, messages: &[ChatMessage], _cancel: &CancellationToken) -> Result<Completion> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst);
        self.seen.lock().expect("lock").push(messages.to_vec());
        let text = self.replies[n.min(self.replies.len() - 1)].clone();
        Ok(Completion { text, usage: TokenUsage::new(100, 10) })
    }
}

fn write_corpus(dir: &Path) {
    fs::write(
        dir.join("water.txt"),
        "To purify water, bring it to a rolling boil for one minute. Store boiled water in clean containers.",
    )
    .expect("write");
    fs::write(
        dir.join("fire.txt"),
        "A fire needs tinder, kindling and fuel wood. Always clear a ring of bare soil around the fire pit.",
    )
    .expect("write");
}

fn config() -> AppConfig {
    let mut cfg = AppConfig::default();
    cfg.embedding.provider = EmbeddingProviderKind::Hash;
    cfg.embedding.dim = DIM;
    cfg
}

struct Fixture {
    _docs: TempDir,
    _root: TempDir,
    snapshot: IndexSnapshot,
}

async fn fixture(cfg: &AppConfig) -> Fixture {
    let docs = TempDir::new().expect("docs");
    let root = TempDir::new().expect("index");
    write_corpus(docs.path());
    let store = IndexStore::new(root.path());
    let embedder = HashEmbedder::new(DIM);
    ingest_from(docs.path(), &store, cfg, &embedder, &CancellationToken::new(), false)
        .await
        .expect("ingest");
    let snapshot = store.load_current().expect("load");
    Fixture { _docs: docs, _root: root, snapshot }
}

fn pipeline(cfg: &AppConfig, model: Arc<dyn ChatModel>) -> Pipeline {
    let embedder: Arc<dyn Embedder> = Arc::new(HashEmbedder::new(DIM));
    Pipeline::new(cfg, embedder, model)
}

const WATER_Q: &str = "How long to bring water to a rolling boil to purify it?";
const OFF_TOPIC_Q: &str = "Explain quantum chromodynamics lattice gauge theory";

#[tokio::test]
async fn offline_model_answers_from_the_top_chunk() {
    let cfg = config();
    let fx = fixture(&cfg).await;
    let p = pipeline(&cfg, Arc::new(OfflineChatModel::new()));

    let out = p.ask(&fx.snapshot, WATER_Q, &CancellationToken::new()).await.expect("ask");
    assert!(out.decision.is_grounded());
    assert!(!out.answer.refused);
    assert_eq!(out.answer.text, "To purify water, bring it to a rolling boil for one minute.");
    assert_eq!(out.answer.sources.len(), 1);
    assert_eq!(out.answer.sources[0].doc_id, "water");
    assert_eq!(out.answer.sources[0].key(), "water:0");
    assert_eq!(out.generation_attempts, 1);
    assert_eq!(out.index_version, fx.snapshot.version);
    assert!(out.usage.embedding.input_tokens > 0);
    assert!(out.usage.generation.output_tokens > 0);
    assert!(out.cost_usd > 0.0);
    assert!(out.timings.total_ms >= out.timings.generate_ms);
}

#[tokio::test]
async fn insufficient_context_refuses_without_calling_the_model() {
    let cfg = config();
    let fx = fixture(&cfg).await;
    let model = Scripted::new(&[r#"{"answer":"made up","sources":["water:0"]}"#]);
    let p = pipeline(&cfg, model.clone());

    let out = p.ask(&fx.snapshot, OFF_TOPIC_Q, &CancellationToken::new()).await.expect("ask");
    assert!(!out.decision.is_grounded());
    assert_eq!(out.decision.reason, DecisionReason::BelowThreshold);
    assert!(out.answer.refused);
    assert_eq!(out.answer.text, REFUSAL_TEXT);
    assert!(out.answer.sources.is_empty());
    assert!(out.retrieval.is_empty());
    assert_eq!(out.generation_attempts, 0);
    assert_eq!(out.usage.generation, TokenUsage::default());
    assert_eq!(model.calls(), 0);
}

#[tokio::test]
async fn too_few_hits_refuses() {
    let mut cfg = config();
    cfg.retrieval.min_hits = 2;
    let fx = fixture(&cfg).await;
    let model = Scripted::new(&[r#"{"answer":"x","sources":["water:0"]}"#]);
    let p = pipeline(&cfg, model.clone());

    let out = p.ask(&fx.snapshot, WATER_Q, &CancellationToken::new()).await.expect("ask");
    assert_eq!(out.decision.reason, DecisionReason::TooFewHits);
    assert!(out.answer.refused);
    assert_eq!(model.calls(), 0);
}

#[tokio::test]
async fn empty_prompt_after_budget_refuses_without_calling_the_model() {
    let mut cfg = config();
    cfg.prompt.max_prompt_chars = 10;
    let fx = fixture(&cfg).await;
    let model = Scripted::new(&[r#"{"answer":"x","sources":["water:0"]}"#]);
    let p = pipeline(&cfg, model.clone());

    let out = p.ask(&fx.snapshot, WATER_Q, &CancellationToken::new()).await.expect("ask");
    assert!(out.decision.is_grounded());
    assert!(out.answer.refused);
    assert_eq!(model.calls(), 0);
}

#[tokio::test]
async fn two_malformed_replies_fail_with_format_error() {
    let cfg = config();
    let fx = fixture(&cfg).await;
    let model = Scripted::new(&["Sure! Boil it for a minute.", "```json\n{\"answer\":\"x\",\"sources\":[]}\n```"]);
    let p = pipeline(&cfg, model.clone());

    let err = p.ask(&fx.snapshot, WATER_Q, &CancellationToken::new()).await.expect_err("format");
    assert!(matches!(err, Error::GenerationFormat { attempts: 2, .. }), "{err:?}");
    assert_eq!(model.calls(), 2);
}

#[tokio::test]
async fn corrective_retry_recovers() {
    let cfg = config();
    let fx = fixture(&cfg).await;
    let model = Scripted::new(&[
        r#"{"answer":"one minute","sources":["water:0"],"confidence":0.9}"#,
        r#"{"answer":"Boil it for one minute.","sources":["water:0","water:0"]}"#,
    ]);
    let p = pipeline(&cfg, model.clone());

    let out = p.ask(&fx.snapshot, WATER_Q, &CancellationToken::new()).await.expect("ask");
    assert_eq!(out.generation_attempts, 2);
    assert_eq!(out.answer.text, "Boil it for one minute.");
    assert_eq!(out.answer.sources.len(), 1, "duplicate citations collapse");
    assert_eq!(out.usage.generation, TokenUsage::new(200, 20));

    let seen = model.seen.lock().expect("lock");
    assert_eq!(seen[0].len(), 2);
    assert_eq!(seen[1].len(), 3);
    assert_eq!(seen[1][2].content, CORRECTIVE_INSTRUCTION);
}

#[tokio::test]
async fn unknown_citations_turn_into_refusal() {
    let cfg = config();
    let fx = fixture(&cfg).await;
    let model = Scripted::new(&[r#"{"answer":"Boil it.","sources":["nowhere:7"]}"#]);
    let p = pipeline(&cfg, model.clone());

    let out = p.ask(&fx.snapshot, WATER_Q, &CancellationToken::new()).await.expect("ask");
    assert!(out.answer.refused);
    assert!(out.answer.sources.is_empty());
    assert_eq!(model.calls(), 1);
}

#[tokio::test]
async fn model_refusal_is_passed_through() {
    let cfg = config();
    let fx = fixture(&cfg).await;
    let reply = format!(r#"{{"answer":"{REFUSAL_TEXT}","sources":[]}}"#);
    let model = Scripted::new(&[reply.as_str()]);
    let p = pipeline(&cfg, model);

    let out = p.ask(&fx.snapshot, WATER_Q, &CancellationToken::new()).await.expect("ask");
    assert!(out.answer.refused);
    assert_eq!(out.answer.text, REFUSAL_TEXT);
    assert_eq!(out.generation_attempts, 1);
}

#[tokio::test]
async fn questions_are_validated() {
    let cfg = config();
    let fx = fixture(&cfg).await;
    let model = Scripted::new(&["{}"]);
    let p = pipeline(&cfg, model.clone());
    let cancel = CancellationToken::new();
    let long = "x".repeat(2_001);

    for q in ["", "   ", "hi", long.as_str()] {
        let err = p.ask(&fx.snapshot, q, &cancel).await.expect_err("invalid question");
        assert!(matches!(err, Error::Validation(_)), "{q:?}: {err:?}");
        assert!(err.is_client_error());
    }
    assert_eq!(p.validate_question("  why?  ").expect("valid"), "why?");
    assert_eq!(model.calls(), 0);
}

#[tokio::test]
async fn mismatched_embedder_is_rejected() {
    let cfg = config();
    let fx = fixture(&cfg).await;
    let other: Arc<dyn Embedder> = Arc::new(HashEmbedder::new(64));
    let p = Pipeline::new(&cfg, other, Scripted::new(&["{}"]));

    let err = p.ask(&fx.snapshot, WATER_Q, &CancellationToken::new()).await.expect_err("mismatch");
    assert!(matches!(err, Error::InvalidConfig(_)), "{err:?}");
}

#[tokio::test]
async fn cancelled_request_stops_before_generation() {
    let cfg = config();
    let fx = fixture(&cfg).await;
    let model = Scripted::new(&["{}"]);
    let p = pipeline(&cfg, model.clone());
    let cancel = CancellationToken::new();
    cancel.cancel();

    let err = p.ask(&fx.snapshot, WATER_Q, &cancel).await.expect_err("cancelled");
    assert!(matches!(err, Error::Cancelled), "{err:?}");
    assert_eq!(model.calls(), 0);
}

#[tokio::test]
async fn same_question_same_snapshot_same_answer() {
    let cfg = config();
    let fx = fixture(&cfg).await;
    let p = pipeline(&cfg, Arc::new(OfflineChatModel::new()));
    let cancel = CancellationToken::new();

    let a = p.ask(&fx.snapshot, WATER_Q, &cancel).await.expect("a");
    let b = p.ask(&fx.snapshot, WATER_Q, &cancel).await.expect("b");
    assert_eq!(a.answer, b.answer);
    assert_eq!(a.retrieval, b.retrieval);
    assert_eq!(a.decision, b.decision);
}
