use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::post;
use axum::{Json, Router};
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;

use docqa_core::config::EmbeddingConfig;
use docqa_core::retry::RetryPolicy;
use docqa_core::traits::Embedder;
use docqa_core::Error;
use docqa_embed::HttpEmbedder;

#[derive(Clone)]
struct Stub {
    calls: Arc<AtomicUsize>,
    fail_first: usize,
    fail_status: StatusCode,
    dim: usize,
}

impl Stub {
    fn new(fail_first: usize, fail_status: StatusCode, dim: usize) -> Self {
        Self { calls: Arc::new(AtomicUsize::new(0)), fail_first, fail_status, dim }
    }
}

/// Answers with vectors in reverse order: `[len(input), index, 0, ...]`.
#[allow(clippy::cast_precision_loss)]
async fn embeddings(State(s): State<Stub>, Json(body): Json<Value>) -> (StatusCode, Json<Value>) {
    let n = s.calls.fetch_add(1, Ordering::SeqCst);
    if n < s.fail_first {
        return (s.fail_status, Json(json!({ "error": { "message": "busy" } })));
    }
    let inputs = body["input"].as_array().cloned().unwrap_or_default();
    let data: Vec<Value> = inputs
        .iter()
        .enumerate()
        .rev()
        .map(|(i, t)| {
            let mut v = vec![0.0f32; s.dim];
            v[0] = t.as_str().unwrap_or_default().len() as f32;
            v[1] = i as f32;
            json!({ "object": "embedding", "index": i, "embedding": v })
        })
        .collect();
    (StatusCode::OK, Json(json!({ "data": data, "usage": { "prompt_tokens": 7, "total_tokens": 7 } })))
}

async fn spawn(stub: Stub) -> String {
    let app = Router::new().route("/embeddings", post(embeddings)).with_state(stub);
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("addr");
    tokio::spawn(async move {
        axum::serve(listener, app).await.expect("serve");
    });
    format!("http://{addr}")
}

fn fast_retry() -> RetryPolicy {
    RetryPolicy { max_retries: 2, base_delay: Duration::from_millis(1), max_delay: Duration::from_millis(5) }
}

fn embedder(base_url: String, dim: usize, batch_size: usize) -> HttpEmbedder {
    let cfg = EmbeddingConfig {
        base_url,
        dim,
        batch_size,
        api_key_env: "DOCQA_TEST_UNSET_KEY".to_string(),
        timeout_secs: 5,
        ..EmbeddingConfig::default()
    };
    HttpEmbedder::from_config(&cfg, fast_retry()).expect("embedder")
}

#[tokio::test]
async fn retries_transient_failure_and_preserves_order() {
    let stub = Stub::new(1, StatusCode::SERVICE_UNAVAILABLE, 4);
    let calls = stub.calls.clone();
    let e = embedder(spawn(stub).await, 4, 2);

    let texts: Vec<String> = vec!["a".into(), "bbb".into(), "cc".into()];
    let out = e.embed(&texts, &CancellationToken::new()).await.expect("embed");

    assert_eq!(calls.load(Ordering::SeqCst), 3, "one failed call plus two batches");
    let firsts: Vec<f32> = out.vectors.iter().map(|v| v[0]).collect();
    assert_eq!(firsts, vec![1.0, 3.0, 2.0], "vectors follow input order");
    assert_eq!(out.usage.input_tokens, 14);
    assert_eq!(e.embedder_id(), "http:text-embedding-3-small:d4");
}

#[tokio::test]
async fn client_errors_are_not_retried() {
    let stub = Stub::new(usize::MAX, StatusCode::BAD_REQUEST, 4);
    let calls = stub.calls.clone();
    let e = embedder(spawn(stub).await, 4, 8);

    let err = e.embed(&["q".to_string()], &CancellationToken::new()).await.expect_err("400");
    assert!(matches!(err, Error::RetrievalInfra { transient: false, .. }), "got {err:?}");
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn server_errors_exhaust_bounded_retries() {
    let stub = Stub::new(usize::MAX, StatusCode::INTERNAL_SERVER_ERROR, 4);
    let calls = stub.calls.clone();
    let e = embedder(spawn(stub).await, 4, 8);

    let err = e.embed(&["q".to_string()], &CancellationToken::new()).await.expect_err("500");
    assert!(err.is_transient());
    assert_eq!(calls.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn wrong_dimension_is_rejected() {
    let e = embedder(spawn(Stub::new(0, StatusCode::OK, 4)).await, 8, 8);
    let err = e.embed(&["q".to_string()], &CancellationToken::new()).await.expect_err("dim");
    assert!(matches!(err, Error::DimensionMismatch { expected: 8, actual: 4 }), "got {err:?}");
}

#[tokio::test]
async fn unreachable_service_is_retrieval_infra_error() {
    let e = embedder("http://127.0.0.1:9".to_string(), 4, 8);
    let err = e.embed(&["q".to_string()], &CancellationToken::new()).await.expect_err("refused");
    assert!(matches!(err, Error::RetrievalInfra { .. }), "got {err:?}");
}
