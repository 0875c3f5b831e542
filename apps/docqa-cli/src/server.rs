use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;
use uuid::Uuid;

use docqa_core::error::Error;
use docqa_core::types::{elapsed_ms, RetrievalResult, TokenUsage};
use docqa_rag::{AskOutcome, Pipeline};
use docqa_vector::{IndexStore, SnapshotStore};

const SNIPPET_CHARS: usize = 320;

#[derive(Clone)]
pub struct AppState {
    pub pipeline: Arc<Pipeline>,
    pub snapshots: Arc<SnapshotStore>,
}

#[derive(Debug, Deserialize)]
pub struct AskRequest {
    pub question: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceItem {
    pub doc_id: String,
    pub source: String,
    pub chunk_id: u32,
    pub page: u32,
    pub score: f32,
    pub snippet: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AskResponse {
    pub ok: bool,
    pub request_id: String,
    pub answer: String,
    pub refused: bool,
    pub sources: Vec<SourceItem>,
    pub latency_ms: u64,
    pub usage: Option<TokenUsage>,
    pub cost_usd: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl AskResponse {
    fn failure(request_id: String, latency_ms: u64, error: String) -> Self {
        Self {
            ok: false,
            request_id,
            answer: String::new(),
            refused: false,
            sources: Vec::new(),
            latency_ms,
            usage: None,
            cost_usd: None,
            error: Some(error),
        }
    }
}

/// Whitespace-collapsed prefix of a chunk for display.
pub fn snippet(text: &str) -> String {
    let flat = text.split_whitespace().collect::<Vec<_>>().join(" ");
    flat.chars().take(SNIPPET_CHARS).collect()
}

fn source_item(r: &RetrievalResult) -> SourceItem {
    SourceItem {
        doc_id: r.doc_id.clone(),
        source: r.source_path.clone(),
        chunk_id: r.chunk_id,
        page: r.page,
        score: r.score,
        snippet: snippet(&r.text),
    }
}

#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn millis(start: Instant) -> u64 { elapsed_ms(start).round() as u64 }

fn success(request_id: String, latency_ms: u64, outcome: &AskOutcome) -> AskResponse {
    AskResponse {
        ok: true,
        request_id,
        answer: outcome.answer.text.clone(),
        refused: outcome.answer.refused,
        sources: outcome.answer.sources.iter().map(source_item).collect(),
        latency_ms,
        usage: Some(outcome.usage.total()),
        cost_usd: Some(outcome.cost_usd),
        error: None,
    }
}

/// Client mistakes are 422; everything else is a server failure.
fn status_for(err: &Error) -> StatusCode {
    if err.is_client_error() {
        StatusCode::UNPROCESSABLE_ENTITY
    } else {
        StatusCode::INTERNAL_SERVER_ERROR
    }
}

async fn ask(State(state): State<AppState>, body: Result<Json<AskRequest>, JsonRejection>) -> Response {
    let request_id = Uuid::new_v4().to_string();
    let start = Instant::now();

    let req = match body {
        Ok(Json(req)) => req,
        Err(rejection) => {
            tracing::info!(%request_id, reason = %rejection.body_text(), "rejected /ask body");
            let body = AskResponse::failure(request_id, 0, rejection.body_text());
            return (StatusCode::UNPROCESSABLE_ENTITY, Json(body)).into_response();
        }
    };

    // Cancelled when the client disconnects and this future is dropped.
    let cancel = CancellationToken::new();
    let _guard = cancel.clone().drop_guard();

    let snapshot = state.snapshots.snapshot();
    tracing::info!(%request_id, q_len = req.question.chars().count(), version = %snapshot.version, "ask");
    match state.pipeline.ask(&snapshot, &req.question, &cancel).await {
        Ok(outcome) => {
            let latency_ms = millis(start);
            tracing::info!(
                %request_id,
                latency_ms,
                refused = outcome.answer.refused,
                sources = outcome.answer.sources.len(),
                tokens = outcome.usage.total().total_tokens,
                cost_usd = outcome.cost_usd,
                "ask ok"
            );
            (StatusCode::OK, Json(success(request_id, latency_ms, &outcome))).into_response()
        }
        Err(e) => {
            let latency_ms = millis(start);
            let status = status_for(&e);
            if status.is_server_error() {
                tracing::error!(%request_id, latency_ms, error = %e, "ask failed");
            } else {
                tracing::info!(%request_id, error = %e, "ask rejected");
            }
            (status, Json(AskResponse::failure(request_id, latency_ms, e.to_string()))).into_response()
        }
    }
}

async fn root() -> Json<serde_json::Value> { Json(serde_json::json!({ "ok": true })) }

async fn health(State(state): State<AppState>) -> Json<serde_json::Value> {
    let snapshot = state.snapshots.snapshot();
    Json(serde_json::json!({
        "status": "ok",
        "index_version": snapshot.version,
        "chunks": snapshot.index.len(),
        "embedder": snapshot.manifest.embedder_id,
    }))
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(root))
        .route("/health", get(health))
        .route("/ask", post(ask))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Poll the store's `CURRENT` pointer and publish new versions until
/// `shutdown` fires. Versions that fail to load or were built with another
/// embedder are logged and the current snapshot keeps serving.
pub fn spawn_reloader(state: AppState, store: IndexStore, every: Duration, shutdown: CancellationToken) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every);
        ticker.tick().await;
        loop {
            tokio::select! {
                () = shutdown.cancelled() => break,
                _ = ticker.tick() => {
                    let state = state.clone();
                    let store = store.clone();
                    let reload = tokio::task::spawn_blocking(move || {
                        state.snapshots.reload_if_changed(&store, |next| state.pipeline.retriever().check_compatible(next))
                    });
                    match reload.await {
                        Ok(Ok(_)) => {}
                        Ok(Err(e)) => tracing::error!(error = %e, "index reload failed; keeping current snapshot"),
                        Err(e) => tracing::error!(error = %e, "index reload task panicked"),
                    }
                }
            }
        }
        tracing::debug!("index reloader stopped");
    })
}

/// Wait for the reloader to stop. Returns `false`, after logging, if it panicked.
pub async fn join_reloader(handle: JoinHandle<()>) -> bool {
    match handle.await {
        Ok(()) => true,
        Err(e) => {
            tracing::error!(error = %e, "index reloader task failed");
            false
        }
    }
}

/// Bind `addr` and serve until `shutdown` is cancelled.
pub async fn serve(addr: SocketAddr, state: AppState, shutdown: CancellationToken) -> anyhow::Result<()> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!(addr = %listener.local_addr()?, "listening");
    axum::serve(listener, router(state))
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await?;
    Ok(())
}
