use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

use docqa_cli::runtime::{self, QueryStack};
use docqa_cli::server::{self, AppState};
use docqa_core::config::{AppConfig, Config};
use docqa_eval::{load_cases, report, Evaluator};
use docqa_vector::ingest_directory;

#[derive(Parser, Debug)]
#[command(name = "docqa", version, about = "Answer questions from a local document corpus, with citations")]
struct Cli {
    /// Use the hash embedder and the offline extractive model
    #[arg(long, global = true)]
    offline: bool,

    /// Directory holding config.toml (defaults to the working directory)
    #[arg(long, global = true)]
    config_dir: Option<PathBuf>,

    /// Increase log verbosity (-v debug, -vv trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Chunk, embed and publish a new index version
    Ingest {
        /// Documents directory (overrides data.docs_dir)
        docs_dir: Option<PathBuf>,
        /// Hide the progress bar
        #[arg(long)]
        no_progress: bool,
    },
    /// Answer one question from the current index
    Ask {
        question: String,
        /// Print the full outcome as JSON
        #[arg(long)]
        json: bool,
    },
    /// Serve the HTTP API
    Serve {
        #[arg(long)]
        host: Option<String>,
        #[arg(short, long)]
        port: Option<u16>,
    },
    /// Run labeled cases and report retrieval and answer quality
    Eval {
        /// JSONL case file
        #[arg(long, default_value = "eval/cases.jsonl")]
        cases: PathBuf,
        #[arg(long)]
        json: bool,
        /// Only list cases that failed
        #[arg(long)]
        failures_only: bool,
    },
}

fn init_tracing(verbose: u8, json: bool) {
    let default = match verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    let filter = || EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    let text_layer = (!json).then(|| {
        tracing_subscriber::fmt::layer()
            .with_target(false)
            .with_writer(std::io::stderr)
            .with_filter(filter())
    });
    let json_layer = json.then(|| {
        tracing_subscriber::fmt::layer()
            .json()
            .with_writer(std::io::stderr)
            .with_filter(filter())
    });
    tracing_subscriber::registry().with(text_layer).with(json_layer).init();
}

fn load_config(cli: &Cli) -> anyhow::Result<AppConfig> {
    let config = match &cli.config_dir {
        Some(dir) => Config::load_from(dir),
        None => Config::load(),
    }
    .context("loading configuration")?;
    let mut cfg = config.settings().context("validating configuration")?;
    if cli.offline {
        runtime::force_offline(&mut cfg);
    }
    Ok(cfg)
}

/// Cancelled on Ctrl-C.
fn shutdown_token() -> CancellationToken {
    let token = CancellationToken::new();
    let trigger = token.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("interrupt received, shutting down");
            trigger.cancel();
        }
    });
    token
}

async fn run_ingest(mut cfg: AppConfig, docs_dir: Option<PathBuf>, no_progress: bool) -> anyhow::Result<()> {
    if let Some(dir) = docs_dir {
        cfg.data.docs_dir = dir;
    }
    let embedder = runtime::embedder(&cfg)?;
    let cancel = shutdown_token();
    let stats = ingest_directory(&cfg, embedder.as_ref(), &cancel, !no_progress).await?;
    println!("{}", serde_json::to_string_pretty(&stats)?);
    Ok(())
}

async fn run_ask(cfg: &AppConfig, question: &str, json: bool) -> anyhow::Result<()> {
    let stack = QueryStack::from_config(cfg)?;
    let snapshot = stack.snapshots.snapshot();
    let outcome = stack.pipeline.ask(&snapshot, question, &shutdown_token()).await?;

    if json {
        let body = serde_json::json!({
            "answer": outcome.answer.text,
            "refused": outcome.answer.refused,
            "sources": outcome.answer.sources.iter().map(|s| serde_json::json!({
                "doc_id": s.doc_id,
                "chunk_id": s.chunk_id,
                "page": s.page,
                "score": s.score,
                "source": s.source_path,
                "snippet": server::snippet(&s.text),
            })).collect::<Vec<_>>(),
            "decision": outcome.decision.reason,
            "timings": outcome.timings,
            "usage": outcome.usage,
            "cost_usd": outcome.cost_usd,
            "index_version": outcome.index_version,
        });
        println!("{}", serde_json::to_string_pretty(&body)?);
        return Ok(());
    }

    println!("{}", outcome.answer.text);
    if !outcome.answer.sources.is_empty() {
        println!("\nSources:");
        for s in &outcome.answer.sources {
            println!("  [{}:{}] {} p.{} (score {:.3})", s.doc_id, s.chunk_id, s.source_path, s.page, s.score);
        }
    }
    Ok(())
}

async fn run_serve(cfg: &AppConfig, host: Option<String>, port: Option<u16>) -> anyhow::Result<()> {
    let stack = QueryStack::from_config(cfg)?;
    let state = AppState { pipeline: stack.pipeline, snapshots: stack.snapshots };
    let host = host.unwrap_or_else(|| cfg.server.host.clone());
    let port = port.unwrap_or(cfg.server.port);
    let addr: SocketAddr = format!("{host}:{port}").parse().with_context(|| format!("invalid address {host}:{port}"))?;

    let shutdown = shutdown_token();
    let reloader = server::spawn_reloader(
        state.clone(),
        stack.store,
        Duration::from_secs(cfg.server.reload_interval_secs),
        shutdown.clone(),
    );
    server::serve(addr, state, shutdown.clone()).await?;
    shutdown.cancel();
    server::join_reloader(reloader).await;
    Ok(())
}

async fn run_eval(cfg: &AppConfig, cases: &Path, json: bool, failures_only: bool) -> anyhow::Result<()> {
    let cases = load_cases(cases)?;
    let stack = QueryStack::from_config(cfg)?;
    let snapshot = stack.snapshots.snapshot();
    let result = Evaluator::new(&stack.pipeline).evaluate(&snapshot, &cases, &shutdown_token()).await;
    if json {
        println!("{}", serde_json::to_string_pretty(&result)?);
    } else {
        print!("{}", report::render(&result, failures_only));
    }
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose, cli.log_json);
    let cfg = load_config(&cli)?;

    match cli.command {
        Command::Ingest { docs_dir, no_progress } => run_ingest(cfg, docs_dir, no_progress).await,
        Command::Ask { question, json } => run_ask(&cfg, &question, json).await,
        Command::Serve { host, port } => run_serve(&cfg, host, port).await,
        Command::Eval { cases, json, failures_only } => run_eval(&cfg, &cases, json, failures_only).await,
    }
}
