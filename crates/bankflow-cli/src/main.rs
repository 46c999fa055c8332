//! BankFlow command line.
//!
//! `bankflow serve` runs the admin API; `bankflow pipeline` drives the
//! scheduler; `bankflow query` runs one RAG query; `bankflow cache-sweep`
//! evicts expired cache rows. SIGINT sets the shutdown flag everywhere;
//! in-flight work finishes, then the process drains within the deadline
//! or exits with code 1.

use std::net::SocketAddr;
use std::time::Duration;

use anyhow::Context;
use bankflow::core::logging;
use bankflow::Settings;
use bankflow_scheduler::{default_catalog, ShutdownFlag};
use bankflow_server::AppState;
use bankflow_vectorstores::VectorEngine;
use clap::{Parser, Subcommand};
use tracing::{error, info, warn};

/// Shutdown drain deadline.
const DRAIN_DEADLINE: Duration = Duration::from_secs(60);

#[derive(Parser)]
#[command(name = "bankflow", version, about = "BankFlow ML/AI platform")]
struct Cli {
    /// Vector store backend: dense, qdrant, or sqlite.
    #[arg(long, default_value = "dense", global = true)]
    vector_engine: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the admin HTTP API.
    Serve {
        /// Bind address.
        #[arg(long, default_value = "127.0.0.1:8000")]
        addr: SocketAddr,
    },
    /// Run the twelve-subtask pipeline.
    Pipeline {
        /// Use case key; omit with --all to run the whole catalog.
        #[arg(long)]
        use_case: Option<String>,
        /// Run every registered use case.
        #[arg(long)]
        all: bool,
    },
    /// Run a single RAG query and print the response JSON.
    Query {
        /// The question.
        text: String,
        /// Restrict to one use case's collection.
        #[arg(long)]
        use_case: Option<String>,
    },
    /// Delete expired query-cache rows.
    CacheSweep,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let settings = Settings::from_env().context("settings resolution failed")?;
    logging::init(&settings.log_level);
    let engine = VectorEngine::parse(&cli.vector_engine)
        .context("invalid --vector-engine")?;

    match cli.command {
        Command::Serve { addr } => serve(settings, engine, addr).await,
        Command::Pipeline { use_case, all } => pipeline(settings, engine, use_case, all).await,
        Command::Query { text, use_case } => query(settings, engine, &text, use_case.as_deref()).await,
        Command::CacheSweep => cache_sweep(&settings),
    }
}

fn watch_sigint(flag: ShutdownFlag) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Shutdown signal received; finishing current work");
            flag.set();
        }
    });
}

async fn serve(settings: Settings, engine: VectorEngine, addr: SocketAddr) -> anyhow::Result<()> {
    let state = AppState::build(settings, engine)
        .await
        .context("state assembly failed")?;
    let shutdown = state.shutdown.clone();
    watch_sigint(shutdown.clone());

    let wait_for_flag = {
        let shutdown = shutdown.clone();
        async move {
            while !shutdown.is_set() {
                tokio::time::sleep(Duration::from_millis(200)).await;
            }
        }
    };

    // Graceful path: serve() returns once in-flight requests drain.
    bankflow_server::serve(state, addr, wait_for_flag)
        .await
        .map_err(|e| anyhow::anyhow!(e.to_string()))
}

async fn pipeline(
    settings: Settings,
    engine: VectorEngine,
    use_case: Option<String>,
    all: bool,
) -> anyhow::Result<()> {
    let state = AppState::build(settings, engine)
        .await
        .context("state assembly failed")?;
    let shutdown = state.shutdown.clone();
    watch_sigint(shutdown.clone());

    let selected = if all {
        default_catalog()
    } else {
        let key = use_case.context("pass --use-case KEY or --all")?;
        let uc = state
            .find_use_case(&key)
            .with_context(|| format!("unknown use case: {key}"))?;
        vec![uc]
    };

    info!(count = selected.len(), "Starting pipeline runs");
    let runner = state.scheduler.clone();
    let work = tokio::spawn(async move { runner.run_all(selected).await });

    // The pool drains on its own; the deadline only binds once shutdown
    // has been requested.
    let runs = loop {
        if shutdown.is_set() {
            match tokio::time::timeout(DRAIN_DEADLINE, work).await {
                Ok(Ok(runs)) => break runs,
                Ok(Err(e)) => {
                    error!(error = %e, "Pipeline workers panicked");
                    std::process::exit(1);
                }
                Err(_) => {
                    error!("Drain deadline expired; exiting");
                    std::process::exit(1);
                }
            }
        }
        if work.is_finished() {
            break work.await.unwrap_or_default();
        }
        tokio::time::sleep(Duration::from_millis(200)).await;
    };

    for run in &runs {
        info!(
            use_case = %run.use_case_key,
            job_id = run.job_id,
            status = ?run.status,
            "Pipeline finished"
        );
    }
    let failed = runs
        .iter()
        .any(|r| r.status == bankflow_scheduler::JobState::Failed);
    if failed {
        std::process::exit(2);
    }
    Ok(())
}

async fn query(
    settings: Settings,
    engine: VectorEngine,
    text: &str,
    use_case: Option<&str>,
) -> anyhow::Result<()> {
    let state = AppState::build(settings, engine)
        .await
        .context("state assembly failed")?;
    let response = state
        .rag
        .query(text, use_case)
        .await
        .map_err(|e| anyhow::anyhow!(e.to_string()))?;
    println!("{}", serde_json::to_string_pretty(&response)?);
    Ok(())
}

fn cache_sweep(settings: &Settings) -> anyhow::Result<()> {
    let cache = bankflow_cache::RagCache::open(&settings.rag_cache_db())
        .map_err(|e| anyhow::anyhow!(e.to_string()))?;
    let removed = cache
        .sweep_expired()
        .map_err(|e| anyhow::anyhow!(e.to_string()))?;
    info!(removed, "Cache sweep complete");
    println!("{removed} expired entries removed");
    Ok(())
}
