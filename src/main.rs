use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use serde::Serialize;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::signal;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use ratewarden::clock::{Clock, SystemClock};
use ratewarden::config::WardenConfig;
use ratewarden::ratelimit::{
    Admission, CounterStore, Decision, MemoryStore, RequestContext, Sweeper,
};

/// Evaluate request contexts read from stdin against a limiter configuration.
///
/// Each input line is a JSON request context, e.g.
/// `{"address":"10.0.0.1","principal":"user-7","route":"/orders"}`.
/// Each output line is the JSON decision with its rate limit headers.
#[derive(Debug, Parser)]
#[command(name = "ratewarden", version, about)]
struct Args {
    /// Path to the limiter configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Emit logs as JSON
    #[arg(long)]
    json_logs: bool,
}

#[derive(Debug, Serialize)]
struct Verdict<'a> {
    #[serde(flatten)]
    decision: &'a Decision,
    headers: serde_json::Map<String, serde_json::Value>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Logs go to stderr so stdout carries only verdicts
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(true)
        .with_writer(std::io::stderr);
    if args.json_logs {
        subscriber.json().init();
    } else {
        subscriber.init();
    }

    info!("Starting Ratewarden");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));

    let config = WardenConfig::load(args.config.as_deref())?;
    info!(
        strategy = %config.limiter.strategy,
        max_requests = config.limiter.max_requests,
        window_ms = config.limiter.window_ms,
        burst = config.burst.is_some(),
        "Configuration loaded"
    );

    let store: Arc<dyn CounterStore> = Arc::new(MemoryStore::new());
    let clock: Arc<dyn Clock> = Arc::new(SystemClock::new());
    let gate = config.build_gate(store.clone(), clock.clone())?;
    let sweeper = Sweeper::spawn(store.clone(), clock.clone(), config.store.sweep_interval());

    tokio::select! {
        result = serve_lines(gate.as_ref(), clock.as_ref()) => result?,
        _ = shutdown_signal() => {}
    }

    sweeper.shutdown().await;
    info!(tracked_keys = store.len(), "Ratewarden stopped");
    Ok(())
}

/// Answer one verdict per stdin line until EOF.
async fn serve_lines(gate: &dyn Admission, clock: &dyn Clock) -> anyhow::Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdout = tokio::io::stdout();

    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        let ctx: RequestContext = match serde_json::from_str(line) {
            Ok(ctx) => ctx,
            Err(e) => {
                warn!(error = %e, "Skipping malformed request context");
                continue;
            }
        };

        let decision = gate.check(&ctx);
        let headers = decision
            .headers(clock.now())
            .into_iter()
            .map(|(name, value)| (name.to_string(), serde_json::Value::String(value)))
            .collect();

        let mut out = serde_json::to_string(&Verdict {
            decision: &decision,
            headers,
        })?;
        out.push('\n');
        stdout.write_all(out.as_bytes()).await?;
        stdout.flush().await?;
    }

    info!("Input closed");
    Ok(())
}

/// Wait for a shutdown signal (Ctrl+C or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, initiating graceful shutdown");
        }
        _ = terminate => {
            info!("Received SIGTERM, initiating graceful shutdown");
        }
    }
}
