#![forbid(unsafe_code)]

//! `agent-duplex` — drive one worker session from the command line.
//!
//! Spawns the configured worker, sends each `--prompt` as a turn and prints
//! every output event to stdout as one JSON line. Logs go to stderr.

use std::path::PathBuf;

use clap::{Parser, ValueEnum};
use futures_util::StreamExt;
use serde::Serialize;
use tracing::{info, warn};
use tracing_subscriber::{fmt, EnvFilter};

use agent_duplex::mode::PermissionMode;
use agent_duplex::models::event::OutputEvent;
use agent_duplex::models::history::HistoryQuery;
use agent_duplex::{AppError, Result, Session, SessionConfig, SessionOptions};

#[derive(Debug, Copy, Clone, Eq, PartialEq, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Debug, Parser)]
#[command(name = "agent-duplex", about = "Duplex NDJSON agent session driver", version, long_about = None)]
struct Cli {
    /// Path to the TOML configuration file.
    #[arg(long)]
    config: PathBuf,

    /// Log output format (text or json).
    #[arg(long, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,

    /// Override the configured permission mode.
    #[arg(long, value_enum)]
    mode: Option<PermissionMode>,

    /// Prompt to send as one turn; repeat for several turns.
    #[arg(long = "prompt")]
    prompts: Vec<String>,

    /// Print one page of conversation history with this many items after the turns.
    #[arg(long)]
    history: Option<u32>,
}

fn main() -> Result<()> {
    let args = Cli::parse();
    init_tracing(args.log_format)?;

    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|err| AppError::Config(format!("failed to build tokio runtime: {err}")))?
        .block_on(run(args))
}

async fn run(args: Cli) -> Result<()> {
    let mut config = SessionConfig::load_from_path(&args.config)?;
    if let Some(mode) = args.mode {
        config.permissions.mode = mode;
    }
    info!(command = %config.worker.command, mode = ?config.permissions.mode, "configuration loaded");

    let session = Session::connect(&config, SessionOptions::from_config(&config))?;
    let outcome = session.initialize().await?;
    print_line(&OutputEvent::Init(outcome.identity))?;

    let mut interrupted = false;
    for prompt in &args.prompts {
        session.send(prompt.as_str()).await?;
        if stream_turn(&session).await? {
            interrupted = true;
            break;
        }
    }

    if let (Some(limit), false) = (args.history, interrupted) {
        let page = session
            .list_history(HistoryQuery {
                limit: Some(limit),
                ..HistoryQuery::default()
            })
            .await?;
        print_line(&page)?;
    }

    let dropped = session.dropped_events();
    if dropped > 0 {
        warn!(dropped, "output events were dropped by the buffer");
    }

    session.close().await;
    info!("agent-duplex finished");
    Ok(())
}

/// Print one turn's events. Returns `true` if interrupted by a signal.
async fn stream_turn(session: &Session) -> Result<bool> {
    let events = session.stream()?;
    tokio::pin!(events);
    let shutdown = shutdown_signal();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            event = events.next() => match event {
                Some(event) => print_line(&event)?,
                None => return Ok(false),
            },
            () = &mut shutdown => {
                info!("shutdown signal received, interrupting turn");
                if let Err(err) = session.abort().await {
                    warn!(%err, "failed to interrupt turn");
                }
                return Ok(true);
            }
        }
    }
}

fn print_line<T: Serialize>(value: &T) -> Result<()> {
    let line = serde_json::to_string(value)?;
    println!("{line}");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = ctrl_c => {}
                    _ = sigterm.recv() => {}
                }
            }
            Err(err) => {
                warn!(%err, "failed to register SIGTERM handler, using ctrl-c only");
                let _ = ctrl_c.await;
            }
        }
    }

    #[cfg(not(unix))]
    {
        if let Err(err) = ctrl_c.await {
            tracing::error!(%err, "ctrl-c signal handler failed");
        }
    }
}

fn init_tracing(log_format: LogFormat) -> Result<()> {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr);

    match log_format {
        LogFormat::Text => subscriber
            .try_init()
            .map_err(|err| AppError::Config(format!("failed to init tracing: {err}")))?,
        LogFormat::Json => subscriber
            .json()
            .try_init()
            .map_err(|err| AppError::Config(format!("failed to init tracing: {err}")))?,
    }

    Ok(())
}
