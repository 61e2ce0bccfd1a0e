use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde::Serialize;
use tracing::{info, warn};

use rose_proto::report::BackendKind;
use rose_session::clock::ManualClock;
use rose_session::{doctor, manager, EngineConfig, Frame, SessionManager};
use rose_store::StateStore;
use rose_vision::Detection;

use std::sync::Arc;

#[derive(Debug, Parser)]
#[command(name = "rose", version, about = "Rosecount - rose counting session engine")]
struct Cli {
    /// TOML config; ROSE_* environment variables override it.
    #[arg(long)]
    config: Option<String>,

    #[command(subcommand)]
    cmd: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Validate the config and ping the configured backend.
    Doctor,
    /// Print backend health as JSON; fails when the backend is unreachable.
    Health,
    /// Print the finished-session history as JSON.
    History,
    /// Print the number of distinct roses seen across all sessions.
    Total,
    /// Run one session over recorded detections (one JSON array per line).
    Replay {
        file: String,
        /// Simulated time between frames.
        #[arg(long, default_value_t = 100)]
        frame_interval_ms: u64,
        /// Print every frame report, not only the summary.
        #[arg(long)]
        frames: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let cfg = EngineConfig::load(cli.config.as_deref())?;

    match cli.cmd {
        Command::Doctor => doctor_cmd(&cfg).await?,
        Command::Health => health(cfg).await?,
        Command::History => print_json(&SessionManager::from_config(cfg).await.history().await?)?,
        Command::Total => println!("{}", SessionManager::from_config(cfg).await.total_unique_count().await?),
        Command::Replay { file, frame_interval_ms, frames } => replay(cfg, &file, frame_interval_ms, frames).await?,
    }
    Ok(())
}

async fn doctor_cmd(cfg: &EngineConfig) -> Result<()> {
    info!("doctor: starting");
    doctor::check_config(cfg)?;

    if cfg.backend == BackendKind::Shared {
        let store = manager::open_store(cfg).await.context("shared backend")?;
        store.ping().await.context("shared backend ping")?;
        info!("doctor: shared backend reachable");
    } else {
        warn!("doctor: in-memory backend; run a single worker process only");
    }

    info!("doctor: OK");
    Ok(())
}

async fn health(cfg: EngineConfig) -> Result<()> {
    let m = SessionManager::from_config(cfg).await;
    let report = m.health().await;
    info!("health: {} ({} backend{})", report.status(), report.backend, if report.degraded { ", degraded" } else { "" });
    print_json(&report)?;
    anyhow::ensure!(report.reachable, "{} backend unreachable", report.backend);
    Ok(())
}

async fn replay(cfg: EngineConfig, path: &str, frame_interval_ms: u64, print_frames: bool) -> Result<()> {
    let text = tokio::fs::read_to_string(path).await.with_context(|| format!("read {}", path))?;
    let mut frames = Vec::new();
    for (n, line) in text.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') { continue; }
        let dets: Vec<Detection> = serde_json::from_str(line).with_context(|| format!("{}:{}", path, n + 1))?;
        frames.push(dets);
    }
    info!("replay: {} frame(s) from {}", frames.len(), path);

    // Replayed frames carry no timestamps; drive time from the frame interval.
    let clock = Arc::new(ManualClock::new(0));
    let m = SessionManager::from_config(cfg).await.with_clock(clock.clone());

    let (id, number) = m.start().await?;
    info!("replay: session {} (#{})", id, number);
    for dets in frames {
        clock.advance_ms(frame_interval_ms as i64);
        let report = m.advance(&id, Frame::Detections(dets)).await?;
        if print_frames {
            println!("{}", serde_json::to_string(&report)?);
        }
    }
    let summary = m.stop(&id).await?;
    print_json(&summary)?;
    Ok(())
}

fn print_json<T: Serialize>(v: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(v)?);
    Ok(())
}
