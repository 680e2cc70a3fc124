//! Frame Host
//!
//! Demo host with a fixed-rate frame loop on the main thread. A local node
//! mines on the tokio runtime while the frame loop submits game actions
//! and receives results and new blocks through the bridge.

use anyhow::{Context, Result};
use bridge_runtime::{Agent, NodeSession, ShutdownPolicy};
use clap::{Parser, ValueEnum};
use local_node::LocalNode;
use parking_lot::Mutex;
use std::{
    path::PathBuf,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::{Duration, Instant},
};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

mod actions;
mod config;

use actions::GameAction;
use config::HostConfig;

/// Shutdown policy for queued callbacks
#[derive(Debug, Clone, Copy, ValueEnum)]
enum PolicyArg {
    /// Run queued callbacks before stopping
    Flush,
    /// Drop queued callbacks
    Discard,
}

impl From<PolicyArg> for ShutdownPolicy {
    fn from(arg: PolicyArg) -> Self {
        match arg {
            PolicyArg::Flush => ShutdownPolicy::Flush,
            PolicyArg::Discard => ShutdownPolicy::Discard,
        }
    }
}

/// Frame-driven host running a local ledger node
#[derive(Parser, Debug)]
#[command(name = "frame-host")]
#[command(about = "Drive a local ledger node from a fixed-rate frame loop", long_about = None)]
struct Args {
    /// JSON config file; flags below override it
    #[arg(long)]
    config: Option<PathBuf>,

    /// Frames per second
    #[arg(long)]
    fps: Option<u32>,

    /// Frames to run (0 = until Ctrl+C)
    #[arg(long)]
    frames: Option<u64>,

    /// Block interval in milliseconds
    #[arg(long)]
    block_time_ms: Option<u64>,

    /// Drain interval in milliseconds (0 = every frame)
    #[arg(long)]
    drain_interval_ms: Option<u64>,

    /// What happens to queued callbacks on shutdown
    #[arg(long, value_enum)]
    shutdown_policy: Option<PolicyArg>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,
}

impl Args {
    fn host_config(&self) -> Result<HostConfig> {
        let mut config = match &self.config {
            Some(path) => HostConfig::load(path)?,
            None => HostConfig::default(),
        };
        if let Some(fps) = self.fps {
            config.fps = fps;
        }
        if let Some(frames) = self.frames {
            config.frames = frames;
        }
        if let Some(block_time_ms) = self.block_time_ms {
            config.node.block_interval_ms = block_time_ms;
        }
        if let Some(interval_ms) = self.drain_interval_ms {
            config.drain.interval_ms = interval_ms;
        }
        if let Some(policy) = self.shutdown_policy {
            config.drain.shutdown_policy = policy.into();
        }
        Ok(config)
    }
}

fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&args.log_level));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = args.host_config()?;
    anyhow::ensure!(config.fps > 0, "fps must be positive");

    // Background work runs on the runtime; the main thread stays the host thread
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .thread_name("frame-host-worker")
        .build()
        .context("Failed to build tokio runtime")?;

    let running = Arc::new(AtomicBool::new(true));
    {
        let running = running.clone();
        runtime.spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::info!("Shutting down...");
                running.store(false, Ordering::SeqCst);
            }
        });
    }

    run_host(&config, runtime.handle().clone(), &running)?;

    runtime.shutdown_timeout(Duration::from_secs(1));
    Ok(())
}

fn run_host(
    config: &HostConfig,
    runtime: tokio::runtime::Handle,
    running: &AtomicBool,
) -> Result<()> {
    let node: Arc<LocalNode<GameAction>> = Arc::new(LocalNode::new(
        config.identity()?,
        config.node.clone(),
        runtime.clone(),
    ));
    let mut agent = Agent::new(node.clone(), config.drain.clone(), runtime);

    tracing::info!("Starting frame host");
    tracing::info!("  Player: {}", node.signing_identity().address());
    tracing::info!("  Frame rate: {}fps", config.fps);
    tracing::info!("  Block time: {}ms", config.node.block_interval_ms);
    tracing::info!("  Drain interval: {}ms", config.drain.interval_ms);

    let blocks_seen = Arc::new(Mutex::new(0u64));
    {
        let blocks_seen = blocks_seen.clone();
        agent.on_tip_changed(move |tip| {
            *blocks_seen.lock() += 1;
            tracing::info!("Block {} | {} txs | {}", tip.index, tip.transaction_count, tip.hash);
        })?;
    }
    agent.start()?;

    agent.submit(
        vec![GameAction::Spawn {
            name: config.player_name.clone(),
        }],
        |result| match result {
            Ok(tx_id) => tracing::info!("Spawn submitted: {}", tx_id),
            Err(e) => tracing::error!("Spawn failed: {}", e),
        },
    )?;

    let frame_duration = Duration::from_secs(1) / config.fps;
    let submit_every = config.submit_every.max(1);
    let mut frame: u64 = 0;

    tracing::info!("Press Ctrl+C to stop.");
    while running.load(Ordering::SeqCst) && (config.frames == 0 || frame < config.frames) {
        let frame_start = Instant::now();
        frame += 1;

        if frame % submit_every == 0 {
            let step = (frame / submit_every) as i32;
            let actions = vec![
                GameAction::Move {
                    dx: step % 3 - 1,
                    dy: 1,
                },
                GameAction::Score(1),
            ];
            agent.submit(actions, move |result| match result {
                Ok(tx_id) => tracing::debug!("Frame {} move submitted: {}", frame, tx_id),
                Err(e) => tracing::warn!("Frame {} move failed: {}", frame, e),
            })?;
        }

        if let Some(report) = agent.tick(frame_start)? {
            if report.failed > 0 {
                tracing::warn!("Frame {}: {} callbacks failed", frame, report.failed);
            }
        }

        if let Some(sleep_time) = frame_duration.checked_sub(frame_start.elapsed()) {
            std::thread::sleep(sleep_time);
        }
    }

    let report = agent.stop()?;
    let address = agent.address();
    let state = node.ledger().state_at(&address, None)?;
    let stats = agent.drain_stats();

    tracing::info!(
        "Stopped after {} frames: {} blocks seen, {} callbacks run ({} on shutdown), {} failed",
        frame,
        *blocks_seen.lock(),
        stats.executed,
        report.executed,
        stats.failed
    );
    match state {
        Some(state) => tracing::info!("Final player state: {}", state),
        None => tracing::info!("Player never reached the chain"),
    }
    Ok(())
}
