//! voxline - streaming speech playback from the command line
//!
//! Subcommands:
//! - `play`: queue audio files as segments of one session and play them gaplessly
//! - `chunk`: show how text would be split into provider requests
//! - `devices`: list audio output devices

use std::io::Read;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use tokio::signal;
use tracing::{debug, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use voxline_common::events::VoxEvent;
use voxline_player::audio::{CpalOutput, CpalOutputFactory, OutputFactory, VirtualOutputFactory};
use voxline_player::provider::FileProvider;
use voxline_player::{BootstrapConfig, Completion, EngineConfig, PlaybackEngine, TextChunker};

/// Command-line arguments for voxline
#[derive(Parser, Debug)]
#[command(name = "voxline")]
#[command(about = "Streaming speech playback engine")]
#[command(version)]
struct Args {
    /// Configuration file (overrides VOXLINE_CONFIG and the platform default)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Output device name
    #[arg(long, global = true, env = "VOXLINE_DEVICE")]
    device: Option<String>,

    /// Play against a virtual clock instead of an audio device
    #[arg(long, global = true)]
    dry_run: bool,

    /// Sample rate of provider PCM (Hz)
    #[arg(long, global = true, env = "VOXLINE_SAMPLE_RATE")]
    sample_rate: Option<u32>,

    /// Queue loop polling interval (milliseconds)
    #[arg(long, global = true, env = "VOXLINE_POLL_INTERVAL_MS")]
    poll_interval_ms: Option<u64>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Play audio files (WAV or raw 16-bit PCM) as consecutive segments
    Play {
        /// Files to play, in order
        #[arg(required = true)]
        files: Vec<PathBuf>,

        /// Bytes per simulated network read
        #[arg(long, default_value_t = voxline_player::provider::file::DEFAULT_CHUNK_BYTES)]
        chunk_bytes: usize,

        /// Delay before each read (milliseconds), simulating a slow provider
        #[arg(long, default_value_t = 0)]
        pace_ms: u64,
    },

    /// Print how text is split into segments
    Chunk {
        /// Maximum characters per chunk (defaults to the configured limit)
        #[arg(long)]
        max: Option<usize>,

        /// Text file to read, or `-` for stdin
        #[arg(default_value = "-")]
        input: String,
    },

    /// List audio output devices
    Devices,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let bootstrap = BootstrapConfig::load(args.config.as_deref())
        .context("Failed to load configuration")?;

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            let level = &bootstrap.logging.level;
            format!("voxline_player={level},voxline={level}").into()
        }))
        .with(tracing_subscriber::fmt::layer())
        .init();

    debug!(
        "voxline v{} [{}] built {} ({})",
        env!("CARGO_PKG_VERSION"),
        env!("GIT_HASH"),
        env!("BUILD_TIMESTAMP"),
        env!("BUILD_PROFILE")
    );

    let config = apply_overrides(bootstrap.engine, &args)?;

    match args.command {
        Command::Play {
            ref files,
            chunk_bytes,
            pace_ms,
        } => play(config, args.dry_run, files, chunk_bytes, pace_ms).await,
        Command::Chunk { max, ref input } => {
            chunk(max.unwrap_or(config.max_chunk_length), input)
        }
        Command::Devices => devices(),
    }
}

/// Layer command-line values over the configuration file.
fn apply_overrides(mut config: EngineConfig, args: &Args) -> Result<EngineConfig> {
    if let Some(device) = &args.device {
        config.output.device = Some(device.clone());
    }
    if let Some(rate) = args.sample_rate {
        config.sample_rate = rate;
    }
    if let Some(poll) = args.poll_interval_ms {
        config.poll_interval_ms = poll;
    }
    config.validate().context("Invalid engine configuration")?;
    Ok(config)
}

async fn play(
    config: EngineConfig,
    dry_run: bool,
    files: &[PathBuf],
    chunk_bytes: usize,
    pace_ms: u64,
) -> Result<()> {
    let factory: Arc<dyn OutputFactory> = if dry_run {
        info!("Dry run: using virtual output");
        Arc::new(VirtualOutputFactory::new())
    } else {
        Arc::new(CpalOutputFactory::new(
            config.output.device.clone(),
            config.output.buffer_frames,
        ))
    };

    let mut provider = FileProvider::new(config.sample_rate).with_chunk_bytes(chunk_bytes);
    if pace_ms > 0 {
        provider = provider.with_pacing(Duration::from_millis(pace_ms));
    }

    let engine = PlaybackEngine::new(config, factory).context("Failed to create playback engine")?;
    let reporter = tokio::spawn(report_events(engine.subscribe()));

    engine
        .start_session()
        .await
        .context("Failed to start playback session")?;

    for file in files {
        engine
            .queue(provider.factory(file.clone()))
            .with_context(|| format!("Failed to queue {}", file.display()))?;
    }

    let outcome = tokio::select! {
        outcome = engine.wait_for_completion() => outcome,
        _ = shutdown_signal() => {
            engine.stop().await;
            Completion::Stopped
        }
    };

    reporter.abort();

    match outcome {
        Completion::Drained => {
            info!("Playback complete");
            engine.stop().await;
            Ok(())
        }
        Completion::Stopped => {
            info!("Playback stopped");
            Ok(())
        }
        Completion::Failed(reason) => bail!("Playback failed: {}", reason),
    }
}

/// Log segment-level events as they happen.
async fn report_events(mut rx: tokio::sync::broadcast::Receiver<VoxEvent>) {
    use tokio::sync::broadcast::error::RecvError;

    loop {
        match rx.recv().await {
            Ok(VoxEvent::SegmentFailed { segment_id, reason, .. }) => {
                warn!("Segment {} skipped: {}", segment_id, reason);
            }
            Ok(VoxEvent::StateChanged { new_state, .. }) => {
                info!("State: {}", new_state);
            }
            Ok(_) => {}
            Err(RecvError::Lagged(n)) => debug!("Event reporter lagged by {} events", n),
            Err(RecvError::Closed) => break,
        }
    }
}

fn chunk(max: usize, input: &str) -> Result<()> {
    let text = if input == "-" {
        let mut text = String::new();
        std::io::stdin()
            .read_to_string(&mut text)
            .context("Failed to read stdin")?;
        text
    } else {
        std::fs::read_to_string(input).with_context(|| format!("Failed to read {}", input))?
    };

    let chunks = TextChunker::new(max).chunk(&text);
    for (index, chunk) in chunks.iter().enumerate() {
        println!("--- chunk {} ({} chars) ---", index + 1, chunk.chars().count());
        println!("{}", chunk);
    }
    Ok(())
}

fn devices() -> Result<()> {
    let devices = CpalOutput::list_devices().context("Failed to enumerate output devices")?;
    if devices.is_empty() {
        println!("No output devices found");
    }
    for name in devices {
        println!("{}", name);
    }
    Ok(())
}

/// Resolves on Ctrl+C or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                warn!("Failed to install signal handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, stopping playback");
        },
        _ = terminate => {
            info!("Received terminate signal, stopping playback");
        },
    }
}
