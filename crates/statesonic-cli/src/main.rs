//! Statesonic CLI - The `statesonic` command.
//!
//! Listen to recorded state transitions:
//!
//! - **replay**: feed a JSON-lines recording through the middleware, printing
//!   every pipeline event as a JSON line and playing the tones
//! - **preview**: print and play the tone a single path change maps to
//! - **render**: replay a recording offline into a WAV file
//! - **init-config**: write the commented default configuration file

mod render;
mod replay;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use replay::Pacing;
use statesonic_audio::sonify::{self, DEFAULT_DURATION_MS};
use statesonic_audio::synth::DEFAULT_SAMPLE_RATE;
use statesonic_audio::{AudioContextManager, MemoryBackend, PlaybackScheduler};
use statesonic_core::{DiffChunk, DiffEntry, StateValue};
use statesonic_middleware::{Environment, EventBus, MiddlewareConfig, MiddlewareOptions};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Statesonic - hear your application state change
#[derive(Parser, Debug)]
#[command(name = "statesonic")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Sonify state transitions recorded as JSON lines", long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Replay a recording, printing events and playing tones
    Replay {
        /// JSON-lines recording
        #[arg(value_name = "FILE")]
        file: PathBuf,

        /// Configuration file (defaults to the user config, if any)
        #[arg(short, long, value_name = "PATH")]
        config: Option<PathBuf>,

        /// Base tone duration in milliseconds
        #[arg(short, long, value_name = "MS")]
        duration: Option<f64>,

        /// Pause between steps, as if the recording happened live
        #[arg(long)]
        realtime: bool,

        /// Step spacing in milliseconds when replaying in real time
        #[arg(long, value_name = "MS", default_value_t = 250)]
        step_ms: u64,

        /// Print events without opening an audio device
        #[arg(long)]
        mute: bool,
    },

    /// Print and play the tone for one path
    Preview {
        /// Dotted state path
        #[arg(value_name = "PATH")]
        path: String,

        /// New value, as JSON
        #[arg(long, value_name = "JSON", default_value = "1")]
        value: String,

        /// Previous value, as JSON (absent if omitted)
        #[arg(long, value_name = "JSON")]
        previous: Option<String>,

        /// Tone duration in milliseconds
        #[arg(short, long, value_name = "MS", default_value_t = DEFAULT_DURATION_MS)]
        duration: f64,
    },

    /// Render a recording to a WAV file
    Render {
        /// JSON-lines recording
        #[arg(value_name = "FILE")]
        file: PathBuf,

        /// Output WAV file
        #[arg(short, long, value_name = "OUT")]
        output: PathBuf,

        /// Configuration file (defaults to the user config, if any)
        #[arg(short, long, value_name = "PATH")]
        config: Option<PathBuf>,

        /// Base tone duration in milliseconds
        #[arg(short, long, value_name = "MS")]
        duration: Option<f64>,

        /// Step spacing in milliseconds
        #[arg(long, value_name = "MS", default_value_t = 250)]
        step_ms: u64,

        /// Sample rate of the output
        #[arg(long, default_value_t = DEFAULT_SAMPLE_RATE)]
        sample_rate: u32,
    },

    /// Write the default configuration file
    InitConfig {
        /// Target path (defaults to the user config location)
        #[arg(value_name = "PATH")]
        path: Option<PathBuf>,

        /// Overwrite an existing file
        #[arg(short, long)]
        force: bool,
    },
}

fn main() -> Result<()> {
    let args = Args::parse();

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp(None)
        .init();

    match args.command {
        Commands::Replay {
            file,
            config,
            duration,
            realtime,
            step_ms,
            mute,
        } => {
            let config = load_config(config.as_deref(), duration)?;
            let step = if realtime { Duration::from_millis(step_ms) } else { Duration::ZERO };
            runtime(false)?.block_on(run_replay(&file, config, step, mute))
        }
        Commands::Preview {
            path,
            value,
            previous,
            duration,
        } => runtime(false)?.block_on(run_preview(path, &value, previous.as_deref(), duration)),
        Commands::Render {
            file,
            output,
            config,
            duration,
            step_ms,
            sample_rate,
        } => {
            let config = load_config(config.as_deref(), duration)?;
            runtime(true)?.block_on(run_render(&file, &output, config, step_ms, sample_rate))
        }
        Commands::InitConfig { path, force } => init_config(path, force),
    }
}

/// A single-threaded runtime. Offline renders run on a paused clock that
/// jumps ahead whenever every task is waiting on a timer.
fn runtime(paused: bool) -> Result<tokio::runtime::Runtime> {
    let mut builder = tokio::runtime::Builder::new_current_thread();
    builder.enable_time();
    if paused {
        builder.start_paused(true);
    }
    builder.build().context("Failed to start async runtime")
}

fn load_config(path: Option<&Path>, duration: Option<f64>) -> Result<MiddlewareConfig> {
    let mut config = match path {
        Some(path) => MiddlewareConfig::load_from(path)
            .with_context(|| format!("Failed to load config: {}", path.display()))?,
        None => MiddlewareConfig::load_or_default(),
    };
    if let Some(duration) = duration {
        config.duration_ms = duration;
    }
    config.validate().context("Invalid configuration")?;
    Ok(config)
}

fn tail_for(config: &MiddlewareConfig) -> Duration {
    Duration::from_secs_f64(sonify::clamp_duration(config.duration_ms) / 1000.0) + Duration::from_millis(500)
}

async fn run_replay(file: &Path, config: MiddlewareConfig, step: Duration, mute: bool) -> Result<()> {
    let steps = replay::load_recording(file)?;
    log::info!("Replaying {} ({} lines)", file.display(), steps.len());

    let bus = EventBus::new();
    let events = bus.subscribe();
    let context = if mute {
        AudioContextManager::new(MemoryBackend::new().factory())
    } else {
        AudioContextManager::global().clone()
    };
    let scheduler = PlaybackScheduler::new(context.clone(), bus.clone());
    let pacing = Pacing {
        step,
        tail: tail_for(&config),
    };
    let options = MiddlewareOptions::from_config(config)
        .environment(Environment::Development)
        .event_bus(bus)
        .scheduler(scheduler);

    let result = replay::replay_steps(steps, options, pacing, &events, |event| {
        println!("{}", event.to_json_line()?);
        Ok(())
    })
    .await;

    if let Err(e) = context.cleanup() {
        log::warn!("Failed to close audio context: {}", e);
    }
    result.map(|_| ())
}

async fn run_preview(path: String, value: &str, previous: Option<&str>, duration: f64) -> Result<()> {
    let value: serde_json::Value = serde_json::from_str(value).context("--value is not valid JSON")?;
    let previous = match previous {
        Some(previous) => {
            StateValue::from(serde_json::from_str::<serde_json::Value>(previous).context("--previous is not valid JSON")?)
        }
        None => StateValue::Undefined,
    };

    let chunk = DiffChunk::new(path, DiffEntry::new(previous, StateValue::from(value)));
    let sonic = sonify::chunk_to_sonic(&chunk, duration, None);
    println!("{}", serde_json::to_string_pretty(&sonic)?);

    let context = AudioContextManager::global().clone();
    let scheduler = PlaybackScheduler::new(context.clone(), EventBus::new());
    if !scheduler.play_sonic_chunk(&sonic).await {
        log::warn!("Audio unavailable, nothing was played");
    }
    if let Err(e) = context.cleanup() {
        log::warn!("Failed to close audio context: {}", e);
    }
    Ok(())
}

async fn run_render(file: &Path, output: &Path, config: MiddlewareConfig, step_ms: u64, sample_rate: u32) -> Result<()> {
    let steps = replay::load_recording(file)?;
    log::info!("Rendering {} -> {}", file.display(), output.display());

    let pacing = Pacing {
        step: Duration::from_millis(step_ms),
        tail: tail_for(&config),
    };
    let summary = render::render_steps(steps, config, pacing, output, sample_rate).await?;

    log::info!(
        "Render complete: {} step(s), {} voice(s), {:.2}s",
        summary.steps,
        summary.voices,
        summary.seconds
    );
    Ok(())
}

fn init_config(path: Option<PathBuf>, force: bool) -> Result<()> {
    let path = match path {
        Some(path) => path,
        None => MiddlewareConfig::config_path()?,
    };
    if path.exists() && !force {
        anyhow::bail!("{} already exists (use --force to overwrite)", path.display());
    }
    MiddlewareConfig::write_default_config(&path)?;
    println!("Wrote {}", path.display());
    Ok(())
}
