// Daybell - Scheduled audio playback daemon
// Opens the task store, wires the engine to the scheduler and waits for
// ctrl-c. Task and playlist management goes through the library facade.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use clap::Parser;
use tokio::sync::mpsc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use daybell::playback::{AudioOutput, EngineEvent, EngineTuning, PlaybackEngine, SilentOutput};
use daybell::{Config, Scheduler, TaskStore};

#[derive(Parser)]
#[command(name = "daybell")]
#[command(about = "Plays scheduled playlists at their appointed minute")]
struct Args {
    /// Use a config file other than the platform default
    #[arg(long)]
    config: Option<PathBuf>,

    /// Skip the audio device and run with a silent output
    #[arg(long)]
    silent: bool,

    /// Print the scheduled tasks and exit
    #[arg(long)]
    tasks: bool,
}

fn init_logging(log_dir: &Path) -> Result<()> {
    std::fs::create_dir_all(log_dir)?;

    // Daily rotating file appender
    let file_appender = tracing_appender::rolling::daily(log_dir, "daybell.log");
    let (file_writer, _guard) = tracing_appender::non_blocking(file_appender);

    // Base filter: info level for general logs, debug for daybell
    let base_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,daybell=debug"));

    let subscriber = tracing_subscriber::fmt()
        .with_writer(file_writer)
        .with_target(true)
        .with_level(true)
        .with_ansi(false)
        .with_env_filter(base_filter)
        .finish();

    tracing::subscriber::set_global_default(subscriber)?;

    // Prevent the guard from being dropped
    std::mem::forget(_guard);

    Ok(())
}

#[cfg(feature = "audio")]
fn open_output(silent: bool) -> Box<dyn AudioOutput> {
    use daybell::playback::RodioOutput;

    if silent {
        return Box::new(SilentOutput::new());
    }
    match RodioOutput::new() {
        Ok(output) => Box::new(output),
        Err(err) => {
            warn!("No audio device, falling back to silent output: {}", err);
            Box::new(SilentOutput::new())
        }
    }
}

#[cfg(not(feature = "audio"))]
fn open_output(_silent: bool) -> Box<dyn AudioOutput> {
    Box::new(SilentOutput::new())
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Load config - falls back to defaults if missing
    let config = match &args.config {
        Some(path) => Config::load_from(path)?,
        None => Config::load()?,
    };

    init_logging(&config.log_directory)?;
    info!("🔔 Daybell starting up");

    let store = Arc::new(TaskStore::open(&config.database_path)?);

    if args.tasks {
        return print_tasks(&store).await;
    }

    let (event_tx, mut event_rx) = mpsc::unbounded_channel();
    let engine = PlaybackEngine::new(
        open_output(args.silent),
        EngineTuning::from(&config.playback),
        Some(event_tx),
    );

    // Bump play counters as tracks actually start. Ad-hoc files carry id 0
    // and live outside the library, so they are skipped.
    let plays = store.clone();
    tokio::spawn(async move {
        while let Some(event) = event_rx.recv().await {
            if let EngineEvent::TrackStarted { track, .. } = event {
                if track.id != 0 {
                    if let Err(err) = plays.mark_track_played(track.id).await {
                        warn!("Could not bump play count for track {}: {}", track.id, err);
                    }
                }
            }
        }
    });

    let enabled = store.enabled_tasks().await?.len();
    info!("Loaded {} enabled task(s)", enabled);

    let scheduler = Scheduler::new(
        store.clone(),
        engine.clone(),
        Duration::from_secs(config.scheduler.tick_seconds),
    );
    let scheduler_task = scheduler.spawn();

    println!("🔔 Daybell is running. Press Ctrl-C to stop.");
    tokio::signal::ctrl_c().await?;

    info!("Shutting down");
    scheduler_task.abort();
    engine.stop().await;

    Ok(())
}

async fn print_tasks(store: &TaskStore) -> Result<()> {
    let tasks = store.get_tasks().await?;
    if tasks.is_empty() {
        println!("No scheduled tasks.");
        return Ok(());
    }
    for task in tasks {
        println!(
            "{:>4}  {:02}:{:02}  {:<8}  {:<3}  {} ({})",
            task.id,
            task.hour,
            task.minute,
            task.repeat.mode_tag(),
            if task.is_enabled { "on" } else { "off" },
            task.name,
            task.playlist_name,
        );
    }
    Ok(())
}
