//! dupelens CLI — thin wrapper that wires the nine backbone components
//! together, installs signal handlers, and runs a scan plus continuous
//! processing session.

use clap::Parser;
use dupelens_core::config::ConfigWatcher;
use dupelens_core::resource::ResourceStats;
use dupelens_core::types::Mode;
use dupelens_core::{ConfigStore, DbQueue, DuplicateLinker, FileScanner, ProcessingPipeline, ShutdownCoordinator, Transcoder};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

/// dupelens — perceptual deduplication engine for local media libraries.
#[derive(Parser)]
#[command(name = "dupelens", version, about)]
struct Cli {
    /// Directories to scan and monitor (repeatable)
    #[arg(required = true)]
    dirs: Vec<PathBuf>,

    /// Do not recurse into subdirectories
    #[arg(long)]
    no_recursive: bool,

    /// Path to the SQLite database file
    #[arg(long, default_value = "dupelens.sqlite3")]
    db: PathBuf,

    /// Directory for transcoded-JPEG cache files
    #[arg(long, default_value = "dupelens-cache")]
    cache_dir: PathBuf,

    /// Explicit config file path (defaults to the built-in candidate list)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Override the configured dedup mode for this run
    #[arg(long, value_enum)]
    mode: Option<CliMode>,

    /// Scan once and exit instead of running the continuous pipeline
    #[arg(long)]
    scan_once: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
enum CliMode {
    Fast,
    Balanced,
    Quality,
}

impl From<CliMode> for Mode {
    fn from(value: CliMode) -> Self {
        match value {
            CliMode::Fast => Mode::Fast,
            CliMode::Balanced => Mode::Balanced,
            CliMode::Quality => Mode::Quality,
        }
    }
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("dupelens=info".parse().unwrap()),
        )
        .with_target(false)
        .init();

    let cli = Cli::parse();

    let candidate_paths = match &cli.config {
        Some(path) => vec![path.clone()],
        None => dupelens_core::config::default_candidate_paths(),
    };

    let config = Arc::new(ConfigStore::load_or_default(&candidate_paths).unwrap_or_else(|e| {
        eprintln!("failed to load configuration: {e}");
        std::process::exit(1);
    }));

    if let Some(mode) = cli.mode {
        let mode: Mode = mode.into();
        let config_path = candidate_paths.first().cloned().unwrap_or_else(|| PathBuf::from("config.json"));
        if let Err(e) = config.set(
            &config_path,
            serde_json::json!({ "dedup_mode": mode.as_str() }),
            vec!["dedup_mode".to_string()],
        ) {
            warn!("could not persist --mode override: {e}");
        }
    }

    let db = DbQueue::open(&cli.db).unwrap_or_else(|e| {
        eprintln!("failed to open database at {}: {e}", cli.db.display());
        std::process::exit(1);
    });

    let shutdown = Arc::new(ShutdownCoordinator::new());
    shutdown.start_watcher();
    install_signal_handlers(&shutdown);

    let scanner = Arc::new(FileScanner::new(db.clone(), config.clone()));
    info!(dirs = ?cli.dirs, "starting scan");
    let mut total = dupelens_core::types::ScanStats::default();
    for dir in &cli.dirs {
        total += scanner.scan(dir, !cli.no_recursive);
    }
    info!(
        discovered = total.discovered,
        skipped = total.skipped,
        unchanged = total.unchanged,
        changed = total.changed,
        "initial scan complete"
    );

    if cli.scan_once {
        return;
    }

    let transcoder = Transcoder::new(db.clone(), config.clone(), cli.cache_dir.clone())
        .unwrap_or_else(|e| {
            eprintln!("failed to initialize transcoder: {e}");
            std::process::exit(1);
        });
    if let Err(e) = transcoder.recover_in_progress_jobs() {
        warn!("failed to recover in-progress transcode jobs: {e}");
    }
    let resource_stats = ResourceStats::new();
    let transcoder = Arc::new(transcoder.with_resource_stats(resource_stats.clone()));

    let monitor_running = Arc::new(AtomicBool::new(true));
    let resource_logger =
        dupelens_core::resource::spawn_logger(resource_stats, monitor_running.clone(), Duration::from_secs(60));

    let pipeline = Arc::new(ProcessingPipeline::new(db.clone(), config.clone(), shutdown.clone()));
    pipeline.subscribe_to_config();

    let linker = Arc::new(DuplicateLinker::new(db.clone(), config.clone(), shutdown.clone()));
    linker.subscribe_to_config();

    let mut watcher = candidate_paths
        .iter()
        .find(|p| p.exists())
        .cloned()
        .map(|path| ConfigWatcher::start(config.clone(), path, Duration::from_secs(2)));

    let shutdown_for_transcoder = shutdown.clone();
    let transcoder_handle = {
        let transcoder = transcoder.clone();
        std::thread::spawn(move || {
            transcoder.run_loop(|| shutdown_for_transcoder.is_shutdown_requested());
        })
    };

    let pipeline_handle = {
        let pipeline = pipeline.clone();
        std::thread::spawn(move || {
            pipeline.run_loop();
        })
    };

    let linker_handle = {
        let linker = linker.clone();
        std::thread::spawn(move || {
            linker.run_loop();
        })
    };

    shutdown.wait_for_shutdown();
    info!(reason = ?shutdown.reason(), "shutdown requested, waiting for workers to drain");

    monitor_running.store(false, Ordering::Relaxed);
    let _ = transcoder_handle.join();
    let _ = pipeline_handle.join();
    let _ = linker_handle.join();
    // The resource logger sleeps in up-to-60s increments; it's pure
    // observability, so shutdown doesn't wait on it.
    drop(resource_logger);
    if let Some(w) = &mut watcher {
        w.stop();
    }
    db.stop();
    info!("shutdown complete");
}

#[cfg(unix)]
fn install_signal_handlers(shutdown: &Arc<ShutdownCoordinator>) {
    use signal_hook::consts::{SIGINT, SIGTERM};
    use signal_hook::iterator::Signals;

    let shutdown = shutdown.clone();
    let mut signals = match Signals::new(&[SIGINT, SIGTERM]) {
        Ok(signals) => signals,
        Err(e) => {
            warn!("failed to install signal handlers: {e}");
            return;
        }
    };
    std::thread::spawn(move || {
        for signal in signals.forever() {
            shutdown.notify_signal(signal);
        }
    });
}

#[cfg(not(unix))]
fn install_signal_handlers(_shutdown: &Arc<ShutdownCoordinator>) {
    warn!("OS signal handling is only wired on unix targets; use --scan-once or SIGKILL to stop");
}
