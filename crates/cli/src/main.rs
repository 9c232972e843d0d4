use anyhow::Context;
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info, warn};
use vpkit_core::board::Board;
use vpkit_core::quiescence::Suspender;
use vpkit_core::snapshot::{Outcome, SnapshotReport, SnapshotSettings, Snapshotter, StartupRestore};

#[derive(Parser, Debug)]
#[command(author, version, about = "vpkit virtual prototype runner", long_about = None)]
struct Args {
    /// Path to the system manifest (YAML)
    #[arg(short, long)]
    system: PathBuf,

    /// Enable debug-level tracing
    #[arg(short, long)]
    trace: bool,

    /// Number of simulation steps to execute
    #[arg(long, default_value = "1000")]
    steps: u64,

    /// Take a system snapshot after this many steps
    #[arg(long)]
    take_at: Option<u64>,

    /// Load a system snapshot before the first step
    #[arg(long)]
    load: bool,

    /// Restore checkpointed peripherals on startup, overriding the manifest
    #[arg(long)]
    load_on_startup: bool,

    /// Directory for snapshot files, overriding the manifest
    #[arg(long)]
    snapshot_dir: Option<PathBuf>,

    /// Write the snapshot reports as JSON
    #[arg(long)]
    report: Option<PathBuf>,
}

fn log_report(report: &SnapshotReport) {
    for o in &report.outcomes {
        match &o.outcome {
            Outcome::Completed => info!("  {}: ok", o.name),
            Outcome::NotCustomized => info!("  {}: nothing to do", o.name),
            Outcome::Failed(msg) => error!("  {}: {}", o.name, msg),
            Outcome::Dropped => warn!("  {}: component dropped", o.name),
        }
    }
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    if args.trace {
        tracing_subscriber::fmt()
            .with_max_level(tracing::Level::DEBUG)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_max_level(tracing::Level::INFO)
            .init();
    }

    info!("Starting vpkit");
    info!("Loading system manifest: {:?}", args.system);
    let manifest = vpkit_config::SystemManifest::from_file(&args.system)?;

    let mut settings = SnapshotSettings::from(&manifest.snapshot);
    if let Some(dir) = args.snapshot_dir {
        settings.directory = dir;
    }
    if args.load_on_startup {
        settings.load_on_startup = true;
    }
    std::fs::create_dir_all(&settings.directory)
        .with_context(|| format!("Failed to create snapshot directory {:?}", settings.directory))?;

    let suspender = Arc::new(Suspender::new());
    let snapshotter = Snapshotter::with_settings(suspender.clone(), settings);
    let mut board = Board::from_manifest(&manifest, suspender);
    board.attach_checkpoints(&snapshotter)?;
    info!(
        "Board '{}': {} peripherals, {} checkpointed",
        board.name,
        board.peripherals.len(),
        snapshotter.len()
    );

    let mut reports = Vec::new();

    for (name, result) in board.restore_on_startup() {
        match result {
            Ok(StartupRestore::Restored(status)) => info!("Restored '{}' on startup ({:?})", name, status),
            Ok(skipped) => info!("Startup restore of '{}' skipped ({:?})", name, skipped),
            Err(e) => error!("Startup restore of '{}' failed: {}", name, e),
        }
    }

    if args.load {
        let report = snapshotter.load_system_snapshot();
        log_report(&report);
        reports.push(report);
    }

    info!("Running for {} steps...", args.steps);
    for step in 1..=args.steps {
        match board.step() {
            Some(irqs) => {
                for id in irqs {
                    tracing::debug!("Step {}: interrupt from '{}'", step, id);
                }
            }
            None => break,
        }

        if args.take_at == Some(step) {
            let report = snapshotter.take_system_snapshot();
            log_report(&report);
            reports.push(report);
        }
    }

    info!("Simulation finished after {} steps", board.steps());

    if let Some(path) = &args.report {
        let json = serde_json::to_string_pretty(&reports)?;
        std::fs::write(path, json)
            .with_context(|| format!("Failed to write report to {:?}", path))?;
        info!("Snapshot report written to {:?}", path);
    }

    let failed: usize = reports.iter().map(|r| r.failures().count()).sum();
    if failed > 0 {
        anyhow::bail!("{} participant snapshot operation(s) failed", failed);
    }

    Ok(())
}
