use clap::Parser;
use smoothing_harness::cli::{self, Cli, Commands};
use smoothing_harness::config::HarnessConfig;
use smoothing_harness::coordination::{install_signal_handlers, CheckpointSignal};
use smoothing_harness::error::{HarnessError, Result};
use smoothing_harness::output::ChannelFiles;
use smoothing_harness::persistence::{CheckpointService, FileStateStore};
use smoothing_harness::smoothing::{build_smoothing, SmoothingConfig, SmoothingKind};
use smoothing_harness::toy::{GaussianBlobs, LogisticRegression};
use smoothing_harness::training::{RunOutcome, RunSettings, TrainingOrchestrator};
use std::path::{Path, PathBuf};
use tracing::{error, info, warn};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Run {
            config,
            run_dir,
            resume,
            epochs,
            strategy,
        } => run_training(&config, run_dir, resume, epochs, strategy).await,
        Commands::Inspect { run_dir, state_dir } => cli::show_progress(&run_dir, &state_dir),
        Commands::Average {
            run_dirs,
            state_dir,
        } => cli::show_average(&run_dirs, &state_dir),
    }
}

async fn run_training(
    config_dir: &Path,
    run_dir: Option<PathBuf>,
    resume: bool,
    epochs: Option<usize>,
    strategy: Option<SmoothingKind>,
) -> Result<()> {
    let mut config = HarnessConfig::load_from(config_dir)?;
    if let Some(epochs) = epochs {
        config.run.epochs = epochs;
    }
    if let Some(kind) = strategy.filter(|k| *k != config.smoothing.kind()) {
        config.smoothing = SmoothingConfig::defaults(kind);
    }
    config.ensure_valid()?;

    let run_id = uuid::Uuid::new_v4().to_string();
    let run_dir = run_dir.unwrap_or_else(|| PathBuf::from("runs").join(&run_id));
    if config.logging.log_dir.is_none() {
        config.logging.log_dir = Some(run_dir.join("logs"));
    }
    let _log_guard = smoothing_harness::logging::init_logging(&config.logging);

    let state_dir = run_dir.join(&config.checkpoint.state_dir);
    let checkpoints = CheckpointService::new(Box::new(FileStateStore::new(&state_dir)?));
    if !resume && checkpoints.has_checkpoint("progress")? {
        return Err(HarnessError::InvalidConfig(format!(
            "{} already holds a run, pass --resume to continue it",
            run_dir.display()
        )));
    }
    let written = config.write_to(&run_dir)?;
    info!("Effective configuration written to {}", written.display());

    let signal = CheckpointSignal::new();
    install_signal_handlers(signal.clone()).await?;

    let data = GaussianBlobs::new(&config.data, config.run.seed);
    let model = LogisticRegression::new(data.features(), &config.model, config.run.seed);
    let smoothing = build_smoothing(&config.smoothing)?;
    let output = ChannelFiles::new(&run_dir)?;
    let seed = if config.run.deterministic {
        config.run.seed
    } else {
        rand::random()
    };

    let mut orchestrator = TrainingOrchestrator::new(
        RunSettings::from(&config),
        model,
        data,
        smoothing,
        checkpoints,
        Box::new(output),
    )
    .with_signal(signal)
    .with_seed(seed)
    .with_run_id(run_id);

    if resume && !orchestrator.restore()? {
        warn!("--resume given but {} has no saved progress, starting fresh", state_dir.display());
    }

    info!(
        "Starting {} epochs with {} smoothing in {}",
        config.run.epochs,
        config.smoothing.kind(),
        run_dir.display()
    );

    // Training is synchronous; keep it off the runtime threads that deliver signals
    let outcome = tokio::task::spawn_blocking(move || orchestrator.run())
        .await
        .map_err(|e| HarnessError::Runtime(format!("training task failed: {}", e)))?;

    match outcome {
        Ok(RunOutcome::Completed(stats)) => {
            if let Some(last) = stats.last_epoch() {
                let loss = |p: &Option<smoothing_harness::training::PassSummary>| {
                    p.as_ref().map(|p| p.mean_loss)
                };
                info!(
                    "Run {} complete: train loss {:?}, test loss {:?}, smoothed test loss {:?}",
                    stats.run_id,
                    loss(&last.train),
                    loss(&last.test_normal),
                    loss(&last.test_smoothed)
                );
            }
            println!("Run complete. Output in {}", run_dir.display());
            Ok(())
        }
        Ok(RunOutcome::Interrupted {
            epoch,
            phase,
            index,
        }) => {
            println!(
                "Checkpoint saved at epoch {} ({} batch {}). Resume with:\n  smoothing-harness run --run-dir {} --resume",
                epoch,
                phase,
                index,
                run_dir.display()
            );
            Ok(())
        }
        Err(e) => {
            error!("Run failed: {}", e);
            Err(e)
        }
    }
}
