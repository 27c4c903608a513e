use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use tracing::warn;

use crate::error::{HarnessError, Result};
use crate::persistence::{CheckpointService, FileStateStore};
use crate::smoothing::SmoothingKind;
use crate::training::{EpochContext, PassSummary, RunStatistics};

#[derive(Parser)]
#[command(name = "smoothing-harness")]
#[command(version = "0.1.0")]
#[command(about = "Resumable training runs with weight smoothing", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Train the toy model, checkpointing on SIGQUIT/SIGTERM
    Run {
        /// Directory holding default.toml and environment overrides
        #[arg(short, long, default_value = "config")]
        config: PathBuf,
        /// Run directory for output channels and state (default: runs/<run id>)
        #[arg(short, long)]
        run_dir: Option<PathBuf>,
        /// Continue from the state saved in --run-dir
        #[arg(long, requires = "run_dir")]
        resume: bool,
        /// Override run.epochs
        #[arg(short, long)]
        epochs: Option<usize>,
        /// Override the smoothing strategy (its settings fall back to defaults)
        #[arg(short, long, value_parser = parse_kind)]
        strategy: Option<SmoothingKind>,
    },
    /// Print the persisted progress of a run
    Inspect {
        #[arg(short, long)]
        run_dir: PathBuf,
        /// State directory inside the run directory
        #[arg(long, default_value = "state")]
        state_dir: PathBuf,
    },
    /// Average the per-epoch statistics of repeated runs
    Average {
        /// Run directory, repeat once per run
        #[arg(short, long = "run-dir", required = true)]
        run_dirs: Vec<PathBuf>,
        #[arg(long, default_value = "state")]
        state_dir: PathBuf,
    },
}

fn parse_kind(s: &str) -> std::result::Result<SmoothingKind, String> {
    s.parse::<SmoothingKind>().map_err(|e| e.to_string())
}

/// Read-only view of a run's saved state
fn open_state(run_dir: &Path, state_dir: &Path) -> Result<CheckpointService> {
    Ok(CheckpointService::new(Box::new(FileStateStore::open(
        run_dir.join(state_dir),
    )?)))
}

/// Print progress and per-epoch statistics saved in a run directory
pub fn show_progress(run_dir: &Path, state_dir: &Path) -> Result<()> {
    let service = open_state(run_dir, state_dir)?;
    println!("Run directory: {}\n", run_dir.display());

    let Some(progress) = service.load_raw("progress")? else {
        println!("  No saved progress.");
        return Ok(());
    };
    let ctx: EpochContext = serde_json::from_value(progress.data)?;
    println!(
        "  Saved:        {}",
        progress.created_at.format("%Y-%m-%d %H:%M:%S")
    );
    println!(
        "  Status:       {}",
        if ctx.finished { "finished" } else { "resumable" }
    );
    println!("  Epoch:        {}", ctx.epoch);
    println!(
        "  Train steps:  {}/{} ({:.1}%)",
        ctx.train_steps,
        ctx.max_train_steps,
        ctx.train_fraction() * 100.0
    );
    println!("  Test steps:   {}/{}", ctx.test_steps, ctx.max_test_steps);
    println!("  Seed:         {}", ctx.seed);
    for record in ctx.tracker.records() {
        println!(
            "  Loop:         {} at batch {}{}",
            record.sub_loop,
            record.last_index,
            if record.completed { " (done)" } else { "" }
        );
    }

    if let Some(smoothing) = service.load_raw("smoothing")? {
        println!("  Smoothing:    {}", smoothing.component);
    }

    if let Some(raw) = service.load_raw("statistics")? {
        let stats: RunStatistics = serde_json::from_value(raw.data)?;
        print_epochs(&stats);
    }
    println!();
    Ok(())
}

/// Load the saved statistics of every run and average them epoch by epoch
pub fn average_runs(run_dirs: &[PathBuf], state_dir: &Path) -> Result<RunStatistics> {
    let mut runs = Vec::with_capacity(run_dirs.len());
    for run_dir in run_dirs {
        let raw = open_state(run_dir, state_dir)?
            .load_raw("statistics")?
            .ok_or_else(|| {
                HarnessError::Checkpoint(format!(
                    "{} has no saved statistics",
                    run_dir.display()
                ))
            })?;
        let stats: RunStatistics = serde_json::from_value(raw.data)?;
        if stats.finished_at.is_none() {
            warn!("Run {} in {} is unfinished", stats.run_id, run_dir.display());
        }
        runs.push(stats);
    }
    if let Some(first) = runs.first() {
        if runs.iter().any(|r| r.smoothing != first.smoothing) {
            warn!("Averaging runs with different smoothing strategies");
        }
    }
    RunStatistics::mean_of(&runs)
}

pub fn show_average(run_dirs: &[PathBuf], state_dir: &Path) -> Result<()> {
    let mean = average_runs(run_dirs, state_dir)?;
    println!(
        "Mean of {} runs ({} smoothing)",
        run_dirs.len(),
        mean.smoothing
    );
    print_epochs(&mean);
    println!();
    Ok(())
}

fn print_epochs(stats: &RunStatistics) {
    println!("\n  {:<6} {:>12} {:>12} {:>12} {:>8}", "epoch", "train", "test", "smoothed", "accum");
    let loss = |p: &Option<PassSummary>| {
        p.as_ref()
            .map(|p| format!("{:.5}", p.mean_loss))
            .unwrap_or_else(|| "-".to_string())
    };
    for e in &stats.epochs {
        println!(
            "  {:<6} {:>12} {:>12} {:>12} {:>8}{}",
            e.epoch,
            loss(&e.train),
            loss(&e.test_normal),
            loss(&e.test_smoothed),
            e.accumulations,
            if e.converged { "  converged" } else { "" }
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::env::temp_dir;

    fn unique_dir(name: &str) -> PathBuf {
        temp_dir().join(format!("smoothing_cli_{}_{}", name, uuid::Uuid::new_v4()))
    }

    fn saved_run(root: &Path, name: &str, loss: f64) -> PathBuf {
        let run_dir = root.join(name);
        let service = CheckpointService::new(Box::new(
            FileStateStore::new(run_dir.join("state")).unwrap(),
        ));
        let mut stats = RunStatistics::new(name, "ewma");
        stats.epoch_mut(0).train = Some(PassSummary {
            mean_loss: loss,
            accuracy: 0.5,
            samples: 160,
            batches: 10,
            elapsed_ms: 1,
        });
        service.create_checkpoint(&stats).unwrap();
        run_dir
    }

    #[test]
    fn test_parse_run_command() {
        let cli = Cli::parse_from([
            "smoothing-harness",
            "run",
            "--run-dir",
            "runs/a",
            "--resume",
            "--strategy",
            "decayed-weighted-mean",
        ]);
        match cli.command {
            Commands::Run {
                resume, strategy, ..
            } => {
                assert!(resume);
                assert_eq!(strategy, Some(SmoothingKind::DecayedWeightedMean));
            }
            _ => panic!("expected run"),
        }
    }

    #[test]
    fn test_resume_requires_run_dir() {
        assert!(Cli::try_parse_from(["smoothing-harness", "run", "--resume"]).is_err());
        assert!(Cli::try_parse_from(["smoothing-harness", "run", "--strategy", "nope"]).is_err());
    }

    #[test]
    fn test_parse_average_command() {
        let cli = Cli::parse_from([
            "smoothing-harness",
            "average",
            "--run-dir",
            "runs/a",
            "-r",
            "runs/b",
        ]);
        match cli.command {
            Commands::Average { run_dirs, .. } => {
                assert_eq!(run_dirs, vec![PathBuf::from("runs/a"), PathBuf::from("runs/b")]);
            }
            _ => panic!("expected average"),
        }
        assert!(Cli::try_parse_from(["smoothing-harness", "average"]).is_err());
    }

    #[test]
    fn test_inspect_missing_run_leaves_no_directory() {
        let run_dir = unique_dir("missing");
        assert!(show_progress(&run_dir, Path::new("state")).is_err());
        assert!(!run_dir.exists());
    }

    #[test]
    fn test_average_saved_runs() {
        let root = unique_dir("average");
        let a = saved_run(&root, "a", 1.0);
        let b = saved_run(&root, "b", 3.0);

        let mean = average_runs(&[a.clone(), b], Path::new("state")).unwrap();
        assert_eq!(mean.epochs.len(), 1);
        assert_eq!(mean.epochs[0].train.as_ref().unwrap().mean_loss, 2.0);
        assert!(show_average(&[a], Path::new("state")).is_ok());

        assert!(average_runs(&[root.join("nope")], Path::new("state")).is_err());
        let _ = std::fs::remove_dir_all(root);
    }
}
