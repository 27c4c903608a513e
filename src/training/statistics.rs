//! Run Statistics
//!
//! Per-epoch summaries of the train pass and both test passes, plus
//! epoch-by-epoch averaging across repeated runs.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::context::PassTally;
use crate::error::{HarnessError, Result};

/// Totals of one finished pass
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PassSummary {
    pub mean_loss: f64,
    pub accuracy: f64,
    pub samples: usize,
    pub batches: usize,
    pub elapsed_ms: u64,
}

impl From<&PassTally> for PassSummary {
    fn from(tally: &PassTally) -> Self {
        Self {
            mean_loss: tally.mean_loss(),
            accuracy: tally.accuracy(),
            samples: tally.samples,
            batches: tally.batches,
            elapsed_ms: tally.elapsed_ms,
        }
    }
}

impl PassSummary {
    fn mean(passes: &[&PassSummary]) -> Option<PassSummary> {
        if passes.is_empty() {
            return None;
        }
        let n = passes.len() as f64;
        let avg = |f: &dyn Fn(&PassSummary) -> f64| passes.iter().map(|p| f(*p)).sum::<f64>() / n;
        Some(PassSummary {
            mean_loss: avg(&|p| p.mean_loss),
            accuracy: avg(&|p| p.accuracy),
            samples: avg(&|p| p.samples as f64).round() as usize,
            batches: avg(&|p| p.batches as f64).round() as usize,
            elapsed_ms: avg(&|p| p.elapsed_ms as f64).round() as u64,
        })
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EpochSummary {
    pub epoch: usize,
    pub train: Option<PassSummary>,
    pub test_normal: Option<PassSummary>,
    pub test_smoothed: Option<PassSummary>,
    /// Accumulation events so far in the run
    pub accumulations: usize,
    pub converged: bool,
}

impl EpochSummary {
    pub fn new(epoch: usize) -> Self {
        Self {
            epoch,
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunStatistics {
    pub run_id: String,
    pub smoothing: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub epochs: Vec<EpochSummary>,
}

impl RunStatistics {
    pub fn new(run_id: impl Into<String>, smoothing: impl Into<String>) -> Self {
        Self {
            run_id: run_id.into(),
            smoothing: smoothing.into(),
            started_at: Utc::now(),
            finished_at: None,
            epochs: Vec::new(),
        }
    }

    /// Summary for `epoch`, created if missing
    pub fn epoch_mut(&mut self, epoch: usize) -> &mut EpochSummary {
        let position = match self.epochs.iter().position(|e| e.epoch == epoch) {
            Some(position) => position,
            None => {
                self.epochs.push(EpochSummary::new(epoch));
                self.epochs.len() - 1
            }
        };
        &mut self.epochs[position]
    }

    pub fn last_epoch(&self) -> Option<&EpochSummary> {
        self.epochs.last()
    }

    /// Average repeated runs epoch by epoch. Only epochs present in every
    /// run are kept; a pass is averaged over the runs that have it.
    pub fn mean_of(runs: &[RunStatistics]) -> Result<RunStatistics> {
        let first = runs.first().ok_or_else(|| {
            HarnessError::Runtime("cannot average an empty set of runs".to_string())
        })?;
        let epoch_count = runs.iter().map(|r| r.epochs.len()).min().unwrap_or(0);

        let epochs = (0..epoch_count)
            .map(|i| {
                let summaries: Vec<&EpochSummary> = runs.iter().map(|r| &r.epochs[i]).collect();
                let collect = |f: fn(&EpochSummary) -> Option<&PassSummary>| {
                    summaries.iter().filter_map(|s| f(*s)).collect::<Vec<_>>()
                };
                EpochSummary {
                    epoch: summaries[0].epoch,
                    train: PassSummary::mean(&collect(|s| s.train.as_ref())),
                    test_normal: PassSummary::mean(&collect(|s| s.test_normal.as_ref())),
                    test_smoothed: PassSummary::mean(&collect(|s| s.test_smoothed.as_ref())),
                    accumulations: (summaries.iter().map(|s| s.accumulations).sum::<usize>() as f64
                        / summaries.len() as f64)
                        .round() as usize,
                    converged: summaries.iter().all(|s| s.converged),
                }
            })
            .collect();

        Ok(RunStatistics {
            run_id: format!("mean-of-{}", runs.len()),
            smoothing: first.smoothing.clone(),
            started_at: runs.iter().map(|r| r.started_at).min().unwrap_or(first.started_at),
            finished_at: runs.iter().filter_map(|r| r.finished_at).max(),
            epochs,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pass(loss: f64, accuracy: f64) -> PassSummary {
        PassSummary {
            mean_loss: loss,
            accuracy,
            samples: 100,
            batches: 10,
            elapsed_ms: 20,
        }
    }

    fn run(losses: &[f64]) -> RunStatistics {
        let mut stats = RunStatistics::new("r", "ewma");
        for (epoch, loss) in losses.iter().enumerate() {
            let summary = stats.epoch_mut(epoch);
            summary.train = Some(pass(*loss, 0.5));
            summary.accumulations = epoch * 2;
        }
        stats
    }

    #[test]
    fn test_epoch_mut_creates_once() {
        let mut stats = RunStatistics::new("r", "disabled");
        stats.epoch_mut(0).accumulations = 3;
        stats.epoch_mut(0).converged = true;
        assert_eq!(stats.epochs.len(), 1);
        assert_eq!(stats.last_epoch().unwrap().accumulations, 3);
    }

    #[test]
    fn test_mean_of_runs() {
        let mut a = run(&[1.0, 0.5, 0.25]);
        let b = run(&[3.0, 1.5]);
        a.epochs[1].test_smoothed = Some(pass(0.4, 0.9));

        let mean = RunStatistics::mean_of(&[a, b]).unwrap();
        assert_eq!(mean.epochs.len(), 2);
        assert_eq!(mean.epochs[0].train.as_ref().unwrap().mean_loss, 2.0);
        assert_eq!(mean.epochs[1].train.as_ref().unwrap().mean_loss, 1.0);
        assert_eq!(mean.epochs[1].test_smoothed.as_ref().unwrap().accuracy, 0.9);
        assert!(mean.epochs[0].test_normal.is_none());
        assert_eq!(mean.epochs[1].accumulations, 2);
    }

    #[test]
    fn test_mean_of_nothing_is_an_error() {
        assert!(RunStatistics::mean_of(&[]).is_err());
    }
}
