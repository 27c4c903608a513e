//! Epoch Context
//!
//! Counters and resumption state carried through one run. Persisted under
//! the `progress` checkpoint key when the run stops.

use serde::{Deserialize, Serialize};

use super::resume::{LoopResumptionTracker, SubLoop};

/// Orchestrator state machine position
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EpochPhase {
    BeforeEpoch,
    Training,
    TestingNormal,
    TestingSmoothed,
    EpochComplete,
    Checkpointing,
}

impl std::fmt::Display for EpochPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EpochPhase::BeforeEpoch => write!(f, "before_epoch"),
            EpochPhase::Training => write!(f, "training"),
            EpochPhase::TestingNormal => write!(f, "testing_normal"),
            EpochPhase::TestingSmoothed => write!(f, "testing_smoothed"),
            EpochPhase::EpochComplete => write!(f, "epoch_complete"),
            EpochPhase::Checkpointing => write!(f, "checkpointing"),
        }
    }
}

impl From<SubLoop> for EpochPhase {
    fn from(sub_loop: SubLoop) -> Self {
        match sub_loop {
            SubLoop::Train => EpochPhase::Training,
            SubLoop::TestNormal => EpochPhase::TestingNormal,
            SubLoop::TestSmoothed => EpochPhase::TestingSmoothed,
        }
    }
}

/// Running loss/accuracy totals for one pass
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PassTally {
    pub sub_loop: SubLoop,
    pub loss_sum: f64,
    pub batches: usize,
    pub correct: usize,
    pub samples: usize,
    /// Wall time spent in the pass so far, across resumes
    pub elapsed_ms: u64,
}

impl PassTally {
    pub fn new(sub_loop: SubLoop) -> Self {
        Self {
            sub_loop,
            loss_sum: 0.0,
            batches: 0,
            correct: 0,
            samples: 0,
            elapsed_ms: 0,
        }
    }

    pub fn record(&mut self, loss: f64, correct: usize, samples: usize) {
        self.loss_sum += loss;
        self.batches += 1;
        self.correct += correct;
        self.samples += samples;
    }

    /// Mean loss per batch, 0.0 when nothing was recorded
    pub fn mean_loss(&self) -> f64 {
        if self.batches == 0 {
            0.0
        } else {
            self.loss_sum / self.batches as f64
        }
    }

    /// Fraction of correctly scored samples, 0.0 when empty
    pub fn accuracy(&self) -> f64 {
        if self.samples == 0 {
            0.0
        } else {
            self.correct as f64 / self.samples as f64
        }
    }
}

/// Run position and per-epoch counters
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EpochContext {
    /// Zero-based index of the current epoch
    pub epoch: usize,
    /// Train steps taken since the run started
    pub train_steps: usize,
    /// Test steps taken since the run started
    pub test_steps: usize,
    /// Train steps expected over the whole run
    pub max_train_steps: usize,
    /// Test steps expected over the whole run
    pub max_test_steps: usize,
    pub tracker: LoopResumptionTracker,
    /// Set after the first successful accumulation of the run
    pub first_smoothing_success: bool,
    /// Totals of the pass that was interrupted, if any
    pub pass_tally: Option<PassTally>,
    /// Seed for per-epoch data order
    pub seed: u64,
    /// True once every epoch has completed
    pub finished: bool,
}

impl EpochContext {
    pub fn new(seed: u64, max_train_steps: usize, max_test_steps: usize) -> Self {
        Self {
            epoch: 0,
            train_steps: 0,
            test_steps: 0,
            max_train_steps,
            max_test_steps,
            tracker: LoopResumptionTracker::new(),
            first_smoothing_success: false,
            pass_tally: None,
            seed,
            finished: false,
        }
    }

    /// Completed share of the expected train steps, in [0, 1]
    pub fn train_fraction(&self) -> f64 {
        if self.max_train_steps == 0 {
            return 1.0;
        }
        (self.train_steps as f64 / self.max_train_steps as f64).min(1.0)
    }

    /// Take the stored tally for `sub_loop` or start a new one
    pub fn take_tally(&mut self, sub_loop: SubLoop) -> PassTally {
        match self.pass_tally.take() {
            Some(tally) if tally.sub_loop == sub_loop => tally,
            _ => PassTally::new(sub_loop),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_train_fraction() {
        let mut ctx = EpochContext::new(7, 40, 10);
        assert_eq!(ctx.train_fraction(), 0.0);
        ctx.train_steps = 10;
        assert_eq!(ctx.train_fraction(), 0.25);
        ctx.train_steps = 80;
        assert_eq!(ctx.train_fraction(), 1.0);
        assert_eq!(EpochContext::new(1, 0, 0).train_fraction(), 1.0);
    }

    #[test]
    fn test_tally_means() {
        let mut tally = PassTally::new(SubLoop::Train);
        assert_eq!(tally.mean_loss(), 0.0);
        assert_eq!(tally.accuracy(), 0.0);
        tally.record(1.0, 3, 4);
        tally.record(2.0, 1, 4);
        assert_eq!(tally.mean_loss(), 1.5);
        assert_eq!(tally.accuracy(), 0.5);
    }

    #[test]
    fn test_take_tally_matches_sub_loop() {
        let mut ctx = EpochContext::new(0, 10, 10);
        let mut tally = PassTally::new(SubLoop::TestNormal);
        tally.record(0.5, 1, 2);
        ctx.pass_tally = Some(tally.clone());

        assert_eq!(ctx.take_tally(SubLoop::TestNormal), tally);
        assert!(ctx.pass_tally.is_none());

        ctx.pass_tally = Some(tally);
        assert_eq!(ctx.take_tally(SubLoop::Train).batches, 0);
    }

    #[test]
    fn test_phase_from_sub_loop() {
        assert_eq!(EpochPhase::from(SubLoop::Train), EpochPhase::Training);
        assert_eq!(EpochPhase::from(SubLoop::TestSmoothed).to_string(), "testing_smoothed");
    }
}
