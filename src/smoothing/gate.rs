//! Start and Stop Gates
//!
//! Shared decision helpers composed into the smoothing strategies:
//! - `PlateauGate` decides when accumulation starts, from the loss stream
//! - `FractionGate` starts after a fixed share of the run
//! - `StabilityGate` decides when the running estimate stopped moving

use serde::{Deserialize, Serialize};
use tracing::{debug, info, trace};

use crate::error::{HarnessError, Result};
use crate::stats::RingStatistics;

/// How a threshold margin is measured
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ThresholdMode {
    /// Margin is `|reference| * value`
    Rel,
    /// Margin is `value`
    Abs,
}

/// Relative or absolute comparison margin
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Threshold {
    pub mode: ThresholdMode,
    pub value: f64,
}

impl Threshold {
    pub fn rel(value: f64) -> Self {
        Self {
            mode: ThresholdMode::Rel,
            value,
        }
    }

    pub fn abs(value: f64) -> Self {
        Self {
            mode: ThresholdMode::Abs,
            value,
        }
    }

    fn margin(&self, reference: f64) -> f64 {
        match self.mode {
            ThresholdMode::Rel => reference.abs() * self.value,
            ThresholdMode::Abs => self.value,
        }
    }

    /// True if `x` beats `best` by more than the margin. No best yet always improves.
    pub fn improves(&self, x: f64, best: Option<f64>) -> bool {
        match best {
            None => !x.is_nan(),
            Some(best) => x < best - self.margin(best),
        }
    }

    /// True if `x` lies outside `[lower - margin, upper + margin]`
    pub fn outside_band(&self, x: f64, lower: f64, upper: f64) -> bool {
        x < lower - self.margin(lower) || x > upper + self.margin(upper)
    }

    fn validate(&self, name: &str, errors: &mut Vec<String>) {
        if !self.value.is_finite() || self.value < 0.0 {
            errors.push(format!(
                "{} must be a finite non-negative number, got {}",
                name, self.value
            ));
        }
    }
}

/// Loss samples kept when no gate config says otherwise
pub const DEFAULT_LOSS_WINDOW: usize = 50;

/// Tunables for the plateau start-gate and the stability stop-gate
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GateConfig {
    /// Loss samples kept for the windowed mean
    pub loss_window: usize,
    /// Calls ignored before the plateau test runs
    pub loss_warmup: usize,
    /// Non-improving evaluations tolerated before latching
    pub loss_patience: usize,
    pub loss_threshold: Threshold,
    /// Minimum share of the run before a plateau may latch
    pub min_start_fraction: f64,
    /// Share of the run after which accumulation always starts
    pub max_start_fraction: f64,
    /// Weight summaries kept for the deviation
    pub weight_window: usize,
    /// Accumulations before the stop-gate is evaluated
    pub weight_warmup: usize,
    /// Unmoved evaluations tolerated before declaring convergence
    pub weight_patience: usize,
    pub weight_threshold: Threshold,
}

impl Default for GateConfig {
    fn default() -> Self {
        Self {
            loss_window: DEFAULT_LOSS_WINDOW,
            loss_warmup: 25,
            loss_patience: 20,
            loss_threshold: Threshold::rel(1e-3),
            min_start_fraction: 0.02,
            max_start_fraction: 0.9988,
            weight_window: 10,
            weight_warmup: 5,
            weight_patience: 20,
            weight_threshold: Threshold::rel(1e-3),
        }
    }
}

impl GateConfig {
    /// Collect every problem instead of stopping at the first one
    pub fn problems(&self) -> Vec<String> {
        let mut errors = Vec::new();

        if self.loss_window == 0 {
            errors.push("gate.loss_window must be greater than 0".to_string());
        }
        if self.loss_warmup > self.loss_window {
            errors.push(format!(
                "gate.loss_warmup ({}) cannot exceed gate.loss_window ({})",
                self.loss_warmup, self.loss_window
            ));
        }
        if self.weight_window == 0 {
            errors.push("gate.weight_window must be greater than 0".to_string());
        }
        if self.weight_warmup > self.weight_window {
            errors.push(format!(
                "gate.weight_warmup ({}) cannot exceed gate.weight_window ({})",
                self.weight_warmup, self.weight_window
            ));
        }
        for (name, value) in [
            ("gate.min_start_fraction", self.min_start_fraction),
            ("gate.max_start_fraction", self.max_start_fraction),
        ] {
            if !(0.0..=1.0).contains(&value) {
                errors.push(format!("{} must be in [0, 1], got {}", name, value));
            }
        }
        if self.min_start_fraction > self.max_start_fraction {
            errors.push(format!(
                "gate.min_start_fraction ({}) cannot exceed gate.max_start_fraction ({})",
                self.min_start_fraction, self.max_start_fraction
            ));
        }
        self.loss_threshold
            .validate("gate.loss_threshold.value", &mut errors);
        self.weight_threshold
            .validate("gate.weight_threshold.value", &mut errors);

        errors
    }

    pub fn validate(&self) -> Result<()> {
        let errors = self.problems();
        if errors.is_empty() {
            Ok(())
        } else {
            Err(HarnessError::InvalidConfig(errors.join("; ")))
        }
    }
}

/// Loss-plateau start-gate with a hard step-fraction ceiling
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlateauGate {
    config: GateConfig,
    losses: RingStatistics<f64>,
    calls: usize,
    /// `None` stands for +infinity
    best_loss: Option<f64>,
    bad_streak: usize,
    always_on: bool,
}

impl PlateauGate {
    pub fn new(config: GateConfig) -> Self {
        Self {
            losses: RingStatistics::new(config.loss_window),
            config,
            calls: 0,
            best_loss: None,
            bad_streak: 0,
            always_on: false,
        }
    }

    /// Feed one loss value. Returns true once accumulation should run.
    pub fn evaluate(&mut self, loss: f64, fraction: f64) -> bool {
        self.losses.push(loss);
        self.calls += 1;

        if self.always_on {
            return true;
        }

        if fraction > self.config.max_start_fraction {
            info!(
                "Smoothing latched at step fraction {:.4} (ceiling {})",
                fraction, self.config.max_start_fraction
            );
            self.always_on = true;
            return true;
        }

        if self.calls <= self.config.loss_warmup {
            return false;
        }

        let mean = self.losses.mean();
        if self.config.loss_threshold.improves(mean, self.best_loss) {
            self.best_loss = Some(mean);
            self.bad_streak = 0;
        } else {
            self.bad_streak += 1;
        }
        trace!(
            "Loss window mean {:.6}, best {:?}, bad streak {}",
            mean,
            self.best_loss,
            self.bad_streak
        );

        if self.bad_streak > self.config.loss_patience && fraction >= self.config.min_start_fraction
        {
            info!(
                "Smoothing latched at step fraction {:.4} after {} evaluations without improvement",
                fraction, self.bad_streak
            );
            self.always_on = true;
            return true;
        }

        false
    }

    pub fn is_latched(&self) -> bool {
        self.always_on
    }

    /// Mean of the current loss window
    pub fn recent_loss(&self) -> Option<f64> {
        if self.losses.is_empty() {
            None
        } else {
            Some(self.losses.average(0))
        }
    }

    pub fn best_loss(&self) -> Option<f64> {
        self.best_loss
    }

    pub fn bad_streak(&self) -> usize {
        self.bad_streak
    }
}

/// Starts once a fixed share of the run has passed
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FractionGate {
    start_fraction: f64,
    always_on: bool,
}

impl FractionGate {
    pub fn new(start_fraction: f64) -> Self {
        Self {
            start_fraction,
            always_on: false,
        }
    }

    pub fn evaluate(&mut self, fraction: f64) -> bool {
        if !self.always_on && fraction > self.start_fraction {
            info!(
                "Smoothing enabled at step fraction {:.4} (start {})",
                fraction, self.start_fraction
            );
            self.always_on = true;
        }
        self.always_on
    }

    pub fn is_latched(&self) -> bool {
        self.always_on
    }
}

/// Deviation-band stop-gate over a scalar summary of the estimate
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StabilityGate {
    config: GateConfig,
    summaries: RingStatistics<f64>,
    deviations: RingStatistics<f64>,
    bad_weight_streak: usize,
}

impl StabilityGate {
    pub fn new(config: GateConfig) -> Self {
        Self {
            summaries: RingStatistics::new(config.weight_window),
            deviations: RingStatistics::new(config.weight_window),
            config,
            bad_weight_streak: 0,
        }
    }

    /// Feed the summary of the current estimate after an accumulation.
    /// Returns true once the estimate is considered converged.
    pub fn evaluate(&mut self, summary: f64, accumulations: usize) -> bool {
        self.summaries.push(summary);
        if accumulations <= self.config.weight_warmup {
            return false;
        }

        let deviation = self.summaries.std_dev();
        let moved = match (self.deviations.min(), self.deviations.max()) {
            (Some(lower), Some(upper)) => {
                self.config
                    .weight_threshold
                    .outside_band(deviation, lower, upper)
            }
            _ => true,
        };
        self.deviations.push(deviation);

        if moved {
            self.bad_weight_streak = 0;
        } else {
            self.bad_weight_streak += 1;
        }
        debug!(
            "Weight summary {:.6}, deviation {:.6e}, moved {}, streak {}",
            summary, deviation, moved, self.bad_weight_streak
        );

        self.bad_weight_streak > self.config.weight_patience
    }

    /// Count an evaluation with an externally computed verdict
    pub fn record(&mut self, settled: bool) -> bool {
        if settled {
            self.bad_weight_streak += 1;
        } else {
            self.bad_weight_streak = 0;
        }
        self.bad_weight_streak > self.config.weight_patience
    }

    pub fn streak(&self) -> usize {
        self.bad_weight_streak
    }
}

/// Plateau start-gate plus stability stop-gate, shared by the
/// loss-driven strategies
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OscillationGates {
    pub start: PlateauGate,
    pub stop: StabilityGate,
}

impl OscillationGates {
    pub fn new(config: GateConfig) -> Self {
        Self {
            start: PlateauGate::new(config),
            stop: StabilityGate::new(config),
        }
    }
}
