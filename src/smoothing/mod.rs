//! Weight Smoothing Controllers
//!
//! Pluggable strategies that decide, step by step, whether to fold the
//! current weights into a running estimate and whether that estimate has
//! settled. All strategies share the [`Smoothing`] contract; `disabled` is
//! the null object rather than an absent controller.

pub mod averaged;
pub mod disabled;
pub mod ewma;
pub mod gate;
pub mod general_mean;
pub mod simple;
pub mod weighted;

use serde::{Deserialize, Serialize};
use std::str::FromStr;

use crate::error::{HarnessError, Result};
use crate::training::EpochContext;
use crate::weights::NamedWeights;

pub use averaged::{AveragedModel, AveragedSmoothing, RunningAverageModel};
pub use disabled::DisabledSmoothing;
pub use ewma::EwmaSmoothing;
pub use gate::{GateConfig, Threshold, ThresholdMode};
pub use general_mean::GeneralizedMeanSmoothing;
pub use simple::SimpleMeanSmoothing;
pub use weighted::{DecayedWeightedSmoothing, EndCheck};

/// Common contract of every smoothing strategy
pub trait Smoothing: Send {
    fn kind(&self) -> SmoothingKind;

    /// Map each named parameter to its initial accumulator.
    /// Must be called before the first `accumulate`; repeated calls with the
    /// same layout keep the accumulated state.
    fn bind_parameter_shapes(&mut self, initial: &NamedWeights) -> Result<()>;

    /// Offer one training step. Returns true iff the estimate was updated.
    fn accumulate(&mut self, loss: f64, weights: &NamedWeights, ctx: &EpochContext)
        -> Result<bool>;

    /// Running estimate, `None` until the first accumulation
    fn current_estimate(&self) -> Option<NamedWeights>;

    /// Stop-gate, evaluated right after a successful `accumulate`
    fn is_converged(&mut self, ctx: &EpochContext) -> bool;

    fn accumulation_count(&self) -> usize;

    /// Mean of the loss window fed by `accumulate`, `None` before any loss
    fn recent_loss(&self) -> Option<f64> {
        None
    }

    fn save_state(&self) -> Result<serde_json::Value>;

    fn load_state(&mut self, state: &serde_json::Value) -> Result<()>;
}

/// Strategy selector
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SmoothingKind {
    Disabled,
    SimpleMean,
    Ewma,
    GeneralizedMean,
    DecayedWeightedMean,
    AveragedModel,
}

impl SmoothingKind {
    pub const ALL: [SmoothingKind; 6] = [
        SmoothingKind::Disabled,
        SmoothingKind::SimpleMean,
        SmoothingKind::Ewma,
        SmoothingKind::GeneralizedMean,
        SmoothingKind::DecayedWeightedMean,
        SmoothingKind::AveragedModel,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            SmoothingKind::Disabled => "disabled",
            SmoothingKind::SimpleMean => "simple_mean",
            SmoothingKind::Ewma => "ewma",
            SmoothingKind::GeneralizedMean => "generalized_mean",
            SmoothingKind::DecayedWeightedMean => "decayed_weighted_mean",
            SmoothingKind::AveragedModel => "averaged_model",
        }
    }
}

impl std::fmt::Display for SmoothingKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for SmoothingKind {
    type Err = HarnessError;

    fn from_str(s: &str) -> Result<Self> {
        let normalized = s.trim().to_lowercase().replace('-', "_");
        SmoothingKind::ALL
            .into_iter()
            .find(|kind| kind.as_str() == normalized)
            .ok_or_else(|| {
                HarnessError::InvalidConfig(format!(
                    "unknown smoothing kind '{}', expected one of: {}",
                    s,
                    SmoothingKind::ALL
                        .iter()
                        .map(|k| k.as_str())
                        .collect::<Vec<_>>()
                        .join(", ")
                ))
            })
    }
}

fn default_start_fraction() -> f64 {
    0.8
}

fn default_alpha() -> f64 {
    0.27
}

fn default_power() -> f64 {
    1.0
}

fn default_decay_factor() -> f64 {
    1.0 / 1.1
}

fn default_snapshots() -> usize {
    20
}

fn default_std_epsilon() -> f64 {
    1e-7
}

/// Per-strategy configuration, tagged by `kind`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SmoothingConfig {
    Disabled,
    SimpleMean {
        #[serde(default = "default_start_fraction")]
        start_fraction: f64,
    },
    Ewma {
        #[serde(default = "default_alpha")]
        alpha: f64,
        #[serde(default)]
        gate: GateConfig,
    },
    GeneralizedMean {
        #[serde(default = "default_power")]
        power: f64,
        #[serde(default)]
        gate: GateConfig,
    },
    DecayedWeightedMean {
        #[serde(default = "default_decay_factor")]
        decay_factor: f64,
        #[serde(default = "default_snapshots")]
        snapshots: usize,
        #[serde(default)]
        end_check: EndCheck,
        /// Deviation below which the `std` end check counts as settled
        #[serde(default = "default_std_epsilon")]
        std_epsilon: f64,
        #[serde(default)]
        gate: GateConfig,
    },
    AveragedModel {
        #[serde(default = "default_start_fraction")]
        start_fraction: f64,
    },
}

impl Default for SmoothingConfig {
    fn default() -> Self {
        SmoothingConfig::defaults(SmoothingKind::SimpleMean)
    }
}

impl SmoothingConfig {
    /// Default tunables for a strategy kind
    pub fn defaults(kind: SmoothingKind) -> Self {
        match kind {
            SmoothingKind::Disabled => SmoothingConfig::Disabled,
            SmoothingKind::SimpleMean => SmoothingConfig::SimpleMean {
                start_fraction: default_start_fraction(),
            },
            SmoothingKind::Ewma => SmoothingConfig::Ewma {
                alpha: default_alpha(),
                gate: GateConfig::default(),
            },
            SmoothingKind::GeneralizedMean => SmoothingConfig::GeneralizedMean {
                power: default_power(),
                gate: GateConfig::default(),
            },
            SmoothingKind::DecayedWeightedMean => SmoothingConfig::DecayedWeightedMean {
                decay_factor: default_decay_factor(),
                snapshots: default_snapshots(),
                end_check: EndCheck::default(),
                std_epsilon: default_std_epsilon(),
                gate: GateConfig::default(),
            },
            SmoothingKind::AveragedModel => SmoothingConfig::AveragedModel {
                start_fraction: default_start_fraction(),
            },
        }
    }

    pub fn kind(&self) -> SmoothingKind {
        match self {
            SmoothingConfig::Disabled => SmoothingKind::Disabled,
            SmoothingConfig::SimpleMean { .. } => SmoothingKind::SimpleMean,
            SmoothingConfig::Ewma { .. } => SmoothingKind::Ewma,
            SmoothingConfig::GeneralizedMean { .. } => SmoothingKind::GeneralizedMean,
            SmoothingConfig::DecayedWeightedMean { .. } => SmoothingKind::DecayedWeightedMean,
            SmoothingConfig::AveragedModel { .. } => SmoothingKind::AveragedModel,
        }
    }

    /// Every configuration problem, empty when valid
    pub fn problems(&self) -> Vec<String> {
        let mut errors = Vec::new();
        match self {
            SmoothingConfig::Disabled => {}
            SmoothingConfig::SimpleMean { start_fraction }
            | SmoothingConfig::AveragedModel { start_fraction } => {
                if !(0.0..=1.0).contains(start_fraction) {
                    errors.push(format!(
                        "smoothing.start_fraction must be in [0, 1], got {}",
                        start_fraction
                    ));
                }
            }
            SmoothingConfig::Ewma { alpha, gate } => {
                if !(*alpha > 0.0 && *alpha < 1.0) {
                    errors.push(format!(
                        "smoothing.alpha must be in (0, 1), got {}",
                        alpha
                    ));
                }
                errors.extend(gate.problems());
            }
            SmoothingConfig::GeneralizedMean { power, gate } => {
                if !power.is_finite() || *power == 0.0 {
                    errors.push(format!(
                        "smoothing.power must be finite and non-zero, got {}",
                        power
                    ));
                }
                errors.extend(gate.problems());
            }
            SmoothingConfig::DecayedWeightedMean {
                decay_factor,
                snapshots,
                std_epsilon,
                gate,
                ..
            } => {
                if !(*decay_factor > 0.0 && *decay_factor <= 1.0) {
                    errors.push(format!(
                        "smoothing.decay_factor must be in (0, 1], got {}",
                        decay_factor
                    ));
                }
                if *snapshots == 0 {
                    errors.push("smoothing.snapshots must be greater than 0".to_string());
                }
                if !std_epsilon.is_finite() || *std_epsilon < 0.0 {
                    errors.push(format!(
                        "smoothing.std_epsilon must be finite and non-negative, got {}",
                        std_epsilon
                    ));
                }
                errors.extend(gate.problems());
            }
        }
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

/// Build a validated strategy from its configuration
pub fn build_smoothing(config: &SmoothingConfig) -> Result<Box<dyn Smoothing>> {
    config.validate()?;

    let smoothing: Box<dyn Smoothing> = match config {
        SmoothingConfig::Disabled => Box::new(DisabledSmoothing),
        SmoothingConfig::SimpleMean { start_fraction } => {
            Box::new(SimpleMeanSmoothing::new(*start_fraction))
        }
        SmoothingConfig::Ewma { alpha, gate } => Box::new(EwmaSmoothing::new(*alpha, *gate)),
        SmoothingConfig::GeneralizedMean { power, gate } => {
            Box::new(GeneralizedMeanSmoothing::new(*power, *gate))
        }
        SmoothingConfig::DecayedWeightedMean {
            decay_factor,
            snapshots,
            end_check,
            std_epsilon,
            gate,
        } => Box::new(DecayedWeightedSmoothing::new(
            *decay_factor,
            *snapshots,
            *end_check,
            *std_epsilon,
            *gate,
        )),
        SmoothingConfig::AveragedModel { start_fraction } => Box::new(AveragedSmoothing::new(
            *start_fraction,
            Box::new(RunningAverageModel::default()),
        )),
    };

    Ok(smoothing)
}

/// Fail unless shapes were bound and `weights` matches them
pub(crate) fn check_layout<'a>(
    bound: Option<&'a NamedWeights>,
    weights: &NamedWeights,
) -> Result<&'a NamedWeights> {
    let template = bound.ok_or_else(|| {
        HarnessError::Smoothing("parameter shapes not bound before accumulate".to_string())
    })?;
    template.ensure_same_layout(weights)?;
    Ok(template)
}

/// Bind-once helper: keeps an existing binding when the layout matches
pub(crate) fn bind_once(
    bound: &mut Option<NamedWeights>,
    initial: &NamedWeights,
    make: impl FnOnce(&NamedWeights) -> NamedWeights,
) -> Result<()> {
    match bound {
        Some(existing) => existing.ensure_same_layout(initial),
        None => {
            *bound = Some(make(initial));
            Ok(())
        }
    }
}
