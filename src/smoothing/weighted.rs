//! Decayed Weighted Mean Smoothing
//!
//! Keeps the last K weight snapshots. The `i`-th most recent snapshot gets
//! weight `decay_factor^i`; the estimate is the normalized weighted sum.
//! Memory grows with K full copies of the parameters.

use serde::{Deserialize, Serialize};
use tracing::debug;

use super::gate::{GateConfig, OscillationGates};
use super::{bind_once, check_layout, Smoothing, SmoothingKind};
use crate::error::Result;
use crate::stats::RingStatistics;
use crate::training::EpochContext;
use crate::weights::NamedWeights;

/// Stand-in deviation when fewer than two snapshots exist
const STD_UNDEFINED: f64 = 1e10;

/// Convergence test used by the decayed weighted mean
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EndCheck {
    /// Deviation of the snapshots' L1 distances to the estimate
    #[default]
    Std,
    /// Shared stability gate over the estimate's absolute sum
    WeightSum,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DecayedWeightedSmoothing {
    decay_factor: f64,
    end_check: EndCheck,
    std_epsilon: f64,
    gates: OscillationGates,
    snapshots: RingStatistics<NamedWeights>,
    layout: Option<NamedWeights>,
    count: usize,
}

impl DecayedWeightedSmoothing {
    pub fn new(
        decay_factor: f64,
        snapshots: usize,
        end_check: EndCheck,
        std_epsilon: f64,
        gate: GateConfig,
    ) -> Self {
        Self {
            decay_factor,
            end_check,
            std_epsilon,
            gates: OscillationGates::new(gate),
            snapshots: RingStatistics::new(snapshots),
            layout: None,
            count: 0,
        }
    }

    /// Spread of the snapshots around the estimate
    fn snapshot_deviation(&self, estimate: &NamedWeights) -> Result<f64> {
        let mut distances = RingStatistics::new(self.snapshots.len());
        for snapshot in self.snapshots.iter() {
            distances.push(snapshot.l1_distance(estimate)?);
        }
        if distances.len() < 2 {
            return Ok(STD_UNDEFINED);
        }
        Ok(distances.std_dev())
    }
}

impl Smoothing for DecayedWeightedSmoothing {
    fn kind(&self) -> SmoothingKind {
        SmoothingKind::DecayedWeightedMean
    }

    fn bind_parameter_shapes(&mut self, initial: &NamedWeights) -> Result<()> {
        bind_once(&mut self.layout, initial, NamedWeights::zeros_like)
    }

    fn accumulate(
        &mut self,
        loss: f64,
        weights: &NamedWeights,
        ctx: &EpochContext,
    ) -> Result<bool> {
        check_layout(self.layout.as_ref(), weights)?;
        if !self.gates.start.evaluate(loss, ctx.train_fraction()) {
            return Ok(false);
        }
        self.snapshots.push(weights.clone());
        self.count += 1;
        Ok(true)
    }

    fn current_estimate(&self) -> Option<NamedWeights> {
        if self.count == 0 {
            return None;
        }
        let mut estimate = self.layout.as_ref()?.zeros_like();
        let mut total = 0.0;
        let mut weight = 1.0;
        for snapshot in self.snapshots.iter() {
            estimate.add_scaled(snapshot, weight);
            total += weight;
            weight *= self.decay_factor;
        }
        Some(estimate.map(|x| x / total))
    }

    fn is_converged(&mut self, _ctx: &EpochContext) -> bool {
        let Some(estimate) = self.current_estimate() else {
            return false;
        };
        match self.end_check {
            EndCheck::WeightSum => self.gates.stop.evaluate(estimate.abs_sum(), self.count),
            EndCheck::Std => match self.snapshot_deviation(&estimate) {
                Ok(deviation) => {
                    debug!("Snapshot deviation {:.6e}", deviation);
                    self.gates.stop.record(deviation < self.std_epsilon)
                }
                Err(e) => {
                    debug!("Snapshot deviation unavailable: {}", e);
                    false
                }
            },
        }
    }

    fn accumulation_count(&self) -> usize {
        self.count
    }

    fn recent_loss(&self) -> Option<f64> {
        self.gates.start.recent_loss()
    }

    fn save_state(&self) -> Result<serde_json::Value> {
        Ok(serde_json::to_value(self)?)
    }

    fn load_state(&mut self, state: &serde_json::Value) -> Result<()> {
        *self = serde_json::from_value(state.clone())?;
        Ok(())
    }
}
