//! Simple Mean Smoothing
//!
//! Arithmetic mean of every weight sample taken after a fixed share of the
//! run. No plateau detection and no stop-gate; losses are only recorded.

use serde::{Deserialize, Serialize};

use super::gate::{FractionGate, DEFAULT_LOSS_WINDOW};
use super::{bind_once, check_layout, Smoothing, SmoothingKind};
use crate::error::Result;
use crate::stats::RingStatistics;
use crate::training::EpochContext;
use crate::weights::NamedWeights;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimpleMeanSmoothing {
    gate: FractionGate,
    losses: RingStatistics<f64>,
    sum: Option<NamedWeights>,
    count: usize,
}

impl SimpleMeanSmoothing {
    pub fn new(start_fraction: f64) -> Self {
        Self {
            gate: FractionGate::new(start_fraction),
            losses: RingStatistics::new(DEFAULT_LOSS_WINDOW),
            sum: None,
            count: 0,
        }
    }
}

impl Smoothing for SimpleMeanSmoothing {
    fn kind(&self) -> SmoothingKind {
        SmoothingKind::SimpleMean
    }

    fn bind_parameter_shapes(&mut self, initial: &NamedWeights) -> Result<()> {
        bind_once(&mut self.sum, initial, NamedWeights::zeros_like)
    }

    fn accumulate(
        &mut self,
        loss: f64,
        weights: &NamedWeights,
        ctx: &EpochContext,
    ) -> Result<bool> {
        check_layout(self.sum.as_ref(), weights)?;
        self.losses.push(loss);
        if !self.gate.evaluate(ctx.train_fraction()) {
            return Ok(false);
        }
        if let Some(sum) = self.sum.as_mut() {
            sum.add_assign(weights);
        }
        self.count += 1;
        Ok(true)
    }

    fn current_estimate(&self) -> Option<NamedWeights> {
        if self.count == 0 {
            return None;
        }
        let n = self.count as f64;
        Some(self.sum.as_ref()?.map(|x| x / n))
    }

    fn is_converged(&mut self, _ctx: &EpochContext) -> bool {
        false
    }

    fn accumulation_count(&self) -> usize {
        self.count
    }

    fn recent_loss(&self) -> Option<f64> {
        if self.losses.is_empty() {
            None
        } else {
            Some(self.losses.average(0))
        }
    }

    fn save_state(&self) -> Result<serde_json::Value> {
        Ok(serde_json::to_value(self)?)
    }

    fn load_state(&mut self, state: &serde_json::Value) -> Result<()> {
        *self = serde_json::from_value(state.clone())?;
        Ok(())
    }
}
