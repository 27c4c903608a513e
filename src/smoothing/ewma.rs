//! Exponentially Weighted Moving Average
//!
//! `estimate = estimate * (1 - alpha) + sample * alpha`. The estimate starts
//! as a clone of the bound weights, never zeros.

use serde::{Deserialize, Serialize};

use super::gate::{GateConfig, OscillationGates};
use super::{bind_once, check_layout, Smoothing, SmoothingKind};
use crate::error::Result;
use crate::training::EpochContext;
use crate::weights::NamedWeights;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EwmaSmoothing {
    alpha: f64,
    gates: OscillationGates,
    estimate: Option<NamedWeights>,
    count: usize,
}

impl EwmaSmoothing {
    pub fn new(alpha: f64, gate: GateConfig) -> Self {
        Self {
            alpha,
            gates: OscillationGates::new(gate),
            estimate: None,
            count: 0,
        }
    }
}

impl Smoothing for EwmaSmoothing {
    fn kind(&self) -> SmoothingKind {
        SmoothingKind::Ewma
    }

    fn bind_parameter_shapes(&mut self, initial: &NamedWeights) -> Result<()> {
        bind_once(&mut self.estimate, initial, NamedWeights::clone)
    }

    fn accumulate(
        &mut self,
        loss: f64,
        weights: &NamedWeights,
        ctx: &EpochContext,
    ) -> Result<bool> {
        check_layout(self.estimate.as_ref(), weights)?;
        if !self.gates.start.evaluate(loss, ctx.train_fraction()) {
            return Ok(false);
        }
        if let Some(estimate) = self.estimate.as_mut() {
            estimate.scale(1.0 - self.alpha);
            estimate.add_scaled(weights, self.alpha);
        }
        self.count += 1;
        Ok(true)
    }

    fn current_estimate(&self) -> Option<NamedWeights> {
        if self.count == 0 {
            return None;
        }
        self.estimate.clone()
    }

    fn is_converged(&mut self, _ctx: &EpochContext) -> bool {
        match self.estimate.as_ref() {
            Some(estimate) if self.count > 0 => {
                self.gates.stop.evaluate(estimate.abs_sum(), self.count)
            }
            _ => false,
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

#[cfg(test)]
mod tests {
    use super::*;

    fn always_on() -> GateConfig {
        GateConfig {
            max_start_fraction: 0.0,
            min_start_fraction: 0.0,
            ..GateConfig::default()
        }
    }

    fn ctx() -> EpochContext {
        let mut ctx = EpochContext::new(0, 10, 0);
        ctx.train_steps = 1;
        ctx
    }

    fn scalar(x: f64) -> NamedWeights {
        NamedWeights::new().with("w", vec![x])
    }

    #[test]
    fn test_half_alpha_blends_samples() {
        let mut smoothing = EwmaSmoothing::new(0.5, always_on());
        smoothing.bind_parameter_shapes(&scalar(2.0)).unwrap();
        assert!(smoothing.accumulate(1.0, &scalar(2.0), &ctx()).unwrap());
        assert_eq!(smoothing.current_estimate(), Some(scalar(2.0)));
        assert!(smoothing.accumulate(1.0, &scalar(4.0), &ctx()).unwrap());
        assert_eq!(smoothing.current_estimate(), Some(scalar(3.0)));
    }

    #[test]
    fn test_not_ready_before_gate_opens() {
        let mut smoothing = EwmaSmoothing::new(0.27, GateConfig::default());
        smoothing.bind_parameter_shapes(&scalar(1.0)).unwrap();
        assert!(!smoothing.accumulate(1.0, &scalar(1.0), &ctx()).unwrap());
        assert!(smoothing.current_estimate().is_none());
        assert!(!smoothing.is_converged(&ctx()));
    }

    #[test]
    fn test_rebinding_keeps_estimate() {
        let mut smoothing = EwmaSmoothing::new(0.5, always_on());
        smoothing.bind_parameter_shapes(&scalar(2.0)).unwrap();
        smoothing.accumulate(1.0, &scalar(4.0), &ctx()).unwrap();
        smoothing.bind_parameter_shapes(&scalar(100.0)).unwrap();
        assert_eq!(smoothing.current_estimate(), Some(scalar(3.0)));
        assert!(smoothing
            .bind_parameter_shapes(&NamedWeights::new().with("other", vec![1.0]))
            .is_err());
    }

    #[test]
    fn test_stationary_weights_converge() {
        let mut smoothing = EwmaSmoothing::new(0.5, always_on());
        smoothing.bind_parameter_shapes(&scalar(1.0)).unwrap();
        let mut converged = false;
        for _ in 0..100 {
            smoothing.accumulate(1.0, &scalar(1.0), &ctx()).unwrap();
            if smoothing.is_converged(&ctx()) {
                converged = true;
                break;
            }
        }
        assert!(converged);
    }
}
