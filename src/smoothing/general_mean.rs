//! Generalized (Power) Mean Smoothing
//!
//! Running mean of `sample^p`; the exposed estimate is its `p`-th root.
//! Powers are sign-preserving so negative weights stay well defined.
//! With `p = 1` the estimate equals the arithmetic mean bit for bit.

use serde::{Deserialize, Serialize};

use super::gate::{GateConfig, OscillationGates};
use super::{bind_once, check_layout, Smoothing, SmoothingKind};
use crate::error::Result;
use crate::training::EpochContext;
use crate::weights::NamedWeights;

fn signed_pow(x: f64, p: f64) -> f64 {
    if p == 1.0 {
        x
    } else {
        x.signum() * x.abs().powf(p)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneralizedMeanSmoothing {
    power: f64,
    gates: OscillationGates,
    /// Sum of `sample^power`
    power_sum: Option<NamedWeights>,
    count: usize,
}

impl GeneralizedMeanSmoothing {
    pub fn new(power: f64, gate: GateConfig) -> Self {
        Self {
            power,
            gates: OscillationGates::new(gate),
            power_sum: None,
            count: 0,
        }
    }
}

impl Smoothing for GeneralizedMeanSmoothing {
    fn kind(&self) -> SmoothingKind {
        SmoothingKind::GeneralizedMean
    }

    fn bind_parameter_shapes(&mut self, initial: &NamedWeights) -> Result<()> {
        bind_once(&mut self.power_sum, initial, NamedWeights::zeros_like)
    }

    fn accumulate(
        &mut self,
        loss: f64,
        weights: &NamedWeights,
        ctx: &EpochContext,
    ) -> Result<bool> {
        check_layout(self.power_sum.as_ref(), weights)?;
        if !self.gates.start.evaluate(loss, ctx.train_fraction()) {
            return Ok(false);
        }
        let p = self.power;
        if let Some(sum) = self.power_sum.as_mut() {
            sum.add_assign(&weights.map(|x| signed_pow(x, p)));
        }
        self.count += 1;
        Ok(true)
    }

    fn current_estimate(&self) -> Option<NamedWeights> {
        if self.count == 0 {
            return None;
        }
        let n = self.count as f64;
        let root = 1.0 / self.power;
        Some(
            self.power_sum
                .as_ref()?
                .map(|x| signed_pow(x / n, root)),
        )
    }

    fn is_converged(&mut self, _ctx: &EpochContext) -> bool {
        match self.current_estimate() {
            Some(estimate) => self.gates.stop.evaluate(estimate.abs_sum(), self.count),
            None => false,
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
    use crate::smoothing::SimpleMeanSmoothing;

    fn always_on() -> GateConfig {
        GateConfig {
            max_start_fraction: 0.0,
            min_start_fraction: 0.0,
            ..GateConfig::default()
        }
    }

    fn ctx() -> EpochContext {
        let mut ctx = EpochContext::new(0, 10, 0);
        ctx.train_steps = 5;
        ctx
    }

    #[test]
    fn test_power_one_matches_simple_mean() {
        let mut general = GeneralizedMeanSmoothing::new(1.0, always_on());
        let mut simple = SimpleMeanSmoothing::new(0.0);
        let samples = [
            NamedWeights::new().with("a", vec![0.1, -0.7]).with("b", vec![3.3]),
            NamedWeights::new().with("a", vec![0.2, 0.9]).with("b", vec![-1.1]),
            NamedWeights::new().with("a", vec![0.7, 0.01]).with("b", vec![2.5]),
        ];
        general.bind_parameter_shapes(&samples[0]).unwrap();
        simple.bind_parameter_shapes(&samples[0]).unwrap();
        for sample in &samples {
            assert!(general.accumulate(0.5, sample, &ctx()).unwrap());
            assert!(simple.accumulate(0.5, sample, &ctx()).unwrap());
        }
        assert_eq!(general.current_estimate(), simple.current_estimate());
    }

    #[test]
    fn test_quadratic_mean() {
        let mut smoothing = GeneralizedMeanSmoothing::new(2.0, always_on());
        let w = |x: f64| NamedWeights::new().with("w", vec![x]);
        smoothing.bind_parameter_shapes(&w(0.0)).unwrap();
        smoothing.accumulate(1.0, &w(3.0), &ctx()).unwrap();
        smoothing.accumulate(1.0, &w(4.0), &ctx()).unwrap();
        let estimate = smoothing.current_estimate().unwrap();
        let value = estimate.get("w").unwrap()[0];
        assert!((value - 12.5f64.sqrt()).abs() < 1e-12);
    }

    #[test]
    fn test_negative_weights_stay_finite() {
        let mut smoothing = GeneralizedMeanSmoothing::new(0.5, always_on());
        let w = |x: f64| NamedWeights::new().with("w", vec![x]);
        smoothing.bind_parameter_shapes(&w(0.0)).unwrap();
        smoothing.accumulate(1.0, &w(-4.0), &ctx()).unwrap();
        let value = smoothing.current_estimate().unwrap().get("w").unwrap()[0];
        assert!((value + 4.0).abs() < 1e-12);
    }
}
