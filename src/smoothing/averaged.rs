//! Averaged-Model Smoothing
//!
//! Delegates the combination rule to an external averaged-model
//! collaborator (SWA style) and starts after a fixed share of the run.

use serde::{Deserialize, Serialize};

use super::gate::{FractionGate, DEFAULT_LOSS_WINDOW};
use super::{bind_once, check_layout, Smoothing, SmoothingKind};
use crate::error::Result;
use crate::stats::RingStatistics;
use crate::training::EpochContext;
use crate::weights::NamedWeights;

/// External averaged-model collaborator
pub trait AveragedModel: Send {
    /// Fold one set of weights into the average
    fn update_parameters(&mut self, weights: &NamedWeights) -> anyhow::Result<()>;

    fn averaged_weights(&self) -> Option<NamedWeights>;

    fn n_averaged(&self) -> usize;

    fn save_state(&self) -> anyhow::Result<serde_json::Value>;

    fn load_state(&mut self, state: &serde_json::Value) -> anyhow::Result<()>;
}

/// Equal-weight running average: `avg += (w - avg) / (n + 1)`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RunningAverageModel {
    average: Option<NamedWeights>,
    n_averaged: usize,
}

impl AveragedModel for RunningAverageModel {
    fn update_parameters(&mut self, weights: &NamedWeights) -> anyhow::Result<()> {
        match self.average.as_mut() {
            None => self.average = Some(weights.clone()),
            Some(average) => {
                average.ensure_same_layout(weights)?;
                let n = self.n_averaged as f64;
                average.scale(n / (n + 1.0));
                average.add_scaled(weights, 1.0 / (n + 1.0));
            }
        }
        self.n_averaged += 1;
        Ok(())
    }

    fn averaged_weights(&self) -> Option<NamedWeights> {
        self.average.clone()
    }

    fn n_averaged(&self) -> usize {
        self.n_averaged
    }

    fn save_state(&self) -> anyhow::Result<serde_json::Value> {
        Ok(serde_json::to_value(self)?)
    }

    fn load_state(&mut self, state: &serde_json::Value) -> anyhow::Result<()> {
        *self = serde_json::from_value(state.clone())?;
        Ok(())
    }
}

#[derive(Serialize, Deserialize)]
struct PersistedAveraged {
    gate: FractionGate,
    losses: RingStatistics<f64>,
    layout: Option<NamedWeights>,
    model: serde_json::Value,
}

pub struct AveragedSmoothing {
    gate: FractionGate,
    losses: RingStatistics<f64>,
    layout: Option<NamedWeights>,
    model: Box<dyn AveragedModel>,
}

impl AveragedSmoothing {
    pub fn new(start_fraction: f64, model: Box<dyn AveragedModel>) -> Self {
        Self {
            gate: FractionGate::new(start_fraction),
            losses: RingStatistics::new(DEFAULT_LOSS_WINDOW),
            layout: None,
            model,
        }
    }
}

impl Smoothing for AveragedSmoothing {
    fn kind(&self) -> SmoothingKind {
        SmoothingKind::AveragedModel
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
        self.losses.push(loss);
        if !self.gate.evaluate(ctx.train_fraction()) {
            return Ok(false);
        }
        self.model.update_parameters(weights)?;
        Ok(true)
    }

    fn current_estimate(&self) -> Option<NamedWeights> {
        if self.model.n_averaged() == 0 {
            return None;
        }
        self.model.averaged_weights()
    }

    fn is_converged(&mut self, _ctx: &EpochContext) -> bool {
        false
    }

    fn accumulation_count(&self) -> usize {
        self.model.n_averaged()
    }

    fn recent_loss(&self) -> Option<f64> {
        if self.losses.is_empty() {
            None
        } else {
            Some(self.losses.average(0))
        }
    }

    fn save_state(&self) -> Result<serde_json::Value> {
        let persisted = PersistedAveraged {
            gate: self.gate.clone(),
            losses: self.losses.clone(),
            layout: self.layout.clone(),
            model: self.model.save_state()?,
        };
        Ok(serde_json::to_value(persisted)?)
    }

    fn load_state(&mut self, state: &serde_json::Value) -> Result<()> {
        let persisted: PersistedAveraged = serde_json::from_value(state.clone())?;
        self.model.load_state(&persisted.model)?;
        self.gate = persisted.gate;
        self.losses = persisted.losses;
        self.layout = persisted.layout;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn w(x: f64) -> NamedWeights {
        NamedWeights::new().with("w", vec![x])
    }

    fn ctx_at(steps: usize) -> EpochContext {
        let mut ctx = EpochContext::new(0, 10, 0);
        ctx.train_steps = steps;
        ctx
    }

    #[test]
    fn test_running_average() {
        let mut model = RunningAverageModel::default();
        for x in [1.0, 2.0, 6.0] {
            model.update_parameters(&w(x)).unwrap();
        }
        let value = model.averaged_weights().unwrap().get("w").unwrap()[0];
        assert!((value - 3.0).abs() < 1e-12);
        assert_eq!(model.n_averaged(), 3);
    }

    #[test]
    fn test_starts_after_fraction_and_round_trips() {
        let mut smoothing = AveragedSmoothing::new(0.5, Box::new(RunningAverageModel::default()));
        smoothing.bind_parameter_shapes(&w(0.0)).unwrap();
        assert!(!smoothing.accumulate(1.0, &w(10.0), &ctx_at(5)).unwrap());
        assert!(smoothing.current_estimate().is_none());
        assert!(smoothing.accumulate(1.0, &w(2.0), &ctx_at(6)).unwrap());

        let state = smoothing.save_state().unwrap();
        let mut restored =
            AveragedSmoothing::new(0.9, Box::new(RunningAverageModel::default()));
        restored.load_state(&state).unwrap();
        assert_eq!(restored.recent_loss(), Some(1.0));
        assert!(restored.accumulate(1.0, &w(4.0), &ctx_at(7)).unwrap());
        assert_eq!(restored.accumulation_count(), 2);
        let value = restored.current_estimate().unwrap().get("w").unwrap()[0];
        assert!((value - 3.0).abs() < 1e-12);
    }
}
