//! Disabled smoothing: accepts every call and never produces an estimate.

use super::{Smoothing, SmoothingKind};
use crate::error::Result;
use crate::training::EpochContext;
use crate::weights::NamedWeights;

#[derive(Debug, Clone, Copy, Default)]
pub struct DisabledSmoothing;

impl Smoothing for DisabledSmoothing {
    fn kind(&self) -> SmoothingKind {
        SmoothingKind::Disabled
    }

    fn bind_parameter_shapes(&mut self, _initial: &NamedWeights) -> Result<()> {
        Ok(())
    }

    fn accumulate(
        &mut self,
        _loss: f64,
        _weights: &NamedWeights,
        _ctx: &EpochContext,
    ) -> Result<bool> {
        Ok(false)
    }

    fn current_estimate(&self) -> Option<NamedWeights> {
        None
    }

    fn is_converged(&mut self, _ctx: &EpochContext) -> bool {
        false
    }

    fn accumulation_count(&self) -> usize {
        0
    }

    fn save_state(&self) -> Result<serde_json::Value> {
        Ok(serde_json::Value::Null)
    }

    fn load_state(&mut self, _state: &serde_json::Value) -> Result<()> {
        Ok(())
    }
}
