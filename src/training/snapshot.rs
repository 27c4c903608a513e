//! Checkpoint adapters for the objects a run persists.
//!
//! Storage keys: `progress`, `smoothing`, `model`, `statistics`.

use super::collaborators::Model;
use super::context::EpochContext;
use super::statistics::RunStatistics;
use crate::error::{HarnessError, Result};
use crate::persistence::Checkpointable;
use crate::smoothing::Smoothing;

impl Checkpointable for EpochContext {
    fn checkpoint_type(&self) -> &str {
        "progress"
    }

    fn component_name(&self) -> String {
        "run".to_string()
    }

    fn to_checkpoint(&self) -> Result<serde_json::Value> {
        Ok(serde_json::to_value(self)?)
    }

    fn from_checkpoint(&mut self, data: &serde_json::Value) -> Result<()> {
        *self = serde_json::from_value(data.clone())?;
        Ok(())
    }
}

impl Checkpointable for RunStatistics {
    fn checkpoint_type(&self) -> &str {
        "statistics"
    }

    fn component_name(&self) -> String {
        "run".to_string()
    }

    fn to_checkpoint(&self) -> Result<serde_json::Value> {
        Ok(serde_json::to_value(self)?)
    }

    fn from_checkpoint(&mut self, data: &serde_json::Value) -> Result<()> {
        *self = serde_json::from_value(data.clone())?;
        Ok(())
    }
}

/// Smoothing state, stored under the strategy kind
pub struct SmoothingSnapshot<'a>(pub &'a mut dyn Smoothing);

impl Checkpointable for SmoothingSnapshot<'_> {
    fn checkpoint_type(&self) -> &str {
        "smoothing"
    }

    fn component_name(&self) -> String {
        self.0.kind().to_string()
    }

    fn to_checkpoint(&self) -> Result<serde_json::Value> {
        self.0.save_state()
    }

    fn from_checkpoint(&mut self, data: &serde_json::Value) -> Result<()> {
        self.0.load_state(data)
    }
}

/// Full model state including optimizer buffers
pub struct ModelSnapshot<'a, M>(pub &'a mut M);

impl<M: Model> Checkpointable for ModelSnapshot<'_, M> {
    fn checkpoint_type(&self) -> &str {
        "model"
    }

    fn component_name(&self) -> String {
        "model".to_string()
    }

    fn to_checkpoint(&self) -> Result<serde_json::Value> {
        Ok(self.0.save_state()?)
    }

    fn from_checkpoint(&mut self, data: &serde_json::Value) -> Result<()> {
        self.0
            .load_state(data)
            .map_err(|e| HarnessError::Checkpoint(format!("model state rejected: {}", e)))
    }
}
