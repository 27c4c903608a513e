//! Model and Data Collaborators
//!
//! Boundary traits for the numerical model and the dataset. The
//! orchestrator treats every call as synchronous and blocking.

use crate::weights::NamedWeights;

/// Correct predictions in one batch
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchScore {
    pub correct: usize,
    pub samples: usize,
}

/// Trainable model with named parameters
///
/// Parameter names must be stable across calls: they key every smoothing
/// accumulator.
pub trait Model {
    type Batch;
    type Output;

    fn forward(&mut self, batch: &Self::Batch) -> anyhow::Result<Self::Output>;

    fn compute_loss(&mut self, output: &Self::Output, batch: &Self::Batch) -> anyhow::Result<f64>;

    /// Backpropagate the last loss and apply one optimizer step
    fn backward_and_step(&mut self) -> anyhow::Result<()>;

    fn score(&self, output: &Self::Output, batch: &Self::Batch) -> BatchScore;

    fn named_weights(&self) -> NamedWeights;

    fn set_named_weights(&mut self, weights: &NamedWeights) -> anyhow::Result<()>;

    /// Toggle training mode (dropout, batch-norm statistics and so on)
    fn set_training(&mut self, _training: bool) {}

    /// Called once after each completed epoch
    fn scheduler_step(&mut self, _epoch: usize) {}

    /// Full model state including optimizer, for checkpointing
    fn save_state(&self) -> anyhow::Result<serde_json::Value>;

    fn load_state(&mut self, state: &serde_json::Value) -> anyhow::Result<()>;
}

/// Boxed batch iterator handed out by a [`DataSource`]
pub type BatchIter<'a, B> = Box<dyn Iterator<Item = anyhow::Result<B>> + 'a>;

/// Finite, restartable train and test batch sequences
pub trait DataSource {
    type Batch;

    fn train_batch_count(&self) -> usize;

    fn test_batch_count(&self) -> usize;

    /// Train batches for `epoch`, in an order fixed by `seed`
    fn train_batches(&self, epoch: usize, seed: u64) -> BatchIter<'_, Self::Batch>;

    fn test_batches(&self) -> BatchIter<'_, Self::Batch>;
}
