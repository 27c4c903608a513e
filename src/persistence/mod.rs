//! Persistence Layer for Resumable Runs
//!
//! - Checkpoint service writing versioned envelopes per stateful object
//! - State stores: one JSON file per key, or in memory for tests

pub mod checkpoint;
pub mod store;

pub use checkpoint::{Checkpoint, CheckpointService, Checkpointable, CHECKPOINT_VERSION};
pub use store::{FileStateStore, MemoryStateStore, StateStore};
