//! Training Loop
//!
//! Epoch orchestration with signal-driven checkpointing and batch-accurate
//! resumption.

pub mod collaborators;
pub mod context;
pub mod orchestrator;
pub mod resume;
pub mod snapshot;
pub mod statistics;

pub use collaborators::{BatchIter, BatchScore, DataSource, Model};
pub use context::{EpochContext, EpochPhase, PassTally};
pub use orchestrator::{RunOutcome, RunSettings, TrainingOrchestrator};
pub use resume::{LoopRecord, LoopResumptionTracker, SubLoop};
pub use snapshot::{ModelSnapshot, SmoothingSnapshot};
pub use statistics::{EpochSummary, PassSummary, RunStatistics};
