pub mod cli;
pub mod config;
pub mod coordination;
pub mod error;
pub mod logging;
pub mod output;
pub mod persistence;
pub mod smoothing;
pub mod stats;
pub mod toy;
pub mod training;
pub mod weights;

pub use config::HarnessConfig;
pub use coordination::CheckpointSignal;
pub use error::{HarnessError, Result};
pub use output::{Channel, ChannelFiles, MemoryOutput, OutputSink};
pub use persistence::{CheckpointService, Checkpointable, FileStateStore, MemoryStateStore};
pub use smoothing::{build_smoothing, Smoothing, SmoothingConfig, SmoothingKind};
pub use stats::RingStatistics;
pub use training::{DataSource, Model, RunOutcome, RunSettings, TrainingOrchestrator};
pub use weights::NamedWeights;
