//! Coordination between OS signals and the training loop

pub mod signal;

pub use signal::{
    handle_interrupt, install_signal_handlers, CheckpointSignal, InterruptKind, ABORT_EXIT_CODE,
};
