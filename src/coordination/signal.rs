//! Checkpoint Signal
//!
//! Process-wide latch telling the training loop to stop at the next batch
//! boundary and persist its state. Two-tier interrupt handling:
//! - SIGQUIT (Ctrl+\) and SIGTERM set the latch (graceful checkpoint)
//! - SIGINT (Ctrl+C) aborts immediately with exit status 2, nothing saved

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{info, warn};

use crate::error::{HarnessError, Result};

/// Exit status used when the run is aborted without checkpointing
pub const ABORT_EXIT_CODE: i32 = 2;

/// How an interrupt should be handled
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InterruptKind {
    /// Stop at the next safe point and save everything
    Graceful,
    /// Terminate now, bypassing the checkpoint
    Abort,
}

impl std::fmt::Display for InterruptKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            InterruptKind::Graceful => write!(f, "graceful"),
            InterruptKind::Abort => write!(f, "abort"),
        }
    }
}

/// Set-once, read-many checkpoint request flag
#[derive(Debug, Clone, Default)]
pub struct CheckpointSignal {
    requested: Arc<AtomicBool>,
}

impl CheckpointSignal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request a checkpoint. Returns false if one was already requested.
    pub fn trigger(&self, source: &str) -> bool {
        if self.requested.swap(true, Ordering::SeqCst) {
            warn!("Checkpoint already requested, ignoring duplicate from {}", source);
            return false;
        }
        info!("Checkpoint requested by {}, stopping at next batch boundary", source);
        true
    }

    /// Plain atomic load, polled once per batch
    pub fn is_set(&self) -> bool {
        self.requested.load(Ordering::SeqCst)
    }
}

/// Route an interrupt of the given kind
pub fn handle_interrupt(signal: &CheckpointSignal, kind: InterruptKind, source: &str) {
    match kind {
        InterruptKind::Graceful => {
            signal.trigger(source);
        }
        InterruptKind::Abort => {
            warn!("Received {} - aborting without checkpoint", source);
            std::process::exit(ABORT_EXIT_CODE);
        }
    }
}

/// Install OS signal listeners as tokio tasks
pub async fn install_signal_handlers(signal: CheckpointSignal) -> Result<()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal as os_signal, SignalKind};

        let listeners = [
            (SignalKind::quit(), "SIGQUIT", InterruptKind::Graceful),
            (SignalKind::terminate(), "SIGTERM", InterruptKind::Graceful),
            (SignalKind::interrupt(), "SIGINT", InterruptKind::Abort),
        ];

        for (kind, name, action) in listeners {
            let mut stream = os_signal(kind).map_err(|e| {
                HarnessError::Runtime(format!("failed to install {} handler: {}", name, e))
            })?;
            let signal = signal.clone();
            tokio::spawn(async move {
                while stream.recv().await.is_some() {
                    handle_interrupt(&signal, action, name);
                }
            });
        }
        info!("Signal handlers installed (Ctrl+\\ to checkpoint and exit, Ctrl+C to abort)");
    }

    #[cfg(not(unix))]
    {
        let signal = signal.clone();
        tokio::spawn(async move {
            loop {
                if let Err(e) = tokio::signal::ctrl_c().await {
                    warn!("Ctrl+C listener failed: {}", e);
                    return;
                }
                handle_interrupt(&signal, InterruptKind::Graceful, "Ctrl+C");
            }
        });
        info!("Signal handler installed (Ctrl+C to checkpoint and exit)");
    }

    Ok(())
}
