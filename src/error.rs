use thiserror::Error;

/// Main error type for the training harness
#[derive(Error, Debug)]
pub enum HarnessError {
    // Configuration errors
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // Serialization errors
    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML serialization error: {0}")]
    Toml(#[from] toml::ser::Error),

    // IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    // Persistence errors
    #[error("Checkpoint error: {0}")]
    Checkpoint(String),

    #[error("Unsupported checkpoint version for {component}: found {found}, expected {expected}")]
    CheckpointVersion {
        component: String,
        found: i32,
        expected: i32,
    },

    // Smoothing errors
    #[error("Smoothing error: {0}")]
    Smoothing(String),

    // Model / data collaborator failures, annotated with the loop position
    #[error("{phase} failed at epoch {epoch}, batch {batch}: {source}")]
    Collaborator {
        phase: &'static str,
        epoch: usize,
        batch: usize,
        #[source]
        source: anyhow::Error,
    },

    #[error("Runtime error: {0}")]
    Runtime(String),

    #[error("{0}")]
    Other(#[from] anyhow::Error),
}

impl HarnessError {
    /// Wrap a collaborator error with the epoch and batch it happened at
    pub fn collaborator(
        phase: &'static str,
        epoch: usize,
        batch: usize,
        source: anyhow::Error,
    ) -> Self {
        HarnessError::Collaborator {
            phase,
            epoch,
            batch,
            source,
        }
    }
}

/// Result type alias for HarnessError
pub type Result<T> = std::result::Result<T, HarnessError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_collaborator_error_message_carries_position() {
        let err = HarnessError::collaborator("train step", 2, 17, anyhow::anyhow!("nan loss"));
        assert_eq!(
            err.to_string(),
            "train step failed at epoch 2, batch 17: nan loss"
        );
    }

    #[test]
    fn test_version_error_display() {
        let err = HarnessError::CheckpointVersion {
            component: "progress".to_string(),
            found: 7,
            expected: 1,
        };
        assert!(err.to_string().contains("progress"));
        assert!(err.to_string().contains("found 7"));
    }
}
