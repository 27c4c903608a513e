//! Checkpoint Service
//!
//! Versioned snapshots of every stateful object in a run.
//! Checkpoints are created:
//! - When a checkpoint signal stops the run
//! - Every N completed epochs (optional)
//! - When the run finishes
//!
//! A run saves its objects as one set: every envelope of a set carries the
//! same generation id and the last one written acts as the commit marker.
//! Restoring refuses envelopes from a different generation.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info};

use super::store::StateStore;
use crate::error::{HarnessError, Result};

/// Current envelope format version
pub const CHECKPOINT_VERSION: i32 = 1;

/// Checkpoint data structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Checkpoint {
    pub checkpoint_type: String,
    pub component: String,
    pub data: serde_json::Value,
    pub version: i32,
    pub created_at: DateTime<Utc>,
    /// Id shared by all envelopes written by one `checkpoint_all`
    #[serde(default)]
    pub generation: Option<String>,
}

impl Checkpoint {
    pub fn new(
        checkpoint_type: impl Into<String>,
        component: impl Into<String>,
        data: serde_json::Value,
        version: i32,
    ) -> Self {
        Self {
            checkpoint_type: checkpoint_type.into(),
            component: component.into(),
            data,
            version,
            created_at: Utc::now(),
            generation: None,
        }
    }
}

/// Trait for types that can be checkpointed
pub trait Checkpointable {
    /// Checkpoint type identifier, also the storage key
    fn checkpoint_type(&self) -> &str;

    /// Component name, checked on restore
    fn component_name(&self) -> String;

    /// Serialize current state to JSON
    fn to_checkpoint(&self) -> Result<serde_json::Value>;

    /// Restore state from checkpoint
    fn from_checkpoint(&mut self, data: &serde_json::Value) -> Result<()>;

    /// Format version written with the state
    fn version(&self) -> i32 {
        CHECKPOINT_VERSION
    }
}

/// Checkpoint service for managing state snapshots
pub struct CheckpointService {
    store: Box<dyn StateStore>,
}

impl CheckpointService {
    /// Create a new checkpoint service
    pub fn new(store: Box<dyn StateStore>) -> Self {
        Self { store }
    }

    pub fn location(&self) -> String {
        self.store.describe()
    }

    /// Create a checkpoint for a component
    pub fn create_checkpoint<T: Checkpointable + ?Sized>(&self, component: &T) -> Result<()> {
        self.write(component, None)
    }

    fn write<T: Checkpointable + ?Sized>(&self, component: &T, generation: Option<&str>) -> Result<()> {
        let checkpoint_type = component.checkpoint_type();
        let component_name = component.component_name();
        let version = component.version();
        let data = component.to_checkpoint()?;

        let mut checkpoint = Checkpoint::new(checkpoint_type, component_name.clone(), data, version);
        checkpoint.generation = generation.map(str::to_string);
        self.store.save(checkpoint_type, &checkpoint)?;

        debug!(
            "Created checkpoint for {}/{} (version {})",
            checkpoint_type, component_name, version
        );
        Ok(())
    }

    /// Restore a component from its checkpoint. Returns false when none exists.
    pub fn restore_checkpoint<T: Checkpointable + ?Sized>(&self, component: &mut T) -> Result<bool> {
        let checkpoint_type = component.checkpoint_type().to_string();
        let Some(checkpoint) = self.store.load(&checkpoint_type)? else {
            debug!(
                "No checkpoint found for {}/{}",
                checkpoint_type,
                component.component_name()
            );
            return Ok(false);
        };
        self.apply(component, checkpoint)?;
        Ok(true)
    }

    /// Restore a component that must have been saved in `generation`
    pub fn restore_generation<T: Checkpointable + ?Sized>(
        &self,
        component: &mut T,
        generation: &str,
    ) -> Result<()> {
        let checkpoint_type = component.checkpoint_type().to_string();
        let checkpoint = self.store.load(&checkpoint_type)?.ok_or_else(|| {
            HarnessError::Checkpoint(format!(
                "{} checkpoint missing from set {}",
                checkpoint_type, generation
            ))
        })?;
        if checkpoint.generation.as_deref() != Some(generation) {
            return Err(HarnessError::Checkpoint(format!(
                "{} checkpoint belongs to set {}, expected {}: the last save did not complete",
                checkpoint_type,
                checkpoint.generation.as_deref().unwrap_or("<none>"),
                generation
            )));
        }
        self.apply(component, checkpoint)
    }

    fn apply<T: Checkpointable + ?Sized>(&self, component: &mut T, checkpoint: Checkpoint) -> Result<()> {
        let checkpoint_type = checkpoint.checkpoint_type.clone();
        let component_name = component.component_name();

        if checkpoint.version != component.version() {
            return Err(HarnessError::CheckpointVersion {
                component: checkpoint_type,
                found: checkpoint.version,
                expected: component.version(),
            });
        }
        if checkpoint.component != component_name {
            return Err(HarnessError::Checkpoint(format!(
                "{} checkpoint belongs to '{}', cannot restore into '{}'",
                checkpoint_type, checkpoint.component, component_name
            )));
        }

        match component.from_checkpoint(&checkpoint.data) {
            Ok(()) => {
                info!(
                    "Restored checkpoint for {}/{} (saved {})",
                    checkpoint_type,
                    component_name,
                    checkpoint.created_at.format("%Y-%m-%d %H:%M:%S")
                );
                Ok(())
            }
            Err(e) => {
                error!(
                    "Failed to restore checkpoint for {}/{}: {}",
                    checkpoint_type, component_name, e
                );
                Err(HarnessError::Checkpoint(format!(
                    "{} restore failed: {}",
                    checkpoint_type, e
                )))
            }
        }
    }

    /// Save all components as one set, in order, under a fresh generation id.
    /// Put the commit marker last: it is only written once the rest succeeded.
    pub fn checkpoint_all(&self, components: &[&dyn Checkpointable]) -> Result<String> {
        let generation = uuid::Uuid::new_v4().to_string();
        for component in components {
            self.write(*component, Some(&generation))?;
        }
        info!(
            "Saved {} checkpoints to {} (set {})",
            components.len(),
            self.store.describe(),
            generation
        );
        Ok(generation)
    }

    /// Generation of the set whose commit marker is stored under `checkpoint_type`
    pub fn committed_generation(&self, checkpoint_type: &str) -> Result<Option<String>> {
        let Some(checkpoint) = self.store.load(checkpoint_type)? else {
            return Ok(None);
        };
        checkpoint.generation.map(Some).ok_or_else(|| {
            HarnessError::Checkpoint(format!(
                "{} checkpoint was not saved as part of a set",
                checkpoint_type
            ))
        })
    }

    /// Check if a checkpoint exists for a key
    pub fn has_checkpoint(&self, checkpoint_type: &str) -> Result<bool> {
        Ok(self.store.load(checkpoint_type)?.is_some())
    }

    /// Raw envelope, for inspection
    pub fn load_raw(&self, checkpoint_type: &str) -> Result<Option<Checkpoint>> {
        self.store.load(checkpoint_type)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persistence::MemoryStateStore;

    struct MockComponent {
        name: String,
        state: i64,
        version: i32,
    }

    impl Checkpointable for MockComponent {
        fn checkpoint_type(&self) -> &str {
            "mock"
        }

        fn component_name(&self) -> String {
            self.name.clone()
        }

        fn to_checkpoint(&self) -> Result<serde_json::Value> {
            Ok(serde_json::json!({ "state": self.state }))
        }

        fn from_checkpoint(&mut self, data: &serde_json::Value) -> Result<()> {
            self.state = data["state"]
                .as_i64()
                .ok_or_else(|| HarnessError::Checkpoint("missing state".to_string()))?;
            Ok(())
        }

        fn version(&self) -> i32 {
            self.version
        }
    }

    fn mock(name: &str, state: i64, version: i32) -> MockComponent {
        MockComponent {
            name: name.to_string(),
            state,
            version,
        }
    }

    #[test]
    fn test_create_and_restore() {
        let service = CheckpointService::new(Box::new(MemoryStateStore::new()));
        service.create_checkpoint(&mock("a", 42, 1)).unwrap();

        let mut restored = mock("a", 0, 1);
        assert!(service.restore_checkpoint(&mut restored).unwrap());
        assert_eq!(restored.state, 42);
        assert!(service.has_checkpoint("mock").unwrap());
    }

    #[test]
    fn test_missing_checkpoint_is_not_an_error() {
        let service = CheckpointService::new(Box::new(MemoryStateStore::new()));
        let mut component = mock("a", 7, 1);
        assert!(!service.restore_checkpoint(&mut component).unwrap());
        assert_eq!(component.state, 7);
    }

    #[test]
    fn test_version_mismatch_rejected() {
        let service = CheckpointService::new(Box::new(MemoryStateStore::new()));
        service.create_checkpoint(&mock("a", 1, 2)).unwrap();
        let err = service
            .restore_checkpoint(&mut mock("a", 0, 1))
            .unwrap_err();
        assert!(matches!(
            err,
            HarnessError::CheckpointVersion {
                found: 2,
                expected: 1,
                ..
            }
        ));
    }

    #[test]
    fn test_checkpoint_set_shares_generation() {
        let service = CheckpointService::new(Box::new(MemoryStateStore::new()));
        let first = mock("a", 1, 1);
        let generation = service.checkpoint_all(&[&first]).unwrap();
        assert_eq!(
            service.committed_generation("mock").unwrap(),
            Some(generation.clone())
        );

        let mut restored = mock("a", 0, 1);
        service.restore_generation(&mut restored, &generation).unwrap();
        assert_eq!(restored.state, 1);

        service.checkpoint_all(&[&mock("a", 2, 1)]).unwrap();
        let err = service
            .restore_generation(&mut mock("a", 0, 1), &generation)
            .unwrap_err();
        assert!(matches!(err, HarnessError::Checkpoint(_)));
    }

    #[test]
    fn test_missing_member_of_set_is_an_error() {
        let service = CheckpointService::new(Box::new(MemoryStateStore::new()));
        assert!(service.committed_generation("mock").unwrap().is_none());
        assert!(service
            .restore_generation(&mut mock("a", 0, 1), "gen")
            .is_err());

        service.create_checkpoint(&mock("a", 3, 1)).unwrap();
        assert!(service.committed_generation("mock").is_err());
    }

    #[test]
    fn test_component_mismatch_rejected() {
        let service = CheckpointService::new(Box::new(MemoryStateStore::new()));
        service.create_checkpoint(&mock("ewma", 1, 1)).unwrap();
        assert!(service.restore_checkpoint(&mut mock("simple_mean", 0, 1)).is_err());
    }
}
