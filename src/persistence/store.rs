//! State Stores
//!
//! Key/value persistence for checkpoint envelopes. The file store writes
//! `<key>.json` through a temp file and a rename, so an abort during a save
//! leaves the previous version intact.

use std::collections::HashMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tracing::{debug, warn};

use super::checkpoint::Checkpoint;
use crate::error::{HarnessError, Result};

/// Save/load contract of the persistence collaborator
pub trait StateStore: Send {
    fn save(&self, key: &str, checkpoint: &Checkpoint) -> Result<()>;

    /// `Ok(None)` when nothing was saved under `key`
    fn load(&self, key: &str) -> Result<Option<Checkpoint>>;

    /// Human-readable location, for logs
    fn describe(&self) -> String;
}

fn validate_key(key: &str) -> Result<()> {
    let valid = !key.is_empty()
        && key
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
    if valid {
        Ok(())
    } else {
        Err(HarnessError::Checkpoint(format!(
            "invalid checkpoint key '{}'",
            key
        )))
    }
}

/// One JSON file per key inside a directory
#[derive(Debug, Clone)]
pub struct FileStateStore {
    dir: PathBuf,
}

impl FileStateStore {
    /// Open (and create if needed) a state directory
    pub fn new<P: AsRef<Path>>(dir: P) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        if !dir.exists() {
            fs::create_dir_all(&dir)?;
            debug!("Created state directory {:?}", dir);
        }
        Ok(Self { dir })
    }

    /// Open a state directory that must already exist
    pub fn open<P: AsRef<Path>>(dir: P) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        if !dir.is_dir() {
            return Err(HarnessError::Checkpoint(format!(
                "no state directory at {}",
                dir.display()
            )));
        }
        Ok(Self { dir })
    }

    pub fn path_for(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{}.json", key))
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Keys currently stored, sorted
    pub fn keys(&self) -> Vec<String> {
        let mut keys = Vec::new();
        if let Ok(entries) = fs::read_dir(&self.dir) {
            for entry in entries.flatten() {
                if let Some(name) = entry.file_name().to_str() {
                    if let Some(key) = name.strip_suffix(".json") {
                        keys.push(key.to_string());
                    }
                }
            }
        }
        keys.sort();
        keys
    }
}

impl StateStore for FileStateStore {
    fn save(&self, key: &str, checkpoint: &Checkpoint) -> Result<()> {
        validate_key(key)?;
        let path = self.path_for(key);
        let tmp = self.dir.join(format!("{}.json.tmp", key));

        let body = serde_json::to_vec_pretty(checkpoint)?;
        {
            let mut file = fs::File::create(&tmp)?;
            file.write_all(&body)?;
            file.sync_all()?;
        }
        if let Err(e) = fs::rename(&tmp, &path) {
            warn!("Failed to move {:?} into place: {}", tmp, e);
            let _ = fs::remove_file(&tmp);
            return Err(e.into());
        }
        debug!("Wrote {:?} ({} bytes)", path, body.len());
        Ok(())
    }

    fn load(&self, key: &str) -> Result<Option<Checkpoint>> {
        validate_key(key)?;
        let path = self.path_for(key);
        if !path.exists() {
            return Ok(None);
        }
        let body = fs::read_to_string(&path)?;
        let checkpoint = serde_json::from_str(&body).map_err(|e| {
            HarnessError::Checkpoint(format!("corrupt checkpoint {:?}: {}", path, e))
        })?;
        Ok(Some(checkpoint))
    }

    fn describe(&self) -> String {
        self.dir.display().to_string()
    }
}

/// In-process store. Clones share the same entries, so a "restarted"
/// orchestrator can read what a previous one saved.
#[derive(Debug, Clone, Default)]
pub struct MemoryStateStore {
    entries: Arc<Mutex<HashMap<String, Checkpoint>>>,
}

impl MemoryStateStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, HashMap<String, Checkpoint>>> {
        self.entries
            .lock()
            .map_err(|_| HarnessError::Runtime("memory state store lock poisoned".to_string()))
    }

    pub fn len(&self) -> usize {
        self.lock().map(|entries| entries.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl StateStore for MemoryStateStore {
    fn save(&self, key: &str, checkpoint: &Checkpoint) -> Result<()> {
        validate_key(key)?;
        self.lock()?.insert(key.to_string(), checkpoint.clone());
        Ok(())
    }

    fn load(&self, key: &str) -> Result<Option<Checkpoint>> {
        validate_key(key)?;
        Ok(self.lock()?.get(key).cloned())
    }

    fn describe(&self) -> String {
        "memory".to_string()
    }
}
