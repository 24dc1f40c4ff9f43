//! Storage backends that hold the last committed save.
//!
//! A backend receives whole [`SaveEnvelope`]s and hands them back verbatim.
//! Readers only ever see the previous envelope or the new one.
//!
//! # Backends
//!
//! | Backend | Atomicity |
//! |---------|-----------|
//! | [`MemoryStore`] | Swap of a shared pointer |
//! | [`JsonFileStore`] | Write temp file, fsync, rename over the target |

use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use caelmor_types::PersistedTruth;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::PersistError;

/// One committed cross-system save.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SaveEnvelope {
    /// Monotonically increasing save number, starting at 1.
    pub generation: u64,
    /// Last committed tick at the time of the save.
    pub tick: u64,
    /// Wall-clock time the save was prepared. Informational only.
    pub saved_at: DateTime<Utc>,
    /// The persisted records, canonicalized.
    pub truth: PersistedTruth,
}

/// A sink and source for committed saves.
pub trait StorageBackend: Send {
    /// Atomically replace the committed save.
    ///
    /// # Errors
    ///
    /// Returns [`PersistError`] if the write fails. The previous save must
    /// remain readable in that case.
    fn write(&mut self, envelope: &SaveEnvelope) -> Result<(), PersistError>;

    /// Read the committed save, if any.
    ///
    /// # Errors
    ///
    /// Returns [`PersistError`] if the stored payload cannot be read.
    fn read(&self) -> Result<Option<SaveEnvelope>, PersistError>;
}

// =========================================================================
// In-memory
// =========================================================================

/// In-memory backend. Clones share the same committed slot.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    committed: Arc<std::sync::Mutex<Option<Arc<SaveEnvelope>>>>,
    fail_writes: bool,
}

impl MemoryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent write fail (crash injection for tests).
    pub const fn set_fail_writes(&mut self, fail: bool) {
        self.fail_writes = fail;
    }

    /// The committed envelope without cloning it.
    pub fn committed(&self) -> Option<Arc<SaveEnvelope>> {
        self.committed.lock().ok().and_then(|slot| slot.clone())
    }
}

impl StorageBackend for MemoryStore {
    fn write(&mut self, envelope: &SaveEnvelope) -> Result<(), PersistError> {
        if self.fail_writes {
            return Err(PersistError::Storage("injected write failure".to_owned()));
        }
        let next = Arc::new(envelope.clone());
        let mut slot = self
            .committed
            .lock()
            .map_err(|_err| PersistError::Storage("memory store poisoned".to_owned()))?;
        *slot = Some(next);
        Ok(())
    }

    fn read(&self) -> Result<Option<SaveEnvelope>, PersistError> {
        let slot = self
            .committed
            .lock()
            .map_err(|_err| PersistError::Storage("memory store poisoned".to_owned()))?;
        Ok(slot.as_deref().cloned())
    }
}

// =========================================================================
// JSON file
// =========================================================================

/// File backend storing the envelope as JSON.
#[derive(Debug, Clone)]
pub struct JsonFileStore {
    path: PathBuf,
}

impl JsonFileStore {
    /// Create a store writing to `path`. The parent directory is created on
    /// first write.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// The target file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(std::ffi::OsStr::to_os_string)
            .unwrap_or_default();
        name.push(".tmp");
        self.path.with_file_name(name)
    }
}

impl StorageBackend for JsonFileStore {
    fn write(&mut self, envelope: &SaveEnvelope) -> Result<(), PersistError> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        let temp = self.temp_path();
        let file = File::create(&temp)?;
        let mut writer = BufWriter::new(file);
        serde_json::to_writer_pretty(&mut writer, envelope)?;
        writer.flush()?;
        let file = writer
            .into_inner()
            .map_err(|err| PersistError::Io(err.into_error()))?;
        file.sync_all()?;
        fs::rename(&temp, &self.path)?;
        debug!(
            path = %self.path.display(),
            generation = envelope.generation,
            "Save written"
        );
        Ok(())
    }

    fn read(&self) -> Result<Option<SaveEnvelope>, PersistError> {
        if !self.path.exists() {
            return Ok(None);
        }
        let contents = fs::read_to_string(&self.path)?;
        Ok(Some(serde_json::from_str(&contents)?))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn envelope(generation: u64) -> SaveEnvelope {
        SaveEnvelope {
            generation,
            tick: 3,
            saved_at: Utc::now(),
            truth: PersistedTruth::default(),
        }
    }

    #[test]
    fn memory_store_keeps_previous_save_on_failure() {
        let mut store = MemoryStore::new();
        store.write(&envelope(1)).unwrap();
        store.set_fail_writes(true);
        assert!(store.write(&envelope(2)).is_err());
        assert_eq!(store.read().unwrap().map(|e| e.generation), Some(1));
    }

    #[test]
    fn memory_store_clones_share_slot() {
        let mut store = MemoryStore::new();
        let reader = store.clone();
        store.write(&envelope(4)).unwrap();
        assert_eq!(reader.committed().map(|e| e.generation), Some(4));
    }

    #[test]
    fn json_store_replaces_file() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = JsonFileStore::new(dir.path().join("saves").join("caelmor.json"));
        assert!(store.read().unwrap().is_none());

        store.write(&envelope(1)).unwrap();
        store.write(&envelope(2)).unwrap();
        let read = store.read().unwrap().unwrap();
        assert_eq!(read.generation, 2);
        assert!(!store.temp_path().exists());
    }
}
