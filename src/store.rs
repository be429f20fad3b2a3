//! Durable state persistence
//!
//! [`StateStore`] implementations hold the single externally durable artifact
//! of the runtime: the serialized [`PersistedState`] blob. Two rules govern
//! every implementation:
//!
//! - `load` never fails the caller. Missing, corrupt, or unreadable storage
//!   is logged and a default-empty state is returned.
//! - `save` is atomic from a reader's point of view; a reader never observes
//!   a half-written blob.
//!
//! The file store writes to a temporary sibling and renames it into place,
//! which is atomic on the filesystems we target. Blobs carry a
//! `schema_version` and are migrated forward explicitly on load; a version
//! from the future is treated as unreadable rather than reinterpreted.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use parking_lot::Mutex;
use serde_json::Value;

use crate::error::{Error, Result};
use crate::model::{PersistedState, SCHEMA_VERSION};

/// File name of the persisted blob under the store's data directory.
pub const STORAGE_KEY: &str = "defiant_state.json";

/// Durable persistence of the canonical state blob.
pub trait StateStore: Send + Sync {
    /// Load the persisted state, or default-empty on absence/corruption.
    fn load(&self) -> PersistedState;

    /// Persist `state` atomically.
    fn save(&self, state: &PersistedState) -> Result<()>;

    /// Reset persisted state to default-empty and persist that reset.
    fn clear(&self) -> Result<()>;
}

/// File-backed store writing `STORAGE_KEY` under a data directory.
pub struct FileStateStore {
    path: PathBuf,
}

impl FileStateStore {
    /// Create a store rooted at `data_dir`. The directory is created lazily
    /// on first save.
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            path: data_dir.into().join(STORAGE_KEY),
        }
    }

    /// Path of the blob file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn write_atomic(&self, bytes: &[u8]) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).map_err(|e| Error::Storage(e.to_string()))?;
        }
        let tmp = self.path.with_extension("json.tmp");
        let mut file = fs::File::create(&tmp).map_err(|e| Error::Storage(e.to_string()))?;
        file.write_all(bytes)
            .and_then(|_| file.sync_all())
            .map_err(|e| Error::Storage(e.to_string()))?;
        fs::rename(&tmp, &self.path).map_err(|e| Error::Storage(e.to_string()))
    }
}

impl StateStore for FileStateStore {
    fn load(&self) -> PersistedState {
        let bytes = match fs::read(&self.path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %self.path.display(), "No persisted state; starting empty");
                return PersistedState::default();
            }
            Err(e) => {
                tracing::warn!(
                    path = %self.path.display(),
                    error = %e,
                    "Persisted state unreadable; starting empty"
                );
                return PersistedState::default();
            }
        };

        match decode_state(&bytes) {
            Ok(state) => state,
            Err(e) => {
                tracing::warn!(
                    path = %self.path.display(),
                    error = %e,
                    "Persisted state corrupt; starting empty"
                );
                PersistedState::default()
            }
        }
    }

    fn save(&self, state: &PersistedState) -> Result<()> {
        let bytes = serde_json::to_vec(state)?;
        self.write_atomic(&bytes)
    }

    fn clear(&self) -> Result<()> {
        self.save(&PersistedState::default())
    }
}

/// In-memory store for tests and sessions that opt out of durability.
#[derive(Default)]
pub struct MemoryStateStore {
    blob: Mutex<Option<PersistedState>>,
}

impl MemoryStateStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }
}

impl StateStore for MemoryStateStore {
    fn load(&self) -> PersistedState {
        self.blob.lock().clone().unwrap_or_default()
    }

    fn save(&self, state: &PersistedState) -> Result<()> {
        *self.blob.lock() = Some(state.clone());
        Ok(())
    }

    fn clear(&self) -> Result<()> {
        *self.blob.lock() = Some(PersistedState::default());
        Ok(())
    }
}

/// Decode a blob, migrating older schema versions forward.
fn decode_state(bytes: &[u8]) -> Result<PersistedState> {
    let value: Value = serde_json::from_slice(bytes)?;
    let version = value
        .get("schema_version")
        .and_then(Value::as_u64)
        .ok_or_else(|| Error::Storage("blob has no schema_version".into()))?;

    let migrated = match version as u32 {
        SCHEMA_VERSION => value,
        1 => migrate_v1_to_v2(value),
        v if v > SCHEMA_VERSION => {
            return Err(Error::Storage(format!(
                "blob schema_version {v} is newer than supported {SCHEMA_VERSION}"
            )));
        }
        v => return Err(Error::Storage(format!("unsupported schema_version {v}"))),
    };

    Ok(serde_json::from_value(migrated)?)
}

/// v1 blobs predate event dedup; they carry entities and the initialized
/// flag only. The dedup window starts empty after migration.
fn migrate_v1_to_v2(mut value: Value) -> Value {
    tracing::info!("Migrating persisted state v1 -> v2");
    if let Some(obj) = value.as_object_mut() {
        obj.insert("schema_version".into(), Value::from(2u32));
        obj.entry("last_seen_event_ids")
            .or_insert_with(|| Value::Array(Vec::new()));
    }
    value
}
