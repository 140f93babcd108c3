//! Durable per-entity checkpoint (watermark) store
//!
//! One integer watermark per entity: the highest record id durably
//! written to the local snapshot. Read at pipeline start (default 0),
//! advanced record-by-record by the snapshot writer, never touched by
//! any other component. Monotonically non-decreasing; values must
//! survive process restarts.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use tracing::debug;

use crate::entity::EntityKind;
use crate::{IngestError, Result};

/// Key/value store of per-entity high-water marks.
///
/// `get` defaults to 0 for an entity that has never been persisted.
/// Each entity's watermark is written only by that entity's snapshot
/// writer, so implementations need no cross-entity coordination beyond
/// plain interior mutability.
pub trait CheckpointStore: Send + Sync {
    fn get(&self, kind: EntityKind) -> Result<i64>;
    fn set(&self, kind: EntityKind, watermark: i64) -> Result<()>;
}

/// File-backed checkpoint store
///
/// Holds all four watermarks in one small JSON document. Every `set`
/// rewrites the document through a temp file and rename, so a crash
/// mid-write leaves the previous document intact.
pub struct FileCheckpointStore {
    path: PathBuf,
    cache: Mutex<BTreeMap<EntityKind, i64>>,
}

impl FileCheckpointStore {
    /// Open the store at `path`, loading existing watermarks if the
    /// file is present.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();

        let cache = if path.exists() {
            let raw = fs::read_to_string(&path)
                .map_err(|e| IngestError::Checkpoint(format!("read {}: {}", path.display(), e)))?;
            serde_json::from_str(&raw)
                .map_err(|e| IngestError::Checkpoint(format!("parse {}: {}", path.display(), e)))?
        } else {
            BTreeMap::new()
        };

        debug!(path = %path.display(), "opened checkpoint store");

        Ok(Self {
            path,
            cache: Mutex::new(cache),
        })
    }

    fn persist(&self, snapshot: &BTreeMap<EntityKind, i64>) -> Result<()> {
        if let Some(dir) = self.path.parent() {
            fs::create_dir_all(dir)
                .map_err(|e| IngestError::Checkpoint(format!("create {}: {}", dir.display(), e)))?;
        }

        let tmp = self.path.with_extension("json.tmp");
        let body = serde_json::to_string_pretty(snapshot)?;
        fs::write(&tmp, body)
            .map_err(|e| IngestError::Checkpoint(format!("write {}: {}", tmp.display(), e)))?;
        fs::rename(&tmp, &self.path).map_err(|e| {
            IngestError::Checkpoint(format!("rename into {}: {}", self.path.display(), e))
        })?;

        Ok(())
    }
}

impl CheckpointStore for FileCheckpointStore {
    fn get(&self, kind: EntityKind) -> Result<i64> {
        let cache = self
            .cache
            .lock()
            .map_err(|_| IngestError::Checkpoint("checkpoint cache poisoned".to_string()))?;
        Ok(cache.get(&kind).copied().unwrap_or(0))
    }

    fn set(&self, kind: EntityKind, watermark: i64) -> Result<()> {
        let mut cache = self
            .cache
            .lock()
            .map_err(|_| IngestError::Checkpoint("checkpoint cache poisoned".to_string()))?;
        cache.insert(kind, watermark);
        // Persisted per record, not per batch: a crash mid-batch leaves
        // the document consistent with the partial snapshot file.
        self.persist(&cache)
    }
}

/// Convenience accessor used by the CLI `checkpoints` command.
pub fn all_watermarks(store: &dyn CheckpointStore) -> Result<Vec<(EntityKind, i64)>> {
    EntityKind::ALL
        .iter()
        .map(|&kind| store.get(kind).map(|w| (kind, w)))
        .collect()
}
