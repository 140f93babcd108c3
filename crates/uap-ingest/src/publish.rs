//! Snapshot publisher
//!
//! Two-phase publication of a local snapshot: stage it to the object
//! store at the entity's fixed key, then append the staged content
//! into the entity's warehouse table. Both phases are idempotent
//! (fixed-key overwrite, plain append) and retried independently. A
//! load failure leaves the object staged; the next run's stage phase
//! overwrites it harmlessly.

use std::path::Path;
use std::sync::Arc;

use tracing::{info, instrument};

use crate::entity::EntityKind;
use crate::object_store::ObjectStore;
use crate::retry::{with_retry, RetryPolicy};
use crate::warehouse::Warehouse;
use crate::{IngestError, Result};

/// Result of one publish call.
#[derive(Debug, Clone)]
pub struct PublishStats {
    /// Object key the snapshot was staged at.
    pub staged_key: String,
    /// Rows appended into the warehouse table.
    pub rows_loaded: u64,
}

/// Ships local snapshots to staging storage and the warehouse.
#[derive(Clone)]
pub struct Publisher {
    store: Arc<dyn ObjectStore>,
    warehouse: Arc<dyn Warehouse>,
    retry: RetryPolicy,
}

impl Publisher {
    pub fn new(
        store: Arc<dyn ObjectStore>,
        warehouse: Arc<dyn Warehouse>,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            store,
            warehouse,
            retry,
        }
    }

    /// Publish the snapshot at `path` for `kind`: stage, then load.
    ///
    /// The load is never attempted when staging fails. Retrying either
    /// phase is safe; duplicate *load calls* legitimately append rows
    /// again, which is the documented at-least-once behavior.
    #[instrument(skip(self, path), fields(entity = %kind))]
    pub async fn publish(&self, kind: EntityKind, path: &Path) -> Result<PublishStats> {
        let bytes = tokio::fs::read(path).await.map_err(|e| {
            IngestError::Stage(format!("read snapshot {}: {}", path.display(), e))
        })?;

        let key = kind.staging_key();

        with_retry(self.retry, "stage", || {
            let bytes = bytes.clone();
            let key = key.clone();
            async move { self.store.put(&key, bytes).await }
        })
        .await?;

        let rows_loaded = with_retry(self.retry, "load", || {
            let bytes = &bytes;
            async move { self.warehouse.load_append(kind.table(), bytes).await }
        })
        .await?;

        info!(entity = %kind, key = %key, rows_loaded, "snapshot published");

        Ok(PublishStats {
            staged_key: key,
            rows_loaded,
        })
    }
}
