//! Pipeline orchestrator
//!
//! Composes the per-entity stages into one directed run:
//!
//! ```text
//!                    +-> users: Probe -> Fetch -> Branch -> Persist -> Stage -> Load -+
//! ensure dataset ----+-> carts: ...                                                   +--> summarize
//!   (one barrier)    +-> posts: ...                                                   |  (all four clean)
//!                    +-> todos: ...                                                  -+
//! ```
//!
//! The four entity pipelines run as independent tasks; a failure in
//! one never aborts the others. The aggregation step is fail-closed:
//! it fires exactly once per run, and only when every entity pipeline
//! terminated cleanly.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::task::JoinSet;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

use crate::aggregate::Aggregator;
use crate::checkpoint::{CheckpointStore, FileCheckpointStore};
use crate::config::IngestConfig;
use crate::delta;
use crate::entity::EntityKind;
use crate::object_store::S3Store;
use crate::publish::Publisher;
use crate::retry::{with_retry, RetryPolicy};
use crate::snapshot::SnapshotWriter;
use crate::source::{HttpSource, Source};
use crate::warehouse::{PgWarehouse, Warehouse};
use crate::{IngestError, Result};

/// Terminal state of one entity pipeline in a run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EntityOutcome {
    /// The batch was persisted, staged, and appended.
    Loaded { records: u64 },
    /// The upstream returned nothing; the pipeline short-circuited
    /// with no snapshot write, no checkpoint change, and no publish.
    NoNewRecords,
}

/// Per-entity result of a run.
#[derive(Debug)]
pub struct EntityReport {
    pub entity: EntityKind,
    pub outcome: std::result::Result<EntityOutcome, IngestError>,
}

/// Terminal state of the aggregation step.
#[derive(Debug)]
pub enum SummaryStatus {
    /// Summary table replaced with this many rows.
    Replaced { rows: usize },
    /// At least one entity pipeline failed; aggregation was withheld.
    Skipped,
    /// All loads succeeded but the aggregation itself failed. Loaded
    /// tables stay committed.
    Failed(String),
}

/// Outcome of one full ingestion cycle.
#[derive(Debug)]
pub struct RunReport {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
    pub entities: Vec<EntityReport>,
    pub summary: SummaryStatus,
}

impl RunReport {
    /// True when every entity terminated cleanly and the summary was
    /// replaced.
    pub fn is_success(&self) -> bool {
        self.entities.iter().all(|e| e.outcome.is_ok())
            && matches!(self.summary, SummaryStatus::Replaced { .. })
    }
}

/// The per-entity stage sequence, shared by all four entity tasks.
#[derive(Clone)]
struct EntityPipeline {
    source: Arc<dyn Source>,
    checkpoints: Arc<dyn CheckpointStore>,
    snapshots: SnapshotWriter,
    publisher: Publisher,
    retry: RetryPolicy,
}

impl EntityPipeline {
    /// Run one entity through Probe -> Fetch -> Branch -> Persist ->
    /// Stage -> Load. Stages are strictly sequential; fetch, persist,
    /// and the two publish phases carry their own retry budgets.
    #[instrument(skip(self), fields(entity = %kind))]
    async fn run(&self, kind: EntityKind) -> Result<EntityOutcome> {
        // Probe failure means no side effects at all: nothing written,
        // no checkpoint touched.
        self.source.probe(kind).await?;

        let batch = with_retry(self.retry, "fetch", || self.source.fetch(kind)).await?;

        if !delta::has_new(&batch) {
            info!(entity = %kind, "no records returned, pipeline done");
            return Ok(EntityOutcome::NoNewRecords);
        }

        let checkpoint_before = self.checkpoints.get(kind)?;
        let snapshot = with_retry(self.retry, "persist", || async {
            self.snapshots.write(kind, &batch, self.checkpoints.as_ref())
        })
        .await?;

        info!(
            entity = %kind,
            checkpoint_before,
            checkpoint_after = snapshot.checkpoint,
            "snapshot persisted, publishing"
        );

        let stats = self.publisher.publish(kind, &snapshot.path).await?;

        Ok(EntityOutcome::Loaded {
            records: stats.rows_loaded,
        })
    }
}

/// Orchestrates one ingestion cycle across all four entities.
pub struct PipelineOrchestrator {
    pipeline: EntityPipeline,
    warehouse: Arc<dyn Warehouse>,
    aggregator: Aggregator,
}

impl PipelineOrchestrator {
    pub fn new(
        source: Arc<dyn Source>,
        checkpoints: Arc<dyn CheckpointStore>,
        snapshots: SnapshotWriter,
        warehouse: Arc<dyn Warehouse>,
        publisher: Publisher,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            pipeline: EntityPipeline {
                source,
                checkpoints,
                snapshots,
                publisher,
                retry,
            },
            aggregator: Aggregator::new(warehouse.clone()),
            warehouse,
        }
    }

    /// Wire up the production collaborators from configuration.
    pub async fn from_config(config: &IngestConfig) -> anyhow::Result<Self> {
        config.validate()?;

        let source = Arc::new(HttpSource::new(
            &config.api_base_url,
            config.http_timeout(),
            config.probe_interval(),
            config.probe_max_attempts,
        )?);
        let checkpoints = Arc::new(FileCheckpointStore::open(&config.checkpoint_path)?);
        let snapshots = SnapshotWriter::new(&config.output_dir);
        let object_store = Arc::new(S3Store::new(&config.s3)?);

        let pool = sqlx::PgPool::connect(&config.database_url).await?;
        let warehouse: Arc<dyn Warehouse> =
            Arc::new(PgWarehouse::new(pool, config.dataset.clone())?);

        let retry = config.retry_policy();
        let publisher = Publisher::new(object_store, warehouse.clone(), retry);

        Ok(Self::new(
            source,
            checkpoints,
            snapshots,
            warehouse,
            publisher,
            retry,
        ))
    }

    /// Run one full cycle: dataset barrier, four concurrent entity
    /// pipelines, then the fail-closed aggregation.
    pub async fn run(&self) -> Result<RunReport> {
        let run_id = Uuid::new_v4();
        let started_at = Utc::now();
        info!(%run_id, "ingestion cycle starting");

        // Shared precondition: must succeed exactly once before any
        // entity probes. Failure here aborts the run with no entity
        // side effects.
        self.warehouse.ensure_dataset().await?;

        let mut tasks = JoinSet::new();
        for kind in EntityKind::ALL {
            let pipeline = self.pipeline.clone();
            tasks.spawn(async move { (kind, pipeline.run(kind).await) });
        }

        let mut results: BTreeMap<EntityKind, std::result::Result<EntityOutcome, IngestError>> =
            BTreeMap::new();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((kind, outcome)) => {
                    match &outcome {
                        Ok(o) => info!(%run_id, entity = %kind, outcome = ?o, "entity pipeline done"),
                        Err(e) => error!(%run_id, entity = %kind, error = %e, "entity pipeline failed"),
                    }
                    results.insert(kind, outcome);
                },
                Err(e) => {
                    error!(%run_id, error = %e, "entity task aborted");
                },
            }
        }
        // An aborted task never reported; mark its entity failed so
        // the aggregation stays closed.
        for kind in EntityKind::ALL {
            results
                .entry(kind)
                .or_insert_with(|| Err(IngestError::Internal("entity task aborted".to_string())));
        }

        let entities: Vec<EntityReport> = EntityKind::ALL
            .into_iter()
            .map(|entity| EntityReport {
                entity,
                outcome: results
                    .remove(&entity)
                    .unwrap_or_else(|| Err(IngestError::Internal("missing result".to_string()))),
            })
            .collect();

        let all_clean = entities.iter().all(|e| e.outcome.is_ok());
        let summary = if all_clean {
            match self.aggregator.summarize().await {
                Ok(rows) => SummaryStatus::Replaced { rows },
                Err(e) => {
                    error!(%run_id, error = %e, "aggregation failed");
                    SummaryStatus::Failed(e.to_string())
                },
            }
        } else {
            warn!(%run_id, "one or more entity pipelines failed, withholding aggregation");
            SummaryStatus::Skipped
        };

        let completed_at = Utc::now();
        info!(
            %run_id,
            duration_ms = (completed_at - started_at).num_milliseconds(),
            success = entities.iter().all(|e| e.outcome.is_ok())
                && matches!(summary, SummaryStatus::Replaced { .. }),
            "ingestion cycle finished"
        );

        Ok(RunReport {
            run_id,
            started_at,
            completed_at,
            entities,
            summary,
        })
    }
}
