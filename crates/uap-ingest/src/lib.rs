//! UAP Ingest Library
//!
//! Checkpointed incremental ingestion of the four activity collections
//! (users, carts, posts, todos) from an upstream HTTP API into an
//! append-only warehouse, with a final cross-entity summary.
//!
//! Per entity the pipeline is a strict sequence:
//!
//! ```text
//! Probe -> Fetch -> Branch{empty -> Done, records -> Persist} -> Stage -> Load
//! ```
//!
//! All four entity pipelines run concurrently behind one dataset
//! precondition and fan into a single aggregation step that only fires
//! when every entity finished cleanly.
//!
//! # Example
//!
//! ```no_run
//! use uap_ingest::{config::IngestConfig, orchestrator::PipelineOrchestrator};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = IngestConfig::from_env()?;
//!     let orchestrator = PipelineOrchestrator::from_config(&config).await?;
//!     let report = orchestrator.run().await?;
//!     anyhow::ensure!(report.is_success(), "ingestion cycle failed");
//!     Ok(())
//! }
//! ```

pub mod aggregate;
pub mod checkpoint;
pub mod config;
pub mod delta;
pub mod entity;
pub mod object_store;
pub mod orchestrator;
pub mod publish;
pub mod retry;
pub mod snapshot;
pub mod source;
pub mod warehouse;

// Re-export main types
pub use aggregate::{Aggregator, SummaryRow};
pub use checkpoint::{CheckpointStore, FileCheckpointStore};
pub use config::IngestConfig;
pub use entity::EntityKind;
pub use object_store::{ObjectStore, S3Store};
pub use orchestrator::{EntityOutcome, PipelineOrchestrator, RunReport};
pub use publish::Publisher;
pub use snapshot::SnapshotWriter;
pub use source::{Batch, HttpSource, Source};
pub use warehouse::{PgWarehouse, Warehouse};

/// Result type for ingestion operations
pub type Result<T> = std::result::Result<T, IngestError>;

/// Error taxonomy for the ingestion pipeline
///
/// The first six variants map onto the failure domains of the entity
/// state machine; the rest are conversions from collaborator crates.
#[derive(Debug, thiserror::Error)]
pub enum IngestError {
    /// Availability probe exhausted before the upstream answered healthy.
    /// The entity pipeline aborts with no side effects.
    #[error("source unavailable for {entity}: {attempts} probe attempts exhausted")]
    SourceUnavailable { entity: EntityKind, attempts: u32 },

    /// Fetch failed after a successful probe (non-success status or a
    /// malformed collection body).
    #[error("source fetch failed for {entity}: {reason}")]
    Source { entity: EntityKind, reason: String },

    /// Local snapshot I/O failure. The checkpoint stays at its last
    /// successfully advanced value, so a rerun is safe.
    #[error("snapshot write failed: {0}")]
    Write(String),

    /// Upload to the staging object store failed; the warehouse load is
    /// never attempted.
    #[error("stage failed: {0}")]
    Stage(String),

    /// Warehouse append failed after a successful stage. The staged
    /// object remains and is overwritten harmlessly on rerun.
    #[error("load failed: {0}")]
    Load(String),

    /// Final summary step failed. Loaded raw tables are not rolled back.
    #[error("aggregation failed: {0}")]
    Aggregation(String),

    #[error("checkpoint store error: {0}")]
    Checkpoint(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("internal error: {0}")]
    Internal(String),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}
