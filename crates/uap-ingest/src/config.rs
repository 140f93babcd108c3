//! Ingestion configuration
//!
//! Environment-driven configuration for one ingestion cycle. Every
//! knob has a default suitable for local runs against the public demo
//! API; only the warehouse URL and staging credentials usually need
//! to be set.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::retry::RetryPolicy;

/// Staging object store (S3-compatible) configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct S3Config {
    /// Bucket holding staged snapshots
    pub bucket: String,
    /// Region name (any non-empty value for S3-compatible endpoints)
    pub region: String,
    /// Custom endpoint, e.g. a MinIO URL; None for AWS
    pub endpoint: Option<String>,
    pub access_key: String,
    pub secret_key: String,
    /// Path-style addressing, required by most S3-compatible stores
    pub path_style: bool,
}

impl S3Config {
    pub fn from_env() -> anyhow::Result<Self> {
        Ok(Self {
            bucket: std::env::var("UAP_S3_BUCKET").unwrap_or_else(|_| "uap-staging".to_string()),
            region: std::env::var("UAP_S3_REGION").unwrap_or_else(|_| "us-east-1".to_string()),
            endpoint: std::env::var("UAP_S3_ENDPOINT").ok(),
            access_key: std::env::var("UAP_S3_ACCESS_KEY").unwrap_or_default(),
            secret_key: std::env::var("UAP_S3_SECRET_KEY").unwrap_or_default(),
            path_style: std::env::var("UAP_S3_PATH_STYLE")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(false),
        })
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.bucket.is_empty() {
            anyhow::bail!("UAP_S3_BUCKET cannot be empty");
        }
        if self.region.is_empty() {
            anyhow::bail!("UAP_S3_REGION cannot be empty");
        }
        Ok(())
    }
}

impl Default for S3Config {
    fn default() -> Self {
        Self {
            bucket: "uap-staging".to_string(),
            region: "us-east-1".to_string(),
            endpoint: None,
            access_key: String::new(),
            secret_key: String::new(),
            path_style: false,
        }
    }
}

/// Main ingestion configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestConfig {
    /// Base URL of the upstream activity API
    pub api_base_url: String,
    /// Directory for per-entity snapshot files
    pub output_dir: PathBuf,
    /// Path of the checkpoint document
    pub checkpoint_path: PathBuf,
    /// Warehouse dataset (schema) holding the raw and summary tables
    pub dataset: String,
    /// Warehouse connection string
    pub database_url: String,
    /// Seconds between availability probe attempts
    pub probe_interval_secs: u64,
    /// Probe attempts before an entity is declared unavailable
    pub probe_max_attempts: u32,
    /// HTTP request timeout in seconds
    pub http_timeout_secs: u64,
    /// Extra attempts for fetch/persist/stage/load after a failure
    pub max_retries: u32,
    /// Fixed delay between retry attempts in seconds
    pub retry_delay_secs: u64,
    /// Staging store configuration
    pub s3: S3Config,
}

impl IngestConfig {
    /// Snapshot output directory from the environment, with the
    /// standard default. Shared with the CLI so path derivation lives
    /// in one place.
    pub fn output_dir_from_env() -> PathBuf {
        PathBuf::from(std::env::var("UAP_OUTPUT_DIR").unwrap_or_else(|_| "./output".to_string()))
    }

    /// Checkpoint document path from the environment; defaults to
    /// `<output-dir>/checkpoints.json`.
    pub fn checkpoint_path_from_env() -> PathBuf {
        std::env::var("UAP_CHECKPOINT_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|_| Self::output_dir_from_env().join("checkpoints.json"))
    }

    /// Load configuration from environment variables.
    pub fn from_env() -> anyhow::Result<Self> {
        let output_dir = Self::output_dir_from_env();
        let checkpoint_path = Self::checkpoint_path_from_env();

        let config = Self {
            api_base_url: std::env::var("UAP_API_BASE_URL")
                .unwrap_or_else(|_| "https://dummyjson.com".to_string()),
            output_dir,
            checkpoint_path,
            dataset: std::env::var("UAP_DATASET").unwrap_or_else(|_| "activity".to_string()),
            database_url: std::env::var("DATABASE_URL").unwrap_or_default(),
            probe_interval_secs: env_parse("UAP_PROBE_INTERVAL_SECS", 60),
            probe_max_attempts: env_parse("UAP_PROBE_MAX_ATTEMPTS", 5),
            http_timeout_secs: env_parse("UAP_HTTP_TIMEOUT_SECS", 10),
            max_retries: env_parse("UAP_MAX_RETRIES", 1),
            retry_delay_secs: env_parse("UAP_RETRY_DELAY_SECS", 300),
            s3: S3Config::from_env()?,
        };

        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.api_base_url.is_empty() {
            anyhow::bail!("UAP_API_BASE_URL cannot be empty");
        }
        if self.dataset.is_empty() {
            anyhow::bail!("UAP_DATASET cannot be empty");
        }
        if self.database_url.is_empty() {
            anyhow::bail!("DATABASE_URL must be set");
        }
        if self.probe_max_attempts == 0 {
            anyhow::bail!("UAP_PROBE_MAX_ATTEMPTS must be greater than 0");
        }
        if self.http_timeout_secs == 0 {
            anyhow::bail!("UAP_HTTP_TIMEOUT_SECS must be greater than 0");
        }
        self.s3.validate()?;
        Ok(())
    }

    pub fn probe_interval(&self) -> Duration {
        Duration::from_secs(self.probe_interval_secs)
    }

    pub fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.http_timeout_secs)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_retries: self.max_retries,
            delay: Duration::from_secs(self.retry_delay_secs),
        }
    }
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            api_base_url: "https://dummyjson.com".to_string(),
            output_dir: PathBuf::from("./output"),
            checkpoint_path: PathBuf::from("./output/checkpoints.json"),
            dataset: "activity".to_string(),
            database_url: String::new(),
            probe_interval_secs: 60,
            probe_max_attempts: 5,
            http_timeout_secs: 10,
            max_retries: 1,
            retry_delay_secs: 300,
            s3: S3Config::default(),
        }
    }
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(default)
}
