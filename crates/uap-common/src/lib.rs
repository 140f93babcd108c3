//! UAP Common Library
//!
//! Shared infrastructure for the UAP (user activity pipeline) workspace.
//! Currently this is the logging layer used by every binary; structured
//! logging goes through `tracing` and is configured from the environment.
//!
//! # Example
//!
//! ```no_run
//! use uap_common::logging::{init_logging, LogConfig};
//!
//! fn main() -> anyhow::Result<()> {
//!     let config = LogConfig::from_env()?;
//!     init_logging(&config)?;
//!     tracing::info!("pipeline starting");
//!     Ok(())
//! }
//! ```

pub mod logging;

pub use logging::{init_logging, LogConfig, LogFormat, LogLevel, LogOutput};
