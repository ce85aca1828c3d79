//! Sluice - configurable extraction pipelines
//!
//! Moves records from external sources (files, polled REST endpoints,
//! streaming feeds) into a remote store, in batches, with retry,
//! incremental resume, and run-status reporting.
//!
//! # Example
//!
//! ```no_run
//! use sluice_extractor::config::ExtractorConfig;
//! use sluice_extractor::orchestrator;
//! use tokio_util::sync::CancellationToken;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = ExtractorConfig::load("./sluice.yaml")?;
//!     let outcome = orchestrator::run_pipeline(config, CancellationToken::new()).await?;
//!     println!("success: {}", outcome.success());
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod destination;
pub mod mapper;
mod net;
pub mod orchestrator;
pub mod reporter;
pub mod runner;
pub mod source;
pub mod state;
pub mod uploader;
