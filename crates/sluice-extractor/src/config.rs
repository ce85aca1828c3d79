//! Extractor configuration
//!
//! Jobs are described in a YAML file, validated up front, and immutable
//! for the lifetime of a run. Secrets (bearer tokens) come from the
//! environment, never from the config file.

use serde::{Deserialize, Serialize};
use sluice_common::types::RetryConfig;
use sluice_common::{ExtractError, Result};
use std::collections::HashSet;
use std::path::{Path, PathBuf};

// ============================================================================
// Configuration Constants
// ============================================================================

/// Default number of records per delivery batch.
pub const DEFAULT_BATCH_SIZE: usize = 1000;

/// Default number of jobs running concurrently.
pub const DEFAULT_MAX_CONCURRENT_JOBS: usize = 4;

/// Default heartbeat interval in seconds while a job is running.
pub const DEFAULT_HEARTBEAT_INTERVAL_SECS: u64 = 30;

/// Default path of the JSON cursor store.
pub const DEFAULT_STATE_PATH: &str = "./sluice-state.json";

/// Environment variable holding the destination bearer token.
pub const TOKEN_ENV_VAR: &str = "SLUICE_API_TOKEN";

/// Top-level extractor configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractorConfig {
    pub pipeline: PipelineConfig,
    #[serde(default)]
    pub state: StateConfig,
    pub jobs: Vec<JobConfig>,
}

/// Process-wide settings shared by all jobs
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Identifier reported to the monitoring endpoint
    pub id: String,

    /// Base URL of the remote store's write API
    pub store_url: String,

    /// Run-status monitoring endpoint; reporting is skipped when unset
    #[serde(default)]
    pub monitor_url: Option<String>,

    #[serde(default = "default_heartbeat_interval_secs")]
    pub heartbeat_interval_secs: u64,

    #[serde(default = "default_max_concurrent_jobs")]
    pub max_concurrent_jobs: usize,
}

/// Cursor persistence settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateConfig {
    pub path: PathBuf,
}

impl Default for StateConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from(DEFAULT_STATE_PATH),
        }
    }
}

/// One configured source-to-destination extraction task
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobConfig {
    pub name: String,

    pub source: SourceSpec,

    pub destination: DestinationSpec,

    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    #[serde(default)]
    pub retry: RetryConfig,

    /// Resume from the saved cursor instead of re-extracting everything
    #[serde(default = "default_true")]
    pub incremental: bool,

    /// Stop the job on the first unrecovered batch failure instead of
    /// continuing with subsequent batches
    #[serde(default)]
    pub abort_on_failed_batch: bool,
}

/// Where a job's records come from
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SourceSpec {
    /// A static delimited file, parsed in full
    File { path: PathBuf },

    /// A REST endpoint polled on a fixed interval
    Poll {
        url: String,
        interval_secs: u64,
        /// Entities to query per poll; one request each
        #[serde(default)]
        entities: Vec<String>,
        /// Field carrying the record timestamp used as the watermark
        #[serde(default = "default_since_field")]
        since_field: String,
        /// Stop after this many poll cycles (one-shot frontfills);
        /// unset polls until cancelled
        #[serde(default)]
        max_polls: Option<u64>,
    },

    /// A push feed of newline-delimited JSON over a streaming response
    Stream { url: String },
}

impl SourceSpec {
    /// Short name used in logs
    pub fn kind(&self) -> &'static str {
        match self {
            SourceSpec::File { .. } => "file",
            SourceSpec::Poll { .. } => "poll",
            SourceSpec::Stream { .. } => "stream",
        }
    }
}

/// Where a job's records go
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DestinationSpec {
    /// Keyed row upserts into a raw table
    RawTable {
        database: String,
        table: String,
        /// Column whose value becomes the row key
        key_column: String,
    },

    /// Datapoint inserts into named time series
    TimeSeries {
        /// Prefix for all external ids produced by this job
        #[serde(default)]
        external_id_prefix: String,
        /// Field identifying the emitting entity
        id_field: String,
        /// Field carrying the timestamp; record arrival time when unset
        #[serde(default)]
        timestamp_field: Option<String>,
        /// Fields to extract datapoints from; each present field yields
        /// one datapoint on the series `{prefix}{id}_{field}`
        value_fields: Vec<String>,
    },
}

impl ExtractorConfig {
    /// Load and validate a configuration file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)?;
        let config: ExtractorConfig = serde_yaml::from_str(&content)
            .map_err(|e| ExtractError::Config(format!("{}: {}", path.display(), e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Validate invariants the type system cannot express
    pub fn validate(&self) -> Result<()> {
        if self.pipeline.id.is_empty() {
            return Err(ExtractError::Config("pipeline.id must not be empty".into()));
        }
        if self.pipeline.max_concurrent_jobs == 0 {
            return Err(ExtractError::Config(
                "pipeline.max_concurrent_jobs must be at least 1".into(),
            ));
        }
        if self.jobs.is_empty() {
            return Err(ExtractError::Config("no jobs configured".into()));
        }

        let mut names = HashSet::new();
        for job in &self.jobs {
            if job.name.is_empty() {
                return Err(ExtractError::Config("job name must not be empty".into()));
            }
            if !names.insert(job.name.as_str()) {
                return Err(ExtractError::Config(format!(
                    "duplicate job name '{}'",
                    job.name
                )));
            }
            job.validate()?;
        }

        Ok(())
    }
}

impl JobConfig {
    fn validate(&self) -> Result<()> {
        if self.batch_size == 0 {
            return Err(ExtractError::Config(format!(
                "job '{}': batch_size must be at least 1",
                self.name
            )));
        }
        if self.retry.max_attempts == 0 {
            return Err(ExtractError::Config(format!(
                "job '{}': retry.max_attempts must be at least 1",
                self.name
            )));
        }

        match &self.source {
            SourceSpec::Poll { interval_secs, .. } if *interval_secs == 0 => {
                return Err(ExtractError::Config(format!(
                    "job '{}': poll interval_secs must be at least 1",
                    self.name
                )));
            },
            _ => {},
        }

        match &self.destination {
            DestinationSpec::RawTable {
                database,
                table,
                key_column,
            } => {
                if database.is_empty() || table.is_empty() {
                    return Err(ExtractError::Config(format!(
                        "job '{}': raw table destination needs database and table",
                        self.name
                    )));
                }
                if key_column.is_empty() {
                    return Err(ExtractError::Config(format!(
                        "job '{}': key_column must not be empty",
                        self.name
                    )));
                }
            },
            DestinationSpec::TimeSeries {
                id_field,
                value_fields,
                ..
            } => {
                if id_field.is_empty() {
                    return Err(ExtractError::Config(format!(
                        "job '{}': id_field must not be empty",
                        self.name
                    )));
                }
                if value_fields.is_empty() {
                    return Err(ExtractError::Config(format!(
                        "job '{}': time series destination needs at least one value field",
                        self.name
                    )));
                }
            },
        }

        Ok(())
    }
}

/// Bearer token for the destination and monitoring endpoints, if set
pub fn token_from_env() -> Option<String> {
    std::env::var(TOKEN_ENV_VAR).ok().filter(|t| !t.is_empty())
}

fn default_batch_size() -> usize {
    DEFAULT_BATCH_SIZE
}

fn default_max_concurrent_jobs() -> usize {
    DEFAULT_MAX_CONCURRENT_JOBS
}

fn default_heartbeat_interval_secs() -> u64 {
    DEFAULT_HEARTBEAT_INTERVAL_SECS
}

fn default_since_field() -> String {
    "timestamp".to_string()
}

fn default_true() -> bool {
    true
}
