//! Job runner
//!
//! Executes one configured job: opens the source at the resume cursor,
//! pipes mapped records through a bounded channel into the batched
//! uploader, and reports the run lifecycle. Extraction and upload run
//! concurrently so a slow destination backpressures the source through
//! the channel instead of buffering unboundedly.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::config::JobConfig;
use crate::destination::DestinationClient;
use crate::mapper::RecordMapper;
use crate::reporter::{RunReporter, RunStatus};
use crate::source::{self, SourceAdapter};
use crate::state::{NoopStateStore, StateStore};
use crate::uploader::{BatchedUploader, Delivery, UploadSummary};

/// Result of one job run
#[derive(Debug, Clone)]
pub struct JobOutcome {
    pub job: String,
    pub status: RunStatus,
    pub summary: JobSummary,
}

/// Counters accumulated over one job run
#[derive(Debug, Default, Clone)]
pub struct JobSummary {
    pub records_extracted: u64,
    pub records_uploaded: u64,
    pub batches_delivered: u64,
    pub batches_failed: u64,
    pub mapping_errors: u64,
}

#[derive(Debug, Default)]
struct SourceStats {
    records_extracted: u64,
    mapping_errors: u64,
    first_mapping_error: Option<String>,
    fatal: Option<String>,
}

/// Run one job to completion, cancellation, or fatal error.
///
/// Never returns an error: every failure mode ends up in the outcome's
/// status so the orchestrator can keep other jobs running.
pub async fn run_job(
    job: JobConfig,
    http: reqwest::Client,
    destination: Arc<dyn DestinationClient>,
    state: Arc<dyn StateStore>,
    reporter: Arc<RunReporter>,
    heartbeat_interval: Duration,
    cancel: CancellationToken,
) -> JobOutcome {
    // Non-incremental jobs re-extract everything and persist nothing
    let state: Arc<dyn StateStore> = if job.incremental {
        state
    } else {
        Arc::new(NoopStateStore)
    };

    info!(
        job = %job.name,
        source = job.source.kind(),
        batch_size = job.batch_size,
        incremental = job.incremental,
        "Starting job"
    );
    reporter.started().await;

    let heartbeat = {
        let reporter = reporter.clone();
        let cancel = cancel.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = tokio::time::sleep(heartbeat_interval) => reporter.heartbeat().await,
                }
            }
        })
    };

    let (status, summary) = execute(&job, http, destination, state, cancel).await;

    heartbeat.abort();
    reporter.complete(&status).await;

    match &status {
        RunStatus::Succeeded => info!(
            job = %job.name,
            records = summary.records_uploaded,
            batches = summary.batches_delivered,
            "Job succeeded"
        ),
        RunStatus::Failed(message) => error!(job = %job.name, message, "Job failed"),
    }

    JobOutcome {
        job: job.name,
        status,
        summary,
    }
}

async fn execute(
    job: &JobConfig,
    http: reqwest::Client,
    destination: Arc<dyn DestinationClient>,
    state: Arc<dyn StateStore>,
    cancel: CancellationToken,
) -> (RunStatus, JobSummary) {
    let resume = match state.load(&job.name).await {
        Ok(cursor) => cursor,
        Err(e) => {
            return (
                RunStatus::Failed(format!("cursor load failed: {}", e)),
                JobSummary::default(),
            );
        },
    };
    if let Some(cursor) = resume {
        info!(job = %job.name, %cursor, "Resuming from saved cursor");
    }

    let source = match source::open(job, &http, resume) {
        Ok(source) => source,
        Err(e) => {
            return (
                RunStatus::Failed(format!("source open failed: {}", e)),
                JobSummary::default(),
            );
        },
    };

    // Sized to keep the source roughly one batch ahead of the uploader
    let (tx, rx) = mpsc::channel(job.batch_size.saturating_mul(2));
    let mapper = RecordMapper::new(job.destination.clone());
    let source_task = tokio::spawn(drain_source(
        source,
        mapper,
        tx,
        cancel.clone(),
        job.name.clone(),
    ));

    let uploader = BatchedUploader::new(job, destination, state);
    let upload = uploader.run(rx, cancel.clone()).await;

    let stats = match source_task.await {
        Ok(stats) => stats,
        Err(e) => SourceStats {
            fatal: Some(format!("source task panicked: {}", e)),
            ..SourceStats::default()
        },
    };

    let (upload, upload_fatal) = match upload {
        Ok(summary) => (summary, None),
        Err(e) => (
            UploadSummary::default(),
            Some(format!("cursor save failed: {}", e)),
        ),
    };

    let summary = JobSummary {
        records_extracted: stats.records_extracted,
        records_uploaded: upload.records_uploaded,
        batches_delivered: upload.batches_delivered,
        batches_failed: upload.batches_failed,
        mapping_errors: stats.mapping_errors,
    };

    let status = if let Some(fatal) = stats.fatal {
        RunStatus::Failed(fatal)
    } else if let Some(fatal) = upload_fatal {
        RunStatus::Failed(fatal)
    } else if stats.mapping_errors > 0 {
        RunStatus::Failed(format!(
            "{} records failed mapping; first: {}",
            stats.mapping_errors,
            stats
                .first_mapping_error
                .unwrap_or_else(|| "unknown".to_string()),
        ))
    } else if upload.batches_failed > 0 {
        RunStatus::Failed(
            upload
                .first_error
                .unwrap_or_else(|| "batch delivery failed".to_string()),
        )
    } else if cancel.is_cancelled() {
        RunStatus::Failed("job cancelled before completion".to_string())
    } else {
        RunStatus::Succeeded
    };

    (status, summary)
}

/// Pull records out of the source, map them, and feed the uploader.
/// Mapping errors are counted and skipped; source errors end the run.
async fn drain_source(
    mut source: Box<dyn SourceAdapter>,
    mut mapper: RecordMapper,
    tx: mpsc::Sender<Delivery>,
    cancel: CancellationToken,
    job_name: String,
) -> SourceStats {
    let mut stats = SourceStats::default();

    loop {
        let next = tokio::select! {
            _ = cancel.cancelled() => break,
            next = source.next() => next,
        };

        match next {
            Ok(Some(raw)) => {
                stats.records_extracted += 1;
                match mapper.map(&raw) {
                    Ok(records) => {
                        for record in records {
                            let delivery = Delivery {
                                record,
                                cursor: raw.cursor,
                            };
                            // Receiver gone means the uploader stopped;
                            // nothing left to extract for
                            if tx.send(delivery).await.is_err() {
                                return stats;
                            }
                        }
                    },
                    Err(e) => {
                        stats.mapping_errors += 1;
                        if stats.first_mapping_error.is_none() {
                            stats.first_mapping_error = Some(e.to_string());
                        }
                        warn!(job = %job_name, error = %e, "Record skipped");
                    },
                }
            },
            Ok(None) => break,
            Err(e) => {
                error!(job = %job_name, error = %e, "Source failed");
                stats.fatal = Some(e.to_string());
                break;
            },
        }
    }

    stats
}
