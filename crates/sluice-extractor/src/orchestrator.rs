//! Pipeline orchestrator
//!
//! Runs every configured job, bounded by the concurrency limit. Jobs
//! are isolated: one job failing (or panicking) never stops the others,
//! and the aggregate outcome keeps the configured job order so run
//! summaries are stable.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::config::{token_from_env, ExtractorConfig};
use crate::destination::HttpDestinationClient;
use crate::reporter::{RunReporter, RunStatus};
use crate::runner::{run_job, JobOutcome, JobSummary};
use crate::state::JsonStateStore;
use sluice_common::Result;

/// Outcomes of all jobs in one pipeline run, in configured order
#[derive(Debug)]
pub struct AggregateOutcome {
    pub outcomes: Vec<JobOutcome>,
}

impl AggregateOutcome {
    pub fn success(&self) -> bool {
        self.outcomes.iter().all(|o| o.status.is_success())
    }

    /// Names of failed jobs, for the exit message
    pub fn failure_message(&self) -> Option<String> {
        let failed: Vec<&str> = self
            .outcomes
            .iter()
            .filter(|o| !o.status.is_success())
            .map(|o| o.job.as_str())
            .collect();
        if failed.is_empty() {
            None
        } else {
            Some(format!(
                "{} of {} jobs failed: {}",
                failed.len(),
                self.outcomes.len(),
                failed.join(", ")
            ))
        }
    }
}

/// Run the whole pipeline until every job finishes or is cancelled
pub async fn run_pipeline(
    config: ExtractorConfig,
    cancel: CancellationToken,
) -> Result<AggregateOutcome> {
    let http = reqwest::Client::new();
    let token = token_from_env();

    let destination = Arc::new(HttpDestinationClient::new(
        http.clone(),
        &config.pipeline.store_url,
        token.clone(),
    ));
    let state = Arc::new(JsonStateStore::open(&config.state.path).await?);
    let semaphore = Arc::new(Semaphore::new(config.pipeline.max_concurrent_jobs));
    let heartbeat_interval = Duration::from_secs(config.pipeline.heartbeat_interval_secs);

    info!(
        pipeline = %config.pipeline.id,
        jobs = config.jobs.len(),
        max_concurrent = config.pipeline.max_concurrent_jobs,
        "Starting pipeline run"
    );

    let mut handles = Vec::with_capacity(config.jobs.len());
    for job in config.jobs {
        let semaphore = semaphore.clone();
        let http = http.clone();
        let destination = destination.clone();
        let state = state.clone();
        let cancel = cancel.clone();
        let reporter = Arc::new(RunReporter::new(
            http.clone(),
            config.pipeline.monitor_url.clone(),
            token.clone(),
            config.pipeline.id.clone(),
            job.name.clone(),
        ));

        handles.push(tokio::spawn(async move {
            let name = job.name.clone();
            let _permit = match semaphore.acquire_owned().await {
                Ok(permit) => permit,
                Err(_) => {
                    return JobOutcome {
                        job: name,
                        status: RunStatus::Failed("scheduler shut down".to_string()),
                        summary: JobSummary::default(),
                    };
                },
            };
            run_job(
                job,
                http,
                destination,
                state,
                reporter,
                heartbeat_interval,
                cancel,
            )
            .await
        }));
    }

    let mut outcomes = Vec::with_capacity(handles.len());
    for handle in handles {
        match handle.await {
            Ok(outcome) => outcomes.push(outcome),
            Err(e) => outcomes.push(JobOutcome {
                job: "<unknown>".to_string(),
                status: RunStatus::Failed(format!("job task panicked: {}", e)),
                summary: JobSummary::default(),
            }),
        }
    }

    let aggregate = AggregateOutcome { outcomes };
    for outcome in &aggregate.outcomes {
        info!(
            job = %outcome.job,
            success = outcome.status.is_success(),
            records = outcome.summary.records_uploaded,
            "Job finished"
        );
    }

    Ok(aggregate)
}
