//! Batched uploader
//!
//! Groups canonical records into bounded batches and delivers them to
//! the destination client in source order. Transient failures retry the
//! same batch with exponential backoff; permanent failures fail the
//! batch immediately and processing continues with the next one. The
//! job's cursor advances once per acknowledged batch, never past an
//! unacknowledged one, which is what makes delivery at-least-once
//! across restarts.

use sluice_common::types::{Batch, CanonicalRecord, Cursor, DataPoint, RetryConfig, RowRecord};
use sluice_common::Result;
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::{DestinationSpec, JobConfig};
use crate::destination::DestinationClient;
use crate::state::StateStore;

/// One mapped record travelling from the source task to the uploader,
/// tagged with the source position it came from
#[derive(Debug, Clone)]
pub struct Delivery {
    pub record: CanonicalRecord,
    pub cursor: Cursor,
}

/// Counters reported when the uploader drains its input
#[derive(Debug, Default, Clone)]
pub struct UploadSummary {
    pub records_uploaded: u64,
    pub batches_delivered: u64,
    pub batches_failed: u64,
    /// Cause of the first unrecovered batch failure
    pub first_error: Option<String>,
}

/// Delivers one job's records in bounded batches
pub struct BatchedUploader {
    job_name: String,
    destination: DestinationSpec,
    batch_size: usize,
    retry: RetryConfig,
    abort_on_failed_batch: bool,
    client: Arc<dyn DestinationClient>,
    state: Arc<dyn StateStore>,
}

impl BatchedUploader {
    pub fn new(
        job: &JobConfig,
        client: Arc<dyn DestinationClient>,
        state: Arc<dyn StateStore>,
    ) -> Self {
        Self {
            job_name: job.name.clone(),
            destination: job.destination.clone(),
            batch_size: job.batch_size,
            retry: job.retry,
            abort_on_failed_batch: job.abort_on_failed_batch,
            client,
            state,
        }
    }

    /// Drain the channel until it closes or the job is cancelled.
    ///
    /// Errors returned here are fatal (cursor persistence failures);
    /// batch delivery failures are counted in the summary instead.
    pub async fn run(
        &self,
        mut rx: mpsc::Receiver<Delivery>,
        cancel: CancellationToken,
    ) -> Result<UploadSummary> {
        let mut summary = UploadSummary::default();
        let mut buffer: Vec<Delivery> = Vec::with_capacity(self.batch_size);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    // Partial batches are dropped: the cursor must only
                    // ever reflect fully acknowledged batches
                    debug!(job = %self.job_name, dropped = buffer.len(), "Upload cancelled");
                    break;
                },
                item = rx.recv() => match item {
                    Some(delivery) => {
                        buffer.push(delivery);
                        if buffer.len() >= self.batch_size
                            && !self.flush(&mut buffer, &mut summary).await?
                        {
                            break;
                        }
                    },
                    None => {
                        if !buffer.is_empty() {
                            self.flush(&mut buffer, &mut summary).await?;
                        }
                        break;
                    },
                },
            }
        }

        Ok(summary)
    }

    /// Deliver the buffered batch. Returns false when the job should
    /// stop because a batch failed and the job aborts on failure.
    async fn flush(&self, buffer: &mut Vec<Delivery>, summary: &mut UploadSummary) -> Result<bool> {
        let deliveries = std::mem::take(buffer);
        let cursor = deliveries
            .last()
            .map(|d| d.cursor)
            .unwrap_or(Cursor::Offset(0));
        let batch = Batch {
            records: deliveries.into_iter().map(|d| d.record).collect(),
            cursor,
        };

        match self.deliver_with_retry(&batch).await {
            Ok(()) => {
                self.state.save(&self.job_name, batch.cursor).await?;
                summary.records_uploaded += batch.len() as u64;
                summary.batches_delivered += 1;
                info!(
                    job = %self.job_name,
                    records = batch.len(),
                    cursor = %batch.cursor,
                    "Batch delivered"
                );
                Ok(true)
            },
            Err(e) => {
                summary.batches_failed += 1;
                if summary.first_error.is_none() {
                    summary.first_error = Some(e.to_string());
                }
                error!(
                    job = %self.job_name,
                    records = batch.len(),
                    first = batch.records.first().map(|r| r.identity()).unwrap_or("-"),
                    error = %e,
                    "Batch failed, cursor not advanced"
                );
                Ok(!self.abort_on_failed_batch)
            },
        }
    }

    async fn deliver_with_retry(&self, batch: &Batch) -> Result<()> {
        let mut attempt = 0u32;
        loop {
            attempt += 1;
            match self.write(batch).await {
                Ok(()) => return Ok(()),
                Err(e) if e.is_transient() && self.retry.should_retry(attempt) => {
                    let delay = self.retry.delay_after_attempt(attempt);
                    warn!(
                        job = %self.job_name,
                        attempt,
                        max_attempts = self.retry.max_attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "Batch delivery failed, backing off"
                    );
                    tokio::time::sleep(delay).await;
                },
                Err(e) => return Err(e),
            }
        }
    }

    /// One delivery attempt of the whole batch
    async fn write(&self, batch: &Batch) -> Result<()> {
        match &self.destination {
            DestinationSpec::RawTable {
                database, table, ..
            } => {
                let rows: Vec<RowRecord> = batch
                    .records
                    .iter()
                    .filter_map(|record| match record {
                        CanonicalRecord::Row(row) => Some(row.clone()),
                        CanonicalRecord::DataPoint(_) => None,
                    })
                    .collect();
                self.client.upsert_rows(database, table, &rows).await
            },
            DestinationSpec::TimeSeries { .. } => {
                let points: Vec<&DataPoint> = batch
                    .records
                    .iter()
                    .filter_map(|record| match record {
                        CanonicalRecord::DataPoint(point) => Some(point),
                        CanonicalRecord::Row(_) => None,
                    })
                    .collect();

                // Create unknown series before inserting into them.
                // Idempotent, so a batch retry repeats this safely.
                let mut created = HashSet::new();
                for point in &points {
                    if point.needs_creation && created.insert(point.external_id.as_str()) {
                        self.client.ensure_series(&point.external_id).await?;
                    }
                }

                // Deliver grouped per series, preserving source order
                let mut order: Vec<&str> = Vec::new();
                for point in &points {
                    if !order.contains(&point.external_id.as_str()) {
                        order.push(&point.external_id);
                    }
                }
                for series_id in order {
                    let group: Vec<DataPoint> = points
                        .iter()
                        .filter(|p| p.external_id == series_id)
                        .map(|p| (*p).clone())
                        .collect();
                    self.client.insert_datapoints(series_id, &group).await?;
                }
                Ok(())
            },
        }
    }
}
