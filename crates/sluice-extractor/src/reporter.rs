//! Run reporter
//!
//! Posts run lifecycle events for each job to the monitoring endpoint:
//! one start, periodic heartbeats while extraction is in progress, and
//! exactly one terminal status. Reporting is best-effort: a monitoring
//! outage must never fail an otherwise healthy extraction, so transport
//! errors are logged and swallowed.

use serde::Serialize;
use serde_json::json;
use tokio::sync::Mutex;
use tracing::{debug, warn};
use uuid::Uuid;

/// Terminal outcome of one job run
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunStatus {
    Succeeded,
    Failed(String),
}

impl RunStatus {
    pub fn is_success(&self) -> bool {
        matches!(self, RunStatus::Succeeded)
    }
}

#[derive(Debug, Clone, Copy, Serialize)]
#[serde(rename_all = "snake_case")]
enum EventKind {
    Started,
    /// Heartbeat while the run is in progress
    Seen,
    Success,
    Failure,
}

/// Best-effort run reporting for one job
pub struct RunReporter {
    client: reqwest::Client,
    /// Unset disables reporting entirely
    monitor_url: Option<String>,
    token: Option<String>,
    pipeline_id: String,
    job_name: String,
    run_id: Uuid,
    /// Guards heartbeat and terminal posts against each other; held
    /// across the POST so a heartbeat can never trail the terminal
    /// report onto the wire
    finished: Mutex<bool>,
}

impl RunReporter {
    pub fn new(
        client: reqwest::Client,
        monitor_url: Option<String>,
        token: Option<String>,
        pipeline_id: impl Into<String>,
        job_name: impl Into<String>,
    ) -> Self {
        Self {
            client,
            monitor_url,
            token,
            pipeline_id: pipeline_id.into(),
            job_name: job_name.into(),
            run_id: Uuid::new_v4(),
            finished: Mutex::new(false),
        }
    }

    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    pub async fn started(&self) {
        self.post(EventKind::Started, None).await;
    }

    pub async fn heartbeat(&self) {
        let finished = self.finished.lock().await;
        if !*finished {
            self.post(EventKind::Seen, None).await;
        }
    }

    /// Report the terminal status. Later calls are ignored, so a job
    /// can never report two outcomes for the same run.
    pub async fn complete(&self, status: &RunStatus) {
        let mut finished = self.finished.lock().await;
        if *finished {
            debug!(job = %self.job_name, "Terminal status already reported");
            return;
        }
        *finished = true;

        match status {
            RunStatus::Succeeded => self.post(EventKind::Success, None).await,
            RunStatus::Failed(message) => {
                self.post(EventKind::Failure, Some(message.as_str())).await
            },
        }
    }

    async fn post(&self, kind: EventKind, message: Option<&str>) {
        let Some(url) = &self.monitor_url else {
            return;
        };

        let body = json!({
            "pipeline_id": self.pipeline_id,
            "job": self.job_name,
            "run_id": self.run_id,
            "status": kind,
            "message": message,
            "timestamp_ms": chrono::Utc::now().timestamp_millis(),
        });

        let mut request = self.client.post(url).json(&body);
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }

        match request.send().await {
            Ok(response) if response.status().is_success() => {
                debug!(job = %self.job_name, status = ?kind, "Reported run event");
            },
            Ok(response) => {
                warn!(
                    job = %self.job_name,
                    status = ?kind,
                    http_status = %response.status(),
                    "Run report rejected"
                );
            },
            Err(e) => {
                warn!(job = %self.job_name, status = ?kind, error = %e, "Run report failed");
            },
        }
    }
}
