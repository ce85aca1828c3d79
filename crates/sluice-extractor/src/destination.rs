//! Destination client
//!
//! The remote store's write API, treated as a black box that can fail
//! transiently or permanently. The trait is the seam the uploader and
//! the tests work against; the HTTP implementation talks to the store
//! with bearer authentication.

use async_trait::async_trait;
use serde_json::json;
use sluice_common::types::{DataPoint, RowRecord};
use sluice_common::Result;
use tracing::debug;

use crate::net;

/// Write operations the remote store exposes
#[async_trait]
pub trait DestinationClient: Send + Sync {
    /// Upsert rows into a raw table; acknowledged only on success
    async fn upsert_rows(&self, database: &str, table: &str, rows: &[RowRecord]) -> Result<()>;

    /// Insert datapoints into one series
    async fn insert_datapoints(&self, series_id: &str, points: &[DataPoint]) -> Result<()>;

    /// Create the series if it does not exist; returns its id.
    /// Idempotent: an already-existing series is not an error.
    async fn ensure_series(&self, external_id: &str) -> Result<String>;
}

/// HTTP implementation of the store's write API
pub struct HttpDestinationClient {
    client: reqwest::Client,
    base_url: String,
    token: Option<String>,
}

impl HttpDestinationClient {
    pub fn new(client: reqwest::Client, base_url: impl Into<String>, token: Option<String>) -> Self {
        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            token,
        }
    }

    /// POST with transport errors classified; status left to the caller
    async fn send(
        &self,
        path: &str,
        body: serde_json::Value,
        context: &str,
    ) -> Result<reqwest::Response> {
        let mut request = self
            .client
            .post(format!("{}{}", self.base_url, path))
            .json(&body);
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }

        request
            .send()
            .await
            .map_err(|e| net::classify_transport(e, context))
    }

    async fn post(&self, path: &str, body: serde_json::Value, context: &str) -> Result<reqwest::Response> {
        let response = self.send(path, body, context).await?;
        let status = response.status();
        if !status.is_success() {
            return Err(net::classify_status(status, context));
        }
        Ok(response)
    }
}

#[async_trait]
impl DestinationClient for HttpDestinationClient {
    async fn upsert_rows(&self, database: &str, table: &str, rows: &[RowRecord]) -> Result<()> {
        let path = format!("/raw/{}/{}/rows", database, table);
        self.post(&path, json!({ "rows": rows }), "row upsert").await?;
        debug!(database, table, rows = rows.len(), "Upserted rows");
        Ok(())
    }

    async fn insert_datapoints(&self, series_id: &str, points: &[DataPoint]) -> Result<()> {
        let path = format!("/timeseries/{}/datapoints", series_id);
        self.post(&path, json!({ "datapoints": points }), "datapoint insert")
            .await?;
        debug!(series_id, points = points.len(), "Inserted datapoints");
        Ok(())
    }

    async fn ensure_series(&self, external_id: &str) -> Result<String> {
        let response = self
            .send(
                "/timeseries",
                json!({ "external_id": external_id }),
                "series creation",
            )
            .await?;

        let status = response.status();
        // Another run created it first; that is the desired state
        if status.is_success() || status == reqwest::StatusCode::CONFLICT {
            Ok(external_id.to_string())
        } else {
            Err(net::classify_status(status, "series creation"))
        }
    }
}
