//! Stream source variant
//!
//! Subscribes to a push feed of newline-delimited JSON records over a
//! streaming HTTP response. The sequence is conceptually infinite and
//! ends when the feed closes or the job is cancelled. Connection drops
//! are retried with backoff up to the configured attempt bound; the
//! delivery checkpoint is the record sequence number, taken from the
//! feed's `seq` field when present.

use async_trait::async_trait;
use futures::{Stream, StreamExt, TryStreamExt};
use serde_json::Value;
use sluice_common::types::{Cursor, RawRecord, RetryConfig};
use sluice_common::{ExtractError, Result};
use std::pin::Pin;
use tokio_util::codec::{FramedRead, LinesCodec};
use tokio_util::io::StreamReader;
use tracing::{debug, warn};

use super::SourceAdapter;
use crate::net;

type LineStream = Pin<Box<dyn Stream<Item = std::io::Result<String>> + Send>>;

/// Push-feed source over streaming HTTP
pub struct StreamSource {
    client: reqwest::Client,
    url: String,
    retry: RetryConfig,

    /// Checkpoint already acknowledged in an earlier run; records up to
    /// and including it are skipped
    resume_seq: u64,
    /// Sequence of the last record seen, feed-assigned or counted
    seq: u64,
    reconnects: u32,
    lines: Option<LineStream>,
}

impl StreamSource {
    pub fn new(
        client: reqwest::Client,
        url: String,
        retry: RetryConfig,
        resume: Option<Cursor>,
    ) -> Self {
        let resume_seq = match resume {
            Some(Cursor::Sequence(seq)) => seq,
            _ => 0,
        };

        Self {
            client,
            url,
            retry,
            resume_seq,
            seq: 0,
            reconnects: 0,
            lines: None,
        }
    }

    /// Establish the feed connection with bounded transient retry
    async fn connect(&mut self) -> Result<()> {
        let mut attempt = 0u32;
        loop {
            attempt += 1;
            match Self::subscribe(&self.client, &self.url, self.resume_seq).await {
                Ok(lines) => {
                    self.lines = Some(lines);
                    return Ok(());
                },
                Err(e) if e.is_transient() && self.retry.should_retry(attempt) => {
                    let delay = self.retry.delay_after_attempt(attempt);
                    warn!(
                        url = %self.url,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "Stream connection failed, backing off"
                    );
                    tokio::time::sleep(delay).await;
                },
                Err(e) => return Err(e.into_fatal()),
            }
        }
    }

    /// Associated fn, not a method: the boxed line stream makes the
    /// source non-Sync, so `next`'s future must not capture `&self`
    /// across this await.
    async fn subscribe(client: &reqwest::Client, url: &str, resume_seq: u64) -> Result<LineStream> {
        let mut request = client.get(url);
        if resume_seq > 0 {
            request = request.query(&[("from_seq", resume_seq.to_string())]);
        }

        let response = request
            .send()
            .await
            .map_err(|e| net::classify_transport(e, "stream subscribe"))?;

        let status = response.status();
        if !status.is_success() {
            return Err(net::classify_status(status, "stream subscribe"));
        }

        let bytes = response.bytes_stream().map_err(std::io::Error::other);
        let lines = FramedRead::new(StreamReader::new(bytes), LinesCodec::new())
            .map_err(std::io::Error::other);
        Ok(Box::pin(lines))
    }

    fn parse_line(&mut self, line: &str) -> Result<Option<RawRecord>> {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            return Ok(None);
        }

        let value: Value = serde_json::from_str(trimmed).map_err(|e| {
            ExtractError::Permanent(format!("stream record is not valid JSON: {}", e))
        })?;
        let Value::Object(object) = value else {
            return Err(ExtractError::Permanent(
                "stream record is not an object".into(),
            ));
        };

        // Feed-assigned sequence wins; otherwise count delivered lines
        self.seq = object
            .get("seq")
            .and_then(Value::as_u64)
            .unwrap_or(self.seq + 1);

        if self.seq <= self.resume_seq {
            // Feed replayed records already acknowledged in an earlier run
            return Ok(None);
        }

        Ok(Some(RawRecord {
            sequence: self.seq,
            cursor: Cursor::Sequence(self.seq),
            fields: object.into_iter().collect(),
        }))
    }
}

#[async_trait]
impl SourceAdapter for StreamSource {
    async fn next(&mut self) -> Result<Option<RawRecord>> {
        loop {
            if self.lines.is_none() {
                self.connect().await?;
            }
            let Some(lines) = self.lines.as_mut() else {
                continue;
            };

            match lines.next().await {
                Some(Ok(line)) => {
                    self.reconnects = 0;
                    if let Some(record) = self.parse_line(&line)? {
                        return Ok(Some(record));
                    }
                },
                Some(Err(e)) => {
                    self.lines = None;
                    self.reconnects += 1;
                    if !self.retry.should_retry(self.reconnects) {
                        return Err(ExtractError::Fatal(format!(
                            "stream connection lost after {} reconnect attempts: {}",
                            self.reconnects, e
                        )));
                    }
                    let delay = self.retry.delay_after_attempt(self.reconnects);
                    warn!(
                        url = %self.url,
                        reconnects = self.reconnects,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "Stream interrupted, reconnecting"
                    );
                    tokio::time::sleep(delay).await;
                },
                None => {
                    // The feed closed cleanly: end of sequence
                    debug!(url = %self.url, last_seq = self.seq, "Stream closed by feed");
                    return Ok(None);
                },
            }
        }
    }
}
