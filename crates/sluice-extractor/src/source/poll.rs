//! Poll source variant
//!
//! Issues a request per configured entity on a fixed interval and
//! yields the rows each call returns. The watermark is the latest
//! observed record timestamp; the next poll asks only for newer data
//! via the `since` query parameter.

use async_trait::async_trait;
use serde_json::Value;
use sluice_common::types::{Cursor, RawRecord, RetryConfig};
use sluice_common::{ExtractError, Result};
use std::collections::VecDeque;
use tracing::{debug, warn};

use super::SourceAdapter;
use crate::mapper::extract_timestamp_ms;
use crate::net;

/// REST polling source
pub struct PollSource {
    client: reqwest::Client,
    url: String,
    interval: std::time::Duration,
    entities: Vec<String>,
    since_field: String,
    max_polls: Option<u64>,
    retry: RetryConfig,

    /// Latest observed record timestamp (ms); next polls request newer data
    watermark: Option<i64>,
    pending: VecDeque<RawRecord>,
    polls_done: u64,
    sequence: u64,
}

impl PollSource {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        client: reqwest::Client,
        url: String,
        interval_secs: u64,
        entities: Vec<String>,
        since_field: String,
        max_polls: Option<u64>,
        retry: RetryConfig,
        resume: Option<Cursor>,
    ) -> Self {
        let watermark = match resume {
            Some(Cursor::Timestamp(ts)) => Some(ts),
            _ => None,
        };

        Self {
            client,
            url,
            interval: std::time::Duration::from_secs(interval_secs),
            entities,
            since_field,
            max_polls,
            retry,
            watermark,
            pending: VecDeque::new(),
            polls_done: 0,
            sequence: 0,
        }
    }

    /// One GET with bounded transient retry
    async fn fetch(&self, entity: Option<&str>) -> Result<Vec<Value>> {
        let mut attempt = 0u32;
        loop {
            attempt += 1;
            match self.request(entity).await {
                Ok(rows) => return Ok(rows),
                Err(e) if e.is_transient() && self.retry.should_retry(attempt) => {
                    let delay = self.retry.delay_after_attempt(attempt);
                    warn!(
                        url = %self.url,
                        entity = entity.unwrap_or("-"),
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "Poll request failed, backing off"
                    );
                    tokio::time::sleep(delay).await;
                },
                Err(e) => return Err(e.into_fatal()),
            }
        }
    }

    async fn request(&self, entity: Option<&str>) -> Result<Vec<Value>> {
        let mut request = self.client.get(&self.url);
        if let Some(entity) = entity {
            request = request.query(&[("entity", entity)]);
        }
        if let Some(since) = self.watermark {
            request = request.query(&[("since", since.to_string())]);
        }

        let response = request
            .send()
            .await
            .map_err(|e| net::classify_transport(e, "poll request"))?;

        let status = response.status();
        if !status.is_success() {
            return Err(net::classify_status(status, "poll request"));
        }

        let body: Value = response
            .json()
            .await
            .map_err(|e| net::classify_transport(e, "poll response body"))?;

        match body {
            Value::Array(rows) => Ok(rows),
            other => Err(ExtractError::Permanent(format!(
                "poll response is not an array: {}",
                other
            ))),
        }
    }

    async fn poll_once(&mut self) -> Result<()> {
        let entities: Vec<Option<String>> = if self.entities.is_empty() {
            vec![None]
        } else {
            self.entities.iter().cloned().map(Some).collect()
        };

        for entity in entities {
            let rows = self.fetch(entity.as_deref()).await?;
            debug!(
                url = %self.url,
                entity = entity.as_deref().unwrap_or("-"),
                rows = rows.len(),
                "Poll returned rows"
            );

            for row in rows {
                let Value::Object(object) = row else {
                    return Err(ExtractError::Fatal(
                        "poll response row is not an object".into(),
                    ));
                };

                let timestamp = object
                    .get(&self.since_field)
                    .and_then(extract_timestamp_ms)
                    .unwrap_or_else(|| chrono::Utc::now().timestamp_millis());
                self.watermark = Some(self.watermark.map_or(timestamp, |w| w.max(timestamp)));

                self.sequence += 1;
                self.pending.push_back(RawRecord {
                    sequence: self.sequence,
                    // The watermark is monotone, so cursors never move backwards
                    // even when the endpoint returns rows out of order
                    cursor: Cursor::Timestamp(self.watermark.unwrap_or(timestamp)),
                    fields: object.into_iter().collect(),
                });
            }
        }

        self.polls_done += 1;
        Ok(())
    }
}

#[async_trait]
impl SourceAdapter for PollSource {
    async fn next(&mut self) -> Result<Option<RawRecord>> {
        loop {
            if let Some(record) = self.pending.pop_front() {
                return Ok(Some(record));
            }

            if let Some(max) = self.max_polls {
                if self.polls_done >= max {
                    return Ok(None);
                }
            }

            if self.polls_done > 0 {
                tokio::time::sleep(self.interval).await;
            }
            self.poll_once().await?;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn source(server_url: &str, entities: Vec<String>, resume: Option<Cursor>) -> PollSource {
        PollSource::new(
            reqwest::Client::new(),
            format!("{}/observations", server_url),
            60,
            entities,
            "timestamp".to_string(),
            Some(1),
            RetryConfig {
                max_attempts: 3,
                base_delay_ms: 1,
                max_delay_ms: 10,
            },
            resume,
        )
    }

    #[tokio::test]
    async fn test_poll_yields_rows_and_advances_watermark() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/observations"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([
                {"station": "s1", "timestamp": 1_000, "air_temperature": 4.2},
                {"station": "s1", "timestamp": 2_000, "air_temperature": 4.5},
            ])))
            .mount(&server)
            .await;

        let mut poll = source(&server.uri(), vec![], None);

        let first = poll.next().await.unwrap().unwrap();
        assert_eq!(first.sequence, 1);
        assert_eq!(first.cursor, Cursor::Timestamp(1_000));

        let second = poll.next().await.unwrap().unwrap();
        assert_eq!(second.cursor, Cursor::Timestamp(2_000));

        // max_polls = 1, so the sequence ends after one cycle
        assert!(poll.next().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_resume_watermark_sent_as_since() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/observations"))
            .and(query_param("entity", "s1"))
            .and(query_param("since", "5000"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
            .expect(1)
            .mount(&server)
            .await;

        let mut poll = source(
            &server.uri(),
            vec!["s1".to_string()],
            Some(Cursor::Timestamp(5_000)),
        );
        assert!(poll.next().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_transient_failure_retried_then_fatal() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/observations"))
            .respond_with(ResponseTemplate::new(503))
            .expect(3)
            .mount(&server)
            .await;

        let mut poll = source(&server.uri(), vec![], None);
        let err = poll.next().await.unwrap_err();
        assert!(matches!(err, ExtractError::Fatal(_)));
    }

    #[tokio::test]
    async fn test_permanent_failure_not_retried() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/observations"))
            .respond_with(ResponseTemplate::new(404))
            .expect(1)
            .mount(&server)
            .await;

        let mut poll = source(&server.uri(), vec![], None);
        assert!(poll.next().await.is_err());
    }
}
