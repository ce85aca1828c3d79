//! Source adapters
//!
//! A source adapter produces a lazy, possibly-infinite sequence of raw
//! records. Three variants exist: a static delimited file, a polled
//! REST endpoint, and a streamed event feed. All expose the same
//! capability: `next()` yields the next record, `None` at the end of
//! the sequence, or an error. Transient I/O failures are retried inside
//! the adapter with bounded backoff before a fatal error surfaces.

mod file;
mod poll;
mod stream;

pub use file::FileSource;
pub use poll::PollSource;
pub use stream::StreamSource;

use async_trait::async_trait;
use sluice_common::types::{Cursor, RawRecord};
use sluice_common::Result;

use crate::config::{JobConfig, SourceSpec};

/// Uniform capability of all source variants
#[async_trait]
pub trait SourceAdapter: Send {
    /// Next raw record, or `None` once the sequence is exhausted.
    ///
    /// Errors returned here are fatal to the job; transient conditions
    /// have already been retried internally.
    async fn next(&mut self) -> Result<Option<RawRecord>>;
}

/// Open the source configured for a job, resuming from a saved cursor
/// when one is given.
pub fn open(
    job: &JobConfig,
    client: &reqwest::Client,
    resume: Option<Cursor>,
) -> Result<Box<dyn SourceAdapter>> {
    match &job.source {
        SourceSpec::File { path } => Ok(Box::new(FileSource::open(path, resume)?)),
        SourceSpec::Poll {
            url,
            interval_secs,
            entities,
            since_field,
            max_polls,
        } => Ok(Box::new(PollSource::new(
            client.clone(),
            url.clone(),
            *interval_secs,
            entities.clone(),
            since_field.clone(),
            *max_polls,
            job.retry,
            resume,
        ))),
        SourceSpec::Stream { url } => Ok(Box::new(StreamSource::new(
            client.clone(),
            url.clone(),
            job.retry,
            resume,
        ))),
    }
}
