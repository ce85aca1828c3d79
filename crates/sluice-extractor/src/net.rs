//! HTTP error classification shared by the clients
//!
//! Rate limiting, timeouts and server errors are transient and eligible
//! for retry; other client errors are permanent.

use reqwest::StatusCode;
use sluice_common::ExtractError;

/// Classify a non-success HTTP status
pub(crate) fn classify_status(status: StatusCode, context: &str) -> ExtractError {
    if status == StatusCode::TOO_MANY_REQUESTS
        || status == StatusCode::REQUEST_TIMEOUT
        || status.is_server_error()
    {
        ExtractError::Transient(format!("{}: HTTP {}", context, status))
    } else {
        ExtractError::Permanent(format!("{}: HTTP {}", context, status))
    }
}

/// Classify a transport-level request failure
pub(crate) fn classify_transport(err: reqwest::Error, context: &str) -> ExtractError {
    if err.is_builder() {
        ExtractError::Permanent(format!("{}: {}", context, err))
    } else {
        // Timeouts, connection resets and DNS failures may resolve
        ExtractError::Transient(format!("{}: {}", context, err))
    }
}
