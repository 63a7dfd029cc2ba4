//! Client construction errors and `SourceError` mapping.

use reqwest::StatusCode;
use tally_core::reconciliation::SourceError;
use thiserror::Error;

/// Errors raised while building a client.
#[derive(Debug, Error)]
pub enum ClientError {
    /// The HTTP client could not be built.
    #[error("Failed to build HTTP client: {0}")]
    Build(#[from] reqwest::Error),

    /// The configured base URL is empty.
    #[error("{0} base URL is not configured")]
    MissingBaseUrl(&'static str),
}

/// Timeouts, connection failures and 5xx/429 answers are worth retrying.
pub(crate) fn from_reqwest(source_name: &'static str, err: &reqwest::Error) -> SourceError {
    if err.is_decode() || err.is_builder() {
        return SourceError::Rejected {
            source_name,
            message: err.to_string(),
        };
    }
    if let Some(status) = err.status() {
        return from_status(source_name, status, &err.to_string());
    }
    SourceError::Unavailable {
        source_name,
        message: err.to_string(),
    }
}

pub(crate) fn from_status(source_name: &'static str, status: StatusCode, body: &str) -> SourceError {
    let message = format!("{status}: {body}");
    if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS {
        SourceError::Unavailable {
            source_name,
            message,
        }
    } else {
        SourceError::Rejected {
            source_name,
            message,
        }
    }
}
