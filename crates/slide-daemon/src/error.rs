//! Daemon-side error types. None of these are fatal: the core logs them and
//! keeps showing the last known good state.

use thiserror::Error;

use crate::broadcaster::SessionId;

/// A refresh that produced no usable URL set. Retried on the next interval.
#[derive(Error, Debug)]
pub enum FetchError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("{url} returned HTTP {status}")]
    Status { url: String, status: u16 },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid pattern: {0}")]
    InvalidPattern(#[from] regex::Error),

    #[error("folder {0} does not exist")]
    MissingFolder(String),

    #[error("cannot build slide URLs from base {0}")]
    InvalidBaseUrl(String),
}

/// A viewer's channel is closed or full. The session is dropped from the
/// registry.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("viewer session {0} is closed")]
pub struct SessionSendFailure(pub SessionId);
