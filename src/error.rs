use std::time::Duration;

use thiserror::Error;

/// Failure of a single feed during ingestion.
///
/// None of these abort a batch: the failing feed is skipped for the current
/// run and picked up again by the next scheduled one.
#[derive(Debug, Error)]
pub enum IngestError {
    /// Connection, DNS, TLS or body read failure
    #[error("request failed: {0}")]
    Network(#[from] reqwest::Error),
    #[error("request timed out after {0:?}")]
    Timeout(Duration),
    #[error("HTTP error: status {0}")]
    HttpStatus(u16),
    /// Document is neither RSS nor Atom, or is not well formed
    #[error("parse error: {0}")]
    Parse(String),
    #[error("storage error: {0}")]
    Storage(String),
    /// The run was cancelled before this feed was fetched
    #[error("cancelled before fetch")]
    Cancelled,
}

impl IngestError {
    pub fn kind(&self) -> &'static str {
        match self {
            IngestError::Network(_) | IngestError::Timeout(_) | IngestError::HttpStatus(_) => {
                "network"
            }
            IngestError::Parse(_) => "parse",
            IngestError::Storage(_) => "storage",
            IngestError::Cancelled => "cancelled",
        }
    }

    pub(crate) fn storage(err: anyhow::Error) -> Self {
        IngestError::Storage(format!("{:#}", err))
    }
}

/// User input that cannot be acted upon.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Wrong parameter")]
    WrongParameter(String),
    #[error("Missing field: {0}")]
    MissingField(&'static str),
}

/// Parse a path or form identifier.
pub fn parse_id(raw: &str) -> Result<i64, ValidationError> {
    raw.trim()
        .parse::<i64>()
        .map_err(|_| ValidationError::WrongParameter(raw.to_string()))
}
