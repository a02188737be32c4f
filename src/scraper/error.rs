use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

pub type FetchResult<T> = std::result::Result<T, FetchError>;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum FetchError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("Request timed out: {0}")]
    Timeout(String),

    #[error("Unexpected HTTP status {status}")]
    Status { status: u16 },

    #[error("Rate limited (HTTP 429)")]
    RateLimited,

    #[error("Bot detection triggered: {marker}")]
    BotDetected { marker: String },

    #[error("No content extracted for selector: {selector}")]
    Extraction { selector: String },

    #[error("Invalid target configuration: {reason}")]
    FatalConfig { reason: String },

    #[error("Fetch cancelled")]
    Cancelled,
}

/// Coarse error classification carried by outcomes, statistics and alerts.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Network,
    Timeout,
    RateLimited,
    ClientError,
    BotDetected,
    Extraction,
    FatalConfig,
    Cancelled,
}

impl FetchError {
    pub fn from_status(status: u16) -> Self {
        match status {
            429 => FetchError::RateLimited,
            403 => FetchError::BotDetected {
                marker: "HTTP 403".to_string(),
            },
            _ => FetchError::Status { status },
        }
    }

    pub fn extraction(selector: Option<&str>) -> Self {
        FetchError::Extraction {
            selector: selector.unwrap_or("<document>").to_string(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            FetchError::Network(_) => ErrorKind::Network,
            FetchError::Timeout(_) => ErrorKind::Timeout,
            FetchError::Status { status } if *status >= 500 => ErrorKind::Network,
            FetchError::Status { .. } => ErrorKind::ClientError,
            FetchError::RateLimited => ErrorKind::RateLimited,
            FetchError::BotDetected { .. } => ErrorKind::BotDetected,
            FetchError::Extraction { .. } => ErrorKind::Extraction,
            FetchError::FatalConfig { .. } => ErrorKind::FatalConfig,
            FetchError::Cancelled => ErrorKind::Cancelled,
        }
    }

    /// Whether the same strategy may try again after a backoff.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self.kind(),
            ErrorKind::Network | ErrorKind::Timeout | ErrorKind::RateLimited
        )
    }

    /// Whether a failure at one strategy moves the chain on to the next one.
    /// Client errors, bad configuration and cancellation end the chain.
    pub fn escalates(&self) -> bool {
        !matches!(
            self.kind(),
            ErrorKind::ClientError | ErrorKind::FatalConfig | ErrorKind::Cancelled
        )
    }
}

impl From<reqwest::Error> for FetchError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            FetchError::Timeout(err.to_string())
        } else if let Some(status) = err.status() {
            FetchError::from_status(status.as_u16())
        } else if err.is_builder() {
            FetchError::FatalConfig {
                reason: err.to_string(),
            }
        } else {
            FetchError::Network(err.to_string())
        }
    }
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Network => "network",
            ErrorKind::Timeout => "timeout",
            ErrorKind::RateLimited => "rate_limited",
            ErrorKind::ClientError => "client_error",
            ErrorKind::BotDetected => "bot_detected",
            ErrorKind::Extraction => "extraction",
            ErrorKind::FatalConfig => "fatal_config",
            ErrorKind::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
