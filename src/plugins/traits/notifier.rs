use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

use crate::core::diff::DiffResult;
use crate::core::stats::CycleStatistics;
use crate::models::MonitoredTarget;
use crate::scraper::{ErrorKind, FetchMethod, ScrapeOutcome};

#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("{sink} rejected the message with HTTP {status}: {body}")]
    Rejected { sink: String, status: u16, body: String },

    #[error("{0} is not configured")]
    NotConfigured(String),
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Warning,
    Critical,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Severity::Warning => f.write_str("warning"),
            Severity::Critical => f.write_str("critical"),
        }
    }
}

/// Failure alert for one target. Detail grows with the consecutive failure count.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ErrorReport {
    pub target_id: String,
    pub kind: ErrorKind,
    pub message: String,
    pub method: Option<FetchMethod>,
    pub consecutive_failures: u32,
    pub attempts: u32,
    pub severity: Severity,
    pub occurred_at: DateTime<Utc>,
}

impl ErrorReport {
    pub fn from_outcome(outcome: &ScrapeOutcome, consecutive_failures: u32, escalation_threshold: u32) -> Self {
        let severity = if consecutive_failures >= escalation_threshold {
            Severity::Critical
        } else {
            Severity::Warning
        };

        Self {
            target_id: outcome.target_id.clone(),
            kind: outcome.error_kind.unwrap_or(ErrorKind::Network),
            message: outcome.error.clone().unwrap_or_default(),
            method: Some(outcome.method),
            consecutive_failures,
            attempts: outcome.attempts,
            severity,
            occurred_at: outcome.checked_at,
        }
    }

    /// A target that can never be checked. Sent once, then the target is skipped.
    pub fn fatal_config(target_id: &str, reason: impl Into<String>) -> Self {
        Self {
            target_id: target_id.to_string(),
            kind: ErrorKind::FatalConfig,
            message: reason.into(),
            method: None,
            consecutive_failures: 1,
            attempts: 0,
            severity: Severity::Critical,
            occurred_at: Utc::now(),
        }
    }

    /// One line summary; the classification and attempt counts are always included.
    pub fn summary(&self) -> String {
        let mut summary = format!(
            "[{}] {} failed: {} ({})",
            self.severity, self.target_id, self.kind, self.message
        );
        if let Some(method) = self.method {
            summary.push_str(&format!(", last strategy {}", method));
        }
        summary.push_str(&format!(
            ", {} attempts, {} consecutive failures",
            self.attempts, self.consecutive_failures
        ));
        summary
    }
}

/// Receiver of structured monitoring events.
#[async_trait]
pub trait NotificationSink: Send + Sync {
    fn name(&self) -> &str;

    async fn notify_new_content(&self, target: &MonitoredTarget, diff: &DiffResult) -> Result<(), NotifyError>;

    async fn notify_error(&self, target: &MonitoredTarget, report: &ErrorReport) -> Result<(), NotifyError>;

    async fn notify_periodic_report(&self, statistics: &CycleStatistics) -> Result<(), NotifyError>;
}
