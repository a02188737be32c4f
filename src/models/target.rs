use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::config::TargetConfig;
use crate::core::hasher::{ContentHasher, Fingerprint};
use crate::utils::error::{AppError, Result};

/// One monitored listing page with its last known state and counters.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MonitoredTarget {
    pub id: String,
    pub name: Option<String>,
    pub url: String,
    pub selector: Option<String>,

    // Status
    pub active: bool,
    pub paused: bool,

    // Last known state
    pub last_fingerprint: Option<Fingerprint>,
    pub last_checked_at: Option<DateTime<Utc>>,
    pub last_new_content_at: Option<DateTime<Utc>>,

    // Counters
    pub new_listings_count: u64,
    pub total_checks: u64,
    pub error_count: u64,

    // Metadata
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl MonitoredTarget {
    pub fn new(id: impl Into<String>, url: impl Into<String>, selector: Option<String>) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            name: None,
            url: url.into(),
            selector,
            active: true,
            paused: false,
            last_fingerprint: None,
            last_checked_at: None,
            last_new_content_at: None,
            new_listings_count: 0,
            total_checks: 0,
            error_count: 0,
            created_at: now,
            updated_at: now,
        }
    }

    /// Builds a target from configuration, rejecting definitions that can never be checked.
    pub fn from_config(config: &TargetConfig) -> Result<Self> {
        let fatal = |reason: String| AppError::FatalConfig {
            target: config.id.clone(),
            reason,
        };

        config.validate().map_err(|e| fatal(e.to_string()))?;
        if let Some(selector) = &config.selector {
            ContentHasher::parse_selector(selector).map_err(|e| fatal(e.to_string()))?;
        }

        let mut target = Self::new(config.id.clone(), config.url.clone(), config.selector.clone());
        target.name = config.name.clone();
        target.active = config.active;
        target.paused = config.paused;
        Ok(target)
    }

    /// Active and not paused. Anything else is skipped without touching counters.
    pub fn is_monitoring_enabled(&self) -> bool {
        self.active && !self.paused
    }

    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.id)
    }

    /// Takes the definition of `other` and keeps this target's state. A new
    /// url or selector makes the old fingerprint meaningless, so the next
    /// check starts a fresh baseline.
    pub fn reconfigure(&mut self, other: &MonitoredTarget) {
        if self.url != other.url || self.selector != other.selector {
            self.last_fingerprint = None;
        }
        self.name = other.name.clone();
        self.url = other.url.clone();
        self.selector = other.selector.clone();
        self.active = other.active;
        self.paused = other.paused;
        self.updated_at = Utc::now();
    }

    /// `total_checks >= error_count` and `new_listings_count <= total_checks`.
    pub fn counters_consistent(&self) -> bool {
        self.total_checks >= self.error_count && self.new_listings_count <= self.total_checks
    }
}
