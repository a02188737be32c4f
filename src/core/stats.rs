use chrono::{DateTime, Utc};
use metrics::{counter, histogram};
use serde::{Deserialize, Serialize};
use std::sync::{Mutex, MutexGuard};

use crate::core::diff::DiffResult;
use crate::models::MonitoredTarget;
use crate::scraper::ScrapeOutcome;

/// Process-lifetime aggregate over every recorded check.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct CycleStatistics {
    pub total_checks: u64,
    pub error_count: u64,
    pub new_property_detections: u64,
    pub last_check_at: Option<DateTime<Utc>>,
    pub last_new_property_at: Option<DateTime<Utc>>,
    pub average_execution_time_ms: f64,
    pub success_rate: f64,
}

#[derive(Debug, Default)]
struct Counters {
    total_checks: u64,
    error_count: u64,
    new_property_detections: u64,
    total_elapsed_ms: u64,
    last_check_at: Option<DateTime<Utc>>,
    last_new_property_at: Option<DateTime<Utc>>,
}

/// Percentage of checks that did not fail. 100 before the first check.
pub fn success_rate(total_checks: u64, error_count: u64) -> f64 {
    if total_checks == 0 {
        return 100.0;
    }
    total_checks.saturating_sub(error_count) as f64 / total_checks as f64 * 100.0
}

#[derive(Debug, Default)]
pub struct StatisticsTracker {
    counters: Mutex<Counters>,
}

impl StatisticsTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Applies one check to the target and to the aggregate.
    ///
    /// The caller holds the only mutable borrow of `target`, and the aggregate
    /// is updated under one lock, so neither is ever seen half updated.
    pub fn record(&self, target: &mut MonitoredTarget, outcome: &ScrapeOutcome, diff: Option<&DiffResult>) {
        let has_new_content = outcome.success && diff.is_some_and(|d| d.has_new_content);
        let checked_at = outcome.checked_at;

        target.total_checks += 1;
        if !outcome.success {
            target.error_count += 1;
        }
        if has_new_content {
            target.new_listings_count += 1;
            target.last_new_content_at = Some(checked_at);
        }
        if let Some(diff) = diff.filter(|_| outcome.success) {
            target.last_fingerprint = Some(diff.current.clone());
        }
        target.last_checked_at = Some(checked_at);
        target.updated_at = Utc::now();

        {
            let mut counters = self.lock();
            counters.total_checks += 1;
            counters.total_elapsed_ms += outcome.elapsed_ms;
            counters.last_check_at = Some(checked_at);
            if !outcome.success {
                counters.error_count += 1;
            }
            if has_new_content {
                counters.new_property_detections += 1;
                counters.last_new_property_at = Some(checked_at);
            }
        }

        let method = outcome.method.as_str();
        let result = if outcome.success { "success" } else { "failure" };
        counter!("estate_watcher_checks_total", "method" => method, "result" => result).increment(1);
        histogram!("estate_watcher_check_duration_seconds", "method" => method)
            .record(outcome.elapsed_ms as f64 / 1000.0);
        if let Some(kind) = outcome.error_kind {
            counter!("estate_watcher_check_errors_total", "kind" => kind.as_str()).increment(1);
        }
        if has_new_content {
            counter!("estate_watcher_new_content_total").increment(1);
        }
    }

    pub fn success_rate(&self) -> f64 {
        let counters = self.lock();
        success_rate(counters.total_checks, counters.error_count)
    }

    pub fn snapshot(&self) -> CycleStatistics {
        let counters = self.lock();
        let average_execution_time_ms = if counters.total_checks == 0 {
            0.0
        } else {
            counters.total_elapsed_ms as f64 / counters.total_checks as f64
        };

        CycleStatistics {
            total_checks: counters.total_checks,
            error_count: counters.error_count,
            new_property_detections: counters.new_property_detections,
            last_check_at: counters.last_check_at,
            last_new_property_at: counters.last_new_property_at,
            average_execution_time_ms,
            success_rate: success_rate(counters.total_checks, counters.error_count),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Counters> {
        // Counters stay valid even if a holder panicked mid-update of another field.
        self.counters.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
