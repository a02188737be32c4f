use async_trait::async_trait;
use tracing::{info, warn};

use crate::core::diff::DiffResult;
use crate::core::stats::CycleStatistics;
use crate::models::MonitoredTarget;
use crate::plugins::traits::{ErrorReport, NotificationSink, NotifyError};

/// Writes every event to the tracing log. Always registered, so events are
/// visible even with no chat or webhook configured.
pub struct LogNotifier;

#[async_trait]
impl NotificationSink for LogNotifier {
    fn name(&self) -> &str {
        "log"
    }

    async fn notify_new_content(&self, target: &MonitoredTarget, diff: &DiffResult) -> Result<(), NotifyError> {
        info!(
            target_id = %target.id,
            url = %target.url,
            method = %diff.method,
            confidence = %diff.confidence,
            fingerprint = %diff.current,
            "New content detected"
        );
        Ok(())
    }

    async fn notify_error(&self, target: &MonitoredTarget, report: &ErrorReport) -> Result<(), NotifyError> {
        warn!(
            target_id = %target.id,
            kind = %report.kind,
            severity = %report.severity,
            consecutive_failures = report.consecutive_failures,
            attempts = report.attempts,
            "{}",
            report.message
        );
        Ok(())
    }

    async fn notify_periodic_report(&self, statistics: &CycleStatistics) -> Result<(), NotifyError> {
        info!(
            total_checks = statistics.total_checks,
            errors = statistics.error_count,
            new_listings = statistics.new_property_detections,
            success_rate = statistics.success_rate,
            average_ms = statistics.average_execution_time_ms,
            "Periodic monitoring report"
        );
        Ok(())
    }
}

/// Discards every event.
pub struct NoopNotifier;

#[async_trait]
impl NotificationSink for NoopNotifier {
    fn name(&self) -> &str {
        "noop"
    }

    async fn notify_new_content(&self, _target: &MonitoredTarget, _diff: &DiffResult) -> Result<(), NotifyError> {
        Ok(())
    }

    async fn notify_error(&self, _target: &MonitoredTarget, _report: &ErrorReport) -> Result<(), NotifyError> {
        Ok(())
    }

    async fn notify_periodic_report(&self, _statistics: &CycleStatistics) -> Result<(), NotifyError> {
        Ok(())
    }
}
