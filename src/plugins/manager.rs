use async_trait::async_trait;
use futures::future::join_all;
use metrics::counter;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::warn;

use super::traits::{ErrorReport, NotificationSink, NotifyError};
use crate::core::diff::DiffResult;
use crate::core::stats::CycleStatistics;
use crate::models::MonitoredTarget;

pub type NotificationSinkRef = Arc<dyn NotificationSink>;

/// Fans every event out to the registered sinks concurrently. A failing sink
/// is logged and counted; it never fails the caller or starves the other sinks.
#[derive(Clone, Default)]
pub struct NotifierHub {
    sinks: Arc<RwLock<HashMap<String, NotificationSinkRef>>>,
}

impl NotifierHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a sink under its name, replacing any sink with the same name
    pub async fn register(&self, sink: NotificationSinkRef) {
        let name = sink.name().to_string();
        let mut sinks = self.sinks.write().await;
        sinks.insert(name, sink);
    }

    pub async fn has_sink(&self, name: &str) -> bool {
        let sinks = self.sinks.read().await;
        sinks.contains_key(name)
    }

    pub async fn list_sinks(&self) -> Vec<String> {
        let sinks = self.sinks.read().await;
        let mut names: Vec<String> = sinks.keys().cloned().collect();
        names.sort();
        names
    }

    async fn snapshot(&self) -> Vec<NotificationSinkRef> {
        let sinks = self.sinks.read().await;
        sinks.values().cloned().collect()
    }

    fn log_failure(sink: &str, event: &'static str, result: Result<(), NotifyError>) {
        if let Err(e) = result {
            counter!("estate_watcher_notification_failures_total", "sink" => sink.to_string(), "event" => event)
                .increment(1);
            warn!(sink, event, error = %e, "Notification failed");
        }
    }
}

#[async_trait]
impl NotificationSink for NotifierHub {
    fn name(&self) -> &str {
        "hub"
    }

    async fn notify_new_content(&self, target: &MonitoredTarget, diff: &DiffResult) -> Result<(), NotifyError> {
        let sinks = self.snapshot().await;
        let results = join_all(sinks.iter().map(|sink| sink.notify_new_content(target, diff))).await;
        for (sink, result) in sinks.iter().zip(results) {
            Self::log_failure(sink.name(), "new_content", result);
        }
        Ok(())
    }

    async fn notify_error(&self, target: &MonitoredTarget, report: &ErrorReport) -> Result<(), NotifyError> {
        let sinks = self.snapshot().await;
        let results = join_all(sinks.iter().map(|sink| sink.notify_error(target, report))).await;
        for (sink, result) in sinks.iter().zip(results) {
            Self::log_failure(sink.name(), "error", result);
        }
        Ok(())
    }

    async fn notify_periodic_report(&self, statistics: &CycleStatistics) -> Result<(), NotifyError> {
        let sinks = self.snapshot().await;
        let results = join_all(sinks.iter().map(|sink| sink.notify_periodic_report(statistics))).await;
        for (sink, result) in sinks.iter().zip(results) {
            Self::log_failure(sink.name(), "periodic_report", result);
        }
        Ok(())
    }
}
