use async_trait::async_trait;
use reqwest::Client;
use serde_json::json;
use std::collections::BTreeSet;
use std::time::Duration;
use tracing::debug;

use crate::config::TelegramConfig;
use crate::core::diff::DiffResult;
use crate::core::stats::CycleStatistics;
use crate::models::{MonitoredTarget, SubscriberDirectory};
use crate::plugins::traits::{ErrorReport, NotificationSink, NotifyError, Severity};

const SEND_TIMEOUT: Duration = Duration::from_secs(15);

/// Telegram Bot API `sendMessage`. Subscribers hear about their own targets;
/// the configured admin chats receive everything, including periodic reports.
pub struct TelegramNotifier {
    client: Client,
    endpoint: String,
    admin_chats: Vec<String>,
    subscribers: SubscriberDirectory,
}

impl TelegramNotifier {
    pub fn new(config: &TelegramConfig, subscribers: SubscriberDirectory) -> Result<Self, NotifyError> {
        let token = config
            .bot_token
            .as_deref()
            .filter(|t| !t.is_empty())
            .ok_or_else(|| NotifyError::NotConfigured("telegram bot_token".to_string()))?;

        Ok(Self {
            client: Client::builder().timeout(SEND_TIMEOUT).build()?,
            endpoint: format!("{}/bot{}/sendMessage", config.api_base.trim_end_matches('/'), token),
            admin_chats: config.chat_ids.clone(),
            subscribers,
        })
    }

    fn recipients(&self, target_id: &str) -> BTreeSet<String> {
        self.subscribers
            .chat_ids_for(target_id)
            .into_iter()
            .chain(self.admin_chats.iter().cloned())
            .collect()
    }

    async fn send(&self, chat_id: &str, text: &str) -> Result<(), NotifyError> {
        let response = self
            .client
            .post(&self.endpoint)
            .json(&json!({
                "chat_id": chat_id,
                "text": text,
                "parse_mode": "HTML",
                "disable_web_page_preview": true,
            }))
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(NotifyError::Rejected {
                sink: "telegram".to_string(),
                status,
                body,
            });
        }

        Ok(())
    }

    /// Sends to every chat and reports the first failure after trying them all.
    async fn broadcast(&self, chats: impl IntoIterator<Item = String>, text: &str) -> Result<(), NotifyError> {
        let mut first_error = None;
        let mut sent = 0;
        for chat_id in chats {
            match self.send(&chat_id, text).await {
                Ok(()) => sent += 1,
                Err(e) => {
                    first_error.get_or_insert(e);
                }
            }
        }
        debug!(sent, "Telegram broadcast finished");
        first_error.map_or(Ok(()), Err)
    }
}

fn escape_html(text: &str) -> String {
    text.replace('&', "&amp;").replace('<', "&lt;").replace('>', "&gt;")
}

pub fn format_new_content(target: &MonitoredTarget, diff: &DiffResult) -> String {
    format!(
        "🏠 <b>New listings</b> on {}\n{}\n<i>via {}, confidence {}</i>",
        escape_html(target.display_name()),
        escape_html(&target.url),
        diff.method,
        diff.confidence
    )
}

pub fn format_error(target: &MonitoredTarget, report: &ErrorReport) -> String {
    let icon = match report.severity {
        Severity::Warning => "⚠️",
        Severity::Critical => "🚨",
    };
    let mut text = format!(
        "{} <b>{}</b> check failed: {}\n{}",
        icon,
        escape_html(target.display_name()),
        report.kind,
        escape_html(&report.message)
    );
    if report.severity == Severity::Critical {
        text.push_str(&format!(
            "\n{} consecutive failures, {} attempts in the last check",
            report.consecutive_failures, report.attempts
        ));
    }
    text
}

pub fn format_report(statistics: &CycleStatistics) -> String {
    let last_new = statistics
        .last_new_property_at
        .map(|t| t.format("%Y-%m-%d %H:%M UTC").to_string())
        .unwrap_or_else(|| "never".to_string());

    format!(
        "📊 <b>Monitoring report</b>\nChecks: {}\nErrors: {}\nNew listings: {}\nSuccess rate: {:.1}%\nAverage check: {:.0} ms\nLast new listing: {}",
        statistics.total_checks,
        statistics.error_count,
        statistics.new_property_detections,
        statistics.success_rate,
        statistics.average_execution_time_ms,
        last_new
    )
}

#[async_trait]
impl NotificationSink for TelegramNotifier {
    fn name(&self) -> &str {
        "telegram"
    }

    async fn notify_new_content(&self, target: &MonitoredTarget, diff: &DiffResult) -> Result<(), NotifyError> {
        self.broadcast(self.recipients(&target.id), &format_new_content(target, diff))
            .await
    }

    async fn notify_error(&self, target: &MonitoredTarget, report: &ErrorReport) -> Result<(), NotifyError> {
        self.broadcast(self.recipients(&target.id), &format_error(target, report))
            .await
    }

    async fn notify_periodic_report(&self, statistics: &CycleStatistics) -> Result<(), NotifyError> {
        self.broadcast(self.admin_chats.iter().cloned(), &format_report(statistics))
            .await
    }
}
