use async_trait::async_trait;
use reqwest::Client;
use serde_json::json;
use std::time::Duration;

use crate::config::DiscordConfig;
use crate::core::diff::{Confidence, DiffResult};
use crate::core::stats::CycleStatistics;
use crate::models::MonitoredTarget;
use crate::plugins::traits::{ErrorReport, NotificationSink, NotifyError, Severity};

const SEND_TIMEOUT: Duration = Duration::from_secs(15);

pub struct DiscordNotifier {
    client: Client,
    webhook_url: String,
    username: String,
    avatar_url: Option<String>,
}

impl DiscordNotifier {
    pub fn new(config: &DiscordConfig) -> Result<Self, NotifyError> {
        let webhook_url = config
            .webhook_url
            .clone()
            .ok_or_else(|| NotifyError::NotConfigured("discord webhook_url".to_string()))?;

        Ok(DiscordNotifier {
            client: Client::builder().timeout(SEND_TIMEOUT).build()?,
            webhook_url,
            username: config.username.clone(),
            avatar_url: config.avatar_url.clone(),
        })
    }

    fn confidence_color(confidence: Confidence) -> u32 {
        match confidence {
            Confidence::VeryHigh => 0x00ff00, // Green
            Confidence::High => 0x0099ff,     // Blue
            Confidence::Low => 0xff9900,      // Orange, may be rendering noise
        }
    }

    fn severity_color(severity: Severity) -> u32 {
        match severity {
            Severity::Warning => 0xffcc00,
            Severity::Critical => 0xff0000,
        }
    }

    fn create_webhook_payload(&self, embed: serde_json::Value) -> serde_json::Value {
        let mut payload = json!({
            "username": self.username,
            "embeds": [embed]
        });

        if let Some(avatar_url) = &self.avatar_url {
            payload["avatar_url"] = json!(avatar_url);
        }

        payload
    }

    async fn post(&self, embed: serde_json::Value) -> Result<(), NotifyError> {
        let response = self
            .client
            .post(&self.webhook_url)
            .json(&self.create_webhook_payload(embed))
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(NotifyError::Rejected {
                sink: "discord".to_string(),
                status,
                body,
            });
        }

        Ok(())
    }
}

#[async_trait]
impl NotificationSink for DiscordNotifier {
    fn name(&self) -> &str {
        "discord"
    }

    async fn notify_new_content(&self, target: &MonitoredTarget, diff: &DiffResult) -> Result<(), NotifyError> {
        let embed = json!({
            "title": format!("🏠 New listings: {}", target.display_name()),
            "url": target.url,
            "color": Self::confidence_color(diff.confidence),
            "timestamp": chrono::Utc::now().to_rfc3339(),
            "fields": [
                { "name": "Strategy", "value": diff.method.as_str(), "inline": true },
                { "name": "Confidence", "value": diff.confidence.as_str(), "inline": true },
                { "name": "Total new", "value": target.new_listings_count.to_string(), "inline": true }
            ]
        });
        self.post(embed).await
    }

    async fn notify_error(&self, target: &MonitoredTarget, report: &ErrorReport) -> Result<(), NotifyError> {
        let embed = json!({
            "title": format!("Check failed: {}", target.display_name()),
            "description": report.message,
            "color": Self::severity_color(report.severity),
            "timestamp": report.occurred_at.to_rfc3339(),
            "fields": [
                { "name": "Classification", "value": report.kind.as_str(), "inline": true },
                { "name": "Consecutive failures", "value": report.consecutive_failures.to_string(), "inline": true },
                { "name": "Attempts", "value": report.attempts.to_string(), "inline": true }
            ]
        });
        self.post(embed).await
    }

    async fn notify_periodic_report(&self, statistics: &CycleStatistics) -> Result<(), NotifyError> {
        let embed = json!({
            "title": "📊 Monitoring report",
            "color": 0x0099ff,
            "timestamp": chrono::Utc::now().to_rfc3339(),
            "fields": [
                { "name": "Checks", "value": statistics.total_checks.to_string(), "inline": true },
                { "name": "Errors", "value": statistics.error_count.to_string(), "inline": true },
                { "name": "New listings", "value": statistics.new_property_detections.to_string(), "inline": true },
                { "name": "Success rate", "value": format!("{:.1}%", statistics.success_rate), "inline": true }
            ]
        });
        self.post(embed).await
    }
}
