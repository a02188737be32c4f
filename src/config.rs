use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::env;
use std::time::Duration;
use url::Url;

use crate::core::diff::Confidence;
use crate::core::retry::RetryPolicy;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub scraper: ScraperConfig,
    pub retry: RetryConfig,
    pub scheduler: SchedulerConfig,
    pub notifications: NotificationsConfig,
    pub metrics: MetricsConfig,
    pub logging: LoggingConfig,
    pub targets: Vec<TargetConfig>,
    pub subscribers: Vec<SubscriberConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub enabled: bool,
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScraperConfig {
    /// Seconds before a single HTTP or render request is abandoned.
    pub request_timeout: u64,
    pub user_agent: String,
    pub accept_language: String,
    /// Browserless-compatible endpoint used for DOM rendering. Disabled when unset.
    pub render_service_url: Option<String>,
    pub render_service_token: Option<String>,
    pub browser_enabled: bool,
    pub browser_pool_size: usize,
    pub chrome_path: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub max_retries: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    pub backoff_multiplier: f64,
    /// Fraction of each delay that may be randomly shaved off, in `[0, 1)`.
    pub jitter: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    pub poll_interval_secs: u64,
    pub tick_interval_secs: u64,
    pub check_timeout_secs: u64,
    pub max_concurrent_checks: usize,
    pub shutdown_grace_secs: u64,
    pub max_failure_backoff_secs: u64,
    /// Consecutive failures at which error alerts become critical.
    pub error_escalation_threshold: u32,
    pub report_interval_secs: Option<u64>,
    pub notify_min_confidence: Confidence,
    /// Seconds one notification may take before the cycle moves on without it.
    pub notify_timeout_secs: u64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct NotificationsConfig {
    pub telegram: TelegramConfig,
    pub discord: DiscordConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TelegramConfig {
    pub bot_token: Option<String>,
    pub api_base: String,
    /// Chats that receive every event, on top of per-target subscribers.
    pub chat_ids: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DiscordConfig {
    pub webhook_url: Option<String>,
    pub username: String,
    pub avatar_url: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricsConfig {
    pub enabled: bool,
    pub port: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub directory: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, validator::Validate)]
pub struct TargetConfig {
    #[validate(length(min = 1, max = 64))]
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    #[validate(url)]
    pub url: String,
    #[serde(default)]
    pub selector: Option<String>,
    #[serde(default = "default_true")]
    pub active: bool,
    #[serde(default)]
    pub paused: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubscriberConfig {
    pub id: String,
    pub chat_id: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub targets: Vec<String>,
}

fn default_true() -> bool {
    true
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            host: "127.0.0.1".to_string(),
            port: 3000,
        }
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: "sqlite://data/estate-watcher.db?mode=rwc".to_string(),
            max_connections: 5,
        }
    }
}

impl Default for ScraperConfig {
    fn default() -> Self {
        Self {
            request_timeout: 30,
            user_agent: "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0 Safari/537.36".to_string(),
            accept_language: "en-US,en;q=0.9".to_string(),
            render_service_url: None,
            render_service_token: None,
            browser_enabled: true,
            browser_pool_size: 2,
            chrome_path: None,
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay_ms: 1000,
            max_delay_ms: 30_000,
            backoff_multiplier: 2.0,
            jitter: 0.2,
        }
    }
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: 300,
            tick_interval_secs: 5,
            check_timeout_secs: 120,
            max_concurrent_checks: 4,
            shutdown_grace_secs: 10,
            max_failure_backoff_secs: 3600,
            error_escalation_threshold: 3,
            report_interval_secs: Some(86_400),
            notify_min_confidence: Confidence::Low,
            notify_timeout_secs: 30,
        }
    }
}

impl Default for TelegramConfig {
    fn default() -> Self {
        Self {
            bot_token: None,
            api_base: "https://api.telegram.org".to_string(),
            chat_ids: Vec::new(),
        }
    }
}

impl Default for DiscordConfig {
    fn default() -> Self {
        Self {
            webhook_url: None,
            username: "Estate Watcher".to_string(),
            avatar_url: None,
        }
    }
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            port: 9001,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "estate_watcher=info".to_string(),
            directory: None,
        }
    }
}

impl RetryConfig {
    pub fn policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.max_retries,
            Duration::from_millis(self.base_delay_ms),
            Duration::from_millis(self.max_delay_ms),
            self.backoff_multiplier,
        )
        .with_jitter(self.jitter)
    }
}

impl SchedulerConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_secs(self.tick_interval_secs)
    }

    pub fn check_timeout(&self) -> Duration {
        Duration::from_secs(self.check_timeout_secs)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.shutdown_grace_secs)
    }

    pub fn notify_timeout(&self) -> Duration {
        Duration::from_secs(self.notify_timeout_secs)
    }

    pub fn report_interval(&self) -> Option<Duration> {
        self.report_interval_secs.map(Duration::from_secs)
    }

    /// Backoff applied to a target's next due time after consecutive failures.
    pub fn failure_backoff(&self) -> RetryPolicy {
        RetryPolicy::new(
            u32::MAX,
            self.poll_interval(),
            Duration::from_secs(self.max_failure_backoff_secs),
            2.0,
        )
    }
}

impl AppConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::load(None)
    }

    pub fn load(path: Option<&str>) -> Result<Self, ConfigError> {
        let _ = dotenvy::dotenv();
        let run_mode = env::var("RUN_MODE").unwrap_or_else(|_| "development".into());

        let mut builder = Config::builder()
            // Start with default configuration
            .add_source(File::with_name("config/default").required(false))
            // Add environment-specific config
            .add_source(File::with_name(&format!("config/{}", run_mode)).required(false))
            // Add local config (ignored by git)
            .add_source(File::with_name("config/local").required(false));

        if let Some(path) = path {
            builder = builder.add_source(File::with_name(path));
        }

        let s = builder
            // Add environment variables with prefix "ESTATE_"
            .add_source(Environment::with_prefix("ESTATE").separator("__"))
            .build()?;

        let mut config: AppConfig = s.try_deserialize()?;

        if config.scraper.chrome_path.is_none() {
            config.scraper.chrome_path = env::var("CHROME_PATH").ok();
        }
        if config.notifications.telegram.bot_token.is_none() {
            config.notifications.telegram.bot_token = env::var("TELEGRAM_BOT_TOKEN").ok();
        }

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.server.enabled && self.server.port == 0 {
            return Err(ConfigError::Message("Server port must be greater than 0".into()));
        }

        if self.database.max_connections == 0 {
            return Err(ConfigError::Message("Database max_connections must be greater than 0".into()));
        }

        if self.scraper.request_timeout == 0 {
            return Err(ConfigError::Message("Scraper request_timeout must be greater than 0".into()));
        }

        if let Some(render_url) = &self.scraper.render_service_url {
            if Url::parse(render_url).is_err() {
                return Err(ConfigError::Message("Invalid render_service_url format".into()));
            }
        }

        if self.scraper.browser_enabled && self.scraper.browser_pool_size == 0 {
            return Err(ConfigError::Message("Scraper browser_pool_size must be greater than 0".into()));
        }

        if self.retry.backoff_multiplier < 1.0 {
            return Err(ConfigError::Message("Retry backoff_multiplier must be at least 1.0".into()));
        }

        if self.retry.max_delay_ms < self.retry.base_delay_ms {
            return Err(ConfigError::Message("Retry max_delay_ms cannot be lower than base_delay_ms".into()));
        }

        if !(0.0..1.0).contains(&self.retry.jitter) {
            return Err(ConfigError::Message("Retry jitter must be in [0, 1)".into()));
        }

        if self.scheduler.poll_interval_secs == 0 || self.scheduler.tick_interval_secs == 0 {
            return Err(ConfigError::Message("Scheduler intervals must be greater than 0".into()));
        }

        if self.scheduler.check_timeout_secs == 0 {
            return Err(ConfigError::Message("Scheduler check_timeout_secs must be greater than 0".into()));
        }

        // The check budget is split evenly across the strategy chain.
        let strategies = 1 + u64::from(self.scraper.render_service_url.is_some()) + u64::from(self.scraper.browser_enabled);
        if self.scheduler.check_timeout_secs < self.scraper.request_timeout.saturating_mul(strategies) {
            return Err(ConfigError::Message(format!(
                "Scheduler check_timeout_secs must allow one request_timeout for each of the {} fetch strategies",
                strategies
            )));
        }

        if self.scheduler.notify_timeout_secs == 0 {
            return Err(ConfigError::Message("Scheduler notify_timeout_secs must be greater than 0".into()));
        }

        if self.scheduler.max_concurrent_checks == 0 {
            return Err(ConfigError::Message("Scheduler max_concurrent_checks must be greater than 0".into()));
        }

        if self.scheduler.max_failure_backoff_secs < self.scheduler.poll_interval_secs {
            return Err(ConfigError::Message("Scheduler max_failure_backoff_secs cannot be lower than poll_interval_secs".into()));
        }

        if let Some(webhook) = &self.notifications.discord.webhook_url {
            if !webhook.starts_with("https://discord.com/api/webhooks/") {
                return Err(ConfigError::Message("Invalid Discord webhook URL format".into()));
            }
        }

        if Url::parse(&self.notifications.telegram.api_base).is_err() {
            return Err(ConfigError::Message("Invalid Telegram api_base format".into()));
        }

        if self.metrics.enabled && self.metrics.port == 0 {
            return Err(ConfigError::Message("Metrics port must be greater than 0".into()));
        }

        let mut seen = std::collections::HashSet::new();
        for target in &self.targets {
            if !seen.insert(target.id.as_str()) {
                return Err(ConfigError::Message(format!("Duplicate target id: {}", target.id)));
            }
        }

        Ok(())
    }
}
