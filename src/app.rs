use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::config::{AppConfig, NotificationsConfig, ScraperConfig, TargetConfig};
use crate::core::{ContentHasher, RetryPolicy, StatisticsTracker};
use crate::models::{generate_id, MonitoredTarget, SubscriberDirectory};
use crate::plugins::notifiers::{DiscordNotifier, LogNotifier, TelegramNotifier};
use crate::plugins::{ErrorReport, NotificationSink, NotifierHub, NotifyError};
use crate::scheduler::MonitoringScheduler;
use crate::scraper::{
    BrowserStrategy, FetchRequest, FetchStrategy, FetchStrategyChain, HttpStrategy, RenderStrategy,
    ScrapeOutcome,
};
use crate::store::{SqliteStore, TargetStore};
use crate::utils::error::{AppError, Result};

/// Everything `run` needs, wired from one configuration.
pub struct App {
    pub config: AppConfig,
    pub scheduler: MonitoringScheduler,
    pub store: Arc<dyn TargetStore>,
    pub notifier: NotifierHub,
}

pub async fn assemble(config: &AppConfig) -> Result<App> {
    let chain = Arc::new(build_chain(&config.scraper, config.retry.policy())?);
    let store: Arc<dyn TargetStore> = Arc::new(SqliteStore::connect(&config.database).await?);
    let notifier = build_notifier(&config.notifications, SubscriberDirectory::from_config(&config.subscribers)).await?;

    seed_targets(store.as_ref(), &config.targets, &notifier).await?;

    let scheduler = MonitoringScheduler::new(
        config.scheduler.clone(),
        chain,
        Arc::clone(&store),
        Arc::new(notifier.clone()),
        Arc::new(StatisticsTracker::new()),
    );

    Ok(App {
        config: config.clone(),
        scheduler,
        store,
        notifier,
    })
}

/// HTTP first, then the render service and the local browser when configured.
pub fn build_chain(config: &ScraperConfig, retry: RetryPolicy) -> Result<FetchStrategyChain> {
    let mut strategies: Vec<Arc<dyn FetchStrategy>> = vec![Arc::new(HttpStrategy::new(config)?)];

    if config.render_service_url.is_some() {
        strategies.push(Arc::new(RenderStrategy::new(config)?));
    }
    if config.browser_enabled {
        strategies.push(Arc::new(BrowserStrategy::new(config)));
    }

    let chain = FetchStrategyChain::new(strategies, retry, ContentHasher::new());
    info!(methods = ?chain.methods(), "Fetch strategy chain ready");
    Ok(chain)
}

pub async fn build_notifier(config: &NotificationsConfig, subscribers: SubscriberDirectory) -> Result<NotifierHub> {
    let hub = NotifierHub::new();
    hub.register(Arc::new(LogNotifier)).await;

    match TelegramNotifier::new(&config.telegram, subscribers) {
        Ok(telegram) => hub.register(Arc::new(telegram)).await,
        Err(NotifyError::NotConfigured(reason)) => info!(%reason, "Telegram notifications disabled"),
        Err(e) => return Err(notification_error("telegram", e)),
    }

    match DiscordNotifier::new(&config.discord) {
        Ok(discord) => hub.register(Arc::new(discord)).await,
        Err(NotifyError::NotConfigured(reason)) => info!(%reason, "Discord notifications disabled"),
        Err(e) => return Err(notification_error("discord", e)),
    }

    info!(sinks = ?hub.list_sinks().await, "Notification sinks registered");
    Ok(hub)
}

/// Writes configured targets into the store. Invalid definitions are reported
/// once and left out; the rest are still monitored.
pub async fn seed_targets(
    store: &dyn TargetStore,
    targets: &[TargetConfig],
    notifier: &dyn NotificationSink,
) -> Result<usize> {
    let mut seeded = 0;
    for definition in targets {
        match MonitoredTarget::from_config(definition) {
            Ok(target) => {
                store.upsert_target(&target).await?;
                seeded += 1;
            }
            Err(AppError::FatalConfig { target, reason }) => {
                error!(target_id = %target, %reason, "Rejected target definition");
                let placeholder = MonitoredTarget::new(target.clone(), definition.url.clone(), None);
                let report = ErrorReport::fatal_config(&target, reason);
                if let Err(e) = notifier.notify_error(&placeholder, &report).await {
                    warn!(target_id = %target, error = %e, "Failed to report rejected target");
                }
            }
            Err(e) => return Err(e),
        }
    }

    info!(seeded, configured = targets.len(), "Seeded targets from configuration");
    Ok(seeded)
}

/// One-off check of a url without touching the store.
pub async fn check_once(config: &AppConfig, url: &str, selector: Option<String>) -> Result<ScrapeOutcome> {
    let definition = TargetConfig {
        id: generate_id(),
        name: None,
        url: url.to_string(),
        selector,
        active: true,
        paused: false,
    };
    let target = MonitoredTarget::from_config(&definition)?;

    let chain = build_chain(&config.scraper, config.retry.policy())?;
    let outcome = chain
        .fetch(&FetchRequest::for_target(&target), &CancellationToken::new())
        .await;
    chain.shutdown().await;
    Ok(outcome)
}

fn notification_error(sink: &str, err: NotifyError) -> AppError {
    AppError::Notification {
        sink: sink.to_string(),
        message: err.to_string(),
    }
}
