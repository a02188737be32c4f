use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, OwnedSemaphorePermit, RwLock, Semaphore};
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::{interval, interval_at, Instant, Interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::SchedulerConfig;
use crate::core::diff::{DiffDetector, DiffResult, NotifyPolicy};
use crate::core::hasher::ContentHasher;
use crate::core::stats::{self, CycleStatistics, StatisticsTracker};
use crate::models::MonitoredTarget;
use crate::plugins::{ErrorReport, NotificationSink, NotifyError};
use crate::scraper::{ErrorKind, FetchRequest, FetchStrategyChain, ScrapeOutcome};
use crate::store::TargetStore;
use crate::utils::error::{AppError, Result};

/// Part of the shutdown grace kept for cancelled checks to unwind before they are aborted.
const CANCEL_SETTLE: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TargetPhase {
    Idle,
    Checking,
    NotifyPending,
    Failed,
    BackoffWait,
}

/// Scheduler view of one target.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TargetStatus {
    #[serde(flatten)]
    pub target: MonitoredTarget,
    pub phase: TargetPhase,
    pub consecutive_failures: u32,
    pub fatal_error: Option<String>,
    pub success_rate: f64,
}

struct TargetEntry {
    target: MonitoredTarget,
    phase: TargetPhase,
    next_due: Instant,
    consecutive_failures: u32,
    fatal_error: Option<String>,
}

impl TargetEntry {
    fn new(target: MonitoredTarget, now: Instant) -> Self {
        Self {
            target,
            phase: TargetPhase::Idle,
            next_due: now,
            consecutive_failures: 0,
            fatal_error: None,
        }
    }

    fn is_due(&self, now: Instant) -> bool {
        self.target.is_monitoring_enabled()
            && self.fatal_error.is_none()
            && matches!(self.phase, TargetPhase::Idle | TargetPhase::BackoffWait)
            && self.next_due <= now
    }

    fn status(&self) -> TargetStatus {
        TargetStatus {
            target: self.target.clone(),
            phase: self.phase,
            consecutive_failures: self.consecutive_failures,
            fatal_error: self.fatal_error.clone(),
            success_rate: stats::success_rate(self.target.total_checks, self.target.error_count),
        }
    }
}

/// Handles of one `start`..`stop` run.
struct RunHandle {
    stop_ticking: CancellationToken,
    cancel_checks: CancellationToken,
    tick_loop: JoinHandle<()>,
}

enum Followup {
    None,
    NewContent(DiffResult),
    Error(ErrorReport),
}

struct Inner {
    config: SchedulerConfig,
    chain: Arc<FetchStrategyChain>,
    store: Arc<dyn TargetStore>,
    notifier: Arc<dyn NotificationSink>,
    statistics: Arc<StatisticsTracker>,
    policy: NotifyPolicy,
    registry: RwLock<HashMap<String, TargetEntry>>,
    in_flight: std::sync::Mutex<HashSet<String>>,
    permits: Arc<Semaphore>,
    tasks: Mutex<JoinSet<()>>,
    run: Mutex<Option<RunHandle>>,
    running: AtomicBool,
    /// Serializes store writes so the last write always carries the latest registry state.
    save_lock: Mutex<()>,
}

/// Held for the whole of one check. Dropping it frees the target for the next one.
struct InFlightGuard {
    inner: Arc<Inner>,
    target_id: String,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        if let Ok(mut in_flight) = self.inner.in_flight.lock() {
            in_flight.remove(&self.target_id);
        }
    }
}

/// Polls every enabled target on its own cadence with bounded concurrency.
#[derive(Clone)]
pub struct MonitoringScheduler {
    inner: Arc<Inner>,
}

impl MonitoringScheduler {
    pub fn new(
        config: SchedulerConfig,
        chain: Arc<FetchStrategyChain>,
        store: Arc<dyn TargetStore>,
        notifier: Arc<dyn NotificationSink>,
        statistics: Arc<StatisticsTracker>,
    ) -> Self {
        let permits = Arc::new(Semaphore::new(config.max_concurrent_checks.max(1)));
        let policy = NotifyPolicy::new(config.notify_min_confidence);

        Self {
            inner: Arc::new(Inner {
                config,
                chain,
                store,
                notifier,
                statistics,
                policy,
                registry: RwLock::new(HashMap::new()),
                in_flight: std::sync::Mutex::new(HashSet::new()),
                permits,
                tasks: Mutex::new(JoinSet::new()),
                run: Mutex::new(None),
                running: AtomicBool::new(false),
                save_lock: Mutex::new(()),
            }),
        }
    }

    pub fn is_running(&self) -> bool {
        self.inner.running.load(Ordering::SeqCst)
    }

    /// Loads targets from the store and starts the tick loop.
    pub async fn start(&self) -> Result<()> {
        let mut run = self.inner.run.lock().await;
        if run.is_some() {
            return Err(AppError::Scheduler("Scheduler is already running".to_string()));
        }

        let targets = self.inner.store.load_targets().await?;
        let now = Instant::now();
        let mut rejected = Vec::new();
        {
            let mut registry = self.inner.registry.write().await;
            registry.clear();
            for target in targets {
                let mut entry = TargetEntry::new(target, now);
                if let Some(reason) = invalid_definition(&entry.target) {
                    entry.fatal_error = Some(reason.clone());
                    rejected.push((entry.target.clone(), reason));
                }
                registry.insert(entry.target.id.clone(), entry);
            }
            info!(
                targets = registry.len(),
                enabled = registry.values().filter(|e| e.target.is_monitoring_enabled()).count(),
                "Loaded monitored targets"
            );
        }

        for (target, reason) in rejected {
            error!(target_id = %target.id, %reason, "Skipping misconfigured target");
            let report = ErrorReport::fatal_config(&target.id, reason);
            self.inner
                .deliver(&target.id, "misconfiguration", self.inner.notifier.notify_error(&target, &report))
                .await;
        }

        self.inner.chain.start().await;

        let stop_ticking = CancellationToken::new();
        let cancel_checks = CancellationToken::new();
        let tick_loop = tokio::spawn(Inner::tick_loop(
            Arc::clone(&self.inner),
            stop_ticking.clone(),
            cancel_checks.clone(),
        ));

        *run = Some(RunHandle {
            stop_ticking,
            cancel_checks,
            tick_loop,
        });
        self.inner.running.store(true, Ordering::SeqCst);

        info!(
            tick_interval_secs = self.inner.config.tick_interval_secs,
            poll_interval_secs = self.inner.config.poll_interval_secs,
            max_concurrent_checks = self.inner.config.max_concurrent_checks,
            "Monitoring scheduler started"
        );
        Ok(())
    }

    /// Stops ticking, lets in-flight checks finish within the grace period,
    /// cancels and aborts whatever is left, then releases fetch resources.
    pub async fn stop(&self) -> Result<()> {
        let Some(run) = self.inner.run.lock().await.take() else {
            return Ok(());
        };
        self.inner.running.store(false, Ordering::SeqCst);

        run.stop_ticking.cancel();
        if let Err(e) = run.tick_loop.await {
            warn!(error = %e, "Tick loop ended abnormally");
        }

        let grace = self.inner.config.shutdown_grace();
        let settle = CANCEL_SETTLE.min(grace / 2);
        let mut tasks = self.inner.tasks.lock().await;
        if tokio::time::timeout(grace - settle, drain(&mut tasks)).await.is_err() {
            warn!(
                remaining = tasks.len(),
                grace_secs = grace.as_secs(),
                "Checks still running near the end of the grace period, cancelling"
            );
            run.cancel_checks.cancel();
            if tokio::time::timeout(settle, drain(&mut tasks)).await.is_err() {
                tasks.abort_all();
                drain(&mut tasks).await;
            }
        }
        run.cancel_checks.cancel();
        drop(tasks);

        self.inner.chain.shutdown().await;
        info!("Monitoring scheduler stopped");
        Ok(())
    }

    /// Checks one target immediately, outside its schedule.
    pub async fn run_check_now(&self, target_id: &str) -> Result<ScrapeOutcome> {
        {
            let registry = self.inner.registry.read().await;
            let entry = registry.get(target_id).ok_or_else(|| not_found(target_id))?;
            if let Some(reason) = &entry.fatal_error {
                return Err(AppError::FatalConfig {
                    target: target_id.to_string(),
                    reason: reason.clone(),
                });
            }
            if !entry.target.is_monitoring_enabled() {
                return Err(AppError::Validation(format!(
                    "Monitoring is disabled for target: {}",
                    target_id
                )));
            }
        }

        let guard = self.inner.claim(target_id).ok_or_else(|| AppError::AlreadyRunning {
            target: target_id.to_string(),
        })?;
        let permit = Arc::clone(&self.inner.permits)
            .acquire_owned()
            .await
            .map_err(|_| AppError::Scheduler("Scheduler is shutting down".to_string()))?;
        let cancel = match self.inner.run.lock().await.as_ref() {
            Some(run) => run.cancel_checks.clone(),
            None => CancellationToken::new(),
        };

        info!(target_id, "Running immediate check");
        Inner::run_cycle(Arc::clone(&self.inner), guard, permit, cancel)
            .await
            .ok_or_else(|| not_found(target_id))
    }

    pub async fn set_paused(&self, target_id: &str, paused: bool) -> Result<TargetStatus> {
        let status = {
            let mut registry = self.inner.registry.write().await;
            let entry = registry.get_mut(target_id).ok_or_else(|| not_found(target_id))?;
            entry.target.paused = paused;
            if !paused {
                entry.next_due = Instant::now();
            }
            entry.status()
        };

        self.inner.persist(target_id).await?;
        info!(target_id, paused, "Updated monitoring flag");
        Ok(status)
    }

    pub async fn targets(&self) -> Vec<TargetStatus> {
        let registry = self.inner.registry.read().await;
        let mut statuses: Vec<TargetStatus> = registry.values().map(TargetEntry::status).collect();
        statuses.sort_by(|a, b| a.target.id.cmp(&b.target.id));
        statuses
    }

    pub async fn target(&self, target_id: &str) -> Option<TargetStatus> {
        let registry = self.inner.registry.read().await;
        registry.get(target_id).map(TargetEntry::status)
    }

    pub async fn phase(&self, target_id: &str) -> Option<TargetPhase> {
        let registry = self.inner.registry.read().await;
        registry.get(target_id).map(|e| e.phase)
    }

    pub fn statistics(&self) -> CycleStatistics {
        self.inner.statistics.snapshot()
    }

    pub fn in_flight(&self) -> usize {
        self.inner.in_flight.lock().map(|s| s.len()).unwrap_or_default()
    }
}

impl Inner {
    async fn tick_loop(self: Arc<Self>, stop_ticking: CancellationToken, cancel_checks: CancellationToken) {
        let mut ticker = interval(self.config.tick_interval());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut report = self.config.report_interval().map(|period| {
            let mut report = interval_at(Instant::now() + period, period);
            report.set_missed_tick_behavior(MissedTickBehavior::Delay);
            report
        });

        loop {
            tokio::select! {
                biased;
                _ = stop_ticking.cancelled() => break,
                _ = ticker.tick() => self.dispatch_due(&cancel_checks).await,
                _ = next_tick(&mut report) => self.spawn_report().await,
            }
        }
        debug!("Tick loop stopped");
    }

    /// Starts a check for every due target while permits last. Never waits on a check.
    async fn dispatch_due(self: &Arc<Self>, cancel: &CancellationToken) {
        let mut tasks = self.tasks.lock().await;
        while let Some(finished) = tasks.try_join_next() {
            if let Err(e) = finished {
                error!(error = %e, "Check task panicked");
            }
        }

        let now = Instant::now();
        let due: Vec<String> = {
            let registry = self.registry.read().await;
            let mut due: Vec<(&String, Instant)> = registry
                .iter()
                .filter(|(_, entry)| entry.is_due(now))
                .map(|(id, entry)| (id, entry.next_due))
                .collect();
            due.sort_by_key(|(_, next_due)| *next_due);
            due.into_iter().map(|(id, _)| id.clone()).collect()
        };

        let mut dispatched = 0;
        for target_id in &due {
            let Ok(permit) = Arc::clone(&self.permits).try_acquire_owned() else {
                debug!(deferred = due.len() - dispatched, "Concurrency limit reached");
                break;
            };
            let Some(guard) = self.claim(target_id) else {
                continue;
            };
            let inner = Arc::clone(self);
            let cancel = cancel.clone();
            tasks.spawn(async move {
                Inner::run_cycle(inner, guard, permit, cancel).await;
            });
            dispatched += 1;
        }

        if dispatched > 0 {
            debug!(dispatched, in_flight = tasks.len(), "Dispatched due targets");
        }
    }

    async fn spawn_report(self: &Arc<Self>) {
        let inner = Arc::clone(self);
        let mut tasks = self.tasks.lock().await;
        tasks.spawn(async move {
            let statistics = inner.statistics.snapshot();
            inner
                .deliver("*", "periodic report", inner.notifier.notify_periodic_report(&statistics))
                .await;
        });
    }

    fn claim(self: &Arc<Self>, target_id: &str) -> Option<InFlightGuard> {
        let mut in_flight = self.in_flight.lock().ok()?;
        if !in_flight.insert(target_id.to_string()) {
            return None;
        }
        Some(InFlightGuard {
            inner: Arc::clone(self),
            target_id: target_id.to_string(),
        })
    }

    /// Fetch, diff, record, notify and persist one target.
    async fn run_cycle(
        self: Arc<Self>,
        guard: InFlightGuard,
        permit: OwnedSemaphorePermit,
        cancel: CancellationToken,
    ) -> Option<ScrapeOutcome> {
        let target_id = guard.target_id.clone();
        let request = {
            let mut registry = self.registry.write().await;
            let entry = registry.get_mut(&target_id)?;
            entry.phase = TargetPhase::Checking;
            FetchRequest::for_target(&entry.target)
        };

        let outcome = self
            .chain
            .fetch_within(&request, &cancel, self.config.check_timeout())
            .await;
        if outcome.error_kind == Some(ErrorKind::Timeout) {
            warn!(target_id = %target_id, method = %outcome.method, "Check timed out");
        }

        let (snapshot, followup) = {
            let mut registry = self.registry.write().await;
            let entry = registry.get_mut(&target_id)?;
            let followup = self.apply_outcome(entry, &outcome);
            (entry.target.clone(), followup)
        };
        // Fetching is over; the slot goes to the next due target.
        drop(permit);

        if outcome.error_kind == Some(ErrorKind::Cancelled) {
            return Some(outcome);
        }

        match &followup {
            Followup::NewContent(diff) => {
                info!(
                    target_id = %target_id,
                    confidence = %diff.confidence,
                    method = %diff.method,
                    "New content detected"
                );
                self.deliver(&target_id, "new content", self.notifier.notify_new_content(&snapshot, diff))
                    .await;
            }
            Followup::Error(report) => {
                self.deliver(&target_id, "error", self.notifier.notify_error(&snapshot, report))
                    .await;
            }
            Followup::None => {}
        }

        if let Some(entry) = self.registry.write().await.get_mut(&target_id) {
            entry.phase = match entry.phase {
                TargetPhase::NotifyPending => TargetPhase::Idle,
                TargetPhase::Failed => TargetPhase::BackoffWait,
                phase => phase,
            };
        }

        if let Err(e) = self.persist(&target_id).await {
            warn!(target_id = %target_id, error = %e, "Failed to persist target state");
        }

        drop(guard);
        Some(outcome)
    }

    /// Awaits one sink call for at most the notification timeout. Failures are logged only.
    async fn deliver<F>(&self, target_id: &str, notification: &str, send: F)
    where
        F: Future<Output = std::result::Result<(), NotifyError>>,
    {
        let limit = self.config.notify_timeout();
        match tokio::time::timeout(limit, send).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                warn!(target_id, notification, error = %e, "Failed to send notification");
            }
            Err(_) => {
                warn!(
                    target_id,
                    notification,
                    timeout_secs = limit.as_secs(),
                    "Notification timed out"
                );
            }
        }
    }

    /// Writes the current registry copy of a target to the store.
    async fn persist(&self, target_id: &str) -> Result<()> {
        let _saving = self.save_lock.lock().await;
        let current = {
            let registry = self.registry.read().await;
            registry.get(target_id).map(|entry| entry.target.clone())
        };
        match current {
            Some(target) => self.store.save_target_state(&target).await,
            None => Ok(()),
        }
    }

    /// Applies an outcome to the registry entry and decides what to tell the sink.
    fn apply_outcome(&self, entry: &mut TargetEntry, outcome: &ScrapeOutcome) -> Followup {
        let now = Instant::now();

        // Cancellation belongs to shutdown, not to the target.
        if outcome.error_kind == Some(ErrorKind::Cancelled) {
            entry.phase = TargetPhase::Idle;
            entry.next_due = now;
            return Followup::None;
        }

        let diff = outcome.fingerprint.as_ref().map(|current| {
            DiffDetector::compare(entry.target.last_fingerprint.as_ref(), current, outcome.method)
        });
        self.statistics.record(&mut entry.target, outcome, diff.as_ref());

        if outcome.success {
            entry.consecutive_failures = 0;
            entry.next_due = now + self.config.poll_interval();
            return match diff {
                Some(diff) if self.policy.should_notify(&diff) => {
                    entry.phase = TargetPhase::NotifyPending;
                    Followup::NewContent(diff)
                }
                Some(diff) => {
                    if diff.has_new_content {
                        info!(
                            target_id = %entry.target.id,
                            confidence = %diff.confidence,
                            "Change below notification confidence"
                        );
                    }
                    entry.phase = TargetPhase::Idle;
                    Followup::None
                }
                None => {
                    entry.phase = TargetPhase::Idle;
                    Followup::None
                }
            };
        }

        entry.consecutive_failures = entry.consecutive_failures.saturating_add(1);
        entry.phase = TargetPhase::Failed;
        let backoff = self
            .config
            .failure_backoff()
            .next_delay(entry.consecutive_failures - 1);
        entry.next_due = now + backoff;

        if outcome.error_kind == Some(ErrorKind::FatalConfig) {
            entry.fatal_error = outcome.error.clone();
        }

        warn!(
            target_id = %entry.target.id,
            kind = ?outcome.error_kind,
            consecutive_failures = entry.consecutive_failures,
            backoff_secs = backoff.as_secs(),
            "Check failed"
        );

        Followup::Error(ErrorReport::from_outcome(
            outcome,
            entry.consecutive_failures,
            self.config.error_escalation_threshold,
        ))
    }
}

/// Reason a stored target can never be checked, if any.
fn invalid_definition(target: &MonitoredTarget) -> Option<String> {
    if url::Url::parse(&target.url).is_err() {
        return Some(format!("Invalid url: {}", target.url));
    }
    let selector = target.selector.as_deref()?;
    ContentHasher::parse_selector(selector).err().map(|e| e.to_string())
}

fn not_found(target_id: &str) -> AppError {
    AppError::NotFound {
        resource: format!("target {}", target_id),
    }
}

async fn next_tick(interval: &mut Option<Interval>) {
    match interval {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending().await,
    }
}

async fn drain(tasks: &mut JoinSet<()>) {
    while let Some(finished) = tasks.join_next().await {
        if let Err(e) = finished {
            if !e.is_cancelled() {
                error!(error = %e, "Check task panicked");
            }
        }
    }
}
