// Shared fakes and wiring for the integration suites

pub mod api_tests;
pub mod fetch_chain_tests;
pub mod store_tests;

use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use estate_watcher::config::SchedulerConfig;
use estate_watcher::core::{Confidence, ContentHasher, CycleStatistics, DiffResult, RetryPolicy, StatisticsTracker};
use estate_watcher::models::MonitoredTarget;
use estate_watcher::plugins::{ErrorReport, NotificationSink, NotifyError, Severity};
use estate_watcher::scheduler::MonitoringScheduler;
use estate_watcher::scraper::{
    ErrorKind, FetchError, FetchMethod, FetchRequest, FetchResult, FetchStrategy, FetchStrategyChain, FetchedPage,
};
use estate_watcher::store::MemoryStore;

/// Listing page with the given items inside `#item-list`.
pub fn listing_page(items: &[&str]) -> String {
    let items: String = items.iter().map(|item| format!("<li>{}</li>", item)).collect();
    format!(
        "<html><body><header>Listings</header><ul id=\"item-list\">{}</ul><footer>Rendered at {}</footer></body></html>",
        items,
        chrono::Utc::now().to_rfc3339()
    )
}

#[derive(Debug, Clone)]
pub enum Step {
    Page(String),
    Fail(FetchError),
}

/// Fetch strategy driven by a script. The last step repeats once the script runs out.
/// Every fetch holds a "session" that is released on every exit path, including
/// cancellation and timeouts.
pub struct FakeStrategy {
    method: FetchMethod,
    script: Mutex<VecDeque<Step>>,
    repeat: Mutex<Step>,
    delay: Duration,
    pub calls: AtomicUsize,
    pub opened: AtomicUsize,
    pub closed: AtomicUsize,
    pub open_sessions: Arc<AtomicUsize>,
    pub max_parallel: AtomicUsize,
    pub overlapped: AtomicBool,
    pub started: AtomicUsize,
    pub shut_down: AtomicBool,
    in_progress: Mutex<HashMap<String, usize>>,
}

impl FakeStrategy {
    pub fn new(method: FetchMethod, steps: Vec<Step>) -> Self {
        let repeat = steps
            .last()
            .cloned()
            .unwrap_or_else(|| Step::Fail(FetchError::Network("empty script".into())));
        Self {
            method,
            script: Mutex::new(steps.into()),
            repeat: Mutex::new(repeat),
            delay: Duration::ZERO,
            calls: AtomicUsize::new(0),
            opened: AtomicUsize::new(0),
            closed: AtomicUsize::new(0),
            open_sessions: Arc::new(AtomicUsize::new(0)),
            max_parallel: AtomicUsize::new(0),
            overlapped: AtomicBool::new(false),
            started: AtomicUsize::new(0),
            shut_down: AtomicBool::new(false),
            in_progress: Mutex::new(HashMap::new()),
        }
    }

    pub fn serving(method: FetchMethod, body: impl Into<String>) -> Self {
        Self::new(method, vec![Step::Page(body.into())])
    }

    pub fn failing(method: FetchMethod, error: FetchError) -> Self {
        Self::new(method, vec![Step::Fail(error)])
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn next_step(&self) -> Step {
        let mut script = self.script.lock().unwrap();
        match script.pop_front() {
            Some(step) => {
                *self.repeat.lock().unwrap() = step.clone();
                step
            }
            None => self.repeat.lock().unwrap().clone(),
        }
    }
}

struct Session<'a> {
    strategy: &'a FakeStrategy,
    target_id: String,
}

impl<'a> Session<'a> {
    fn open(strategy: &'a FakeStrategy, target_id: &str) -> Self {
        strategy.opened.fetch_add(1, Ordering::SeqCst);
        let open = strategy.open_sessions.fetch_add(1, Ordering::SeqCst) + 1;
        strategy.max_parallel.fetch_max(open, Ordering::SeqCst);

        let mut in_progress = strategy.in_progress.lock().unwrap();
        let count = in_progress.entry(target_id.to_string()).or_insert(0);
        *count += 1;
        if *count > 1 {
            strategy.overlapped.store(true, Ordering::SeqCst);
        }

        Self {
            strategy,
            target_id: target_id.to_string(),
        }
    }
}

impl Drop for Session<'_> {
    fn drop(&mut self) {
        if let Some(count) = self.strategy.in_progress.lock().unwrap().get_mut(&self.target_id) {
            *count -= 1;
        }
        self.strategy.open_sessions.fetch_sub(1, Ordering::SeqCst);
        self.strategy.closed.fetch_add(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl FetchStrategy for FakeStrategy {
    fn method(&self) -> FetchMethod {
        self.method
    }

    async fn fetch(&self, request: &FetchRequest) -> FetchResult<FetchedPage> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let _session = Session::open(self, &request.target_id);

        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }

        match self.next_step() {
            Step::Page(body) => Ok(FetchedPage {
                body,
                status: Some(200),
                final_url: request.url.clone(),
            }),
            Step::Fail(error) => Err(error),
        }
    }

    async fn start(&self) {
        self.started.fetch_add(1, Ordering::SeqCst);
    }

    async fn shutdown(&self) {
        self.shut_down.store(true, Ordering::SeqCst);
    }
}

struct SessionCount(Arc<AtomicUsize>);

impl Drop for SessionCount {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Fetch whose page work runs on a blocking thread, the way browser automation
/// does. The session is owned by the fetch future, not by the blocking work.
pub struct BlockingStrategy {
    method: FetchMethod,
    work: Duration,
    pub open_sessions: Arc<AtomicUsize>,
    pub blocking_running: Arc<AtomicUsize>,
}

impl BlockingStrategy {
    pub fn new(method: FetchMethod, work: Duration) -> Self {
        Self {
            method,
            work,
            open_sessions: Arc::new(AtomicUsize::new(0)),
            blocking_running: Arc::new(AtomicUsize::new(0)),
        }
    }
}

#[async_trait]
impl FetchStrategy for BlockingStrategy {
    fn method(&self) -> FetchMethod {
        self.method
    }

    async fn fetch(&self, request: &FetchRequest) -> FetchResult<FetchedPage> {
        self.open_sessions.fetch_add(1, Ordering::SeqCst);
        let _session = SessionCount(Arc::clone(&self.open_sessions));

        let running = Arc::clone(&self.blocking_running);
        let work = self.work;
        tokio::task::spawn_blocking(move || {
            running.fetch_add(1, Ordering::SeqCst);
            std::thread::sleep(work);
            running.fetch_sub(1, Ordering::SeqCst);
        })
        .await
        .map_err(|e| FetchError::Network(e.to_string()))?;

        Ok(FetchedPage {
            body: listing_page(&["Flat A"]),
            status: None,
            final_url: request.url.clone(),
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    NewContent {
        target_id: String,
        confidence: Confidence,
        has_new_content: bool,
    },
    Error {
        target_id: String,
        kind: ErrorKind,
        severity: Severity,
        consecutive_failures: u32,
    },
    Report(CycleStatistics),
}

/// Sink that remembers every event. Optionally fails each call after recording
/// it, or takes `delay` before recording.
#[derive(Default)]
pub struct RecordingSink {
    events: Mutex<Vec<Event>>,
    fail: bool,
    delay: Duration,
}

impl RecordingSink {
    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }

    pub fn slow(delay: Duration) -> Self {
        Self {
            delay,
            ..Self::default()
        }
    }

    async fn pause(&self) {
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
    }

    pub fn events(&self) -> Vec<Event> {
        self.events.lock().unwrap().clone()
    }

    pub fn new_content(&self) -> Vec<Event> {
        self.events()
            .into_iter()
            .filter(|e| matches!(e, Event::NewContent { .. }))
            .collect()
    }

    pub fn errors(&self) -> Vec<Event> {
        self.events()
            .into_iter()
            .filter(|e| matches!(e, Event::Error { .. }))
            .collect()
    }

    pub fn reports(&self) -> usize {
        self.events()
            .iter()
            .filter(|e| matches!(e, Event::Report(_)))
            .count()
    }

    fn push(&self, event: Event) -> Result<(), NotifyError> {
        self.events.lock().unwrap().push(event);
        if self.fail {
            return Err(NotifyError::NotConfigured("recording sink set to fail".into()));
        }
        Ok(())
    }
}

#[async_trait]
impl NotificationSink for RecordingSink {
    fn name(&self) -> &str {
        "recording"
    }

    async fn notify_new_content(&self, target: &MonitoredTarget, diff: &DiffResult) -> Result<(), NotifyError> {
        self.pause().await;
        self.push(Event::NewContent {
            target_id: target.id.clone(),
            confidence: diff.confidence,
            has_new_content: diff.has_new_content,
        })
    }

    async fn notify_error(&self, target: &MonitoredTarget, report: &ErrorReport) -> Result<(), NotifyError> {
        self.pause().await;
        self.push(Event::Error {
            target_id: target.id.clone(),
            kind: report.kind,
            severity: report.severity,
            consecutive_failures: report.consecutive_failures,
        })
    }

    async fn notify_periodic_report(&self, statistics: &CycleStatistics) -> Result<(), NotifyError> {
        self.pause().await;
        self.push(Event::Report(statistics.clone()))
    }
}

pub fn scheduler_config() -> SchedulerConfig {
    SchedulerConfig {
        poll_interval_secs: 60,
        tick_interval_secs: 1,
        check_timeout_secs: 30,
        max_concurrent_checks: 4,
        shutdown_grace_secs: 2,
        max_failure_backoff_secs: 600,
        error_escalation_threshold: 3,
        report_interval_secs: None,
        notify_min_confidence: Confidence::Low,
        notify_timeout_secs: 30,
    }
}

pub fn target(id: &str) -> MonitoredTarget {
    MonitoredTarget::new(
        id,
        format!("https://listings.example.com/{}", id),
        Some("#item-list".to_string()),
    )
}

pub struct Harness {
    pub scheduler: MonitoringScheduler,
    pub store: Arc<MemoryStore>,
    pub sink: Arc<RecordingSink>,
    pub statistics: Arc<StatisticsTracker>,
}

pub fn harness(
    config: SchedulerConfig,
    strategies: Vec<Arc<dyn FetchStrategy>>,
    targets: Vec<MonitoredTarget>,
) -> Harness {
    harness_with_sink(config, strategies, targets, Arc::new(RecordingSink::default()))
}

pub fn harness_with_sink(
    config: SchedulerConfig,
    strategies: Vec<Arc<dyn FetchStrategy>>,
    targets: Vec<MonitoredTarget>,
    sink: Arc<RecordingSink>,
) -> Harness {
    let chain = FetchStrategyChain::new(strategies, RetryPolicy::no_retry(), ContentHasher::new());
    let store = Arc::new(MemoryStore::with_targets(targets));
    let statistics = Arc::new(StatisticsTracker::new());
    let scheduler = MonitoringScheduler::new(
        config,
        Arc::new(chain),
        store.clone(),
        sink.clone(),
        statistics.clone(),
    );

    Harness {
        scheduler,
        store,
        sink,
        statistics,
    }
}

/// Successful HTTP outcome for a fixed page, for statistics checks without a fetch.
pub fn fake_success(request: &FetchRequest) -> estate_watcher::scraper::ScrapeOutcome {
    let page = FetchedPage {
        body: listing_page(&["Flat A"]),
        status: Some(200),
        final_url: request.url.clone(),
    };
    let fingerprint = ContentHasher::new().fingerprint(&page.body, None).unwrap();
    estate_watcher::scraper::ScrapeOutcome::succeeded(
        request,
        FetchMethod::Http,
        fingerprint,
        &page,
        Duration::from_millis(80),
        page.body.len() as u64,
        1,
    )
}
