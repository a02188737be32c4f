use async_trait::async_trait;
use headless_chrome::{Browser, LaunchOptions, Tab};
use std::ffi::OsStr;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::time::timeout;
use tracing::{debug, info, warn};

use super::error::{FetchError, FetchResult};
use super::{FetchMethod, FetchRequest, FetchStrategy, FetchedPage};
use crate::config::ScraperConfig;

/// Rough resident cost of one Chrome tab, used for outcome memory estimates.
const TAB_MEMORY_ESTIMATE: u64 = 96 * 1024 * 1024;

const CHROME_ARGS: &[&str] = &[
    "--no-sandbox",
    "--disable-dev-shm-usage",
    "--disable-gpu",
    "--disable-extensions",
    "--disable-background-timer-throttling",
    "--disable-backgrounding-occluded-windows",
    "--disable-renderer-backgrounding",
];

/// Lazily launched Chrome instances, each checked out by one fetch at a time.
pub struct BrowserPool {
    config: ScraperConfig,
    size: usize,
    permits: Arc<Semaphore>,
    idle: Mutex<Vec<Browser>>,
    launched: AtomicUsize,
    open_sessions: Arc<AtomicUsize>,
    closed: AtomicBool,
}

/// Exclusive use of one pooled browser. The browser goes back to the pool on drop.
pub struct BrowserLease {
    browser: Option<Browser>,
    pool: Arc<BrowserPool>,
    _permit: OwnedSemaphorePermit,
}

/// An open tab, owned by the fetch future. Dropping it closes the tab and hands
/// the browser back, even while a blocking call is still using the tab.
struct TabSession {
    tab: Arc<Tab>,
    open_sessions: Arc<AtomicUsize>,
    _lease: BrowserLease,
}

impl BrowserPool {
    pub fn new(config: ScraperConfig) -> Self {
        let size = config.browser_pool_size.max(1);
        Self {
            config,
            size,
            permits: Arc::new(Semaphore::new(size)),
            idle: Mutex::new(Vec::new()),
            launched: AtomicUsize::new(0),
            open_sessions: Arc::new(AtomicUsize::new(0)),
            closed: AtomicBool::new(false),
        }
    }

    /// Tabs currently open across all browsers.
    pub fn open_sessions(&self) -> usize {
        self.open_sessions.load(Ordering::SeqCst)
    }

    /// Browser processes currently alive.
    pub fn launched(&self) -> usize {
        self.launched.load(Ordering::SeqCst)
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Leases still checked out.
    pub fn outstanding(&self) -> usize {
        self.size.saturating_sub(self.permits.available_permits())
    }

    pub async fn checkout(self: &Arc<Self>) -> FetchResult<BrowserLease> {
        if self.is_closed() {
            return Err(pool_closed());
        }

        let permit = self.permits.clone().acquire_owned().await.map_err(|_| pool_closed())?;
        if self.is_closed() {
            return Err(pool_closed());
        }

        let idle = self.idle.lock().ok().and_then(|mut idle| idle.pop());
        let browser = match idle {
            Some(browser) => browser,
            None => {
                let config = self.config.clone();
                let browser = tokio::task::spawn_blocking(move || launch_browser(&config))
                    .await
                    .map_err(|e| FetchError::Network(format!("Browser launch task failed: {}", e)))??;
                let total = self.launched.fetch_add(1, Ordering::SeqCst) + 1;
                info!(total, "Launched browser instance");
                browser
            }
        };

        Ok(BrowserLease {
            browser: Some(browser),
            pool: Arc::clone(self),
            _permit: permit,
        })
    }

    /// Lends browsers again after `shutdown`.
    pub fn reopen(&self) {
        if self.closed.swap(false, Ordering::SeqCst) {
            info!("Browser pool reopened");
        }
    }

    /// Stops lending browsers, waits up to `wait` for outstanding leases to come
    /// back, then kills every idle browser. Leases returned later are killed on return.
    pub async fn shutdown(&self, wait: Duration) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }

        let size = u32::try_from(self.size).unwrap_or(u32::MAX);
        if !matches!(timeout(wait, self.permits.acquire_many(size)).await, Ok(Ok(_))) {
            warn!(
                outstanding = self.outstanding(),
                wait_secs = wait.as_secs(),
                "Browser leases still out after shutdown wait"
            );
        }

        let drained: Vec<Browser> = match self.idle.lock() {
            Ok(mut idle) => idle.drain(..).collect(),
            Err(_) => Vec::new(),
        };
        let count = drained.len();
        drop(drained);
        self.launched.fetch_sub(count, Ordering::SeqCst);

        info!(closed = count, open_sessions = self.open_sessions(), "Browser pool shut down");
    }

    fn give_back(&self, browser: Browser) {
        if self.is_closed() {
            drop(browser);
            self.launched.fetch_sub(1, Ordering::SeqCst);
            return;
        }
        if let Ok(mut idle) = self.idle.lock() {
            idle.push(browser);
        }
    }
}

impl BrowserLease {
    fn browser(&self) -> Option<&Browser> {
        self.browser.as_ref()
    }
}

impl Drop for BrowserLease {
    fn drop(&mut self) {
        if let Some(browser) = self.browser.take() {
            self.pool.give_back(browser);
        }
    }
}

impl TabSession {
    fn open(lease: BrowserLease, open_sessions: Arc<AtomicUsize>) -> FetchResult<Self> {
        let browser = lease
            .browser()
            .ok_or_else(|| FetchError::Network("Browser lease is empty".to_string()))?;
        let tab = browser
            .new_tab()
            .map_err(|e| classify(format!("Failed to create tab: {}", e)))?;
        open_sessions.fetch_add(1, Ordering::SeqCst);
        Ok(Self {
            tab,
            open_sessions,
            _lease: lease,
        })
    }
}

impl Drop for TabSession {
    fn drop(&mut self) {
        // Closing the target also fails any navigation wait still running on it.
        if let Err(e) = self.tab.close(false) {
            warn!(error = %e, "Failed to close browser tab");
        }
        self.open_sessions.fetch_sub(1, Ordering::SeqCst);
    }
}

fn pool_closed() -> FetchError {
    FetchError::Network("Browser pool is shut down".to_string())
}

fn task_failed(e: tokio::task::JoinError) -> FetchError {
    FetchError::Network(format!("Browser task failed: {}", e))
}

fn launch_browser(config: &ScraperConfig) -> FetchResult<Browser> {
    let mut launch_options = LaunchOptions::default_builder()
        .headless(true)
        .sandbox(false)
        .args(CHROME_ARGS.iter().map(OsStr::new).collect())
        .idle_browser_timeout(Duration::from_secs(config.request_timeout.max(30) * 4))
        .build()
        .map_err(|e| FetchError::Network(format!("Failed to create launch options: {}", e)))?;

    if let Some(chrome_path) = &config.chrome_path {
        launch_options.path = Some(PathBuf::from(chrome_path));
    }

    Browser::new(launch_options).map_err(|e| FetchError::Network(format!("Failed to launch browser: {}", e)))
}

/// headless_chrome reports everything through `anyhow`; timeouts are told apart by message.
fn classify(message: String) -> FetchError {
    let lowered = message.to_lowercase();
    if lowered.contains("timeout") || lowered.contains("timed out") {
        FetchError::Timeout(message)
    } else {
        FetchError::Network(message)
    }
}

fn render_page(tab: &Tab, url: &str, user_agent: &str, timeout: Duration) -> FetchResult<FetchedPage> {
    tab.set_default_timeout(timeout);
    tab.set_user_agent(user_agent, None, None)
        .map_err(|e| classify(format!("Failed to set user agent: {}", e)))?;
    tab.navigate_to(url)
        .map_err(|e| classify(format!("Navigation failed: {}", e)))?;
    tab.wait_until_navigated()
        .map_err(|e| classify(format!("Page load failed: {}", e)))?;

    let body = tab
        .get_content()
        .map_err(|e| classify(format!("Failed to get page content: {}", e)))?;
    let final_url = match tab.get_url() {
        u if u.is_empty() => url.to_string(),
        u => u,
    };

    Ok(FetchedPage {
        body,
        status: None,
        final_url,
    })
}

/// Full browser automation. Last resort for script-heavy or guarded pages.
pub struct BrowserStrategy {
    pool: Arc<BrowserPool>,
    user_agent: String,
    timeout: Duration,
}

impl BrowserStrategy {
    pub fn new(config: &ScraperConfig) -> Self {
        Self::with_pool(Arc::new(BrowserPool::new(config.clone())), config)
    }

    pub fn with_pool(pool: Arc<BrowserPool>, config: &ScraperConfig) -> Self {
        Self {
            pool,
            user_agent: config.user_agent.clone(),
            timeout: Duration::from_secs(config.request_timeout),
        }
    }

    pub fn pool(&self) -> &Arc<BrowserPool> {
        &self.pool
    }
}

#[async_trait]
impl FetchStrategy for BrowserStrategy {
    fn method(&self) -> FetchMethod {
        FetchMethod::BrowserFallback
    }

    async fn fetch(&self, request: &FetchRequest) -> FetchResult<FetchedPage> {
        let lease = self.pool.checkout().await?;
        let open_sessions = Arc::clone(&self.pool.open_sessions);
        let session = tokio::task::spawn_blocking(move || TabSession::open(lease, open_sessions))
            .await
            .map_err(task_failed)??;

        // Only the tab handle crosses into the blocking task. The session stays
        // with this future, so a timeout or cancellation closes the tab at once.
        let tab = Arc::clone(&session.tab);
        let url = request.url.clone();
        let user_agent = self.user_agent.clone();
        let timeout = self.timeout;
        let page = tokio::task::spawn_blocking(move || render_page(&tab, &url, &user_agent, timeout))
            .await
            .map_err(task_failed)??;
        drop(session);

        debug!(target_id = %request.target_id, bytes = page.body.len(), "Browser fetch completed");
        Ok(page)
    }

    fn memory_overhead_bytes(&self) -> u64 {
        TAB_MEMORY_ESTIMATE
    }

    async fn start(&self) {
        self.pool.reopen();
    }

    async fn shutdown(&self) {
        self.pool.shutdown(self.timeout).await;
    }
}
