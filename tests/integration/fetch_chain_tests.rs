use super::*;
use estate_watcher::config::ScraperConfig;
use estate_watcher::core::DiffDetector;
use estate_watcher::scraper::{HttpStrategy, RenderStrategy};
use tokio_util::sync::CancellationToken;
use wiremock::matchers::{body_json, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn scraper_config(render_service_url: Option<String>) -> ScraperConfig {
    ScraperConfig {
        request_timeout: 5,
        render_service_url,
        browser_enabled: false,
        ..ScraperConfig::default()
    }
}

fn quick_retries(max_retries: u32) -> RetryPolicy {
    RetryPolicy::new(
        max_retries,
        Duration::from_millis(10),
        Duration::from_millis(40),
        2.0,
    )
}

#[tokio::test]
async fn test_http_changes_are_very_high_confidence() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/rent"))
        .respond_with(ResponseTemplate::new(200).set_body_string(listing_page(&["Flat A"])))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/rent"))
        .respond_with(ResponseTemplate::new(200).set_body_string(listing_page(&["Flat A", "Flat B"])))
        .mount(&server)
        .await;

    let http = HttpStrategy::new(&scraper_config(None)).unwrap();
    let chain = FetchStrategyChain::new(vec![Arc::new(http)], quick_retries(1), ContentHasher::new());
    let request = FetchRequest::new(format!("{}/rent", server.uri()), Some("#item-list".to_string()));
    let cancel = CancellationToken::new();

    let first = chain.fetch(&request, &cancel).await;
    let second = chain.fetch(&request, &cancel).await;
    assert!(first.success && second.success);
    assert_eq!(first.method, FetchMethod::Http);
    assert_eq!(second.method, FetchMethod::Http);

    let baseline = DiffDetector::compare(None, first.fingerprint.as_ref().unwrap(), first.method);
    assert!(!baseline.has_new_content);
    assert_eq!(baseline.confidence, Confidence::High);

    let diff = DiffDetector::compare(first.fingerprint.as_ref(), second.fingerprint.as_ref().unwrap(), second.method);
    assert!(diff.has_new_content);
    assert_eq!(diff.confidence, Confidence::VeryHigh);
}

#[tokio::test]
async fn test_server_errors_are_retried_within_bound() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(503))
        .expect(3)
        .mount(&server)
        .await;

    let http = HttpStrategy::new(&scraper_config(None)).unwrap();
    let chain = FetchStrategyChain::new(vec![Arc::new(http)], quick_retries(2), ContentHasher::new());
    let request = FetchRequest::new(format!("{}/rent", server.uri()), None);

    let outcome = chain.fetch(&request, &CancellationToken::new()).await;

    assert!(!outcome.success);
    assert_eq!(outcome.attempts, 3);
    assert_eq!(outcome.error_kind, Some(ErrorKind::Network));
}

#[tokio::test]
async fn test_rate_limit_is_retried_then_succeeds() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(429))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_string(listing_page(&["Flat A"])))
        .mount(&server)
        .await;

    let http = HttpStrategy::new(&scraper_config(None)).unwrap();
    let chain = FetchStrategyChain::new(vec![Arc::new(http)], quick_retries(3), ContentHasher::new());
    let request = FetchRequest::new(format!("{}/rent", server.uri()), Some("#item-list".to_string()));

    let outcome = chain.fetch(&request, &CancellationToken::new()).await;

    assert!(outcome.success);
    assert_eq!(outcome.attempts, 2);
}

#[tokio::test]
async fn test_escalation_runs_http_then_render_then_browser() {
    let site = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/rent"))
        .respond_with(ResponseTemplate::new(403))
        .expect(1)
        .mount(&site)
        .await;

    // The render service answers, but the listing container is rendered later.
    let render = MockServer::start().await;
    let target_url = format!("{}/rent", site.uri());
    Mock::given(method("POST"))
        .and(path("/content"))
        .and(body_json(serde_json::json!({ "url": target_url })))
        .respond_with(ResponseTemplate::new(200).set_body_string("<html><body><div id=\"app\"></div></body></html>"))
        .expect(1)
        .mount(&render)
        .await;

    let config = scraper_config(Some(render.uri()));
    let browser = Arc::new(FakeStrategy::serving(
        FetchMethod::BrowserFallback,
        listing_page(&["Flat A"]),
    ));
    let chain = FetchStrategyChain::new(
        vec![
            Arc::new(HttpStrategy::new(&config).unwrap()),
            Arc::new(RenderStrategy::new(&config).unwrap()),
            browser.clone(),
        ],
        quick_retries(2),
        ContentHasher::new(),
    );
    let request = FetchRequest::new(target_url.clone(), Some("#item-list".to_string()));

    let outcome = chain.fetch(&request, &CancellationToken::new()).await;

    assert!(outcome.success);
    assert_eq!(outcome.method, FetchMethod::BrowserFallback);
    assert_eq!(outcome.attempts, 3);
    assert_eq!(browser.calls(), 1);
    assert_eq!(browser.open_sessions.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_browser_is_not_reached_when_render_succeeds() {
    let site = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_string(
            "<html><body><p>Please enable JavaScript</p><div id=\"app\"></div></body></html>",
        ))
        .mount(&site)
        .await;

    let render = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/content"))
        .respond_with(ResponseTemplate::new(200).set_body_string(listing_page(&["Flat A"])))
        .mount(&render)
        .await;

    let config = scraper_config(Some(render.uri()));
    let browser = Arc::new(FakeStrategy::serving(FetchMethod::BrowserFallback, listing_page(&["Flat A"])));
    let chain = FetchStrategyChain::new(
        vec![
            Arc::new(HttpStrategy::new(&config).unwrap()),
            Arc::new(RenderStrategy::new(&config).unwrap()),
            browser.clone(),
        ],
        quick_retries(1),
        ContentHasher::new(),
    );
    let request = FetchRequest::new(format!("{}/rent", site.uri()), Some("#item-list".to_string()));

    let outcome = chain.fetch(&request, &CancellationToken::new()).await;

    assert!(outcome.success);
    assert_eq!(outcome.method, FetchMethod::DomFallback);
    assert_eq!(browser.calls(), 0);
}

#[tokio::test]
async fn test_exhausted_chain_reports_last_strategy() {
    let site = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&site)
        .await;

    let browser = Arc::new(FakeStrategy::failing(
        FetchMethod::BrowserFallback,
        FetchError::BotDetected {
            marker: "captcha".into(),
        },
    ));
    let chain = FetchStrategyChain::new(
        vec![Arc::new(HttpStrategy::new(&scraper_config(None)).unwrap()), browser.clone()],
        quick_retries(1),
        ContentHasher::new(),
    );
    let request = FetchRequest::new(format!("{}/rent", site.uri()), None);

    let outcome = chain.fetch(&request, &CancellationToken::new()).await;

    assert!(!outcome.success);
    assert_eq!(outcome.method, FetchMethod::BrowserFallback);
    assert_eq!(outcome.error_kind, Some(ErrorKind::BotDetected));
    // Two HTTP attempts, then one browser attempt without a local retry.
    assert_eq!(outcome.attempts, 3);
    assert_eq!(browser.calls(), 1);
}
