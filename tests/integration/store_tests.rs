use super::*;
use estate_watcher::app::seed_targets;
use estate_watcher::config::{DatabaseConfig, TargetConfig};
use estate_watcher::plugins::NotifierHub;
use estate_watcher::store::{SqliteStore, TargetStore};
use tempfile::TempDir;

async fn sqlite_store(dir: &TempDir) -> Arc<SqliteStore> {
    let config = DatabaseConfig {
        url: format!("sqlite://{}?mode=rwc", dir.path().join("estate.db").display()),
        max_connections: 2,
    };
    Arc::new(SqliteStore::connect(&config).await.unwrap())
}

fn definition(id: &str, url: &str, selector: Option<&str>) -> TargetConfig {
    TargetConfig {
        id: id.to_string(),
        name: Some(format!("Listings {}", id)),
        url: url.to_string(),
        selector: selector.map(str::to_string),
        active: true,
        paused: false,
    }
}

fn scheduler_over(
    store: Arc<SqliteStore>,
    strategy: Arc<FakeStrategy>,
    sink: Arc<RecordingSink>,
) -> MonitoringScheduler {
    let chain = FetchStrategyChain::new(vec![strategy], RetryPolicy::no_retry(), ContentHasher::new());
    MonitoringScheduler::new(
        SchedulerConfig {
            poll_interval_secs: 3600,
            ..scheduler_config()
        },
        Arc::new(chain),
        store,
        sink,
        Arc::new(StatisticsTracker::new()),
    )
}

async fn wait_for_checks(store: &SqliteStore, id: &str, expected: u64) -> MonitoredTarget {
    for _ in 0..100 {
        if let Some(target) = store.get_target(id).await.unwrap() {
            if target.total_checks >= expected {
                return target;
            }
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    panic!("target {} never reached {} checks", id, expected);
}

#[tokio::test]
async fn test_seeded_targets_survive_restart_without_renotifying() {
    let dir = tempfile::tempdir().unwrap();
    let store = sqlite_store(&dir).await;
    let hub = NotifierHub::new();

    let seeded = seed_targets(
        store.as_ref(),
        &[
            definition("north", "https://listings.example.com/north", Some("#item-list")),
            definition("bad", "https://listings.example.com/bad", Some("ul >")),
        ],
        &hub,
    )
    .await
    .unwrap();
    assert_eq!(seeded, 1);

    let page = listing_page(&["Flat A", "Flat B"]);
    let sink = Arc::new(RecordingSink::default());

    let first = scheduler_over(
        store.clone(),
        Arc::new(FakeStrategy::serving(FetchMethod::Http, page.clone())),
        sink.clone(),
    );
    first.start().await.unwrap();
    let stored = wait_for_checks(&store, "north", 1).await;
    first.stop().await.unwrap();
    assert!(stored.last_fingerprint.is_some());

    // A fresh process reads the same baseline back.
    let second = scheduler_over(
        store.clone(),
        Arc::new(FakeStrategy::serving(FetchMethod::Http, page)),
        sink.clone(),
    );
    second.start().await.unwrap();
    let stored = wait_for_checks(&store, "north", 2).await;
    second.stop().await.unwrap();

    assert!(sink.new_content().is_empty());
    assert_eq!(stored.total_checks, 2);
    assert_eq!(stored.error_count, 0);
    assert_eq!(stored.name.as_deref(), Some("Listings north"));
}

#[tokio::test]
async fn test_reseeding_with_new_selector_resets_baseline() {
    let dir = tempfile::tempdir().unwrap();
    let store = sqlite_store(&dir).await;
    let hub = NotifierHub::new();
    let url = "https://listings.example.com/north";

    seed_targets(store.as_ref(), &[definition("north", url, Some("#item-list"))], &hub)
        .await
        .unwrap();

    let sink = Arc::new(RecordingSink::default());
    let scheduler = scheduler_over(
        store.clone(),
        Arc::new(FakeStrategy::serving(FetchMethod::Http, listing_page(&["Flat A"]))),
        sink.clone(),
    );
    scheduler.start().await.unwrap();
    wait_for_checks(&store, "north", 1).await;
    scheduler.stop().await.unwrap();

    seed_targets(store.as_ref(), &[definition("north", url, Some("ul#item-list"))], &hub)
        .await
        .unwrap();

    let reseeded = store.get_target("north").await.unwrap().unwrap();
    assert!(reseeded.last_fingerprint.is_none());
    assert_eq!(reseeded.selector.as_deref(), Some("ul#item-list"));
    assert_eq!(reseeded.total_checks, 1);
}
