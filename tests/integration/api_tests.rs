use super::*;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use estate_watcher::web::{create_router, AppState};
use tower::ServiceExt;

async fn call(app: &axum::Router, method: &str, uri: &str) -> (StatusCode, serde_json::Value) {
    let response = app
        .clone()
        .oneshot(Request::builder().method(method).uri(uri).body(Body::empty()).unwrap())
        .await
        .unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    (status, serde_json::from_slice(&bytes).unwrap())
}

async fn wait_for_first_check(scheduler: &MonitoringScheduler, id: &str) {
    for _ in 0..100 {
        if scheduler.target(id).await.is_some_and(|t| t.target.total_checks > 0) {
            return;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("first check of {} never finished", id);
}

#[tokio::test]
async fn test_manual_check_through_api() {
    let mut watched = target("north");
    watched.last_fingerprint = Some(
        ContentHasher::new()
            .fingerprint(&listing_page(&["Flat A"]), Some("#item-list"))
            .unwrap(),
    );
    let strategy = Arc::new(FakeStrategy::new(
        FetchMethod::Http,
        vec![
            Step::Page(listing_page(&["Flat A"])),
            Step::Page(listing_page(&["Flat A", "Flat E"])),
        ],
    ));
    let config = SchedulerConfig {
        poll_interval_secs: 3600,
        ..scheduler_config()
    };
    let h = harness(config, vec![strategy.clone()], vec![watched]);
    h.scheduler.start().await.unwrap();
    wait_for_first_check(&h.scheduler, "north").await;

    let app = create_router(AppState {
        scheduler: h.scheduler.clone(),
    });

    let (status, body) = call(&app, "POST", "/api/v1/targets/north/check").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], true);
    assert_eq!(body["data"]["method"], "http");
    assert_eq!(body["data"]["success"], true);

    let (_, body) = call(&app, "GET", "/api/v1/targets/north").await;
    assert_eq!(body["data"]["total_checks"], 2);
    assert_eq!(body["data"]["new_listings_count"], 1);
    assert_eq!(body["data"]["phase"], "idle");

    let (_, body) = call(&app, "GET", "/api/v1/stats").await;
    assert_eq!(body["data"]["total_checks"], 2);
    assert_eq!(body["data"]["new_property_detections"], 1);
    assert_eq!(body["data"]["success_rate"], 100.0);

    h.scheduler.stop().await.unwrap();
    assert_eq!(h.sink.new_content().len(), 1);
}

#[tokio::test]
async fn test_pause_resume_round_trip() {
    let strategy = Arc::new(FakeStrategy::serving(FetchMethod::Http, listing_page(&["Flat A"])));
    let mut watched = target("north");
    watched.paused = true;
    let h = harness(scheduler_config(), vec![strategy], vec![watched]);
    h.scheduler.start().await.unwrap();

    let app = create_router(AppState {
        scheduler: h.scheduler.clone(),
    });

    let (status, body) = call(&app, "POST", "/api/v1/targets/north/check").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], "BAD_REQUEST");

    let (status, body) = call(&app, "POST", "/api/v1/targets/north/resume").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["paused"], false);

    let (status, body) = call(&app, "POST", "/api/v1/targets/north/pause").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["paused"], true);

    let (status, _) = call(&app, "POST", "/api/v1/targets/ghost/pause").await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    h.scheduler.stop().await.unwrap();
}

#[tokio::test]
async fn test_health_reports_scheduler_state() {
    let h = harness(scheduler_config(), Vec::new(), Vec::new());
    let app = create_router(AppState {
        scheduler: h.scheduler.clone(),
    });

    let (_, body) = call(&app, "GET", "/health").await;
    assert_eq!(body["scheduler_running"], false);

    h.scheduler.start().await.unwrap();
    let (_, body) = call(&app, "GET", "/health").await;
    assert_eq!(body["scheduler_running"], true);
    h.scheduler.stop().await.unwrap();
}
