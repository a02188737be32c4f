use axum::{
    routing::{get, post},
    Router,
};
use tower::ServiceBuilder;
use tower_http::{
    cors::CorsLayer,
    trace::{DefaultMakeSpan, DefaultOnResponse, TraceLayer},
};
use tokio_util::sync::CancellationToken;
use tracing::Level;

use crate::config::ServerConfig;
use crate::scheduler::MonitoringScheduler;

pub mod handlers;
pub mod responses;

pub use handlers::{
    check_target, get_stats, get_target, health_check, list_targets, pause_target, resume_target,
};
pub use responses::*;

#[derive(Clone)]
pub struct AppState {
    pub scheduler: MonitoringScheduler,
}

pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .nest("/api/v1", api_routes())
        .layer(
            ServiceBuilder::new()
                .layer(
                    TraceLayer::new_for_http()
                        .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
                        .on_response(DefaultOnResponse::new().level(Level::INFO)),
                )
                .layer(CorsLayer::permissive()),
        )
        .with_state(state)
}

fn api_routes() -> Router<AppState> {
    Router::new()
        .route("/targets", get(list_targets))
        .route("/targets/:id", get(get_target))
        .route("/targets/:id/check", post(check_target))
        .route("/targets/:id/pause", post(pause_target))
        .route("/targets/:id/resume", post(resume_target))
        .route("/stats", get(get_stats))
}

/// Serves the status API until `shutdown` is cancelled.
pub async fn serve(config: &ServerConfig, state: AppState, shutdown: CancellationToken) -> anyhow::Result<()> {
    let app = create_router(state);
    let listener = tokio::net::TcpListener::bind((config.host.as_str(), config.port)).await?;

    tracing::info!(addr = %listener.local_addr()?, "Status API listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await?;

    Ok(())
}
