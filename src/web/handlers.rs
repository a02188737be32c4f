use axum::{
    extract::{Path, State},
    response::Json,
};

use super::{ApiError, ApiResponse, AppState};
use crate::core::stats::CycleStatistics;
use crate::scheduler::TargetStatus;
use crate::scraper::ScrapeOutcome;
use crate::utils::error::AppError;

type ApiResult<T> = Result<Json<ApiResponse<T>>, ApiError>;

pub async fn health_check(State(state): State<AppState>) -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "healthy",
        "scheduler_running": state.scheduler.is_running(),
        "timestamp": chrono::Utc::now(),
        "version": env!("CARGO_PKG_VERSION"),
        "service": "estate-watcher"
    }))
}

pub async fn list_targets(State(state): State<AppState>) -> ApiResult<Vec<TargetStatus>> {
    let targets = state.scheduler.targets().await;
    tracing::debug!(count = targets.len(), "Listing targets");
    Ok(Json(ApiResponse::success(targets)))
}

pub async fn get_target(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<TargetStatus> {
    let target = state.scheduler.target(&id).await.ok_or_else(|| AppError::NotFound {
        resource: format!("target {}", id),
    })?;
    Ok(Json(ApiResponse::success(target)))
}

pub async fn check_target(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<ScrapeOutcome> {
    tracing::info!(target_id = %id, "Manual check requested");
    let outcome = state.scheduler.run_check_now(&id).await?;
    Ok(Json(ApiResponse::success(outcome)))
}

pub async fn pause_target(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<TargetStatus> {
    let status = state.scheduler.set_paused(&id, true).await?;
    Ok(Json(ApiResponse::success(status)))
}

pub async fn resume_target(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<TargetStatus> {
    let status = state.scheduler.set_paused(&id, false).await?;
    Ok(Json(ApiResponse::success(status)))
}

pub async fn get_stats(State(state): State<AppState>) -> ApiResult<CycleStatistics> {
    Ok(Json(ApiResponse::success(state.scheduler.statistics())))
}
