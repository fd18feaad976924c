use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::IntoResponse,
};
use tracing::info;

use super::dto::JobListQuery;
use super::model::Job;
use super::reconciler::ReconciliationReport;
use crate::common::error::AppError;
use crate::common::response::{ApiError, ApiResponse, ApiSuccess};
use crate::state::AppState;

async fn list_runner_jobs(state: &AppState, query: JobListQuery) -> Result<Vec<Job>, AppError> {
    let filter = query.into_filter()?;
    Ok(state.runner.list(&filter).await?)
}

/// List jobs known to the runner
#[utoipa::path(
    get,
    path = "/api/v1/jobs",
    params(JobListQuery),
    responses(
        (status = 200, description = "Runner jobs, newest first", body = ApiResponse<Vec<Job>>),
        (status = 400, description = "Invalid filter"),
        (status = 503, description = "Runner unavailable")
    ),
    tag = "Jobs"
)]
pub async fn list_jobs(
    State(state): State<AppState>,
    Query(query): Query<JobListQuery>,
) -> impl IntoResponse {
    match list_runner_jobs(&state, query).await {
        Ok(jobs) => ApiSuccess(
            ApiResponse::success(jobs, "Jobs retrieved successfully"),
            StatusCode::OK,
        )
        .into_response(),
        Err(e) => ApiError(e).into_response(),
    }
}

/// Run one reconciliation pass
#[utoipa::path(
    post,
    path = "/api/v1/reconcile",
    responses(
        (status = 200, description = "Resulting registry and storage state", body = ApiResponse<ReconciliationReport>),
        (status = 503, description = "Store unavailable")
    ),
    tag = "Jobs"
)]
pub async fn reconcile(State(state): State<AppState>) -> impl IntoResponse {
    info!("Reconciliation requested");
    match state.reconciler.reconcile().await {
        Ok(report) => ApiSuccess(
            ApiResponse::success(report, "Reconciliation finished"),
            StatusCode::OK,
        )
        .into_response(),
        Err(e) => ApiError(e).into_response(),
    }
}
