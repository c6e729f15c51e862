//! Job submission, status and result routes

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::Json;
use serde::Deserialize;
use uuid::Uuid;

use gridmr_core::protocol::{
    ErrorResponse, JobStatusResponse, ResultsResponse, SubmitJobRequest, SubmitJobResponse,
};

use crate::routes::error_reply;
use crate::state::SchedulerAppState;

/// Submit a job
pub async fn submit_job(
    State(state): State<SchedulerAppState>,
    Json(request): Json<SubmitJobRequest>,
) -> Result<Json<SubmitJobResponse>, (StatusCode, Json<ErrorResponse>)> {
    match state.scheduler.submit_job(request).await {
        Ok(job_id) => Ok(Json(SubmitJobResponse { job_id })),
        Err(e) => Err(error_reply(e)),
    }
}

/// Get job status
pub async fn job_status(
    State(state): State<SchedulerAppState>,
    Path(job_id): Path<Uuid>,
) -> Result<Json<JobStatusResponse>, (StatusCode, Json<ErrorResponse>)> {
    match state.scheduler.job_status(job_id).await {
        Ok(status) => Ok(Json(status)),
        Err(e) => Err(error_reply(e)),
    }
}

#[derive(Debug, Deserialize)]
pub struct ResultsQuery {
    pub path: String,

    pub limit: Option<usize>,
}

/// Read committed output lines under a path
pub async fn results(
    State(state): State<SchedulerAppState>,
    Query(query): Query<ResultsQuery>,
) -> Result<Json<ResultsResponse>, (StatusCode, Json<ErrorResponse>)> {
    match state
        .scheduler
        .read_results(&query.path, query.limit)
        .await
    {
        Ok(lines) => Ok(Json(ResultsResponse { lines })),
        Err(e) => Err(error_reply(e)),
    }
}
