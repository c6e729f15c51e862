//! Blob upload route

use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;

use gridmr_core::protocol::{ErrorResponse, UploadBlobRequest};
use gridmr_core::Error;

use crate::routes::error_reply;
use crate::state::SchedulerAppState;

/// Store a client-supplied blob
pub async fn upload_blob(
    State(state): State<SchedulerAppState>,
    Json(request): Json<UploadBlobRequest>,
) -> Result<StatusCode, (StatusCode, Json<ErrorResponse>)> {
    let data = STANDARD
        .decode(&request.data_base64)
        .map_err(|e| error_reply(Error::bad_request(format!("invalid base64 payload: {}", e))))?;

    match state.scheduler.upload_blob(&request.remote_path, &data).await {
        Ok(()) => Ok(StatusCode::CREATED),
        Err(e) => Err(error_reply(e)),
    }
}
