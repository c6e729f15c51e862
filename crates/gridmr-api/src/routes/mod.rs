//! HTTP route handlers
//!
//! Scheduler-facing routes live in [`jobs`], [`blobs`] and [`workers`];
//! the worker's own task surface lives in [`tasks`].

pub mod blobs;
pub mod jobs;
pub mod tasks;
pub mod workers;

use axum::http::StatusCode;
use axum::Json;

use gridmr_core::protocol::ErrorResponse;
use gridmr_core::Error;

/// Map a core error onto the HTTP surface
pub(crate) fn error_reply(err: Error) -> (StatusCode, Json<ErrorResponse>) {
    let status =
        StatusCode::from_u16(err.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    let body = ErrorResponse {
        error: err.to_string(),
        category: err.category().to_string(),
    };
    (status, Json(body))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_reply_maps_status() {
        let (status, body) = error_reply(Error::bad_request("num_maps must be >= 1"));
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body.category, "bad_request");

        let (status, _) = error_reply(Error::not_found("no such job"));
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (status, _) = error_reply(Error::worker_unavailable("slots busy"));
        assert_eq!(status, StatusCode::CONFLICT);
    }
}
