//! Audio upload API handler
//!
//! POST /api/upload-audio (multipart, file part `audio`)

use axum::{
    extract::{multipart::MultipartError, Multipart, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::post,
    Json, Router,
};

use crate::error::{ApiError, ApiResult};
use crate::services::{IngestResponse, UploadRequest};
use crate::AppState;

/// Multipart part carrying the recording
pub const AUDIO_FIELD: &str = "audio";

/// Optional header naming the uploading user
pub const USER_ID_HEADER: &str = "x-user-id";

/// HTTP status for a pipeline error kind
pub fn status_for_kind(kind: &str) -> StatusCode {
    match kind {
        "QuotaExceeded" => StatusCode::PAYLOAD_TOO_LARGE,
        "InvalidName" | "EmptyUpload" => StatusCode::BAD_REQUEST,
        "ClassifierTimeout" => StatusCode::GATEWAY_TIMEOUT,
        "ClassifierFailure" | "ParseError" | "ValidationError" => StatusCode::BAD_GATEWAY,
        "Cancelled" => StatusCode::SERVICE_UNAVAILABLE,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn multipart_error(e: MultipartError) -> ApiError {
    if e.status() == StatusCode::PAYLOAD_TOO_LARGE {
        ApiError::PayloadTooLarge(e.body_text())
    } else {
        ApiError::BadRequest(format!("Malformed multipart body: {}", e.body_text()))
    }
}

/// POST /api/upload-audio
///
/// Runs the full ingestion pipeline. The body reports the reached (or
/// failing) stage; the status code reflects the error kind.
pub async fn upload_audio(
    State(state): State<AppState>,
    headers: HeaderMap,
    mut multipart: Multipart,
) -> ApiResult<Response> {
    let mut upload = None;

    while let Some(field) = multipart.next_field().await.map_err(multipart_error)? {
        if field.name() != Some(AUDIO_FIELD) {
            continue;
        }
        let original_filename = field.file_name().unwrap_or_default().to_string();
        let content_type = field.content_type().map(str::to_string);
        let bytes = field.bytes().await.map_err(multipart_error)?;
        upload = Some((original_filename, content_type, bytes));
        break;
    }

    let Some((original_filename, content_type, bytes)) = upload else {
        return Err(ApiError::BadRequest(format!(
            "Missing '{}' file part",
            AUDIO_FIELD
        )));
    };

    let user_id = headers
        .get(USER_ID_HEADER)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_string);

    let request = UploadRequest {
        original_filename,
        content_type,
        bytes,
        user_id,
    };

    let cancel = state.shutdown.child_token();
    let outcome = state.orchestrator.handle(request, &cancel).await;

    let status = match &outcome.result {
        Ok(_) => StatusCode::OK,
        Err(failure) => status_for_kind(failure.kind),
    };

    Ok((status, Json(IngestResponse::from(outcome))).into_response())
}

/// Build upload routes
pub fn upload_routes() -> Router<AppState> {
    Router::new().route("/api/upload-audio", post(upload_audio))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        assert_eq!(status_for_kind("QuotaExceeded"), StatusCode::PAYLOAD_TOO_LARGE);
        assert_eq!(status_for_kind("EmptyUpload"), StatusCode::BAD_REQUEST);
        assert_eq!(status_for_kind("InvalidName"), StatusCode::BAD_REQUEST);
        assert_eq!(status_for_kind("ClassifierTimeout"), StatusCode::GATEWAY_TIMEOUT);
        assert_eq!(status_for_kind("ClassifierFailure"), StatusCode::BAD_GATEWAY);
        assert_eq!(status_for_kind("ParseError"), StatusCode::BAD_GATEWAY);
        assert_eq!(status_for_kind("ValidationError"), StatusCode::BAD_GATEWAY);
        assert_eq!(status_for_kind("Cancelled"), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(status_for_kind("StorageError"), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(status_for_kind("PersistenceError"), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(status_for_kind("ClassifierSpawnError"), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
