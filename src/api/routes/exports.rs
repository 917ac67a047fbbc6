//! Export handlers: create, status, archive download.

use crate::api::AppState;
use crate::coordinator::ExportResponse;
use crate::error::{Error, Result};
use crate::types::{ExportRequest, TaskId};
use axum::{
    Json,
    body::Body,
    extract::{Path, State},
    http::{HeaderMap, HeaderValue, StatusCode, header},
    response::{
        IntoResponse, Response,
        sse::{Event as SseEvent, KeepAlive, Sse},
    },
};
use std::convert::Infallible;
use tokio_stream::StreamExt;
use tokio_stream::wrappers::ReceiverStream;

/// Header carrying the id of a newly started export
pub const TASK_ID_HEADER: &str = "x-export-task-id";

/// POST /exports - Start an export or reuse a recent one
#[utoipa::path(
    post,
    path = "/api/v1/exports",
    tag = "exports",
    request_body = ExportRequest,
    responses(
        (status = 200, description = "A recent ready export (JSON), or the progress events of a new one (SSE, each named after its type)", content(
            ("application/json" = crate::types::ExistingTaskDescriptor),
            ("text/event-stream" = crate::types::ExportEvent)
        )),
        (status = 400, description = "Invalid credential", body = crate::error::ApiError),
        (status = 503, description = "Shutting down", body = crate::error::ApiError)
    )
)]
pub async fn create_export(
    State(state): State<AppState>,
    Json(request): Json<ExportRequest>,
) -> Response {
    match state.exporter.request_export(request).await {
        Ok(ExportResponse::Existing(existing)) => (StatusCode::OK, Json(existing)).into_response(),
        Ok(ExportResponse::Started { task_id, events }) => {
            let stream = ReceiverStream::new(events).filter_map(|event| {
                match serde_json::to_string(&event) {
                    Ok(json) => Some(Ok::<_, Infallible>(
                        SseEvent::default().event(event.kind()).data(json),
                    )),
                    Err(e) => {
                        tracing::warn!(error = %e, "Failed to serialize export event");
                        None
                    }
                }
            });

            let mut headers = HeaderMap::new();
            if let Ok(value) = HeaderValue::from_str(task_id.as_str()) {
                headers.insert(TASK_ID_HEADER, value);
            }
            (headers, Sse::new(stream).keep_alive(KeepAlive::default())).into_response()
        }
        Err(e) => e.into_response(),
    }
}

/// GET /exports/:task_id - Current status snapshot
#[utoipa::path(
    get,
    path = "/api/v1/exports/{task_id}",
    tag = "exports",
    params(
        ("task_id" = String, Path, description = "Export task ID")
    ),
    responses(
        (status = 200, description = "Status snapshot", body = crate::types::StatusSnapshot),
        (status = 404, description = "Unknown or expired task", body = crate::error::ApiError),
        (status = 500, description = "Internal server error", body = crate::error::ApiError)
    )
)]
pub async fn get_export(State(state): State<AppState>, Path(task_id): Path<String>) -> Response {
    let task_id = TaskId::from(task_id);
    match state.exporter.snapshot(&task_id).await {
        Ok(Some(snapshot)) => (StatusCode::OK, Json(snapshot)).into_response(),
        Ok(None) => Error::NotFound(task_id.to_string()).into_response(),
        Err(e) => e.into_response(),
    }
}

/// GET /export/:task_id - Stream the archive of a ready task
#[utoipa::path(
    get,
    path = "/api/v1/export/{task_id}",
    tag = "exports",
    params(
        ("task_id" = String, Path, description = "Export task ID")
    ),
    responses(
        (status = 200, description = "ZIP archive stream", content_type = "application/zip"),
        (status = 404, description = "Unknown or expired task", body = crate::error::ApiError),
        (status = 409, description = "Task not ready", body = crate::error::ApiError)
    )
)]
pub async fn download_export(
    State(state): State<AppState>,
    Path(task_id): Path<String>,
) -> Response {
    let task_id = TaskId::from(task_id);
    let download = match state.exporter.start_download(&task_id).await {
        Ok(download) => download,
        Err(e) => return e.into_response(),
    };

    // Length is only advertised on HEAD; this run may differ from the last
    let headers = match archive_headers(&download.filename, None) {
        Ok(headers) => headers,
        Err(e) => return e.into_response(),
    };
    let body = Body::from_stream(ReceiverStream::new(download.body));
    (StatusCode::OK, headers, body).into_response()
}

/// HEAD /export/:task_id - Archive headers without starting a download
#[utoipa::path(
    head,
    path = "/api/v1/export/{task_id}",
    tag = "exports",
    params(
        ("task_id" = String, Path, description = "Export task ID")
    ),
    responses(
        (status = 200, description = "Archive headers; Content-Length once a complete download has run"),
        (status = 404, description = "Unknown or expired task"),
        (status = 409, description = "Task not ready")
    )
)]
pub async fn head_export(State(state): State<AppState>, Path(task_id): Path<String>) -> Response {
    let task_id = TaskId::from(task_id);
    let head = match state.exporter.download_head(&task_id).await {
        Ok(head) => head,
        Err(e) => return e.into_response(),
    };

    match archive_headers(&head.filename, head.content_length) {
        // A body of unknown size keeps the router from inventing a zero length
        Ok(headers) => (StatusCode::OK, headers, empty_stream_body()).into_response(),
        Err(e) => e.into_response(),
    }
}

fn archive_headers(filename: &str, content_length: Option<u64>) -> Result<HeaderMap> {
    let mut headers = HeaderMap::new();
    headers.insert(header::CONTENT_TYPE, HeaderValue::from_static("application/zip"));
    let disposition = HeaderValue::from_str(&format!("attachment; filename=\"{}\"", filename))
        .map_err(|e| Error::Other(format!("invalid archive filename '{}': {}", filename, e)))?;
    headers.insert(header::CONTENT_DISPOSITION, disposition);
    headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-store"));
    if let Some(length) = content_length {
        headers.insert(header::CONTENT_LENGTH, HeaderValue::from(length));
    }
    Ok(headers)
}

fn empty_stream_body() -> Body {
    Body::from_stream(tokio_stream::empty::<std::result::Result<Vec<u8>, Infallible>>())
}
