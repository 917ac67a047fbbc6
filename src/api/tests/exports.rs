use super::*;
use crate::api::routes::TASK_ID_HEADER;
use crate::exporter::test_helpers::TEST_CREDENTIAL;
use crate::status::StatusPublisher;
use crate::types::{ExportOptions, ExportTask, StatusSnapshot, TaskId, TaskStatus};
use axum::http::header;
use std::io::Cursor;

fn post_export(credential: &str, include_metadata: bool) -> Request<Body> {
    let body = serde_json::json!({
        "credential": credential,
        "include_metadata": include_metadata,
        "include_thumbnails": false,
    });
    Request::builder()
        .method("POST")
        .uri("/exports")
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn get(uri: String) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

fn head(uri: String) -> Request<Body> {
    Request::builder()
        .method("HEAD")
        .uri(uri)
        .body(Body::empty())
        .unwrap()
}

/// SSE `event:` names in order
fn event_names(stream: &str) -> Vec<String> {
    stream
        .lines()
        .filter_map(|line| line.strip_prefix("event: "))
        .map(str::to_string)
        .collect()
}

/// Start an export over HTTP and read its event stream to the end
async fn export_to_ready(app: &Router) -> (String, String) {
    let response = app
        .clone()
        .oneshot(post_export(TEST_CREDENTIAL, true))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let content_type = response.headers()[header::CONTENT_TYPE].to_str().unwrap();
    assert!(content_type.starts_with("text/event-stream"));
    let task_id = response.headers()[TASK_ID_HEADER]
        .to_str()
        .unwrap()
        .to_string();

    let stream = String::from_utf8(body_bytes(response).await).unwrap();
    (task_id, stream)
}

#[tokio::test]
async fn test_export_streams_events_until_ready() {
    let (exporter, _temp_dir) = create_test_exporter(&[2, 1]).await;
    let app = router_for(&exporter);

    let (task_id, stream) = export_to_ready(&app).await;
    assert!(task_id.starts_with("exp_"));

    let names = event_names(&stream);
    assert_eq!(names.first().map(String::as_str), Some("status"));
    assert_eq!(names.last().map(String::as_str), Some("download_ready"));
    assert!(names.iter().any(|n| n == "progress"));
    assert!(stream.contains(&format!("\"download_url\":\"/api/v1/export/{}\"", task_id)));

    let response = app
        .oneshot(get(format!("/exports/{}", task_id)))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let snapshot = body_json(response).await;
    assert_eq!(snapshot["status"], "ready");
    assert_eq!(snapshot["total_images"], 3);
    assert_eq!(snapshot["progress"], 100);
}

#[tokio::test]
async fn test_second_export_returns_existing_descriptor() {
    let (exporter, _temp_dir) = create_test_exporter(&[2]).await;
    let app = router_for(&exporter);

    let (task_id, _) = export_to_ready(&app).await;

    let response = app
        .oneshot(post_export(TEST_CREDENTIAL, true))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let content_type = response.headers()[header::CONTENT_TYPE].to_str().unwrap();
    assert!(content_type.starts_with("application/json"));

    let descriptor = body_json(response).await;
    assert_eq!(descriptor["task_id"], task_id);
    assert_eq!(descriptor["reused"], true);
    assert_eq!(descriptor["total_images"], 2);
}

#[tokio::test]
async fn test_invalid_credential_is_rejected() {
    let (exporter, _temp_dir) = create_test_exporter(&[2]).await;
    let app = router_for(&exporter);

    let response = app.oneshot(post_export("short", false)).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = body_json(response).await;
    assert_eq!(body["error"]["code"], "validation_error");
}

#[tokio::test]
async fn test_unknown_export_is_not_found() {
    let (exporter, _temp_dir) = create_test_exporter(&[2]).await;
    let app = router_for(&exporter);

    let response = app
        .clone()
        .oneshot(get("/exports/exp_unknown".to_string()))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    assert_eq!(body_json(response).await["error"]["code"], "not_found");

    let response = app
        .oneshot(get("/export/exp_unknown".to_string()))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_download_of_unready_task_conflicts() {
    let (exporter, _temp_dir) = create_test_exporter(&[2]).await;
    let task_id = TaskId::from("exp_still_running");
    let snapshot = StatusSnapshot::preparing(ExportTask {
        id: task_id.clone(),
        requester: "0123456789abcdef".into(),
        scope: "default".into(),
        options: ExportOptions::default(),
        status: TaskStatus::Running,
        total_images: 0,
        chunk_count: 0,
        filename: "images-export-default-2024-01-01.zip".into(),
        created_at: chrono::Utc::now(),
        final_size_bytes: None,
    });
    StatusPublisher::new(exporter.db.clone(), Duration::from_secs(60))
        .create(snapshot)
        .await
        .unwrap();

    let app = router_for(&exporter);
    let response = app
        .clone()
        .oneshot(get(format!("/export/{}", task_id)))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CONFLICT);
    assert_eq!(body_json(response).await["error"]["code"], "not_ready");

    let response = app
        .oneshot(head(format!("/export/{}", task_id)))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CONFLICT);
}

#[tokio::test]
async fn test_head_then_download_then_head() {
    let (exporter, _temp_dir) = create_test_exporter(&[3]).await;
    let app = router_for(&exporter);
    let (task_id, _) = export_to_ready(&app).await;

    // No completed run yet
    let response = app
        .clone()
        .oneshot(head(format!("/export/{}", task_id)))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert!(response.headers().get(header::CONTENT_LENGTH).is_none());
    let disposition = response.headers()[header::CONTENT_DISPOSITION]
        .to_str()
        .unwrap();
    assert!(disposition.starts_with("attachment; filename=\"images-export-default-"));
    assert_eq!(exporter.downloads().active_count(), 0, "HEAD started a download");

    let response = app
        .clone()
        .oneshot(get(format!("/export/{}", task_id)))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()[header::CONTENT_TYPE], "application/zip");
    let bytes = body_bytes(response).await;

    let archive = zip::ZipArchive::new(Cursor::new(bytes.clone())).unwrap();
    assert_eq!(archive.len(), 1 + 3);
    assert!(archive.file_names().any(|name| name == "metadata.json"));

    let response = app
        .oneshot(head(format!("/export/{}", task_id)))
        .await
        .unwrap();
    assert_eq!(
        response.headers()[header::CONTENT_LENGTH],
        bytes.len().to_string().as_str()
    );
}
