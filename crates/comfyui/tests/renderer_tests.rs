//! ComfyUIRenderer against an in-process fake render server.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use assert_matches::assert_matches;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::{json, Value};

use framechain_comfyui::api::ComfyUIApi;
use framechain_comfyui::{ComfyUIRenderer, RenderClient, RenderError};

#[derive(Clone, Default)]
struct FakeServer {
    submitted: Arc<Mutex<Vec<Value>>>,
    queue_requests: Arc<Mutex<Vec<Value>>>,
    history_calls: Arc<AtomicUsize>,
    /// History polls that answer `{}` before the job shows up.
    pending_polls: usize,
    /// History polls that fail with 500 before anything else.
    failing_polls: usize,
    reject_submission: bool,
    /// `outputs` of a finished job's history entry.
    history_outputs: Option<Value>,
}

async fn prompt(State(server): State<FakeServer>, Json(body): Json<Value>) -> impl IntoResponse {
    if server.reject_submission {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({"error": "prompt_outputs_failed_validation"})),
        );
    }
    server.submitted.lock().unwrap().push(body);
    (StatusCode::OK, Json(json!({"prompt_id": "job-1", "number": 4})))
}

async fn history(State(server): State<FakeServer>, Path(id): Path<String>) -> impl IntoResponse {
    let call = server.history_calls.fetch_add(1, Ordering::SeqCst);
    if call < server.failing_polls {
        return (StatusCode::INTERNAL_SERVER_ERROR, Json(json!({})));
    }
    if call < server.failing_polls + server.pending_polls {
        return (StatusCode::OK, Json(json!({})));
    }
    let mut done = serde_json::Map::new();
    let outputs = server.history_outputs.clone().unwrap_or_else(|| json!({}));
    done.insert(id, json!({ "outputs": outputs }));
    (StatusCode::OK, Json(Value::Object(done)))
}

async fn queue(State(server): State<FakeServer>, Json(body): Json<Value>) -> StatusCode {
    server.queue_requests.lock().unwrap().push(body);
    StatusCode::OK
}

async fn system_stats() -> Json<Value> {
    Json(json!({"system": {"os": "posix"}, "devices": []}))
}

async fn spawn(server: FakeServer) -> String {
    let app = Router::new()
        .route("/prompt", post(prompt))
        .route("/history/{id}", get(history))
        .route("/queue", post(queue))
        .route("/system_stats", get(system_stats))
        .with_state(server);
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{addr}")
}

fn renderer(url: &str) -> ComfyUIRenderer {
    ComfyUIRenderer::new(ComfyUIApi::new(url), "test-client")
        .with_poll_interval(Duration::from_millis(20))
}

#[tokio::test]
async fn submit_wraps_job_with_client_id() {
    let server = FakeServer::default();
    let url = spawn(server.clone()).await;

    let job = json!({"3": {"inputs": {"text": "a castle at dawn"}}});
    let job_id = renderer(&url).submit(&job).await.unwrap();

    assert_eq!(job_id, "job-1");
    let submitted = server.submitted.lock().unwrap();
    assert_eq!(submitted.len(), 1);
    assert_eq!(submitted[0]["prompt"], job);
    assert_eq!(submitted[0]["client_id"], "test-client");
}

#[tokio::test]
async fn rejected_submission_carries_status_and_body() {
    let url = spawn(FakeServer {
        reject_submission: true,
        ..Default::default()
    })
    .await;

    let result = renderer(&url).submit(&json!({})).await;
    assert_matches!(
        result,
        Err(RenderError::Submission { status: 400, body }) if body.contains("failed_validation")
    );
}

#[tokio::test]
async fn await_completion_polls_until_job_in_history() {
    let server = FakeServer {
        pending_polls: 3,
        ..Default::default()
    };
    let url = spawn(server.clone()).await;

    renderer(&url)
        .await_completion("job-1", Duration::from_secs(10))
        .await
        .unwrap();

    assert_eq!(server.history_calls.load(Ordering::SeqCst), 4);
}

#[tokio::test]
async fn failed_polls_are_retried() {
    let server = FakeServer {
        failing_polls: 2,
        ..Default::default()
    };
    let url = spawn(server.clone()).await;

    renderer(&url)
        .await_completion("job-1", Duration::from_secs(10))
        .await
        .unwrap();

    assert_eq!(server.history_calls.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn await_completion_times_out() {
    let url = spawn(FakeServer {
        pending_polls: usize::MAX / 2,
        ..Default::default()
    })
    .await;

    let result = renderer(&url)
        .await_completion("job-1", Duration::from_millis(200))
        .await;
    assert_matches!(result, Err(RenderError::Timeout { .. }));
}

#[tokio::test]
async fn unreachable_server_times_out_rather_than_failing_fast() {
    // Bind then drop to get a port nobody listens on.
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let result = renderer(&format!("http://{addr}"))
        .await_completion("job-1", Duration::from_millis(150))
        .await;
    assert_matches!(result, Err(RenderError::Timeout { .. }));
}

#[tokio::test]
async fn health_check_hits_system_stats() {
    let url = spawn(FakeServer::default()).await;
    renderer(&url).health_check().await.unwrap();
}

#[tokio::test]
async fn locate_latest_output_returns_none_for_empty_root() {
    let url = spawn(FakeServer::default()).await;
    let root = tempfile::tempdir().unwrap();
    assert_eq!(renderer(&url).locate_latest_output(root.path()).await, None);
}

fn touch(path: &std::path::Path, age: Duration) {
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    let file = std::fs::File::create(path).unwrap();
    file.set_modified(std::time::SystemTime::now() - age).unwrap();
}

#[tokio::test]
async fn job_output_comes_from_history_not_newest_file() {
    let root = tempfile::tempdir().unwrap();
    touch(&root.path().join("renders/mine.mp4"), Duration::from_secs(60));
    touch(&root.path().join("theirs.mp4"), Duration::from_secs(1));
    let url = spawn(FakeServer {
        history_outputs: Some(json!({
            "9": {"gifs": [{"filename": "mine.mp4", "subfolder": "renders", "type": "output"}]}
        })),
        ..Default::default()
    })
    .await;

    let found = renderer(&url).locate_job_output("job-1", root.path()).await;
    assert_eq!(found, Some(root.path().join("renders/mine.mp4")));
}

#[tokio::test]
async fn job_output_falls_back_to_newest_when_history_lists_nothing() {
    let root = tempfile::tempdir().unwrap();
    touch(&root.path().join("older.mp4"), Duration::from_secs(60));
    touch(&root.path().join("newer.mp4"), Duration::from_secs(1));
    let url = spawn(FakeServer::default()).await;

    let found = renderer(&url).locate_job_output("job-1", root.path()).await;
    assert_eq!(found, Some(root.path().join("newer.mp4")));
}

#[tokio::test]
async fn cancel_deletes_job_from_queue() {
    let server = FakeServer::default();
    let url = spawn(server.clone()).await;

    renderer(&url).cancel("job-9").await;

    let requests = server.queue_requests.lock().unwrap();
    assert_eq!(requests.as_slice(), &[json!({"delete": ["job-9"]})]);
}

#[tokio::test]
async fn cancel_against_unreachable_server_does_not_panic() {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    renderer(&format!("http://{addr}")).cancel("job-9").await;
}
