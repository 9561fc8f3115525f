//! HTTP API tests driven in-process with `tower::ServiceExt::oneshot`.

mod common;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use serde_json::{json, Value};
use tower::ServiceExt;

use common::Harness;
use sous_knowledge::models::Credentials;
use sous_knowledge::server::{router, AppState};

fn app(h: &Harness) -> axum::Router {
    router(AppState::new(
        h.service.clone(),
        h.content_root.clone(),
        Credentials::default(),
    ))
}

async fn call(app: axum::Router, method: &str, uri: &str, body: Value) -> (StatusCode, Value) {
    let request = Request::builder()
        .method(method)
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap();
    let response = app.oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, value)
}

#[tokio::test]
async fn test_health() {
    let h = Harness::new();
    let request = Request::builder().uri("/health").body(Body::empty()).unwrap();
    let response = app(&h).oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let body: Value = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(body["status"], "ok");
    assert_eq!(body["version"], env!("CARGO_PKG_VERSION"));
}

#[tokio::test]
async fn test_artifacts_before_and_after_vectorize() {
    let h = Harness::new();
    let project = h.project.display().to_string();

    let (status, body) = call(app(&h), "POST", "/artifacts", json!({ "project_path": project })).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({ "intelligence_exists": false, "embeddings_exist": false }));

    let (status, body) = call(
        app(&h),
        "POST",
        "/vectorize",
        json!({ "project_path": project, "openai_api_key": "sk-test" }),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "completed");

    let (_, body) = call(app(&h), "POST", "/artifacts", json!({ "project_path": project })).await;
    assert_eq!(body["embeddings_exist"], true);
}

#[tokio::test]
async fn test_search_error_contract() {
    let h = Harness::new();
    let project = h.project.display().to_string();

    let (status, body) = call(
        app(&h),
        "POST",
        "/search",
        json!({ "project_path": project, "query": "phone" }),
    )
    .await;
    assert_eq!(status, StatusCode::PRECONDITION_FAILED);
    assert_eq!(body["error"]["code"], "missing_artifacts");
    assert!(body["error"]["message"].as_str().unwrap().contains("sous reload"));

    let (status, body) = call(
        app(&h),
        "POST",
        "/search",
        json!({ "project_path": project, "query": "  " }),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], "validation");
}

#[tokio::test]
async fn test_reload_then_chat() {
    let h = Harness::new();
    let project = h.project.display().to_string();

    let (status, body) = call(app(&h), "POST", "/reload", json!({ "project_path": project })).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["analysis"]["state"], "succeeded");
    assert_eq!(body["vectorization"]["state"], "succeeded");

    let (status, body) = call(
        app(&h),
        "POST",
        "/chat",
        json!({
            "project_path": project,
            "user_text": "How is the phone number formatted?",
            "openai_api_key": "sk-test"
        }),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], true);
    assert_eq!(body["search_strategy"], "semantic");
}

#[tokio::test]
async fn test_failed_chat_is_still_ok_status() {
    let h = Harness::new();
    let (status, body) = call(
        app(&h),
        "POST",
        "/chat",
        json!({ "project_path": h.project.display().to_string(), "user_text": "overview?" }),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], false);
    assert!(body["error"].is_string());
}

#[tokio::test]
async fn test_search_similarity_floor_and_file_chunks() {
    let h = Harness::new();
    let project = h.project.display().to_string();
    let (status, _) = call(
        app(&h),
        "POST",
        "/vectorize",
        json!({ "project_path": project, "openai_api_key": "sk-test" }),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let (status, body) = call(
        app(&h),
        "POST",
        "/search",
        json!({
            "project_path": project,
            "query": "phone",
            "min_similarity": 1.5,
            "openai_api_key": "sk-test"
        }),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["results"], json!([]));

    let (status, body) = call(
        app(&h),
        "POST",
        "/file-chunks",
        json!({ "project_path": project, "file_path": "billing.py" }),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let chunks = body["chunks"].as_array().unwrap();
    assert!(!chunks.is_empty());
    assert!(chunks.iter().all(|c| c["file_path"] == "billing.py"));
    assert_eq!(chunks[0]["chunk_index"], 0);
}

#[tokio::test]
async fn test_file_chunks_without_index() {
    let h = Harness::new();
    let (status, body) = call(
        app(&h),
        "POST",
        "/file-chunks",
        json!({ "project_path": h.project.display().to_string(), "file_path": "main.py" }),
    )
    .await;
    assert_eq!(status, StatusCode::PRECONDITION_FAILED);
    assert_eq!(body["error"]["code"], "missing_artifacts");
}
