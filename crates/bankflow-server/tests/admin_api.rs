//! End-to-end router tests: auth gate, rate limit, upload/list, the SQL
//! gate, log path traversal, and error envelopes.

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use bankflow::Settings;
use bankflow_server::{build_router, AppState};
use bankflow_vectorstores::VectorEngine;
use http_body_util::BodyExt;
use serde_json::Value;
use tower::util::ServiceExt;

async fn test_state(base: &std::path::Path) -> AppState {
    let settings = Settings::for_base_dir(base);
    AppState::build(settings, VectorEngine::Sqlite)
        .await
        .expect("state builds")
}

async fn router(base: &std::path::Path) -> Router {
    build_router(test_state(base).await)
}

async fn body_json(response: axum::response::Response) -> Value {
    let bytes = response.into_body().collect().await.expect("body").to_bytes();
    serde_json::from_slice(&bytes).expect("json body")
}

fn multipart_csv(field_name: &str, filename: &str, content: &str) -> (String, Vec<u8>) {
    let boundary = "bankflowtestboundary";
    let body = format!(
        "--{boundary}\r\nContent-Disposition: form-data; name=\"{field_name}\"; filename=\"{filename}\"\r\nContent-Type: text/csv\r\n\r\n{content}\r\n--{boundary}--\r\n"
    );
    (
        format!("multipart/form-data; boundary={boundary}"),
        body.into_bytes(),
    )
}

#[tokio::test]
async fn test_health_is_public() {
    let dir = tempfile::tempdir().unwrap();
    let app = router(dir.path()).await;

    let response = app
        .oneshot(Request::get("/api/health").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["status"], "ok");
}

#[tokio::test]
async fn test_security_and_correlation_headers() {
    let dir = tempfile::tempdir().unwrap();
    let app = router(dir.path()).await;

    let response = app
        .oneshot(
            Request::get("/api/health")
                .header("x-correlation-id", "abc-123")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    let headers = response.headers();
    assert_eq!(headers.get("x-correlation-id").unwrap(), "abc-123");
    assert_eq!(headers.get("x-content-type-options").unwrap(), "nosniff");
    assert_eq!(headers.get("x-frame-options").unwrap(), "DENY");
    assert!(headers.contains_key("strict-transport-security"));
    assert!(headers.contains_key("permissions-policy"));
}

#[tokio::test]
async fn test_upload_and_list_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let app = router(dir.path()).await;

    let (content_type, body) = multipart_csv("file", "sample.csv", "a,b\n1,2\n3,4\n");
    let response = app
        .clone()
        .oneshot(
            Request::post("/api/admin/upload")
                .header("content-type", content_type)
                .body(Body::from(body))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let uploaded = body_json(response).await;
    assert_eq!(uploaded["rows"], 2);
    assert_eq!(uploaded["cols"], 2);
    assert_eq!(uploaded["name"], "sample");
    let id = uploaded["id"].as_i64().unwrap();
    assert!(id > 0);

    let response = app
        .oneshot(Request::get("/api/admin/datasets").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let listed = body_json(response).await;
    let found = listed
        .as_array()
        .unwrap()
        .iter()
        .any(|d| d["id"].as_i64() == Some(id) && d["name"] == "sample");
    assert!(found, "uploaded dataset appears in the listing");
}

#[tokio::test]
async fn test_upload_rejects_unknown_extension() {
    let dir = tempfile::tempdir().unwrap();
    let app = router(dir.path()).await;

    let (content_type, body) = multipart_csv("file", "script.sh", "echo hi\n");
    let response = app
        .oneshot(
            Request::post("/api/admin/upload")
                .header("content-type", content_type)
                .body(Body::from(body))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = body_json(response).await;
    assert!(body["detail"].as_str().unwrap().contains("Unsupported file type"));
}

#[tokio::test]
async fn test_forbidden_sql_is_rejected_with_keyword() {
    let dir = tempfile::tempdir().unwrap();
    let app = router(dir.path()).await;

    let response = app
        .oneshot(
            Request::post("/api/admin/text2sql/execute")
                .header("content-type", "application/json")
                .body(Body::from(r#"{"sql": "DROP TABLE datasets"}"#))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = body_json(response).await;
    assert!(body["detail"].as_str().unwrap().contains("SELECT"));

    let dir2 = tempfile::tempdir().unwrap();
    let app = router(dir2.path()).await;
    let response = app
        .oneshot(
            Request::post("/api/admin/text2sql/execute")
                .header("content-type", "application/json")
                .body(Body::from(r#"{"sql": "SELECT 1; DROP TABLE datasets"}"#))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = body_json(response).await;
    assert!(body["detail"].as_str().unwrap().contains("DROP"));
}

#[tokio::test]
async fn test_select_against_unified_db_succeeds() {
    let dir = tempfile::tempdir().unwrap();
    // Seed a unified DB the executor can read.
    let conn = rusqlite::Connection::open(dir.path().join("banking_unified.db")).unwrap();
    conn.execute("CREATE TABLE accounts (id INTEGER, owner TEXT)", []).unwrap();
    conn.execute("INSERT INTO accounts VALUES (1, 'alice'), (2, 'bob')", []).unwrap();
    drop(conn);

    let app = router(dir.path()).await;
    let response = app
        .oneshot(
            Request::post("/api/admin/text2sql/execute")
                .header("content-type", "application/json")
                .body(Body::from(r#"{"sql": "SELECT 1"}"#))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["row_count"], 1);
    assert_eq!(body["has_more"], false);
}

#[tokio::test]
async fn test_auth_gate_when_api_key_configured() {
    let dir = tempfile::tempdir().unwrap();
    let mut settings = Settings::for_base_dir(dir.path());
    settings.api_key = Some("secret".to_string());
    let state = AppState::build(settings, VectorEngine::Sqlite).await.unwrap();
    let app = build_router(state);

    // No credentials → 401 with the exact detail string.
    let response = app
        .clone()
        .oneshot(Request::get("/api/admin/datasets").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    let body = body_json(response).await;
    assert_eq!(body["detail"], "Invalid or missing API key");

    // Bearer token passes.
    let response = app
        .clone()
        .oneshot(
            Request::get("/api/admin/datasets")
                .header("authorization", "Bearer secret")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    // X-API-Key passes too.
    let response = app
        .clone()
        .oneshot(
            Request::get("/api/admin/datasets")
                .header("x-api-key", "secret")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    // Public paths bypass the gate entirely.
    let response = app
        .oneshot(Request::get("/api/health").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_rate_limit_returns_429_with_retry_after() {
    let dir = tempfile::tempdir().unwrap();
    let mut settings = Settings::for_base_dir(dir.path());
    settings.rate_limit = 3;
    let state = AppState::build(settings, VectorEngine::Sqlite).await.unwrap();
    let app = build_router(state);

    for _ in 0..3 {
        let response = app
            .clone()
            .oneshot(
                Request::get("/api/admin/datasets")
                    .header("x-forwarded-for", "10.1.1.1")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    let response = app
        .clone()
        .oneshot(
            Request::get("/api/admin/datasets")
                .header("x-forwarded-for", "10.1.1.1")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
    assert!(response.headers().contains_key("retry-after"));

    // Another client is unaffected; non-admin paths are never limited.
    let response = app
        .clone()
        .oneshot(
            Request::get("/api/admin/datasets")
                .header("x-forwarded-for", "10.2.2.2")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let response = app
        .oneshot(
            Request::get("/api/health")
                .header("x-forwarded-for", "10.1.1.1")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_log_path_traversal_is_safe() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::create_dir_all(dir.path().join("logs")).unwrap();
    std::fs::write(dir.path().join("logs/app.log"), "hello\n").unwrap();
    let app = router(dir.path()).await;

    let response = app
        .clone()
        .oneshot(
            Request::get("/api/admin/logs/?file=../../etc/passwd")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    // Safe error, no file contents.
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = body_json(response).await;
    assert!(body["detail"].as_str().unwrap().to_lowercase().contains("log file"));

    // The legitimate file still reads fine.
    let response = app
        .oneshot(
            Request::get("/api/admin/logs/?file=app.log")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["current_file"], "app.log");
}

#[tokio::test]
async fn test_missing_dataset_is_404_envelope() {
    let dir = tempfile::tempdir().unwrap();
    let app = router(dir.path()).await;

    let response = app
        .oneshot(Request::get("/api/admin/datasets/999").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    let body = body_json(response).await;
    assert!(body["detail"].as_str().unwrap().contains("999"));
}

#[tokio::test]
async fn test_alert_lifecycle_and_check() {
    let dir = tempfile::tempdir().unwrap();

    // Seed a preprocessing summary that will trip the rule.
    let uc_dir = dir.path().join("preprocessing_output/uc_fr_01");
    std::fs::create_dir_all(&uc_dir).unwrap();
    std::fs::write(
        uc_dir.join("summary.json"),
        r#"{"use_case_key": "uc_fr_01", "data_quality_score": 45.0}"#,
    )
    .unwrap();

    let app = router(dir.path()).await;

    let response = app
        .clone()
        .oneshot(
            Request::post("/api/admin/alerts/")
                .header("content-type", "application/json")
                .body(Body::from(
                    r#"{"name": "low quality", "metric": "data_quality_score", "threshold": 50.0, "operator": "<"}"#,
                ))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let created = body_json(response).await;
    let alert_id = created["id"].as_i64().unwrap();

    let response = app
        .clone()
        .oneshot(Request::post("/api/admin/alerts/check").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let checked = body_json(response).await;
    let triggered = checked["triggered"].as_array().unwrap();
    assert_eq!(triggered.len(), 1);
    assert_eq!(triggered[0]["alert_id"].as_i64(), Some(alert_id));
    assert_eq!(triggered[0]["uc_id"], "uc_fr_01");

    // last_triggered was stamped.
    let response = app
        .oneshot(Request::get("/api/admin/alerts/").body(Body::empty()).unwrap())
        .await
        .unwrap();
    let alerts = body_json(response).await;
    assert!(alerts.as_array().unwrap()[0]["last_triggered"].is_string());
}

#[tokio::test]
async fn test_invalid_alert_metric_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let app = router(dir.path()).await;

    let response = app
        .oneshot(
            Request::post("/api/admin/alerts/")
                .header("content-type", "application/json")
                .body(Body::from(
                    r#"{"name": "x", "metric": "vibes", "threshold": 1.0}"#,
                ))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_process_run_validates_use_case() {
    let dir = tempfile::tempdir().unwrap();
    let app = router(dir.path()).await;

    let response = app
        .clone()
        .oneshot(
            Request::post("/api/admin/process/run")
                .header("content-type", "application/json")
                .body(Body::from(r#"{"uc_id": "../etc"}"#))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let response = app
        .oneshot(
            Request::post("/api/admin/process/run")
                .header("content-type", "application/json")
                .body(Body::from(r#"{"uc_id": "uc_nope_99"}"#))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_monitoring_system_snapshot() {
    let dir = tempfile::tempdir().unwrap();
    let app = router(dir.path()).await;

    let response = app
        .oneshot(
            Request::get("/api/admin/monitoring/system")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert!(body["memory"]["total"].as_u64().unwrap() > 0);
}

#[tokio::test]
async fn test_export_unknown_format_and_missing_uc() {
    let dir = tempfile::tempdir().unwrap();
    let app = router(dir.path()).await;

    let response = app
        .clone()
        .oneshot(
            Request::post("/api/admin/export/csv/uc_fr_01")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let response = app
        .oneshot(
            Request::post("/api/admin/export/markdown/uc_fr_01")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_training_start_validates_dataset() {
    let dir = tempfile::tempdir().unwrap();
    let app = router(dir.path()).await;

    let response = app
        .oneshot(
            Request::post("/api/admin/training/start")
                .header("content-type", "application/json")
                .body(Body::from(
                    r#"{"dataset_id": 42, "target_column": "label", "algorithm": "random_forest"}"#,
                ))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}
