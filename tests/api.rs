use axum::http::StatusCode;
use axum::body::Body;
use http_body_util::BodyExt;
use tower::ServiceExt;
use serde_json::{json, Value};
use scanward::api::{auth::TokenRegistry, build_router, AppState};
use scanward::config::{ApiToken, AuthConfig};
use scanward::db::Database;
use scanward::models::{NewFinding, Severity};
use scanward::realtime::ChangeHub;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

const OWNER_TOKEN: &str = "owner-one-token";
const OTHER_TOKEN: &str = "owner-two-token";
const SERVICE_TOKEN: &str = "scan-service-token";

fn create_test_state() -> AppState {
    let hub = ChangeHub::new();
    let db = Database::in_memory().unwrap().with_change_hub(hub.clone());
    let tokens = TokenRegistry::from_config(&AuthConfig {
        service_token: Some(SERVICE_TOKEN.to_string()),
        tokens: vec![
            ApiToken { token: OWNER_TOKEN.to_string(), owner_id: "owner-1".to_string() },
            ApiToken { token: OTHER_TOKEN.to_string(), owner_id: "owner-2".to_string() },
        ],
    });
    AppState::new(db, hub, tokens, Arc::new(Notify::new()))
}

fn app(state: &AppState) -> axum::Router {
    build_router(state.clone())
}

fn make_request(method: &str, uri: &str, token: Option<&str>, body: Option<Value>) -> axum::http::Request<Body> {
    let mut builder = axum::http::Request::builder()
        .method(method)
        .uri(uri)
        .header("content-type", "application/json");
    if let Some(token) = token {
        builder = builder.header("authorization", format!("Bearer {}", token));
    }

    match body {
        Some(b) => builder.body(Body::from(serde_json::to_string(&b).unwrap())).unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    }
}

async fn response_json(response: axum::http::Response<Body>) -> Value {
    let (parts, body) = response.into_parts();
    let bytes = body.collect().await.unwrap().to_bytes();
    if bytes.is_empty() {
        panic!("Empty response body. Status: {}, Headers: {:?}", parts.status, parts.headers);
    }
    serde_json::from_slice(&bytes)
        .unwrap_or_else(|e| panic!("JSON parse error: {}. Body: {:?}", e, String::from_utf8_lossy(&bytes)))
}

async fn create_scan(state: &AppState, name: &str, target: &str) -> String {
    let req = make_request("POST", "/api/scans", Some(OWNER_TOKEN), Some(json!({
        "name": name,
        "target": target,
        "scan_kind": "full"
    })));
    let response = app(state).oneshot(req).await.unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);
    let body = response_json(response).await;
    assert_eq!(body["status"], "pending");
    body["scan_id"].as_str().unwrap().to_string()
}

#[tokio::test]
async fn test_health_endpoint_is_public() {
    let state = create_test_state();
    let req = make_request("GET", "/api/health", None, None);
    let response = app(&state).oneshot(req).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body = response_json(response).await;
    assert_eq!(body["status"], "ok");
    assert_eq!(body["service"], "scanward");
    assert_eq!(body["dead_letter_jobs"], 0);
}

#[tokio::test]
async fn test_scan_routes_require_token() {
    let state = create_test_state();
    let req = make_request("GET", "/api/scans", None, None);
    let response = app(&state).oneshot(req).await.unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let req = make_request("GET", "/api/scans", Some("wrong-token"), None);
    let response = app(&state).oneshot(req).await.unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    let body = response_json(response).await;
    assert_eq!(body["kind"], "Unauthorized");
}

#[tokio::test]
async fn test_create_and_get_scan() {
    let state = create_test_state();
    let scan_id = create_scan(&state, "Prod Scan", "https://example.com").await;

    let req = make_request("GET", &format!("/api/scans/{}", scan_id), Some(OWNER_TOKEN), None);
    let response = app(&state).oneshot(req).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body = response_json(response).await;
    assert_eq!(body["id"], scan_id);
    assert_eq!(body["name"], "Prod Scan");
    assert_eq!(body["target"], "https://example.com");
    assert_eq!(body["status"], "pending");
    assert_eq!(body["total_count"], 0);
    assert_eq!(body["version"], 1);
}

#[tokio::test]
async fn test_create_scan_rejects_invalid_target() {
    let state = create_test_state();
    let req = make_request("POST", "/api/scans", Some(OWNER_TOKEN), Some(json!({
        "name": "Bad",
        "target": "not a url",
        "scan_kind": "quick"
    })));
    let response = app(&state).oneshot(req).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = response_json(response).await;
    assert_eq!(body["kind"], "InvalidInput");

    assert_eq!(state.db.count_scans("owner-1").unwrap(), 0);
}

#[tokio::test]
async fn test_create_scan_rejects_wrongly_typed_body_as_invalid_input() {
    let state = create_test_state();
    let req = make_request("POST", "/api/scans", Some(OWNER_TOKEN), Some(json!({
        "name": 5,
        "target": "https://example.com",
        "scan_kind": "full"
    })));
    let response = app(&state).oneshot(req).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = response_json(response).await;
    assert_eq!(body["kind"], "InvalidInput");
    assert!(body["error"].is_string());

    let req = axum::http::Request::builder()
        .method("POST")
        .uri("/api/scans")
        .header("content-type", "application/json")
        .header("authorization", format!("Bearer {}", OWNER_TOKEN))
        .body(Body::from("{not json"))
        .unwrap();
    let response = app(&state).oneshot(req).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(response_json(response).await["kind"], "InvalidInput");

    assert_eq!(state.db.count_scans("owner-1").unwrap(), 0);
}

#[tokio::test]
async fn test_list_scans_rejects_non_numeric_page() {
    let state = create_test_state();
    let req = make_request("GET", "/api/scans?page=abc", Some(OWNER_TOKEN), None);
    let response = app(&state).oneshot(req).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = response_json(response).await;
    assert_eq!(body["kind"], "InvalidInput");
}

#[tokio::test]
async fn test_list_scans_paginates_newest_first() {
    let state = create_test_state();
    for name in ["first", "second", "third"] {
        create_scan(&state, name, "https://example.com").await;
    }

    let req = make_request("GET", "/api/scans?page=1&limit=2", Some(OWNER_TOKEN), None);
    let response = app(&state).oneshot(req).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body = response_json(response).await;
    let scans = body["scans"].as_array().unwrap();
    assert_eq!(scans.len(), 2);
    assert_eq!(scans[0]["name"], "third");
    assert_eq!(body["total"], 3);
    assert_eq!(body["has_more"], true);

    let req = make_request("GET", "/api/scans?page=2&limit=2", Some(OWNER_TOKEN), None);
    let body = response_json(app(&state).oneshot(req).await.unwrap()).await;
    assert_eq!(body["scans"].as_array().unwrap().len(), 1);
    assert_eq!(body["has_more"], false);

    let req = make_request("GET", "/api/scans?limit=500", Some(OWNER_TOKEN), None);
    let response = app(&state).oneshot(req).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_foreign_scan_is_not_found() {
    let state = create_test_state();
    let scan_id = create_scan(&state, "Mine", "https://example.com").await;

    for uri in [
        format!("/api/scans/{}", scan_id),
        format!("/api/scans/{}/findings", scan_id),
        format!("/api/scans/{}/export?format=json", scan_id),
    ] {
        let req = make_request("GET", &uri, Some(OTHER_TOKEN), None);
        let response = app(&state).oneshot(req).await.unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND, "{}", uri);
    }

    let req = make_request("GET", "/api/scans", Some(OTHER_TOKEN), None);
    let body = response_json(app(&state).oneshot(req).await.unwrap()).await;
    assert_eq!(body["total"], 0);
}

#[tokio::test]
async fn test_get_scan_not_found() {
    let state = create_test_state();
    let req = make_request("GET", "/api/scans/nonexistent-id", Some(OWNER_TOKEN), None);
    let response = app(&state).oneshot(req).await.unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    let body = response_json(response).await;
    assert_eq!(body["error"], "Scan not found");
    assert_eq!(body["kind"], "NotFound");
}

#[tokio::test]
async fn test_delete_scan_cascades_findings() {
    let state = create_test_state();
    let scan_id = create_scan(&state, "Delete me", "https://del.example.com").await;
    state.db.complete_scan(&scan_id, None, &[NewFinding {
        title: "Open redirect".to_string(),
        description: "Redirect parameter not validated".to_string(),
        severity: Severity::Low,
        cve_id: None,
        affected_component: None,
        remediation_steps: None,
        reference_urls: vec![],
    }]).unwrap();

    let req = make_request("DELETE", &format!("/api/scans/{}", scan_id), Some(OWNER_TOKEN), None);
    let response = app(&state).oneshot(req).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(state.db.count_findings(&scan_id).unwrap(), 0);

    let req = make_request("GET", &format!("/api/scans/{}", scan_id), Some(OWNER_TOKEN), None);
    let response = app(&state).oneshot(req).await.unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    let req = make_request("DELETE", &format!("/api/scans/{}", scan_id), Some(OWNER_TOKEN), None);
    let response = app(&state).oneshot(req).await.unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_get_findings_empty() {
    let state = create_test_state();
    let scan_id = create_scan(&state, "Findings", "https://findings.example.com").await;

    let req = make_request("GET", &format!("/api/scans/{}/findings", scan_id), Some(OWNER_TOKEN), None);
    let response = app(&state).oneshot(req).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body = response_json(response).await;
    assert_eq!(body["total"], 0);
    assert!(body["findings"].as_array().unwrap().is_empty());
}

#[tokio::test]
async fn test_status_update_is_reserved_for_service() {
    let state = create_test_state();
    let scan_id = create_scan(&state, "Reported", "https://example.com").await;
    let uri = format!("/api/scans/{}/status", scan_id);

    let req = make_request("PATCH", &uri, Some(OWNER_TOKEN), Some(json!({"status": "running"})));
    let response = app(&state).oneshot(req).await.unwrap();
    assert_eq!(response.status(), StatusCode::FORBIDDEN);

    let req = make_request("PATCH", &uri, Some(SERVICE_TOKEN), Some(json!({"status": "running", "progress": 40})));
    let response = app(&state).oneshot(req).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = response_json(response).await;
    assert_eq!(body["status"], "running");
    assert_eq!(body["progress"], 40);

    let req = make_request("PATCH", &uri, Some(SERVICE_TOKEN), Some(json!({
        "status": "completed",
        "severity_counts": {"critical": 0, "high": 2, "medium": 1, "low": 0, "info": 0}
    })));
    let body = response_json(app(&state).oneshot(req).await.unwrap()).await;
    assert_eq!(body["status"], "completed");
    assert_eq!(body["total_count"], 3);

    // Terminal scans accept no further transitions
    let req = make_request("PATCH", &uri, Some(SERVICE_TOKEN), Some(json!({"status": "failed", "error": "late"})));
    let response = app(&state).oneshot(req).await.unwrap();
    assert_eq!(response.status(), StatusCode::CONFLICT);
}

#[tokio::test]
async fn test_status_update_rejects_unknown_status() {
    let state = create_test_state();
    let scan_id = create_scan(&state, "Reported", "https://example.com").await;
    let uri = format!("/api/scans/{}/status", scan_id);

    let req = make_request("PATCH", &uri, Some(SERVICE_TOKEN), Some(json!({"status": "bogus"})));
    let response = app(&state).oneshot(req).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = response_json(response).await;
    assert_eq!(body["kind"], "InvalidInput");

    let scan = state.db.get_scan(&scan_id).unwrap().unwrap();
    assert_eq!(scan.version, 1);
}

#[tokio::test]
async fn test_statistics_endpoint() {
    let state = create_test_state();
    let done = create_scan(&state, "Done", "https://example.com").await;
    create_scan(&state, "Waiting", "https://example.com").await;
    state.db.complete_scan(&done, None, &scanward::scanning::engine::simulated_findings()).unwrap();

    let req = make_request("GET", "/api/scans/statistics", Some(OWNER_TOKEN), None);
    let response = app(&state).oneshot(req).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body = response_json(response).await;
    assert_eq!(body["total_scans"], 2);
    assert_eq!(body["completed_scans"], 1);
    assert_eq!(body["pending_scans"], 1);
    assert_eq!(body["total_vulnerabilities"], 2);
    assert_eq!(body["critical_count"], 1);
}

#[tokio::test]
async fn test_export_formats() {
    let state = create_test_state();
    let scan_id = create_scan(&state, "Export", "https://example.com").await;
    state.db.complete_scan(&scan_id, None, &scanward::scanning::engine::simulated_findings()).unwrap();

    let req = make_request("GET", &format!("/api/scans/{}/export?format=csv", scan_id), Some(OWNER_TOKEN), None);
    let response = app(&state).oneshot(req).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()["content-type"], "text/csv; charset=utf-8");
    let disposition = response.headers()["content-disposition"].to_str().unwrap().to_string();
    assert!(disposition.contains(&format!("scan-{}.csv", scan_id)));
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let csv = String::from_utf8(bytes.to_vec()).unwrap();
    assert_eq!(csv.lines().count(), 3);

    let req = make_request("GET", &format!("/api/scans/{}/export?format=pdf", scan_id), Some(OWNER_TOKEN), None);
    let response = app(&state).oneshot(req).await.unwrap();
    assert_eq!(response.status(), StatusCode::NOT_IMPLEMENTED);

    let req = make_request("GET", &format!("/api/scans/{}/export?format=docx", scan_id), Some(OWNER_TOKEN), None);
    let response = app(&state).oneshot(req).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_event_stream_opens_for_owner_only() {
    let state = create_test_state();
    let scan_id = create_scan(&state, "Live", "https://example.com").await;

    let req = make_request("GET", &format!("/api/scans/{}/events", scan_id), Some(OTHER_TOKEN), None);
    let response = app(&state).oneshot(req).await.unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    let req = make_request("GET", &format!("/api/scans/{}/events", scan_id), Some(OWNER_TOKEN), None);
    let response = app(&state).oneshot(req).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()["content-type"], "text/event-stream");
}

#[tokio::test]
async fn test_owner_event_stream_is_for_owners() {
    let state = create_test_state();

    let req = make_request("GET", "/api/scans/events", Some(SERVICE_TOKEN), None);
    let response = app(&state).oneshot(req).await.unwrap();
    assert_eq!(response.status(), StatusCode::FORBIDDEN);

    let req = make_request("GET", "/api/scans/events", Some(OWNER_TOKEN), None);
    let response = app(&state).oneshot(req).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()["content-type"], "text/event-stream");
}

#[tokio::test]
async fn test_graceful_shutdown_closes_open_event_stream() {
    let shutdown = CancellationToken::new();
    let state = create_test_state().with_shutdown(shutdown.clone());
    let scan_id = create_scan(&state, "Never Picked Up", "https://example.com").await;

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let router = app(&state);
    let signal = shutdown.clone();
    let server = tokio::spawn(async move {
        axum::serve(listener, router)
            .with_graceful_shutdown(async move { signal.cancelled().await })
            .await
    });

    let mut socket = tokio::net::TcpStream::connect(addr).await.unwrap();
    let request = format!(
        "GET /api/scans/{}/events HTTP/1.1\r\nHost: {}\r\nAuthorization: Bearer {}\r\n\r\n",
        scan_id, addr, OWNER_TOKEN
    );
    socket.write_all(request.as_bytes()).await.unwrap();
    let mut buf = vec![0u8; 4096];
    let n = socket.read(&mut buf).await.unwrap();
    assert!(String::from_utf8_lossy(&buf[..n]).starts_with("HTTP/1.1 200"));

    // The scan stays pending; only shutdown can end the stream.
    shutdown.cancel();
    let served = tokio::time::timeout(Duration::from_secs(5), server)
        .await
        .expect("server stopped with a stream open");
    assert!(served.unwrap().is_ok());
}
