//! End-to-end coverage of both transports: MCP dispatch directly, and the
//! REST surface through `web::create_router` via `tower::ServiceExt::oneshot`.

mod test_utils;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use serde_json::{json, Value};
use tower::ServiceExt;

use hmac::{Hmac, Mac};
use sha2::Sha256;

use test_utils::{
    dispatch_ctx, insert_api_key, insert_installed_repository, insert_repository, test_app_state, test_config_with_webhook_secret,
};

fn sign_webhook(payload: &[u8], secret: &str) -> String {
    let mut mac = Hmac::<Sha256>::new_from_slice(secret.as_bytes()).unwrap();
    mac.update(payload);
    format!("sha256={}", hex::encode(mac.finalize().into_bytes()))
}

#[tokio::test]
async fn mcp_initialize_reports_protocol_version() {
    let state = test_app_state().await;
    let ctx = dispatch_ctx(&state, "key1", "free");

    let request = json!({ "jsonrpc": "2.0", "id": 1, "method": "initialize" });
    let response = kotadb::mcp::dispatch(&ctx, &request).await.unwrap();

    assert!(response["result"]["protocolVersion"].is_string());
}

#[tokio::test]
async fn mcp_tools_list_matches_the_catalog() {
    let state = test_app_state().await;
    let ctx = dispatch_ctx(&state, "key1", "free");

    let request = json!({ "jsonrpc": "2.0", "id": 1, "method": "tools/list" });
    let response = kotadb::mcp::dispatch(&ctx, &request).await.unwrap();

    let tools = response["result"]["tools"].as_array().unwrap();
    assert_eq!(tools.len(), kotadb::mcp::tool_catalog().len());
}

#[tokio::test]
async fn mcp_search_code_round_trips_through_tools_call() {
    let state = test_app_state().await;
    let ctx = dispatch_ctx(&state, "key1", "free");

    let request = json!({
        "jsonrpc": "2.0", "id": 7, "method": "tools/call",
        "params": { "name": "search_code", "arguments": { "term": "fn" } }
    });
    let response = kotadb::mcp::dispatch(&ctx, &request).await.unwrap();

    assert!(response["result"].is_object());
    assert!(response["error"].is_null());
}

#[tokio::test]
async fn mcp_index_repository_enqueues_a_pending_job() {
    let state = test_app_state().await;
    let ctx = dispatch_ctx(&state, "key1", "free");

    let request = json!({
        "jsonrpc": "2.0", "id": 3, "method": "tools/call",
        "params": { "name": "index_repository", "arguments": { "repository": "acme/demo", "ref": "main" } }
    });
    let response = kotadb::mcp::dispatch(&ctx, &request).await.unwrap();

    let content = response["result"]["content"][0]["text"]
        .as_str()
        .unwrap_or_else(|| response["result"].as_str().unwrap_or(""));
    let parsed: Value = serde_json::from_str(content).unwrap_or(response["result"].clone());
    assert_eq!(parsed["status"], "pending");
    assert!(parsed["jobId"].as_i64().is_some());
}

#[tokio::test]
async fn mcp_validate_implementation_spec_reports_schema_violations() {
    let state = test_app_state().await;
    let ctx = dispatch_ctx(&state, "key1", "free");

    let schema = json!({ "type": "object", "required": ["name"], "properties": { "name": { "type": "string" } } });
    let request = json!({
        "jsonrpc": "2.0", "id": 9, "method": "tools/call",
        "params": {
            "name": "validate_implementation_spec",
            "arguments": { "json": "{}", "schema": schema }
        }
    });
    let response = kotadb::mcp::dispatch(&ctx, &request).await.unwrap();

    assert!(response["error"].is_null(), "unexpected error: {response:?}");
}

#[tokio::test]
async fn mcp_unknown_method_returns_json_rpc_error() {
    let state = test_app_state().await;
    let ctx = dispatch_ctx(&state, "key1", "free");

    let request = json!({ "jsonrpc": "2.0", "id": 1, "method": "not/a/method" });
    let response = kotadb::mcp::dispatch(&ctx, &request).await.unwrap();

    assert_eq!(response["error"]["code"], -32601);
}

#[tokio::test]
async fn mcp_notifications_produce_no_response() {
    let state = test_app_state().await;
    let ctx = dispatch_ctx(&state, "key1", "free");

    let request = json!({ "jsonrpc": "2.0", "method": "notifications/initialized" });
    let response = kotadb::mcp::dispatch(&ctx, &request).await;

    assert!(response.is_none());
}

async fn router_with_state() -> (axum::Router, kotadb::web::state::AppState) {
    let state = test_app_state().await;
    let router = kotadb::web::create_router(state.clone());
    (router, state)
}

#[tokio::test]
async fn http_health_is_public_and_reports_ok() {
    let (app, _state) = router_with_state().await;

    let response = app
        .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let parsed: Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(parsed["status"], "ok");
}

#[tokio::test]
async fn http_index_requires_authentication() {
    let (app, _state) = router_with_state().await;

    let response = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/index")
                .header("content-type", "application/json")
                .body(Body::from(json!({ "repository": "acme/demo" }).to_string()))
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn http_index_enqueues_a_job_for_an_authenticated_caller() {
    let (app, state) = router_with_state().await;
    let auth_header = insert_api_key(&state.pool, "key1", "s3cret", "free", "owner1").await;

    let response = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/index")
                .header("content-type", "application/json")
                .header("authorization", auth_header)
                .body(Body::from(json!({ "repository": "acme/demo", "ref": "main" }).to_string()))
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::ACCEPTED);
    let body = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let parsed: Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(parsed["status"], "pending");
}

#[tokio::test]
async fn http_index_reuses_a_local_path_without_cloning() {
    let (app, state) = router_with_state().await;
    let auth_header = insert_api_key(&state.pool, "key1", "s3cret", "free", "owner1").await;

    let local_dir = std::env::temp_dir().join(format!("kotadb-test-local-path-{}", std::process::id()));
    std::fs::create_dir_all(&local_dir).unwrap();

    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/index")
                .header("content-type", "application/json")
                .header("authorization", auth_header)
                .body(Body::from(
                    json!({
                        "repository": "acme/demo",
                        "ref": "main",
                        "localPath": local_dir.to_string_lossy(),
                    })
                    .to_string(),
                ))
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::ACCEPTED);
    let body = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let parsed: Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(parsed["localPath"], local_dir.to_string_lossy().as_ref());

    std::fs::remove_dir_all(&local_dir).ok();
}

#[tokio::test]
async fn http_job_status_round_trips_through_the_tracker() {
    let (app, state) = router_with_state().await;
    let auth_header = insert_api_key(&state.pool, "key1", "s3cret", "free", "owner1").await;
    let repo_id = insert_repository(&state.pool, "owner1", "acme/demo").await;
    let job = state.jobs.enqueue(repo_id, "main".to_string(), Some("sha1".to_string()), None).await.unwrap();

    let response = app
        .oneshot(
            Request::builder()
                .uri(format!("/jobs/{}", job.id))
                .header("authorization", auth_header)
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let parsed: Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(parsed["id"], job.id);
    assert_eq!(parsed["status"], "pending");
}

#[tokio::test]
async fn http_search_returns_rate_limit_headers() {
    let (app, state) = router_with_state().await;
    let auth_header = insert_api_key(&state.pool, "key1", "s3cret", "free", "owner1").await;

    let response = app
        .oneshot(
            Request::builder()
                .uri("/search?term=fn")
                .header("authorization", auth_header)
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert!(response.headers().get("x-ratelimit-remaining-hour").is_some());
}

#[tokio::test]
async fn http_validate_output_reports_schema_violations() {
    let (app, state) = router_with_state().await;
    let auth_header = insert_api_key(&state.pool, "key1", "s3cret", "free", "owner1").await;

    let schema = json!({ "type": "object", "required": ["name"] });
    let response = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/validate-output")
                .header("content-type", "application/json")
                .header("authorization", auth_header)
                .body(Body::from(json!({ "json": "{}", "schema": schema }).to_string()))
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let parsed: Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(parsed["valid"], false);
}

async fn router_with_webhook_secret(secret: &str) -> (axum::Router, kotadb::web::state::AppState) {
    let pool = kotadb::db::DatabasePool::open_in_memory(&test_utils::migrations_dir()).await.unwrap();
    let jobs = kotadb::jobs::JobTracker::new(pool.clone());
    let state = kotadb::web::state::AppState { pool, jobs, config: test_config_with_webhook_secret(secret) };
    let router = kotadb::web::create_router(state.clone());
    (router, state)
}

fn push_payload(git_ref: &str, full_name: &str, default_branch: &str, installation_id: i64) -> String {
    json!({
        "ref": git_ref,
        "after": "sha1",
        "repository": { "full_name": full_name, "default_branch": default_branch },
        "installation": { "id": installation_id },
    })
    .to_string()
}

#[tokio::test]
async fn http_webhook_deduplicates_two_deliveries_for_the_same_commit() {
    let (app, state) = router_with_webhook_secret("whsec").await;
    insert_installed_repository(&state.pool, "acme/demo", "main", 42).await;

    let payload = push_payload("refs/heads/main", "acme/demo", "main", 42);
    let signature = sign_webhook(payload.as_bytes(), "whsec");

    for _ in 0..2 {
        let response = app
            .clone()
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/webhooks/github")
                    .header("content-type", "application/json")
                    .header("x-github-event", "push")
                    .header("x-hub-signature-256", &signature)
                    .body(Body::from(payload.clone()))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    let pending: i64 = state
        .pool
        .interact(|conn| conn.query_row("SELECT COUNT(*) FROM index_jobs WHERE status = 'pending'", [], |r| r.get(0)))
        .await
        .unwrap();
    assert_eq!(pending, 1);
}

#[tokio::test]
async fn http_webhook_drops_a_non_default_branch_push_with_no_job_row() {
    let (app, state) = router_with_webhook_secret("whsec").await;
    insert_installed_repository(&state.pool, "acme/demo", "main", 42).await;

    let payload = push_payload("refs/heads/feature/x", "acme/demo", "main", 42);
    let signature = sign_webhook(payload.as_bytes(), "whsec");

    let response = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/webhooks/github")
                .header("content-type", "application/json")
                .header("x-github-event", "push")
                .header("x-hub-signature-256", &signature)
                .body(Body::from(payload))
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let parsed: Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(parsed["status"], "skipped");

    let total: i64 = state.pool.interact(|conn| conn.query_row("SELECT COUNT(*) FROM index_jobs", [], |r| r.get(0))).await.unwrap();
    assert_eq!(total, 0);
}

#[tokio::test]
async fn http_webhook_rejects_a_bad_signature() {
    let (app, state) = router_with_webhook_secret("whsec").await;
    insert_installed_repository(&state.pool, "acme/demo", "main", 42).await;

    let payload = push_payload("refs/heads/main", "acme/demo", "main", 42);

    let response = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/webhooks/github")
                .header("content-type", "application/json")
                .header("x-github-event", "push")
                .header("x-hub-signature-256", "sha256=deadbeef")
                .body(Body::from(payload))
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn http_mcp_post_rejects_a_missing_protocol_version() {
    let (app, state) = router_with_state().await;
    let auth_header = insert_api_key(&state.pool, "key1", "s3cret", "free", "owner1").await;

    let response = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/mcp")
                .header("content-type", "application/json")
                .header("accept", "application/json, text/event-stream")
                .header("authorization", auth_header)
                .body(Body::from(json!({ "jsonrpc": "2.0", "id": 1, "method": "initialize" }).to_string()))
                .unwrap(),
        )
        .await
        .unwrap();

    assert_ne!(response.status(), StatusCode::OK);
}
