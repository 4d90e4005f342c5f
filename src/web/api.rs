// Plain REST surface (§6.2): a thin façade over the same C5/C6 primitives
// the MCP tools use, for callers that don't speak JSON-RPC.

use crate::error::KotaError;
use crate::github_app::verify_webhook_signature;
use crate::jobs::{JobView, WebhookOutcome};
use crate::query;
use crate::repository;
use crate::web::auth_mw::{authenticate, rate_limit_headers};
use crate::web::response::{ApiError, ApiResult};
use crate::web::state::AppState;
use axum::body::Bytes;
use axum::extract::{Query, State};
use axum::http::HeaderMap;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Deserialize;
use serde_json::json;

#[derive(Debug, Deserialize)]
pub struct IndexRequest {
    pub repository: String,
    #[serde(rename = "ref")]
    pub git_ref: Option<String>,
    #[serde(rename = "localPath")]
    pub local_path: Option<String>,
}

pub async fn health(State(state): State<AppState>) -> ApiResult<Response> {
    let timestamp = chrono::Utc::now().to_rfc3339();

    let queue = state
        .pool
        .run(|conn| -> rusqlite::Result<(i64, i64, i64)> {
            let depth: i64 = conn.query_row(
                "SELECT COUNT(*) FROM index_jobs WHERE status = 'pending'",
                [],
                |row| row.get(0),
            )?;
            let failed_24h: i64 = conn.query_row(
                "SELECT COUNT(*) FROM index_jobs WHERE status = 'failed' AND completed_at >= datetime('now', '-1 day')",
                [],
                |row| row.get(0),
            )?;
            let oldest_pending_age_seconds: i64 = conn.query_row(
                "SELECT COALESCE(CAST((julianday('now') - julianday(MIN(created_at))) * 86400 AS INTEGER), 0) \
                 FROM index_jobs WHERE status = 'pending'",
                [],
                |row| row.get(0),
            )?;
            Ok((depth, failed_24h, oldest_pending_age_seconds))
        })
        .await
        .ok();

    let body = match queue {
        Some((depth, failed_24h, oldest_pending_age_seconds)) => json!({
            "status": "ok",
            "timestamp": timestamp,
            "queue": {
                "depth": depth,
                "workers": state.config.worker_count,
                "failed24h": failed_24h,
                "oldestPendingAgeSeconds": oldest_pending_age_seconds,
            },
        }),
        None => json!({ "status": "ok", "timestamp": timestamp }),
    };

    Ok(Json(body).into_response())
}

pub async fn index_repository(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<IndexRequest>,
) -> ApiResult<Response> {
    let (caller, decision) = authenticate(&state.pool, &headers).await?;

    let repo = repository::resolve_or_create(&state.pool, &caller.owner_scope, &req.repository, &state.config.git_base_url).await?;
    let git_ref = req.git_ref.unwrap_or_else(|| "main".to_string());
    let job = state
        .jobs
        .enqueue_with_local_path(repo.id, git_ref, None, Some(caller.key_id), req.local_path)
        .await?;

    let mut resp = (axum::http::StatusCode::ACCEPTED, Json(job_json(&job))).into_response();
    for (name, value) in rate_limit_headers(&decision) {
        resp.headers_mut().insert(name, value);
    }
    Ok(resp)
}

#[derive(Debug, Deserialize)]
struct WebhookPushPayload {
    #[serde(rename = "ref")]
    git_ref: String,
    after: String,
    repository: WebhookPushRepository,
    installation: Option<WebhookInstallation>,
}

#[derive(Debug, Deserialize)]
struct WebhookPushRepository {
    full_name: String,
    default_branch: String,
}

#[derive(Debug, Deserialize)]
struct WebhookInstallation {
    id: i64,
}

/// GitHub push webhook (§4.3, §4.7). Always answers `200` once the
/// signature checks out — both an enqueue and a branch-filter skip are
/// normal outcomes from GitHub's point of view.
pub async fn github_webhook(State(state): State<AppState>, headers: HeaderMap, body: Bytes) -> ApiResult<Response> {
    let secret = state
        .config
        .github_app
        .webhook_secret
        .as_deref()
        .ok_or_else(|| ApiError(KotaError::Internal("GITHUB_WEBHOOK_SECRET not configured".into())))?;

    let signature = headers
        .get("x-hub-signature-256")
        .and_then(|v| v.to_str().ok())
        .ok_or(KotaError::AuthMissingKey)?;

    if !verify_webhook_signature(&body, signature, secret) {
        return Err(KotaError::AuthInvalidKey.into());
    }

    let event = headers.get("x-github-event").and_then(|v| v.to_str().ok()).unwrap_or("");
    if event != "push" {
        return Ok(Json(json!({ "status": "ignored", "event": event })).into_response());
    }

    let payload: WebhookPushPayload =
        serde_json::from_slice(&body).map_err(|e| KotaError::InvalidParams(format!("malformed push payload: {e}")))?;

    let Some(installation) = payload.installation else {
        return Ok(Json(json!({ "status": "skipped", "reason": "no installation on payload" })).into_response());
    };

    let outcome = state
        .jobs
        .handle_webhook_push(
            installation.id,
            &payload.repository.full_name,
            &payload.git_ref,
            payload.after,
            &payload.repository.default_branch,
        )
        .await?;

    let body = match outcome {
        WebhookOutcome::Enqueued(job) => json!({ "status": "enqueued", "jobId": job.id }),
        WebhookOutcome::Skipped { reason } => json!({ "status": "skipped", "reason": reason }),
    };
    Ok(Json(body).into_response())
}

pub async fn job_status(
    State(state): State<AppState>,
    headers: HeaderMap,
    axum::extract::Path(job_id): axum::extract::Path<i64>,
) -> ApiResult<Response> {
    let (caller, decision) = authenticate(&state.pool, &headers).await?;
    let job = state.jobs.status(&caller.owner_scope, job_id).await?;

    let mut resp = Json(job_json(&job)).into_response();
    for (name, value) in rate_limit_headers(&decision) {
        resp.headers_mut().insert(name, value);
    }
    Ok(resp)
}

fn job_json(job: &JobView) -> serde_json::Value {
    json!({
        "id": job.id,
        "repositoryId": job.repository_id,
        "ref": job.git_ref,
        "commitSha": job.commit_sha,
        "localPath": job.local_path,
        "status": job.status.as_str(),
        "startedAt": job.started_at,
        "completedAt": job.completed_at,
        "errorMessage": job.error_message,
        "retryCount": job.retry_count,
        "filesIndexed": job.files_indexed,
        "symbolsExtracted": job.symbols_extracted,
        "referencesFound": job.references_found,
        "dependenciesExtracted": job.dependencies_extracted,
        "createdAt": job.created_at,
    })
}

#[derive(Debug, Deserialize)]
pub struct SearchParams {
    pub term: String,
    pub repository: Option<i64>,
    pub limit: Option<usize>,
}

pub async fn search(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(params): Query<SearchParams>,
) -> ApiResult<Response> {
    let (caller, decision) = authenticate(&state.pool, &headers).await?;
    let hits = query::search_code(&state.pool, &caller.owner_scope, &params.term, params.repository, params.limit.unwrap_or(20)).await?;

    let body = json!({
        "hits": hits.iter().map(|h| json!({
            "filePath": h.file_path,
            "repositoryId": h.repository_id,
            "snippet": h.snippet,
            "matchOffset": h.match_offset,
            "indexedAt": h.indexed_at,
        })).collect::<Vec<_>>(),
    });

    let mut resp = Json(body).into_response();
    for (name, value) in rate_limit_headers(&decision) {
        resp.headers_mut().insert(name, value);
    }
    Ok(resp)
}

#[derive(Debug, Deserialize)]
pub struct RecentFilesParams {
    pub limit: Option<usize>,
    pub repository: Option<i64>,
}

pub async fn recent_files(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(params): Query<RecentFilesParams>,
) -> ApiResult<Response> {
    let (caller, decision) = authenticate(&state.pool, &headers).await?;
    let files = query::list_recent_files(&state.pool, &caller.owner_scope, params.limit.unwrap_or(20), params.repository).await?;

    let body = json!({
        "files": files.iter().map(|f| json!({
            "filePath": f.file_path,
            "repositoryId": f.repository_id,
            "language": f.language,
            "indexedAt": f.indexed_at,
        })).collect::<Vec<_>>(),
    });

    let mut resp = Json(body).into_response();
    for (name, value) in rate_limit_headers(&decision) {
        resp.headers_mut().insert(name, value);
    }
    Ok(resp)
}

#[derive(Debug, Deserialize)]
pub struct ValidateOutputRequest {
    pub json: String,
    pub schema: serde_json::Value,
}

pub async fn validate_output(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<ValidateOutputRequest>,
) -> ApiResult<Response> {
    let (_caller, decision) = authenticate(&state.pool, &headers).await?;

    let instance: serde_json::Value = serde_json::from_str(&req.json)
        .map_err(|e| ApiError(crate::error::KotaError::InvalidParams(format!("json is not valid JSON: {e}"))))?;
    let errors = crate::schema::validate(&req.schema, &instance);

    let body = if errors.is_empty() {
        json!({ "valid": true })
    } else {
        json!({ "valid": false, "errors": errors })
    };

    let mut resp = Json(body).into_response();
    for (name, value) in rate_limit_headers(&decision) {
        resp.headers_mut().insert(name, value);
    }
    Ok(resp)
}
