// MCP over HTTP (C8): hand-rolled `POST /mcp` / `GET /mcp`, replacing the
// teacher's rmcp-based `StreamableHttpService` with validation that matches
// this dispatcher's stateless, transport-agnostic contract.

use crate::error::KotaError;
use crate::mcp::{self, DispatchContext, PROTOCOL_VERSION};
use crate::web::auth_mw::{authenticate, rate_limit_headers};
use crate::web::response::{ApiError, ApiResult};
use crate::web::state::AppState;
use axum::extract::State;
use axum::http::HeaderMap;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::{json, Value};

const MAX_SESSION_ID_LEN: usize = 256;

fn origin_allowed(origin: &str, allowed: &[String]) -> bool {
    allowed.iter().any(|pattern| match pattern.strip_suffix(":*") {
        Some(prefix) => origin.starts_with(prefix) && origin[prefix.len()..].trim_start_matches(':').chars().all(|c| c.is_ascii_digit()),
        None => origin == pattern,
    })
}

fn validate_envelope(headers: &HeaderMap, allowed_origins: &[String]) -> Result<(), ApiError> {
    let origin = headers
        .get("origin")
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| KotaError::ForbiddenOrigin("missing Origin header".into()))?;
    if !origin_allowed(origin, allowed_origins) {
        return Err(KotaError::ForbiddenOrigin(origin.to_string()).into());
    }

    let protocol_version = headers.get("mcp-protocol-version").and_then(|v| v.to_str().ok());
    if protocol_version != Some(PROTOCOL_VERSION) {
        return Err(KotaError::InvalidParams(format!(
            "MCP-Protocol-Version must be {PROTOCOL_VERSION}"
        ))
        .into());
    }

    let accept = headers.get("accept").and_then(|v| v.to_str().ok()).unwrap_or_default();
    if !accept.contains("application/json") || !accept.contains("text/event-stream") {
        return Err(KotaError::NotAcceptable.into());
    }

    if let Some(session_id) = headers.get("mcp-session-id").and_then(|v| v.to_str().ok()) {
        if session_id.is_empty() || session_id.len() > MAX_SESSION_ID_LEN {
            return Err(KotaError::InvalidParams("malformed Mcp-Session-Id".into()).into());
        }
    }

    Ok(())
}

pub async fn post_mcp(State(state): State<AppState>, headers: HeaderMap, Json(body): Json<Value>) -> ApiResult<Response> {
    validate_envelope(&headers, &state.config.allowed_origins)?;
    let (caller, decision) = authenticate(&state.pool, &headers).await?;

    let ctx = DispatchContext {
        pool: state.pool.clone(),
        jobs: state.jobs.clone(),
        config: state.config.clone(),
        caller,
    };

    let response = mcp::dispatch(&ctx, &body).await;
    let mut resp = match response {
        Some(value) => Json(value).into_response(),
        None => axum::http::StatusCode::ACCEPTED.into_response(),
    };

    for (name, value) in rate_limit_headers(&decision) {
        resp.headers_mut().insert(name, value);
    }
    Ok(resp)
}

pub async fn get_mcp() -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "protocol": PROTOCOL_VERSION,
        "version": env!("CARGO_PKG_VERSION"),
        "transport": "http",
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wildcard_port_pattern_matches_any_localhost_port() {
        let allowed = vec!["http://localhost:*".to_string()];
        assert!(origin_allowed("http://localhost:3000", &allowed));
        assert!(origin_allowed("http://localhost:8080", &allowed));
        assert!(!origin_allowed("http://evil.example", &allowed));
    }

    #[test]
    fn exact_origin_must_match_fully() {
        let allowed = vec!["https://app.example.com".to_string()];
        assert!(origin_allowed("https://app.example.com", &allowed));
        assert!(!origin_allowed("https://app.example.com.evil.com", &allowed));
    }
}
