// HTTP transport (C8): axum router binding the REST surface and the
// MCP-over-HTTP endpoint onto the same dispatcher the stdio transport uses.

pub mod api;
pub mod auth_mw;
pub mod mcp_http;
pub mod response;
pub mod state;

use axum::routing::{get, post};
use axum::Router;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::web::state::AppState;

pub fn create_router(state: AppState) -> Router {
    let cors = CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any);

    Router::new()
        .route("/health", get(api::health))
        .route("/index", post(api::index_repository))
        .route("/webhooks/github", post(api::github_webhook))
        .route("/jobs/{job_id}", get(api::job_status))
        .route("/search", get(api::search))
        .route("/files/recent", get(api::recent_files))
        .route("/validate-output", post(api::validate_output))
        .route("/mcp", post(mcp_http::post_mcp).get(mcp_http::get_mcp))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
