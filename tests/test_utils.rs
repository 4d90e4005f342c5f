//! Shared setup for integration tests: an in-memory store plus a fully
//! populated `AppState`/`DispatchContext` pair, used both for direct
//! `mcp::dispatch` calls and for `web::create_router` end-to-end requests.

use kotadb::config::EnvConfig;
use kotadb::db::DatabasePool;
use kotadb::jobs::JobTracker;
use kotadb::mcp::DispatchContext;
use kotadb::web::state::AppState;
use sha2::{Digest, Sha256};
use std::path::PathBuf;
use std::sync::Arc;

pub fn migrations_dir() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("migrations")
}

pub fn test_config() -> Arc<EnvConfig> {
    Arc::new(EnvConfig {
        allowed_origins: vec!["http://localhost:*".to_string()],
        ..EnvConfig::load()
    })
}

pub fn test_config_with_webhook_secret(secret: &str) -> Arc<EnvConfig> {
    let mut github_app = EnvConfig::load().github_app;
    github_app.webhook_secret = Some(secret.to_string());
    Arc::new(EnvConfig {
        allowed_origins: vec!["http://localhost:*".to_string()],
        github_app,
        ..EnvConfig::load()
    })
}

pub async fn test_app_state() -> AppState {
    let pool = DatabasePool::open_in_memory(&migrations_dir()).await.expect("open in-memory store");
    let jobs = JobTracker::new(pool.clone());
    AppState {
        pool,
        jobs,
        config: test_config(),
    }
}

/// Insert an API key directly into the store and return the bearer header
/// value a caller would send for it, e.g. `Bearer kota_free_key123_s3cret`.
pub async fn insert_api_key(pool: &DatabasePool, key_id: &str, secret: &str, tier: &str, owner_scope: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(secret.as_bytes());
    let hash = format!("{:x}", hasher.finalize());

    let key_id = key_id.to_string();
    let tier = tier.to_string();
    let owner_scope = owner_scope.to_string();
    pool.interact(move |conn| {
        conn.execute(
            "INSERT INTO api_keys (key_id, secret_hash, owner_scope, tier, created_at) VALUES (?1, ?2, ?3, ?4, datetime('now'))",
            rusqlite::params![key_id, hash, owner_scope, tier],
        )?;
        Ok(())
    })
    .await
    .expect("insert test api key");

    format!("Bearer kota_{tier}_{key_id}_{secret}")
}

/// Insert a bare repository row, bypassing the fetcher, and return its id.
pub async fn insert_repository(pool: &DatabasePool, owner_scope: &str, full_name: &str) -> i64 {
    let owner_scope = owner_scope.to_string();
    let full_name = full_name.to_string();
    pool.interact(move |conn| {
        conn.execute(
            "INSERT INTO repositories (owner_scope, full_name, git_url, default_branch, updated_at) \
             VALUES (?1, ?2, ?3, 'main', datetime('now'))",
            rusqlite::params![owner_scope, full_name, format!("https://example.com/{full_name}.git")],
        )?;
        Ok(conn.last_insert_rowid())
    })
    .await
    .expect("insert test repository")
}

/// Insert a repository linked to a GitHub App installation, as a webhook
/// delivery would expect to find it.
pub async fn insert_installed_repository(pool: &DatabasePool, full_name: &str, default_branch: &str, installation_id: i64) -> i64 {
    let full_name = full_name.to_string();
    let default_branch = default_branch.to_string();
    pool.interact(move |conn| {
        conn.execute(
            "INSERT INTO repositories (owner_scope, full_name, git_url, default_branch, installation_id, updated_at) \
             VALUES ('owner1', ?1, ?2, ?3, ?4, datetime('now'))",
            rusqlite::params![full_name, format!("https://example.com/{full_name}.git"), default_branch, installation_id],
        )?;
        Ok(conn.last_insert_rowid())
    })
    .await
    .expect("insert installed test repository")
}

pub fn dispatch_ctx(state: &AppState, key_id: &str, tier: &str) -> DispatchContext {
    DispatchContext {
        pool: state.pool.clone(),
        jobs: state.jobs.clone(),
        config: state.config.clone(),
        caller: kotadb::auth::CallerContext {
            owner_scope: "test-owner".to_string(),
            key_id: key_id.to_string(),
            tier: tier.to_string(),
        },
    }
}
