// Process entry point (C15): load config, open the store, run migrations,
// start the worker pool, then bind whichever transport `--stdio` selects.

use clap::Parser;
use kotadb::config::EnvConfig;
use kotadb::db::DatabasePool;
use kotadb::github_app::GitHubAppClient;
use kotadb::jobs::{JobTracker, WorkerPool};
use kotadb::web;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "kotadb")]
#[command(about = "Local code-intelligence daemon for AI coding agents")]
#[command(version)]
struct Cli {
    /// Serve MCP over a line-delimited JSON-RPC stream on stdin/stdout
    /// instead of binding an HTTP listener.
    #[arg(long)]
    stdio: bool,

    /// Override the PORT environment variable.
    #[arg(long)]
    port: Option<u16>,
}

fn migrations_dir() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("migrations")
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    if let Some(home) = dirs::home_dir() {
        let _ = dotenvy::from_path(home.join(".kotadb/.env"));
    }

    let mut config = EnvConfig::load();
    if let Some(port) = cli.port {
        config.port = port;
    }

    let validation = config.validate();
    for warning in &validation.warnings {
        tracing::warn!("{warning}");
    }
    if !validation.is_valid() {
        for err in &validation.errors {
            eprintln!("kotadb: configuration error: {err}");
        }
        return ExitCode::FAILURE;
    }

    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(config.log_level.as_tracing_filter()))
        .with_writer(std::io::stderr)
        .finish();
    if tracing::subscriber::set_global_default(subscriber).is_err() {
        eprintln!("kotadb: logging subscriber already initialized");
    }

    let config = Arc::new(config);

    let db_path = config.data_dir.join("kotadb.sqlite3");
    let pool = match DatabasePool::open(&db_path, &migrations_dir()).await {
        Ok(pool) => pool,
        Err(err) => {
            error!(error = %err, "failed to open store / run migrations");
            return ExitCode::FAILURE;
        }
    };
    info!(path = %db_path.display(), "store opened, migrations applied");

    let mut jobs = JobTracker::new(pool.clone());
    if config.github_app.is_configured() {
        let http = kotadb::http::create_shared_client();
        jobs = jobs.with_github_app(GitHubAppClient::new(http, config.github_app.clone()));
        info!("GitHub App integration configured, installation tokens available for clone auth");
    }
    let worker_pool = WorkerPool::spawn(jobs.clone(), config.data_dir.clone(), config.worker_count);
    info!(workers = config.worker_count, "job tracker worker pool started");

    let _auto_reindex = kotadb::auto_reindex::spawn_periodic(
        pool.clone(),
        jobs.clone(),
        config.auto_reindex_threshold_minutes,
        config.auto_reindex_window_minutes,
    );

    let exit_code = if cli.stdio {
        run_stdio(pool, jobs, config.clone()).await
    } else {
        run_http(pool, jobs, config.clone()).await
    };

    worker_pool.shutdown().await;
    info!("worker pool drained, exiting");
    exit_code
}

async fn run_stdio(pool: DatabasePool, jobs: JobTracker, config: Arc<EnvConfig>) -> ExitCode {
    match kotadb::stdio::run(pool, jobs, config).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!(error = %err, "stdio transport terminated with an error");
            ExitCode::FAILURE
        }
    }
}

async fn run_http(pool: DatabasePool, jobs: JobTracker, config: Arc<EnvConfig>) -> ExitCode {
    let port = config.port;
    let state = web::state::AppState { pool, jobs, config };
    let router = web::create_router(state);

    let listener = match tokio::net::TcpListener::bind(("0.0.0.0", port)).await {
        Ok(listener) => listener,
        Err(err) => {
            error!(error = %err, port, "failed to bind HTTP listener");
            return ExitCode::FAILURE;
        }
    };
    info!(port, "HTTP transport listening");

    let result = axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await;

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!(error = %err, "HTTP server terminated with an error");
            ExitCode::FAILURE
        }
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        let _ = tokio::signal::ctrl_c().await;
    };

    #[cfg(unix)]
    let terminate = async {
        let mut signal = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler");
        signal.recv().await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("received SIGINT, shutting down"),
        _ = terminate => info!("received SIGTERM, shutting down"),
    }
}
