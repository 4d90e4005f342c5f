//! KotaDB: a local code-intelligence daemon. Indexes git repositories into
//! an embedded relational store, extracts symbols/references/dependencies,
//! and serves queries to AI coding agents over an MCP JSON-RPC endpoint and
//! a small REST surface.

pub mod auth;
pub mod auto_reindex;
pub mod config;
pub mod db;
pub mod error;
pub mod git;
pub mod github_app;
pub mod http;
pub mod indexer;
pub mod jobs;
pub mod mcp;
pub mod project_files;
pub mod query;
pub mod repository;
pub mod schema;
pub mod stdio;
pub mod sync;
pub mod utils;
pub mod web;

pub use error::{KotaError, Result};
