// MCP dispatcher (C7): a pure function of a parsed JSON-RPC 2.0 message and
// a caller context, shared verbatim by the HTTP and stdio transports.

mod tools;

pub use tools::{tool_catalog, ToolDefinition};

use crate::auth::CallerContext;
use crate::config::EnvConfig;
use crate::db::DatabasePool;
use crate::error::KotaError;
use crate::jobs::JobTracker;
use crate::query::{self, Direction};
use crate::repository;
use crate::schema;
use crate::sync;
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::Instrument;

pub const PROTOCOL_VERSION: &str = "2025-06-18";
const SERVER_NAME: &str = "kotadb";
const SERVER_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Everything a dispatch call needs, independent of transport.
#[derive(Clone)]
pub struct DispatchContext {
    pub pool: DatabasePool,
    pub jobs: JobTracker,
    pub config: Arc<EnvConfig>,
    pub caller: CallerContext,
}

#[derive(Debug)]
pub struct JsonRpcError {
    pub code: i64,
    pub message: String,
    pub data: Option<Value>,
}

impl JsonRpcError {
    fn new(code: i64, message: impl Into<String>) -> Self {
        Self { code, message: message.into(), data: None }
    }

    fn from_kota(err: KotaError) -> Self {
        Self {
            code: err.jsonrpc_code(),
            message: err.to_user_string(),
            data: Some(json!({ "code": err.taxonomy_code() })),
        }
    }

    fn to_value(&self) -> Value {
        let mut obj = json!({ "code": self.code, "message": self.message });
        if let (Some(data), Some(map)) = (&self.data, obj.as_object_mut()) {
            map.insert("data".to_string(), data.clone());
        }
        obj
    }
}

/// Dispatch one parsed JSON-RPC message. Returns `None` for notifications
/// (no `id`), which must never produce a response.
pub async fn dispatch(ctx: &DispatchContext, message: &Value) -> Option<Value> {
    let Some(obj) = message.as_object() else {
        return Some(error_response(None, JsonRpcError::new(-32600, "invalid request")));
    };

    let id = obj.get("id").cloned();
    let is_notification = id.is_none();

    let Some(method) = obj.get("method").and_then(Value::as_str) else {
        return notify_or(is_notification, error_response(id, JsonRpcError::new(-32600, "missing method")));
    };

    let span = tracing::info_span!("mcp_dispatch", method, key_id = %ctx.caller.key_id);
    let params = obj.get("params").cloned().unwrap_or(Value::Null);

    let result = async {
        match method {
            "initialize" => Ok(initialize_result()),
            "initialized" | "notifications/initialized" => Ok(Value::Null),
            "tools/list" => Ok(tools_list_result()),
            "tools/call" => tools_call(ctx, &params).await,
            _ => Err(JsonRpcError::new(-32601, format!("unknown method: {method}"))),
        }
    }
    .instrument(span)
    .await;

    if let Err(e) = &result {
        tracing::warn!(code = e.code, message = %e.message, "mcp dispatch returned an error");
    }

    if is_notification {
        return None;
    }

    match result {
        Ok(value) => Some(success_response(id, value)),
        Err(e) => Some(error_response(id, e)),
    }
}

fn success_response(id: Option<Value>, result: Value) -> Value {
    json!({ "jsonrpc": "2.0", "id": id, "result": result })
}

fn error_response(id: Option<Value>, err: JsonRpcError) -> Value {
    json!({ "jsonrpc": "2.0", "id": id, "error": err.to_value() })
}

fn notify_or(is_notification: bool, response: Value) -> Option<Value> {
    if is_notification {
        None
    } else {
        Some(response)
    }
}

fn initialize_result() -> Value {
    json!({
        "protocolVersion": PROTOCOL_VERSION,
        "capabilities": { "tools": { "listChanged": false } },
        "serverInfo": { "name": SERVER_NAME, "version": SERVER_VERSION },
    })
}

fn tools_list_result() -> Value {
    json!({ "tools": tool_catalog().iter().map(ToolDefinition::as_json).collect::<Vec<_>>() })
}

async fn tools_call(ctx: &DispatchContext, params: &Value) -> Result<Value, JsonRpcError> {
    let name = params
        .get("name")
        .and_then(Value::as_str)
        .ok_or_else(|| JsonRpcError::new(-32602, "params.name is required"))?;

    let arguments = params.get("arguments").cloned().unwrap_or_else(|| json!({}));

    let tool = tool_catalog()
        .into_iter()
        .find(|t| t.name == name)
        .ok_or_else(|| JsonRpcError::new(-32601, format!("unknown tool: {name}")))?;

    let violations = schema::validate(&tool.input_schema, &arguments);
    if !violations.is_empty() {
        return Err(JsonRpcError {
            code: -32602,
            message: "invalid tool arguments".to_string(),
            data: Some(json!({ "violations": violations })),
        });
    }

    let text = execute_tool(ctx, name, &arguments).await.map_err(JsonRpcError::from_kota)?;
    Ok(json!({ "content": [{ "type": "text", "text": text }] }))
}

async fn execute_tool(ctx: &DispatchContext, name: &str, args: &Value) -> Result<String, KotaError> {
    match name {
        "search_code" => {
            let term = args.get("term").and_then(Value::as_str).unwrap_or_default();
            let repository = args.get("repository").and_then(Value::as_i64);
            let limit = args.get("limit").and_then(Value::as_u64).unwrap_or(20) as usize;
            let hits = query::search_code(&ctx.pool, &ctx.caller.owner_scope, term, repository, limit).await?;
            Ok(serde_json::to_string(&hits.into_iter().map(search_hit_json).collect::<Vec<_>>())?)
        }
        "list_recent_files" => {
            let repository = args.get("repository").and_then(Value::as_i64);
            let limit = args.get("limit").and_then(Value::as_u64).unwrap_or(20) as usize;
            let files = query::list_recent_files(&ctx.pool, &ctx.caller.owner_scope, limit, repository).await?;
            Ok(serde_json::to_string(&files.into_iter().map(recent_file_json).collect::<Vec<_>>())?)
        }
        "search_dependencies" => {
            let repository = args
                .get("repository")
                .and_then(Value::as_i64)
                .ok_or_else(|| KotaError::InvalidParams("repository is required".into()))?;
            let file_path = args
                .get("file_path")
                .and_then(Value::as_str)
                .ok_or_else(|| KotaError::InvalidParams("file_path is required".into()))?;
            let direction = match args.get("direction").and_then(Value::as_str) {
                Some("dependents") => Direction::Dependents,
                _ => Direction::Dependencies,
            };
            let depth = args.get("depth").and_then(Value::as_u64).map(|d| d as usize);
            let paths = query::search_dependencies(&ctx.pool, &ctx.caller.owner_scope, repository, file_path, direction, depth).await?;
            Ok(serde_json::to_string(&paths)?)
        }
        "analyze_change_impact" => {
            let repository = args
                .get("repository")
                .and_then(Value::as_i64)
                .ok_or_else(|| KotaError::InvalidParams("repository is required".into()))?;
            let file_paths: Vec<String> = args
                .get("file_paths")
                .and_then(Value::as_array)
                .map(|a| a.iter().filter_map(|v| v.as_str().map(str::to_string)).collect())
                .unwrap_or_default();
            let impact = query::analyze_change_impact(&ctx.pool, &ctx.caller.owner_scope, repository, &file_paths).await?;
            Ok(serde_json::to_string(&json!({
                "impactedFiles": impact.impacted_files,
                "byLanguage": impact.by_language,
            }))?)
        }
        "index_repository" => {
            let full_name = args
                .get("repository")
                .and_then(Value::as_str)
                .ok_or_else(|| KotaError::InvalidParams("repository is required".into()))?;
            let git_ref = args.get("ref").and_then(Value::as_str).unwrap_or("main").to_string();
            let local_path = args
                .get("localPath")
                .or_else(|| args.get("local_path"))
                .and_then(Value::as_str)
                .map(str::to_string);

            let repo = repository::resolve_or_create(&ctx.pool, &ctx.caller.owner_scope, full_name, &ctx.config.git_base_url).await?;
            let job = ctx
                .jobs
                .enqueue_with_local_path(repo.id, git_ref, None, Some(ctx.caller.key_id.clone()), local_path)
                .await?;
            Ok(serde_json::to_string(&json!({ "jobId": job.id, "status": "pending" }))?)
        }
        "validate_implementation_spec" => {
            let instance: Value = args
                .get("json")
                .and_then(Value::as_str)
                .ok_or_else(|| KotaError::InvalidParams("json is required".into()))
                .and_then(|s| serde_json::from_str(s).map_err(KotaError::from))?;
            let schema_value = args
                .get("schema")
                .cloned()
                .ok_or_else(|| KotaError::InvalidParams("schema is required".into()))?;
            let violations = schema::validate(&schema_value, &instance);
            Ok(serde_json::to_string(&json!({ "valid": violations.is_empty(), "errors": violations }))?)
        }
        "kota_sync_export" => {
            let dir = ctx.config.data_dir.join("sync");
            sync::export_all(&ctx.pool, &dir).await?;
            Ok(serde_json::to_string(&json!({ "exported": true, "dir": dir.to_string_lossy() }))?)
        }
        "kota_sync_import" => {
            let dir = ctx.config.data_dir.join("sync");
            let report = sync::import_all(&ctx.pool, &dir).await?;
            Ok(serde_json::to_string(&json!({
                "deletedCount": report.deleted_count,
                "errors": report.errors.iter().map(|e| json!({ "table": e.table, "error": e.error })).collect::<Vec<_>>(),
                "securityIssues": report.security_issues,
            }))?)
        }
        other => Err(KotaError::NotFound(format!("tool not implemented: {other}"))),
    }
}

fn search_hit_json(hit: query::SearchHit) -> Value {
    json!({
        "filePath": hit.file_path,
        "repositoryId": hit.repository_id,
        "snippet": hit.snippet,
        "matchOffset": hit.match_offset,
        "indexedAt": hit.indexed_at,
    })
}

fn recent_file_json(f: query::RecentFile) -> Value {
    json!({
        "filePath": f.file_path,
        "repositoryId": f.repository_id,
        "language": f.language,
        "indexedAt": f.indexed_at,
    })
}
