// Stdio transport (C9): binds the dispatcher to a line-delimited JSON-RPC
// stream, for local agent launches that spawn the daemon as a child process
// instead of talking HTTP.
//
// A stdio-launched process and its parent agent already share a trust
// boundary (same user, same machine, no network hop), so this transport
// runs dispatch under a fixed local caller context rather than the
// Authorization/rate-limit chain the HTTP transport enforces.

use crate::auth::CallerContext;
use crate::config::EnvConfig;
use crate::db::DatabasePool;
use crate::jobs::JobTracker;
use crate::mcp::{self, DispatchContext};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tracing::{debug, warn};

fn local_caller() -> CallerContext {
    CallerContext {
        owner_scope: "local".to_string(),
        key_id: "stdio".to_string(),
        tier: "local".to_string(),
    }
}

/// Run the stdio loop until stdin reaches EOF. Each line is parsed as one
/// JSON-RPC message; malformed lines produce a parse-error response rather
/// than terminating the stream.
pub async fn run(pool: DatabasePool, jobs: JobTracker, config: Arc<EnvConfig>) -> anyhow::Result<()> {
    let ctx = DispatchContext {
        pool,
        jobs,
        config,
        caller: local_caller(),
    };

    let stdin = tokio::io::stdin();
    let mut lines = BufReader::new(stdin).lines();
    let mut stdout = tokio::io::stdout();

    while let Some(line) = lines.next_line().await? {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }

        let response = match serde_json::from_str::<serde_json::Value>(trimmed) {
            Ok(message) => mcp::dispatch(&ctx, &message).await,
            Err(err) => {
                warn!(error = %err, "malformed JSON-RPC line on stdin");
                Some(serde_json::json!({
                    "jsonrpc": "2.0",
                    "id": serde_json::Value::Null,
                    "error": { "code": -32700, "message": "parse error" },
                }))
            }
        };

        if let Some(value) = response {
            let mut payload = serde_json::to_vec(&value)?;
            payload.push(b'\n');
            stdout.write_all(&payload).await?;
            stdout.flush().await?;
        } else {
            debug!("notification produced no response");
        }
    }

    Ok(())
}
