// Auto-reindex policy (§4.3): a periodic orchestration layer over the job
// tracker. For every API key whose rate-limit window has elapsed, enqueues
// indexing for that key's owner's repositories that haven't completed an
// index job within the staleness threshold. Never calls the worker pool
// directly — `enqueue` is the only tracker primitive this module touches.

use crate::db::DatabasePool;
use crate::error::Result;
use crate::jobs::JobTracker;
use rusqlite::params;
use std::time::Duration;

/// Run one sweep. Returns the number of jobs enqueued.
pub async fn run_once(pool: &DatabasePool, jobs: &JobTracker, threshold_minutes: u64, window_minutes: u64) -> Result<usize> {
    let due_keys = due_keys(pool, window_minutes).await?;

    let mut enqueued = 0usize;
    for (key_id, owner_scope) in due_keys {
        let stale = stale_repositories(pool, &owner_scope, threshold_minutes).await?;
        for (repository_id, default_branch) in stale {
            jobs.enqueue(repository_id, default_branch, None, Some(key_id.clone())).await?;
            enqueued += 1;
        }
        mark_ran(pool, &key_id).await?;
    }

    if enqueued > 0 {
        tracing::info!(enqueued, "auto-reindex enqueued stale repositories");
    }
    Ok(enqueued)
}

/// Active keys whose auto-reindex window has elapsed (or never run).
async fn due_keys(pool: &DatabasePool, window_minutes: u64) -> Result<Vec<(String, String)>> {
    pool.run(move |conn| -> rusqlite::Result<Vec<(String, String)>> {
        let mut stmt = conn.prepare(
            "SELECT key_id, owner_scope FROM api_keys \
             WHERE revoked = 0 AND NOT EXISTS ( \
                 SELECT 1 FROM auto_reindex_runs r WHERE r.key_id = api_keys.key_id \
                 AND (julianday('now') - julianday(r.last_run_at)) * 1440 < ?1 \
             )",
        )?;
        let rows = stmt
            .query_map(params![window_minutes as i64], |row| Ok((row.get(0)?, row.get(1)?)))?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    })
    .await
}

/// Repositories owned by `owner_scope` with no job in flight and whose most
/// recent completed job (if any) is older than `threshold_minutes`.
async fn stale_repositories(pool: &DatabasePool, owner_scope: &str, threshold_minutes: u64) -> Result<Vec<(i64, String)>> {
    let owner_scope = owner_scope.to_string();
    pool.run(move |conn| -> rusqlite::Result<Vec<(i64, String)>> {
        let mut stmt = conn.prepare(
            "SELECT r.id, r.default_branch FROM repositories r \
             WHERE r.owner_scope = ?1 \
             AND NOT EXISTS ( \
                 SELECT 1 FROM index_jobs j WHERE j.repository_id = r.id AND j.status IN ('pending', 'processing') \
             ) \
             AND COALESCE( \
                 (julianday('now') - julianday( \
                     (SELECT MAX(completed_at) FROM index_jobs j2 WHERE j2.repository_id = r.id AND j2.status = 'completed') \
                 )) * 1440, \
                 1e9 \
             ) >= ?2",
        )?;
        let rows = stmt
            .query_map(params![owner_scope, threshold_minutes as i64], |row| Ok((row.get(0)?, row.get(1)?)))?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    })
    .await
}

async fn mark_ran(pool: &DatabasePool, key_id: &str) -> Result<()> {
    let key_id = key_id.to_string();
    pool.run(move |conn| {
        conn.execute(
            "INSERT INTO auto_reindex_runs (key_id, last_run_at) VALUES (?1, datetime('now')) \
             ON CONFLICT(key_id) DO UPDATE SET last_run_at = excluded.last_run_at",
            params![key_id],
        )
    })
    .await?;
    Ok(())
}

/// Spawn the periodic sweep. The tick interval is independent of
/// `window_minutes` — it just bounds how promptly a key becomes eligible
/// again after its window elapses; the per-key gate in `due_keys` is what
/// actually prevents thrash.
pub fn spawn_periodic(pool: DatabasePool, jobs: JobTracker, threshold_minutes: u64, window_minutes: u64) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(60));
        loop {
            interval.tick().await;
            if let Err(e) = run_once(&pool, &jobs, threshold_minutes, window_minutes).await {
                tracing::warn!(error = %e, "auto-reindex pass failed");
            }
        }
    })
}
