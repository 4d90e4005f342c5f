// Durable index-job queue and worker pool (C5).

use crate::db::DatabasePool;
use crate::error::{KotaError, Result};
use crate::git::CloneAuth;
use crate::github_app::GitHubAppClient;
use rusqlite::{params, OptionalExtension};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Notify;

const MAX_RETRIES: u32 = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobStatus {
    Pending,
    Processing,
    Completed,
    Failed,
    Skipped,
}

impl JobStatus {
    fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Processing => "processing",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
            JobStatus::Skipped => "skipped",
        }
    }

    fn parse(s: &str) -> Self {
        match s {
            "processing" => JobStatus::Processing,
            "completed" => JobStatus::Completed,
            "failed" => JobStatus::Failed,
            "skipped" => JobStatus::Skipped,
            _ => JobStatus::Pending,
        }
    }
}

/// Result of routing a webhook push event through [`JobTracker::handle_webhook_push`].
#[derive(Debug, Clone)]
pub enum WebhookOutcome {
    Enqueued(JobView),
    Skipped { reason: String },
}

#[derive(Debug, Clone)]
pub struct JobView {
    pub id: i64,
    pub repository_id: i64,
    pub git_ref: String,
    pub commit_sha: Option<String>,
    pub status: JobStatus,
    pub started_at: Option<String>,
    pub completed_at: Option<String>,
    pub error_message: Option<String>,
    pub local_path: Option<String>,
    pub retry_count: u32,
    pub files_indexed: i64,
    pub symbols_extracted: i64,
    pub references_found: i64,
    pub dependencies_extracted: i64,
    pub created_at: String,
}

fn row_to_job(row: &rusqlite::Row) -> rusqlite::Result<JobView> {
    Ok(JobView {
        id: row.get("id")?,
        repository_id: row.get("repository_id")?,
        git_ref: row.get("ref")?,
        commit_sha: row.get("commit_sha")?,
        local_path: row.get("local_path")?,
        status: JobStatus::parse(&row.get::<_, String>("status")?),
        started_at: row.get("started_at")?,
        completed_at: row.get("completed_at")?,
        error_message: row.get("error_message")?,
        retry_count: row.get::<_, i64>("retry_count")? as u32,
        files_indexed: row.get("files_indexed")?,
        symbols_extracted: row.get("symbols_extracted")?,
        references_found: row.get("references_found")?,
        dependencies_extracted: row.get("dependencies_extracted")?,
        created_at: row.get("created_at")?,
    })
}

const SELECT_JOB: &str = "SELECT id, repository_id, ref, commit_sha, local_path, status, started_at, completed_at, \
     error_message, retry_count, files_indexed, symbols_extracted, references_found, \
     dependencies_extracted, created_at FROM index_jobs";

/// Durable job queue backed by the store. Cheap to clone — shares the pool,
/// an in-process notifier used to wake idle workers, and the live
/// cancellation-flag map so `cancel()` reaches an in-flight job's worker.
#[derive(Clone)]
pub struct JobTracker {
    pool: DatabasePool,
    notify: Arc<Notify>,
    github_app: Option<GitHubAppClient>,
    cancelled: Arc<Mutex<HashMap<i64, Arc<AtomicBool>>>>,
}

impl JobTracker {
    pub fn new(pool: DatabasePool) -> Self {
        Self {
            pool,
            notify: Arc::new(Notify::new()),
            github_app: None,
            cancelled: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Attach the GitHub-App client used to mint installation tokens for
    /// repositories that carry an `installation_id` (§4.7). Without one,
    /// C4 falls back to an unauthenticated clone.
    pub fn with_github_app(mut self, client: GitHubAppClient) -> Self {
        self.github_app = Some(client);
        self
    }

    /// Enqueue a job, deduplicating against J1: an existing `pending` job
    /// for the same `(repository_id, commit_sha)` is returned unchanged.
    pub async fn enqueue(
        &self,
        repository_id: i64,
        git_ref: String,
        commit_sha: Option<String>,
        requested_by: Option<String>,
    ) -> Result<JobView> {
        self.enqueue_with_local_path(repository_id, git_ref, commit_sha, requested_by, None).await
    }

    /// Same as [`Self::enqueue`], but carries a caller-supplied working-tree
    /// path through to the worker so C4's "local_path reused as-is, no
    /// fetch" rule can be honored.
    pub async fn enqueue_with_local_path(
        &self,
        repository_id: i64,
        git_ref: String,
        commit_sha: Option<String>,
        requested_by: Option<String>,
        local_path: Option<String>,
    ) -> Result<JobView> {
        let result = self
            .pool
            .run(move |conn| -> std::result::Result<JobView, rusqlite::Error> {
                if let Some(sha) = &commit_sha {
                    let existing: Option<i64> = conn
                        .query_row(
                            "SELECT id FROM index_jobs WHERE repository_id = ?1 AND commit_sha = ?2 AND status = 'pending'",
                            params![repository_id, sha],
                            |row| row.get(0),
                        )
                        .optional()?;
                    if let Some(id) = existing {
                        return conn.query_row(
                            &format!("{SELECT_JOB} WHERE id = ?1"),
                            params![id],
                            row_to_job,
                        );
                    }
                }

                conn.execute(
                    "INSERT INTO index_jobs (repository_id, ref, commit_sha, local_path, status, requested_by, created_at) \
                     VALUES (?1, ?2, ?3, ?4, 'pending', ?5, datetime('now'))",
                    params![repository_id, git_ref, commit_sha, local_path, requested_by],
                )?;
                let id = conn.last_insert_rowid();
                conn.query_row(&format!("{SELECT_JOB} WHERE id = ?1"), params![id], row_to_job)
            })
            .await?;

        tracing::info!(job_id = result.id, repository_id, job_status = result.status.as_str(), "job enqueued");
        self.notify.notify_one();
        Ok(result)
    }

    /// Looks up a job, scoped to `owner_scope` — a job belonging to another
    /// owner's repository resolves to the same not-found error as a job id
    /// that doesn't exist at all.
    /// Webhook-driven enqueue (§4.3): routes a GitHub push event through the
    /// same deduplicated `enqueue`, but only for the repository's effective
    /// default branch (the stored value if set, else the payload's). Pushes
    /// to any other branch are dropped with a `skipped` reason recorded for
    /// observability — no job row is created for them.
    pub async fn handle_webhook_push(
        &self,
        installation_id: i64,
        full_name: &str,
        git_ref: &str,
        commit_sha: String,
        payload_default_branch: &str,
    ) -> Result<WebhookOutcome> {
        let full_name_owned = full_name.to_string();
        let repo = self
            .pool
            .run(move |conn| -> rusqlite::Result<Option<(i64, String)>> {
                conn.query_row(
                    "SELECT id, default_branch FROM repositories WHERE installation_id = ?1 AND full_name = ?2",
                    params![installation_id, full_name_owned],
                    |row| Ok((row.get(0)?, row.get(1)?)),
                )
                .optional()
            })
            .await?;

        let Some((repository_id, stored_default_branch)) = repo else {
            tracing::info!(full_name, installation_id, "webhook push for an unregistered repository, skipped");
            return Ok(WebhookOutcome::Skipped { reason: "repository not registered".to_string() });
        };

        let default_branch = if stored_default_branch.is_empty() { payload_default_branch } else { &stored_default_branch };
        let branch = git_ref.strip_prefix("refs/heads/").unwrap_or(git_ref);

        if branch != default_branch {
            let reason = format!("ref {branch} is not the default branch ({default_branch})");
            tracing::info!(repository_id, branch, default_branch, "webhook push to a non-default branch, skipped");
            return Ok(WebhookOutcome::Skipped { reason });
        }

        let job = self.enqueue(repository_id, branch.to_string(), Some(commit_sha), None).await?;
        Ok(WebhookOutcome::Enqueued(job))
    }

    pub async fn status(&self, owner_scope: &str, job_id: i64) -> Result<JobView> {
        let owner_scope = owner_scope.to_string();
        self.pool
            .run(move |conn| {
                conn.query_row(
                    "SELECT index_jobs.id, index_jobs.repository_id, index_jobs.ref, index_jobs.commit_sha, \
                     index_jobs.local_path, index_jobs.status, index_jobs.started_at, index_jobs.completed_at, \
                     index_jobs.error_message, index_jobs.retry_count, index_jobs.files_indexed, \
                     index_jobs.symbols_extracted, index_jobs.references_found, index_jobs.dependencies_extracted, \
                     index_jobs.created_at \
                     FROM index_jobs JOIN repositories r ON r.id = index_jobs.repository_id \
                     WHERE index_jobs.id = ?1 AND r.owner_scope = ?2",
                    params![job_id, owner_scope],
                    row_to_job,
                )
                .map_err(|e| match e {
                    rusqlite::Error::QueryReturnedNoRows => KotaError::NotFound(format!("job {job_id}")),
                    other => KotaError::Db(other),
                })
            })
            .await
    }

    pub async fn cancel(&self, job_id: i64) -> Result<()> {
        self.pool
            .run(move |conn| {
                conn.execute(
                    "UPDATE index_jobs SET status = 'failed', error_message = 'cancelled', completed_at = datetime('now') \
                     WHERE id = ?1 AND status IN ('pending', 'processing')",
                    params![job_id],
                )
            })
            .await?;

        if let Some(flag) = self.cancelled.lock().unwrap().get(&job_id) {
            flag.store(true, Ordering::Relaxed);
        }

        tracing::info!(job_id, "job cancelled");
        Ok(())
    }

    /// Re-enter a `failed` job into `pending` (J2).
    pub async fn retry(&self, job_id: i64) -> Result<JobView> {
        let job = self
            .pool
            .run(move |conn| -> std::result::Result<JobView, rusqlite::Error> {
                conn.execute(
                    "UPDATE index_jobs SET status = 'pending', error_message = NULL, available_at = NULL \
                     WHERE id = ?1 AND status = 'failed'",
                    params![job_id],
                )?;
                conn.query_row(&format!("{SELECT_JOB} WHERE id = ?1"), params![job_id], row_to_job)
            })
            .await?;
        tracing::info!(job_id, "job re-entered pending for retry");
        self.notify.notify_one();
        Ok(job)
    }

    /// Atomically claim the oldest eligible `pending` job and stamp it
    /// `processing`. Returns `None` if the queue is empty.
    async fn claim_next(&self) -> Result<Option<(i64, i64, String, Option<String>, Option<String>)>> {
        self.pool
            .run(move |conn| -> std::result::Result<_, rusqlite::Error> {
                let claimed: Option<(i64, i64, String, Option<String>, Option<String>)> = conn
                    .query_row(
                        "SELECT id, repository_id, ref, commit_sha, local_path FROM index_jobs \
                         WHERE status = 'pending' AND (available_at IS NULL OR available_at <= datetime('now')) \
                         ORDER BY created_at ASC, id ASC LIMIT 1",
                        [],
                        |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?, row.get(4)?)),
                    )
                    .optional()?;

                if let Some((id, ..)) = &claimed {
                    conn.execute(
                        "UPDATE index_jobs SET status = 'processing', started_at = datetime('now') \
                         WHERE id = ?1 AND status = 'pending'",
                        params![id],
                    )?;
                }
                Ok(claimed)
            })
            .await
    }

    async fn record_progress(&self, job_id: i64, stats: crate::indexer::ExtractStats) -> Result<()> {
        self.pool
            .run(move |conn| {
                conn.execute(
                    "UPDATE index_jobs SET files_indexed = ?2, symbols_extracted = ?3, \
                     references_found = ?4, dependencies_extracted = ?5 WHERE id = ?1",
                    params![
                        job_id,
                        stats.files_indexed as i64,
                        stats.symbols_extracted as i64,
                        stats.references_found as i64,
                        stats.dependencies_extracted as i64,
                    ],
                )
            })
            .await?;
        Ok(())
    }

    /// True if `repository_id` already has a `completed` job at `commit_sha`
    /// — the commit was indexed before this job was enqueued (e.g. a
    /// redelivered webhook, or an explicit re-enqueue racing a prior run).
    async fn already_completed(&self, repository_id: i64, commit_sha: Option<&str>) -> Result<bool> {
        let Some(commit_sha) = commit_sha else { return Ok(false) };
        let commit_sha = commit_sha.to_string();
        self.pool
            .run(move |conn| {
                conn.query_row(
                    "SELECT 1 FROM index_jobs WHERE repository_id = ?1 AND commit_sha = ?2 AND status = 'completed' LIMIT 1",
                    params![repository_id, commit_sha],
                    |_| Ok(()),
                )
                .optional()
                .map(|r| r.is_some())
            })
            .await
    }

    /// Transitions a `processing` job straight to `skipped` (J2) without
    /// running the extraction pipeline.
    async fn skip(&self, job_id: i64, reason: &str) -> Result<()> {
        let reason = reason.to_string();
        self.pool
            .run(move |conn| {
                conn.execute(
                    "UPDATE index_jobs SET status = 'skipped', error_message = ?2, completed_at = datetime('now') \
                     WHERE id = ?1 AND status = 'processing'",
                    params![job_id, reason],
                )
            })
            .await?;
        tracing::info!(job_id, "job skipped: commit already indexed");
        Ok(())
    }

    /// Guarded by `WHERE status = 'processing'`: J2 forbids a `failed`
    /// (cancelled) job from silently flipping back to `completed` if the
    /// worker observes the cancellation too late to abort.
    async fn complete(&self, job_id: i64) -> Result<()> {
        let rows = self
            .pool
            .run(move |conn| {
                conn.execute(
                    "UPDATE index_jobs SET status = 'completed', completed_at = datetime('now') \
                     WHERE id = ?1 AND status = 'processing'",
                    params![job_id],
                )
            })
            .await?;
        if rows == 0 {
            tracing::warn!(job_id, "job finished extraction but was no longer processing (cancelled?), not marking completed");
        } else {
            tracing::info!(job_id, "job completed");
        }
        Ok(())
    }

    async fn fail_or_retry(&self, job_id: i64, error_message: String, transient: bool) -> Result<()> {
        if transient {
            let retry_count: i64 = self
                .pool
                .run(move |conn| conn.query_row("SELECT retry_count FROM index_jobs WHERE id = ?1", params![job_id], |r| r.get(0)))
                .await?;

            if (retry_count as u32) < MAX_RETRIES {
                let backoff_secs = 2_i64.pow(retry_count as u32).min(300);
                self.pool
                    .run(move |conn| {
                        conn.execute(
                            "UPDATE index_jobs SET status = 'pending', retry_count = retry_count + 1, \
                             error_message = ?2, available_at = datetime('now', ?3) WHERE id = ?1",
                            params![job_id, error_message, format!("+{backoff_secs} seconds")],
                        )
                    })
                    .await?;
                tracing::warn!(job_id, retry_count, backoff_secs, error = %error_message, "job failed transiently, scheduled for retry");
                return Ok(());
            }
        }

        self.pool
            .run(move |conn| {
                conn.execute(
                    "UPDATE index_jobs SET status = 'failed', error_message = ?2, completed_at = datetime('now') WHERE id = ?1",
                    params![job_id, error_message],
                )
            })
            .await?;
        tracing::warn!(job_id, error = %error_message, "job failed terminally");
        Ok(())
    }

    fn pool(&self) -> &DatabasePool {
        &self.pool
    }
}

fn is_transient(err: &KotaError) -> bool {
    matches!(
        err,
        KotaError::UpstreamRateLimit(_) | KotaError::Io(_) | KotaError::Http(_) | KotaError::Git(_)
    )
}

/// One repository row's git identity, enough to resolve a working directory.
struct RepoRef {
    git_url: String,
    installation_id: Option<i64>,
}

async fn load_repo_ref(pool: &DatabasePool, repository_id: i64) -> Result<RepoRef> {
    pool.run(move |conn| {
        conn.query_row(
            "SELECT git_url, installation_id FROM repositories WHERE id = ?1",
            params![repository_id],
            |row| Ok((row.get::<_, String>(0)?, row.get::<_, Option<i64>>(1)?)),
        )
        .map(|(git_url, installation_id)| RepoRef { git_url, installation_id })
        .map_err(KotaError::from)
    })
    .await
}

/// Run one worker's drain loop until `shutdown` fires.
async fn worker_loop(tracker: JobTracker, data_dir: PathBuf, shutdown: Arc<AtomicBool>) {
    loop {
        if shutdown.load(Ordering::Relaxed) {
            return;
        }

        let claimed = match tracker.claim_next().await {
            Ok(c) => c,
            Err(e) => {
                tracing::warn!("failed to claim job: {e}");
                tokio::time::sleep(Duration::from_millis(500)).await;
                continue;
            }
        };

        let Some((job_id, repository_id, git_ref, commit_sha, local_path)) = claimed else {
            tokio::select! {
                _ = tracker.notify.notified() => {},
                _ = tokio::time::sleep(Duration::from_millis(500)) => {},
            }
            continue;
        };

        let cancel_flag = Arc::new(AtomicBool::new(false));
        tracker.cancelled.lock().unwrap().insert(job_id, cancel_flag.clone());

        let outcome = match tracker.already_completed(repository_id, commit_sha.as_deref()).await {
            Ok(true) => tracker.skip(job_id, "commit already indexed").await,
            Ok(false) => run_one_job(&tracker, job_id, repository_id, &git_ref, local_path.as_deref(), &data_dir, cancel_flag.clone()).await,
            Err(e) => Err(e),
        };
        tracker.cancelled.lock().unwrap().remove(&job_id);

        if let Err(e) = outcome {
            let transient = is_transient(&e);
            if let Err(e2) = tracker.fail_or_retry(job_id, e.to_user_string(), transient).await {
                tracing::warn!("failed to record job failure: {e2}");
            }
        }
    }
}

async fn run_one_job(
    tracker: &JobTracker,
    job_id: i64,
    repository_id: i64,
    git_ref: &str,
    local_path: Option<&str>,
    data_dir: &std::path::Path,
    cancel_flag: Arc<AtomicBool>,
) -> Result<()> {
    // C4: a caller-supplied local_path that exists on disk is reused as-is —
    // no clone, no fetch.
    let reused_local = local_path.map(PathBuf::from).filter(|p| p.exists());

    let working_dir = match reused_local {
        Some(path) => path,
        None => {
            let repo = load_repo_ref(tracker.pool(), repository_id).await?;
            let working_dir = data_dir.join("repos").join(repository_id.to_string());

            let token = match (repo.installation_id, &tracker.github_app) {
                (Some(installation_id), Some(client)) => {
                    Some(client.get_installation_token(installation_id, None).await?.0)
                }
                _ => None,
            };
            let auth = token.map(CloneAuth::installation_token);
            let git_ref = git_ref.to_string();
            let git_url = repo.git_url.clone();
            let wd = working_dir.clone();
            tokio::task::spawn_blocking(move || crate::git::clone_or_update(&git_url, &git_ref, &wd, auth.as_ref())).await??;
            working_dir
        }
    };

    let tracker_for_progress = tracker.clone();
    let stats = crate::indexer::extract_repository(
        tracker.pool(),
        repository_id,
        working_dir,
        move |stats| {
            let tracker = tracker_for_progress.clone();
            tokio::spawn(async move {
                let _ = tracker.record_progress(job_id, stats).await;
            });
        },
        move || cancel_flag.load(Ordering::Relaxed),
    )
    .await?;

    tracker.record_progress(job_id, stats).await?;
    tracker.complete(job_id).await
}

/// Start `worker_count` workers. Returns a handle whose `shutdown()` stops
/// new claims; in-flight jobs either finish or observe their cancellation
/// flag at the next batch boundary.
pub struct WorkerPool {
    shutdown: Arc<AtomicBool>,
    handles: Vec<tokio::task::JoinHandle<()>>,
}

impl WorkerPool {
    pub fn spawn(tracker: JobTracker, data_dir: PathBuf, worker_count: usize) -> Self {
        let shutdown = Arc::new(AtomicBool::new(false));
        let handles = (0..worker_count)
            .map(|_| {
                let tracker = tracker.clone();
                let data_dir = data_dir.clone();
                let shutdown = shutdown.clone();
                tokio::spawn(worker_loop(tracker, data_dir, shutdown))
            })
            .collect();

        Self { shutdown, handles }
    }

    pub async fn shutdown(self) {
        self.shutdown.store(true, Ordering::Relaxed);
        for handle in self.handles {
            let _ = handle.await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn migrations_dir() -> PathBuf {
        PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("migrations")
    }

    async fn tracker_with_repo() -> (JobTracker, i64) {
        let pool = DatabasePool::open_in_memory(&migrations_dir()).await.unwrap();
        let id = pool
            .interact(|conn| {
                conn.execute(
                    "INSERT INTO repositories (owner_scope, full_name, git_url, default_branch, updated_at) \
                     VALUES ('u1', 'acme/demo', 'https://example.com/acme/demo.git', 'main', datetime('now'))",
                    [],
                )?;
                Ok(conn.last_insert_rowid())
            })
            .await
            .unwrap();
        (JobTracker::new(pool), id)
    }

    #[tokio::test]
    async fn enqueue_deduplicates_pending_same_commit() {
        let (tracker, repo_id) = tracker_with_repo().await;
        let a = tracker.enqueue(repo_id, "main".into(), Some("sha1".into()), None).await.unwrap();
        let b = tracker.enqueue(repo_id, "main".into(), Some("sha1".into()), None).await.unwrap();
        assert_eq!(a.id, b.id);
    }

    #[tokio::test]
    async fn enqueue_allows_distinct_commits() {
        let (tracker, repo_id) = tracker_with_repo().await;
        let a = tracker.enqueue(repo_id, "main".into(), Some("sha1".into()), None).await.unwrap();
        let b = tracker.enqueue(repo_id, "main".into(), Some("sha2".into()), None).await.unwrap();
        assert_ne!(a.id, b.id);
    }

    #[tokio::test]
    async fn cancel_marks_failed() {
        let (tracker, repo_id) = tracker_with_repo().await;
        let job = tracker.enqueue(repo_id, "main".into(), Some("sha1".into()), None).await.unwrap();
        tracker.cancel(job.id).await.unwrap();
        let status = tracker.status("u1", job.id).await.unwrap();
        assert!(matches!(status.status, JobStatus::Failed));
        assert_eq!(status.error_message.as_deref(), Some("cancelled"));
    }

    #[tokio::test]
    async fn cancel_flips_the_live_cancellation_flag_for_a_processing_job() {
        let (tracker, repo_id) = tracker_with_repo().await;
        let job = tracker.enqueue(repo_id, "main".into(), Some("sha1".into()), None).await.unwrap();
        tracker.claim_next().await.unwrap();

        let flag = Arc::new(AtomicBool::new(false));
        tracker.cancelled.lock().unwrap().insert(job.id, flag.clone());

        tracker.cancel(job.id).await.unwrap();
        assert!(flag.load(Ordering::Relaxed));
    }

    #[tokio::test]
    async fn complete_does_not_resurrect_a_cancelled_job() {
        let (tracker, repo_id) = tracker_with_repo().await;
        let job = tracker.enqueue(repo_id, "main".into(), Some("sha1".into()), None).await.unwrap();
        tracker.claim_next().await.unwrap();

        tracker.cancel(job.id).await.unwrap();
        tracker.complete(job.id).await.unwrap();

        let status = tracker.status("u1", job.id).await.unwrap();
        assert!(matches!(status.status, JobStatus::Failed));
    }

    #[tokio::test]
    async fn status_is_not_found_for_a_different_owner_scope() {
        let (tracker, repo_id) = tracker_with_repo().await;
        let job = tracker.enqueue(repo_id, "main".into(), Some("sha1".into()), None).await.unwrap();
        let err = tracker.status("someone-else", job.id).await.unwrap_err();
        assert!(matches!(err, KotaError::NotFound(_)));
    }

    #[tokio::test]
    async fn retry_reenters_pending() {
        let (tracker, repo_id) = tracker_with_repo().await;
        let job = tracker.enqueue(repo_id, "main".into(), Some("sha1".into()), None).await.unwrap();
        tracker.cancel(job.id).await.unwrap();
        let retried = tracker.retry(job.id).await.unwrap();
        assert!(matches!(retried.status, JobStatus::Pending));
    }

    #[tokio::test]
    async fn claim_next_is_fifo() {
        let (tracker, repo_id) = tracker_with_repo().await;
        let a = tracker.enqueue(repo_id, "main".into(), Some("a".into()), None).await.unwrap();
        let _b = tracker.enqueue(repo_id, "main".into(), Some("b".into()), None).await.unwrap();
        let claimed = tracker.claim_next().await.unwrap().unwrap();
        assert_eq!(claimed.0, a.id);
    }

    async fn tracker_with_installed_repo() -> JobTracker {
        let pool = DatabasePool::open_in_memory(&migrations_dir()).await.unwrap();
        pool.interact(|conn| {
            conn.execute(
                "INSERT INTO repositories (owner_scope, full_name, git_url, default_branch, installation_id, updated_at) \
                 VALUES ('u1', 'acme/demo', 'https://example.com/acme/demo.git', 'main', 42, datetime('now'))",
                [],
            )?;
            Ok(())
        })
        .await
        .unwrap();
        JobTracker::new(pool)
    }

    #[tokio::test]
    async fn webhook_push_to_default_branch_enqueues() {
        let tracker = tracker_with_installed_repo().await;
        let outcome = tracker
            .handle_webhook_push(42, "acme/demo", "refs/heads/main", "sha1".into(), "main")
            .await
            .unwrap();
        assert!(matches!(outcome, WebhookOutcome::Enqueued(job) if job.commit_sha.as_deref() == Some("sha1")));
    }

    #[tokio::test]
    async fn webhook_push_dedupes_same_commit_on_default_branch() {
        let tracker = tracker_with_installed_repo().await;
        let first = tracker.handle_webhook_push(42, "acme/demo", "refs/heads/main", "sha1".into(), "main").await.unwrap();
        let second = tracker.handle_webhook_push(42, "acme/demo", "refs/heads/main", "sha1".into(), "main").await.unwrap();

        let (WebhookOutcome::Enqueued(a), WebhookOutcome::Enqueued(b)) = (first, second) else {
            panic!("expected both deliveries to enqueue");
        };
        assert_eq!(a.id, b.id);
    }

    #[tokio::test]
    async fn webhook_push_to_non_default_branch_is_skipped_with_no_job_row() {
        let tracker = tracker_with_installed_repo().await;
        let outcome = tracker
            .handle_webhook_push(42, "acme/demo", "refs/heads/feature/x", "sha1".into(), "main")
            .await
            .unwrap();
        assert!(matches!(outcome, WebhookOutcome::Skipped { .. }));

        let pending: i64 = tracker
            .pool
            .run(|conn| conn.query_row("SELECT COUNT(*) FROM index_jobs", [], |r| r.get(0)))
            .await
            .unwrap();
        assert_eq!(pending, 0);
    }

    #[tokio::test]
    async fn webhook_push_for_an_unregistered_installation_is_skipped() {
        let tracker = tracker_with_installed_repo().await;
        let outcome = tracker
            .handle_webhook_push(999, "acme/demo", "refs/heads/main", "sha1".into(), "main")
            .await
            .unwrap();
        assert!(matches!(outcome, WebhookOutcome::Skipped { .. }));
    }

    #[tokio::test]
    async fn a_job_whose_commit_is_already_completed_is_skipped_not_rerun() {
        let (tracker, repo_id) = tracker_with_repo().await;
        tracker
            .pool
            .run(move |conn| {
                conn.execute(
                    "INSERT INTO index_jobs (repository_id, ref, commit_sha, status, created_at, completed_at) \
                     VALUES (?1, 'main', 'sha1', 'completed', datetime('now'), datetime('now'))",
                    params![repo_id],
                )
            })
            .await
            .unwrap();

        assert!(tracker.already_completed(repo_id, Some("sha1")).await.unwrap());
        assert!(!tracker.already_completed(repo_id, Some("sha2")).await.unwrap());
    }
}
