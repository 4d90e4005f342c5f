// Async connection pool using deadpool-sqlite.
//
// # Access patterns
//
// Use `pool.run()` from tool handlers — it converts errors to `KotaError`
// automatically. Use `pool.interact()` when `anyhow::Result` is more
// convenient (migrations, background tasks, internal helpers).

use crate::error::KotaError;
use crate::utils::path_to_string;
use anyhow::{Context, Result};
use deadpool_sqlite::{Config, Hook, Pool, Runtime};
use rusqlite::Connection;
use std::path::{Path, PathBuf};

#[cfg(unix)]
use std::os::unix::fs::PermissionsExt;

/// Check if a rusqlite error is SQLITE_BUSY or SQLITE_LOCKED.
fn is_rusqlite_contention(err: &rusqlite::Error) -> bool {
    use rusqlite::ffi;
    matches!(
        err,
        rusqlite::Error::SqliteFailure(
            ffi::Error {
                code: ffi::ErrorCode::DatabaseBusy | ffi::ErrorCode::DatabaseLocked,
                ..
            },
            _,
        )
    )
}

fn is_kota_contention(err: &KotaError) -> bool {
    match err {
        KotaError::Db(rusqlite_err) => is_rusqlite_contention(rusqlite_err),
        _ => false,
    }
}

fn is_sqlite_contention(err: &anyhow::Error) -> bool {
    if let Some(rusqlite_err) = err.downcast_ref::<rusqlite::Error>() {
        return is_rusqlite_contention(rusqlite_err);
    }
    if let Some(kota_err) = err.downcast_ref::<KotaError>() {
        return is_kota_contention(kota_err);
    }
    false
}

/// Retry delays for SQLite contention backoff (100ms, 500ms, 2s).
const RETRY_DELAYS: [std::time::Duration; 3] = [
    std::time::Duration::from_millis(100),
    std::time::Duration::from_millis(500),
    std::time::Duration::from_millis(2000),
];

async fn retry_with_backoff<F, Fut, R, E>(
    mut op: F,
    is_retryable: impl Fn(&E) -> bool,
) -> Result<R, E>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<R, E>>,
    E: std::fmt::Display,
{
    for (attempt, delay) in RETRY_DELAYS.iter().enumerate() {
        match op().await {
            Ok(result) => return Ok(result),
            Err(e) => {
                if is_retryable(&e) {
                    tracing::warn!(
                        "SQLite contention on attempt {}/{}, retrying in {:?}",
                        attempt + 1,
                        RETRY_DELAYS.len(),
                        delay
                    );
                    tokio::time::sleep(*delay).await;
                } else {
                    return Err(e);
                }
            }
        }
    }
    op().await
}

/// Connection pool wrapper with per-connection PRAGMA setup and migration
/// bootstrap on open. Cheap to clone — `deadpool_sqlite::Pool` is itself
/// `Arc`-backed.
#[derive(Clone)]
pub struct DatabasePool {
    pool: Pool,
    path: Option<PathBuf>,
    memory_uri: Option<String>,
}

enum DbStorage {
    File(PathBuf),
    InMemory { label: &'static str },
}

impl DatabasePool {
    /// Open (or create) the store at `path`, running any pending migrations
    /// found under `migrations_dir`.
    pub async fn open(path: &Path, migrations_dir: &Path) -> Result<Self> {
        Self::open_internal(DbStorage::File(path.to_path_buf()), migrations_dir).await
    }

    /// Open a shared-cache in-memory store (tests).
    pub async fn open_in_memory(migrations_dir: &Path) -> Result<Self> {
        Self::open_internal(DbStorage::InMemory { label: "memdb" }, migrations_dir).await
    }

    async fn open_internal(storage: DbStorage, migrations_dir: &Path) -> Result<Self> {
        let (conn_str, path, memory_uri, hook) = match storage {
            DbStorage::File(p) => {
                ensure_parent_directory(&p)?;
                let s = path_to_string(&p);
                let hook = make_file_post_create_hook(p.clone());
                (s, Some(p), None, hook)
            }
            DbStorage::InMemory { label } => {
                let uri = format!(
                    "file:{}_{:?}?mode=memory&cache=shared",
                    label,
                    uuid::Uuid::new_v4()
                );
                let hook = make_memory_post_create_hook();
                (uri.clone(), None, Some(uri), hook)
            }
        };

        let cfg = Config::new(&conn_str);
        let pool = cfg
            .builder(Runtime::Tokio1)
            .context("failed to create pool builder")?
            .max_size(8)
            .post_create(hook)
            .build()
            .context("failed to build connection pool")?;

        let db_pool = Self {
            pool,
            path,
            memory_uri,
        };

        if let Some(ref db_path) = db_pool.path
            && let Err(e) = Self::backup_before_migration(db_path)
        {
            tracing::warn!("pre-migration backup failed (continuing anyway): {}", e);
        }

        let migrations_dir = migrations_dir.to_path_buf();
        db_pool
            .interact(move |conn| {
                crate::db::migrations::run_pending(conn, &migrations_dir)
                    .map(|_| ())
                    .map_err(|e| anyhow::anyhow!(e))
            })
            .await?;

        Ok(db_pool)
    }

    pub fn memory_uri(&self) -> Option<&str> {
        self.memory_uri.as_deref()
    }

    /// Run a closure with a connection from the pool, returning `anyhow::Result`.
    pub async fn interact<F, R>(&self, f: F) -> Result<R>
    where
        F: FnOnce(&Connection) -> Result<R> + Send + 'static,
        R: Send + 'static,
    {
        let conn = self
            .pool
            .get()
            .await
            .context("failed to get connection from pool")?;

        conn.interact(move |conn| f(conn))
            .await
            .map_err(|e| anyhow::anyhow!("interact failed: {e}"))?
    }

    /// Like `interact`, but converts to `KotaError` for tool-handler boundaries.
    pub async fn run<F, R, E>(&self, f: F) -> Result<R, KotaError>
    where
        F: FnOnce(&Connection) -> Result<R, E> + Send + 'static,
        R: Send + 'static,
        E: Into<KotaError> + Send + 'static,
    {
        self.pool
            .get()
            .await
            .map_err(|e| KotaError::Internal(format!("failed to get connection: {e}")))?
            .interact(move |conn| f(conn).map_err(Into::into))
            .await
            .map_err(|e| KotaError::Internal(format!("database error: {e}")))?
    }

    /// Like `run`, with retry on SQLite contention (100ms/500ms/2s backoff).
    pub async fn run_with_retry<F, R, E>(&self, f: F) -> Result<R, KotaError>
    where
        F: FnOnce(&Connection) -> Result<R, E> + Send + Clone + 'static,
        R: Send + 'static,
        E: Into<KotaError> + Send + 'static,
    {
        retry_with_backoff(
            || {
                let f_clone = f.clone();
                self.run(f_clone)
            },
            is_kota_contention,
        )
        .await
    }

    /// Like `interact`, with retry on SQLite contention.
    pub async fn interact_with_retry<F, R>(&self, f: F) -> Result<R>
    where
        F: FnOnce(&Connection) -> Result<R> + Send + Clone + 'static,
        R: Send + 'static,
    {
        retry_with_backoff(
            || {
                let f_clone = f.clone();
                self.interact(f_clone)
            },
            |e: &anyhow::Error| is_sqlite_contention(e),
        )
        .await
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// VACUUM INTO a snapshot before running migrations. Only for file-based
    /// databases; no-op if the file does not yet exist.
    fn backup_before_migration(path: &Path) -> Result<()> {
        use std::fs;

        let backup_path = path.with_extension("db.pre-migration");
        if !path.exists() {
            return Ok(());
        }

        let conn = rusqlite::Connection::open(path).context("failed to open db for backup")?;
        let _ = fs::remove_file(&backup_path);
        conn.execute("VACUUM INTO ?1", [backup_path.to_string_lossy().as_ref()])
            .context("failed to create pre-migration backup")?;

        tracing::info!("created pre-migration backup: {}", backup_path.display());
        Ok(())
    }

    pub fn status(&self) -> PoolStatus {
        let status = self.pool.status();
        PoolStatus {
            size: status.size,
            available: status.available,
            waiting: status.waiting,
        }
    }
}

#[derive(Debug, Clone)]
pub struct PoolStatus {
    pub size: usize,
    pub available: usize,
    pub waiting: usize,
}

fn ensure_parent_directory(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
        #[cfg(unix)]
        {
            let mut perms = std::fs::metadata(parent)?.permissions();
            perms.set_mode(0o700);
            std::fs::set_permissions(parent, perms)?;
        }
    }
    Ok(())
}

fn make_file_post_create_hook(path: PathBuf) -> Hook {
    Hook::async_fn(move |conn, _metrics| {
        let path_for_perms = path.clone();
        Box::pin(async move {
            conn.interact(move |conn| {
                setup_connection(conn)?;

                #[cfg(unix)]
                if let Ok(metadata) = std::fs::metadata(&path_for_perms) {
                    let mut perms = metadata.permissions();
                    perms.set_mode(0o600);
                    if let Err(e) = std::fs::set_permissions(&path_for_perms, perms) {
                        tracing::warn!("failed to set database file permissions to 0600: {}", e);
                    }
                }

                Ok::<_, rusqlite::Error>(())
            })
            .await
            .map_err(|e| {
                deadpool_sqlite::HookError::Message(format!("interact failed: {e}").into())
            })?
            .map_err(|e| {
                deadpool_sqlite::HookError::Message(format!("connection setup failed: {e}").into())
            })
        })
    })
}

fn make_memory_post_create_hook() -> Hook {
    Hook::async_fn(|conn, _metrics| {
        Box::pin(async move {
            conn.interact(|conn| {
                conn.execute_batch("PRAGMA foreign_keys=ON; PRAGMA busy_timeout=5000;")?;
                Ok::<_, rusqlite::Error>(())
            })
            .await
            .map_err(|e| {
                deadpool_sqlite::HookError::Message(format!("interact failed: {e}").into())
            })?
            .map_err(|e| {
                deadpool_sqlite::HookError::Message(format!("connection setup failed: {e}").into())
            })
        })
    })
}

fn setup_connection(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(
        "PRAGMA journal_mode=WAL; \
         PRAGMA foreign_keys=ON; \
         PRAGMA busy_timeout=5000; \
         PRAGMA synchronous=NORMAL; \
         PRAGMA journal_size_limit=32768;",
    )?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn migrations_dir() -> PathBuf {
        PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("migrations")
    }

    #[tokio::test]
    async fn pool_in_memory_roundtrip() {
        let pool = DatabasePool::open_in_memory(&migrations_dir())
            .await
            .expect("open in-memory pool");

        let id: i64 = pool
            .interact(|conn| {
                conn.execute(
                    "INSERT INTO repositories (owner_scope, full_name, git_url, default_branch, updated_at) \
                     VALUES (?1, ?2, ?3, 'main', datetime('now'))",
                    rusqlite::params!["user-1", "acme/widgets", "https://example.com/acme/widgets.git"],
                )?;
                Ok(conn.last_insert_rowid())
            })
            .await
            .expect("insert repository");

        assert!(id > 0);
    }

    #[tokio::test]
    async fn migrations_are_idempotent_across_opens() {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("kota.db");

        DatabasePool::open(&db_path, &migrations_dir())
            .await
            .expect("first open runs migrations");
        DatabasePool::open(&db_path, &migrations_dir())
            .await
            .expect("second open is a no-op");
    }

    #[tokio::test]
    async fn pool_status_reports_without_panicking() {
        let pool = DatabasePool::open_in_memory(&migrations_dir())
            .await
            .expect("open pool");
        let _ = pool.status();
    }

    #[test]
    fn contention_detection_matches_busy_and_locked() {
        let busy = rusqlite::Error::SqliteFailure(
            rusqlite::ffi::Error {
                code: rusqlite::ffi::ErrorCode::DatabaseBusy,
                extended_code: 5,
            },
            None,
        );
        assert!(is_rusqlite_contention(&busy));

        let other = rusqlite::Error::SqliteFailure(
            rusqlite::ffi::Error {
                code: rusqlite::ffi::ErrorCode::ConstraintViolation,
                extended_code: 19,
            },
            None,
        );
        assert!(!is_rusqlite_contention(&other));
    }
}
