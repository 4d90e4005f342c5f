// Repository row resolution: maps a caller-supplied `owner/name` onto the
// `repositories` table, creating the row on first sight.

use crate::db::DatabasePool;
use crate::error::Result;
use rusqlite::params;

#[derive(Debug, Clone)]
pub struct RepositoryView {
    pub id: i64,
    pub owner_scope: String,
    pub full_name: String,
    pub git_url: String,
    pub default_branch: String,
}

/// Resolve `full_name` (e.g. "acme/demo") under `owner_scope`, creating the
/// row with a clone URL derived from `git_base_url` if it doesn't exist yet.
pub async fn resolve_or_create(
    pool: &DatabasePool,
    owner_scope: &str,
    full_name: &str,
    git_base_url: &str,
) -> Result<RepositoryView> {
    let owner_scope = owner_scope.to_string();
    let full_name = full_name.to_string();
    let git_url = format!("{}/{}.git", git_base_url.trim_end_matches('/'), full_name);

    pool.run(move |conn| -> rusqlite::Result<RepositoryView> {
        conn.execute(
            "INSERT INTO repositories (owner_scope, full_name, git_url, default_branch, updated_at) \
             VALUES (?1, ?2, ?3, 'main', datetime('now')) \
             ON CONFLICT(owner_scope, full_name) DO NOTHING",
            params![owner_scope, full_name, git_url],
        )?;

        conn.query_row(
            "SELECT id, owner_scope, full_name, git_url, default_branch FROM repositories \
             WHERE owner_scope = ?1 AND full_name = ?2",
            params![owner_scope, full_name],
            |row| {
                Ok(RepositoryView {
                    id: row.get(0)?,
                    owner_scope: row.get(1)?,
                    full_name: row.get(2)?,
                    git_url: row.get(3)?,
                    default_branch: row.get(4)?,
                })
            },
        )
    })
    .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn migrations_dir() -> PathBuf {
        PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("migrations")
    }

    #[tokio::test]
    async fn resolve_or_create_is_idempotent() {
        let pool = DatabasePool::open_in_memory(&migrations_dir()).await.unwrap();
        let first = resolve_or_create(&pool, "owner1", "acme/demo", "https://github.com").await.unwrap();
        let second = resolve_or_create(&pool, "owner1", "acme/demo", "https://github.com").await.unwrap();
        assert_eq!(first.id, second.id);
        assert_eq!(first.git_url, "https://github.com/acme/demo.git");
    }
}
