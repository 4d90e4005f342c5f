// Read-side query operations (C6): text search, recent files, and
// dependency/impact traversal over the indexed graph.

use crate::db::DatabasePool;
use crate::error::Result;
use rusqlite::{params, Connection, OptionalExtension};
use std::collections::{HashSet, VecDeque};

const SNIPPET_RADIUS: usize = 80;
const MAX_SEARCH_LIMIT: usize = 100;
const CHANGE_IMPACT_CAP: usize = 500;

#[derive(Debug, Clone)]
pub struct SearchHit {
    pub file_path: String,
    pub repository_id: i64,
    pub snippet: String,
    pub match_offset: usize,
    pub indexed_at: String,
}

/// Case-insensitive substring search over indexed file content (§4.4).
/// Every row is joined against `repositories` and filtered to `owner_scope`
/// — a caller never sees another tenant's files, even by guessing ids.
pub async fn search_code(
    pool: &DatabasePool,
    owner_scope: &str,
    term: &str,
    repository_id: Option<i64>,
    limit: usize,
) -> Result<Vec<SearchHit>> {
    let limit = limit.min(MAX_SEARCH_LIMIT).max(1);
    let term = term.to_string();
    let owner_scope = owner_scope.to_string();

    pool.run(move |conn| -> rusqlite::Result<Vec<SearchHit>> {
        let mut stmt = conn.prepare(
            "SELECT f.repository_id, f.path, f.content, f.indexed_at FROM indexed_files f \
             JOIN repositories r ON r.id = f.repository_id \
             WHERE r.owner_scope = ?1 AND (?2 IS NULL OR f.repository_id = ?2) AND f.content IS NOT NULL \
             ORDER BY f.indexed_at DESC",
        )?;

        let rows = stmt.query_map(params![owner_scope, repository_id], |row| {
            Ok((
                row.get::<_, i64>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, String>(3)?,
            ))
        })?;

        let needle = term.to_lowercase();
        let mut hits = Vec::new();
        for row in rows {
            let (repo_id, path, content, indexed_at) = row?;
            let haystack = content.to_lowercase();
            let Some(offset) = haystack.find(&needle) else {
                continue;
            };

            let start = offset.saturating_sub(SNIPPET_RADIUS);
            let end = (offset + needle.len() + SNIPPET_RADIUS).min(content.len());
            let snippet = snippet_at_char_boundaries(&content, start, end);

            hits.push(SearchHit {
                file_path: path,
                repository_id: repo_id,
                snippet,
                match_offset: offset,
                indexed_at,
            });

            if hits.len() >= limit {
                break;
            }
        }

        Ok(hits)
    })
    .await
}

fn snippet_at_char_boundaries(content: &str, start: usize, end: usize) -> String {
    let mut start = start;
    while start > 0 && !content.is_char_boundary(start) {
        start -= 1;
    }
    let mut end = end.min(content.len());
    while end < content.len() && !content.is_char_boundary(end) {
        end += 1;
    }
    content[start..end].to_string()
}

#[derive(Debug, Clone)]
pub struct RecentFile {
    pub file_path: String,
    pub repository_id: i64,
    pub language: Option<String>,
    pub indexed_at: String,
}

/// Most recently indexed files (§4.4), scoped to `owner_scope`.
pub async fn list_recent_files(
    pool: &DatabasePool,
    owner_scope: &str,
    limit: usize,
    repository_id: Option<i64>,
) -> Result<Vec<RecentFile>> {
    let limit = limit.min(MAX_SEARCH_LIMIT).max(1) as i64;
    let owner_scope = owner_scope.to_string();

    pool.run(move |conn| {
        let mut stmt = conn.prepare(
            "SELECT f.path, f.repository_id, f.language, f.indexed_at FROM indexed_files f \
             JOIN repositories r ON r.id = f.repository_id \
             WHERE r.owner_scope = ?1 AND (?2 IS NULL OR f.repository_id = ?2) \
             ORDER BY f.indexed_at DESC LIMIT ?3",
        )?;
        let rows = stmt.query_map(params![owner_scope, repository_id, limit], |row| {
            Ok(RecentFile {
                file_path: row.get(0)?,
                repository_id: row.get(1)?,
                language: row.get(2)?,
                indexed_at: row.get(3)?,
            })
        })?;
        rows.collect::<rusqlite::Result<Vec<_>>>()
    })
    .await
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Dependencies,
    Dependents,
}

/// Resolves `path` to a file id, but only within a repository owned by
/// `owner_scope` — an out-of-scope `repository_id` silently finds nothing,
/// same as a nonexistent one.
fn file_id(conn: &Connection, owner_scope: &str, repository_id: i64, path: &str) -> rusqlite::Result<Option<i64>> {
    conn.query_row(
        "SELECT f.id FROM indexed_files f JOIN repositories r ON r.id = f.repository_id \
         WHERE f.repository_id = ?1 AND f.path = ?2 AND r.owner_scope = ?3",
        params![repository_id, path, owner_scope],
        |row| row.get(0),
    )
    .optional()
}

fn neighbors(conn: &Connection, file_id: i64, direction: Direction) -> rusqlite::Result<Vec<(i64, String)>> {
    let sql = match direction {
        Direction::Dependencies => {
            "SELECT f.id, f.path FROM dependencies d JOIN indexed_files f ON f.id = d.to_file_id WHERE d.from_file_id = ?1"
        }
        Direction::Dependents => {
            "SELECT f.id, f.path FROM dependencies d JOIN indexed_files f ON f.id = d.from_file_id WHERE d.to_file_id = ?1"
        }
    };
    let mut stmt = conn.prepare(sql)?;
    let rows = stmt.query_map(params![file_id], |row| Ok((row.get(0)?, row.get(1)?)))?;
    rows.collect()
}

/// Bounded BFS over the dependency graph (§4.4). Each node is visited at
/// most once even if the graph has cycles; `max_depth = None` means
/// unbounded (used internally by `analyze_change_impact`).
pub async fn search_dependencies(
    pool: &DatabasePool,
    owner_scope: &str,
    repository_id: i64,
    start_path: &str,
    direction: Direction,
    max_depth: Option<usize>,
) -> Result<Vec<String>> {
    let start_path = start_path.to_string();
    let owner_scope = owner_scope.to_string();

    pool.run(move |conn| -> rusqlite::Result<Vec<String>> {
        let Some(start_id) = file_id(conn, &owner_scope, repository_id, &start_path)? else {
            return Ok(Vec::new());
        };

        let mut visited = HashSet::new();
        visited.insert(start_id);
        let mut queue = VecDeque::new();
        queue.push_back((start_id, 0usize));
        let mut result = Vec::new();

        while let Some((current, depth)) = queue.pop_front() {
            if let Some(limit) = max_depth {
                if depth >= limit {
                    continue;
                }
            }

            for (next_id, next_path) in neighbors(conn, current, direction)? {
                if visited.insert(next_id) {
                    result.push(next_path);
                    queue.push_back((next_id, depth + 1));
                }
            }
        }

        Ok(result)
    })
    .await
}

#[derive(Debug, Clone, Default)]
pub struct ChangeImpact {
    pub impacted_files: Vec<String>,
    pub by_language: std::collections::BTreeMap<String, usize>,
}

/// Union of `search_dependencies(_, Dependents, unbounded)` over the input
/// set, clamped by `CHANGE_IMPACT_CAP` (§4.4).
pub async fn analyze_change_impact(
    pool: &DatabasePool,
    owner_scope: &str,
    repository_id: i64,
    file_paths: &[String],
) -> Result<ChangeImpact> {
    let file_paths = file_paths.to_vec();
    let owner_scope = owner_scope.to_string();

    pool.run(move |conn| -> rusqlite::Result<ChangeImpact> {
        let mut impacted: HashSet<i64> = HashSet::new();
        let mut impacted_paths = Vec::new();

        for path in &file_paths {
            let Some(start_id) = file_id(conn, &owner_scope, repository_id, path)? else {
                continue;
            };

            let mut visited = HashSet::new();
            visited.insert(start_id);
            let mut queue = VecDeque::new();
            queue.push_back(start_id);

            while let Some(current) = queue.pop_front() {
                for (next_id, next_path) in neighbors(conn, current, Direction::Dependents)? {
                    if visited.insert(next_id) && impacted.insert(next_id) {
                        impacted_paths.push(next_path);
                        if impacted_paths.len() >= CHANGE_IMPACT_CAP {
                            break;
                        }
                        queue.push_back(next_id);
                    }
                }
                if impacted_paths.len() >= CHANGE_IMPACT_CAP {
                    break;
                }
            }
            if impacted_paths.len() >= CHANGE_IMPACT_CAP {
                break;
            }
        }

        let mut by_language = std::collections::BTreeMap::new();
        for path in &impacted_paths {
            let lang: Option<String> = conn
                .query_row(
                    "SELECT language FROM indexed_files WHERE repository_id = ?1 AND path = ?2",
                    params![repository_id, path],
                    |row| row.get(0),
                )
                .optional()?
                .flatten();
            *by_language.entry(lang.unwrap_or_else(|| "unknown".to_string())).or_insert(0) += 1;
        }

        Ok(ChangeImpact {
            impacted_files: impacted_paths,
            by_language,
        })
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

    async fn seeded_pool() -> (DatabasePool, i64) {
        let pool = DatabasePool::open_in_memory(&migrations_dir()).await.unwrap();
        let repo_id = pool
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

        pool.interact(move |conn| {
            conn.execute(
                "INSERT INTO indexed_files (id, repository_id, path, content, language, content_hash, indexed_at) \
                 VALUES (1, ?1, 'a.rs', 'fn helper() { needle_value(); }', 'rust', 'h1', datetime('now', '-2 minutes'))",
                params![repo_id],
            )?;
            conn.execute(
                "INSERT INTO indexed_files (id, repository_id, path, content, language, content_hash, indexed_at) \
                 VALUES (2, ?1, 'b.rs', 'mod a;', 'rust', 'h2', datetime('now', '-1 minutes'))",
                params![repo_id],
            )?;
            conn.execute(
                "INSERT INTO dependencies (from_file_id, to_file_id, kind) VALUES (2, 1, 'import')",
                [],
            )?;
            Ok(())
        })
        .await
        .unwrap();

        (pool, repo_id)
    }

    #[tokio::test]
    async fn search_code_finds_substring_and_snippet() {
        let (pool, repo_id) = seeded_pool().await;
        let hits = search_code(&pool, "u1", "needle_value", Some(repo_id), 10).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert!(hits[0].snippet.contains("needle_value"));
    }

    #[tokio::test]
    async fn search_code_is_invisible_to_a_different_owner_scope() {
        let (pool, repo_id) = seeded_pool().await;
        let hits = search_code(&pool, "someone-else", "needle_value", Some(repo_id), 10).await.unwrap();
        assert!(hits.is_empty());
    }

    #[tokio::test]
    async fn list_recent_files_orders_newest_first() {
        let (pool, repo_id) = seeded_pool().await;
        let recent = list_recent_files(&pool, "u1", 10, Some(repo_id)).await.unwrap();
        assert_eq!(recent[0].file_path, "b.rs");
    }

    #[tokio::test]
    async fn list_recent_files_is_invisible_to_a_different_owner_scope() {
        let (pool, repo_id) = seeded_pool().await;
        let recent = list_recent_files(&pool, "someone-else", 10, Some(repo_id)).await.unwrap();
        assert!(recent.is_empty());
    }

    #[tokio::test]
    async fn search_dependencies_follows_edges_both_directions() {
        let (pool, repo_id) = seeded_pool().await;
        let deps = search_dependencies(&pool, "u1", repo_id, "b.rs", Direction::Dependencies, None)
            .await
            .unwrap();
        assert_eq!(deps, vec!["a.rs".to_string()]);

        let dependents = search_dependencies(&pool, "u1", repo_id, "a.rs", Direction::Dependents, None)
            .await
            .unwrap();
        assert_eq!(dependents, vec!["b.rs".to_string()]);
    }

    #[tokio::test]
    async fn search_dependencies_finds_nothing_for_a_different_owner_scope() {
        let (pool, repo_id) = seeded_pool().await;
        let deps = search_dependencies(&pool, "someone-else", repo_id, "b.rs", Direction::Dependencies, None)
            .await
            .unwrap();
        assert!(deps.is_empty());
    }

    #[tokio::test]
    async fn analyze_change_impact_summarizes_by_language() {
        let (pool, repo_id) = seeded_pool().await;
        let impact = analyze_change_impact(&pool, "u1", repo_id, &["a.rs".to_string()]).await.unwrap();
        assert_eq!(impact.impacted_files, vec!["b.rs".to_string()]);
        assert_eq!(impact.by_language.get("rust"), Some(&1));
    }
}
