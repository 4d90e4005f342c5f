// Migration runner (C2): applies numbered forward SQL scripts transactionally
// and tracks the applied set in a `migrations` table.

use rusqlite::Connection;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use crate::error::{KotaError, Result};

#[derive(Debug, Clone)]
pub struct Migration {
    pub sequence: u32,
    pub name: String,
    pub forward_path: PathBuf,
    pub rollback_path: Option<PathBuf>,
}

impl Migration {
    /// The ledger key: `NNN_name`, matching the forward script's stem.
    pub fn ledger_name(&self) -> String {
        format!("{:03}_{}", self.sequence, self.name)
    }
}

/// Scan `dir` for `NNN_name.sql` / `NNN_name_rollback.sql` pairs, sorted by sequence.
pub fn discover(dir: &Path) -> Result<Vec<Migration>> {
    let mut by_sequence: BTreeMap<u32, Migration> = BTreeMap::new();

    let entries = fs::read_dir(dir).map_err(KotaError::Io)?;
    for entry in entries {
        let entry = entry.map_err(KotaError::Io)?;
        let path = entry.path();
        if path.extension().and_then(|e| e.to_str()) != Some("sql") {
            continue;
        }
        let stem = match path.file_stem().and_then(|s| s.to_str()) {
            Some(s) => s,
            None => continue,
        };
        if let Some(base) = stem.strip_suffix("_rollback") {
            if let Some((seq, name)) = split_seq_name(base) {
                by_sequence
                    .entry(seq)
                    .or_insert_with(|| Migration {
                        sequence: seq,
                        name: name.clone(),
                        forward_path: dir.join(format!("{base}.sql")),
                        rollback_path: None,
                    })
                    .rollback_path = Some(path.clone());
            }
            continue;
        }
        if let Some((seq, name)) = split_seq_name(stem) {
            let m = by_sequence.entry(seq).or_insert_with(|| Migration {
                sequence: seq,
                name: name.clone(),
                forward_path: path.clone(),
                rollback_path: None,
            });
            m.forward_path = path.clone();
        }
    }

    Ok(by_sequence.into_values().collect())
}

fn split_seq_name(stem: &str) -> Option<(u32, String)> {
    let (seq_str, rest) = stem.split_once('_')?;
    let seq: u32 = seq_str.parse().ok()?;
    Some((seq, rest.to_string()))
}

/// Ensure the ledger table exists. This is bootstrap, not a counted migration.
fn ensure_ledger(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS migrations (
            name TEXT PRIMARY KEY,
            applied_at TEXT NOT NULL
        );",
    )
}

fn applied_names(conn: &Connection) -> rusqlite::Result<Vec<String>> {
    let mut stmt = conn.prepare("SELECT name FROM migrations ORDER BY name")?;
    let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;
    rows.collect()
}

/// Names of pending migrations, without executing anything (`--dry-run`).
pub fn pending_names(conn: &Connection, dir: &Path) -> Result<Vec<String>> {
    ensure_ledger(conn)?;
    let applied: std::collections::HashSet<String> =
        applied_names(conn)?.into_iter().collect();
    let migrations = discover(dir)?;
    Ok(migrations
        .into_iter()
        .map(|m| m.ledger_name())
        .filter(|n| !applied.contains(n))
        .collect())
}

/// Apply all pending forward migrations in order. Each migration runs in its
/// own transaction (script + ledger insert); failure rolls back that
/// migration only. Returns the list of ledger names actually applied.
pub fn run_pending(conn: &mut Connection, dir: &Path) -> Result<Vec<String>> {
    ensure_ledger(conn)?;
    let applied: std::collections::HashSet<String> =
        applied_names(conn)?.into_iter().collect();
    let migrations = discover(dir)?;

    let mut newly_applied = Vec::new();
    for migration in migrations {
        let ledger_name = migration.ledger_name();
        if applied.contains(&ledger_name) {
            continue;
        }

        let script = fs::read_to_string(&migration.forward_path).map_err(KotaError::Io)?;
        let tx = conn.transaction()?;
        tx.execute_batch(&script)?;
        tx.execute(
            "INSERT INTO migrations (name, applied_at) VALUES (?1, datetime('now'))",
            [&ledger_name],
        )?;
        tx.commit()?;

        tracing::info!("applied migration {}", ledger_name);
        newly_applied.push(ledger_name);
    }

    Ok(newly_applied)
}

/// Roll back exactly the most recently applied migration.
pub fn rollback_last(conn: &mut Connection, dir: &Path) -> Result<Option<String>> {
    ensure_ledger(conn)?;
    let mut applied = applied_names(conn)?;
    let Some(last) = applied.pop() else {
        return Ok(None);
    };

    let migrations = discover(dir)?;
    let migration = migrations
        .into_iter()
        .find(|m| m.ledger_name() == last)
        .ok_or_else(|| KotaError::NotFound(format!("no script found for applied migration {last}")))?;

    let rollback_path = migration
        .rollback_path
        .ok_or_else(|| KotaError::Internal(format!("no rollback script for {last}")))?;

    let script = fs::read_to_string(&rollback_path).map_err(KotaError::Io)?;
    let tx = conn.transaction()?;
    tx.execute_batch(&script)?;
    tx.execute("DELETE FROM migrations WHERE name = ?1", [&last])?;
    tx.commit()?;

    tracing::info!("rolled back migration {}", last);
    Ok(Some(last))
}
