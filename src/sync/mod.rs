// JSONL sync export/import (C10/C11): the only whitelisted tables can be
// mirrored out to a directory of `<table>.jsonl` files and read back in,
// for offline/git-based replication.

pub mod watcher;
pub use watcher::SyncWatcher;

use crate::db::DatabasePool;
use crate::error::{KotaError, Result};
use rusqlite::{types::ValueRef, Connection};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::io::Write;
use std::path::{Path, PathBuf};

/// Exact whitelist from §6.3. Anything else is rejected with a security error.
pub const WHITELISTED_TABLES: &[&str] = &[
    "repositories",
    "indexed_files",
    "indexed_symbols",
    "indexed_references",
    "projects",
    "project_repositories",
];

fn deletions_path(dir: &Path) -> PathBuf {
    dir.join(".deletions.jsonl")
}

fn table_path(dir: &Path, table: &str) -> PathBuf {
    dir.join(format!("{table}.jsonl"))
}

fn write_restricted(path: &Path, content: &str) -> std::io::Result<()> {
    let mut opts = std::fs::OpenOptions::new();
    opts.write(true).create(true).truncate(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        opts.mode(0o600);
    }
    let mut f = opts.open(path)?;
    f.write_all(content.as_bytes())
}

/// Write `content` to `path` atomically: write to a sibling temp file, then
/// rename into place, so a crash mid-write never leaves a truncated export.
fn write_atomic(path: &Path, content: &str) -> std::io::Result<()> {
    let tmp = path.with_extension("tmp");
    write_restricted(&tmp, content)?;
    std::fs::rename(&tmp, path)
}

fn columns_of(conn: &Connection, table: &str) -> rusqlite::Result<Vec<String>> {
    let mut stmt = conn.prepare(&format!("PRAGMA table_info({table})"))?;
    let rows = stmt.query_map([], |row| row.get::<_, String>(1))?;
    rows.collect()
}

/// Primary key columns, in declaration order (empty for rowid-only tables,
/// which none of the whitelist are).
fn primary_key_columns(conn: &Connection, table: &str) -> rusqlite::Result<Vec<String>> {
    let mut stmt = conn.prepare(&format!("PRAGMA table_info({table})"))?;
    let mut pk: Vec<(i64, String)> = stmt
        .query_map([], |row| {
            let pk_index: i64 = row.get(5)?;
            Ok((pk_index, row.get::<_, String>(1)?))
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?
        .into_iter()
        .filter(|(idx, _)| *idx > 0)
        .collect();
    pk.sort_by_key(|(idx, _)| *idx);
    Ok(pk.into_iter().map(|(_, name)| name).collect())
}

fn value_ref_to_json(v: ValueRef<'_>) -> Value {
    match v {
        ValueRef::Null => Value::Null,
        ValueRef::Integer(i) => Value::from(i),
        ValueRef::Real(f) => serde_json::Number::from_f64(f).map(Value::Number).unwrap_or(Value::Null),
        ValueRef::Text(t) => Value::String(String::from_utf8_lossy(t).to_string()),
        ValueRef::Blob(b) => Value::String(format!("base64:{}", base64_encode(b))),
    }
}

fn base64_encode(bytes: &[u8]) -> String {
    const ALPHABET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789+/";
    let mut out = String::new();
    for chunk in bytes.chunks(3) {
        let b = [chunk[0], *chunk.get(1).unwrap_or(&0), *chunk.get(2).unwrap_or(&0)];
        let n = ((b[0] as u32) << 16) | ((b[1] as u32) << 8) | b[2] as u32;
        out.push(ALPHABET[((n >> 18) & 63) as usize] as char);
        out.push(ALPHABET[((n >> 12) & 63) as usize] as char);
        out.push(if chunk.len() > 1 { ALPHABET[((n >> 6) & 63) as usize] as char } else { '=' });
        out.push(if chunk.len() > 2 { ALPHABET[(n & 63) as usize] as char } else { '=' });
    }
    out
}

fn json_to_sql_param(v: &Value) -> rusqlite::types::Value {
    match v {
        Value::Null => rusqlite::types::Value::Null,
        Value::Bool(b) => rusqlite::types::Value::Integer(*b as i64),
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                rusqlite::types::Value::Integer(i)
            } else {
                rusqlite::types::Value::Real(n.as_f64().unwrap_or(0.0))
            }
        }
        Value::String(s) => rusqlite::types::Value::Text(s.clone()),
        other => rusqlite::types::Value::Text(other.to_string()),
    }
}

fn require_whitelisted(table: &str) -> Result<()> {
    if WHITELISTED_TABLES.contains(&table) {
        Ok(())
    } else {
        tracing::warn!(table, "rejected sync operation on a non-whitelisted table");
        Err(KotaError::Security(format!("table '{table}' is not in the sync whitelist")))
    }
}

/// Export every whitelisted table to `<table>.jsonl` under `dir`, then clear
/// `.deletions.jsonl` once every body has been written successfully (§4.8).
pub async fn export_all(pool: &DatabasePool, dir: &Path) -> Result<()> {
    std::fs::create_dir_all(dir)?;
    let dir = dir.to_path_buf();

    pool.run(move |conn| -> Result<()> {
        for table in WHITELISTED_TABLES {
            export_table(conn, table, &dir)?;
        }
        let _ = std::fs::remove_file(deletions_path(&dir));
        Ok(())
    })
    .await
}

fn export_table(conn: &Connection, table: &str, dir: &Path) -> Result<()> {
    let columns = columns_of(conn, table)?;
    let pk = primary_key_columns(conn, table)?;
    let order_by = if pk.is_empty() { "rowid".to_string() } else { pk.join(", ") };

    let col_list = columns.join(", ");
    let mut stmt = conn.prepare(&format!("SELECT {col_list} FROM {table} ORDER BY {order_by}"))?;
    let mut rows = stmt.query([])?;

    let mut buf = String::new();
    while let Some(row) = rows.next()? {
        let mut obj = Map::new();
        for (i, col) in columns.iter().enumerate() {
            obj.insert(col.clone(), value_ref_to_json(row.get_ref(i)?));
        }
        buf.push_str(&serde_json::to_string(&Value::Object(obj))?);
        buf.push('\n');
    }

    write_atomic(&table_path(dir, table), &buf)?;
    Ok(())
}

/// Append a `{table, id, deleted_at}` record to the deletions log. Only
/// single-column-primary-key tables are trackable this way.
pub fn record_deletion(dir: &Path, table: &str, id: &str) -> Result<()> {
    require_whitelisted(table)?;
    std::fs::create_dir_all(dir)?;
    let entry = serde_json::json!({
        "table": table,
        "id": id,
        "deleted_at": chrono::Utc::now().to_rfc3339(),
    });
    let mut f = std::fs::OpenOptions::new()
        .append(true)
        .create(true)
        .open(deletions_path(dir))?;
    writeln!(f, "{}", serde_json::to_string(&entry)?)?;
    Ok(())
}

#[derive(Debug, Default, Clone)]
pub struct ImportReport {
    pub deleted_count: usize,
    pub errors: Vec<ImportTableError>,
    pub security_issues: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct ImportTableError {
    pub table: String,
    pub error: String,
}

const MAX_DELETIONS_BYTES: u64 = 10 * 1024 * 1024;
const MAX_SKIPPED_FRACTION: f64 = 0.2;
const UPSERT_BATCH_SIZE: usize = 200;

struct DeletionEntry {
    table: String,
    id: String,
}

fn parse_deletions(dir: &Path) -> Result<Vec<DeletionEntry>> {
    let path = deletions_path(dir);
    if !path.exists() {
        return Ok(Vec::new());
    }

    let metadata = std::fs::metadata(&path)?;
    if metadata.len() > MAX_DELETIONS_BYTES {
        tracing::error!(size_bytes = metadata.len(), limit_bytes = MAX_DELETIONS_BYTES, "rejected oversized deletions manifest");
        return Err(KotaError::Security(format!(
            "deletions manifest exceeds {MAX_DELETIONS_BYTES} bytes"
        )));
    }

    let content = std::fs::read_to_string(&path)?;
    let total_lines = content.lines().filter(|l| !l.trim().is_empty()).count();
    let mut valid = Vec::new();
    let mut skipped = 0usize;

    for line in content.lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        match parse_deletion_line(line) {
            Some(entry) => valid.push(entry),
            None => skipped += 1,
        }
    }

    if total_lines > 0 && (skipped as f64 / total_lines as f64) > MAX_SKIPPED_FRACTION {
        tracing::error!(skipped, total_lines, "rejected deletions manifest with too many malformed entries");
        return Err(KotaError::Security(format!(
            "{skipped}/{total_lines} deletions entries were malformed, exceeding the {MAX_SKIPPED_FRACTION} threshold"
        )));
    }

    Ok(valid)
}

fn parse_deletion_line(line: &str) -> Option<DeletionEntry> {
    let value: Value = serde_json::from_str(line).ok()?;
    let obj = value.as_object()?;
    let table = obj.get("table")?.as_str()?.to_string();
    if !WHITELISTED_TABLES.contains(&table.as_str()) {
        return None;
    }
    let id = obj.get("id")?.as_str()?.to_string();
    if id.is_empty() {
        return None;
    }
    let deleted_at = obj.get("deleted_at")?.as_str()?;
    chrono::DateTime::parse_from_rfc3339(deleted_at).ok()?;
    Some(DeletionEntry { table, id })
}

/// Apply deletions, then upsert every `<table>.jsonl` row, one transaction
/// per table. A failing table is recorded in `errors` and the import moves
/// on to the next one (§4.9).
pub async fn import_all(pool: &DatabasePool, dir: &Path) -> Result<ImportReport> {
    let dir = dir.to_path_buf();
    let deletions = match parse_deletions(&dir) {
        Ok(d) => d,
        Err(KotaError::Security(msg)) => {
            return Ok(ImportReport {
                security_issues: vec![msg],
                ..Default::default()
            });
        }
        Err(e) => return Err(e),
    };

    let mut by_table: BTreeMap<String, Vec<String>> = BTreeMap::new();
    for entry in deletions {
        by_table.entry(entry.table).or_default().push(entry.id);
    }

    pool.run(move |conn| -> Result<ImportReport> {
        let mut report = ImportReport::default();

        for (table, ids) in &by_table {
            match delete_ids(conn, table, ids) {
                Ok(n) => report.deleted_count += n,
                Err(e) => report.errors.push(ImportTableError {
                    table: table.clone(),
                    error: e.to_string(),
                }),
            }
        }

        for table in WHITELISTED_TABLES {
            let path = table_path(&dir, table);
            if !path.exists() {
                continue;
            }
            if let Err(e) = upsert_table(conn, table, &path) {
                report.errors.push(ImportTableError {
                    table: table.to_string(),
                    error: e.to_string(),
                });
            }
        }

        Ok(report)
    })
    .await
}

fn delete_ids(conn: &Connection, table: &str, ids: &[String]) -> Result<usize> {
    require_whitelisted(table)?;
    let pk = primary_key_columns(conn, table)?;
    if pk.len() != 1 {
        return Ok(0);
    }
    let pk_col = &pk[0];

    let mut deleted = 0;
    for chunk in ids.chunks(UPSERT_BATCH_SIZE) {
        let placeholders = chunk.iter().map(|_| "?").collect::<Vec<_>>().join(", ");
        let sql = format!("DELETE FROM {table} WHERE {pk_col} IN ({placeholders})");
        let params: Vec<&dyn rusqlite::ToSql> = chunk.iter().map(|id| id as &dyn rusqlite::ToSql).collect();
        deleted += conn.execute(&sql, params.as_slice())?;
    }
    Ok(deleted)
}

fn upsert_table(conn: &Connection, table: &str, path: &Path) -> Result<()> {
    require_whitelisted(table)?;
    let columns = columns_of(conn, table)?;
    let pk = primary_key_columns(conn, table)?;

    let content = std::fs::read_to_string(path)?;
    let rows: Vec<Value> = content
        .lines()
        .filter(|l| !l.trim().is_empty())
        .filter_map(|l| serde_json::from_str(l).ok())
        .collect();

    let tx = conn.unchecked_transaction()?;
    for chunk in rows.chunks(UPSERT_BATCH_SIZE) {
        for row in chunk {
            let Some(obj) = row.as_object() else { continue };
            let col_list = columns.join(", ");
            let placeholders = columns.iter().map(|_| "?").collect::<Vec<_>>().join(", ");
            let conflict_cols = if pk.is_empty() { columns.first().cloned().unwrap_or_default() } else { pk.join(", ") };
            let update_set = columns
                .iter()
                .filter(|c| !pk.contains(c))
                .map(|c| format!("{c} = excluded.{c}"))
                .collect::<Vec<_>>()
                .join(", ");

            let sql = if update_set.is_empty() {
                format!("INSERT INTO {table} ({col_list}) VALUES ({placeholders}) ON CONFLICT({conflict_cols}) DO NOTHING")
            } else {
                format!(
                    "INSERT INTO {table} ({col_list}) VALUES ({placeholders}) \
                     ON CONFLICT({conflict_cols}) DO UPDATE SET {update_set}"
                )
            };

            let values: Vec<rusqlite::types::Value> = columns
                .iter()
                .map(|c| obj.get(c).map(json_to_sql_param).unwrap_or(rusqlite::types::Value::Null))
                .collect();
            let params: Vec<&dyn rusqlite::ToSql> = values.iter().map(|v| v as &dyn rusqlite::ToSql).collect();
            tx.execute(&sql, params.as_slice())?;
        }
    }
    tx.commit()?;
    Ok(())
}
