// Extractor pipeline (C3): per-file parse -> language-specific symbol /
// reference / dependency extraction -> batched upserts into the store.

pub mod parsers;
pub mod resolver;

use crate::config::ignore;
use crate::db::DatabasePool;
use crate::error::{KotaError, Result};
use crate::project_files::walker::FileWalker;
use parsers::{FunctionCall, Import, Symbol, PARSERS};
use resolver::{ImportResolver, RustImportResolver};
use rusqlite::{params, Connection};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::path::Path;

#[cfg(feature = "parallel")]
use rayon::prelude::*;

/// File extensions the extractor knows how to parse.
const SUPPORTED_EXTENSIONS: &[&str] = &["rs", "py", "ts", "tsx", "js", "jsx", "go"];

/// Files larger than this are skipped (generated code, bundles, data files).
const MAX_INDEX_FILE_BYTES: u64 = 1_024 * 1_024;

/// Files processed per transactional batch.
const BATCH_SIZE: usize = 50;

/// If per-file failures exceed this fraction of the files attempted, the
/// whole job fails rather than completing with partial coverage (§4.2).
const FAILURE_RATE_THRESHOLD: f64 = 0.5;

#[derive(Debug, Default, Clone, Copy)]
pub struct ExtractStats {
    pub files_indexed: u64,
    pub symbols_extracted: u64,
    pub references_found: u64,
    pub dependencies_extracted: u64,
    pub failures: u64,
    pub skipped_unchanged: u64,
}

/// Normalize a parser-reported symbol_type string to the canonical kind
/// vocabulary from the data model (§3).
fn normalize_kind(raw: &str) -> &'static str {
    match raw.to_ascii_lowercase().as_str() {
        "function" | "fn" => "function",
        "method" => "method",
        "class" => "class",
        "struct" => "struct",
        "interface" | "trait" => "interface",
        "type" | "type_alias" | "typedef" => "type",
        "const" | "constant" | "static" => "constant",
        "variable" | "var" | "let" => "variable",
        "enum" => "enum",
        "mod" | "module" | "package" | "namespace" => "module",
        _ => "variable",
    }
}

fn detect_language(ext: &str) -> Option<&'static str> {
    match ext {
        "rs" => Some("rust"),
        "py" => Some("python"),
        "ts" | "tsx" | "js" | "jsx" => Some("typescript"),
        "go" => Some("go"),
        _ => None,
    }
}

fn content_hash(content: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content.as_bytes());
    format!("{:x}", hasher.finalize())
}

struct ParsedFile {
    relative_path: String,
    content: String,
    hash: String,
    language: &'static str,
    symbols: Vec<Symbol>,
    imports: Vec<Import>,
    calls: Vec<FunctionCall>,
}

fn parse_one(root: &Path, path: &Path) -> Result<Option<ParsedFile>> {
    let metadata = std::fs::metadata(path)?;
    if metadata.len() > MAX_INDEX_FILE_BYTES {
        return Ok(None);
    }

    let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("");
    let Some(language) = detect_language(ext) else {
        return Ok(None);
    };

    let content = match std::fs::read_to_string(path) {
        Ok(c) => c,
        Err(_) => return Ok(None), // binary or non-UTF8, not a parse error worth counting
    };

    let lang_parser = PARSERS
        .by_extension(ext)
        .ok_or_else(|| KotaError::Internal(format!("no parser registered for .{ext}")))?;

    let mut parser = tree_sitter::Parser::new();
    lang_parser
        .configure_parser(&mut parser)
        .map_err(|e| KotaError::Internal(e.to_string()))?;
    let (symbols, imports, calls) = lang_parser
        .parse(&mut parser, &content)
        .map_err(|e| KotaError::Internal(e.to_string()))?;

    let relative_path = path
        .strip_prefix(root)
        .unwrap_or(path)
        .to_string_lossy()
        .replace('\\', "/");

    let hash = content_hash(&content);

    Ok(Some(ParsedFile {
        relative_path,
        content,
        hash,
        language,
        symbols,
        imports,
        calls,
    }))
}

fn discover_files(root: &Path) -> Vec<std::path::PathBuf> {
    FileWalker::new(root)
        .skip_hidden(true)
        .use_gitignore(true)
        .walk_paths()
        .filter_map(|result| result.ok())
        .filter(|p| {
            matches!(
                p.extension().and_then(|e| e.to_str()),
                Some(ext) if SUPPORTED_EXTENSIONS.contains(&ext)
            ) && !p
                .components()
                .any(|c| ignore::should_skip(&c.as_os_str().to_string_lossy()))
        })
        .collect()
}

/// Upsert one parsed file's symbols/references/indexed_files rows in a
/// single transaction. Returns (is_noop, symbols_inserted, references_inserted).
fn upsert_file(conn: &Connection, repository_id: i64, file: &ParsedFile) -> Result<(bool, usize, usize)> {
    let existing_hash: Option<String> = conn
        .query_row(
            "SELECT content_hash FROM indexed_files WHERE repository_id = ?1 AND path = ?2",
            params![repository_id, file.relative_path],
            |row| row.get(0),
        )
        .ok();

    if existing_hash.as_deref() == Some(file.hash.as_str()) {
        conn.execute(
            "UPDATE indexed_files SET indexed_at = datetime('now') WHERE repository_id = ?1 AND path = ?2",
            params![repository_id, file.relative_path],
        )?;
        return Ok((true, 0, 0));
    }

    let dependencies_json = serde_json::to_string(
        &file
            .imports
            .iter()
            .map(|i| i.import_path.clone())
            .collect::<Vec<_>>(),
    )?;

    conn.execute(
        "INSERT INTO indexed_files (repository_id, path, content, language, dependencies, content_hash, indexed_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, datetime('now'))
         ON CONFLICT(repository_id, path) DO UPDATE SET
            content = excluded.content,
            language = excluded.language,
            dependencies = excluded.dependencies,
            content_hash = excluded.content_hash,
            indexed_at = excluded.indexed_at",
        params![
            repository_id,
            file.relative_path,
            file.content,
            file.language,
            dependencies_json,
            file.hash,
        ],
    )?;

    let file_id: i64 = conn.query_row(
        "SELECT id FROM indexed_files WHERE repository_id = ?1 AND path = ?2",
        params![repository_id, file.relative_path],
        |row| row.get(0),
    )?;

    // Symbols and references are recomputed per file (§3): clear, then reinsert.
    conn.execute("DELETE FROM indexed_symbols WHERE file_id = ?1", [file_id])?;
    conn.execute(
        "DELETE FROM indexed_references WHERE from_file_id = ?1",
        [file_id],
    )?;

    let mut name_to_id: HashMap<&str, i64> = HashMap::new();
    for sym in &file.symbols {
        conn.execute(
            "INSERT INTO indexed_symbols (file_id, name, kind, start_offset, end_offset, signature)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                file_id,
                sym.name,
                normalize_kind(&sym.symbol_type),
                sym.start_line,
                sym.end_line,
                sym.signature,
            ],
        )?;
        name_to_id.insert(sym.name.as_str(), conn.last_insert_rowid());
    }

    // G2: only calls resolving to a symbol in this same snapshot become
    // References; unresolved calls are dropped, not stored.
    let mut references_inserted = 0usize;
    for call in &file.calls {
        if let Some(&symbol_id) = name_to_id.get(call.callee_name.as_str()) {
            conn.execute(
                "INSERT INTO indexed_references (from_file_id, to_symbol_id, position) VALUES (?1, ?2, ?3)",
                params![file_id, symbol_id, call.call_line],
            )?;
            references_inserted += 1;
        }
    }

    Ok((false, file.symbols.len(), references_inserted))
}

/// Second pass: resolve import paths to `to_file_id`s within the same
/// repository and (re)populate `dependencies`. Only Rust imports currently
/// resolve to a concrete file; other languages' imports are recorded on
/// `indexed_files.dependencies` as package identifiers but do not yet
/// produce file-to-file edges.
fn upsert_dependencies(
    conn: &Connection,
    repository_id: i64,
    root: &Path,
    file: &ParsedFile,
) -> Result<usize> {
    if file.language != "rust" {
        return Ok(0);
    }

    let file_id: i64 = conn.query_row(
        "SELECT id FROM indexed_files WHERE repository_id = ?1 AND path = ?2",
        params![repository_id, file.relative_path],
        |row| row.get(0),
    )?;

    conn.execute("DELETE FROM dependencies WHERE from_file_id = ?1", [file_id])?;

    let resolver = RustImportResolver;
    let mut inserted = 0usize;
    for import in &file.imports {
        let Some(resolved) = resolver.resolve_import(&import.import_path, root) else {
            continue;
        };
        let rel = resolved
            .file_path
            .strip_prefix(root)
            .unwrap_or(&resolved.file_path)
            .to_string_lossy()
            .replace('\\', "/");

        let target_id: Option<i64> = conn
            .query_row(
                "SELECT id FROM indexed_files WHERE repository_id = ?1 AND path = ?2",
                params![repository_id, rel],
                |row| row.get(0),
            )
            .ok();

        if let Some(target_id) = target_id {
            conn.execute(
                "INSERT INTO dependencies (from_file_id, to_file_id, kind) VALUES (?1, ?2, 'import')",
                params![file_id, target_id],
            )?;
            inserted += 1;
        }
    }

    Ok(inserted)
}

/// Run the extractor pipeline over `working_dir`, reporting incremental
/// stats to `on_progress` after each batch.
pub async fn extract_repository(
    pool: &DatabasePool,
    repository_id: i64,
    working_dir: std::path::PathBuf,
    mut on_progress: impl FnMut(ExtractStats) + Send + 'static,
    mut should_cancel: impl FnMut() -> bool + Send + 'static,
) -> Result<ExtractStats> {
    let files = {
        let dir = working_dir.clone();
        tokio::task::spawn_blocking(move || discover_files(&dir)).await?
    };

    let mut stats = ExtractStats::default();

    for batch in files.chunks(BATCH_SIZE) {
        if should_cancel() {
            return Err(KotaError::Cancelled);
        }

        let root = working_dir.clone();
        let batch_paths = batch.to_vec();

        #[cfg(feature = "parallel")]
        let parsed: Vec<Result<Option<ParsedFile>>> = tokio::task::spawn_blocking(move || {
            batch_paths
                .par_iter()
                .map(|p| parse_one(&root, p))
                .collect()
        })
        .await?;

        #[cfg(not(feature = "parallel"))]
        let parsed: Vec<Result<Option<ParsedFile>>> = tokio::task::spawn_blocking(move || {
            batch_paths.iter().map(|p| parse_one(&root, p)).collect()
        })
        .await?;

        let mut ok_files = Vec::new();
        for result in parsed {
            match result {
                Ok(Some(f)) => ok_files.push(f),
                Ok(None) => stats.skipped_unchanged += 0, // unsupported/oversized, not a failure
                Err(e) => {
                    tracing::warn!("extraction failure: {}", e);
                    stats.failures += 1;
                }
            }
        }

        let root_for_upsert = working_dir.clone();
        let batch_stats: ExtractStats = pool
            .run(move |conn| -> Result<ExtractStats> {
                let mut batch_stats = ExtractStats::default();
                let tx = conn.unchecked_transaction()?;
                for file in &ok_files {
                    match upsert_file(&tx, repository_id, file) {
                        Ok((is_noop, symbols, references)) => {
                            if is_noop {
                                batch_stats.skipped_unchanged += 1;
                            } else {
                                batch_stats.files_indexed += 1;
                                batch_stats.symbols_extracted += symbols as u64;
                                batch_stats.references_found += references as u64;
                                match upsert_dependencies(&tx, repository_id, &root_for_upsert, file) {
                                    Ok(n) => batch_stats.dependencies_extracted += n as u64,
                                    Err(e) => tracing::warn!("dependency resolution failed for {}: {}", file.relative_path, e),
                                }
                            }
                        }
                        Err(e) => {
                            tracing::warn!("upsert failed for {}: {}", file.relative_path, e);
                            batch_stats.failures += 1;
                        }
                    }
                }
                tx.commit()?;
                Ok(batch_stats)
            })
            .await?;
        stats.files_indexed += batch_stats.files_indexed;
        stats.symbols_extracted += batch_stats.symbols_extracted;
        stats.references_found += batch_stats.references_found;
        stats.dependencies_extracted += batch_stats.dependencies_extracted;
        stats.failures += batch_stats.failures;
        stats.skipped_unchanged += batch_stats.skipped_unchanged;

        on_progress(stats);
    }

    let attempted = stats.files_indexed + stats.failures + stats.skipped_unchanged;
    if attempted > 0 && (stats.failures as f64 / attempted as f64) > FAILURE_RATE_THRESHOLD {
        return Err(KotaError::Internal(format!(
            "extraction failure rate too high: {}/{} files failed",
            stats.failures, attempted
        )));
    }

    Ok(stats)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn migrations_dir() -> std::path::PathBuf {
        std::path::PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("migrations")
    }

    async fn pool_with_repo() -> (DatabasePool, i64) {
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
        (pool, id)
    }

    #[tokio::test]
    async fn indexes_a_simple_rust_file() {
        let (pool, repo_id) = pool_with_repo().await;
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("lib.rs"),
            "pub fn hello() -> i32 { helper() }\nfn helper() -> i32 { 1 }\n",
        )
        .unwrap();

        let stats = extract_repository(
            &pool,
            repo_id,
            dir.path().to_path_buf(),
            |_| {},
            || false,
        )
        .await
        .unwrap();

        assert_eq!(stats.files_indexed, 1);
        assert!(stats.symbols_extracted >= 2);
    }

    #[tokio::test]
    async fn reindexing_unchanged_file_is_noop() {
        let (pool, repo_id) = pool_with_repo().await;
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("lib.rs"), "pub fn hello() {}\n").unwrap();

        extract_repository(&pool, repo_id, dir.path().to_path_buf(), |_| {}, || false)
            .await
            .unwrap();
        let second = extract_repository(&pool, repo_id, dir.path().to_path_buf(), |_| {}, || false)
            .await
            .unwrap();

        assert_eq!(second.files_indexed, 0);
        assert_eq!(second.skipped_unchanged, 1);
    }

    #[tokio::test]
    async fn cancellation_stops_before_next_batch() {
        let (pool, repo_id) = pool_with_repo().await;
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("lib.rs"), "pub fn hello() {}\n").unwrap();

        let result = extract_repository(&pool, repo_id, dir.path().to_path_buf(), |_| {}, || true).await;
        assert!(matches!(result, Err(KotaError::Cancelled)));
    }
}
