//! Standalone git merge driver for the JSONL sync format (C13, §4.11).
//!
//! Installed via `.gitattributes`/`.git/config` as `merge=kotadb-jsonl`,
//! invoked by git with the base, ours, and theirs file paths plus the
//! conflict-marker size: `kotadb-merge-driver %O %A %B %L`. The merged
//! result is written back to the `ours` path, which is what git expects
//! a merge driver to update.

use clap::Parser;
use serde_json::Value;
use std::collections::BTreeMap;
use std::fs;
use std::path::PathBuf;
use std::process::ExitCode;

#[derive(Parser)]
#[command(name = "kotadb-merge-driver")]
#[command(about = "Three-way JSONL merge driver for KotaDB sync files")]
struct Args {
    /// %O - the common ancestor version
    base: PathBuf,
    /// %A - our version; also the output path git expects updated in place
    ours: PathBuf,
    /// %B - their version
    theirs: PathBuf,
    /// %L - conflict marker size (unused; this format never emits markers)
    #[arg(default_value_t = 7)]
    marker_size: u32,
}

fn load_by_id(path: &PathBuf) -> BTreeMap<String, Value> {
    let Ok(contents) = fs::read_to_string(path) else {
        return BTreeMap::new();
    };

    let mut map = BTreeMap::new();
    for line in contents.lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let Ok(value) = serde_json::from_str::<Value>(line) else {
            continue;
        };
        let Some(id) = value.get("id").and_then(Value::as_str) else {
            continue;
        };
        if id.is_empty() {
            continue;
        }
        map.insert(id.to_string(), value);
    }
    map
}

fn merge(base: &BTreeMap<String, Value>, ours: &BTreeMap<String, Value>, theirs: &BTreeMap<String, Value>) -> BTreeMap<String, Value> {
    let mut merged = BTreeMap::new();

    let ids: std::collections::BTreeSet<&String> = ours.keys().chain(theirs.keys()).collect();
    for id in ids {
        match (ours.get(id), theirs.get(id)) {
            (Some(_), Some(theirs_value)) => {
                merged.insert(id.clone(), theirs_value.clone());
            }
            (Some(ours_value), None) => {
                if !base.contains_key(id) {
                    merged.insert(id.clone(), ours_value.clone());
                }
            }
            (None, Some(theirs_value)) => {
                if !base.contains_key(id) {
                    merged.insert(id.clone(), theirs_value.clone());
                }
            }
            (None, None) => unreachable!("id came from the union of ours/theirs keys"),
        }
    }

    merged
}

fn run(args: &Args) -> anyhow::Result<()> {
    let _ = args.marker_size;
    let base = load_by_id(&args.base);
    let ours = load_by_id(&args.ours);
    let theirs = load_by_id(&args.theirs);

    let merged = merge(&base, &ours, &theirs);

    let mut output = String::new();
    for value in merged.values() {
        output.push_str(&serde_json::to_string(value)?);
        output.push('\n');
    }

    fs::write(&args.ours, output)?;
    Ok(())
}

fn main() -> ExitCode {
    let args = Args::parse();
    match run(&args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("kotadb-merge-driver: {err}");
            ExitCode::FAILURE
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(id: &str, field: &str) -> Value {
        serde_json::json!({ "id": id, "field": field })
    }

    #[test]
    fn theirs_wins_on_conflict() {
        let base = BTreeMap::from([("1".to_string(), entry("1", "base"))]);
        let ours = BTreeMap::from([("1".to_string(), entry("1", "ours"))]);
        let theirs = BTreeMap::from([("1".to_string(), entry("1", "theirs"))]);

        let merged = merge(&base, &ours, &theirs);
        assert_eq!(merged["1"]["field"], "theirs");
    }

    #[test]
    fn addition_only_in_ours_is_kept() {
        let base = BTreeMap::new();
        let ours = BTreeMap::from([("1".to_string(), entry("1", "ours"))]);
        let theirs = BTreeMap::new();

        let merged = merge(&base, &ours, &theirs);
        assert_eq!(merged["1"]["field"], "ours");
    }

    #[test]
    fn deletion_in_theirs_is_respected() {
        let base = BTreeMap::from([("1".to_string(), entry("1", "base"))]);
        let ours = BTreeMap::from([("1".to_string(), entry("1", "ours"))]);
        let theirs = BTreeMap::new();

        let merged = merge(&base, &ours, &theirs);
        assert!(!merged.contains_key("1"));
    }

    #[test]
    fn deletion_in_ours_is_respected() {
        let base = BTreeMap::from([("1".to_string(), entry("1", "base"))]);
        let ours = BTreeMap::new();
        let theirs = BTreeMap::from([("1".to_string(), entry("1", "theirs"))]);

        let merged = merge(&base, &ours, &theirs);
        assert!(!merged.contains_key("1"));
    }

    #[test]
    fn malformed_lines_are_skipped() {
        let dir = std::env::temp_dir().join(format!("kotadb-merge-test-{}", std::process::id()));
        fs::create_dir_all(&dir).unwrap();
        let path = dir.join("ours.jsonl");
        fs::write(&path, "not json\n{\"id\":\"1\",\"field\":\"ok\"}\n{}\n").unwrap();

        let loaded = load_by_id(&path);
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded["1"]["field"], "ok");

        fs::remove_dir_all(&dir).ok();
    }
}
