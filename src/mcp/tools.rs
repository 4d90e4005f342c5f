// Fixed tool catalog for `tools/list` / `tools/call` (§4.5).

use serde_json::{json, Value};

#[derive(Debug, Clone)]
pub struct ToolDefinition {
    pub name: &'static str,
    pub description: &'static str,
    pub input_schema: Value,
}

impl ToolDefinition {
    pub fn as_json(&self) -> Value {
        json!({
            "name": self.name,
            "description": self.description,
            "inputSchema": self.input_schema,
        })
    }
}

pub fn tool_catalog() -> Vec<ToolDefinition> {
    vec![
        ToolDefinition {
            name: "search_code",
            description: "Case-insensitive substring search over indexed file content, with a highlighted snippet per hit.",
            input_schema: json!({
                "type": "object",
                "required": ["term"],
                "properties": {
                    "term": { "type": "string" },
                    "repository": { "type": "integer" },
                    "limit": { "type": "integer", "maximum": 100 },
                },
            }),
        },
        ToolDefinition {
            name: "index_repository",
            description: "Enqueue an indexing job for a repository, resolving it by owner/name if it hasn't been seen before.",
            input_schema: json!({
                "type": "object",
                "required": ["repository"],
                "properties": {
                    "repository": { "type": "string" },
                    "ref": { "type": "string" },
                },
            }),
        },
        ToolDefinition {
            name: "list_recent_files",
            description: "List the most recently indexed files, optionally scoped to one repository.",
            input_schema: json!({
                "type": "object",
                "properties": {
                    "repository": { "type": "integer" },
                    "limit": { "type": "integer", "maximum": 100 },
                },
            }),
        },
        ToolDefinition {
            name: "search_dependencies",
            description: "Bounded breadth-first traversal of the dependency graph starting at a file.",
            input_schema: json!({
                "type": "object",
                "required": ["repository", "file_path"],
                "properties": {
                    "repository": { "type": "integer" },
                    "file_path": { "type": "string" },
                    "direction": { "type": "string", "enum": ["dependencies", "dependents"] },
                    "depth": { "type": "integer" },
                },
            }),
        },
        ToolDefinition {
            name: "analyze_change_impact",
            description: "Union of downstream-dependent files across a set of changed files, summarized by language.",
            input_schema: json!({
                "type": "object",
                "required": ["repository", "file_paths"],
                "properties": {
                    "repository": { "type": "integer" },
                    "file_paths": { "type": "array", "items": { "type": "string" } },
                },
            }),
        },
        ToolDefinition {
            name: "validate_implementation_spec",
            description: "Validate a JSON document (given as a string) against a provided JSON Schema.",
            input_schema: json!({
                "type": "object",
                "required": ["json", "schema"],
                "properties": {
                    "json": { "type": "string" },
                    "schema": { "type": "object" },
                },
            }),
        },
        ToolDefinition {
            name: "kota_sync_export",
            description: "Write the whitelisted tables to the sync export directory as JSONL.",
            input_schema: json!({ "type": "object", "properties": {} }),
        },
        ToolDefinition {
            name: "kota_sync_import",
            description: "Apply deletions and upsert rows from the sync export directory's JSONL files.",
            input_schema: json!({ "type": "object", "properties": {} }),
        },
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn catalog_names_match_the_dispatcher_switch() {
        let names: Vec<_> = tool_catalog().into_iter().map(|t| t.name).collect();
        assert_eq!(
            names,
            vec![
                "search_code",
                "index_repository",
                "list_recent_files",
                "search_dependencies",
                "analyze_change_impact",
                "validate_implementation_spec",
                "kota_sync_export",
                "kota_sync_import",
            ]
        );
    }
}
