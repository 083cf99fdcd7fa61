//! JSON data tools: structured-data operations over the sandboxed data root.
//!
//! The agent uses these to discover, inspect and persist the JSON documents
//! that back generated pages: list to find a file, preview to learn its shape
//! without reading everything, then read/write for the full round trip.

use std::path::PathBuf;

use rmcp::model::{CallToolResult, JsonObject, Tool};
use serde_json::{json, Value};
use tracing::{debug, info};

use super::sandbox::resolve_sandboxed;
use super::{into_tool_result, list_directory, required_str, ToolProvider};
use crate::error::ToolError;

const JSON_EXTENSIONS: &[&str] = &[".json"];
const DEFAULT_MAX_ITEMS: usize = 3;

/// Provider of JSON data tools for the agent.
pub struct DataToolsProvider {
    data_dir: PathBuf,
}

impl DataToolsProvider {
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
        }
    }

    fn definitions() -> Vec<Tool> {
        vec![
            Tool {
                name: "list_json".into(),
                title: None,
                description: Some(
                    "List all JSON files in the data directory. Returns filenames with size \
                     and modification time. Use the optional pattern to filter (e.g. \"product\" \
                     matches \"products.json\")."
                        .into(),
                ),
                input_schema: serde_json::from_value(json!({
                    "type": "object",
                    "properties": {
                        "pattern": {
                            "type": "string",
                            "description": "Optional search pattern to filter filenames (case-insensitive, partial match)"
                        }
                    }
                }))
                .unwrap_or_default(),
                output_schema: None,
                annotations: None,
                execution: None,
                icons: None,
                meta: None,
            },
            Tool {
                name: "preview_json".into(),
                title: None,
                description: Some(
                    "Preview the structure of a JSON file without reading all content. Shows \
                     top-level keys, sample data (first items of arrays), and item counts. \
                     Useful before a full read."
                        .into(),
                ),
                input_schema: serde_json::from_value(json!({
                    "type": "object",
                    "properties": {
                        "filepath": {
                            "type": "string",
                            "description": "Relative path to the JSON file within the data directory (e.g. \"products.json\")"
                        },
                        "maxItems": {
                            "type": "integer",
                            "description": "Maximum number of array items to include in the sample (default: 3)"
                        }
                    },
                    "required": ["filepath"]
                }))
                .unwrap_or_default(),
                output_schema: None,
                annotations: None,
                execution: None,
                icons: None,
                meta: None,
            },
            Tool {
                name: "read_json".into(),
                title: None,
                description: Some(
                    "Read and parse a JSON file from the data directory. Returns the parsed \
                     content."
                        .into(),
                ),
                input_schema: serde_json::from_value(json!({
                    "type": "object",
                    "properties": {
                        "filepath": {
                            "type": "string",
                            "description": "Relative path to the JSON file within the data directory (e.g. \"products.json\")"
                        }
                    },
                    "required": ["filepath"]
                }))
                .unwrap_or_default(),
                output_schema: None,
                annotations: None,
                execution: None,
                icons: None,
                meta: None,
            },
            Tool {
                name: "write_json".into(),
                title: None,
                description: Some(
                    "Write or update a JSON file in the data directory. Overwrites the whole \
                     file and creates missing directories. Content must be a JSON value; a \
                     JSON-encoded string is parsed once before writing."
                        .into(),
                ),
                input_schema: serde_json::from_value(json!({
                    "type": "object",
                    "properties": {
                        "filepath": {
                            "type": "string",
                            "description": "Relative path to the JSON file within the data directory (e.g. \"products.json\" or \"catalog/items.json\")"
                        },
                        "content": {
                            "description": "JSON value to write. Serialized with 2-space indentation."
                        }
                    },
                    "required": ["filepath", "content"]
                }))
                .unwrap_or_default(),
                output_schema: None,
                annotations: None,
                execution: None,
                icons: None,
                meta: None,
            },
        ]
    }
}

#[async_trait::async_trait]
impl ToolProvider for DataToolsProvider {
    fn tool_definitions(&self) -> Vec<Tool> {
        Self::definitions()
    }

    async fn call_tool(&self, name: &str, arguments: Option<JsonObject>) -> CallToolResult {
        let args = arguments.unwrap_or_default();
        let result = match name {
            "list_json" => self.handle_list_json(&args).await,
            "preview_json" => self.handle_preview_json(&args).await,
            "read_json" => self.handle_read_json(&args).await,
            "write_json" => self.handle_write_json(&args).await,
            other => Err(ToolError::InvalidContent(format!("Unknown tool: {}", other))),
        };
        into_tool_result(name, result)
    }
}

// ── Tool handler implementations ──

impl DataToolsProvider {
    async fn handle_list_json(&self, args: &JsonObject) -> Result<String, ToolError> {
        let pattern = args.get("pattern").and_then(|v| v.as_str());
        debug!("Listing JSON files in {}", self.data_dir.display());

        let entries = list_directory(&self.data_dir, JSON_EXTENSIONS, pattern).await?;
        info!("Found {} JSON file(s)", entries.len());

        let files: Vec<Value> = entries
            .iter()
            .map(|e| {
                json!({
                    "filename": e.name,
                    "size": e.size,
                    "modified": e.modified.to_rfc3339(),
                })
            })
            .collect();

        Ok(json!({
            "files": files,
            "count": files.len(),
            "pattern": pattern,
        })
        .to_string())
    }

    async fn handle_preview_json(&self, args: &JsonObject) -> Result<String, ToolError> {
        let filepath = required_str(args, "filepath")?;
        let max_items = args
            .get("maxItems")
            .and_then(|v| v.as_u64())
            .map(|v| v as usize)
            .unwrap_or(DEFAULT_MAX_ITEMS);

        let full_path = resolve_sandboxed(filepath, &self.data_dir)?;
        debug!("Previewing JSON file: {}", full_path.display());

        let content = tokio::fs::read_to_string(&full_path)
            .await
            .map_err(|e| ToolError::from_io(filepath, e))?;
        let data: Value = serde_json::from_str(&content).map_err(|e| ToolError::InvalidFormat {
            path: filepath.to_string(),
            reason: e.to_string(),
        })?;
        let metadata = tokio::fs::metadata(&full_path)
            .await
            .map_err(|e| ToolError::from_io(filepath, e))?;

        let keys: Vec<&String> = match &data {
            Value::Object(map) => map.keys().collect(),
            _ => Vec::new(),
        };
        let counts = item_counts(&data);
        let note = if counts.is_some() {
            format!(
                "Showing first {} items of arrays. Use read_json() for full content.",
                max_items
            )
        } else {
            "Full content shown (not an array or contains no arrays).".to_string()
        };

        Ok(json!({
            "filename": filepath,
            "fileSize": metadata.len(),
            "topLevelKeys": keys,
            "itemCounts": counts,
            "sample": sample_value(&data, max_items),
            "note": note,
        })
        .to_string())
    }

    async fn handle_read_json(&self, args: &JsonObject) -> Result<String, ToolError> {
        let filepath = required_str(args, "filepath")?;
        let full_path = resolve_sandboxed(filepath, &self.data_dir)?;
        debug!("Reading JSON file: {}", full_path.display());

        let content = tokio::fs::read_to_string(&full_path)
            .await
            .map_err(|e| ToolError::from_io(filepath, e))?;
        let data: Value = serde_json::from_str(&content).map_err(|e| ToolError::InvalidFormat {
            path: filepath.to_string(),
            reason: e.to_string(),
        })?;

        info!("Successfully read {} ({} bytes)", filepath, content.len());
        serde_json::to_string_pretty(&data)
            .map_err(|e| ToolError::InvalidContent(e.to_string()))
    }

    async fn handle_write_json(&self, args: &JsonObject) -> Result<String, ToolError> {
        let filepath = required_str(args, "filepath")?;
        let content = args
            .get("content")
            .cloned()
            .ok_or(ToolError::MissingArgument("content"))?;
        let full_path = resolve_sandboxed(filepath, &self.data_dir)?;
        debug!("Writing JSON file: {}", full_path.display());

        // A string payload is parsed once before re-serializing so values
        // coming back from read_json do not get double-encoded; an
        // unparseable string stays a literal text value.
        let value = match content {
            Value::String(text) => {
                serde_json::from_str::<Value>(&text).unwrap_or(Value::String(text))
            }
            other => other,
        };

        let serialized = serde_json::to_string_pretty(&value)
            .map_err(|e| ToolError::InvalidContent(e.to_string()))?;

        if let Some(parent) = full_path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| ToolError::from_io(filepath, e))?;
        }
        tokio::fs::write(&full_path, &serialized)
            .await
            .map_err(|e| ToolError::from_io(filepath, e))?;

        let (count, unit) = match &value {
            Value::Array(items) => (items.len(), "items"),
            Value::Object(map) => (map.len(), "keys"),
            _ => (0, "keys"),
        };
        info!("Successfully wrote {} ({} bytes)", filepath, serialized.len());
        Ok(format!(
            "File {} written successfully ({} bytes, {} {})",
            filepath,
            serialized.len(),
            count,
            unit
        ))
    }
}

/// Sample of a JSON value: arrays truncated to `max_items`, everything else
/// passed through.
fn sample_value(data: &Value, max_items: usize) -> Value {
    match data {
        Value::Array(items) => Value::Array(items.iter().take(max_items).cloned().collect()),
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(k, v)| {
                    let sampled = match v {
                        Value::Array(items) => {
                            Value::Array(items.iter().take(max_items).cloned().collect())
                        }
                        other => other.clone(),
                    };
                    (k.clone(), sampled)
                })
                .collect(),
        ),
        other => other.clone(),
    }
}

/// Full lengths of any arrays in the value, so the caller knows whether the
/// sample is complete. None when the value contains no arrays.
fn item_counts(data: &Value) -> Option<Value> {
    match data {
        Value::Array(items) => Some(json!({ "items": items.len() })),
        Value::Object(map) => {
            let counts: serde_json::Map<String, Value> = map
                .iter()
                .filter_map(|(k, v)| match v {
                    Value::Array(items) => Some((k.clone(), json!(items.len()))),
                    _ => None,
                })
                .collect();
            if counts.is_empty() {
                None
            } else {
                Some(Value::Object(counts))
            }
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rmcp::model::CallToolResult;
    use tempfile::TempDir;

    fn args(value: Value) -> JsonObject {
        value.as_object().cloned().unwrap_or_default()
    }

    fn result_text(result: &CallToolResult) -> String {
        result
            .content
            .first()
            .and_then(|c| c.as_text())
            .map(|t| t.text.clone())
            .unwrap_or_default()
    }

    fn is_error(result: &CallToolResult) -> bool {
        result.is_error == Some(true)
    }

    #[tokio::test]
    async fn test_list_json_filters_by_pattern() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("products.json"), "[]").unwrap();
        std::fs::write(dir.path().join("users.json"), "{}").unwrap();
        std::fs::write(dir.path().join("notes.txt"), "nope").unwrap();

        let provider = DataToolsProvider::new(dir.path());
        let result = provider
            .call_tool("list_json", Some(args(json!({ "pattern": "prod" }))))
            .await;
        assert!(!is_error(&result));

        let payload: Value = serde_json::from_str(&result_text(&result)).unwrap();
        assert_eq!(payload["count"], 1);
        assert_eq!(payload["files"][0]["filename"], "products.json");
    }

    #[tokio::test]
    async fn test_list_json_empty_match_is_not_an_error() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("users.json"), "{}").unwrap();

        let provider = DataToolsProvider::new(dir.path());
        let result = provider
            .call_tool("list_json", Some(args(json!({ "pattern": "missing" }))))
            .await;
        assert!(!is_error(&result));

        let payload: Value = serde_json::from_str(&result_text(&result)).unwrap();
        assert_eq!(payload["count"], 0);
    }

    #[tokio::test]
    async fn test_preview_json_samples_arrays_and_reports_counts() {
        let dir = TempDir::new().unwrap();
        let items: Vec<Value> = (0..100).map(|i| json!({ "id": i })).collect();
        std::fs::write(
            dir.path().join("big.json"),
            serde_json::to_string(&Value::Array(items)).unwrap(),
        )
        .unwrap();

        let provider = DataToolsProvider::new(dir.path());
        let result = provider
            .call_tool(
                "preview_json",
                Some(args(json!({ "filepath": "big.json", "maxItems": 3 }))),
            )
            .await;
        assert!(!is_error(&result));

        let payload: Value = serde_json::from_str(&result_text(&result)).unwrap();
        assert_eq!(payload["sample"].as_array().unwrap().len(), 3);
        assert_eq!(payload["itemCounts"]["items"], 100);
    }

    #[tokio::test]
    async fn test_preview_json_reports_top_level_keys_of_objects() {
        let dir = TempDir::new().unwrap();
        std::fs::write(
            dir.path().join("catalog.json"),
            r#"{"products": [1, 2, 3, 4, 5], "updated": "today"}"#,
        )
        .unwrap();

        let provider = DataToolsProvider::new(dir.path());
        let result = provider
            .call_tool(
                "preview_json",
                Some(args(json!({ "filepath": "catalog.json" }))),
            )
            .await;

        let payload: Value = serde_json::from_str(&result_text(&result)).unwrap();
        let keys = payload["topLevelKeys"].as_array().unwrap();
        assert!(keys.contains(&json!("products")));
        assert_eq!(payload["itemCounts"]["products"], 5);
        // Default sample size.
        assert_eq!(payload["sample"]["products"].as_array().unwrap().len(), 3);
        assert_eq!(payload["sample"]["updated"], "today");
    }

    #[tokio::test]
    async fn test_write_then_read_round_trips() {
        let dir = TempDir::new().unwrap();
        let provider = DataToolsProvider::new(dir.path());

        let content = json!({ "title": "Pet Store", "products": [{ "name": "collar" }] });
        let write = provider
            .call_tool(
                "write_json",
                Some(args(json!({ "filepath": "store.json", "content": content }))),
            )
            .await;
        assert!(!is_error(&write));

        let read = provider
            .call_tool("read_json", Some(args(json!({ "filepath": "store.json" }))))
            .await;
        let round_tripped: Value = serde_json::from_str(&result_text(&read)).unwrap();
        assert_eq!(round_tripped, content);
    }

    #[tokio::test]
    async fn test_write_json_parses_stringified_content_once() {
        let dir = TempDir::new().unwrap();
        let provider = DataToolsProvider::new(dir.path());

        let write = provider
            .call_tool(
                "write_json",
                Some(args(json!({
                    "filepath": "items.json",
                    "content": "[{\"id\": 1}, {\"id\": 2}]"
                }))),
            )
            .await;
        assert!(!is_error(&write));

        let read = provider
            .call_tool("read_json", Some(args(json!({ "filepath": "items.json" }))))
            .await;
        let value: Value = serde_json::from_str(&result_text(&read)).unwrap();
        assert_eq!(value, json!([{ "id": 1 }, { "id": 2 }]));
    }

    #[tokio::test]
    async fn test_write_json_keeps_unparseable_string_literal() {
        let dir = TempDir::new().unwrap();
        let provider = DataToolsProvider::new(dir.path());

        provider
            .call_tool(
                "write_json",
                Some(args(json!({ "filepath": "note.json", "content": "not json at all" }))),
            )
            .await;

        let read = provider
            .call_tool("read_json", Some(args(json!({ "filepath": "note.json" }))))
            .await;
        let value: Value = serde_json::from_str(&result_text(&read)).unwrap();
        assert_eq!(value, json!("not json at all"));
    }

    #[tokio::test]
    async fn test_write_json_creates_parent_directories() {
        let dir = TempDir::new().unwrap();
        let provider = DataToolsProvider::new(dir.path());

        let write = provider
            .call_tool(
                "write_json",
                Some(args(json!({ "filepath": "catalog/items.json", "content": [] }))),
            )
            .await;
        assert!(!is_error(&write));
        assert!(dir.path().join("catalog/items.json").is_file());
    }

    #[tokio::test]
    async fn test_read_missing_file_is_recovered_error() {
        let dir = TempDir::new().unwrap();
        let provider = DataToolsProvider::new(dir.path());

        let result = provider
            .call_tool("read_json", Some(args(json!({ "filepath": "ghost.json" }))))
            .await;
        assert!(is_error(&result));
        assert!(result_text(&result).contains("File not found"));
    }

    #[tokio::test]
    async fn test_read_malformed_json_is_recovered_error() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("broken.json"), "{ not json").unwrap();
        let provider = DataToolsProvider::new(dir.path());

        let result = provider
            .call_tool("read_json", Some(args(json!({ "filepath": "broken.json" }))))
            .await;
        assert!(is_error(&result));
        assert!(result_text(&result).contains("Invalid JSON"));
    }

    #[tokio::test]
    async fn test_traversal_is_rejected_without_io() {
        let dir = TempDir::new().unwrap();
        let provider = DataToolsProvider::new(dir.path());

        let result = provider
            .call_tool(
                "read_json",
                Some(args(json!({ "filepath": "../../etc/passwd" }))),
            )
            .await;
        assert!(is_error(&result));
        assert!(result_text(&result).contains("Path traversal detected"));
    }
}
