//! Site file tools: text-file operations over the sandboxed site root.
//!
//! The agent reads and writes the HTML/CSS/JS files of the generated site
//! through these. Only text-based web formats are exposed; binary and image
//! types never appear in listings.

use std::path::PathBuf;

use rmcp::model::{CallToolResult, JsonObject, Tool};
use serde_json::{json, Value};
use tokio::io::AsyncBufReadExt;
use tracing::{debug, info};

use super::sandbox::resolve_sandboxed;
use super::{into_tool_result, list_directory, required_str, ToolProvider};
use crate::error::ToolError;

/// Text-based web formats only; no images or other binaries.
const WEB_EXTENSIONS: &[&str] = &[".html", ".css", ".js", ".jsx", ".ts", ".tsx"];
const DEFAULT_MAX_LINES: usize = 20;

/// Provider of site file tools for the agent.
pub struct SiteToolsProvider {
    site_dir: PathBuf,
}

impl SiteToolsProvider {
    pub fn new(site_dir: impl Into<PathBuf>) -> Self {
        Self {
            site_dir: site_dir.into(),
        }
    }

    fn definitions() -> Vec<Tool> {
        vec![
            Tool {
                name: "list_files".into(),
                title: None,
                description: Some(
                    "List all HTML/CSS/JS files in the site directory. Returns filenames with \
                     size, modification time and file type. Use the optional pattern to filter."
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
                name: "preview_file".into(),
                title: None,
                description: Some(
                    "Preview the first N lines of a file in the site directory. Shows file \
                     structure without reading all content. Useful before a full read."
                        .into(),
                ),
                input_schema: serde_json::from_value(json!({
                    "type": "object",
                    "properties": {
                        "filepath": {
                            "type": "string",
                            "description": "Relative path to the file within the site directory (e.g. \"index.html\" or \"pages/about.html\")"
                        },
                        "maxLines": {
                            "type": "integer",
                            "description": "Maximum number of lines to preview (default: 20)"
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
                name: "read_file".into(),
                title: None,
                description: Some(
                    "Read the complete contents of a file in the site directory. Returns the \
                     full content as a string."
                        .into(),
                ),
                input_schema: serde_json::from_value(json!({
                    "type": "object",
                    "properties": {
                        "filepath": {
                            "type": "string",
                            "description": "Relative path to the file within the site directory (e.g. \"index.html\")"
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
                name: "write_file".into(),
                title: None,
                description: Some(
                    "Write or update a file in the site directory. Overwrites the whole file \
                     and creates missing directories. For HTML/CSS/JS text content."
                        .into(),
                ),
                input_schema: serde_json::from_value(json!({
                    "type": "object",
                    "properties": {
                        "filepath": {
                            "type": "string",
                            "description": "Relative path to the file within the site directory (e.g. \"index.html\" or \"pages/about.html\")"
                        },
                        "content": {
                            "type": "string",
                            "description": "Full text content to write"
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
impl ToolProvider for SiteToolsProvider {
    fn tool_definitions(&self) -> Vec<Tool> {
        Self::definitions()
    }

    async fn call_tool(&self, name: &str, arguments: Option<JsonObject>) -> CallToolResult {
        let args = arguments.unwrap_or_default();
        let result = match name {
            "list_files" => self.handle_list_files(&args).await,
            "preview_file" => self.handle_preview_file(&args).await,
            "read_file" => self.handle_read_file(&args).await,
            "write_file" => self.handle_write_file(&args).await,
            other => Err(ToolError::InvalidContent(format!("Unknown tool: {}", other))),
        };
        into_tool_result(name, result)
    }
}

// ── Tool handler implementations ──

impl SiteToolsProvider {
    async fn handle_list_files(&self, args: &JsonObject) -> Result<String, ToolError> {
        let pattern = args.get("pattern").and_then(|v| v.as_str());
        debug!("Listing site files in {}", self.site_dir.display());

        let entries = list_directory(&self.site_dir, WEB_EXTENSIONS, pattern).await?;
        info!("Found {} web file(s)", entries.len());

        let files: Vec<Value> = entries
            .iter()
            .map(|e| {
                json!({
                    "filename": e.name,
                    "size": e.size,
                    "modified": e.modified.to_rfc3339(),
                    "type": file_type(&e.name),
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

    async fn handle_preview_file(&self, args: &JsonObject) -> Result<String, ToolError> {
        let filepath = required_str(args, "filepath")?;
        let max_lines = args
            .get("maxLines")
            .and_then(|v| v.as_u64())
            .map(|v| v as usize)
            .unwrap_or(DEFAULT_MAX_LINES);

        let full_path = resolve_sandboxed(filepath, &self.site_dir)?;
        debug!("Previewing file: {}", full_path.display());

        let file = tokio::fs::File::open(&full_path)
            .await
            .map_err(|e| ToolError::from_io(filepath, e))?;
        let metadata = file
            .metadata()
            .await
            .map_err(|e| ToolError::from_io(filepath, e))?;

        // Stream lines through one reusable buffer so the preview never holds
        // more than the excerpt, while still counting the whole file.
        let mut reader = tokio::io::BufReader::new(file);
        let mut line = String::new();
        let mut preview_lines: Vec<String> = Vec::new();
        let mut total_lines: usize = 0;
        loop {
            line.clear();
            let read = reader
                .read_line(&mut line)
                .await
                .map_err(|e| ToolError::from_io(filepath, e))?;
            if read == 0 {
                break;
            }
            total_lines += 1;
            if preview_lines.len() < max_lines {
                preview_lines.push(line.trim_end_matches(['\r', '\n']).to_string());
            }
        }

        let note = if total_lines > preview_lines.len() {
            format!(
                "Showing first {} of {} lines. Use read_file() for full content.",
                preview_lines.len(),
                total_lines
            )
        } else {
            "Full content shown.".to_string()
        };

        Ok(json!({
            "filename": filepath,
            "fileSize": metadata.len(),
            "totalLines": total_lines,
            "previewLines": preview_lines.len(),
            "sample": preview_lines.join("\n"),
            "note": note,
        })
        .to_string())
    }

    async fn handle_read_file(&self, args: &JsonObject) -> Result<String, ToolError> {
        let filepath = required_str(args, "filepath")?;
        let full_path = resolve_sandboxed(filepath, &self.site_dir)?;
        debug!("Reading file: {}", full_path.display());

        let content = tokio::fs::read_to_string(&full_path)
            .await
            .map_err(|e| ToolError::from_io(filepath, e))?;

        info!("Successfully read {} ({} bytes)", filepath, content.len());
        Ok(content)
    }

    async fn handle_write_file(&self, args: &JsonObject) -> Result<String, ToolError> {
        let filepath = required_str(args, "filepath")?;
        let content = required_str(args, "content")?;
        let full_path = resolve_sandboxed(filepath, &self.site_dir)?;
        debug!("Writing file: {}", full_path.display());

        if let Some(parent) = full_path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| ToolError::from_io(filepath, e))?;
        }
        tokio::fs::write(&full_path, content)
            .await
            .map_err(|e| ToolError::from_io(filepath, e))?;

        info!("Successfully wrote {} ({} bytes)", filepath, content.len());
        Ok(format!(
            "File {} written successfully ({} bytes)",
            filepath,
            content.len()
        ))
    }
}

/// Coarse file type by extension.
fn file_type(name: &str) -> &'static str {
    if name.ends_with(".html") {
        "html"
    } else if name.ends_with(".css") {
        "css"
    } else if name.ends_with(".js") || name.ends_with(".jsx") {
        "javascript"
    } else if name.ends_with(".ts") || name.ends_with(".tsx") {
        "typescript"
    } else {
        "unknown"
    }
}
