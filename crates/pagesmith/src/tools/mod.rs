//! Sandboxed file tools declared to the agent capability.
//!
//! Two independent roots: a structured-data root (JSON documents backing
//! generated pages) and a generated-site root (HTML/CSS/JS). Every operation
//! validates its path against the owning root before any I/O, and every
//! failure is recovered into an error result payload the agent can react to.

mod data_tools;
mod sandbox;
mod site_tools;

pub use data_tools::DataToolsProvider;
pub use sandbox::resolve_sandboxed;
pub use site_tools::SiteToolsProvider;

use std::path::Path;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use rmcp::model::{CallToolResult, Content, JsonObject, Tool};
use tracing::warn;

use crate::error::ToolError;

/// A named set of tools the agent capability may invoke.
///
/// Mirrors the shape of an MCP tool server: list definitions, dispatch calls.
/// `call_tool` never faults; failures come back as error result payloads.
#[async_trait::async_trait]
pub trait ToolProvider: Send + Sync {
    fn tool_definitions(&self) -> Vec<Tool>;

    async fn call_tool(&self, name: &str, arguments: Option<JsonObject>) -> CallToolResult;

    fn provides(&self, name: &str) -> bool {
        self.tool_definitions().iter().any(|t| t.name == name)
    }
}

/// Composes providers into the single tool set handed to the capability.
pub struct ToolRegistry {
    providers: Vec<Arc<dyn ToolProvider>>,
}

impl ToolRegistry {
    pub fn new(providers: Vec<Arc<dyn ToolProvider>>) -> Self {
        Self { providers }
    }
}

#[async_trait::async_trait]
impl ToolProvider for ToolRegistry {
    fn tool_definitions(&self) -> Vec<Tool> {
        self.providers
            .iter()
            .flat_map(|p| p.tool_definitions())
            .collect()
    }

    async fn call_tool(&self, name: &str, arguments: Option<JsonObject>) -> CallToolResult {
        for provider in &self.providers {
            if provider.provides(name) {
                return provider.call_tool(name, arguments).await;
            }
        }
        warn!("Unknown tool requested: {}", name);
        CallToolResult::error(vec![Content::text(format!("Unknown tool: {}", name))])
    }
}

/// Extract a required string argument.
pub(crate) fn required_str<'a>(
    args: &'a JsonObject,
    key: &'static str,
) -> Result<&'a str, ToolError> {
    args.get(key)
        .and_then(|v| v.as_str())
        .ok_or(ToolError::MissingArgument(key))
}

pub(crate) struct DirEntryInfo {
    pub name: String,
    pub size: u64,
    pub modified: DateTime<Utc>,
}

/// Enumerate regular files in `dir` whose name ends with one of
/// `allowed_extensions`, optionally filtered by a case-insensitive substring
/// pattern. Sorted by name for stable output.
pub(crate) async fn list_directory(
    dir: &Path,
    allowed_extensions: &[&str],
    pattern: Option<&str>,
) -> Result<Vec<DirEntryInfo>, ToolError> {
    let dir_label = dir.display().to_string();
    let mut read_dir = tokio::fs::read_dir(dir)
        .await
        .map_err(|e| ToolError::from_io(&dir_label, e))?;

    let lower_pattern = pattern.map(|p| p.to_lowercase());
    let mut entries = Vec::new();
    while let Some(entry) = read_dir
        .next_entry()
        .await
        .map_err(|e| ToolError::from_io(&dir_label, e))?
    {
        let name = entry.file_name().to_string_lossy().to_string();
        if !allowed_extensions.iter().any(|ext| name.ends_with(ext)) {
            continue;
        }
        if let Some(p) = &lower_pattern {
            if !name.to_lowercase().contains(p.as_str()) {
                continue;
            }
        }
        let metadata = entry
            .metadata()
            .await
            .map_err(|e| ToolError::from_io(&name, e))?;
        if !metadata.is_file() {
            continue;
        }
        let modified = metadata
            .modified()
            .map(DateTime::<Utc>::from)
            .unwrap_or_else(|_| Utc::now());
        entries.push(DirEntryInfo {
            name,
            size: metadata.len(),
            modified,
        });
    }
    entries.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(entries)
}

/// Recover a handler outcome into a tool result payload.
pub(crate) fn into_tool_result(tool: &str, result: Result<String, ToolError>) -> CallToolResult {
    match result {
        Ok(text) => CallToolResult::success(vec![Content::text(text)]),
        Err(e) => {
            warn!("Tool {} failed ({}): {}", tool, e.code(), e);
            CallToolResult::error(vec![Content::text(e.to_string())])
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct SingleTool(&'static str);

    #[async_trait::async_trait]
    impl ToolProvider for SingleTool {
        fn tool_definitions(&self) -> Vec<Tool> {
            vec![Tool {
                name: self.0.into(),
                title: None,
                description: None,
                input_schema: Default::default(),
                output_schema: None,
                annotations: None,
                execution: None,
                icons: None,
                meta: None,
            }]
        }

        async fn call_tool(&self, _name: &str, _arguments: Option<JsonObject>) -> CallToolResult {
            CallToolResult::success(vec![Content::text(self.0)])
        }
    }

    #[tokio::test]
    async fn test_registry_dispatches_by_tool_name() {
        let registry = ToolRegistry::new(vec![
            Arc::new(SingleTool("alpha")),
            Arc::new(SingleTool("beta")),
        ]);
        assert_eq!(registry.tool_definitions().len(), 2);

        let result = registry.call_tool("beta", None).await;
        assert_ne!(result.is_error, Some(true));
    }

    #[tokio::test]
    async fn test_registry_recovers_unknown_tool_into_error_payload() {
        let registry = ToolRegistry::new(vec![Arc::new(SingleTool("alpha"))]);
        let result = registry.call_tool("does_not_exist", None).await;
        assert_eq!(result.is_error, Some(true));
    }
}
