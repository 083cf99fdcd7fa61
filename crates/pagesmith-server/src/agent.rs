//! Development agent capability.
//!
//! Stands in for a configured agent runtime so the relay, tools and
//! transport can be exercised end to end without provider credentials.
//! Real SDK integrations implement [`AgentCapability`] and replace this at
//! startup.

use std::sync::Arc;

use anyhow::Result;
use pagesmith::capability::{AgentCapability, AgentEvent, ReplyStream};
use pagesmith::conversation::{Conversation, Role};
use pagesmith::tools::ToolProvider;

/// Echoes the latest user message back as word-sized fragments.
pub struct LoopbackCapability;

#[async_trait::async_trait]
impl AgentCapability for LoopbackCapability {
    async fn reply(
        &self,
        history: &Conversation,
        tools: Arc<dyn ToolProvider>,
    ) -> Result<ReplyStream> {
        let declared = tools.tool_definitions().len();
        let latest = history
            .messages()
            .iter()
            .rev()
            .find(|m| m.role == Role::User)
            .map(|m| m.content.clone())
            .unwrap_or_default();

        Ok(Box::pin(async_stream::stream! {
            yield Ok(AgentEvent::Fragment(format!(
                "No agent provider is configured ({} tools declared). You said:",
                declared
            )));
            for word in latest.split_whitespace() {
                yield Ok(AgentEvent::Fragment(format!(" {}", word)));
            }
        }))
    }
}
