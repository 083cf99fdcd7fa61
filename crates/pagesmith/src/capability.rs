//! Seam between the relay and the vendor agent runtime.

use std::pin::Pin;
use std::sync::Arc;

use anyhow::Result;
use futures::Stream;

use crate::conversation::Conversation;
use crate::tools::ToolProvider;

/// Incremental output produced by the agent capability during one turn.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AgentEvent {
    /// A piece of the assistant's reply text, in production order.
    Fragment(String),
    /// The capability invoked one of the declared tools (informational).
    ToolCall { name: String },
}

/// Ordered stream of events for one turn. The stream ends when the
/// capability's turn is complete; an `Err` item is a mid-turn fault.
pub type ReplyStream = Pin<Box<dyn Stream<Item = Result<AgentEvent>> + Send>>;

/// The agent runtime behind a narrow interface.
///
/// Implementations receive the entire history each turn (multi-turn context
/// is carried by the caller, never by capability-side memory) plus the
/// declared tool set; they orchestrate their own tool invocations against the
/// registry and terminate the stream when their turn is complete.
#[async_trait::async_trait]
pub trait AgentCapability: Send + Sync {
    async fn reply(
        &self,
        history: &Conversation,
        tools: Arc<dyn ToolProvider>,
    ) -> Result<ReplyStream>;
}
