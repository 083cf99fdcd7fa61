//! Conversation relay: drives one chat turn from user message to completed
//! assistant reply.
//!
//! The relay appends the incoming user message, invokes the agent capability
//! with the entire history, streams reply fragments toward the transport
//! boundary in production order, and appends the accumulated reply as a
//! single assistant message only when the turn completes without error.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, RwLock};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::capability::{AgentCapability, AgentEvent};
use crate::conversation::ConversationMessage;
use crate::error::RelayError;
use crate::session::SessionStore;
use crate::tools::ToolProvider;

/// Events emitted toward the transport boundary during one turn, correlated
/// by the originating message id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum RelayEvent {
    /// An incremental piece of the assistant reply.
    #[serde(rename = "agent_response_chunk", rename_all = "camelCase")]
    Chunk {
        content: String,
        message_id: String,
        chunk_index: u64,
    },
    /// The capability invoked a declared tool.
    #[serde(rename = "tool_call", rename_all = "camelCase")]
    ToolCall { name: String, message_id: String },
    /// The turn finished; the full reply has been delivered.
    #[serde(rename = "agent_response_complete", rename_all = "camelCase")]
    Complete { message_id: String },
    /// The turn failed; nothing was appended to history for it.
    #[serde(rename = "error", rename_all = "camelCase")]
    Error {
        message: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        code: Option<String>,
    },
}

/// Sender half of the relay's in-order event channel.
pub type EventSink = mpsc::UnboundedSender<RelayEvent>;

/// Orchestrates chat turns against the session store and agent capability.
pub struct ConversationRelay {
    store: Arc<SessionStore>,
    capability: Arc<dyn AgentCapability>,
    tools: Arc<dyn ToolProvider>,
    /// Sessions with a turn in flight. One turn per session: an overlapping
    /// message is rejected as busy instead of interleaving history appends.
    active: RwLock<HashSet<String>>,
    turn_timeout: Option<Duration>,
}

impl ConversationRelay {
    pub fn new(
        store: Arc<SessionStore>,
        capability: Arc<dyn AgentCapability>,
        tools: Arc<dyn ToolProvider>,
    ) -> Self {
        Self {
            store,
            capability,
            tools,
            active: RwLock::new(HashSet::new()),
            turn_timeout: None,
        }
    }

    /// Abort turns that run longer than `timeout` with a timeout failure.
    /// Without this, the capability's own deadline is in charge.
    pub fn with_turn_timeout(mut self, timeout: Duration) -> Self {
        self.turn_timeout = Some(timeout);
        self
    }

    /// Run one turn for `session_id`.
    ///
    /// Emits chunk and tool-call events followed by exactly one terminal
    /// event into `events`: complete on success, error on failure. A turn
    /// cancelled by disconnect stops emitting without a terminal event. The
    /// returned error mirrors what was already reported to the client.
    pub async fn run_turn(
        &self,
        session_id: &str,
        content: &str,
        message_id: &str,
        events: EventSink,
        cancel: CancellationToken,
    ) -> Result<(), RelayError> {
        if !self.begin_turn(session_id).await {
            warn!("Rejecting overlapping turn for session {}", session_id);
            let err = RelayError::Busy;
            emit_error(&events, &err);
            return Err(err);
        }

        let result = self
            .run_turn_inner(session_id, content, message_id, &events, &cancel)
            .await;

        // Gate release and terminal error emission happen on every path.
        self.finish_turn(session_id).await;
        if let Err(err) = &result {
            emit_error(&events, err);
        }
        result
    }

    async fn begin_turn(&self, session_id: &str) -> bool {
        self.active.write().await.insert(session_id.to_string())
    }

    async fn finish_turn(&self, session_id: &str) {
        self.active.write().await.remove(session_id);
    }

    async fn run_turn_inner(
        &self,
        session_id: &str,
        content: &str,
        message_id: &str,
        events: &EventSink,
        cancel: &CancellationToken,
    ) -> Result<(), RelayError> {
        // Optimistic append: the user message stays in history even when the
        // turn later fails.
        if !self
            .store
            .append(session_id, ConversationMessage::user(content))
            .await
        {
            return Err(RelayError::SessionNotFound(session_id.to_string()));
        }

        let history = self.store.get(session_id).await;
        info!(
            "Turn started: session={} message={} history_len={}",
            session_id,
            message_id,
            history.len()
        );

        let deadline = self.turn_timeout.map(|t| Instant::now() + t);

        // The capability gets the entire history so multi-turn context never
        // depends on capability-side memory.
        let mut stream = match with_deadline(
            deadline,
            self.turn_timeout,
            self.capability.reply(&history, self.tools.clone()),
        )
        .await?
        {
            Ok(stream) => stream,
            Err(e) => {
                error!("Agent capability failed to start turn {}: {:#}", message_id, e);
                return Err(RelayError::Streaming(e));
            }
        };

        let mut accumulated = String::new();
        let mut chunk_index: u64 = 0;

        loop {
            let next = tokio::select! {
                _ = cancel.cancelled() => {
                    // Transport is gone: stop emitting and abandon the turn.
                    info!(
                        "Turn cancelled by disconnect: session={} message={}",
                        session_id, message_id
                    );
                    return Ok(());
                }
                next = with_deadline(deadline, self.turn_timeout, stream.next()) => next?,
            };

            match next {
                Some(Ok(AgentEvent::Fragment(text))) => {
                    if text.is_empty() {
                        continue;
                    }
                    accumulated.push_str(&text);
                    let _ = events.send(RelayEvent::Chunk {
                        content: text,
                        message_id: message_id.to_string(),
                        chunk_index,
                    });
                    chunk_index += 1;
                }
                Some(Ok(AgentEvent::ToolCall { name })) => {
                    let _ = events.send(RelayEvent::ToolCall {
                        name,
                        message_id: message_id.to_string(),
                    });
                }
                Some(Err(e)) => {
                    error!("Agent capability faulted mid-turn {}: {:#}", message_id, e);
                    return Err(RelayError::Streaming(e));
                }
                None => break,
            }
        }

        // Exactly one assistant message per completed turn, appended before
        // the completion event so the next turn is guaranteed to see it.
        if !self
            .store
            .append(session_id, ConversationMessage::assistant(accumulated))
            .await
        {
            // Session destroyed while the tail was streaming; nobody is
            // listening for the completion event.
            return Ok(());
        }
        let _ = events.send(RelayEvent::Complete {
            message_id: message_id.to_string(),
        });
        info!(
            "Turn completed: session={} message={} chunks={}",
            session_id, message_id, chunk_index
        );
        Ok(())
    }
}

fn emit_error(events: &EventSink, err: &RelayError) {
    let _ = events.send(RelayEvent::Error {
        message: err.client_message().to_string(),
        code: Some(err.code().to_string()),
    });
}

/// Await `fut`, aborting with a timeout failure once `deadline` passes.
async fn with_deadline<F: std::future::Future>(
    deadline: Option<Instant>,
    timeout: Option<Duration>,
    fut: F,
) -> Result<F::Output, RelayError> {
    match deadline {
        Some(at) => tokio::time::timeout_at(at, fut)
            .await
            .map_err(|_| RelayError::Timeout(timeout.unwrap_or_default())),
        None => Ok(fut.await),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capability::ReplyStream;
    use crate::conversation::{Conversation, Role};
    use crate::tools::ToolRegistry;
    use anyhow::anyhow;
    use std::sync::Mutex;

    /// One scripted capability turn.
    enum Script {
        Reply(Vec<&'static str>),
        FailAfter(Vec<&'static str>),
        Hang,
    }

    /// Deterministic stand-in for the agent runtime: each invocation pops the
    /// next scripted outcome and records the history length it was given.
    struct ScriptedCapability {
        turns: Mutex<Vec<Script>>,
        seen_history: Mutex<Vec<usize>>,
    }

    impl ScriptedCapability {
        fn new(turns: Vec<Script>) -> Self {
            Self {
                turns: Mutex::new(turns),
                seen_history: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait::async_trait]
    impl AgentCapability for ScriptedCapability {
        async fn reply(
            &self,
            history: &Conversation,
            _tools: Arc<dyn ToolProvider>,
        ) -> anyhow::Result<ReplyStream> {
            self.seen_history.lock().unwrap().push(history.len());
            let script = self.turns.lock().unwrap().remove(0);
            let stream: ReplyStream = match script {
                Script::Reply(fragments) => Box::pin(async_stream::stream! {
                    for fragment in fragments {
                        yield Ok(AgentEvent::Fragment(fragment.to_string()));
                    }
                }),
                Script::FailAfter(fragments) => Box::pin(async_stream::stream! {
                    for fragment in fragments {
                        yield Ok(AgentEvent::Fragment(fragment.to_string()));
                    }
                    yield Err(anyhow!("provider unavailable"));
                }),
                Script::Hang => Box::pin(async_stream::stream! {
                    tokio::time::sleep(Duration::from_secs(3600)).await;
                    yield Ok(AgentEvent::Fragment(String::new()));
                }),
            };
            Ok(stream)
        }
    }

    fn build_relay(turns: Vec<Script>) -> (Arc<ConversationRelay>, Arc<SessionStore>) {
        let store = Arc::new(SessionStore::new());
        let relay = Arc::new(ConversationRelay::new(
            store.clone(),
            Arc::new(ScriptedCapability::new(turns)),
            Arc::new(ToolRegistry::new(vec![])),
        ));
        (relay, store)
    }

    fn drain(rx: &mut mpsc::UnboundedReceiver<RelayEvent>) -> Vec<RelayEvent> {
        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        events
    }

    #[tokio::test]
    async fn test_completed_turn_streams_in_order_and_appends_once() {
        let (relay, store) = build_relay(vec![Script::Reply(vec!["Hi", " there"])]);
        store.create("s1").await;

        let (tx, mut rx) = mpsc::unbounded_channel();
        relay
            .run_turn("s1", "hello", "m1", tx, CancellationToken::new())
            .await
            .unwrap();

        let events = drain(&mut rx);
        assert_eq!(
            events,
            vec![
                RelayEvent::Chunk {
                    content: "Hi".to_string(),
                    message_id: "m1".to_string(),
                    chunk_index: 0,
                },
                RelayEvent::Chunk {
                    content: " there".to_string(),
                    message_id: "m1".to_string(),
                    chunk_index: 1,
                },
                RelayEvent::Complete {
                    message_id: "m1".to_string(),
                },
            ]
        );

        let history = store.get("s1").await;
        assert_eq!(history.len(), 2);
        assert_eq!(history.messages()[0].role, Role::User);
        assert_eq!(history.messages()[0].content, "hello");
        assert_eq!(history.messages()[1].role, Role::Assistant);
        assert_eq!(history.messages()[1].content, "Hi there");
    }

    #[tokio::test]
    async fn test_failed_turn_emits_one_error_and_appends_nothing() {
        let (relay, store) = build_relay(vec![Script::FailAfter(vec!["partial"])]);
        store.create("s1").await;

        let (tx, mut rx) = mpsc::unbounded_channel();
        let result = relay
            .run_turn("s1", "hello", "m1", tx, CancellationToken::new())
            .await;
        assert!(matches!(result, Err(RelayError::Streaming(_))));

        let events = drain(&mut rx);
        assert_eq!(events.len(), 2);
        assert!(matches!(events[0], RelayEvent::Chunk { .. }));
        match &events[1] {
            RelayEvent::Error { code, message } => {
                assert_eq!(code.as_deref(), Some("STREAMING_FAILURE"));
                // Cause is logged, never leaked to the client.
                assert!(!message.contains("provider unavailable"));
            }
            other => panic!("expected error event, got {:?}", other),
        }

        // The user message survives; no assistant message was appended.
        let history = store.get("s1").await;
        assert_eq!(history.len(), 1);
        assert_eq!(history.messages()[0].role, Role::User);
    }

    #[tokio::test]
    async fn test_sequential_turns_see_full_prior_history() {
        let capability = Arc::new(ScriptedCapability::new(vec![
            Script::Reply(vec!["first"]),
            Script::Reply(vec!["second"]),
        ]));
        let store = Arc::new(SessionStore::new());
        let relay = ConversationRelay::new(
            store.clone(),
            capability.clone(),
            Arc::new(ToolRegistry::new(vec![])),
        );
        store.create("s1").await;

        let (tx, _rx) = mpsc::unbounded_channel();
        relay
            .run_turn("s1", "one", "m1", tx.clone(), CancellationToken::new())
            .await
            .unwrap();
        relay
            .run_turn("s1", "two", "m2", tx, CancellationToken::new())
            .await
            .unwrap();

        // Turn 1 saw its own user message; turn 2 saw both turn-1 messages
        // plus its own.
        assert_eq!(*capability.seen_history.lock().unwrap(), vec![1, 3]);
        assert_eq!(store.get("s1").await.len(), 4);
    }

    #[tokio::test]
    async fn test_overlapping_turn_is_rejected_busy() {
        let (relay, store) = build_relay(vec![Script::Hang, Script::Reply(vec!["late"])]);
        store.create("s1").await;

        let cancel = CancellationToken::new();
        let (tx1, _rx1) = mpsc::unbounded_channel();
        let first = {
            let relay = relay.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move { relay.run_turn("s1", "one", "m1", tx1, cancel).await })
        };
        // Let the first turn reach the capability before sending the second.
        tokio::time::sleep(Duration::from_millis(20)).await;

        let (tx2, mut rx2) = mpsc::unbounded_channel();
        let result = relay
            .run_turn("s1", "two", "m2", tx2, CancellationToken::new())
            .await;
        assert!(matches!(result, Err(RelayError::Busy)));

        let events = drain(&mut rx2);
        assert_eq!(events.len(), 1);
        match &events[0] {
            RelayEvent::Error { code, .. } => assert_eq!(code.as_deref(), Some("BUSY")),
            other => panic!("expected busy error, got {:?}", other),
        }

        // The rejected turn must not have touched history.
        assert_eq!(store.get("s1").await.len(), 1);

        cancel.cancel();
        first.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_cancelled_turn_emits_no_terminal_event() {
        let (relay, store) = build_relay(vec![Script::Hang]);
        store.create("s1").await;

        let cancel = CancellationToken::new();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let turn = {
            let relay = relay.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move { relay.run_turn("s1", "hello", "m1", tx, cancel).await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        cancel.cancel();
        turn.await.unwrap().unwrap();

        assert!(drain(&mut rx).is_empty());
        // Only the optimistic user message remains.
        assert_eq!(store.get("s1").await.len(), 1);
    }

    #[tokio::test]
    async fn test_timeout_aborts_the_pipeline() {
        let store = Arc::new(SessionStore::new());
        let relay = ConversationRelay::new(
            store.clone(),
            Arc::new(ScriptedCapability::new(vec![
                Script::Hang,
                Script::Reply(vec!["recovered"]),
            ])),
            Arc::new(ToolRegistry::new(vec![])),
        )
        .with_turn_timeout(Duration::from_millis(50));
        store.create("s1").await;

        let (tx, mut rx) = mpsc::unbounded_channel();
        let result = relay
            .run_turn("s1", "hello", "m1", tx, CancellationToken::new())
            .await;
        assert!(matches!(result, Err(RelayError::Timeout(_))));

        let events = drain(&mut rx);
        assert_eq!(events.len(), 1);
        match &events[0] {
            RelayEvent::Error { code, .. } => assert_eq!(code.as_deref(), Some("TIMEOUT")),
            other => panic!("expected timeout error, got {:?}", other),
        }

        // A later turn on the same session is accepted again.
        let (tx, _rx) = mpsc::unbounded_channel();
        relay
            .run_turn("s1", "again", "m2", tx, CancellationToken::new())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_turn_against_unknown_session_reports_session_not_found() {
        let (relay, _store) = build_relay(vec![Script::Reply(vec!["x"])]);

        let (tx, mut rx) = mpsc::unbounded_channel();
        let result = relay
            .run_turn("ghost", "hello", "m1", tx, CancellationToken::new())
            .await;
        assert!(matches!(result, Err(RelayError::SessionNotFound(_))));

        let events = drain(&mut rx);
        assert_eq!(events.len(), 1);
        match &events[0] {
            RelayEvent::Error { code, .. } => {
                assert_eq!(code.as_deref(), Some("SESSION_NOT_FOUND"));
            }
            other => panic!("expected error event, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_empty_fragments_are_skipped() {
        let (relay, store) = build_relay(vec![Script::Reply(vec!["", "only", ""])]);
        store.create("s1").await;

        let (tx, mut rx) = mpsc::unbounded_channel();
        relay
            .run_turn("s1", "hello", "m1", tx, CancellationToken::new())
            .await
            .unwrap();

        let events = drain(&mut rx);
        assert_eq!(
            events,
            vec![
                RelayEvent::Chunk {
                    content: "only".to_string(),
                    message_id: "m1".to_string(),
                    chunk_index: 0,
                },
                RelayEvent::Complete {
                    message_id: "m1".to_string(),
                },
            ]
        );
        assert_eq!(store.get("s1").await.messages()[1].content, "only");
    }

    #[test]
    fn test_relay_events_serialize_to_wire_shape() {
        let chunk = RelayEvent::Chunk {
            content: "Hi".to_string(),
            message_id: "m1".to_string(),
            chunk_index: 0,
        };
        let json = serde_json::to_value(&chunk).unwrap();
        assert_eq!(json["type"], "agent_response_chunk");
        assert_eq!(json["messageId"], "m1");
        assert_eq!(json["chunkIndex"], 0);

        let complete = RelayEvent::Complete {
            message_id: "m1".to_string(),
        };
        let json = serde_json::to_value(&complete).unwrap();
        assert_eq!(json["type"], "agent_response_complete");

        let error = RelayEvent::Error {
            message: "nope".to_string(),
            code: None,
        };
        let json = serde_json::to_value(&error).unwrap();
        assert_eq!(json["type"], "error");
        assert!(json.get("code").is_none());
    }
}
