//! WebSocket transport gateway.
//!
//! One session per connection: created on upgrade, destroyed on close.
//! Inbound user messages start relay turns; relay events are forwarded to
//! the socket tagged with the originating message id. Connections are
//! independent; ordering is only guaranteed within one.

use std::sync::Arc;

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::IntoResponse,
};
use futures::{
    sink::SinkExt,
    stream::{SplitSink, StreamExt},
};
use pagesmith::relay::RelayEvent;
use serde::Deserialize;
use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::state::AppState;

/// Longest user message accepted over the socket.
const MAX_MESSAGE_CHARS: usize = 100_000;

/// Client → server events.
#[derive(Debug, Deserialize)]
#[serde(tag = "type")]
enum ClientEvent {
    #[serde(rename = "user_message", rename_all = "camelCase")]
    UserMessage { content: String, message_id: String },
}

type SharedSink = Arc<Mutex<SplitSink<WebSocket, Message>>>;

/// Serialize and send one relay event; false when the socket is gone.
async fn send_event(sender: &SharedSink, event: &RelayEvent) -> bool {
    match serde_json::to_string(event) {
        Ok(text) => {
            let mut guard = sender.lock().await;
            guard.send(Message::Text(text.into())).await.is_ok()
        }
        Err(e) => {
            error!("Failed to serialize socket event: {}", e);
            false
        }
    }
}

pub async fn websocket_handler(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
) -> impl IntoResponse {
    ws.on_upgrade(|socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: AppState) {
    let connection_id = Uuid::new_v4().to_string();
    state.sessions.create(&connection_id).await;
    info!("Connection opened: {}", connection_id);

    let cancel = CancellationToken::new();
    let (sender, mut receiver) = socket.split();
    let sender = Arc::new(Mutex::new(sender));

    while let Some(Ok(msg)) = receiver.next().await {
        match msg {
            Message::Text(text) => match serde_json::from_str::<ClientEvent>(&text) {
                Ok(ClientEvent::UserMessage {
                    content,
                    message_id,
                }) => {
                    let content = content.trim().to_string();
                    if content.is_empty() || content.chars().count() > MAX_MESSAGE_CHARS {
                        let _ = send_event(
                            &sender,
                            &RelayEvent::Error {
                                message: "Message content must be non-empty and under the size limit"
                                    .to_string(),
                                code: None,
                            },
                        )
                        .await;
                        continue;
                    }
                    spawn_turn(
                        &state,
                        &connection_id,
                        content,
                        message_id,
                        sender.clone(),
                        cancel.child_token(),
                    );
                }
                Err(e) => {
                    warn!("Unparseable socket message: {}", e);
                }
            },
            Message::Close(_) => break,
            _ => {}
        }
    }

    // Disconnect: stop in-flight emission, release the history.
    cancel.cancel();
    state.sessions.destroy(&connection_id).await;
    info!("Connection closed: {}", connection_id);
}

/// Start one relay turn in the background, forwarding its events to the
/// socket in arrival order.
fn spawn_turn(
    state: &AppState,
    connection_id: &str,
    content: String,
    message_id: String,
    sender: SharedSink,
    cancel: CancellationToken,
) {
    let relay = state.relay.clone();
    let session_id = connection_id.to_string();
    let (events_tx, mut events_rx) = mpsc::unbounded_channel();

    // Forwarder drains the relay's in-order channel into the socket. It ends
    // when the relay drops its sender at the end of the turn.
    tokio::spawn(async move {
        while let Some(event) = events_rx.recv().await {
            if !send_event(&sender, &event).await {
                break;
            }
        }
    });

    tokio::spawn(async move {
        if let Err(e) = relay
            .run_turn(&session_id, &content, &message_id, events_tx, cancel)
            .await
        {
            warn!("Turn failed for session {}: {}", session_id, e);
        }
    });
}
