//! Shared application state.

use std::sync::Arc;

use pagesmith::relay::ConversationRelay;
use pagesmith::session::SessionStore;

use crate::config::Config;

/// State shared across routes and socket handlers.
#[derive(Clone)]
pub struct AppState {
    pub sessions: Arc<SessionStore>,
    pub relay: Arc<ConversationRelay>,
    pub config: Config,
}
