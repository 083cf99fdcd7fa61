//! Error taxonomy for tool and relay failures.

use std::time::Duration;

use thiserror::Error;

/// Failures raised by sandboxed file-tool operations.
///
/// Tool errors never escape a provider: `call_tool` recovers them into an
/// error result payload so the agent can react to them conversationally.
#[derive(Debug, Error)]
pub enum ToolError {
    #[error("Path traversal detected: {0} is outside the allowed directory")]
    PathTraversal(String),

    #[error("File not found: {0}")]
    NotFound(String),

    #[error("Invalid JSON in {path}: {reason}")]
    InvalidFormat { path: String, reason: String },

    #[error("Invalid content for JSON: {0}")]
    InvalidContent(String),

    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    #[error("Missing required argument: {0}")]
    MissingArgument(&'static str),

    #[error("Error accessing {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

impl ToolError {
    /// Stable code for categorization in logs and payloads.
    pub fn code(&self) -> &'static str {
        match self {
            Self::PathTraversal(_) => "PATH_TRAVERSAL",
            Self::NotFound(_) => "FILE_NOT_FOUND",
            Self::InvalidFormat { .. } => "INVALID_JSON",
            Self::InvalidContent(_) => "INVALID_CONTENT",
            Self::PermissionDenied(_) => "PERMISSION_DENIED",
            Self::MissingArgument(_) => "MISSING_ARGUMENT",
            Self::Io { .. } => "IO_ERROR",
        }
    }

    /// Classify an I/O error on `path` into the matching variant.
    pub fn from_io(path: &str, err: std::io::Error) -> Self {
        match err.kind() {
            std::io::ErrorKind::NotFound => Self::NotFound(path.to_string()),
            std::io::ErrorKind::PermissionDenied => Self::PermissionDenied(path.to_string()),
            _ => Self::Io {
                path: path.to_string(),
                source: err,
            },
        }
    }
}

/// Failures of a single relay turn.
///
/// Each failed turn surfaces to the transport boundary as exactly one error
/// event carrying a stable code; the underlying cause is logged, never sent
/// to the client verbatim.
#[derive(Debug, Error)]
pub enum RelayError {
    #[error("agent capability faulted: {0}")]
    Streaming(anyhow::Error),

    #[error("a turn is already in flight for this session")]
    Busy,

    #[error("turn aborted after {0:?}")]
    Timeout(Duration),

    #[error("session not found: {0}")]
    SessionNotFound(String),
}

impl RelayError {
    /// Stable code for the outbound error event.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Streaming(_) => "STREAMING_FAILURE",
            Self::Busy => "BUSY",
            Self::Timeout(_) => "TIMEOUT",
            Self::SessionNotFound(_) => "SESSION_NOT_FOUND",
        }
    }

    /// Generic, retry-safe message shown to the client.
    pub fn client_message(&self) -> &'static str {
        match self {
            Self::Busy => {
                "A response is already in progress for this conversation. \
                 Wait for it to finish and try again."
            }
            Self::Timeout(_) => "The agent took too long to respond. Please try again.",
            _ => "The agent failed to complete the response. Please try again.",
        }
    }
}
