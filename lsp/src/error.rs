//! Error types returned by the client.

use std::path::PathBuf;
use std::time::Duration;

use crate::message::ResponseError;

/// Failure to bring up a language server.
#[derive(Debug, thiserror::Error)]
pub enum LaunchError {
    #[error("language server executable {command:?} not found in PATH")]
    NotFound {
        command: String,
        #[source]
        source: which::Error,
    },
    #[error("failed to spawn {}", .path.display())]
    Spawn {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("child process has no {0} pipe")]
    MissingPipe(&'static str),
    #[error("language server is already running")]
    AlreadyRunning,
    #[error("no language server command configured")]
    NotConfigured,
}

/// Failure to hand a message to the writer.
#[derive(Debug, thiserror::Error)]
pub enum SendError {
    /// The outbound queue was at capacity; the message was dropped.
    #[error("outbound queue full, message dropped")]
    QueueFull,
    #[error("language server is not running")]
    NotRunning,
    #[error("failed to serialize params: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Failure of a request/response round trip.
#[derive(Debug, thiserror::Error)]
pub enum RequestError {
    #[error(transparent)]
    Send(#[from] SendError),
    /// The server answered with a structured error.
    #[error("server error: {0}")]
    Rpc(ResponseError),
    /// The result did not have the expected shape.
    #[error("unexpected result shape for {method}: {source}")]
    Decode {
        method: &'static str,
        #[source]
        source: serde_json::Error,
    },
    #[error("request timed out after {0:?}")]
    Timeout(Duration),
    /// The reply slot was released before an answer arrived (stop or connection loss).
    #[error("request cancelled")]
    Cancelled,
}

impl RequestError {
    /// Whether the caller gave up or the link went away, as opposed to a server-side failure.
    #[must_use]
    pub fn is_cancellation(&self) -> bool {
        matches!(self, Self::Timeout(_) | Self::Cancelled)
    }
}

/// Failure of a document synchronization call.
#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    #[error("document {0} is not open")]
    NotOpen(String),
    #[error(transparent)]
    Send(#[from] SendError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cancellation_classification() {
        assert!(RequestError::Cancelled.is_cancellation());
        assert!(RequestError::Timeout(Duration::from_millis(5)).is_cancellation());
        assert!(!RequestError::Send(SendError::QueueFull).is_cancellation());
        assert!(
            !RequestError::Rpc(ResponseError::method_not_found("x")).is_cancellation()
        );
    }

    #[test]
    fn display_includes_context() {
        let err = SyncError::NotOpen("file:///a.rs".into());
        assert_eq!(err.to_string(), "document file:///a.rs is not open");
        assert_eq!(
            LaunchError::MissingPipe("stdout").to_string(),
            "child process has no stdout pipe"
        );
    }
}
