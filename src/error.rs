use std::path::PathBuf;
use thiserror::Error;

/// Result type for scenesync operations
pub type Result<T> = std::result::Result<T, SyncError>;

/// Errors that can occur while keeping the media pointer in sync
#[derive(Error, Debug)]
pub enum SyncError {
    /// No OBS connection settings on disk
    #[error("OBS connection settings are not configured")]
    ConfigurationMissing,

    /// OBS was unreachable or rejected the connection
    #[error("Connection failure: {0}")]
    ConnectionFailure(String),

    /// WebSocket transport error
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    /// Connection was closed unexpectedly
    #[error("Connection closed")]
    ConnectionClosed,

    /// Request timed out waiting for response
    #[error("Request timeout")]
    Timeout,

    /// OBS refused the identify handshake
    #[error("Authentication failed: {0}")]
    Authentication(String),

    /// OBS answered a request with a failure status
    #[error("OBS request {request_type} failed ({code}): {comment}")]
    Obs {
        /// Request type that failed
        request_type: String,
        /// obs-websocket status code
        code: u16,
        /// Comment returned by OBS, if any
        comment: String,
    },

    /// Requested media is not in the catalog
    #[error("Animation file not found: {name}")]
    MediaNotFound {
        /// Name that was requested
        name: String,
        /// Every name the catalog knows about
        available: Vec<String>,
    },

    /// Event or message payload could not be decoded
    #[error("Malformed event: {0}")]
    MalformedEvent(String),

    /// A persisted state file could not be written
    #[error("Failed to persist {}: {source}", path.display())]
    Persistence {
        /// File that was being written
        path: PathBuf,
        /// Underlying I/O error
        #[source]
        source: std::io::Error,
    },

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl SyncError {
    /// True for failures the supervisor answers with a reconnect
    pub fn is_connection_error(&self) -> bool {
        matches!(
            self,
            SyncError::ConnectionFailure(_)
                | SyncError::WebSocket(_)
                | SyncError::ConnectionClosed
                | SyncError::Timeout
                | SyncError::Authentication(_)
                | SyncError::Obs { .. }
        )
    }
}
