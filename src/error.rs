use std::time::Duration;
use thiserror::Error;

/// Result type for Lavalink operations
pub type Result<T> = std::result::Result<T, LavalinkError>;

/// Errors that can occur when driving Lavalink players
#[derive(Error, Debug)]
pub enum LavalinkError {
    /// Command issued on a session that was disconnected or never attached
    #[error("This connection is not valid")]
    InvalidSession,

    /// A numeric argument fell outside its accepted range
    #[error("{parameter} out of range: {value}")]
    OutOfRange {
        /// Name of the offending parameter
        parameter: &'static str,
        /// Value that was rejected
        value: f64,
    },

    /// Partial playback window is empty or inverted
    #[error("Invalid playback range: end {end:?} must be after start {start:?}")]
    InvalidRange {
        /// Requested start offset
        start: Duration,
        /// Requested end offset
        end: Duration,
    },

    /// Two equalizer adjustments targeted the same band
    #[error("Multiple adjustments for equalizer band {0}")]
    DuplicateBand(u8),

    /// No guild connection is registered under this id
    #[error("Unknown session: {0}")]
    UnknownSession(u64),

    /// A guild connection is already registered under this id
    #[error("Session already registered: {0}")]
    DuplicateSession(u64),

    /// Writing to the node transport failed
    #[error("Transport error: {0}")]
    Transport(String),

    /// WebSocket handshake or protocol error
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    /// The node connection has been closed
    #[error("Connection closed")]
    ConnectionClosed,

    /// A subscriber fell behind and missed this many events
    #[error("Subscriber lagged by {0} events")]
    Lagged(u64),

    /// Track token could not be decoded
    #[error("Malformed track token: {0}")]
    MalformedToken(String),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Invalid node configuration
    #[error("Configuration error: {0}")]
    Config(String),
}
