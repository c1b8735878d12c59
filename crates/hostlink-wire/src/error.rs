//! Error types for the host transport layer.

use std::time::Duration;
use thiserror::Error;

/// Errors from the wire protocol, the host group and the TCP endpoints.
#[derive(Debug, Error)]
pub enum WireError {
    /// Missing or invalid configuration. Fatal at construction time.
    #[error("Configuration error: {0}")]
    Config(String),

    /// The declared body length disagrees with the packed body content.
    #[error("Frame format error: {0}")]
    Format(String),

    /// An encoded value was malformed or of an unexpected type.
    #[error("Decode error: {0}")]
    Decode(String),

    /// The message violates a `HostMessage` invariant.
    #[error("Invalid message: {0}")]
    InvalidMessage(String),

    /// The encoder failed to write a value.
    #[error("Encode error: {0}")]
    Encode(String),

    /// A frame header declared a negative body length.
    #[error("Invalid frame header: body length {length}")]
    InvalidFrameHeader { length: i32 },

    /// A frame header declared a body larger than the configured limit.
    #[error("Frame too large: {size} bytes (max {max})")]
    FrameTooLarge { size: usize, max: usize },

    /// Could not establish the outbound connection.
    #[error("Connect to {target} failed: {source}")]
    Connect {
        target: String,
        #[source]
        source: std::io::Error,
    },

    /// Writing a frame to an established connection failed.
    #[error("Write to {target} failed: {source}")]
    Write {
        target: String,
        #[source]
        source: std::io::Error,
    },

    /// A bounded wait elapsed.
    #[error("{op} to {target} timed out after {after:?}")]
    Timeout {
        op: &'static str,
        target: String,
        after: Duration,
    },

    /// A host tried to send a message to itself.
    #[error("Host {host_id} cannot send a message to itself")]
    SelfSend { host_id: String },

    /// The target host is not a member of the group.
    #[error("Host not found: {0}")]
    HostNotFound(String),

    /// The group's lookup map and iteration set disagree.
    #[error("Host group inconsistent: {0}")]
    GroupInconsistent(String),

    /// The client connector was closed.
    #[error("Client connector closed")]
    ConnectorClosed,

    /// The server listener was closed.
    #[error("Server listener closed")]
    ServerClosed,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl WireError {
    /// Whether the error only spoils the current frame.
    ///
    /// Frame-local errors leave the frame boundaries intact, so the connection
    /// keeps reading. Everything else ends the connection.
    pub fn is_frame_local(&self) -> bool {
        matches!(
            self,
            WireError::Format(_) | WireError::Decode(_) | WireError::InvalidMessage(_)
        )
    }
}

/// Alias for transport results.
pub type WireResult<T> = Result<T, WireError>;
