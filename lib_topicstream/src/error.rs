//! # Error Types
//!
//! One error enum for the whole library. Connection-level failures surface to
//! callers as `ConnectionUnavailable`/`TransportDisconnected`; the remaining
//! kinds are mostly logged at the place they occur and only returned to the
//! immediate caller.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum TopicStreamError {
    /// An operation was invoked before a successful `connect`.
    #[error("Client not initialized (connect first)")]
    ConnectionUnavailable,

    /// A send was attempted while the socket is not open. Nothing is queued.
    #[error("Transport is not connected")]
    TransportDisconnected,

    /// An inbound frame could not be parsed.
    #[error("Malformed message: {0}")]
    MalformedMessage(String),

    /// A response arrived for a job that has no registered callback.
    #[error("No task registered for job {0}")]
    UnknownJob(u64),

    /// A remote subscription stream reported an error.
    #[error("Stream {id} error: {reason}")]
    StreamFailure { id: String, reason: String },

    /// A unary RPC returned an error status.
    #[cfg(feature = "bridge")]
    #[error("Remote call failed: {0}")]
    RemoteCallFailure(#[from] tonic::Status),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Endpoint or socket setup failed before any traffic was exchanged.
    #[error("Connection setup failed: {0}")]
    Connect(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, TopicStreamError>;
