//! Failure taxonomy for the viewer connection.
//!
//! Every variant is caught where it happens and folded into the controller's
//! `status`/`last_error`; none of them reach the UI as a fault.

use std::time::Duration;

use eye_common::CommonError;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ViewerError {
    /// Stream not live, or the signaling server could not be reached.
    #[error("Stream unavailable: {0}")]
    ChannelUnavailable(String),

    /// A message was sent on a handle that was already closed.
    #[error("Signaling channel closed")]
    ChannelClosed,

    /// Malformed or out-of-order offer/answer exchange.
    #[error("Negotiation failed: {0}")]
    Negotiation(String),

    /// Media transport or signaling channel dropped without an end-of-stream.
    #[error("Connection lost: {0}")]
    TransportClosed(String),

    #[error("No media received within {0:?}")]
    Timeout(Duration),

    #[error("Invalid stream id: {0}")]
    InvalidStreamId(String),
}

impl ViewerError {
    /// Error code string for programmatic handling.
    pub fn error_code(&self) -> &str {
        match self {
            Self::ChannelUnavailable(_) => "CHANNEL_UNAVAILABLE",
            Self::ChannelClosed => "CHANNEL_CLOSED",
            Self::Negotiation(_) => "NEGOTIATION_ERROR",
            Self::TransportClosed(_) => "TRANSPORT_CLOSED",
            Self::Timeout(_) => "TIMEOUT",
            Self::InvalidStreamId(_) => "INVALID_STREAM_ID",
        }
    }
}

impl From<CommonError> for ViewerError {
    fn from(err: CommonError) -> Self {
        Self::InvalidStreamId(err.to_string())
    }
}

impl From<std::io::Error> for ViewerError {
    fn from(err: std::io::Error) -> Self {
        Self::TransportClosed(format!("IO error: {err}"))
    }
}

/// Convenience type alias for Results using ViewerError.
pub type ViewerResult<T> = Result<T, ViewerError>;
