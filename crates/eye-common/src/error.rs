//! Error types shared by the viewer crates.

/// Errors raised by shared primitives (identifiers, configuration).
#[derive(Debug, thiserror::Error)]
pub enum CommonError {
    #[error("Invalid stream id {id:?}: {reason}")]
    InvalidStreamId { id: String, reason: &'static str },

    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),
}

impl CommonError {
    /// Error code string for programmatic handling.
    pub fn error_code(&self) -> &str {
        match self {
            Self::InvalidStreamId { .. } => "INVALID_STREAM_ID",
            Self::Config(_) => "CONFIG_ERROR",
        }
    }
}

/// Convenience type alias for Results using CommonError.
pub type CommonResult<T> = Result<T, CommonError>;
