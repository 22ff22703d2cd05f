//! Error types for the catalog client.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CatalogError {
    /// The HTTP response had a non-2xx status code.
    #[error("API error {status}: {message}")]
    Api { status: u16, message: String },

    /// An error from the underlying HTTP client.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// An error from the WebSocket layer.
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    /// A JSON (de)serialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Writing a downloaded recording failed.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid URL: {0}")]
    Url(#[from] url::ParseError),

    /// The past stream has no recording attached.
    #[error("No recording available for stream {0}")]
    NoRecording(String),

    /// A generic error string.
    #[error("{0}")]
    Other(String),
}

impl CatalogError {
    /// True for a 404 from the server.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::Api { status: 404, .. })
    }
}

pub type Result<T> = std::result::Result<T, CatalogError>;
