//! Error types for the sync client

use thiserror::Error;

/// Errors surfaced by conversation operations
#[derive(Error, Debug)]
pub enum SyncError {
    /// No active, non-finalized conversation
    #[error("Conversation not started")]
    NotStarted,

    /// Message text was empty
    #[error("Message text must not be empty")]
    EmptyMessage,

    /// Backend answered with a non-success status
    #[error("Backend returned {status}: {body}")]
    Http { status: u16, body: String },

    /// Request could not be sent or its response read
    #[error("Request error: {0}")]
    Request(#[from] reqwest::Error),

    /// WebSocket error
    #[error("WebSocket error: {0}")]
    WebSocket(String),

    /// Invalid URL
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    /// URL parse error
    #[error("URL parse error: {0}")]
    UrlParse(#[from] url::ParseError),
}

/// Result alias for sync operations
pub type Result<T> = std::result::Result<T, SyncError>;
