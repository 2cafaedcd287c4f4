//! Error types for the coursedeck library.

use thiserror::Error;

use crate::model::ContentId;

/// Errors that can occur while talking to the content backend or managing
/// session state.
#[derive(Error, Debug)]
pub enum Error {
    /// HTTP transport error.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// The backend answered with a non-success status.
    #[error("API error ({status}): {message}")]
    Api {
        /// HTTP status code returned by the backend.
        status: u16,
        /// Body or reason phrase returned with the status.
        message: String,
    },

    /// I/O error during file operations.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Payload could not be encoded or decoded.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Configuration file is missing values or malformed.
    #[error("Configuration error: {0}")]
    Config(String),

    /// No user is signed in, so no session-scoped state can exist.
    #[error("No active session")]
    NoSession,

    /// The session that owned this handle has been torn down.
    #[error("Session closed")]
    SessionClosed,

    /// Operation was cancelled before it finished.
    #[error("Operation cancelled")]
    Cancelled,

    /// Download operation failed.
    #[error("Download failed: {0}")]
    Download(String),

    /// The referenced content item is unknown to the service.
    #[error("Content {0} not found")]
    NotFound(ContentId),
}

/// A specialized `Result` type for coursedeck operations.
pub type Result<T> = std::result::Result<T, Error>;
