//! Error types for the mention radar

use thiserror::Error;

/// Result type alias using our custom Error
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for the mention radar
#[derive(Error, Debug)]
pub enum Error {
    // Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    // Queue errors
    #[error("Queue is full (capacity {0})")]
    QueueFull(usize),

    #[error("Queue is shut down")]
    QueueClosed,

    // Feed errors
    #[error("Telegram API error: {0}")]
    TelegramApi(String),

    #[error("Discord gateway error: {0}")]
    DiscordGateway(String),

    #[error("Feed disconnected: {0}")]
    FeedDisconnected(String),

    // Collaborator errors
    #[error("Scorer request failed: {0}")]
    Scorer(String),

    #[error("OCR request failed: {0}")]
    Ocr(String),

    #[error("Image download failed: {0}")]
    ImageDownload(String),

    #[error("Alert dispatch failed: {0}")]
    AlertDispatch(String),

    // Serialization errors
    #[error("Serialization error: {0}")]
    Serialization(String),

    // I/O errors
    #[error("I/O error: {0}")]
    Io(String),

    // Generic errors
    #[error("Internal error: {0}")]
    Internal(String),

    #[error(transparent)]
    Anyhow(#[from] anyhow::Error),
}

impl Error {
    /// Check if this error is retryable (transient)
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Error::TelegramApi(_)
                | Error::DiscordGateway(_)
                | Error::FeedDisconnected(_)
                | Error::Scorer(_)
                | Error::Ocr(_)
                | Error::ImageDownload(_)
        )
    }

    /// Check if this error belongs to an external collaborator call.
    /// Collaborator failures are caught at the call site and never
    /// abort processing of the current message.
    pub fn is_collaborator_failure(&self) -> bool {
        matches!(
            self,
            Error::Scorer(_) | Error::Ocr(_) | Error::ImageDownload(_) | Error::AlertDispatch(_)
        )
    }
}

// Conversion from reqwest errors
impl From<reqwest::Error> for Error {
    fn from(e: reqwest::Error) -> Self {
        Error::Internal(e.to_string())
    }
}

// Conversion from serde_json errors
impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}

// Conversion from I/O errors
impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::Io(e.to_string())
    }
}
