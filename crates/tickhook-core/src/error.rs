//! Error type shared across the scheduler, gateway and binary.

use thiserror::Error;

/// Result alias for Tickhook operations.
pub type Result<T> = std::result::Result<T, TickhookError>;

#[derive(Debug, Error)]
pub enum TickhookError {
    /// A request field is missing, has the wrong type, or is out of range.
    #[error("validation error: {0}")]
    Validation(String),

    /// The task store could not be read or written.
    #[error("task store unavailable: {0}")]
    StoreUnavailable(String),

    #[error("config error: {0}")]
    Config(String),

    /// The outbound HTTP client could not be built.
    #[error("http client error: {0}")]
    Http(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl TickhookError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    pub fn store(message: impl Into<String>) -> Self {
        Self::StoreUnavailable(message.into())
    }

    /// Whether this error was caused by the caller rather than the service.
    pub fn is_client_error(&self) -> bool {
        matches!(self, Self::Validation(_))
    }
}
