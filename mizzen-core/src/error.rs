//! Error handling for the Mizzen content pipeline

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result type alias for Mizzen operations
pub type Result<T> = std::result::Result<T, MizzenError>;

/// Main error type for the Mizzen system
#[derive(Error, Debug)]
pub enum MizzenError {
    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// URL resolution errors
    #[error("Resolution error: {0}")]
    Resolution(String),

    /// Media upload and editing errors
    #[error("Media error: {0}")]
    Media(String),

    /// Live document errors
    #[error("Document error: {0}")]
    Document(String),

    /// Event bus errors
    #[error("Event bus error: {0}")]
    EventBus(String),

    /// Failure reported by a remote collaborator
    #[error(transparent)]
    Remote(#[from] RemoteError),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl MizzenError {
    /// Create a new configuration error
    pub fn config<S: Into<String>>(msg: S) -> Self {
        Self::Config(msg.into())
    }

    /// Create a new resolution error
    pub fn resolution<S: Into<String>>(msg: S) -> Self {
        Self::Resolution(msg.into())
    }

    /// Create a new media error
    pub fn media<S: Into<String>>(msg: S) -> Self {
        Self::Media(msg.into())
    }

    /// Create a new document error
    pub fn document<S: Into<String>>(msg: S) -> Self {
        Self::Document(msg.into())
    }

    /// Create a new event bus error
    pub fn event_bus<S: Into<String>>(msg: S) -> Self {
        Self::EventBus(msg.into())
    }

    /// Check if this is a recoverable error
    pub fn is_recoverable(&self) -> bool {
        match self {
            MizzenError::Config(_) => false,
            MizzenError::Resolution(_) => true,
            MizzenError::Media(_) => true,
            MizzenError::Document(_) => true,
            MizzenError::EventBus(_) => true,
            MizzenError::Remote(_) => true,
            MizzenError::Io(_) => true,
            MizzenError::Json(_) => false,
        }
    }

    /// Get error severity level
    pub fn severity(&self) -> ErrorSeverity {
        match self {
            MizzenError::Config(_) => ErrorSeverity::High,
            MizzenError::Resolution(_) => ErrorSeverity::Low,
            MizzenError::Media(_) => ErrorSeverity::Medium,
            MizzenError::Document(_) => ErrorSeverity::Medium,
            MizzenError::EventBus(_) => ErrorSeverity::Medium,
            MizzenError::Remote(_) => ErrorSeverity::Medium,
            MizzenError::Io(_) => ErrorSeverity::Medium,
            MizzenError::Json(_) => ErrorSeverity::Low,
        }
    }
}

/// Failure returned by a remote collaborator (URL resolver, storage, persistence)
///
/// `detail` carries the human-readable reason supplied by the backend, when
/// there is one. Callers display it in preference to `message`.
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[error("{message}")]
pub struct RemoteError {
    pub message: String,
    pub detail: Option<String>,
    pub status: Option<u16>,
}

impl RemoteError {
    /// Create a remote error without a backend detail
    pub fn new<S: Into<String>>(message: S) -> Self {
        Self {
            message: message.into(),
            detail: None,
            status: None,
        }
    }

    /// Create a remote error carrying the backend's detail message
    pub fn with_detail<S: Into<String>, D: Into<String>>(message: S, detail: D) -> Self {
        Self {
            message: message.into(),
            detail: Some(detail.into()),
            status: None,
        }
    }

    /// Attach an HTTP-like status code
    pub fn status(mut self, status: u16) -> Self {
        self.status = Some(status);
        self
    }

    /// The backend detail, if present and non-blank
    pub fn detail(&self) -> Option<&str> {
        self.detail
            .as_deref()
            .map(str::trim)
            .filter(|detail| !detail.is_empty())
    }
}

/// Error severity levels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorSeverity {
    Low,
    Medium,
    High,
    Critical,
}

impl std::fmt::Display for ErrorSeverity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ErrorSeverity::Low => write!(f, "LOW"),
            ErrorSeverity::Medium => write!(f, "MEDIUM"),
            ErrorSeverity::High => write!(f, "HIGH"),
            ErrorSeverity::Critical => write!(f, "CRITICAL"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_remote_error_detail() {
        let err = RemoteError::with_detail("request failed", "quota exceeded").status(413);
        assert_eq!(err.detail(), Some("quota exceeded"));
        assert_eq!(err.status, Some(413));
        assert_eq!(err.to_string(), "request failed");

        let blank = RemoteError::with_detail("request failed", "   ");
        assert_eq!(blank.detail(), None);
        assert_eq!(RemoteError::new("timeout").detail(), None);
    }

    #[test]
    fn test_error_classification() {
        assert!(!MizzenError::config("bad").is_recoverable());
        assert!(MizzenError::resolution("offline").is_recoverable());
        assert_eq!(MizzenError::resolution("x").severity(), ErrorSeverity::Low);
        assert_eq!(MizzenError::config("x").severity(), ErrorSeverity::High);

        let remote: MizzenError = RemoteError::new("boom").into();
        assert!(remote.is_recoverable());
        assert_eq!(remote.to_string(), "boom");
    }
}
