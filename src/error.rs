// src/error.rs

//! Unified error handling for the harvester.
//!
//! Every failure carries an [`ErrorKind`] so that retry decisions are made
//! from the kind alone:
//!
//! - `Transient`: network trouble or an unavailable service; retried with backoff.
//! - `Permanent`: malformed markup or content the backend rejected; never retried.
//! - `Integrity`: the log, index or manifest cannot be trusted, or the run
//!   cannot proceed at all (bad configuration, refused credentials, missing
//!   collection); aborts the run.

use std::fmt;

use thiserror::Error;

/// Result type alias for harvester operations.
pub type Result<T> = std::result::Result<T, AppError>;

/// Classification of an error for retry and propagation purposes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Transient,
    Permanent,
    Integrity,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ErrorKind::Transient => "transient",
            ErrorKind::Permanent => "permanent",
            ErrorKind::Integrity => "integrity",
        };
        f.write_str(s)
    }
}

/// Unified application error type.
#[derive(Error, Debug)]
pub enum AppError {
    /// I/O operation failed
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// HTTP request failed
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// JSON serialization/deserialization failed
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// TOML parsing failed
    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),

    /// URL parsing failed
    #[error("URL parse error: {0}")]
    Url(#[from] url::ParseError),

    /// CSS selector parsing failed
    #[error("Invalid selector '{selector}': {message}")]
    Selector { selector: String, message: String },

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Data validation error
    #[error("Validation error: {0}")]
    Validation(String),

    /// Source markup could not be parsed into records
    #[error("Parse error for {context}: {message}")]
    Parse { context: String, message: String },

    /// Remote service answered with a retryable failure
    #[error("Service unavailable: {0}")]
    Unavailable(String),

    /// Remote service refused the payload
    #[error("Rejected by backend: {0}")]
    Rejected(String),

    /// The target collection does not exist (any more)
    #[error("Collection not found: {0}")]
    CollectionNotFound(String),

    /// Retry budget used up on a transient failure
    #[error("{context} failed after {attempts} attempts: {message}")]
    RetriesExhausted {
        context: String,
        attempts: u32,
        message: String,
    },

    /// Persisted state is unreadable or corrupted
    #[error("Integrity error in {path}: {message}")]
    Integrity { path: String, message: String },
}

impl AppError {
    /// Create a selector parsing error.
    pub fn selector(selector: impl Into<String>, message: impl fmt::Display) -> Self {
        Self::Selector {
            selector: selector.into(),
            message: message.to_string(),
        }
    }

    /// Create a configuration error.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    /// Create a validation error.
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    /// Create a parse error with context.
    pub fn parse(context: impl Into<String>, message: impl fmt::Display) -> Self {
        Self::Parse {
            context: context.into(),
            message: message.to_string(),
        }
    }

    /// Create an integrity error for a persisted file.
    pub fn integrity(path: impl fmt::Display, message: impl fmt::Display) -> Self {
        Self::Integrity {
            path: path.to_string(),
            message: message.to_string(),
        }
    }

    /// Map an HTTP status to an error: 429 and 5xx are retryable, 401 and 403
    /// mean the credentials are wrong for every request, anything else means
    /// the request itself was refused.
    pub fn from_status(status: u16, body: impl fmt::Display) -> Self {
        match status {
            429 | 500..=599 => Self::Unavailable(format!("HTTP {status}: {body}")),
            401 | 403 => Self::Config(format!("credentials refused (HTTP {status}): {body}")),
            _ => Self::Rejected(format!("HTTP {status}: {body}")),
        }
    }

    /// Classify this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            AppError::Http(e) => match e.status() {
                Some(status) => {
                    let code = status.as_u16();
                    if code == 429 || status.is_server_error() {
                        ErrorKind::Transient
                    } else if code == 401 || code == 403 {
                        ErrorKind::Integrity
                    } else {
                        ErrorKind::Permanent
                    }
                }
                None if e.is_builder() => ErrorKind::Permanent,
                None => ErrorKind::Transient,
            },
            AppError::Unavailable(_) | AppError::RetriesExhausted { .. } => ErrorKind::Transient,
            AppError::Url(_)
            | AppError::Selector { .. }
            | AppError::Validation(_)
            | AppError::Parse { .. }
            | AppError::Rejected(_) => ErrorKind::Permanent,
            AppError::Io(_)
            | AppError::Json(_)
            | AppError::Toml(_)
            | AppError::Config(_)
            | AppError::CollectionNotFound(_)
            | AppError::Integrity { .. } => ErrorKind::Integrity,
        }
    }

    /// Whether a fresh attempt could succeed.
    pub fn is_transient(&self) -> bool {
        self.kind() == ErrorKind::Transient
    }

    /// Whether the run must stop.
    pub fn is_fatal(&self) -> bool {
        self.kind() == ErrorKind::Integrity
    }
}
