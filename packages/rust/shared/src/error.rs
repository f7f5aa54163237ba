//! Error types for CodeMatch.
//!
//! Library crates use [`CodeMatchError`] via `thiserror`.
//! The CLI wraps this with `color-eyre` for rich diagnostics.
//!
//! The two network stages report their own tagged errors
//! ([`RetrievalError`], [`CompletionError`]) so the extraction pipeline can
//! tell failure causes apart instead of seeing an empty result.

use std::path::PathBuf;

/// Top-level error type for all CodeMatch operations.
#[derive(Debug, thiserror::Error)]
pub enum CodeMatchError {
    /// Configuration or credential loading error. Raised before any network call.
    #[error("config error: {message}")]
    Config { message: String },

    /// Network/HTTP client setup error.
    #[error("network error: {0}")]
    Network(String),

    /// Search backend failure.
    #[error(transparent)]
    Retrieval(#[from] RetrievalError),

    /// Language model backend failure.
    #[error(transparent)]
    Completion(#[from] CompletionError),

    /// Filesystem I/O error.
    #[error("I/O error at {path:?}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Input validation error (unknown code system, bad URL, etc.).
    #[error("validation error: {message}")]
    Validation { message: String },

    /// The extraction was cancelled before it finished.
    #[error("extraction cancelled")]
    Cancelled,
}

/// Convenience alias used throughout the codebase.
pub type Result<T> = std::result::Result<T, CodeMatchError>;

impl CodeMatchError {
    /// Create a config error from any displayable message.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config {
            message: msg.into(),
        }
    }

    /// Create a validation error from any displayable message.
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation {
            message: msg.into(),
        }
    }

    /// Wrap a `std::io::Error` with a path for context.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

/// Failure of a search backend query.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum RetrievalError {
    /// Backend unreachable (DNS, TLS, refused connection, timeout).
    #[error("search backend unreachable: {0}")]
    Connect(String),

    /// Credentials rejected (HTTP 401/403).
    #[error("search backend rejected credentials (HTTP {status})")]
    Unauthorized { status: u16 },

    /// Any other non-success HTTP status.
    #[error("search backend returned HTTP {status}: {reason}")]
    Status { status: u16, reason: String },

    /// Response body did not have the expected hits structure.
    #[error("malformed search response: {0}")]
    Malformed(String),
}

/// Failure of a language model completion call.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum CompletionError {
    /// Endpoint unreachable (DNS, TLS, refused connection, timeout).
    #[error("completion endpoint unreachable: {0}")]
    Connect(String),

    /// API key rejected (HTTP 401/403).
    #[error("completion endpoint rejected API key (HTTP {status})")]
    Unauthorized { status: u16 },

    /// HTTP 429.
    #[error("completion endpoint rate limited the request")]
    RateLimited { retry_after_secs: Option<u64> },

    /// Any other non-success HTTP status.
    #[error("completion endpoint returned HTTP {status}: {body}")]
    Status { status: u16, body: String },

    /// Response body had no usable message.
    #[error("malformed completion response: {0}")]
    Malformed(String),

    /// Prompt exceeds the configured size limit; rejected before sending.
    #[error("prompt too large: {chars} chars exceeds limit of {limit}")]
    PromptTooLarge { chars: usize, limit: usize },
}
