//! Error types and handling
//!
//! This module provides the error types used throughout the Lexis engine.
//! All errors implement the `LexisErrorExt` trait which provides user-friendly
//! hints, a stable machine code, an HTTP-equivalent status and whether the
//! error is recoverable.
//!
//! Only a small part of this taxonomy ever reaches a caller. Search failures,
//! empty results and memory failures are recovered inside the engine and
//! recorded in research metadata; the downstream model failure is the one
//! class allowed to abort a turn.

use thiserror::Error;

/// Trait for Lexis error extensions
///
/// All engine errors implement this trait. Hints are safe to show to end
/// users: no API keys, no file system paths, no provider payloads.
pub trait LexisErrorExt {
    /// Returns a user-friendly hint for the error
    fn user_hint(&self) -> &str;

    /// Returns whether the error is recoverable
    ///
    /// Recoverable errors can be retried or worked around. Non-recoverable
    /// errors typically require a configuration change.
    fn is_recoverable(&self) -> bool;

    /// Stable, machine readable error code
    fn code(&self) -> &str;

    /// HTTP-equivalent status for transports that need one
    fn status_code(&self) -> u16;
}

/// Main engine error type
///
/// # Examples
///
/// ```
/// use sdk::errors::{EngineError, LexisErrorExt};
///
/// let error = EngineError::ModelUnavailable {
///     message: "connection refused".to_string(),
///     code: "model_unreachable".to_string(),
/// };
/// assert_eq!(error.status_code(), 503);
/// assert!(error.is_recoverable());
///
/// let config_error = EngineError::Config("max_rounds must be >= 1".to_string());
/// assert!(!config_error.is_recoverable());
/// ```
#[derive(Debug, Error)]
pub enum EngineError {
    // Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    // Database errors
    #[error("Database error: {0}")]
    Database(String),

    // Classifier rule set errors
    #[error("Rule set error: {0}")]
    RuleSet(String),

    // Requirement template errors
    #[error("Template error: {0}")]
    Template(String),

    // Search errors
    #[error("Search timed out after {0}ms")]
    SearchTimeout(u64),

    #[error("Search provider error: {0}")]
    SearchProvider(String),

    // Downstream model errors
    #[error("Model unavailable ({code}): {message}")]
    ModelUnavailable { message: String, code: String },

    #[error("Model stream interrupted: {0}")]
    ModelStream(String),

    // Turn lifecycle
    #[error("Turn cancelled")]
    Cancelled,

    // Generic IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl LexisErrorExt for EngineError {
    fn user_hint(&self) -> &str {
        match self {
            Self::Config(_) => "Check your config.toml file for errors",
            Self::Database(_) => "Conversation storage failed. Try again",
            Self::RuleSet(_) => "Classifier rules could not be loaded. Check the rules file",
            Self::Template(_) => "Document templates could not be loaded. Check the templates file",
            Self::SearchTimeout(_) => "Legal search took too long. Try a more specific question",
            Self::SearchProvider(_) => "Legal search is unavailable right now",
            Self::ModelUnavailable { .. } => {
                "The answer service is unavailable. Check the model provider and try again"
            }
            Self::ModelStream(_) => "The answer was interrupted. Try again",
            Self::Cancelled => "The request was cancelled",
            Self::Io(_) => "File system operation failed",
        }
    }

    fn is_recoverable(&self) -> bool {
        !matches!(self, Self::Config(_) | Self::RuleSet(_) | Self::Template(_))
    }

    fn code(&self) -> &str {
        match self {
            Self::Config(_) => "config_invalid",
            Self::Database(_) => "storage_failure",
            Self::RuleSet(_) => "rules_invalid",
            Self::Template(_) => "templates_invalid",
            Self::SearchTimeout(_) => "search_timeout",
            Self::SearchProvider(_) => "search_provider_error",
            Self::ModelUnavailable { code, .. } => code,
            Self::ModelStream(_) => "model_stream_interrupted",
            Self::Cancelled => "cancelled",
            Self::Io(_) => "io_failure",
        }
    }

    fn status_code(&self) -> u16 {
        match self {
            Self::Config(_) | Self::RuleSet(_) | Self::Template(_) | Self::Io(_) => 500,
            Self::Database(_) => 500,
            Self::SearchTimeout(_) => 504,
            Self::SearchProvider(_) => 502,
            Self::ModelUnavailable { code, .. } if code == "model_unreachable" => 503,
            Self::ModelUnavailable { code, .. } if code == "model_timeout" => 504,
            Self::ModelUnavailable { .. } => 502,
            Self::ModelStream(_) => 502,
            // Client closed request
            Self::Cancelled => 499,
        }
    }
}

/// Structured error body handed to transports when a turn aborts
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct ErrorBody {
    pub message: String,
    pub code: String,
    pub status: u16,
}

impl From<&EngineError> for ErrorBody {
    fn from(err: &EngineError) -> Self {
        Self {
            message: err.user_hint().to_string(),
            code: err.code().to_string(),
            status: err.status_code(),
        }
    }
}
