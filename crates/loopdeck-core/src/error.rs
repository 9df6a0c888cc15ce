//! Error types for Loopdeck.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Failure of a single evaluation attempt.
///
/// A thrown/reported engine error and a "ran but produced nothing playable"
/// result are kept apart because they need different user-facing messages.
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum EvaluationError {
    /// The engine rejected the code (syntax error, eval error or scheduler error).
    #[error("Evaluation failed: {message}")]
    Rejected { code: String, message: String },

    /// The code ran but did not resolve to a pattern.
    #[error("Code evaluated but did not produce a playable pattern")]
    NoPattern { code: String },
}

impl EvaluationError {
    /// The code that was being evaluated.
    pub fn code(&self) -> &str {
        match self {
            Self::Rejected { code, .. } | Self::NoPattern { code } => code,
        }
    }
}

/// A shared error type for the Loopdeck workspace.
///
/// Typed, structured variants with automatic conversion from common error
/// types via the `From` trait.
#[derive(Error, Debug, Clone, Serialize, Deserialize)]
pub enum LoopdeckError {
    /// Entity not found error with type information
    #[error("Entity not found: {entity_type} '{id}'")]
    NotFound {
        entity_type: &'static str,
        id: String,
    },

    /// IO error (file system operations)
    #[error("IO error: {message}")]
    Io { message: String },

    /// Serialization/deserialization error
    #[error("Serialization error: {format} - {message}")]
    Serialization { format: String, message: String },

    /// Storage backend error (local store or synced account graph)
    #[error("Storage error: {0}")]
    Storage(String),

    /// The engine resource (audio backend or editor) could not be created
    #[error("Attach failure: {0}")]
    Attach(String),

    /// Code evaluation failed
    #[error(transparent)]
    Evaluation(#[from] EvaluationError),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Internal error (should not happen in normal operation)
    #[error("Internal error: {0}")]
    Internal(String),
}

impl LoopdeckError {
    // ============================================================================
    // Constructor helpers
    // ============================================================================

    /// Creates a NotFound error
    pub fn not_found(entity_type: &'static str, id: impl Into<String>) -> Self {
        Self::NotFound {
            entity_type,
            id: id.into(),
        }
    }

    /// Creates an IO error
    pub fn io(message: impl Into<String>) -> Self {
        Self::Io {
            message: message.into(),
        }
    }

    /// Creates a Storage error
    pub fn storage(message: impl Into<String>) -> Self {
        Self::Storage(message.into())
    }

    /// Creates an Attach error
    pub fn attach(message: impl Into<String>) -> Self {
        Self::Attach(message.into())
    }

    /// Creates a Config error
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    /// Creates an Internal error
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    // ============================================================================
    // Type checking methods
    // ============================================================================

    /// Check if this is a NotFound error
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    /// Check if this is a storage error
    pub fn is_storage(&self) -> bool {
        matches!(self, Self::Storage(_))
    }

    /// Check if this is an attach failure
    pub fn is_attach(&self) -> bool {
        matches!(self, Self::Attach(_))
    }

    /// Check if this is an evaluation error
    pub fn is_evaluation(&self) -> bool {
        matches!(self, Self::Evaluation(_))
    }
}

// ============================================================================
// From implementations for automatic conversion
// ============================================================================

impl From<std::io::Error> for LoopdeckError {
    fn from(err: std::io::Error) -> Self {
        Self::Io {
            message: format!("{} (kind: {:?})", err, err.kind()),
        }
    }
}

impl From<serde_json::Error> for LoopdeckError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization {
            format: "JSON".to_string(),
            message: err.to_string(),
        }
    }
}

impl From<toml::de::Error> for LoopdeckError {
    fn from(err: toml::de::Error) -> Self {
        Self::Serialization {
            format: "TOML".to_string(),
            message: err.to_string(),
        }
    }
}

impl From<toml::ser::Error> for LoopdeckError {
    fn from(err: toml::ser::Error) -> Self {
        Self::Serialization {
            format: "TOML".to_string(),
            message: err.to_string(),
        }
    }
}

/// A type alias for `Result<T, LoopdeckError>`.
pub type Result<T> = std::result::Result<T, LoopdeckError>;
