//! Error types for Eternal

use thiserror::Error;

use crate::llm::LlmError;
use crate::vault::MirrorError;

/// Main error type for Eternal operations
#[derive(Error, Debug)]
pub enum EternalError {
    /// Storage-related errors (LanceDB, schema, queries)
    #[error("Storage error: {0}")]
    Storage(String),

    /// Language model / embedding provider errors
    #[error("LLM error: {0}")]
    Llm(#[from] LlmError),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Durable buffer log errors. These are never swallowed.
    #[error("Buffer error: {0}")]
    Buffer(String),

    /// Scheduler registry errors
    #[error("Scheduler error: {0}")]
    Scheduler(String),

    /// Memory operation errors
    #[error("Memory error: {0}")]
    Memory(String),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization errors
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// General errors
    #[error("{0}")]
    General(String),
}

impl From<serde_json::Error> for EternalError {
    fn from(e: serde_json::Error) -> Self {
        EternalError::Serialization(e.to_string())
    }
}

/// Failure of a best-effort step attached to a primary operation.
///
/// Advisory errors are reported next to a successful result instead of
/// replacing it, so callers can tell "stored, but the mirror is down" apart
/// from "not stored".
#[derive(Error, Debug, Clone, PartialEq)]
pub enum AdvisoryError {
    #[error("Supersession check failed: {0}")]
    Supersession(String),

    #[error("Mirror sync failed: {0}")]
    Mirror(String),

    #[error("Maintenance step failed: {0}")]
    Maintenance(String),

    #[error("Triple extraction failed: {0}")]
    Triples(String),

    #[error("Profile capture failed: {0}")]
    Profile(String),
}

impl From<MirrorError> for AdvisoryError {
    fn from(e: MirrorError) -> Self {
        AdvisoryError::Mirror(e.to_string())
    }
}

/// Result type alias for Eternal operations
pub type Result<T> = std::result::Result<T, EternalError>;
