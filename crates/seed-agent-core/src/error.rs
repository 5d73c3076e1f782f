//! Common error types for the seed agent.

use thiserror::Error;

/// A result type using `CoreError`.
pub type Result<T> = std::result::Result<T, CoreError>;

/// Errors raised while parsing the shared vocabulary types.
///
/// These surface as validation errors at the request boundary and are never
/// retried.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CoreError {
    /// The seed ID was not a valid integer.
    #[error("invalid seed id: {0}")]
    InvalidSeedId(String),

    /// The stage name is not recognized.
    #[error("unknown stage: {0}")]
    UnknownStage(String),

    /// The side name is not recognized.
    #[error("unknown side: {0}")]
    UnknownSide(String),

    /// The seed method name is not recognized.
    #[error("unknown seed method: {0}")]
    UnknownMethod(String),

    /// The storage engine name is not recognized.
    #[error("unknown storage engine: {0}")]
    UnknownEngine(String),
}
