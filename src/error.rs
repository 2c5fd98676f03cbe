//! Error types for the proxima framework

use thiserror::Error;

/// Main error type for the proxima framework
#[derive(Error, Debug, Clone)]
pub enum ProximaError {
    /// Shape-related errors
    #[error("Shape error: {0}")]
    ShapeError(String),

    /// Invalid input data
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Numerical computation errors
    #[error("Computation error: {0}")]
    ComputationError(String),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    ConfigurationError(String),

    /// Serialization errors
    #[error("Serialization error: {0}")]
    SerializationError(String),
}

impl From<serde_json::Error> for ProximaError {
    fn from(err: serde_json::Error) -> Self {
        ProximaError::SerializationError(err.to_string())
    }
}

/// Result type alias used throughout the crate
pub type ProximaResult<T> = Result<T, ProximaError>;
