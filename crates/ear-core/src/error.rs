//! Error types for EAR

use thiserror::Error;

/// Core error type
#[derive(Error, Debug)]
pub enum EarError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("No control values found in {0}")]
    EmptyControlFile(String),

    #[error("Invalid parameter: {0}")]
    InvalidParam(String),
}

/// Result type alias
pub type EarResult<T> = Result<T, EarError>;
