//! Error types for forwardcheck

use thiserror::Error;

/// Main error type for configuration and setup
#[derive(Error, Debug)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Duplicate address in report: {0}")]
    DuplicateAddress(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Result type alias for forwardcheck
pub type Result<T> = std::result::Result<T, Error>;

impl From<config::ConfigError> for Error {
    fn from(err: config::ConfigError) -> Self {
        Error::Config(err.to_string())
    }
}

impl Error {
    /// Returns the error code string
    pub fn code(&self) -> &'static str {
        match self {
            Error::Config(_) => "CONFIG_ERROR",
            Error::Validation(_) => "VALIDATION_ERROR",
            Error::DuplicateAddress(_) => "DUPLICATE_ADDRESS",
            Error::Other(_) => "INTERNAL_ERROR",
        }
    }
}
