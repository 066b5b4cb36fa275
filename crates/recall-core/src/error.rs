//! Error types for Recall core.

use thiserror::Error;

/// Result type alias using the core error.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors raised by configuration and type-level concerns.
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),
}
