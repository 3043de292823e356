//! Common error types for voxline

use thiserror::Error;

/// Common result type for voxline operations
pub type Result<T> = std::result::Result<T, Error>;

/// Common error types across voxline crates
#[derive(Error, Debug)]
pub enum Error {
    /// I/O operation error (wraps std::io::Error)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration loading or validation error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Configuration file is not valid TOML
    #[error("Failed to parse {path}: {source}")]
    TomlParse {
        path: String,
        #[source]
        source: toml::de::Error,
    },
}
