//! Logger error types

use std::path::PathBuf;
use thiserror::Error;

/// Errors loading or saving logger configuration
#[derive(Error, Debug)]
pub enum LoggerError {
    #[error("Failed to read {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse logger config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Failed to serialize logger config: {0}")]
    Serialize(#[from] toml::ser::Error),
}

pub type Result<T> = std::result::Result<T, LoggerError>;
