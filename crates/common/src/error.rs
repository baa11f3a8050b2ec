//! Common error types

use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("Monitor error: {0}")]
    Monitor(String),

    #[error("Malformed event: {0}")]
    MalformedEvent(String),

    #[error("Failed to de-authorize {}: {source}", .path.display())]
    Enforcement {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Channel error: {0}")]
    Channel(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Other error: {0}")]
    Other(String),
}

pub type Result<T> = std::result::Result<T, Error>;
