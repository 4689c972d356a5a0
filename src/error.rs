// 🚨 Errors - typed failures for the store and the import run
//
// Only configuration-phase errors ever reach the binary. Everything that
// happens per row or per chunk is recorded as an outcome instead.

use std::path::PathBuf;
use thiserror::Error;

/// Errors raised by a [`Store`](crate::store::Store) implementation.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("store rejected request ({status}): {message}")]
    Rejected { status: u16, message: String },

    #[error("invalid identifier `{0}`")]
    InvalidIdentifier(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Top-level error for an import run.
#[derive(Error, Debug)]
pub enum ImportError {
    #[error("configuration error: {message}")]
    Config { message: String },

    #[error("input file not found: {}", path.display())]
    InputNotFound { path: PathBuf },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("parse error: {message}")]
    Parse { message: String },

    #[error("profile error: {message}")]
    Profile { message: String },

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl ImportError {
    pub fn config(message: impl Into<String>) -> Self {
        ImportError::Config {
            message: message.into(),
        }
    }

    pub fn profile(message: impl Into<String>) -> Self {
        ImportError::Profile {
            message: message.into(),
        }
    }
}

impl From<csv::Error> for ImportError {
    fn from(err: csv::Error) -> Self {
        ImportError::Parse {
            message: err.to_string(),
        }
    }
}

impl From<serde_json::Error> for ImportError {
    fn from(err: serde_json::Error) -> Self {
        ImportError::Parse {
            message: err.to_string(),
        }
    }
}

impl From<toml::de::Error> for ImportError {
    fn from(err: toml::de::Error) -> Self {
        ImportError::Profile {
            message: err.to_string(),
        }
    }
}

pub type Result<T, E = ImportError> = std::result::Result<T, E>;
