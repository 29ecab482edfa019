//! ft - durable identities for the scenarios in plain-text feature files.
//!
//! This library provides the core functionality for the `ft` CLI tool:
//! parsing feature files, reconciling their scenarios against the SQLite
//! store, writing `@id:<n>` tags back into the files, and linking scenario
//! identities to the test functions that reference them.

pub mod cli;
pub mod commands;
pub mod config;
pub mod models;
pub mod parser;
pub mod storage;
pub mod sync;

use std::path::PathBuf;


/// Library-level error type for ft operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{}: {source}", path.display())]
    FileOp {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Config error: {0}")]
    Config(String),

    #[error("Not initialized: run `ft init` first")]
    NotInitialized,

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid scenario ID: {0}")]
    InvalidId(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Wrap an I/O error with the path it happened on.
    pub fn file_op(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Error::FileOp {
            path: path.into(),
            source,
        }
    }
}

/// Result type alias for ft operations.
pub type Result<T> = std::result::Result<T, Error>;
