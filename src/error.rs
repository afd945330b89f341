//! Error types for the exchange engine.
//!
//! Row-level import failures are not errors: they are collected as
//! [`crate::import::RowError`] entries and the batch keeps going. Everything
//! here is fatal to the operation that returns it.

use thiserror::Error;
use uuid::Uuid;

/// Errors raised by the persistence layer (record store and template store).
#[derive(Debug, Error)]
pub enum StoreError {
    /// No entry with this id.
    #[error("entry not found: {id}")]
    NotFound { id: String },

    /// Optimistic version check failed: somebody saved the template first.
    #[error("template {id} was modified concurrently (expected version {expected}, found {found})")]
    Conflict { id: Uuid, expected: u32, found: u32 },

    /// The backend refused a structurally valid record (uniqueness, etc.).
    #[error("{0}")]
    Rejected(String),

    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    /// A shared handle was poisoned by a panicking holder.
    #[error("store lock poisoned")]
    Lock,
}

/// Errors raised by the import/export pipelines and their surroundings.
#[derive(Debug, Error)]
pub enum ExchangeError {
    /// Input bytes are not valid UTF-8.
    #[error("file is not valid UTF-8 text: {0}")]
    Decode(#[from] std::str::Utf8Error),

    #[error("unknown import shape: {0}")]
    UnknownShape(String),

    #[error("invalid template: {0}")]
    InvalidTemplate(String),

    /// A full export matched no rows; no artifact is produced.
    #[error("no data matches the selected filters")]
    NothingToExport,

    #[error("csv error: {0}")]
    Csv(#[from] csv::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("configuration error: {0}")]
    Config(String),
}

pub type Result<T, E = ExchangeError> = std::result::Result<T, E>;
