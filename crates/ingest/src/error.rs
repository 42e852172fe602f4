// SPDX-FileCopyrightText: 2025 Caspar Water Company
//
// SPDX-License-Identifier: Apache-2.0

//! Error types for ingestion

use thiserror::Error;

use crate::schema::ColumnKind;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Arrow error: {0}")]
    Arrow(#[from] arrow::error::ArrowError),

    #[error("Parquet error: {0}")]
    Parquet(#[from] parquet::errors::ParquetError),

    #[error("Object store error: {0}")]
    ObjectStore(#[from] object_store::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml_ng::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("No files to read")]
    NoFiles,

    #[error("Failed to fetch {path}: {message}")]
    Fetch { path: String, message: String },

    #[error("None of {files} file(s) could be read")]
    NoReadableFiles { files: usize },

    /// Every read tier failed; one line per attempted tier.
    #[error("All read strategies failed for {files} file(s):\n{}", .attempts.join("\n"))]
    ReadExhausted { files: usize, attempts: Vec<String> },

    #[error("Column {column}: expected {expected}, found {actual}")]
    SchemaMismatch {
        column: String,
        expected: String,
        actual: String,
    },

    #[error("Column {column}: value {value:?} cannot be stored as {kind}")]
    Coercion {
        column: String,
        value: String,
        kind: ColumnKind,
    },

    #[error("Columns not present in the persisted schema: {}", .columns.join(", "))]
    UnknownColumns { columns: Vec<String> },

    #[error("Mutex poisoned: {0}")]
    MutexPoisoned(String),

    #[error("Warehouse error: {0}")]
    Warehouse(String),
}

/// Result type for ingestion operations
pub type Result<T> = std::result::Result<T, Error>;
