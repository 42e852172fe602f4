// SPDX-FileCopyrightText: 2025 Caspar Water Company
//
// SPDX-License-Identifier: Apache-2.0

//! The analytical warehouse as seen by ingestion

use std::fmt;
use std::str::FromStr;

use arrow::record_batch::RecordBatch;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::schema::ColumnSchema;
use crate::{Error, Result};

/// Fully qualified table name
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TableId {
    pub project: String,
    pub dataset: String,
    pub table: String,
}

impl TableId {
    pub fn new(
        project: impl Into<String>,
        dataset: impl Into<String>,
        table: impl Into<String>,
    ) -> Self {
        Self {
            project: project.into(),
            dataset: dataset.into(),
            table: table.into(),
        }
    }
}

impl fmt::Display for TableId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.project, self.dataset, self.table)
    }
}

impl FromStr for TableId {
    type Err = Error;

    /// Parses `project.dataset.table`
    fn from_str(s: &str) -> Result<Self> {
        let parts: Vec<&str> = s.split('.').collect();
        match parts.as_slice() {
            [project, dataset, table]
                if !project.is_empty() && !dataset.is_empty() && !table.is_empty() =>
            {
                Ok(Self::new(*project, *dataset, *table))
            }
            _ => Err(Error::Config(format!(
                "table id must be project.dataset.table: {s}"
            ))),
        }
    }
}

/// How a load treats existing rows
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum LoadMode {
    /// Drop existing rows and schema, write these
    Replace,
    /// Keep existing rows, add these; the schema must match
    Append,
}

impl fmt::Display for LoadMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LoadMode::Replace => f.write_str("REPLACE"),
            LoadMode::Append => f.write_str("APPEND"),
        }
    }
}

/// Outcome of a load as reported to the caller
///
/// A failed load is a value, not an error: the caller decides whether to
/// retry the whole run.
#[derive(Debug, Clone, Serialize)]
pub struct LoadReport {
    pub table: TableId,
    pub mode: LoadMode,
    pub succeeded: bool,
    pub rows: usize,
    pub schema: Option<ColumnSchema>,
    pub message: String,
}

impl LoadReport {
    pub fn success(table: TableId, mode: LoadMode, rows: usize, schema: ColumnSchema) -> Self {
        let message = format!("Loaded {rows} rows into {table} ({mode})");
        Self {
            table,
            mode,
            succeeded: true,
            rows,
            schema: Some(schema),
            message,
        }
    }

    pub fn failure(table: TableId, mode: LoadMode, error: &Error) -> Self {
        let message = format!("Failed to load {table} ({mode}): {error}");
        Self {
            table,
            mode,
            succeeded: false,
            rows: 0,
            schema: None,
            message,
        }
    }
}

/// Warehouse client boundary
///
/// Loads take a batch plus the explicit schema it conforms to. Writes are
/// never retried here.
#[async_trait]
pub trait Warehouse: Send + Sync {
    async fn load(
        &self,
        table: &TableId,
        batch: &RecordBatch,
        schema: &ColumnSchema,
        mode: LoadMode,
    ) -> Result<()>;

    /// `Ok(None)` when the table does not exist
    async fn get_schema(&self, table: &TableId) -> Result<Option<ColumnSchema>>;

    async fn execute_query(&self, sql: &str) -> Result<RecordBatch>;

    /// Release client resources; safe to call more than once.
    async fn close(&self) -> Result<()> {
        Ok(())
    }
}
