// SPDX-FileCopyrightText: 2025 Caspar Water Company
//
// SPDX-License-Identifier: Apache-2.0

//! File-backed warehouse for local runs
//!
//! Layout under the root directory:
//!
//! ```text
//! <root>/<dataset>/<table>/_schema.json
//! <root>/<dataset>/<table>/part-00000.parquet
//! <root>/<dataset>/<table>/part-00001.parquet   (one per append)
//! ```
//!
//! SQL runs through DataFusion with every dataset registered as a schema,
//! so tables are addressed as `dataset.table`.

use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use arrow::compute::concat_batches;
use arrow::record_batch::RecordBatch;
use async_trait::async_trait;
use datafusion::catalog::MemorySchemaProvider;
use datafusion::prelude::{ParquetReadOptions, SessionContext};
use diagnostics::*;
use ingest::config::WarehouseConfig;
use ingest::{ColumnSchema, Error, LoadMode, Result, TableId, Warehouse};
use parquet::arrow::ArrowWriter;

const SCHEMA_FILE: &str = "_schema.json";

pub struct LocalWarehouse {
    root: PathBuf,
    project: String,
}

impl LocalWarehouse {
    pub fn new(root: impl Into<PathBuf>, project: impl Into<String>) -> Self {
        Self {
            root: root.into(),
            project: project.into(),
        }
    }

    pub fn from_config(config: &WarehouseConfig) -> Self {
        Self::new(&config.root, &config.project)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn table_dir(&self, table: &TableId) -> Result<PathBuf> {
        if table.project != self.project {
            return Err(Error::Warehouse(format!(
                "project {} is not served by this warehouse ({})",
                table.project, self.project
            )));
        }
        Ok(self.root.join(&table.dataset).join(&table.table))
    }

    fn read_schema(dir: &Path) -> Result<Option<ColumnSchema>> {
        let path = dir.join(SCHEMA_FILE);
        if !path.exists() {
            return Ok(None);
        }
        let content = std::fs::read_to_string(&path)?;
        Ok(Some(serde_json::from_str(&content)?))
    }

    fn write_schema(dir: &Path, schema: &ColumnSchema) -> Result<()> {
        let content = serde_json::to_string_pretty(schema)?;
        std::fs::write(dir.join(SCHEMA_FILE), content)?;
        Ok(())
    }

    fn part_count(dir: &Path) -> Result<usize> {
        let mut count = 0;
        for entry in std::fs::read_dir(dir)? {
            let name = entry?.file_name();
            let name = name.to_string_lossy();
            if name.starts_with("part-") && name.ends_with(".parquet") {
                count += 1;
            }
        }
        Ok(count)
    }

    fn write_part(dir: &Path, index: usize, batch: &RecordBatch) -> Result<PathBuf> {
        let path = dir.join(format!("part-{index:05}.parquet"));
        let file = File::create(&path)?;
        let mut writer = ArrowWriter::try_new(file, batch.schema(), None)?;
        writer.write(batch)?;
        let _ = writer.close()?;
        Ok(path)
    }

    /// `(dataset, table, dir)` for every table with a schema file
    fn tables(&self) -> Result<Vec<(String, String, PathBuf)>> {
        let mut tables = Vec::new();
        if !self.root.exists() {
            return Ok(tables);
        }
        for dataset in std::fs::read_dir(&self.root)? {
            let dataset = dataset?;
            if !dataset.file_type()?.is_dir() {
                continue;
            }
            for table in std::fs::read_dir(dataset.path())? {
                let table = table?;
                let dir = table.path();
                if dir.join(SCHEMA_FILE).exists() {
                    tables.push((
                        dataset.file_name().to_string_lossy().to_string(),
                        table.file_name().to_string_lossy().to_string(),
                        dir,
                    ));
                }
            }
        }
        tables.sort();
        Ok(tables)
    }

    async fn session(&self) -> Result<SessionContext> {
        let ctx = SessionContext::new();
        let catalog = ctx
            .catalog("datafusion")
            .ok_or_else(|| Error::Warehouse("default catalog missing".to_string()))?;

        for (dataset, table, dir) in self.tables()? {
            if catalog.schema(&dataset).is_none() {
                catalog
                    .register_schema(&dataset, Arc::new(MemorySchemaProvider::new()))
                    .map_err(|e| Error::Warehouse(e.to_string()))?;
            }
            if Self::part_count(&dir)? == 0 {
                continue;
            }
            let location = format!("{}/", dir.display());
            ctx.register_parquet(
                format!("{dataset}.{table}"),
                &location,
                ParquetReadOptions::default(),
            )
            .await
            .map_err(|e| Error::Warehouse(e.to_string()))?;
            debug!("Registered {dataset}.{table}", dataset: dataset.as_str(), table: table.as_str());
        }
        Ok(ctx)
    }
}

#[async_trait]
impl Warehouse for LocalWarehouse {
    async fn load(
        &self,
        table: &TableId,
        batch: &RecordBatch,
        schema: &ColumnSchema,
        mode: LoadMode,
    ) -> Result<()> {
        schema.validate_batch(batch)?;
        let dir = self.table_dir(table)?;

        let index = match mode {
            LoadMode::Replace => {
                if dir.exists() {
                    std::fs::remove_dir_all(&dir)?;
                }
                std::fs::create_dir_all(&dir)?;
                Self::write_schema(&dir, schema)?;
                0
            }
            LoadMode::Append => match Self::read_schema(&dir)? {
                Some(existing) if existing != *schema => {
                    return Err(Error::Warehouse(format!(
                        "{table} has schema [{existing}], append carries [{schema}]"
                    )));
                }
                Some(_) => Self::part_count(&dir)?,
                None => {
                    std::fs::create_dir_all(&dir)?;
                    Self::write_schema(&dir, schema)?;
                    0
                }
            },
        };

        let path = Self::write_part(&dir, index, batch)?;
        debug!(
            "Wrote {rows} rows to {path}",
            rows: batch.num_rows(),
            path: path.display().to_string()
        );
        Ok(())
    }

    async fn get_schema(&self, table: &TableId) -> Result<Option<ColumnSchema>> {
        Self::read_schema(&self.table_dir(table)?)
    }

    async fn execute_query(&self, sql: &str) -> Result<RecordBatch> {
        let ctx = self.session().await?;
        let df = ctx
            .sql(sql)
            .await
            .map_err(|e| Error::Warehouse(format!("Failed to plan query: {e}")))?;
        let planned = df.schema().inner().clone();
        let batches = df
            .collect()
            .await
            .map_err(|e| Error::Warehouse(format!("Failed to execute query: {e}")))?;
        let schema = batches.first().map(|b| b.schema()).unwrap_or(planned);
        Ok(concat_batches(&schema, &batches)?)
    }
}
