// SPDX-FileCopyrightText: 2025 Caspar Water Company
//
// SPDX-License-Identifier: Apache-2.0

//! End-to-end ingestion: discover, select, read, type, load
//!
//! Everything runs sequentially on the caller's task. Loads are attempted
//! once; only [`Pipeline::close`] retries.

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use arrow_array::{RecordBatch, UInt32Array};
use arrow_select::take::take_record_batch;
use backon::{ExponentialBuilder, Retryable};
use diagnostics::*;
use object_store::ObjectStore;

use crate::align::SchemaAligner;
use crate::cache::QueryCache;
use crate::config::IngestConfig;
use crate::discovery::discover_parquet_files;
use crate::inference::TypeInference;
use crate::reader::{DegradingReader, fetch_sources};
use crate::recency::{CandidateFile, select_most_recent};
use crate::schema::{ColumnKind, ColumnSchema, sanitize_column_name};
use crate::values;
use crate::warehouse::{LoadMode, LoadReport, TableId, Warehouse};
use crate::{Error, Result};

/// Offending values logged per FLOAT column after a failed load
pub const SUSPECT_SAMPLE: usize = 5;

/// Rows read for a category, with where they came from
#[derive(Debug, Clone)]
pub struct TreatedData {
    pub batch: RecordBatch,
    /// Files that were handed to the reader
    pub files: Vec<CandidateFile>,
    /// Read strategy that succeeded
    pub strategy: &'static str,
    /// Rows removed by de-duplication
    pub duplicates_removed: usize,
}

pub struct Pipeline {
    config: IngestConfig,
    store: Arc<dyn ObjectStore>,
    warehouse: Arc<dyn Warehouse>,
    reader: DegradingReader,
    inference: TypeInference,
    aligner: SchemaAligner,
    cache: Arc<QueryCache>,
}

impl Pipeline {
    pub fn new(
        config: IngestConfig,
        store: Arc<dyn ObjectStore>,
        warehouse: Arc<dyn Warehouse>,
    ) -> Self {
        let reader = DegradingReader::from_config(&config.reader);
        let inference = TypeInference::new(config.inference.clone());
        let aligner = SchemaAligner::new(&config.alignment, &config.inference);
        Self {
            config,
            store,
            warehouse,
            reader,
            inference,
            aligner,
            cache: Arc::new(QueryCache::new()),
        }
    }

    /// Share a query cache with other components
    pub fn with_cache(mut self, cache: Arc<QueryCache>) -> Self {
        self.cache = cache;
        self
    }

    pub fn config(&self) -> &IngestConfig {
        &self.config
    }

    pub fn cache(&self) -> &Arc<QueryCache> {
        &self.cache
    }

    /// `project.dataset.table` for a bare table name in the configured dataset
    pub fn table_id(&self, table: &str) -> TableId {
        TableId::new(
            self.config.warehouse.project.clone(),
            self.config.warehouse.dataset.clone(),
            table,
        )
    }

    /// Discover the category's files and apply the configured selection.
    ///
    /// A `max_files` cap always goes through recency selection, so the
    /// newest exports are the ones kept.
    pub async fn select_files(&self, category: &str) -> Vec<CandidateFile> {
        let discovered = discover_parquet_files(
            self.store.as_ref(),
            &self.config.storage.base_path,
            category,
            &self.config.discovery.treated_suffix,
        )
        .await;

        let selection = &self.config.selection;
        let capped = selection.max_files.is_some_and(|m| m > 0);
        if selection.only_recent || capped {
            select_most_recent(&discovered, selection.max_files)
        } else {
            discovered
        }
    }

    /// Read the newest treated export of `category`.
    ///
    /// `Ok(None)` means no parquet files exist for the category. An error
    /// means files were found but no read strategy could decode them.
    pub async fn load_treated_data(&self, category: &str) -> Result<Option<TreatedData>> {
        let files = self.select_files(category).await;
        if files.is_empty() {
            info!("No data for category {category}", category);
            return Ok(None);
        }

        let sources = fetch_sources(self.store.as_ref(), &files).await;
        let outcome = self.reader.read(&sources)?;

        let (batch, duplicates_removed) = match &self.config.dedupe_column {
            Some(column) => dedupe_first(&outcome.batch, column)?,
            None => (outcome.batch, 0),
        };
        info!(
            "Loaded {rows} rows for {category} ({removed} duplicates removed)",
            rows: batch.num_rows(),
            category,
            removed: duplicates_removed
        );
        Ok(Some(TreatedData {
            batch,
            files,
            strategy: outcome.strategy,
            duplicates_removed,
        }))
    }

    async fn replace(&self, batch: &RecordBatch, table: &TableId) -> Result<LoadReport> {
        let inferred = self.inference.infer(batch)?;
        if let Err(e) = self
            .warehouse
            .load(table, &inferred.batch, &inferred.schema, LoadMode::Replace)
            .await
        {
            self.log_float_suspects(batch, &inferred.schema);
            return Err(e);
        }
        Ok(LoadReport::success(
            table.clone(),
            LoadMode::Replace,
            inferred.batch.num_rows(),
            inferred.schema,
        ))
    }

    async fn append(&self, batch: &RecordBatch, table: &TableId) -> Result<LoadReport> {
        let (typed, schema) = match self.warehouse.get_schema(table).await? {
            Some(existing) => {
                debug!("Aligning to persisted schema of {table}", table: table.to_string());
                let aligned = self.aligner.align(batch, &existing)?;
                (aligned.batch, aligned.schema)
            }
            None => {
                info!("{table} does not exist yet, inferring its schema", table: table.to_string());
                let inferred = self.inference.infer(batch)?;
                (inferred.batch, inferred.schema)
            }
        };
        self.warehouse
            .load(table, &typed, &schema, LoadMode::Append)
            .await?;
        Ok(LoadReport::success(
            table.clone(),
            LoadMode::Append,
            typed.num_rows(),
            schema,
        ))
    }

    /// Point at FLOAT columns whose source values carry letters.
    fn log_float_suspects(&self, batch: &RecordBatch, schema: &ColumnSchema) {
        let markers = &self.config.inference.currency_markers;
        match float_suspects(batch, schema, markers) {
            Ok(suspects) if suspects.is_empty() => {}
            Ok(suspects) => {
                let columns: Vec<&str> = suspects.iter().map(|(c, _)| c.as_str()).collect();
                error!(
                    "Potentially problematic FLOAT columns: {columns}",
                    columns: columns.join(", ")
                );
                for (column, values) in &suspects {
                    error!(
                        "Column {column} has problematic values: {values}",
                        column: column.as_str(),
                        values: values.join(" | ")
                    );
                }
            }
            Err(e) => error!("Could not sample FLOAT columns: {error}", error: e.to_string()),
        }
    }

    fn report(table: &TableId, mode: LoadMode, result: Result<LoadReport>) -> LoadReport {
        match result {
            Ok(report) => {
                info!("{message}", message: report.message.as_str());
                report
            }
            Err(e) => {
                let report = LoadReport::failure(table.clone(), mode, &e);
                error!("{message}", message: report.message.as_str());
                report
            }
        }
    }

    /// Replace `table` with `batch`, typed by full inference.
    pub async fn load_table(&self, batch: &RecordBatch, table: &TableId) -> LoadReport {
        Self::report(table, LoadMode::Replace, self.replace(batch, table).await)
    }

    /// Append `batch` to `table`, keeping the persisted column kinds.
    ///
    /// A table that does not exist yet is created from inference.
    pub async fn load_incremental(&self, batch: &RecordBatch, table: &TableId) -> LoadReport {
        Self::report(table, LoadMode::Append, self.append(batch, table).await)
    }

    /// Load several categories, each into its own table of the configured dataset.
    ///
    /// Results are keyed by table name. A category with no data or no
    /// readable files gets a failed report; the remaining mappings still run.
    pub async fn load_all<C, T>(
        &self,
        mappings: &[(C, T)],
        mode: LoadMode,
    ) -> BTreeMap<String, LoadReport>
    where
        C: AsRef<str>,
        T: AsRef<str>,
    {
        let mut reports = BTreeMap::new();
        for (category, table) in mappings {
            let (category, table) = (category.as_ref(), table.as_ref());
            let id = self.table_id(table);
            let report = match self.load_treated_data(category).await {
                Ok(Some(data)) => match mode {
                    LoadMode::Replace => self.load_table(&data.batch, &id).await,
                    LoadMode::Append => self.load_incremental(&data.batch, &id).await,
                },
                Ok(None) => {
                    warn!("No source files for {category}, skipping {table}", category, table);
                    LoadReport::failure(id, mode, &Error::NoFiles)
                }
                Err(e) => {
                    error!("Could not read {category}: {error}", category, error: e.to_string());
                    LoadReport::failure(id, mode, &e)
                }
            };
            reports.insert(table.to_string(), report);
        }

        let loaded = reports.values().filter(|r| r.succeeded).count();
        info!(
            "Loaded {loaded} of {total} tables",
            loaded,
            total: reports.len()
        );
        reports
    }

    /// Run SQL through the query cache
    pub async fn query(&self, sql: &str) -> Result<RecordBatch> {
        self.cache.execute(self.warehouse.as_ref(), sql).await
    }

    /// Tear down the warehouse client, retrying with exponential backoff.
    pub async fn close(&self) -> Result<()> {
        (|| async { self.warehouse.close().await })
            .retry(
                ExponentialBuilder::default()
                    .with_min_delay(Duration::from_millis(50))
                    .with_max_times(3),
            )
            .sleep(tokio::time::sleep)
            .notify(|err: &Error, dur: Duration| {
                warn!(
                    "Warehouse close failed, retrying in {delay_ms}ms: {error}",
                    delay_ms: dur.as_millis() as u64,
                    error: err.to_string()
                );
            })
            .await
    }
}

/// Source values of FLOAT columns that contain letters, at most
/// [`SUSPECT_SAMPLE`] per column.
///
/// `batch` is the batch before inference; its column names are matched to
/// `schema` after sanitising. Currency markers are not counted as letters.
pub fn float_suspects(
    batch: &RecordBatch,
    schema: &ColumnSchema,
    currency_markers: &[String],
) -> Result<Vec<(String, Vec<String>)>> {
    let mut suspects = Vec::new();
    for (field, array) in batch.schema().fields().iter().zip(batch.columns()) {
        let name = sanitize_column_name(field.name());
        if schema.kind_of(&name) != Some(ColumnKind::Float) {
            continue;
        }
        let values: Vec<String> = values::normalized_cells(array.as_ref())?
            .into_iter()
            .flatten()
            .filter(|cell| {
                let stripped = currency_markers
                    .iter()
                    .fold(cell.clone(), |text, marker| text.replace(marker.as_str(), ""));
                stripped.chars().any(char::is_alphabetic)
            })
            .take(SUSPECT_SAMPLE)
            .collect();
        if !values.is_empty() {
            suspects.push((name, values));
        }
    }
    Ok(suspects)
}

/// Keep the first row for each distinct value of `column`.
///
/// Returns the batch unchanged when the column is absent.
pub fn dedupe_first(batch: &RecordBatch, column: &str) -> Result<(RecordBatch, usize)> {
    let Some(array) = batch.column_by_name(column) else {
        debug!("No {column} column, skipping de-duplication", column);
        return Ok((batch.clone(), 0));
    };
    let cells = values::render_cells(array)?;
    let mut seen = HashSet::with_capacity(cells.len());
    let keep: Vec<u32> = cells
        .into_iter()
        .enumerate()
        .filter(|(_, cell)| seen.insert(cell.clone()))
        .map(|(i, _)| i as u32)
        .collect();

    let removed = batch.num_rows() - keep.len();
    if removed == 0 {
        return Ok((batch.clone(), 0));
    }
    let deduped = take_record_batch(batch, &UInt32Array::from(keep))?;
    Ok((deduped, removed))
}
