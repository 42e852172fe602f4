// SPDX-FileCopyrightText: 2025 Caspar Water Company
//
// SPDX-License-Identifier: Apache-2.0

//! Degrading parquet reader
//!
//! Reads a set of parquet exports into one RecordBatch. Three strategies
//! are tried in decreasing order of fidelity and the first success wins:
//!
//! 1. [`UnifiedSchemaRead`]: one corrected schema taken from the first file
//! 2. [`PerFileRead`]: each file on its own schema, unreadable files skipped
//! 3. [`AllStringsRead`]: every column as text, numeric columns re-promoted
//!
//! Strategies are pure functions of the fetched bytes, so each tier can be
//! exercised on its own.

use std::collections::HashMap;
use std::sync::Arc;

use arrow::array::{Array, ArrayRef, StringArray, new_null_array};
use arrow_array::RecordBatch;
use arrow_cast::cast;
use arrow_schema::{DataType, Field, Schema, SchemaRef};
use arrow_select::concat::concat_batches;
use bytes::Bytes;
use diagnostics::*;
use object_store::ObjectStore;
use object_store::path::Path;
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;

use crate::config::ReaderConfig;
use crate::recency::CandidateFile;
use crate::values::{self, Number};
use crate::{Error, Result};

/// A file's bytes, or why they could not be fetched
#[derive(Debug, Clone)]
pub struct SourceFile {
    pub path: String,
    pub fetched: std::result::Result<Bytes, String>,
}

impl SourceFile {
    pub fn new(path: impl Into<String>, bytes: Bytes) -> Self {
        Self {
            path: path.into(),
            fetched: Ok(bytes),
        }
    }

    fn bytes(&self) -> Result<&Bytes> {
        self.fetched.as_ref().map_err(|message| Error::Fetch {
            path: self.path.clone(),
            message: message.clone(),
        })
    }

    /// Decode the whole file into one batch on its native schema
    fn read_native(&self) -> Result<RecordBatch> {
        let builder = ParquetRecordBatchReaderBuilder::try_new(self.bytes()?.clone())?;
        let schema = builder.schema().clone();
        let batches = builder.build()?.collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(concat_batches(&schema, &batches)?)
    }
}

/// Download every selected file, one at a time.
///
/// A failed download is recorded on the [`SourceFile`] rather than
/// returned, so the reader tiers decide what it means.
pub async fn fetch_sources(store: &dyn ObjectStore, files: &[CandidateFile]) -> Vec<SourceFile> {
    let mut sources = Vec::with_capacity(files.len());
    for file in files {
        let location = Path::from(file.path.as_str());
        let fetched = match store.get(&location).await {
            Ok(result) => result.bytes().await.map_err(|e| e.to_string()),
            Err(e) => Err(e.to_string()),
        };
        if let Err(message) = &fetched {
            warn!(
                "Could not fetch {path}: {message}",
                path: file.path.as_str(),
                message: message.as_str()
            );
        }
        sources.push(SourceFile {
            path: file.path.clone(),
            fetched,
        });
    }
    sources
}

/// One way of turning a set of files into a single batch
pub trait ReadStrategy: Send + Sync {
    fn name(&self) -> &'static str;

    fn read(&self, files: &[SourceFile]) -> Result<RecordBatch>;
}

fn is_integer(data_type: &DataType) -> bool {
    matches!(
        data_type,
        DataType::Int8
            | DataType::Int16
            | DataType::Int32
            | DataType::Int64
            | DataType::UInt8
            | DataType::UInt16
            | DataType::UInt32
    )
}

fn is_float(data_type: &DataType) -> bool {
    matches!(
        data_type,
        DataType::Float16 | DataType::Float32 | DataType::Float64
    )
}

/// Render a column as nullable Utf8, whatever its type
fn to_utf8(array: &dyn Array) -> Result<ArrayRef> {
    let cells = values::render_cells(array)?;
    Ok(Arc::new(StringArray::from(cells)))
}

/// Replace the types that break multi-file reads: untyped columns become
/// text and integer columns become nullable 64-bit.
fn safe_schema(schema: &Schema) -> SchemaRef {
    let fields = schema
        .fields()
        .iter()
        .map(|field| {
            let data_type = match field.data_type() {
                DataType::Null => DataType::Utf8,
                t if is_integer(t) => DataType::Int64,
                t => t.clone(),
            };
            Field::new(field.name(), data_type, true)
        })
        .collect::<Vec<_>>();
    Arc::new(Schema::new(fields))
}

/// Tier 1: all files against one corrected schema
#[derive(Debug, Default)]
pub struct UnifiedSchemaRead;

impl UnifiedSchemaRead {
    fn compatible(source: &DataType, target: &DataType) -> bool {
        source == target
            || *source == DataType::Null
            || (*target == DataType::Int64 && is_integer(source))
            || (*target == DataType::Float64 && is_float(source))
    }

    fn conform(batch: &RecordBatch, target: &SchemaRef) -> Result<RecordBatch> {
        let rows = batch.num_rows();
        let mut columns = Vec::with_capacity(target.fields().len());
        for field in target.fields() {
            let column = match batch.column_by_name(field.name()) {
                None => new_null_array(field.data_type(), rows),
                Some(array) => {
                    if !Self::compatible(array.data_type(), field.data_type()) {
                        return Err(Error::SchemaMismatch {
                            column: field.name().clone(),
                            expected: field.data_type().to_string(),
                            actual: array.data_type().to_string(),
                        });
                    }
                    cast(array, field.data_type())?
                }
            };
            columns.push(column);
        }
        Ok(RecordBatch::try_new(target.clone(), columns)?)
    }
}

impl ReadStrategy for UnifiedSchemaRead {
    fn name(&self) -> &'static str {
        "unified-schema"
    }

    fn read(&self, files: &[SourceFile]) -> Result<RecordBatch> {
        let first = files.first().ok_or(Error::NoFiles)?;
        let target = {
            let builder = ParquetRecordBatchReaderBuilder::try_new(first.bytes()?.clone())?;
            safe_schema(builder.schema())
        };

        let mut batches = Vec::with_capacity(files.len());
        for file in files {
            batches.push(Self::conform(&file.read_native()?, &target)?);
        }
        Ok(concat_batches(&target, &batches)?)
    }
}

/// Tier 2: each file on its own schema, concatenated by column name
#[derive(Debug, Default)]
pub struct PerFileRead;

impl PerFileRead {
    /// Common type for a column seen with two different types
    fn unify(a: &DataType, b: &DataType) -> DataType {
        match (a, b) {
            _ if a == b => a.clone(),
            (DataType::Null, t) | (t, DataType::Null) => t.clone(),
            _ if is_integer(a) && is_integer(b) => DataType::Int64,
            _ if (is_integer(a) || is_float(a)) && (is_integer(b) || is_float(b)) => {
                DataType::Float64
            }
            _ => DataType::Utf8,
        }
    }

    fn unified_schema(batches: &[RecordBatch]) -> SchemaRef {
        let mut order: Vec<String> = Vec::new();
        let mut types: HashMap<String, DataType> = HashMap::new();
        for batch in batches {
            for field in batch.schema().fields() {
                match types.get_mut(field.name()) {
                    Some(existing) => *existing = Self::unify(existing, field.data_type()),
                    None => {
                        order.push(field.name().clone());
                        types.insert(field.name().clone(), field.data_type().clone());
                    }
                }
            }
        }
        let fields = order
            .iter()
            .map(|name| {
                let data_type = types.get(name).cloned().unwrap_or(DataType::Utf8);
                Field::new(name, data_type, true)
            })
            .collect::<Vec<_>>();
        Arc::new(Schema::new(fields))
    }

    fn conform(batch: &RecordBatch, target: &SchemaRef) -> Result<RecordBatch> {
        let rows = batch.num_rows();
        let columns = target
            .fields()
            .iter()
            .map(|field| match batch.column_by_name(field.name()) {
                None => Ok(new_null_array(field.data_type(), rows)),
                Some(array) if array.data_type() == field.data_type() => Ok(array.clone()),
                Some(array) if *field.data_type() == DataType::Utf8 => to_utf8(array),
                Some(array) => Ok(cast(array, field.data_type())?),
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(RecordBatch::try_new(target.clone(), columns)?)
    }
}

impl ReadStrategy for PerFileRead {
    fn name(&self) -> &'static str {
        "per-file"
    }

    fn read(&self, files: &[SourceFile]) -> Result<RecordBatch> {
        if files.is_empty() {
            return Err(Error::NoFiles);
        }
        let mut batches = Vec::with_capacity(files.len());
        for file in files {
            match file.read_native() {
                Ok(batch) => batches.push(batch),
                Err(e) => warn!(
                    "Skipping unreadable file {path}: {error}",
                    path: file.path.as_str(),
                    error: e.to_string()
                ),
            }
        }
        if batches.is_empty() {
            return Err(Error::NoReadableFiles { files: files.len() });
        }
        if batches.len() < files.len() {
            info!(
                "Read {ok} of {total} files",
                ok: batches.len(),
                total: files.len()
            );
        }

        let target = Self::unified_schema(&batches);
        let conformed = batches
            .iter()
            .map(|batch| Self::conform(batch, &target))
            .collect::<Result<Vec<_>>>()?;
        Ok(concat_batches(&target, &conformed)?)
    }
}

/// Tier 3: every column as text, then numeric columns re-promoted
#[derive(Debug)]
pub struct AllStringsRead {
    /// How many non-null values are inspected per column
    pub sample_size: usize,
    /// Share of the sample that must parse for a column to become numeric
    pub threshold: f64,
}

impl Default for AllStringsRead {
    fn default() -> Self {
        Self {
            sample_size: 100,
            threshold: 0.8,
        }
    }
}

impl AllStringsRead {
    /// Re-type a text column as Int64 or Float64 when enough of its sample parses
    fn promote(&self, name: &str, array: &StringArray) -> ArrayRef {
        let sample: Vec<&str> = array
            .iter()
            .flatten()
            .take(self.sample_size)
            .collect();
        if sample.is_empty() {
            return Arc::new(array.clone());
        }
        let parsed = sample
            .iter()
            .filter(|v| values::parse_plain_number(v).is_some())
            .count();
        if (parsed as f64) / (sample.len() as f64) < self.threshold {
            return Arc::new(array.clone());
        }

        let numbers: Vec<Option<Number>> = array
            .iter()
            .map(|v| v.and_then(values::parse_plain_number))
            .collect();
        if numbers.iter().flatten().all(|n| n.as_whole().is_some()) {
            debug!("Promoted text column {name} to Int64", name);
            values::int64_array(
                numbers
                    .iter()
                    .map(|n| n.and_then(|n| n.as_whole()))
                    .collect(),
            )
        } else {
            debug!("Promoted text column {name} to Float64", name);
            values::float64_array(numbers.iter().map(|n| n.map(|n| n.as_f64())).collect())
        }
    }
}

impl ReadStrategy for AllStringsRead {
    fn name(&self) -> &'static str {
        "all-strings"
    }

    fn read(&self, files: &[SourceFile]) -> Result<RecordBatch> {
        let batches = files
            .iter()
            .map(SourceFile::read_native)
            .collect::<Result<Vec<_>>>()?;
        let first = batches.first().ok_or(Error::NoFiles)?;

        let names: Vec<String> = first
            .schema()
            .fields()
            .iter()
            .map(|f| f.name().clone())
            .collect();
        let text_schema = Arc::new(Schema::new(
            names
                .iter()
                .map(|n| Field::new(n, DataType::Utf8, true))
                .collect::<Vec<_>>(),
        ));

        let mut text_batches = Vec::with_capacity(batches.len());
        for batch in &batches {
            let columns = names
                .iter()
                .map(|name| match batch.column_by_name(name) {
                    Some(array) => to_utf8(array),
                    None => Ok(new_null_array(&DataType::Utf8, batch.num_rows())),
                })
                .collect::<Result<Vec<_>>>()?;
            text_batches.push(RecordBatch::try_new(text_schema.clone(), columns)?);
        }
        let text = concat_batches(&text_schema, &text_batches)?;

        let mut fields = Vec::with_capacity(names.len());
        let mut columns = Vec::with_capacity(names.len());
        for (name, column) in names.iter().zip(text.columns()) {
            let promoted = match column.as_any().downcast_ref::<StringArray>() {
                Some(strings) => self.promote(name, strings),
                None => column.clone(),
            };
            fields.push(Field::new(name, promoted.data_type().clone(), true));
            columns.push(promoted);
        }
        Ok(RecordBatch::try_new(
            Arc::new(Schema::new(fields)),
            columns,
        )?)
    }
}

/// Result of a successful degrading read
#[derive(Debug, Clone)]
pub struct ReadOutcome {
    pub batch: RecordBatch,
    /// Name of the strategy that produced the batch
    pub strategy: &'static str,
}

/// Ordered list of strategies, tried until one succeeds
pub struct DegradingReader {
    strategies: Vec<Box<dyn ReadStrategy>>,
}

impl DegradingReader {
    pub fn new(strategies: Vec<Box<dyn ReadStrategy>>) -> Self {
        Self { strategies }
    }

    /// The three standard tiers
    pub fn from_config(config: &ReaderConfig) -> Self {
        Self::new(vec![
            Box::new(UnifiedSchemaRead),
            Box::new(PerFileRead),
            Box::new(AllStringsRead {
                sample_size: config.promotion_sample_size,
                threshold: config.promotion_threshold,
            }),
        ])
    }

    pub fn strategy_names(&self) -> Vec<&'static str> {
        self.strategies.iter().map(|s| s.name()).collect()
    }

    /// Try each strategy in order.
    ///
    /// Fails with [`Error::ReadExhausted`] only when every strategy failed;
    /// no partial result is ever returned.
    pub fn read(&self, files: &[SourceFile]) -> Result<ReadOutcome> {
        if files.is_empty() {
            return Err(Error::NoFiles);
        }

        let mut attempts = Vec::with_capacity(self.strategies.len());
        for strategy in &self.strategies {
            match strategy.read(files) {
                Ok(batch) => {
                    info!(
                        "Read {rows} rows from {files} files with {strategy}",
                        rows: batch.num_rows(),
                        files: files.len(),
                        strategy: strategy.name()
                    );
                    return Ok(ReadOutcome {
                        batch,
                        strategy: strategy.name(),
                    });
                }
                Err(e) => {
                    warn!(
                        "Read strategy {strategy} failed: {error}",
                        strategy: strategy.name(),
                        error: e.to_string()
                    );
                    attempts.push(format!("{}: {}", strategy.name(), e));
                }
            }
        }

        error!(
            "All read strategies failed for {files} files",
            files: files.len()
        );
        Err(Error::ReadExhausted {
            files: files.len(),
            attempts,
        })
    }
}

impl Default for DegradingReader {
    fn default() -> Self {
        Self::from_config(&ReaderConfig::default())
    }
}
