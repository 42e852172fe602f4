// SPDX-FileCopyrightText: 2025 Caspar Water Company
//
// SPDX-License-Identifier: Apache-2.0

//! Warehouse column kinds, explicit column schemas and column-name sanitisation

use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use arrow_array::{RecordBatch, RecordBatchOptions};
use arrow_schema::{DataType, Field, Schema, SchemaRef, TimeUnit};
use diagnostics::*;
use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// The four column kinds the warehouse accepts from us
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ColumnKind {
    String,
    Integer,
    Float,
    Datetime,
}

impl ColumnKind {
    /// Arrow type a TypedTable column of this kind carries
    pub fn data_type(&self) -> DataType {
        match self {
            ColumnKind::String => DataType::Utf8,
            ColumnKind::Integer => DataType::Int64,
            ColumnKind::Float => DataType::Float64,
            ColumnKind::Datetime => DataType::Timestamp(TimeUnit::Microsecond, None),
        }
    }

    /// STRING columns never carry nulls; absent values are empty strings.
    pub fn is_nullable(&self) -> bool {
        !matches!(self, ColumnKind::String)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ColumnKind::String => "STRING",
            ColumnKind::Integer => "INTEGER",
            ColumnKind::Float => "FLOAT",
            ColumnKind::Datetime => "DATETIME",
        }
    }

    /// Reverse of [`ColumnKind::data_type`], used when reading back a persisted table
    pub fn from_data_type(data_type: &DataType) -> Option<Self> {
        match data_type {
            DataType::Utf8 | DataType::LargeUtf8 | DataType::Utf8View => Some(ColumnKind::String),
            DataType::Int64 => Some(ColumnKind::Integer),
            DataType::Float64 => Some(ColumnKind::Float),
            DataType::Timestamp(_, _) => Some(ColumnKind::Datetime),
            _ => None,
        }
    }
}

impl fmt::Display for ColumnKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ColumnKind {
    type Err = Error;

    /// Accepts the warehouse's legacy and standard SQL spellings.
    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_uppercase().as_str() {
            "STRING" => Ok(ColumnKind::String),
            "INTEGER" | "INT64" => Ok(ColumnKind::Integer),
            "FLOAT" | "FLOAT64" => Ok(ColumnKind::Float),
            "DATETIME" | "TIMESTAMP" => Ok(ColumnKind::Datetime),
            other => Err(Error::Config(format!("unknown column kind: {other}"))),
        }
    }
}

/// One named, typed column
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnSpec {
    pub name: String,
    pub kind: ColumnKind,
}

impl ColumnSpec {
    pub fn new(name: impl Into<String>, kind: ColumnKind) -> Self {
        Self {
            name: name.into(),
            kind,
        }
    }

    pub fn field(&self) -> Field {
        Field::new(&self.name, self.kind.data_type(), self.kind.is_nullable())
    }
}

/// Ordered column schema sent alongside every load
///
/// Column order matches the table it describes. Once persisted, later
/// appends are aligned to it rather than re-inferred.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ColumnSchema {
    columns: Vec<ColumnSpec>,
}

impl ColumnSchema {
    pub fn new(columns: Vec<ColumnSpec>) -> Self {
        Self { columns }
    }

    pub fn columns(&self) -> &[ColumnSpec] {
        &self.columns
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    pub fn get(&self, name: &str) -> Option<&ColumnSpec> {
        self.columns.iter().find(|c| c.name == name)
    }

    pub fn kind_of(&self, name: &str) -> Option<ColumnKind> {
        self.get(name).map(|c| c.kind)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.columns.iter().map(|c| c.name.as_str())
    }

    pub fn push(&mut self, spec: ColumnSpec) {
        self.columns.push(spec);
    }

    pub fn to_arrow(&self) -> SchemaRef {
        Arc::new(Schema::new(
            self.columns.iter().map(|c| c.field()).collect::<Vec<_>>(),
        ))
    }

    /// Build a schema from an Arrow schema whose types are all warehouse kinds
    pub fn from_arrow(schema: &Schema) -> Result<Self> {
        let columns = schema
            .fields()
            .iter()
            .map(|field| {
                ColumnKind::from_data_type(field.data_type())
                    .map(|kind| ColumnSpec::new(field.name().clone(), kind))
                    .ok_or_else(|| Error::SchemaMismatch {
                        column: field.name().clone(),
                        expected: "STRING, INTEGER, FLOAT or DATETIME".to_string(),
                        actual: field.data_type().to_string(),
                    })
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { columns })
    }

    /// Check that a batch carries exactly these columns, in order, with these kinds
    pub fn validate_batch(&self, batch: &RecordBatch) -> Result<()> {
        let schema = batch.schema();
        if schema.fields().len() != self.columns.len() {
            return Err(Error::SchemaMismatch {
                column: "*".to_string(),
                expected: format!("{} columns", self.columns.len()),
                actual: format!("{} columns", schema.fields().len()),
            });
        }
        for (spec, field) in self.columns.iter().zip(schema.fields().iter()) {
            if spec.name != *field.name() {
                return Err(Error::SchemaMismatch {
                    column: spec.name.clone(),
                    expected: spec.name.clone(),
                    actual: field.name().clone(),
                });
            }
            if ColumnKind::from_data_type(field.data_type()) != Some(spec.kind) {
                return Err(Error::SchemaMismatch {
                    column: spec.name.clone(),
                    expected: spec.kind.to_string(),
                    actual: field.data_type().to_string(),
                });
            }
        }
        Ok(())
    }
}

impl fmt::Display for ColumnSchema {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, column) in self.columns.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{} {}", column.name, column.kind)?;
        }
        Ok(())
    }
}

/// Normalise a column name to `[0-9a-zA-Z_]`.
///
/// Trims whitespace, replaces every other character with `_`, collapses
/// runs of `_` and strips trailing `_`. Applying it twice is a no-op.
pub fn sanitize_column_name(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    for ch in name.trim().chars() {
        let ch = if ch.is_ascii_alphanumeric() || ch == '_' {
            ch
        } else {
            '_'
        };
        if ch == '_' && out.ends_with('_') {
            continue;
        }
        out.push(ch);
    }
    while out.ends_with('_') {
        out.pop();
    }
    out
}

/// Rename every column of a batch with [`sanitize_column_name`]
pub fn sanitize_column_names(batch: &RecordBatch) -> Result<RecordBatch> {
    let schema = batch.schema();
    let mut seen = HashSet::new();
    let fields = schema
        .fields()
        .iter()
        .map(|field| {
            let name = sanitize_column_name(field.name());
            if !seen.insert(name.clone()) {
                warn!("Sanitised column name {name} is not unique", name: name.as_str());
            }
            (**field).clone().with_name(name)
        })
        .collect::<Vec<_>>();
    let renamed = Arc::new(Schema::new_with_metadata(fields, schema.metadata().clone()));
    let options = RecordBatchOptions::new().with_row_count(Some(batch.num_rows()));
    Ok(RecordBatch::try_new_with_options(
        renamed,
        batch.columns().to_vec(),
        &options,
    )?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use arrow::array::{ArrayRef, Int64Array, StringArray};

    #[test]
    fn test_sanitize_column_name() {
        assert_eq!(sanitize_column_name("  Nome do Aluno "), "Nome_do_Aluno");
        assert_eq!(sanitize_column_name("valor (R$)"), "valor_R");
        assert_eq!(sanitize_column_name("a--b__c"), "a_b_c");
        assert_eq!(sanitize_column_name("série/ano"), "s_rie_ano");
        assert_eq!(sanitize_column_name("KEY"), "KEY");
        assert_eq!(sanitize_column_name("___"), "");
    }

    #[test]
    fn test_sanitize_is_idempotent() {
        for name in ["  Nome do Aluno ", "valor (R$)", "x.y.z__", "_lead", "ação-2024"] {
            let once = sanitize_column_name(name);
            assert_eq!(sanitize_column_name(&once), once, "input {name:?}");
        }
    }

    #[test]
    fn test_kind_parsing_accepts_aliases() {
        assert_eq!("INT64".parse::<ColumnKind>().unwrap(), ColumnKind::Integer);
        assert_eq!("float64".parse::<ColumnKind>().unwrap(), ColumnKind::Float);
        assert_eq!("TIMESTAMP".parse::<ColumnKind>().unwrap(), ColumnKind::Datetime);
        assert!("GEOGRAPHY".parse::<ColumnKind>().is_err());
    }

    #[test]
    fn test_schema_serializes_as_list() {
        let schema = ColumnSchema::new(vec![
            ColumnSpec::new("id_aluno", ColumnKind::String),
            ColumnSpec::new("score", ColumnKind::Float),
        ]);
        let json = serde_json::to_string(&schema).unwrap();
        assert_eq!(
            json,
            r#"[{"name":"id_aluno","kind":"STRING"},{"name":"score","kind":"FLOAT"}]"#
        );
        let back: ColumnSchema = serde_json::from_str(&json).unwrap();
        assert_eq!(back, schema);
    }

    #[test]
    fn test_sanitize_column_names_renames_batch() {
        let schema = Arc::new(Schema::new(vec![
            Field::new(" id aluno ", DataType::Utf8, true),
            Field::new("nota-final", DataType::Int64, true),
        ]));
        let batch = RecordBatch::try_new(
            schema,
            vec![
                Arc::new(StringArray::from(vec!["1"])) as ArrayRef,
                Arc::new(Int64Array::from(vec![7])) as ArrayRef,
            ],
        )
        .unwrap();

        let renamed = sanitize_column_names(&batch).unwrap();
        let names: Vec<_> = renamed
            .schema()
            .fields()
            .iter()
            .map(|f| f.name().clone())
            .collect();
        assert_eq!(names, vec!["id_aluno", "nota_final"]);
    }

    #[test]
    fn test_validate_batch_detects_kind_mismatch() {
        let expected = ColumnSchema::new(vec![ColumnSpec::new("score", ColumnKind::Float)]);
        let batch = RecordBatch::try_new(
            Arc::new(Schema::new(vec![Field::new("score", DataType::Utf8, true)])),
            vec![Arc::new(StringArray::from(vec!["12"])) as ArrayRef],
        )
        .unwrap();
        assert!(matches!(
            expected.validate_batch(&batch),
            Err(Error::SchemaMismatch { .. })
        ));
    }
}
