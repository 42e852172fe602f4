// SPDX-FileCopyrightText: 2025 Caspar Water Company
//
// SPDX-License-Identifier: Apache-2.0

//! Conform new data to a table's persisted schema
//!
//! Appends never re-run inference: each persisted column keeps its kind and
//! the incoming values are coerced to it. Only creating a table infers.

use arrow::array::ArrayRef;
use arrow::record_batch::{RecordBatch, RecordBatchOptions};
use diagnostics::*;

use crate::config::{AlignmentConfig, InferenceConfig, UnknownColumnPolicy};
use crate::schema::{ColumnKind, ColumnSchema, ColumnSpec, sanitize_column_names};
use crate::values;
use crate::{Error, Result};

/// Batch coerced to the persisted schema
#[derive(Debug, Clone)]
pub struct AlignedTable {
    pub batch: RecordBatch,
    /// The persisted schema, except for DATETIME columns that fell back to STRING
    pub schema: ColumnSchema,
    /// Incoming columns the persisted schema does not know
    pub dropped_columns: Vec<String>,
}

pub struct SchemaAligner {
    policy: UnknownColumnPolicy,
    currency_markers: Vec<String>,
}

impl SchemaAligner {
    pub fn new(alignment: &AlignmentConfig, inference: &InferenceConfig) -> Self {
        Self {
            policy: alignment.unknown_columns,
            currency_markers: inference.currency_markers.clone(),
        }
    }

    pub fn policy(&self) -> UnknownColumnPolicy {
        self.policy
    }

    fn coerce(
        &self,
        spec: &ColumnSpec,
        cells: &[Option<String>],
    ) -> Result<(ColumnKind, ArrayRef)> {
        match spec.kind {
            ColumnKind::String => Ok((ColumnKind::String, values::string_array(cells))),
            ColumnKind::Integer => {
                let mut out = Vec::with_capacity(cells.len());
                for cell in cells {
                    let parsed = cell
                        .as_deref()
                        .and_then(|v| values::parse_number(v, &self.currency_markers));
                    match parsed {
                        None => out.push(None),
                        Some(number) => match number.as_whole() {
                            Some(v) => out.push(Some(v)),
                            None => {
                                return Err(Error::Coercion {
                                    column: spec.name.clone(),
                                    value: cell.clone().unwrap_or_default(),
                                    kind: ColumnKind::Integer,
                                });
                            }
                        },
                    }
                }
                Ok((ColumnKind::Integer, values::int64_array(out)))
            }
            ColumnKind::Float => {
                let out = cells
                    .iter()
                    .map(|cell| {
                        cell.as_deref()
                            .and_then(|v| values::parse_number(v, &self.currency_markers))
                            .map(|n| n.as_f64())
                    })
                    .collect();
                Ok((ColumnKind::Float, values::float64_array(out)))
            }
            ColumnKind::Datetime => {
                let out: Vec<Option<i64>> = cells
                    .iter()
                    .map(|cell| cell.as_deref().and_then(values::parse_datetime_micros))
                    .collect();
                let present = cells.iter().flatten().count();
                let parsed = out.iter().flatten().count();
                if present > 0 && parsed == 0 {
                    warn!(
                        "No value of DATETIME column {column} parses, loading it as STRING",
                        column: spec.name.as_str()
                    );
                    return Ok((ColumnKind::String, values::string_array(cells)));
                }
                if parsed < present {
                    debug!(
                        "{count} unparseable values of {column} set to null",
                        count: present - parsed,
                        column: spec.name.as_str()
                    );
                }
                Ok((ColumnKind::Datetime, values::timestamp_array(out)))
            }
        }
    }

    /// Coerce `batch` to `existing`.
    ///
    /// Output columns follow the persisted order. Persisted columns absent
    /// from the input are filled with nulls (empty strings for STRING).
    /// Incoming columns unknown to the persisted schema are dropped or
    /// rejected according to the configured policy.
    pub fn align(&self, batch: &RecordBatch, existing: &ColumnSchema) -> Result<AlignedTable> {
        let batch = sanitize_column_names(batch)?;
        let incoming = batch.schema();

        let unknown: Vec<String> = incoming
            .fields()
            .iter()
            .map(|f| f.name().clone())
            .filter(|name| existing.get(name).is_none())
            .collect();
        if !unknown.is_empty() {
            match self.policy {
                UnknownColumnPolicy::Reject => {
                    error!(
                        "Rejecting load with unknown columns {columns}",
                        columns: unknown.join(", ")
                    );
                    return Err(Error::UnknownColumns { columns: unknown });
                }
                UnknownColumnPolicy::Drop => warn!(
                    "Dropping columns not in the persisted schema: {columns}",
                    columns: unknown.join(", ")
                ),
            }
        }

        let rows = batch.num_rows();
        let mut schema = ColumnSchema::default();
        let mut columns = Vec::with_capacity(existing.len());
        for spec in existing.columns() {
            let cells = match batch.column_by_name(&spec.name) {
                Some(array) => values::normalized_cells(array)?,
                None => {
                    debug!(
                        "Column {column} missing from incoming data, filling nulls",
                        column: spec.name.as_str()
                    );
                    vec![None; rows]
                }
            };
            let (kind, array) = self.coerce(spec, &cells)?;
            schema.push(ColumnSpec::new(spec.name.clone(), kind));
            columns.push(array);
        }

        let options = RecordBatchOptions::new().with_row_count(Some(rows));
        let aligned = RecordBatch::try_new_with_options(schema.to_arrow(), columns, &options)?;
        Ok(AlignedTable {
            batch: aligned,
            schema,
            dropped_columns: unknown,
        })
    }
}

impl Default for SchemaAligner {
    fn default() -> Self {
        Self::new(&AlignmentConfig::default(), &InferenceConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use arrow::array::{Array, Float64Array, Int64Array, StringArray, TimestampMicrosecondArray};
    use std::sync::Arc;

    fn strings(values: &[Option<&str>]) -> ArrayRef {
        Arc::new(StringArray::from(values.to_vec()))
    }

    fn existing() -> ColumnSchema {
        ColumnSchema::new(vec![
            ColumnSpec::new("KEY", ColumnKind::String),
            ColumnSpec::new("score", ColumnKind::Float),
            ColumnSpec::new("acertos", ColumnKind::Integer),
            ColumnSpec::new("DATA", ColumnKind::Datetime),
        ])
    }

    #[test]
    fn test_string_score_becomes_float() {
        let batch = RecordBatch::try_from_iter(vec![
            ("score", strings(&[Some("12"), Some("7,5"), None])),
            ("KEY", strings(&[Some("a"), None, Some("c")])),
        ])
        .unwrap();

        let aligned = SchemaAligner::default().align(&batch, &existing()).unwrap();
        assert_eq!(aligned.schema, existing());
        existing().validate_batch(&aligned.batch).unwrap();

        let score = aligned
            .batch
            .column(1)
            .as_any()
            .downcast_ref::<Float64Array>()
            .unwrap();
        assert_eq!(score.value(0), 12.0);
        assert_eq!(score.value(1), 7.5);
        assert!(score.is_null(2));

        let key = aligned
            .batch
            .column(0)
            .as_any()
            .downcast_ref::<StringArray>()
            .unwrap();
        assert_eq!(key.value(1), "");

        // Missing persisted columns are null-filled
        assert_eq!(aligned.batch.column(2).null_count(), 3);
        assert_eq!(aligned.batch.column(3).null_count(), 3);
    }

    #[test]
    fn test_integer_alignment() {
        let batch = RecordBatch::try_from_iter(vec![(
            "acertos",
            strings(&[Some("3"), Some("4.0"), Some("x")]),
        )])
        .unwrap();
        let aligned = SchemaAligner::default().align(&batch, &existing()).unwrap();
        let acertos = aligned
            .batch
            .column(2)
            .as_any()
            .downcast_ref::<Int64Array>()
            .unwrap();
        assert_eq!(acertos.value(0), 3);
        assert_eq!(acertos.value(1), 4);
        assert!(acertos.is_null(2));

        let fractional =
            RecordBatch::try_from_iter(vec![("acertos", strings(&[Some("3.5")]))]).unwrap();
        assert!(matches!(
            SchemaAligner::default().align(&fractional, &existing()),
            Err(Error::Coercion { .. })
        ));
    }

    #[test]
    fn test_datetime_alignment_and_fallback() {
        let partial = RecordBatch::try_from_iter(vec![(
            "DATA",
            strings(&[Some("2024-03-04"), Some("soon")]),
        )])
        .unwrap();
        let aligned = SchemaAligner::default().align(&partial, &existing()).unwrap();
        let data = aligned
            .batch
            .column(3)
            .as_any()
            .downcast_ref::<TimestampMicrosecondArray>()
            .unwrap();
        assert!(data.is_valid(0));
        assert!(data.is_null(1));

        let hopeless =
            RecordBatch::try_from_iter(vec![("DATA", strings(&[Some("soon"), Some("later")]))])
                .unwrap();
        let aligned = SchemaAligner::default().align(&hopeless, &existing()).unwrap();
        assert_eq!(aligned.schema.kind_of("DATA"), Some(ColumnKind::String));
    }

    #[test]
    fn test_unknown_columns_policy() {
        let batch = RecordBatch::try_from_iter(vec![
            ("score", strings(&[Some("1")])),
            ("nova coluna", strings(&[Some("x")])),
        ])
        .unwrap();

        let aligned = SchemaAligner::default().align(&batch, &existing()).unwrap();
        assert_eq!(aligned.dropped_columns, vec!["nova_coluna"]);
        assert_eq!(aligned.batch.num_columns(), 4);

        let strict = SchemaAligner::new(
            &AlignmentConfig {
                unknown_columns: UnknownColumnPolicy::Reject,
            },
            &InferenceConfig::default(),
        );
        match strict.align(&batch, &existing()) {
            Err(Error::UnknownColumns { columns }) => assert_eq!(columns, vec!["nova_coluna"]),
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[test]
    fn test_incoming_names_are_sanitised() {
        let batch = RecordBatch::try_from_iter(vec![(" score ", strings(&[Some("R$ 3,25")]))])
            .unwrap();
        let aligned = SchemaAligner::default().align(&batch, &existing()).unwrap();
        assert!(aligned.dropped_columns.is_empty());
        let score = aligned
            .batch
            .column(1)
            .as_any()
            .downcast_ref::<Float64Array>()
            .unwrap();
        assert_eq!(score.value(0), 3.25);
    }
}
