// SPDX-FileCopyrightText: 2025 Caspar Water Company
//
// SPDX-License-Identifier: Apache-2.0

//! Column type inference
//!
//! Each column is classified as STRING, INTEGER, FLOAT or DATETIME by an
//! ordered list of [`ColumnRule`]s; the first rule that claims a column
//! decides its kind and produces its converted values. The standard order is:
//!
//! 1. `string_allow_list`: names that are always text (keys, codes)
//! 2. `identifier_heuristic`: identifier-like names holding long digit strings
//! 3. `date_allow_list`: names that hold dates, parsed or kept as text
//! 4. `empty_column`: no values at all
//! 5. `numeric`: at least `numeric_threshold` of the values parse as numbers
//! 6. `string_fallback`: everything else
//!
//! Rules see the text form of each cell, so running inference again on its
//! own output reproduces the same schema.

use arrow::array::{Array, ArrayRef};
use arrow::record_batch::{RecordBatch, RecordBatchOptions};
use diagnostics::*;

use crate::Result;
use crate::config::InferenceConfig;
use crate::schema::{ColumnKind, ColumnSchema, ColumnSpec, sanitize_column_names};
use crate::values::{self, Number};

/// One column as seen by the rules
#[derive(Debug)]
pub struct ColumnContext<'a> {
    /// Sanitised column name
    pub name: &'a str,
    /// Cell text with null-like values already mapped to `None`
    pub cells: &'a [Option<String>],
}

impl ColumnContext<'_> {
    pub fn non_null(&self) -> impl Iterator<Item = &str> {
        self.cells.iter().filter_map(|c| c.as_deref())
    }

    pub fn non_null_count(&self) -> usize {
        self.cells.iter().filter(|c| c.is_some()).count()
    }
}

/// A rule's verdict: the kind and the converted column
#[derive(Debug, Clone)]
pub struct Classification {
    pub kind: ColumnKind,
    pub array: ArrayRef,
}

impl Classification {
    /// STRING with absent values as empty strings
    pub fn string(cells: &[Option<String>]) -> Self {
        Self {
            kind: ColumnKind::String,
            array: values::string_array(cells),
        }
    }
}

/// A predicate and a conversion in one step
pub trait ColumnRule: Send + Sync {
    fn name(&self) -> &'static str;

    /// `None` passes the column to the next rule.
    fn classify(
        &self,
        column: &ColumnContext<'_>,
        config: &InferenceConfig,
    ) -> Option<Classification>;
}

pub struct StringAllowList;

impl ColumnRule for StringAllowList {
    fn name(&self) -> &'static str {
        "string_allow_list"
    }

    fn classify(
        &self,
        column: &ColumnContext<'_>,
        config: &InferenceConfig,
    ) -> Option<Classification> {
        config
            .string_columns
            .iter()
            .any(|c| c == column.name)
            .then(|| Classification::string(column.cells))
    }
}

/// Identifier-like name plus digit-only values of at least `min_id_digits`.
///
/// Such columns stay text so leading zeros survive and long codes never
/// overflow.
pub struct IdentifierHeuristic;

impl IdentifierHeuristic {
    fn name_matches(name: &str, indicators: &[String]) -> bool {
        let lower = name.to_lowercase();
        indicators
            .iter()
            .any(|indicator| lower.contains(&indicator.to_lowercase()))
    }

    fn is_id_value(value: &str, min_digits: usize) -> bool {
        let value = value.trim();
        let digits = value.strip_suffix(".0").unwrap_or(value);
        digits.len() >= min_digits && digits.bytes().all(|b| b.is_ascii_digit())
    }
}

impl ColumnRule for IdentifierHeuristic {
    fn name(&self) -> &'static str {
        "identifier_heuristic"
    }

    fn classify(
        &self,
        column: &ColumnContext<'_>,
        config: &InferenceConfig,
    ) -> Option<Classification> {
        if !Self::name_matches(column.name, &config.id_indicators) || column.non_null_count() == 0
        {
            return None;
        }
        column
            .non_null()
            .all(|v| Self::is_id_value(v, config.min_id_digits))
            .then(|| Classification::string(column.cells))
    }
}

/// Named date columns: DATETIME when every value parses, else STRING
pub struct DateAllowList;

impl ColumnRule for DateAllowList {
    fn name(&self) -> &'static str {
        "date_allow_list"
    }

    fn classify(
        &self,
        column: &ColumnContext<'_>,
        config: &InferenceConfig,
    ) -> Option<Classification> {
        if !config.date_columns.iter().any(|c| c == column.name) {
            return None;
        }
        let mut parsed = Vec::with_capacity(column.cells.len());
        for cell in column.cells {
            match cell {
                None => parsed.push(None),
                Some(text) => match values::parse_datetime_micros(text) {
                    Some(micros) => parsed.push(Some(micros)),
                    None => return Some(Classification::string(column.cells)),
                },
            }
        }
        Some(Classification {
            kind: ColumnKind::Datetime,
            array: values::timestamp_array(parsed),
        })
    }
}

pub struct EmptyColumn;

impl ColumnRule for EmptyColumn {
    fn name(&self) -> &'static str {
        "empty_column"
    }

    fn classify(
        &self,
        column: &ColumnContext<'_>,
        _config: &InferenceConfig,
    ) -> Option<Classification> {
        (column.non_null_count() == 0).then(|| Classification::string(column.cells))
    }
}

/// INTEGER or FLOAT when enough values parse; unparseable values become null
pub struct Numeric;

impl ColumnRule for Numeric {
    fn name(&self) -> &'static str {
        "numeric"
    }

    fn classify(
        &self,
        column: &ColumnContext<'_>,
        config: &InferenceConfig,
    ) -> Option<Classification> {
        let total = column.non_null_count();
        if total == 0 {
            return None;
        }
        let numbers: Vec<Option<Number>> = column
            .cells
            .iter()
            .map(|c| {
                c.as_deref()
                    .and_then(|v| values::parse_number(v, &config.currency_markers))
            })
            .collect();
        let parsed = numbers.iter().flatten().count();
        if (parsed as f64) / (total as f64) < config.numeric_threshold {
            return None;
        }

        if numbers.iter().flatten().all(|n| n.as_whole().is_some()) {
            Some(Classification {
                kind: ColumnKind::Integer,
                array: values::int64_array(
                    numbers
                        .iter()
                        .map(|n| n.and_then(|n| n.as_whole()))
                        .collect(),
                ),
            })
        } else {
            Some(Classification {
                kind: ColumnKind::Float,
                array: values::float64_array(
                    numbers.iter().map(|n| n.map(|n| n.as_f64())).collect(),
                ),
            })
        }
    }
}

pub struct StringFallback;

impl ColumnRule for StringFallback {
    fn name(&self) -> &'static str {
        "string_fallback"
    }

    fn classify(
        &self,
        column: &ColumnContext<'_>,
        _config: &InferenceConfig,
    ) -> Option<Classification> {
        Some(Classification::string(column.cells))
    }
}

/// Which rule decided a column
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnDecision {
    pub column: String,
    pub kind: ColumnKind,
    pub rule: &'static str,
}

/// Converted batch, its schema and the per-column decisions
#[derive(Debug, Clone)]
pub struct InferredTable {
    pub batch: RecordBatch,
    pub schema: ColumnSchema,
    pub decisions: Vec<ColumnDecision>,
}

/// Ordered rule list plus the thresholds and allow-lists the rules read
pub struct TypeInference {
    config: InferenceConfig,
    rules: Vec<Box<dyn ColumnRule>>,
}

impl TypeInference {
    /// The standard rule order
    pub fn new(config: InferenceConfig) -> Self {
        Self::with_rules(
            config,
            vec![
                Box::new(StringAllowList),
                Box::new(IdentifierHeuristic),
                Box::new(DateAllowList),
                Box::new(EmptyColumn),
                Box::new(Numeric),
                Box::new(StringFallback),
            ],
        )
    }

    pub fn with_rules(config: InferenceConfig, rules: Vec<Box<dyn ColumnRule>>) -> Self {
        Self { config, rules }
    }

    pub fn config(&self) -> &InferenceConfig {
        &self.config
    }

    pub fn rule_names(&self) -> Vec<&'static str> {
        self.rules.iter().map(|r| r.name()).collect()
    }

    /// Classify one column; a column no rule claims is STRING.
    pub fn classify_column(
        &self,
        name: &str,
        array: &dyn Array,
    ) -> Result<(Classification, &'static str)> {
        let cells = values::normalized_cells(array)?;
        let column = ColumnContext {
            name,
            cells: &cells,
        };
        for rule in &self.rules {
            if let Some(classification) = rule.classify(&column, &self.config) {
                return Ok((classification, rule.name()));
            }
        }
        Ok((Classification::string(&cells), "string_fallback"))
    }

    /// Sanitise column names, then classify and convert every column.
    pub fn infer(&self, batch: &RecordBatch) -> Result<InferredTable> {
        let batch = sanitize_column_names(batch)?;
        let schema_ref = batch.schema();

        let mut schema = ColumnSchema::default();
        let mut columns = Vec::with_capacity(batch.num_columns());
        let mut decisions = Vec::with_capacity(batch.num_columns());
        for (field, array) in schema_ref.fields().iter().zip(batch.columns()) {
            let (classification, rule) = self.classify_column(field.name(), array)?;
            debug!(
                "Column {column} is {kind} by {rule}",
                column: field.name().as_str(),
                kind: classification.kind.as_str(),
                rule
            );
            schema.push(ColumnSpec::new(field.name().clone(), classification.kind));
            decisions.push(ColumnDecision {
                column: field.name().clone(),
                kind: classification.kind,
                rule,
            });
            columns.push(classification.array);
        }

        let options = RecordBatchOptions::new().with_row_count(Some(batch.num_rows()));
        let converted = RecordBatch::try_new_with_options(schema.to_arrow(), columns, &options)?;
        info!(
            "Inferred schema for {count} columns: {schema}",
            count: schema.len(),
            schema: schema.to_string()
        );
        Ok(InferredTable {
            batch: converted,
            schema,
            decisions,
        })
    }
}

impl Default for TypeInference {
    fn default() -> Self {
        Self::new(InferenceConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use arrow::array::{Float64Array, Int64Array, StringArray, TimestampMicrosecondArray};
    use std::sync::Arc;

    fn strings(values: &[Option<&str>]) -> ArrayRef {
        Arc::new(StringArray::from(values.to_vec()))
    }

    fn table(columns: Vec<(&str, ArrayRef)>) -> RecordBatch {
        RecordBatch::try_from_iter(columns).unwrap()
    }

    fn kind_of(inferred: &InferredTable, column: &str) -> ColumnKind {
        inferred.schema.kind_of(column).unwrap()
    }

    fn rule_of(inferred: &InferredTable, column: &str) -> &'static str {
        inferred
            .decisions
            .iter()
            .find(|d| d.column == column)
            .unwrap()
            .rule
    }

    #[test]
    fn test_rule_order() {
        assert_eq!(
            TypeInference::default().rule_names(),
            vec![
                "string_allow_list",
                "identifier_heuristic",
                "date_allow_list",
                "empty_column",
                "numeric",
                "string_fallback",
            ]
        );
    }

    #[test]
    fn test_identifier_keeps_leading_zeros() {
        let batch = table(vec![
            ("id_aluno", strings(&[Some("00123"), Some("00456"), Some("00789")])),
            ("codigo_escola", strings(&[Some("00123"), Some("00456.0"), None])),
            ("cod_turma", strings(&[Some("12"), Some("34"), Some("56")])),
        ]);
        let inferred = TypeInference::default().infer(&batch).unwrap();

        assert_eq!(kind_of(&inferred, "id_aluno"), ColumnKind::String);
        assert_eq!(kind_of(&inferred, "codigo_escola"), ColumnKind::String);
        assert_eq!(rule_of(&inferred, "codigo_escola"), "identifier_heuristic");
        let ids = inferred
            .batch
            .column(0)
            .as_any()
            .downcast_ref::<StringArray>()
            .unwrap();
        assert_eq!(ids.value(0), "00123");

        // Too short to be an identifier
        assert_eq!(kind_of(&inferred, "cod_turma"), ColumnKind::Integer);
    }

    #[test]
    fn test_currency_values_become_float() {
        let batch = table(vec![(
            "valor",
            strings(&[Some("R$ 10,50"), Some("R$ 20,00"), Some("")]),
        )]);
        let inferred = TypeInference::default().infer(&batch).unwrap();
        assert_eq!(kind_of(&inferred, "valor"), ColumnKind::Float);

        let values = inferred
            .batch
            .column(0)
            .as_any()
            .downcast_ref::<Float64Array>()
            .unwrap();
        assert_eq!(values.value(0), 10.5);
        assert_eq!(values.value(1), 20.0);
        assert!(values.is_null(2));
    }

    #[test]
    fn test_integer_keeps_nulls() {
        let batch = table(vec![(
            "quantidade",
            strings(&[Some("1"), None, Some("3.0"), Some("None")]),
        )]);
        let inferred = TypeInference::default().infer(&batch).unwrap();
        assert_eq!(kind_of(&inferred, "quantidade"), ColumnKind::Integer);

        let values = inferred
            .batch
            .column(0)
            .as_any()
            .downcast_ref::<Int64Array>()
            .unwrap();
        assert_eq!(values.value(0), 1);
        assert!(values.is_null(1));
        assert_eq!(values.value(2), 3);
        assert!(values.is_null(3));
    }

    #[test]
    fn test_numeric_threshold() {
        let mut mostly: Vec<Option<String>> = (0..99).map(|i| Some(i.to_string())).collect();
        mostly.push(Some("n/a".to_string()));
        let mut fewer = mostly.clone();
        fewer[0] = Some("??".to_string());

        let batch = RecordBatch::try_from_iter(vec![
            ("mostly", Arc::new(StringArray::from(mostly)) as ArrayRef),
            ("fewer", Arc::new(StringArray::from(fewer)) as ArrayRef),
        ])
        .unwrap();
        let inferred = TypeInference::default().infer(&batch).unwrap();
        assert_eq!(kind_of(&inferred, "mostly"), ColumnKind::Integer);
        assert_eq!(kind_of(&inferred, "fewer"), ColumnKind::String);
        assert_eq!(rule_of(&inferred, "fewer"), "string_fallback");
    }

    #[test]
    fn test_date_columns() {
        let batch = table(vec![
            ("DATA", strings(&[Some("2024-03-04"), Some("2024-03-05 10:00:00"), None])),
            ("created", strings(&[Some("2024-03-04"), Some("yesterday"), None])),
            ("lastUpdated", strings(&[None, None, None])),
        ]);
        let inferred = TypeInference::default().infer(&batch).unwrap();
        assert_eq!(kind_of(&inferred, "DATA"), ColumnKind::Datetime);
        assert_eq!(kind_of(&inferred, "created"), ColumnKind::String);
        assert_eq!(kind_of(&inferred, "lastUpdated"), ColumnKind::Datetime);

        let created = inferred
            .batch
            .column(1)
            .as_any()
            .downcast_ref::<StringArray>()
            .unwrap();
        assert_eq!(created.value(2), "");
        let data = inferred
            .batch
            .column(0)
            .as_any()
            .downcast_ref::<TimestampMicrosecondArray>()
            .unwrap();
        assert!(data.is_null(2));
    }

    #[test]
    fn test_empty_and_text_columns() {
        let batch = table(vec![
            ("vazio", strings(&[None, Some(" "), Some("nan")])),
            ("nome", strings(&[Some("Ana"), Some("Bia"), None])),
        ]);
        let inferred = TypeInference::default().infer(&batch).unwrap();
        assert_eq!(rule_of(&inferred, "vazio"), "empty_column");
        assert_eq!(kind_of(&inferred, "nome"), ColumnKind::String);
        assert_eq!(inferred.batch.column(1).null_count(), 0);
    }

    #[test]
    fn test_names_are_sanitised_first() {
        let batch = table(vec![(" nota final ", strings(&[Some("7,5")]))]);
        let inferred = TypeInference::default().infer(&batch).unwrap();
        assert_eq!(inferred.schema.names().collect::<Vec<_>>(), vec!["nota_final"]);
        assert_eq!(kind_of(&inferred, "nota_final"), ColumnKind::Float);
    }

    #[test]
    fn test_native_numeric_columns() {
        let batch = table(vec![
            ("idade", Arc::new(Int64Array::from(vec![10, 12])) as ArrayRef),
            ("peso", Arc::new(Float64Array::from(vec![30.5, 41.0])) as ArrayRef),
        ]);
        let inferred = TypeInference::default().infer(&batch).unwrap();
        assert_eq!(kind_of(&inferred, "idade"), ColumnKind::Integer);
        assert_eq!(kind_of(&inferred, "peso"), ColumnKind::Float);
    }

    #[test]
    fn test_inference_is_idempotent() {
        let batch = table(vec![
            ("KEY", strings(&[Some("k1"), Some("k2"), Some("k3")])),
            ("codigo_inep", strings(&[Some("35012345"), Some("35099999"), None])),
            ("SubmissionDate", strings(&[Some("Mar 4, 2024 10:15:30 AM"), None, Some("2024-03-05T08:00:00.250")])),
            ("valor", strings(&[Some("R$ 10,50"), Some("R$ 20,00"), Some("")])),
            ("acertos", strings(&[Some("3"), Some("4"), None])),
            ("vazio", strings(&[None, None, None])),
            ("comentario", strings(&[Some("bom"), Some("12"), None])),
        ]);
        let inference = TypeInference::default();
        let first = inference.infer(&batch).unwrap();
        let second = inference.infer(&first.batch).unwrap();
        assert_eq!(first.schema, second.schema);
        assert_eq!(kind_of(&first, "SubmissionDate"), ColumnKind::Datetime);
    }

    #[test]
    fn test_zero_column_batch() {
        let batch = RecordBatch::new_empty(Arc::new(arrow::datatypes::Schema::empty()));
        let inferred = TypeInference::default().infer(&batch).unwrap();
        assert!(inferred.schema.is_empty());
    }
}
