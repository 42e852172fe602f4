// SPDX-FileCopyrightText: 2025 Caspar Water Company
//
// SPDX-License-Identifier: Apache-2.0

//! Cell-level text rendering and parsing shared by the reader, the
//! inference engine and the schema aligner.
//!
//! Loose reads leave columns of any Arrow type. Every heuristic here works
//! on the text form of a cell, so a column read as `Int64` in one run and
//! as `Utf8` in the next is classified the same way.

use std::sync::Arc;

use arrow::array::{
    Array, ArrayRef, Float64Array, Int64Array, StringArray, TimestampMicrosecondArray,
};
use arrow_cast::display::{ArrayFormatter, FormatOptions};
use chrono::{DateTime, NaiveDate, NaiveDateTime};

use crate::Result;

/// Text forms that mean "no value" in upstream extracts
const NULL_TOKENS: &[&str] = &["None", "null", "nan", "NaN"];

/// Render every cell of an array as text; Arrow nulls become `None`.
pub fn render_cells(array: &dyn Array) -> Result<Vec<Option<String>>> {
    let options = FormatOptions::default();
    let formatter = ArrayFormatter::try_new(array, &options)?;
    Ok((0..array.len())
        .map(|i| {
            if array.is_null(i) {
                None
            } else {
                Some(formatter.value(i).to_string())
            }
        })
        .collect())
}

/// Map blank and null-like cells to `None`.
pub fn normalize_null(cell: Option<String>) -> Option<String> {
    match cell {
        Some(text) => {
            let trimmed = text.trim();
            if trimmed.is_empty() || NULL_TOKENS.contains(&trimmed) {
                None
            } else {
                Some(text)
            }
        }
        None => None,
    }
}

/// [`render_cells`] followed by [`normalize_null`]
pub fn normalized_cells(array: &dyn Array) -> Result<Vec<Option<String>>> {
    Ok(render_cells(array)?
        .into_iter()
        .map(normalize_null)
        .collect())
}

/// A successfully parsed numeric cell
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Number {
    Int(i64),
    Float(f64),
}

impl Number {
    pub fn as_f64(&self) -> f64 {
        match *self {
            Number::Int(v) => v as f64,
            Number::Float(v) => v,
        }
    }

    /// The value as an integer, if it has no fractional part and fits in i64
    pub fn as_whole(&self) -> Option<i64> {
        match *self {
            Number::Int(v) => Some(v),
            Number::Float(v) => {
                // 2^63 is exactly representable; anything at or above it overflows.
                if v.fract() == 0.0 && v >= -9.223_372_036_854_776e18 && v < 9.223_372_036_854_776e18
                {
                    Some(v as i64)
                } else {
                    None
                }
            }
        }
    }
}

/// Parse a plain numeric literal (no currency or locale handling).
pub fn parse_plain_number(text: &str) -> Option<Number> {
    let text = text.trim();
    if text.is_empty() {
        return None;
    }
    if let Ok(v) = text.parse::<i64>() {
        return Some(Number::Int(v));
    }
    match text.parse::<f64>() {
        Ok(v) if v.is_finite() => Some(Number::Float(v)),
        _ => None,
    }
}

/// Parse a cell the way loose survey exports write numbers.
///
/// Currency markers are removed, `,` becomes the decimal point and
/// surrounding whitespace is dropped before parsing.
pub fn parse_number(text: &str, currency_markers: &[String]) -> Option<Number> {
    let mut cleaned = text.to_string();
    for marker in currency_markers {
        if !marker.is_empty() {
            cleaned = cleaned.replace(marker.as_str(), "");
        }
    }
    let cleaned = cleaned.replace(',', ".");
    parse_plain_number(&cleaned)
}

const DATETIME_FORMATS: &[&str] = &[
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M",
    "%Y-%m-%d %H:%M",
    "%Y/%m/%d %H:%M:%S",
    "%b %d, %Y %I:%M:%S %p",
];

const DATE_FORMATS: &[&str] = &["%Y-%m-%d", "%Y/%m/%d", "%b %d, %Y"];

/// Parse a date or date-time cell into microseconds since the Unix epoch.
///
/// Offsets in RFC 3339 input are honoured and the result is expressed in
/// UTC; naive inputs are taken as they are.
pub fn parse_datetime_micros(text: &str) -> Option<i64> {
    let text = text.trim();
    if text.is_empty() {
        return None;
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(text) {
        return Some(dt.naive_utc().and_utc().timestamp_micros());
    }
    for format in DATETIME_FORMATS {
        if let Ok(dt) = NaiveDateTime::parse_from_str(text, format) {
            return Some(dt.and_utc().timestamp_micros());
        }
    }
    for format in DATE_FORMATS {
        if let Ok(date) = NaiveDate::parse_from_str(text, format) {
            return date
                .and_hms_opt(0, 0, 0)
                .map(|dt| dt.and_utc().timestamp_micros());
        }
    }
    None
}

/// STRING column: absent values become empty strings.
pub fn string_array(cells: &[Option<String>]) -> ArrayRef {
    Arc::new(StringArray::from_iter_values(
        cells.iter().map(|c| c.as_deref().unwrap_or("")),
    ))
}

/// Nullable INTEGER column
pub fn int64_array(values: Vec<Option<i64>>) -> ArrayRef {
    Arc::new(Int64Array::from(values))
}

/// FLOAT column; absent values are Arrow nulls
pub fn float64_array(values: Vec<Option<f64>>) -> ArrayRef {
    Arc::new(Float64Array::from(values))
}

/// DATETIME column in microseconds, no time zone
pub fn timestamp_array(values: Vec<Option<i64>>) -> ArrayRef {
    Arc::new(TimestampMicrosecondArray::from(values))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn real() -> Vec<String> {
        vec!["R$".to_string()]
    }

    #[test]
    fn test_parse_number_handles_currency_and_comma() {
        assert_eq!(parse_number("R$ 10,50", &real()), Some(Number::Float(10.5)));
        assert_eq!(parse_number(" 42 ", &real()), Some(Number::Int(42)));
        assert_eq!(parse_number("12.0", &real()), Some(Number::Float(12.0)));
        assert_eq!(parse_number("abc", &real()), None);
        assert_eq!(parse_number("1.234,56", &real()), None);
        assert_eq!(parse_number("inf", &real()), None);
    }

    #[test]
    fn test_whole_numbers() {
        assert_eq!(Number::Float(12.0).as_whole(), Some(12));
        assert_eq!(Number::Float(12.5).as_whole(), None);
        assert_eq!(Number::Float(1e300).as_whole(), None);
        assert_eq!(Number::Int(-3).as_whole(), Some(-3));
    }

    #[test]
    fn test_normalize_null() {
        assert_eq!(normalize_null(Some("  ".to_string())), None);
        assert_eq!(normalize_null(Some("None".to_string())), None);
        assert_eq!(normalize_null(Some("nan".to_string())), None);
        assert_eq!(normalize_null(None), None);
        assert_eq!(
            normalize_null(Some("00123".to_string())),
            Some("00123".to_string())
        );
    }

    #[test]
    fn test_parse_datetime_forms() {
        let expected = NaiveDate::from_ymd_opt(2024, 3, 4)
            .unwrap()
            .and_hms_opt(10, 15, 30)
            .unwrap()
            .and_utc()
            .timestamp_micros();
        assert_eq!(parse_datetime_micros("2024-03-04T10:15:30"), Some(expected));
        assert_eq!(parse_datetime_micros("2024-03-04 10:15:30"), Some(expected));
        assert_eq!(parse_datetime_micros("2024-03-04T10:15:30Z"), Some(expected));
        assert_eq!(
            parse_datetime_micros("2024-03-04T07:15:30-03:00"),
            Some(expected)
        );
        assert_eq!(
            parse_datetime_micros("Mar 4, 2024 10:15:30 AM"),
            Some(expected)
        );
        assert!(parse_datetime_micros("2024-03-04").is_some());
        assert_eq!(parse_datetime_micros("not a date"), None);
    }

    #[test]
    fn test_render_cells_keeps_nulls() {
        let array = Int64Array::from(vec![Some(1), None, Some(3)]);
        let cells = render_cells(&array).unwrap();
        assert_eq!(
            cells,
            vec![Some("1".to_string()), None, Some("3".to_string())]
        );
    }
}
