// SPDX-FileCopyrightText: 2025 Caspar Water Company
//
// SPDX-License-Identifier: Apache-2.0

//! Ingestion of drifting parquet exports into warehouse tables
//!
//! Data flows from [`discovery`] through [`recency`] selection and the
//! degrading [`reader`], then either through [`inference`] (new or replaced
//! tables) or the schema [`align`]er (appends), and finally to a
//! [`warehouse::Warehouse`]. [`pipeline::Pipeline`] wires the steps together.

pub mod align;
pub mod cache;
pub mod config;
pub mod discovery;
pub mod error;
pub mod inference;
pub mod pipeline;
pub mod reader;
pub mod recency;
pub mod schema;
pub mod storage;
pub mod values;
pub mod warehouse;

pub use align::{AlignedTable, SchemaAligner};
pub use cache::{Clock, EvictionPolicy, MaxAge, NeverEvict, QueryCache, SystemClock};
pub use config::{IngestConfig, UnknownColumnPolicy, load_config};
pub use error::{Error, Result};
pub use inference::{ColumnDecision, ColumnRule, InferredTable, TypeInference};
pub use pipeline::{Pipeline, TreatedData};
pub use reader::{DegradingReader, ReadOutcome, ReadStrategy, SourceFile};
pub use recency::{CandidateFile, HourBucket, select_most_recent};
pub use schema::{ColumnKind, ColumnSchema, ColumnSpec, sanitize_column_name};
pub use storage::build_object_store;
pub use warehouse::{LoadMode, LoadReport, TableId, Warehouse};
