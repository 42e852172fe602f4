// SPDX-FileCopyrightText: 2025 Caspar Water Company
//
// SPDX-License-Identifier: Apache-2.0

use std::fmt::Write;

use anyhow::Result;
use chrono::DateTime;
use ingest::{CandidateFile, Pipeline};

use crate::common::RunContext;

/// List the files a load of `category` would read
pub async fn discover_command(ctx: &RunContext, category: &str) -> Result<()> {
    let pipeline = ctx.open_pipeline()?;
    let files = pipeline.select_files(category).await;
    print!("{}", format_files(category, &files)?);
    Ok(())
}

pub async fn discover_command_as_string(pipeline: &Pipeline, category: &str) -> Result<String> {
    let files = pipeline.select_files(category).await;
    format_files(category, &files)
}

fn format_files(category: &str, files: &[CandidateFile]) -> Result<String> {
    let mut out = String::new();
    if files.is_empty() {
        writeln!(out, "No parquet files found for {category}")?;
        return Ok(out);
    }
    writeln!(out, "{} file(s) selected for {category}:", files.len())?;
    for file in files {
        let modified = file
            .modified
            .map(|m| m.to_rfc3339())
            .unwrap_or_else(|| "-".to_string());
        let stamped = file
            .inferred_timestamp
            .and_then(|ts| DateTime::from_timestamp(ts, 0))
            .map(|ts| ts.to_rfc3339())
            .unwrap_or_else(|| "-".to_string());
        writeln!(out, "  {}  modified={modified}  name_time={stamped}", file.path)?;
    }
    Ok(out)
}
