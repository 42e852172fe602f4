// SPDX-FileCopyrightText: 2025 Caspar Water Company
//
// SPDX-License-Identifier: Apache-2.0

use std::collections::BTreeMap;
use std::fmt::Write;

use anyhow::{Result, anyhow, bail};
use diagnostics::*;
use ingest::{LoadMode, LoadReport, Pipeline, TableId};

use crate::common::{RunContext, close_pipeline};

/// Full ingestion run: read `category` and load it into `table`
pub async fn load_command(ctx: &RunContext, category: &str, table: &str, append: bool) -> Result<()> {
    let pipeline = ctx.open_pipeline()?;
    run_load(&pipeline, category, table, append).await
}

/// Print the load outcome, then close the pipeline; the outcome is what is returned
pub async fn run_load(pipeline: &Pipeline, category: &str, table: &str, append: bool) -> Result<()> {
    let result = load_category(pipeline, category, table, append).await;

    let outcome = match result {
        Ok(None) => {
            println!("No data for {category}");
            Ok(())
        }
        Ok(Some(report)) if report.succeeded => {
            println!("{}", report.message);
            Ok(())
        }
        Ok(Some(report)) => Err(anyhow!("{}", report.message)),
        Err(e) => Err(e),
    };
    close_pipeline(pipeline).await;
    outcome
}

/// Load every `category[=table]` mapping, or the configured `tables` when none are given
pub async fn load_all_command(ctx: &RunContext, mappings: &[String], append: bool) -> Result<()> {
    let pipeline = ctx.open_pipeline()?;
    let mappings = resolve_mappings(&pipeline, mappings)?;
    let reports = load_all(&pipeline, &mappings, append).await;
    print!("{}", format_reports(&reports)?);
    close_pipeline(&pipeline).await;

    let failed = reports.values().filter(|r| !r.succeeded).count();
    if failed > 0 {
        bail!("{failed} of {} table(s) failed to load", reports.len());
    }
    Ok(())
}

/// `table` is either a bare name in the configured dataset or `project.dataset.table`
pub fn resolve_table(pipeline: &Pipeline, table: &str) -> Result<TableId> {
    if table.contains('.') {
        Ok(table.parse()?)
    } else {
        Ok(pipeline.table_id(table))
    }
}

/// `category=table`, or a bare `category` loaded into a table of the same name
pub fn parse_mapping(mapping: &str) -> Result<(String, String)> {
    let (category, table) = match mapping.split_once('=') {
        Some((category, table)) => (category.trim(), table.trim()),
        None => (mapping.trim(), mapping.trim()),
    };
    if category.is_empty() || table.is_empty() {
        bail!("Invalid mapping '{mapping}', expected category=table");
    }
    Ok((category.to_string(), table.to_string()))
}

pub fn resolve_mappings(pipeline: &Pipeline, mappings: &[String]) -> Result<Vec<(String, String)>> {
    if mappings.is_empty() {
        let configured = &pipeline.config().tables;
        if configured.is_empty() {
            bail!("No mappings given and no tables configured");
        }
        return Ok(configured
            .iter()
            .map(|(category, table)| (category.clone(), table.clone()))
            .collect());
    }
    mappings.iter().map(String::as_str).map(parse_mapping).collect()
}

pub async fn load_category(
    pipeline: &Pipeline,
    category: &str,
    table: &str,
    append: bool,
) -> Result<Option<LoadReport>> {
    let table = resolve_table(pipeline, table)?;
    let Some(data) = pipeline.load_treated_data(category).await? else {
        return Ok(None);
    };
    debug!(
        "Loading {category} into {table} via {strategy}",
        category,
        table: table.to_string(),
        strategy: data.strategy
    );

    let report = if append {
        pipeline.load_incremental(&data.batch, &table).await
    } else {
        pipeline.load_table(&data.batch, &table).await
    };
    Ok(Some(report))
}

pub async fn load_all(
    pipeline: &Pipeline,
    mappings: &[(String, String)],
    append: bool,
) -> BTreeMap<String, LoadReport> {
    let mode = if append {
        LoadMode::Append
    } else {
        LoadMode::Replace
    };
    pipeline.load_all(mappings, mode).await
}

pub fn format_reports(reports: &BTreeMap<String, LoadReport>) -> Result<String> {
    let mut out = String::new();
    for (table, report) in reports {
        let status = if report.succeeded { "ok" } else { "FAILED" };
        writeln!(out, "{table:<20} {status:<6} {}", report.message)?;
    }
    Ok(out)
}
