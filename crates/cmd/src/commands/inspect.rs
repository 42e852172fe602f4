// SPDX-FileCopyrightText: 2025 Caspar Water Company
//
// SPDX-License-Identifier: Apache-2.0

use std::fmt::Write;

use anyhow::Result;
use arrow_cast::pretty::pretty_format_batches;
use ingest::{InferredTable, Pipeline, TypeInference};

use crate::common::RunContext;

/// Read a category and show the schema inference would give it
pub async fn inspect_command(ctx: &RunContext, category: &str, sample: Option<usize>) -> Result<()> {
    let pipeline = ctx.open_pipeline()?;
    print!("{}", inspect_command_as_string(&pipeline, category, sample).await?);
    Ok(())
}

pub async fn inspect_command_as_string(
    pipeline: &Pipeline,
    category: &str,
    sample: Option<usize>,
) -> Result<String> {
    let mut out = String::new();
    let Some(data) = pipeline.load_treated_data(category).await? else {
        writeln!(out, "No data for {category}")?;
        return Ok(out);
    };

    let inference = TypeInference::new(pipeline.config().inference.clone());
    let inferred = inference.infer(&data.batch)?;

    writeln!(
        out,
        "{category}: {} rows from {} file(s), read {}, {} duplicate(s) removed",
        data.batch.num_rows(),
        data.files.len(),
        data.strategy,
        data.duplicates_removed
    )?;
    write_decisions(&mut out, &inferred)?;

    if let Some(limit) = sample.filter(|n| *n > 0) {
        let rows = limit.min(inferred.batch.num_rows());
        let preview = inferred.batch.slice(0, rows);
        writeln!(out, "{}", pretty_format_batches(&[preview])?)?;
    }
    Ok(out)
}

fn write_decisions(out: &mut String, inferred: &InferredTable) -> Result<()> {
    let width = inferred
        .decisions
        .iter()
        .map(|d| d.column.len())
        .max()
        .unwrap_or(0);
    for decision in &inferred.decisions {
        writeln!(
            out,
            "  {:<width$}  {:<8}  {}",
            decision.column,
            decision.kind.as_str(),
            decision.rule
        )?;
    }
    Ok(())
}
