// SPDX-FileCopyrightText: 2025 Caspar Water Company
//
// SPDX-License-Identifier: Apache-2.0

use anyhow::Result;
use arrow_cast::pretty::pretty_format_batches;
use ingest::Pipeline;

use crate::common::{RunContext, close_pipeline};

/// Execute SQL against the local warehouse
pub async fn query_command(ctx: &RunContext, sql: &str) -> Result<()> {
    let pipeline = ctx.open_pipeline()?;
    let output = query_command_as_string(&pipeline, sql).await;
    if let Ok(table) = &output {
        println!("{table}");
    }
    close_pipeline(&pipeline).await;
    output.map(|_| ())
}

pub async fn query_command_as_string(pipeline: &Pipeline, sql: &str) -> Result<String> {
    let batch = pipeline.query(sql).await?;
    Ok(pretty_format_batches(&[batch])?.to_string())
}
