// SPDX-FileCopyrightText: 2025 Caspar Water Company
//
// SPDX-License-Identifier: Apache-2.0

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};

use cmd::commands::{
    discover_command, inspect_command, load_all_command, load_command, query_command,
};
use cmd::common::RunContext;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
#[command(name = "driftload")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
    /// Configuration file (YAML); defaults to $DRIFTLOAD_CONFIG
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// List the parquet files selected for a category
    Discover {
        /// Category name, e.g. aluno
        category: String,
    },
    /// Read a category and print the inferred schema
    Inspect {
        category: String,
        /// Print the first N converted rows
        #[arg(short, long)]
        sample: Option<usize>,
    },
    /// Read a category and load it into a warehouse table
    Load {
        category: String,
        /// Table name, or project.dataset.table
        table: String,
        /// Append using the persisted schema instead of replacing the table
        #[arg(long)]
        append: bool,
    },
    /// Load several categories in one run, one table each
    LoadAll {
        /// `category=table` or `category`; defaults to the configured `tables`
        mappings: Vec<String>,
        /// Append using the persisted schemas instead of replacing the tables
        #[arg(long)]
        append: bool,
    },
    /// Run SQL against the warehouse
    Query {
        sql: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    diagnostics::init();

    let cli = Cli::parse();
    let ctx = RunContext::new(cli.config);

    match &cli.command {
        Commands::Discover { category } => discover_command(&ctx, category).await,
        Commands::Inspect { category, sample } => inspect_command(&ctx, category, *sample).await,
        Commands::Load {
            category,
            table,
            append,
        } => load_command(&ctx, category, table, *append).await,
        Commands::LoadAll { mappings, append } => load_all_command(&ctx, mappings, *append).await,
        Commands::Query { sql } => query_command(&ctx, sql).await,
    }
}
