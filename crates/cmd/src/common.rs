// SPDX-FileCopyrightText: 2025 Caspar Water Company
//
// SPDX-License-Identifier: Apache-2.0

use std::env;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result, anyhow};
use diagnostics::*;
use ingest::{IngestConfig, Pipeline, build_object_store, load_config};

use crate::local_warehouse::LocalWarehouse;

pub const CONFIG_ENV_VAR: &str = "DRIFTLOAD_CONFIG";

/// Settings shared by every subcommand
#[derive(Debug, Clone, Default)]
pub struct RunContext {
    /// `--config` from the command line
    pub config_path: Option<PathBuf>,
}

impl RunContext {
    pub fn new(config_path: Option<PathBuf>) -> Self {
        Self { config_path }
    }

    pub fn config_path(&self) -> Result<PathBuf> {
        get_config_path_with_override(self.config_path.clone())
    }

    pub fn load_config(&self) -> Result<IngestConfig> {
        let path = self.config_path()?;
        load_config(&path).with_context(|| format!("Invalid configuration {}", path.display()))
    }

    /// Pipeline over the configured storage and the local warehouse
    pub fn open_pipeline(&self) -> Result<Pipeline> {
        open_pipeline(self.load_config()?)
    }
}

/// Get the config path with an optional override, falling back to DRIFTLOAD_CONFIG
pub fn get_config_path_with_override(override_path: Option<PathBuf>) -> Result<PathBuf> {
    if let Some(path) = override_path {
        return Ok(path);
    }

    env::var(CONFIG_ENV_VAR)
        .map_err(|_| anyhow!("No --config given and {CONFIG_ENV_VAR} is not set"))
        .map(PathBuf::from)
}

pub fn open_pipeline(config: IngestConfig) -> Result<Pipeline> {
    let store = build_object_store(&config.storage)
        .with_context(|| format!("Failed to open storage {}", config.storage.url))?;
    let warehouse = Arc::new(LocalWarehouse::from_config(&config.warehouse));
    Ok(Pipeline::new(config, store, warehouse))
}

/// Tear down the warehouse client; a failure is logged, never returned.
pub async fn close_pipeline(pipeline: &Pipeline) {
    if let Err(e) = pipeline.close().await {
        warn!("Warehouse close failed after retries: {error}", error: e.to_string());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_override_wins() {
        let path = get_config_path_with_override(Some(PathBuf::from("a.yaml"))).unwrap();
        assert_eq!(path, PathBuf::from("a.yaml"));
    }
}
