// SPDX-FileCopyrightText: 2025 Caspar Water Company
//
// SPDX-License-Identifier: Apache-2.0

//! Ingestion configuration, loaded from YAML
//!
//! Every section is optional except `storage.url`; omitted fields take the
//! defaults below, which reproduce the behaviour of the survey loaders.

use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::discovery::DEFAULT_TREATED_SUFFIX;
use crate::{Error, Result};

/// Where the parquet exports live
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StorageConfig {
    /// "s3://bucket", "file:///path/to/dir" or "memory://"
    pub url: String,

    /// AWS region (for S3)
    #[serde(default)]
    pub region: String,

    /// AWS access key
    #[serde(default)]
    pub access_key: String,

    /// AWS secret key
    #[serde(default)]
    pub secret_key: String,

    /// Custom S3 endpoint (for MinIO, R2, etc.)
    #[serde(default)]
    pub endpoint: String,

    /// Prefix under which category directories are found
    #[serde(default)]
    pub base_path: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SelectionConfig {
    /// Keep only the newest hour bucket
    #[serde(default = "default_only_recent")]
    pub only_recent: bool,

    /// Cap on files read per run; 0 or absent means no cap
    #[serde(default)]
    pub max_files: Option<usize>,
}

fn default_only_recent() -> bool {
    true
}

impl Default for SelectionConfig {
    fn default() -> Self {
        Self {
            only_recent: default_only_recent(),
            max_files: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiscoveryConfig {
    #[serde(default = "default_treated_suffix")]
    pub treated_suffix: String,
}

fn default_treated_suffix() -> String {
    DEFAULT_TREATED_SUFFIX.to_string()
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            treated_suffix: default_treated_suffix(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReaderConfig {
    /// Non-null values sampled per column by the all-strings tier
    #[serde(default = "default_promotion_sample_size")]
    pub promotion_sample_size: usize,

    /// Share of the sample that must parse for numeric re-promotion
    #[serde(default = "default_promotion_threshold")]
    pub promotion_threshold: f64,
}

fn default_promotion_sample_size() -> usize {
    100
}

fn default_promotion_threshold() -> f64 {
    0.8
}

impl Default for ReaderConfig {
    fn default() -> Self {
        Self {
            promotion_sample_size: default_promotion_sample_size(),
            promotion_threshold: default_promotion_threshold(),
        }
    }
}

/// Column-name rules and thresholds for type inference
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InferenceConfig {
    /// Columns always kept as STRING
    #[serde(default = "default_string_columns")]
    pub string_columns: Vec<String>,

    /// Columns parsed as DATETIME (or kept as STRING when they do not parse)
    #[serde(default = "default_date_columns")]
    pub date_columns: Vec<String>,

    /// Name fragments marking a column as a likely identifier
    #[serde(default = "default_id_indicators")]
    pub id_indicators: Vec<String>,

    /// Shortest digit string treated as an identifier
    #[serde(default = "default_min_id_digits")]
    pub min_id_digits: usize,

    /// Share of non-null values that must parse for a numeric column
    #[serde(default = "default_numeric_threshold")]
    pub numeric_threshold: f64,

    /// Currency symbols stripped before numeric parsing
    #[serde(default = "default_currency_markers")]
    pub currency_markers: Vec<String>,
}

fn strings(values: &[&str]) -> Vec<String> {
    values.iter().map(|v| v.to_string()).collect()
}

fn default_string_columns() -> Vec<String> {
    strings(&[
        "ID_ONDA",
        "ID_ESCOLA",
        "CO_ENTIDADE",
        "ID_AGENTE",
        "CO_REGIAO",
        "CO_UF",
        "CO_MUNICIPIO",
        "KEY",
        "id_aluno",
        "subjectId",
        "assessmentUid",
        "id",
        "guest_grade",
    ])
}

fn default_date_columns() -> Vec<String> {
    strings(&[
        "DATA",
        "SubmissionDate",
        "DATA_HORA",
        "timeFinished",
        "timeStarted",
        "created",
        "lastUpdated",
    ])
}

fn default_id_indicators() -> Vec<String> {
    strings(&["id", "cod", "code", "codigo", "number", "num", "identificador"])
}

fn default_min_id_digits() -> usize {
    5
}

fn default_numeric_threshold() -> f64 {
    0.99
}

fn default_currency_markers() -> Vec<String> {
    strings(&["R$"])
}

impl Default for InferenceConfig {
    fn default() -> Self {
        Self {
            string_columns: default_string_columns(),
            date_columns: default_date_columns(),
            id_indicators: default_id_indicators(),
            min_id_digits: default_min_id_digits(),
            numeric_threshold: default_numeric_threshold(),
            currency_markers: default_currency_markers(),
        }
    }
}

/// What to do with incoming columns the persisted table does not have
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UnknownColumnPolicy {
    /// Leave them out of the load and log a warning
    #[default]
    Drop,
    /// Fail the load
    Reject,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AlignmentConfig {
    #[serde(default)]
    pub unknown_columns: UnknownColumnPolicy,
}

/// Destination tables
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WarehouseConfig {
    /// Directory of the local warehouse
    #[serde(default = "default_warehouse_root")]
    pub root: String,

    #[serde(default = "default_project")]
    pub project: String,

    #[serde(default = "default_dataset")]
    pub dataset: String,
}

fn default_warehouse_root() -> String {
    "warehouse".to_string()
}

fn default_project() -> String {
    "local".to_string()
}

fn default_dataset() -> String {
    "raw".to_string()
}

impl Default for WarehouseConfig {
    fn default() -> Self {
        Self {
            root: default_warehouse_root(),
            project: default_project(),
            dataset: default_dataset(),
        }
    }
}

/// Complete configuration of an ingestion run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestConfig {
    pub storage: StorageConfig,

    #[serde(default)]
    pub selection: SelectionConfig,

    #[serde(default)]
    pub discovery: DiscoveryConfig,

    #[serde(default)]
    pub reader: ReaderConfig,

    #[serde(default)]
    pub inference: InferenceConfig,

    #[serde(default)]
    pub alignment: AlignmentConfig,

    /// Rows sharing a value in this column are collapsed to the first one
    #[serde(default = "default_dedupe_column")]
    pub dedupe_column: Option<String>,

    #[serde(default)]
    pub warehouse: WarehouseConfig,

    /// Category to table mapping loaded by a multi-table run
    #[serde(default)]
    pub tables: BTreeMap<String, String>,
}

fn default_dedupe_column() -> Option<String> {
    Some("KEY".to_string())
}

impl IngestConfig {
    /// Defaults everywhere, reading from the given storage URL
    pub fn with_storage_url(url: impl Into<String>) -> Self {
        Self {
            storage: StorageConfig {
                url: url.into(),
                ..Default::default()
            },
            selection: SelectionConfig::default(),
            discovery: DiscoveryConfig::default(),
            reader: ReaderConfig::default(),
            inference: InferenceConfig::default(),
            alignment: AlignmentConfig::default(),
            dedupe_column: default_dedupe_column(),
            warehouse: WarehouseConfig::default(),
            tables: BTreeMap::new(),
        }
    }

    /// Fill empty credentials from `AWS_ACCESS_KEY_ID`, `AWS_SECRET_ACCESS_KEY`
    /// and `AWS_REGION`. Values set in the file win.
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let fields = [
            ("AWS_ACCESS_KEY_ID", &mut self.storage.access_key),
            ("AWS_SECRET_ACCESS_KEY", &mut self.storage.secret_key),
            ("AWS_REGION", &mut self.storage.region),
        ];
        for (key, field) in fields {
            if field.is_empty() {
                if let Some(value) = lookup(key) {
                    *field = value;
                }
            }
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.storage.url.is_empty() {
            return Err(Error::Config("storage.url cannot be empty".to_string()));
        }
        let supported = ["s3://", "file://", "memory://"];
        if !supported.iter().any(|p| self.storage.url.starts_with(p)) {
            return Err(Error::Config(format!(
                "storage.url must start with one of {}: {}",
                supported.join(", "),
                self.storage.url
            )));
        }
        if self.reader.promotion_sample_size == 0 {
            return Err(Error::Config(
                "reader.promotion_sample_size must be greater than 0".to_string(),
            ));
        }
        for (name, value) in [
            ("reader.promotion_threshold", self.reader.promotion_threshold),
            ("inference.numeric_threshold", self.inference.numeric_threshold),
        ] {
            if !(value > 0.0 && value <= 1.0) {
                return Err(Error::Config(format!("{name} must be in (0, 1]: {value}")));
            }
        }
        if self.discovery.treated_suffix.is_empty() {
            return Err(Error::Config(
                "discovery.treated_suffix cannot be empty".to_string(),
            ));
        }
        if self.warehouse.dataset.is_empty() || self.warehouse.project.is_empty() {
            return Err(Error::Config(
                "warehouse.project and warehouse.dataset cannot be empty".to_string(),
            ));
        }
        Ok(())
    }
}

/// Load configuration from YAML file
pub fn load_config<P: AsRef<Path>>(path: P) -> Result<IngestConfig> {
    let content = std::fs::read_to_string(&path).map_err(|e| {
        Error::Config(format!(
            "Failed to read config file {}: {}",
            path.as_ref().display(),
            e
        ))
    })?;
    let mut config: IngestConfig = serde_yaml_ng::from_str(&content)?;
    config.apply_env_overrides();
    config.validate()?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_minimal_yaml_takes_defaults() {
        let config: IngestConfig = serde_yaml_ng::from_str("storage:\n  url: s3://surveys\n").unwrap();
        assert!(config.selection.only_recent);
        assert_eq!(config.selection.max_files, None);
        assert_eq!(config.discovery.treated_suffix, "tratados");
        assert_eq!(config.reader.promotion_sample_size, 100);
        assert_eq!(config.inference.min_id_digits, 5);
        assert!(config.inference.string_columns.iter().any(|c| c == "KEY"));
        assert_eq!(config.alignment.unknown_columns, UnknownColumnPolicy::Drop);
        assert_eq!(config.dedupe_column.as_deref(), Some("KEY"));
        assert!(config.tables.is_empty());
        config.validate().unwrap();
    }

    #[test]
    fn test_table_mapping() {
        let yaml = "storage:\n  url: s3://surveys\ntables:\n  alunos: alunos\n  gestores: gestores_2024\n";
        let config: IngestConfig = serde_yaml_ng::from_str(yaml).unwrap();
        assert_eq!(config.tables.len(), 2);
        assert_eq!(config.tables["gestores"], "gestores_2024");
    }

    #[test]
    fn test_overrides_fill_only_empty_fields() {
        let mut config = IngestConfig::with_storage_url("s3://surveys");
        config.storage.region = "sa-east-1".to_string();
        config.apply_overrides(|key| Some(format!("env-{key}")));
        assert_eq!(config.storage.access_key, "env-AWS_ACCESS_KEY_ID");
        assert_eq!(config.storage.secret_key, "env-AWS_SECRET_ACCESS_KEY");
        assert_eq!(config.storage.region, "sa-east-1");
    }

    #[test]
    fn test_validation_errors() {
        let mut config = IngestConfig::with_storage_url("ftp://nope");
        assert!(matches!(config.validate(), Err(Error::Config(_))));

        config.storage.url = "memory://".to_string();
        config.inference.numeric_threshold = 1.5;
        assert!(matches!(config.validate(), Err(Error::Config(_))));
    }

    #[test]
    fn test_load_config_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            "storage:\n  url: file:///tmp/exports\n  base_path: tratados\nselection:\n  max_files: 3\nalignment:\n  unknown_columns: reject\ndedupe_column: null"
        )
        .unwrap();

        let config = load_config(file.path()).unwrap();
        assert_eq!(config.storage.base_path, "tratados");
        assert_eq!(config.selection.max_files, Some(3));
        assert_eq!(config.alignment.unknown_columns, UnknownColumnPolicy::Reject);
        assert_eq!(config.dedupe_column, None);
    }

    #[test]
    fn test_missing_file_is_config_error() {
        assert!(matches!(
            load_config("/definitely/not/here.yaml"),
            Err(Error::Config(_))
        ));
    }
}
