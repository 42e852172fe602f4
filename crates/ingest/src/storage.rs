// SPDX-FileCopyrightText: 2025 Caspar Water Company
//
// SPDX-License-Identifier: Apache-2.0

//! Object storage factory for the export bucket

use std::sync::Arc;

use object_store::ObjectStore;
use object_store::aws::AmazonS3Builder;
use object_store::local::LocalFileSystem;
use object_store::memory::InMemory;

use crate::config::StorageConfig;
use crate::{Error, Result};
use diagnostics::*;

/// Build the object store named by `config.url`.
///
/// `s3://bucket` uses the configured credentials (empty fields fall back to
/// the AWS provider chain), `file:///dir` roots a local store at `dir`, and
/// `memory://` gives an empty in-process store.
pub fn build_object_store(config: &StorageConfig) -> Result<Arc<dyn ObjectStore>> {
    if let Some(url_path) = config.url.strip_prefix("s3://") {
        let bucket = url_path.split('/').next().unwrap_or("");
        if bucket.is_empty() {
            return Err(Error::Config(format!(
                "No bucket in storage url {}",
                config.url
            )));
        }

        let mut builder = AmazonS3Builder::from_env().with_bucket_name(bucket);
        if !config.region.is_empty() {
            builder = builder.with_region(&config.region);
        }
        if !config.access_key.is_empty() {
            builder = builder.with_access_key_id(&config.access_key);
        }
        if !config.secret_key.is_empty() {
            builder = builder.with_secret_access_key(&config.secret_key);
        }
        if !config.endpoint.is_empty() {
            builder = builder.with_endpoint(&config.endpoint);
        }

        let store = builder.build()?;
        debug!("Using S3 bucket {bucket}", bucket);
        Ok(Arc::new(store))
    } else if config.url.starts_with("memory://") {
        Ok(Arc::new(InMemory::new()))
    } else {
        let path = config.url.strip_prefix("file://").unwrap_or(&config.url);
        let store = LocalFileSystem::new_with_prefix(path)?;
        debug!("Using local directory {path}", path);
        Ok(Arc::new(store))
    }
}
