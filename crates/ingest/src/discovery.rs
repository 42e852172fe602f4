// SPDX-FileCopyrightText: 2025 Caspar Water Company
//
// SPDX-License-Identifier: Apache-2.0

//! Parquet discovery across the path layouts upstream jobs have used
//!
//! The same category has been written as `base/agente/`, `base/agentes/`,
//! `base/agente/agente_tratados/` and `base/agente_agente/` over time.
//! Variants are tried in a fixed order and the first one holding any
//! parquet wins; results are never merged across variants.

use std::collections::BTreeMap;

use futures::TryStreamExt;
use object_store::ObjectStore;
use object_store::path::Path;

use crate::recency::CandidateFile;
use diagnostics::*;

/// Default suffix of the "treated" sub-directory
pub const DEFAULT_TREATED_SUFFIX: &str = "tratados";

/// Candidate prefixes for a category, highest priority first.
///
/// The category is lower-cased. Variants that normalise to the same
/// storage prefix appear once.
pub fn path_variants(base: &str, category: &str, suffix: &str) -> Vec<String> {
    let base = base.trim_end_matches('/');
    let cat = category.trim().to_lowercase();
    let join = |rest: String| {
        if base.is_empty() {
            rest
        } else {
            format!("{base}/{rest}")
        }
    };

    let raw = [
        join(cat.clone()),
        join(format!("{cat}/")),
        join(format!("{cat}s/")),
        join(format!("{cat}/{cat}_{suffix}/")),
        join(format!("{cat}_{cat}/")),
    ];

    let mut seen = Vec::<String>::new();
    let mut variants = Vec::new();
    for variant in raw {
        let key = Path::from(variant.as_str()).to_string();
        if !seen.contains(&key) {
            seen.push(key);
            variants.push(variant);
        }
    }
    variants
}

fn is_parquet(path: &Path) -> bool {
    path.extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("parquet"))
}

/// List the parquet files under one prefix; listing failures count as none.
async fn list_parquet(store: &dyn ObjectStore, prefix: &str) -> Vec<CandidateFile> {
    let prefix = Path::from(prefix);
    let listed: Result<Vec<_>, _> = store.list(Some(&prefix)).try_collect().await;
    match listed {
        Ok(objects) => {
            // BTreeMap dedups and orders by path
            let files: BTreeMap<String, CandidateFile> = objects
                .into_iter()
                .filter(|meta| is_parquet(&meta.location))
                .map(|meta| {
                    let path = meta.location.to_string();
                    (
                        path.clone(),
                        CandidateFile::new(path, Some(meta.last_modified)),
                    )
                })
                .collect();
            files.into_values().collect()
        }
        Err(e) => {
            debug!(
                "Listing {prefix} failed: {error}",
                prefix: prefix.to_string(),
                error: e.to_string()
            );
            Vec::new()
        }
    }
}

/// Try the path variants of `category` and return the first non-empty listing.
///
/// An empty result means "no data" for the category, never an error.
pub async fn discover_parquet_files(
    store: &dyn ObjectStore,
    base: &str,
    category: &str,
    suffix: &str,
) -> Vec<CandidateFile> {
    for variant in path_variants(base, category, suffix) {
        let files = list_parquet(store, &variant).await;
        if files.is_empty() {
            debug!("No parquet files under {variant}", variant: variant.as_str());
            continue;
        }
        info!(
            "Found {count} parquet files in {variant}",
            count: files.len(),
            variant: variant.as_str()
        );
        return files;
    }
    warn!("No parquet files found for category {category}", category);
    Vec::new()
}
