// SPDX-FileCopyrightText: 2025 Caspar Water Company
//
// SPDX-License-Identifier: Apache-2.0

//! Hour-bucket recency selection over timestamped partial exports
//!
//! Upstream jobs drop a new batch of files every run without removing the
//! old ones. The files written by the latest run share a clock hour, so we
//! group everything by hour and keep only the newest group.

use std::collections::BTreeMap;
use std::sync::LazyLock;

use chrono::{DateTime, NaiveDate, Utc};
use diagnostics::*;
use regex::Regex;
use sha2::{Digest, Sha256};

/// Seconds in one bucket
pub const BUCKET_SECONDS: i64 = 3600;

/// Upper bound (exclusive) of hash-derived pseudo-timestamps
pub const FALLBACK_RANGE: u64 = 10_000_000_000;

static ISO_DATE: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"(\d{4})-(\d{2})-(\d{2})").ok());
static DIGIT_RUN: LazyLock<Option<Regex>> = LazyLock::new(|| Regex::new(r"\d+").ok());

/// A file offered to the selector
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CandidateFile {
    pub path: String,
    /// Modification time reported by storage
    pub modified: Option<DateTime<Utc>>,
    /// Seconds since the epoch, when known without storage metadata
    pub inferred_timestamp: Option<i64>,
}

impl CandidateFile {
    /// A listed file; the filename timestamp is extracted eagerly.
    pub fn new(path: impl Into<String>, modified: Option<DateTime<Utc>>) -> Self {
        let path = path.into();
        let inferred_timestamp = extract_timestamp_from_filename(file_name(&path));
        Self {
            path,
            modified,
            inferred_timestamp,
        }
    }

    /// A file whose metadata could not be obtained; it lands in the epoch bucket.
    pub fn unresolved(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            modified: None,
            inferred_timestamp: Some(0),
        }
    }
}

/// Files whose resolved timestamps share a clock hour
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HourBucket {
    /// Start of the hour, seconds since the epoch
    pub hour: i64,
    /// Sorted newest first
    pub files: Vec<(i64, CandidateFile)>,
}

fn file_name(path: &str) -> &str {
    path.rsplit('/').next().unwrap_or(path)
}

/// Pull a date or unix time out of a file name.
///
/// Tried in order: `YYYY-MM-DD`, a digit run opening with `YYYYMMDD`, a
/// 13-digit millisecond time and a 10-digit second time. Dates are
/// midnight UTC.
pub fn extract_timestamp_from_filename(name: &str) -> Option<i64> {
    if let Some(re) = ISO_DATE.as_ref() {
        for caps in re.captures_iter(name) {
            let (y, m, d) = (&caps[1], &caps[2], &caps[3]);
            if let Some(ts) = date_to_timestamp(y, m, d) {
                return Some(ts);
            }
        }
    }

    let runs: Vec<&str> = DIGIT_RUN
        .as_ref()
        .map(|re| re.find_iter(name).map(|m| m.as_str()).collect())
        .unwrap_or_default();

    // A run that starts with a calendar date is a date, whatever follows
    for run in runs.iter().filter(|r| r.len() >= 8) {
        if let Some(ts) = date_to_timestamp(&run[0..4], &run[4..6], &run[6..8]) {
            return Some(ts);
        }
    }
    for len in [13, 10] {
        if let Some(run) = runs.iter().find(|r| r.len() >= len) {
            return run[..10].parse().ok();
        }
    }
    None
}

fn date_to_timestamp(year: &str, month: &str, day: &str) -> Option<i64> {
    let date = NaiveDate::from_ymd_opt(year.parse().ok()?, month.parse().ok()?, day.parse().ok()?)?;
    Some(date.and_hms_opt(0, 0, 0)?.and_utc().timestamp())
}

/// Stable pseudo-timestamp for a name with no recoverable date.
///
/// Only meaningful for ordering; the value does not correspond to real time.
pub fn fallback_timestamp(name: &str) -> i64 {
    let digest = Sha256::digest(name.as_bytes());
    let mut head = [0u8; 8];
    head.copy_from_slice(&digest[..8]);
    (u64::from_be_bytes(head) % FALLBACK_RANGE) as i64
}

/// Timestamp used for bucketing: storage mtime, then file name, then hash.
pub fn resolve_timestamp(file: &CandidateFile) -> i64 {
    if let Some(modified) = file.modified {
        return modified.timestamp();
    }
    if let Some(ts) = file.inferred_timestamp {
        return ts;
    }
    let fallback = fallback_timestamp(file_name(&file.path));
    debug!(
        "No timestamp for {path}, using hash fallback {fallback}",
        path: file.path.as_str(),
        fallback
    );
    fallback
}

fn hour_of(ts: i64) -> i64 {
    if ts <= 0 {
        0
    } else {
        ts - ts.rem_euclid(BUCKET_SECONDS)
    }
}

/// Partition files into hour buckets, each sorted newest first.
pub fn group_by_hour(files: &[CandidateFile]) -> BTreeMap<i64, HourBucket> {
    let mut buckets: BTreeMap<i64, HourBucket> = BTreeMap::new();
    for file in files {
        let ts = resolve_timestamp(file).max(0);
        let hour = hour_of(ts);
        buckets
            .entry(hour)
            .or_insert_with(|| HourBucket {
                hour,
                files: Vec::new(),
            })
            .files
            .push((ts, file.clone()));
    }
    for bucket in buckets.values_mut() {
        bucket
            .files
            .sort_by(|(ta, a), (tb, b)| tb.cmp(ta).then_with(|| a.path.cmp(&b.path)));
    }
    buckets
}

/// Files of the newest hour bucket, newest first, capped at `max_files`.
///
/// `None` and `Some(0)` both mean no cap. An empty input gives an empty result.
pub fn select_most_recent(files: &[CandidateFile], max_files: Option<usize>) -> Vec<CandidateFile> {
    let buckets = group_by_hour(files);
    let Some((_, bucket)) = buckets.into_iter().next_back() else {
        return Vec::new();
    };

    let mut selected: Vec<CandidateFile> = bucket.files.into_iter().map(|(_, f)| f).collect();
    if let Some(max) = max_files.filter(|m| *m > 0) {
        selected.truncate(max);
    }

    info!(
        "Selected {count} of {total} files from hour {hour}",
        count: selected.len(),
        total: files.len(),
        hour: bucket.hour
    );
    selected
}
