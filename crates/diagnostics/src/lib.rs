//! Logging for the driftload workspace
//!
//! Thin layer over `emit` so every crate logs the same way and only the
//! binary decides where events go.
//!
//! Usage:
//! - Set DRIFTLOAD_LOG=off (default) - no logs
//! - Set DRIFTLOAD_LOG=warn - degraded reads, skipped files, failed loads
//! - Set DRIFTLOAD_LOG=info - ingestion progress
//! - Set DRIFTLOAD_LOG=debug - per-variant discovery and per-column decisions

use std::sync::Once;

// Re-export emit so macros can use it
pub use emit;

/// Environment variable that selects the minimum level
pub const LOG_ENV_VAR: &str = "DRIFTLOAD_LOG";

static INIT: Once = Once::new();

/// Map a `DRIFTLOAD_LOG` value to a minimum level.
///
/// `Ok(None)` means logging is switched off. Unknown values are returned
/// as `Err` so the caller can fall back to `info` and say so.
pub fn parse_level(value: &str) -> Result<Option<emit::Level>, String> {
    match value.trim().to_ascii_lowercase().as_str() {
        "" | "off" => Ok(None),
        "debug" => Ok(Some(emit::Level::Debug)),
        "info" => Ok(Some(emit::Level::Info)),
        "warn" => Ok(Some(emit::Level::Warn)),
        "error" => Ok(Some(emit::Level::Error)),
        other => Err(other.to_string()),
    }
}

/// Initialize diagnostics based on the DRIFTLOAD_LOG environment variable
///
/// Call once at binary startup. Subsequent calls are ignored.
pub fn init_diagnostics() {
    INIT.call_once(|| {
        let raw = std::env::var(LOG_ENV_VAR).unwrap_or_else(|_| "off".to_string());

        let (level, unknown) = match parse_level(&raw) {
            Ok(None) => return,
            Ok(Some(level)) => (level, None),
            Err(value) => (emit::Level::Info, Some(value)),
        };

        let rt = emit::setup()
            .emit_to(emit_term::stderr())
            .emit_when(emit::level::min_filter(level))
            .init();

        if let Some(value) = unknown {
            emit::warn!(
                "Unknown {var} value {value}, using info",
                var: LOG_ENV_VAR,
                value
            );
        }

        // The runtime lives for the whole process.
        std::mem::forget(rt);
    });
}

/// Progress of an ingestion run (files found, rows loaded, tier used)
#[macro_export]
macro_rules! info {
    ($($arg:tt)*) => {
        $crate::emit::info!($($arg)*)
    };
}

/// Per-column and per-path detail, useful when a schema comes out wrong
#[macro_export]
macro_rules! debug {
    ($($arg:tt)*) => {
        $crate::emit::debug!($($arg)*)
    };
}

/// Recoverable degradation: a skipped file, a failed read tier, a dropped column
#[macro_export]
macro_rules! warn {
    ($($arg:tt)*) => {
        $crate::emit::warn!($($arg)*)
    };
}

/// Failures returned to the caller (exhausted reads, rejected loads)
#[macro_export]
macro_rules! error {
    ($($arg:tt)*) => {
        $crate::emit::error!($($arg)*)
    };
}

/// Re-export the init function for convenience
pub use init_diagnostics as init;
