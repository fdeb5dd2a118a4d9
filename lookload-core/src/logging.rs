//! Logging setup for the loader.
//!
//! The loader emits `tracing` events: `debug!` when requests are queued and
//! batches flush, `info!` once per preload (relation, owner model, record
//! count, merged plan), and `warn!` when a batch fails.
//!
//! # Environment Variables
//!
//! - `LOOKLOAD_DEBUG=true|1|yes` - Enable debug logging
//! - `LOOKLOAD_LOG_LEVEL=trace|debug|info|warn|error` - Set a specific level
//! - `LOOKLOAD_LOG_FORMAT=json|pretty|compact` - Output format (default: json)
//!
//! A subscriber is only installed with the `tracing-subscriber` feature;
//! otherwise events go to whatever subscriber the application set up.
//!
//! ```rust,no_run
//! use lookload_core::logging;
//!
//! logging::init();
//! ```

use std::env;
use std::sync::Once;

static INIT: Once = Once::new();

const DEBUG_VAR: &str = "LOOKLOAD_DEBUG";
const LEVEL_VAR: &str = "LOOKLOAD_LOG_LEVEL";
const FORMAT_VAR: &str = "LOOKLOAD_LOG_FORMAT";

/// Check if debug logging is enabled via `LOOKLOAD_DEBUG`.
#[inline]
pub fn is_debug_enabled() -> bool {
    env::var(DEBUG_VAR)
        .map(|v| parse_flag(&v))
        .unwrap_or(false)
}

fn parse_flag(value: &str) -> bool {
    matches!(value.to_lowercase().as_str(), "true" | "1" | "yes")
}

/// Get the configured log level from `LOOKLOAD_LOG_LEVEL`.
///
/// Defaults to "debug" if `LOOKLOAD_DEBUG` is enabled, otherwise "warn".
pub fn get_log_level() -> &'static str {
    resolve_level(env::var(LEVEL_VAR).ok().as_deref(), is_debug_enabled())
}

fn resolve_level(requested: Option<&str>, debug: bool) -> &'static str {
    let fallback = if debug { "debug" } else { "warn" };
    match requested.map(str::to_lowercase).as_deref() {
        Some("trace") => "trace",
        Some("debug") => "debug",
        Some("info") => "info",
        Some("warn") => "warn",
        Some("error") => "error",
        _ => fallback,
    }
}

/// Get the configured log format from `LOOKLOAD_LOG_FORMAT`.
pub fn get_log_format() -> &'static str {
    resolve_format(env::var(FORMAT_VAR).ok().as_deref())
}

fn resolve_format(requested: Option<&str>) -> &'static str {
    match requested.map(str::to_lowercase).as_deref() {
        Some("pretty") => "pretty",
        Some("compact") => "compact",
        _ => "json",
    }
}

/// Initialize logging. Subsequent calls are no-ops.
pub fn init() {
    INIT.call_once(|| {
        if !is_debug_enabled() && env::var(LEVEL_VAR).is_err() {
            return;
        }

        #[cfg(feature = "tracing-subscriber")]
        {
            use tracing_subscriber::{EnvFilter, fmt, prelude::*};

            let level = get_log_level();
            let filter =
                EnvFilter::try_new(format!("lookload={level},lookload_core={level},lookload_sqlite={level}"))
                    .unwrap_or_else(|_| EnvFilter::new("warn"));

            // `try_init` leaves an application-installed subscriber in place.
            let installed = match get_log_format() {
                "pretty" => tracing_subscriber::registry()
                    .with(filter)
                    .with(fmt::layer().pretty())
                    .try_init(),
                "compact" => tracing_subscriber::registry()
                    .with(filter)
                    .with(fmt::layer().compact())
                    .try_init(),
                _ => tracing_subscriber::registry()
                    .with(filter)
                    .with(fmt::layer().json())
                    .try_init(),
            };

            if installed.is_ok() {
                tracing::info!(level, format = get_log_format(), "lookload logging initialized");
            }
        }
    });
}
