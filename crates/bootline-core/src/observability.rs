//! Observability: tracing init and the stage event log.
//!
//! Reads BOOTLINE_QUIET, BOOTLINE_LOG_LEVEL, BOOTLINE_LOG_JSON and
//! BOOTLINE_EVENT_LOG through the config loader.

use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use chrono::Utc;
use serde_json::json;
use tracing_subscriber::{prelude::*, EnvFilter};

use crate::config::env_keys::observability as keys;
use crate::config::{env_bool, env_optional, env_or};

/// INFO for the binary and every library crate.
pub const DEFAULT_LOG_LEVEL: &str =
    "bootline=info,bootline_core=info,bootline_provision=info,bootline_launch=info";

#[derive(Debug, Clone)]
pub struct ObservabilityConfig {
    pub quiet: bool,
    pub log_level: String,
    pub log_json: bool,
    pub event_log: Option<PathBuf>,
}

impl ObservabilityConfig {
    pub fn from_env() -> &'static Self {
        static CACHE: OnceLock<ObservabilityConfig> = OnceLock::new();
        CACHE.get_or_init(|| Self {
            quiet: env_bool(keys::BOOTLINE_QUIET, &[], false),
            log_level: env_or(keys::BOOTLINE_LOG_LEVEL, &[], || DEFAULT_LOG_LEVEL.to_string()),
            log_json: env_bool(keys::BOOTLINE_LOG_JSON, &[], false),
            event_log: env_optional(keys::BOOTLINE_EVENT_LOG, &[]).map(PathBuf::from),
        })
    }
}

/// Filter directives for the configured mode. BOOTLINE_LOG_LEVEL is used
/// as given, so it governs the library crates as well.
fn filter_directives(cfg: &ObservabilityConfig, verbose: bool) -> String {
    if cfg.quiet {
        "warn".to_string()
    } else if verbose {
        "bootline=debug,bootline_core=debug,bootline_provision=debug,bootline_launch=debug"
            .to_string()
    } else {
        cfg.log_level.clone()
    }
}

/// Initialize tracing once at process start. `RUST_LOG` wins over
/// BOOTLINE_LOG_LEVEL; quiet mode keeps WARN and above.
pub fn init_tracing(verbose: bool) {
    let cfg = ObservabilityConfig::from_env();
    let level = filter_directives(cfg, verbose);

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&level));

    // Logs go to stderr; stdout is reserved for command output (plan/status/render).
    let _ = if cfg.log_json {
        tracing_subscriber::registry()
            .with(filter)
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_writer(std::io::stderr)
                    .with_target(true),
            )
            .try_init()
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(
                tracing_subscriber::fmt::layer()
                    .with_writer(std::io::stderr)
                    .with_target(true),
            )
            .try_init()
    };
}

fn append_jsonl(path: &Path, record: &serde_json::Value) {
    if let Some(parent) = path.parent() {
        let _ = std::fs::create_dir_all(parent);
    }
    if let Ok(mut f) = OpenOptions::new().create(true).append(true).open(path) {
        if let Ok(line) = serde_json::to_string(record) {
            let _ = writeln!(f, "{}", line);
        }
    }
}

/// Append a build or launch event to BOOTLINE_EVENT_LOG, if configured.
pub fn record_event(event: &str, stage: Option<&str>, status: &str, duration_ms: Option<u64>, detail: &str) {
    if let Some(path) = ObservabilityConfig::from_env().event_log.as_deref() {
        write_event(path, event, stage, status, duration_ms, detail);
    }
}

pub(crate) fn write_event(
    path: &Path,
    event: &str,
    stage: Option<&str>,
    status: &str,
    duration_ms: Option<u64>,
    detail: &str,
) {
    let record = json!({
        "ts": Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Millis, true),
        "event": event,
        "stage": stage,
        "status": status,
        "duration_ms": duration_ms,
        "detail": detail,
    });
    append_jsonl(path, &record);
}
