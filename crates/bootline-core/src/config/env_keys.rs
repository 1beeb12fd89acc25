//! Environment variable keys.
//!
//! Primary names use the `BOOTLINE_` prefix; aliases cover names that
//! platforms and older recipes already set.

/// Injected by the orchestration platform.
pub const PORT: &str = "PORT";

pub mod recipe {
    pub const BOOTLINE_RECIPE: &str = "BOOTLINE_RECIPE";
    pub const BOOTLINE_INSTALL_ROOT: &str = "BOOTLINE_INSTALL_ROOT";
    pub const BOOTLINE_SKIP_STAGES: &str = "BOOTLINE_SKIP_STAGES";
    /// Front-end capability switch: `0`/`false` disables, `1`/`true` enables with defaults.
    pub const BOOTLINE_FRONTEND: &str = "BOOTLINE_FRONTEND";
}

pub mod launch {
    pub const BOOTLINE_ENTRY: &str = "BOOTLINE_ENTRY";
    pub const ENTRY_ALIASES: &[&str] = &["APP_MODULE"];

    pub const BOOTLINE_KEEP_ALIVE: &str = "BOOTLINE_KEEP_ALIVE";
    pub const KEEP_ALIVE_ALIASES: &[&str] = &["KEEP_ALIVE_TIMEOUT"];
}

pub mod toolchain {
    pub const BOOTLINE_NODE_MAJOR: &str = "BOOTLINE_NODE_MAJOR";
    pub const NODE_MAJOR_ALIASES: &[&str] = &["NODE_MAJOR"];
}

pub mod observability {
    pub const BOOTLINE_QUIET: &str = "BOOTLINE_QUIET";
    pub const BOOTLINE_LOG_LEVEL: &str = "BOOTLINE_LOG_LEVEL";
    pub const BOOTLINE_LOG_JSON: &str = "BOOTLINE_LOG_JSON";
    /// JSONL file receiving stage and launch events.
    pub const BOOTLINE_EVENT_LOG: &str = "BOOTLINE_EVENT_LOG";
}
