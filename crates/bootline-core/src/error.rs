//! Failure taxonomy for the build and launch phases.
//!
//! Every error here is terminal: callers propagate it to `main`, which maps it
//! to a process exit status via [`BootError::exit_code`]. Nothing is downgraded
//! to a warning, so a half-built environment never reaches the serving phase.

use std::path::PathBuf;

use thiserror::Error;

/// Recipe or environment configuration is unusable.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read recipe {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse recipe {path}: {message}")]
    Parse { path: PathBuf, message: String },

    #[error("Declared container port {expose} does not match default port {default_port}")]
    PortMismatch { expose: u16, default_port: u16 },

    #[error("Toolchain major version must be non-zero")]
    ZeroMajor,

    #[error("Invalid entry point '{0}': expected '<module.path>:<object>'")]
    InvalidEntry(String),

    #[error("Unknown stage '{0}' (known: python-deps, toolchain, copy, node-deps, frontend-build)")]
    UnknownStage(String),
}

/// A declared dependency or the pinned toolchain cannot be installed.
#[derive(Debug, Error)]
pub enum ProvisioningError {
    #[error("Manifest {path} line {line}: {reason}")]
    Manifest {
        path: PathBuf,
        line: usize,
        reason: String,
    },

    #[error("Manifest not found: {0}")]
    ManifestMissing(PathBuf),

    #[error("No Python interpreter found (tried python3, python)")]
    NoInterpreter,

    #[error("{tool} not found in PATH")]
    ToolMissing { tool: String },

    #[error("`{command}` failed with exit code {code:?}: {stderr}")]
    InstallFailed {
        command: String,
        code: Option<i32>,
        stderr: String,
    },

    #[error("Packages declared but not resolved after install: {}", .0.join(", "))]
    Unresolved(Vec<String>),

    #[error("Toolchain drift: {runtime} {found} present, pinned major is {pinned}")]
    ToolchainDrift {
        runtime: String,
        found: String,
        pinned: u32,
    },

    #[error("{runtime} still missing after provisioning")]
    ToolchainMissing { runtime: String },
}

/// Copying or building artifacts into the install root failed.
#[derive(Debug, Error)]
pub enum AssemblyError {
    #[error("Source tree not found: {0}")]
    MissingSource(PathBuf),

    #[error("Failed to copy {from} -> {to}: {source}")]
    Copy {
        from: PathBuf,
        to: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Entry module for '{entry}' not found under {root}")]
    EntryMissing { entry: String, root: PathBuf },

    #[error("Front-end directory has no package.json: {0}")]
    NoPackageJson(PathBuf),

    #[error("Front-end build `{command}` failed with exit code {code:?}: {stderr}")]
    BuildFailed {
        command: String,
        code: Option<i32>,
        stderr: String,
    },

    #[error("Front-end build `{command}` exceeded timeout of {timeout_secs} seconds")]
    BuildTimedOut { command: String, timeout_secs: u64 },

    #[error("Front-end build produced no output (looked in: {})", .candidates.join(", "))]
    MissingOutput { candidates: Vec<String> },
}

/// The service cannot be started.
#[derive(Debug, Error)]
pub enum LaunchError {
    #[error("Environment at {0} is not ready (no ready marker); run `bootline build` first")]
    NotReady(PathBuf),

    #[error("Ready marker at {path} is unreadable: {message}")]
    BadMarker { path: PathBuf, message: String },

    #[error("Entry point '{entry}' does not resolve: {reason}")]
    EntryUnresolvable { entry: String, reason: String },

    #[error("Port {port} is already bound on 0.0.0.0")]
    PortInUse { port: u16 },

    #[error("Cannot bind port {port}: {source}")]
    Bind {
        port: u16,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid port value '{0}'")]
    InvalidPort(String),

    #[error("Server program '{0}' not found and no Python fallback available")]
    ServerMissing(String),

    #[error("Failed to exec {program}: {source}")]
    Exec {
        program: String,
        #[source]
        source: std::io::Error,
    },
}

/// Top-level error carried to the process boundary.
#[derive(Debug, Error)]
pub enum BootError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Provisioning(#[from] ProvisioningError),

    #[error(transparent)]
    Assembly(#[from] AssemblyError),

    #[error(transparent)]
    Launch(#[from] LaunchError),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl BootError {
    /// Process exit status for this failure class.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Config(_) => 2,
            Self::Provisioning(_) => 3,
            Self::Assembly(_) => 4,
            Self::Launch(_) => 5,
            Self::Other(_) => 1,
        }
    }
}
