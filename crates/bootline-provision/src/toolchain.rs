//! Pinned secondary runtime (Node.js by default).
//!
//! Only one major version may be active. An existing install of a different
//! major is drift and fails the build instead of being replaced.

use std::path::Path;

use bootline_core::config::ToolchainConfig;
use bootline_core::ProvisioningError;

use crate::process::{CommandRunner, CommandSpec, DEFAULT_BUILD_TIMEOUT_SECS};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ToolchainStatus {
    /// The pinned major was already installed; nothing ran.
    AlreadyPresent(String),
    Installed(String),
}

impl ToolchainStatus {
    pub fn version(&self) -> &str {
        match self {
            Self::AlreadyPresent(v) | Self::Installed(v) => v,
        }
    }
}

/// Major component of `v20.11.1`, `20.11.1` or `20`.
pub fn parse_major(version: &str) -> Option<u32> {
    version
        .trim()
        .trim_start_matches('v')
        .split('.')
        .next()?
        .parse()
        .ok()
}

/// `<runtime> --version`, or `None` when the runtime is absent or silent.
pub fn probe_version(runner: &dyn CommandRunner, runtime: &str) -> Option<String> {
    if !runner.has_program(runtime) {
        return None;
    }
    let outcome = runner
        .run(&CommandSpec::new(runtime).arg("--version").timeout_secs(30))
        .ok()?;
    if !outcome.success() {
        return None;
    }
    let version = outcome.stdout.trim().to_string();
    (!version.is_empty()).then_some(version)
}

fn check_pinned(cfg: &ToolchainConfig, version: &str) -> Result<(), ProvisioningError> {
    if parse_major(version) == Some(cfg.major) {
        Ok(())
    } else {
        Err(ProvisioningError::ToolchainDrift {
            runtime: cfg.runtime.clone(),
            found: version.to_string(),
            pinned: cfg.major,
        })
    }
}

/// Make sure the pinned major is installed system-wide.
pub fn provision(
    runner: &dyn CommandRunner,
    cfg: &ToolchainConfig,
) -> Result<ToolchainStatus, ProvisioningError> {
    if let Some(version) = probe_version(runner, &cfg.runtime) {
        check_pinned(cfg, &version)?;
        tracing::info!(runtime = %cfg.runtime, version = %version, "Pinned toolchain already present");
        return Ok(ToolchainStatus::AlreadyPresent(version));
    }

    tracing::info!(runtime = %cfg.runtime, major = cfg.major, "Installing pinned toolchain");
    for argv in cfg.install_commands() {
        let Some(spec) = CommandSpec::from_argv(&argv) else {
            continue;
        };
        let spec = spec.timeout_secs(DEFAULT_BUILD_TIMEOUT_SECS).streaming();
        let outcome = runner.run(&spec).map_err(|e| ProvisioningError::InstallFailed {
            command: spec.display(),
            code: None,
            stderr: format!("{e:#}"),
        })?;
        if !outcome.success() {
            return Err(ProvisioningError::InstallFailed {
                command: spec.display(),
                code: outcome.code,
                stderr: outcome.stderr_tail(),
            });
        }
    }

    cleanup(runner, cfg);

    let version = probe_version(runner, &cfg.runtime).ok_or_else(|| {
        ProvisioningError::ToolchainMissing {
            runtime: cfg.runtime.clone(),
        }
    })?;
    check_pinned(cfg, &version)?;
    tracing::info!(runtime = %cfg.runtime, version = %version, "Toolchain installed");
    Ok(ToolchainStatus::Installed(version))
}

/// Drop package-index and cache state left by the install. Failures only warn:
/// a larger image is still a correct one.
pub fn cleanup(runner: &dyn CommandRunner, cfg: &ToolchainConfig) {
    for argv in &cfg.cleanup_commands {
        let Some(spec) = CommandSpec::from_argv(argv) else {
            continue;
        };
        match runner.run(&spec) {
            Ok(o) if o.success() => {}
            Ok(o) => tracing::warn!(command = %spec.display(), code = ?o.code, "Cleanup command failed"),
            Err(e) => tracing::warn!(command = %spec.display(), error = %e, "Cleanup command failed"),
        }
    }
    for dir in &cfg.cleanup_paths {
        if let Err(e) = clear_dir(dir) {
            tracing::warn!(path = %dir.display(), error = %e, "Failed to clear cache directory");
        }
    }
}

/// Remove the contents of `dir`, keeping the directory itself.
fn clear_dir(dir: &Path) -> std::io::Result<()> {
    if !dir.is_dir() {
        return Ok(());
    }
    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();
        if path.is_dir() {
            std::fs::remove_dir_all(&path)?;
        } else {
            std::fs::remove_file(&path)?;
        }
    }
    Ok(())
}
