//! Dependency installer: pip for the service, npm for the optional front-end.

use std::path::Path;

use bootline_core::config::{FrontendConfig, Recipe};
use bootline_core::manifest::{DependencyManifest, ResolvedSet};
use bootline_core::{AssemblyError, BootError, ProvisioningError};

use crate::process::{find_python, CommandOutcome, CommandRunner, CommandSpec, DEFAULT_BUILD_TIMEOUT_SECS};

/// What the Python install left behind.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PythonInstall {
    pub interpreter: String,
    pub manifest_fingerprint: String,
    pub resolved: ResolvedSet,
}

/// Interpreter from the recipe, else the first of `python3`/`python` on PATH.
pub fn resolve_interpreter(
    runner: &dyn CommandRunner,
    recipe: &Recipe,
) -> Result<String, ProvisioningError> {
    match &recipe.python.interpreter {
        Some(explicit) => Ok(explicit.clone()),
        None => find_python(runner).ok_or(ProvisioningError::NoInterpreter),
    }
}

fn run_install(runner: &dyn CommandRunner, spec: &CommandSpec) -> Result<CommandOutcome, ProvisioningError> {
    let outcome = runner.run(spec).map_err(|e| ProvisioningError::InstallFailed {
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
    Ok(outcome)
}

/// Install the requirements manifest with a fresh resolution (no pip cache),
/// then capture the resolved set from `pip freeze`.
pub fn install_python(
    runner: &dyn CommandRunner,
    recipe: &Recipe,
) -> Result<PythonInstall, ProvisioningError> {
    let manifest_path = recipe.project_root.join(&recipe.python.manifest);
    let manifest = DependencyManifest::load(&manifest_path)?;
    let python = resolve_interpreter(runner, recipe)?;
    tracing::info!(
        manifest = %manifest_path.display(),
        requirements = manifest.requirements.len(),
        interpreter = %python,
        "Installing Python dependencies"
    );

    if manifest.requirements.is_empty() && manifest.options.is_empty() {
        tracing::info!("Manifest declares no packages, skipping pip install");
    } else {
        let install = CommandSpec::new(&python)
            .args(["-m", "pip", "install", "--no-cache-dir", "--disable-pip-version-check", "-r"])
            .arg(manifest_path.to_string_lossy())
            .cwd(&recipe.project_root)
            .env("PIP_NO_CACHE_DIR", "1")
            .timeout_secs(DEFAULT_BUILD_TIMEOUT_SECS)
            .streaming();
        run_install(runner, &install)?;
    }

    let freeze = CommandSpec::new(&python)
        .args(["-m", "pip", "freeze", "--disable-pip-version-check"])
        .cwd(&recipe.project_root)
        .timeout_secs(120);
    let resolved = ResolvedSet::from_freeze(&run_install(runner, &freeze)?.stdout);

    if recipe.python.verify_resolved {
        let missing = resolved.missing(&manifest);
        if !missing.is_empty() {
            return Err(ProvisioningError::Unresolved(missing));
        }
    }
    tracing::info!(packages = resolved.packages.len(), "Python dependencies resolved");

    Ok(PythonInstall {
        interpreter: python,
        manifest_fingerprint: manifest.fingerprint(),
        resolved,
    })
}

/// Install front-end packages: `npm ci` when a lockfile exists (falling back to
/// `npm install` if that fails), `npm install` otherwise.
pub fn install_node(
    runner: &dyn CommandRunner,
    project_root: &Path,
    frontend: &FrontendConfig,
) -> Result<(), BootError> {
    let dir = project_root.join(&frontend.dir);
    if !dir.join("package.json").is_file() {
        return Err(AssemblyError::NoPackageJson(dir).into());
    }
    if !runner.has_program("npm") {
        return Err(ProvisioningError::ToolMissing { tool: "npm".into() }.into());
    }
    let npm = |sub: &str| {
        CommandSpec::new("npm")
            .args([sub, "--no-audit", "--no-fund"])
            .cwd(&dir)
            .timeout_secs(frontend.timeout_secs)
            .streaming()
    };

    if dir.join("package-lock.json").is_file() {
        tracing::info!(dir = %dir.display(), "Installing front-end packages (npm ci)");
        match run_install(runner, &npm("ci")) {
            Ok(_) => return Ok(()),
            Err(e) => tracing::warn!(error = %e, "npm ci failed, retrying with npm install"),
        }
    } else {
        tracing::info!(dir = %dir.display(), "Installing front-end packages (npm install)");
    }
    run_install(runner, &npm("install"))?;
    Ok(())
}
