//! `bootline.yaml` schema.
//!
//! Every section has defaults, so a missing recipe describes a Python-only
//! service with the conventional `app/` + `static/` layout. The presence of a
//! `frontend` section is the capability flag for the Node stages.

use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use super::env_keys::{launch as launch_keys, recipe as recipe_keys, toolchain as tc_keys};
use super::loader::{env_bool_with, env_optional_with, Lookup};
use super::DEFAULT_PORT;
use crate::error::ConfigError;
use crate::layout::EntryPoint;
use crate::state::Stage;

/// File names probed (in order) when no recipe path is given.
pub const RECIPE_FILE_NAMES: &[&str] = &["bootline.yaml", "bootline.yml", ".bootline.yaml"];

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Recipe {
    /// Build context holding the sources.
    pub project_root: PathBuf,
    /// Destination root inside the execution environment.
    pub install_root: PathBuf,
    pub python: PythonConfig,
    pub frontend: Option<FrontendConfig>,
    pub toolchain: ToolchainConfig,
    pub layout: LayoutConfig,
    pub launch: LaunchConfig,
    pub stages: StagesConfig,
    pub image: ImageConfig,
}

impl Default for Recipe {
    fn default() -> Self {
        Self {
            project_root: PathBuf::from("."),
            install_root: PathBuf::from("/app"),
            python: PythonConfig::default(),
            frontend: None,
            toolchain: ToolchainConfig::default(),
            layout: LayoutConfig::default(),
            launch: LaunchConfig::default(),
            stages: StagesConfig::default(),
            image: ImageConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PythonConfig {
    /// Interpreter to use; `None` probes `python3` then `python`.
    pub interpreter: Option<String>,
    /// Requirements file, relative to `project_root`.
    pub manifest: PathBuf,
    /// Check every declared package shows up in `pip freeze` after install.
    pub verify_resolved: bool,
}

impl Default for PythonConfig {
    fn default() -> Self {
        Self {
            interpreter: None,
            manifest: PathBuf::from("requirements.txt"),
            verify_resolved: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FrontendConfig {
    /// Front-end project directory, relative to `project_root`.
    pub dir: PathBuf,
    /// npm script producing the static build.
    pub script: String,
    /// Build output directory relative to `dir`; probed when unset.
    pub output: Option<PathBuf>,
    pub timeout_secs: u64,
    /// Optional subdirectory of the static destination receiving the output.
    pub dest_subdir: Option<PathBuf>,
}

impl Default for FrontendConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("frontend"),
            script: "build".to_string(),
            output: None,
            timeout_secs: 600,
            dest_subdir: None,
        }
    }
}

/// The pinned secondary runtime.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolchainDescriptor {
    pub runtime: String,
    pub major: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ToolchainConfig {
    pub runtime: String,
    pub major: u32,
    /// argv templates; `{major}` is substituted before running.
    pub install: Vec<Vec<String>>,
    pub cleanup_commands: Vec<Vec<String>>,
    /// Directories whose contents are removed after install.
    pub cleanup_paths: Vec<PathBuf>,
}

impl Default for ToolchainConfig {
    fn default() -> Self {
        let argv = |parts: &[&str]| parts.iter().map(|s| s.to_string()).collect::<Vec<_>>();
        Self {
            runtime: "node".to_string(),
            major: 20,
            // Slim base images ship without curl or apt package lists.
            install: vec![
                argv(&["apt-get", "update"]),
                argv(&["apt-get", "install", "-y", "--no-install-recommends", "curl", "ca-certificates"]),
                argv(&[
                    "bash",
                    "-c",
                    "set -o pipefail && curl -fsSL https://deb.nodesource.com/setup_{major}.x | bash -",
                ]),
                argv(&["apt-get", "install", "-y", "--no-install-recommends", "nodejs"]),
            ],
            cleanup_commands: vec![argv(&["apt-get", "clean"])],
            cleanup_paths: vec![PathBuf::from("/var/lib/apt/lists")],
        }
    }
}

impl ToolchainConfig {
    pub fn descriptor(&self) -> ToolchainDescriptor {
        ToolchainDescriptor {
            runtime: self.runtime.clone(),
            major: self.major,
        }
    }

    /// Install commands with the pinned major substituted.
    pub fn install_commands(&self) -> Vec<Vec<String>> {
        let major = self.major.to_string();
        self.install
            .iter()
            .map(|argv| argv.iter().map(|a| a.replace("{major}", &major)).collect())
            .collect()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PathMapping {
    /// Relative to `project_root`.
    pub from: PathBuf,
    /// Relative to `install_root`.
    pub to: PathBuf,
}

impl PathMapping {
    fn same(p: &str) -> Self {
        Self {
            from: PathBuf::from(p),
            to: PathBuf::from(p),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LayoutConfig {
    pub source: PathMapping,
    #[serde(rename = "static")]
    pub static_assets: PathMapping,
    /// Directory names never copied.
    pub exclude: Vec<String>,
}

impl Default for LayoutConfig {
    fn default() -> Self {
        Self {
            source: PathMapping::same("app"),
            static_assets: PathMapping::same("static"),
            exclude: vec![
                "__pycache__".to_string(),
                "node_modules".to_string(),
                ".git".to_string(),
            ],
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LaunchConfig {
    /// `<module.path>:<object>`.
    pub entry: String,
    /// ASGI server executable.
    pub server: String,
    /// Extra arguments appended after the managed flags.
    pub server_args: Vec<String>,
    pub keep_alive_secs: Option<u64>,
    pub default_port: u16,
    /// Port declared to the platform; must equal `default_port`.
    pub expose: u16,
    pub require_ready: bool,
    pub verify_import: bool,
    pub import_timeout_secs: u64,
}

impl Default for LaunchConfig {
    fn default() -> Self {
        Self {
            entry: "app.main:app".to_string(),
            server: "uvicorn".to_string(),
            server_args: Vec::new(),
            keep_alive_secs: None,
            default_port: DEFAULT_PORT,
            expose: DEFAULT_PORT,
            require_ready: true,
            verify_import: true,
            import_timeout_secs: 30,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct StagesConfig {
    pub skip: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ImageConfig {
    pub base: String,
    /// Path (in the build context) of the bootline binary copied into the image.
    pub binary: String,
}

impl Default for ImageConfig {
    fn default() -> Self {
        Self {
            base: "python:3.11-slim".to_string(),
            binary: "bootline".to_string(),
        }
    }
}

impl Recipe {
    /// Parse a recipe file. Relative `project_root` is anchored at the file's directory.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let mut recipe = Self::from_yaml(&content).map_err(|e| ConfigError::Parse {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;
        if recipe.project_root.is_relative() {
            if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
                recipe.project_root = dir.join(&recipe.project_root);
            }
        }
        Ok(recipe)
    }

    pub fn from_yaml(content: &str) -> Result<Self, serde_yaml::Error> {
        if content.trim().is_empty() {
            return Ok(Self::default());
        }
        serde_yaml::from_str(content)
    }

    /// Locate and load the recipe: explicit path, then `BOOTLINE_RECIPE`, then
    /// the conventional file names in `cwd`, then built-in defaults. Environment
    /// overrides are applied and the result validated.
    pub fn resolve(
        explicit: Option<&Path>,
        cwd: &Path,
        lookup: Lookup<'_>,
    ) -> Result<Self, ConfigError> {
        let from_env = env_optional_with(lookup, recipe_keys::BOOTLINE_RECIPE, &[]).map(PathBuf::from);
        let path = explicit
            .map(Path::to_path_buf)
            .or(from_env)
            .map(|p| if p.is_relative() { cwd.join(p) } else { p })
            .or_else(|| {
                RECIPE_FILE_NAMES
                    .iter()
                    .map(|n| cwd.join(n))
                    .find(|p| p.is_file())
            });

        let mut recipe = match path {
            Some(p) => {
                tracing::debug!(recipe = %p.display(), "Loading recipe");
                Self::load(&p)?
            }
            None => {
                tracing::debug!("No recipe file found, using defaults");
                let mut r = Self::default();
                r.project_root = cwd.to_path_buf();
                r
            }
        };
        recipe.apply_env(lookup);
        recipe.validate()?;
        Ok(recipe)
    }

    /// Overlay environment values onto the recipe.
    pub fn apply_env(&mut self, lookup: Lookup<'_>) {
        if let Some(root) = env_optional_with(lookup, recipe_keys::BOOTLINE_INSTALL_ROOT, &[]) {
            self.install_root = PathBuf::from(root);
        }
        if let Some(entry) =
            env_optional_with(lookup, launch_keys::BOOTLINE_ENTRY, launch_keys::ENTRY_ALIASES)
        {
            self.launch.entry = entry;
        }
        if let Some(raw) = env_optional_with(
            lookup,
            launch_keys::BOOTLINE_KEEP_ALIVE,
            launch_keys::KEEP_ALIVE_ALIASES,
        ) {
            match raw.parse::<u64>() {
                Ok(secs) => self.launch.keep_alive_secs = Some(secs),
                Err(_) => tracing::warn!(value = %raw, "Ignoring non-numeric keep-alive override"),
            }
        }
        if let Some(raw) = env_optional_with(
            lookup,
            tc_keys::BOOTLINE_NODE_MAJOR,
            tc_keys::NODE_MAJOR_ALIASES,
        ) {
            match raw.trim_start_matches('v').parse::<u32>() {
                Ok(major) => self.toolchain.major = major,
                Err(_) => tracing::warn!(value = %raw, "Ignoring non-numeric toolchain major override"),
            }
        }
        if let Some(list) = env_optional_with(lookup, recipe_keys::BOOTLINE_SKIP_STAGES, &[]) {
            self.stages.skip.extend(
                list.split(',')
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(String::from),
            );
        }
        if lookup(recipe_keys::BOOTLINE_FRONTEND).is_some() {
            let enabled = env_bool_with(lookup, recipe_keys::BOOTLINE_FRONTEND, &[], self.frontend.is_some());
            if !enabled {
                self.frontend = None;
            } else if self.frontend.is_none() {
                self.frontend = Some(FrontendConfig::default());
            }
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.launch.expose != self.launch.default_port {
            return Err(ConfigError::PortMismatch {
                expose: self.launch.expose,
                default_port: self.launch.default_port,
            });
        }
        if self.toolchain.major == 0 {
            return Err(ConfigError::ZeroMajor);
        }
        EntryPoint::parse(&self.launch.entry)?;
        for name in &self.stages.skip {
            Stage::from_str(name)?;
        }
        Ok(())
    }

    /// Stages named in `stages.skip`; call after [`Recipe::validate`].
    pub fn skipped_stages(&self) -> Vec<Stage> {
        self.stages
            .skip
            .iter()
            .filter_map(|s| Stage::from_str(s).ok())
            .collect()
    }

    pub fn entry(&self) -> Result<EntryPoint, ConfigError> {
        EntryPoint::parse(&self.launch.entry)
    }

    /// Stable hash of the build-relevant recipe, recorded in the ready marker.
    /// The `launch` section is excluded: it is overlaid from the environment
    /// on every start and never invalidates a build.
    pub fn fingerprint(&self) -> String {
        let mut value = serde_json::to_value(self).unwrap_or_default();
        if let Some(map) = value.as_object_mut() {
            map.remove("launch");
        }
        let mut hasher = Sha256::new();
        hasher.update(serde_json::to_vec(&value).unwrap_or_default());
        hex::encode(hasher.finalize())
    }
}
