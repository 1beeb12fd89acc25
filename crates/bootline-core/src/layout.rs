//! Application layout: where sources and static assets live before and after
//! assembly, and how the entry point maps onto a module file.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use regex::Regex;

use crate::config::Recipe;
use crate::error::ConfigError;

fn identifier_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").expect("static regex"))
}

/// `<module.path>:<object>` reference handed to the ASGI server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntryPoint {
    pub module: Vec<String>,
    pub object: String,
}

impl EntryPoint {
    pub fn parse(raw: &str) -> Result<Self, ConfigError> {
        let invalid = || ConfigError::InvalidEntry(raw.to_string());
        let (module, object) = raw.trim().split_once(':').ok_or_else(invalid)?;
        let segments: Vec<String> = module.split('.').map(String::from).collect();
        if segments.iter().any(|s| !identifier_re().is_match(s)) {
            return Err(invalid());
        }
        if !identifier_re().is_match(object) {
            return Err(invalid());
        }
        Ok(Self {
            module: segments,
            object: object.to_string(),
        })
    }

    /// Dotted module path, e.g. `app.main`.
    pub fn module_path(&self) -> String {
        self.module.join(".")
    }

    /// Candidate files implementing the module under `root`: `a/b.py` or `a/b/__init__.py`.
    pub fn module_candidates(&self, root: &Path) -> [PathBuf; 2] {
        let mut base = root.to_path_buf();
        for seg in &self.module {
            base.push(seg);
        }
        [base.with_extension("py"), base.join("__init__.py")]
    }

    /// First existing module file under `root`.
    pub fn locate(&self, root: &Path) -> Option<PathBuf> {
        self.module_candidates(root).into_iter().find(|p| p.is_file())
    }
}

impl fmt::Display for EntryPoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.module_path(), self.object)
    }
}

/// Resolved source → destination paths for one build.
#[derive(Debug, Clone)]
pub struct ApplicationLayout {
    pub project_root: PathBuf,
    pub install_root: PathBuf,
    pub source_from: PathBuf,
    pub source_to: PathBuf,
    pub static_from: PathBuf,
    pub static_to: PathBuf,
    pub exclude: Vec<String>,
}

impl ApplicationLayout {
    pub fn from_recipe(recipe: &Recipe) -> Self {
        let project = &recipe.project_root;
        let install = &recipe.install_root;
        Self {
            project_root: project.clone(),
            install_root: install.clone(),
            source_from: project.join(&recipe.layout.source.from),
            source_to: install.join(&recipe.layout.source.to),
            static_from: project.join(&recipe.layout.static_assets.from),
            static_to: install.join(&recipe.layout.static_assets.to),
            exclude: recipe.layout.exclude.clone(),
        }
    }

    /// Entry modules resolve relative to the install root (the server's working dir).
    pub fn entry_module(&self, entry: &EntryPoint) -> Option<PathBuf> {
        entry.locate(&self.install_root)
    }

    pub fn is_excluded(&self, name: &str) -> bool {
        self.exclude.iter().any(|e| e == name)
    }
}
