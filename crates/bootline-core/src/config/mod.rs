//! Bootline configuration layer
//!
//! All environment reads go through this module; the rest of the workspace
//! sees structured values only.
//!
//! - `loader`: `env_or`, `env_optional`, `env_bool` helpers with alias chains
//! - `recipe`: the `bootline.yaml` schema and its environment overrides
//! - `env_keys`: key constants

pub mod env_keys;
pub mod loader;
pub mod recipe;

pub use loader::{env_bool, env_optional, env_or, process_env, Lookup};
pub use recipe::{
    FrontendConfig, ImageConfig, LaunchConfig, LayoutConfig, PathMapping, PythonConfig, Recipe,
    StagesConfig, ToolchainConfig, ToolchainDescriptor, RECIPE_FILE_NAMES,
};

/// Port used when the platform does not inject `PORT`.
pub const DEFAULT_PORT: u16 = 8080;

/// Fallback values for platform-injected keys, consulted after the environment.
pub const DEFAULTS: &[(&str, u16)] = &[(env_keys::PORT, DEFAULT_PORT)];

/// Look up the documented fallback for a platform-injected key.
pub fn default_for(key: &str) -> Option<u16> {
    DEFAULTS.iter().find(|(k, _)| *k == key).map(|(_, v)| *v)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_table_has_port() {
        assert_eq!(default_for("PORT"), Some(8080));
        assert_eq!(default_for("HOST"), None);
    }
}
