//! Launch sequence: preflight, then exec into the server.

use bootline_core::config::{Lookup, Recipe};
use bootline_core::layout::EntryPoint;
use bootline_core::observability::record_event;
use bootline_core::state::{Lifecycle, Phase};
use bootline_core::BootError;
use bootline_provision::installer::resolve_interpreter;
use bootline_provision::process::CommandRunner;

use crate::command::LaunchCommand;
use crate::preflight;
use crate::resolve::{resolve_keep_alive, resolve_port_or};

/// Values given on the command line; each wins over environment and recipe.
#[derive(Debug, Clone, Default)]
pub struct LaunchOverrides {
    pub port: Option<u16>,
    pub keep_alive: Option<u64>,
    pub entry: Option<String>,
}

pub struct Launcher<'a> {
    recipe: &'a Recipe,
    runner: &'a dyn CommandRunner,
    overrides: LaunchOverrides,
    dry_run: bool,
}

impl<'a> Launcher<'a> {
    pub fn new(recipe: &'a Recipe, runner: &'a dyn CommandRunner, overrides: LaunchOverrides) -> Self {
        Self {
            recipe,
            runner,
            overrides,
            dry_run: false,
        }
    }

    /// Dry runs skip the import probe and the port bind.
    pub fn dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    /// Run the preflight checks in order and build the server command.
    pub fn prepare(&self, lookup: Lookup<'_>) -> Result<LaunchCommand, BootError> {
        let launch = &self.recipe.launch;
        let install_root = &self.recipe.install_root;
        let entry = EntryPoint::parse(self.overrides.entry.as_deref().unwrap_or(launch.entry.as_str()))?;
        let port = resolve_port_or(self.overrides.port, lookup, launch.default_port)?;
        let keep_alive = resolve_keep_alive(self.overrides.keep_alive, lookup, launch.keep_alive_secs);

        if launch.require_ready {
            let marker = preflight::check_ready(install_root)?;
            if marker.recipe_fingerprint != self.recipe.fingerprint() {
                tracing::warn!(built_at = %marker.built_at, "Recipe changed since the environment was built");
            }
        } else {
            tracing::debug!("Readiness check disabled");
        }

        preflight::check_entry(install_root, &entry)?;
        // Same interpreter the build installed into.
        let python = resolve_interpreter(self.runner, self.recipe).ok();
        if !self.dry_run {
            if launch.verify_import {
                preflight::probe_import(
                    self.runner,
                    python.as_deref(),
                    install_root,
                    &entry,
                    launch.import_timeout_secs,
                )?;
            }
            preflight::probe_port(port)?;
        }

        let cmd = LaunchCommand::build(
            self.runner,
            python.as_deref(),
            &launch.server,
            &entry,
            port,
            keep_alive,
            &launch.server_args,
            install_root.clone(),
        )?;
        tracing::info!(command = %cmd.display(), port, "Preflight passed");
        Ok(cmd)
    }

    /// Prepare and hand over to the server. On Unix this only returns on
    /// failure; elsewhere it returns the server's exit status.
    pub fn launch(&self, lookup: Lookup<'_>) -> Result<i32, BootError> {
        let cmd = self.prepare(lookup)?;
        let mut lifecycle = Lifecycle::at(Phase::Ready);
        lifecycle.advance(Phase::Serving)?;
        record_event("launch", None, "exec", None, &cmd.display());

        let code = match cmd.exec() {
            Ok(code) => code,
            Err(e) => {
                record_event("launch", None, "failed", None, &e.to_string());
                return Err(e.into());
            }
        };
        if code != 0 {
            lifecycle.advance(Phase::Crashed)?;
            tracing::error!(code, "Server exited");
            record_event("launch", None, "crashed", None, &code.to_string());
        }
        Ok(code)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bootline_core::manifest::ResolvedSet;
    use bootline_core::state::ReadyMarker;
    use bootline_core::LaunchError;
    use bootline_provision::process::{CommandOutcome, CommandSpec};
    use std::cell::RefCell;
    use std::collections::HashMap;
    use std::fs;
    use std::net::TcpListener;
    use std::path::Path;

    struct Stub;

    impl CommandRunner for Stub {
        fn run(&self, _: &CommandSpec) -> anyhow::Result<CommandOutcome> {
            Ok(CommandOutcome {
                code: Some(0),
                ..Default::default()
            })
        }
        fn has_program(&self, program: &str) -> bool {
            matches!(program, "uvicorn" | "python3")
        }
    }

    /// Only system `python3` on PATH; records every command it runs.
    #[derive(Default)]
    struct SystemPythonOnly {
        seen: RefCell<Vec<String>>,
    }

    impl CommandRunner for SystemPythonOnly {
        fn run(&self, spec: &CommandSpec) -> anyhow::Result<CommandOutcome> {
            self.seen.borrow_mut().push(spec.display());
            Ok(CommandOutcome {
                code: Some(0),
                ..Default::default()
            })
        }
        fn has_program(&self, program: &str) -> bool {
            program == "python3"
        }
    }

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |k: &str| map.get(k).cloned()
    }

    fn built(root: &Path, with_entry: bool) -> Recipe {
        let mut recipe = Recipe::default();
        recipe.project_root = root.to_path_buf();
        recipe.install_root = root.to_path_buf();
        ReadyMarker {
            phase: Phase::Ready,
            recipe_fingerprint: recipe.fingerprint(),
            manifest_fingerprint: None,
            resolved: ResolvedSet::default(),
            toolchain: None,
            stages: Vec::new(),
            entry: recipe.launch.entry.clone(),
            declared_port: recipe.launch.expose,
            built_at: chrono::Utc::now(),
        }
        .write(root)
        .unwrap();
        if with_entry {
            fs::create_dir_all(root.join("app")).unwrap();
            fs::write(root.join("app/main.py"), "app = object()\n").unwrap();
        }
        recipe
    }

    fn free_port() -> u16 {
        TcpListener::bind(("0.0.0.0", 0)).unwrap().local_addr().unwrap().port()
    }

    #[test]
    fn test_not_ready_without_marker() {
        let tmp = tempfile::tempdir().unwrap();
        let mut recipe = Recipe::default();
        recipe.install_root = tmp.path().to_path_buf();
        let err = Launcher::new(&recipe, &Stub, LaunchOverrides::default())
            .prepare(&env(&[]))
            .unwrap_err();
        assert!(matches!(err, BootError::Launch(LaunchError::NotReady(_))));
        assert_eq!(err.exit_code(), 5);
    }

    #[test]
    fn test_missing_entry_fails_before_port_probe() {
        let tmp = tempfile::tempdir().unwrap();
        let recipe = built(tmp.path(), false);
        let held = TcpListener::bind(("0.0.0.0", 0)).unwrap();
        let port = held.local_addr().unwrap().port().to_string();
        let err = Launcher::new(&recipe, &Stub, LaunchOverrides::default())
            .prepare(&env(&[("PORT", port.as_str())]))
            .unwrap_err();
        assert!(matches!(err, BootError::Launch(LaunchError::EntryUnresolvable { .. })));
    }

    #[test]
    fn test_prepare_uses_port_and_keep_alive_from_env() {
        let tmp = tempfile::tempdir().unwrap();
        let recipe = built(tmp.path(), true);
        let port = free_port().to_string();
        let cmd = Launcher::new(&recipe, &Stub, LaunchOverrides::default())
            .prepare(&env(&[("PORT", port.as_str()), ("KEEP_ALIVE_TIMEOUT", "120")]))
            .unwrap();
        let line = cmd.display();
        assert!(line.starts_with("uvicorn app.main:app --host 0.0.0.0 --port "));
        assert!(line.contains(&format!("--port {port}")));
        assert!(line.ends_with("--timeout-keep-alive 120"));
        assert_eq!(cmd.env.get("PORT"), Some(&port));
        assert_eq!(cmd.cwd, tmp.path());
    }

    #[test]
    fn test_port_in_use_is_a_launch_error() {
        let tmp = tempfile::tempdir().unwrap();
        let recipe = built(tmp.path(), true);
        let held = TcpListener::bind(("0.0.0.0", 0)).unwrap();
        let port = held.local_addr().unwrap().port();
        let overrides = LaunchOverrides {
            port: Some(port),
            ..Default::default()
        };
        let err = Launcher::new(&recipe, &Stub, overrides).prepare(&env(&[])).unwrap_err();
        assert!(matches!(err, BootError::Launch(LaunchError::PortInUse { .. })));
    }

    #[test]
    fn test_dry_run_skips_port_probe_and_cli_entry_wins() {
        let tmp = tempfile::tempdir().unwrap();
        let recipe = built(tmp.path(), true);
        fs::write(tmp.path().join("app/api.py"), "api = object()\n").unwrap();
        let held = TcpListener::bind(("0.0.0.0", 0)).unwrap();
        let overrides = LaunchOverrides {
            port: Some(held.local_addr().unwrap().port()),
            entry: Some("app.api:api".into()),
            ..Default::default()
        };
        let cmd = Launcher::new(&recipe, &Stub, overrides)
            .dry_run(true)
            .prepare(&env(&[]))
            .unwrap();
        assert_eq!(cmd.args[0], "app.api:api");
    }

    #[test]
    fn test_readiness_can_be_disabled() {
        let tmp = tempfile::tempdir().unwrap();
        fs::create_dir_all(tmp.path().join("app")).unwrap();
        fs::write(tmp.path().join("app/main.py"), "").unwrap();
        let mut recipe = Recipe::default();
        recipe.install_root = tmp.path().to_path_buf();
        recipe.launch.require_ready = false;
        let cmd = Launcher::new(&recipe, &Stub, LaunchOverrides::default())
            .dry_run(true)
            .prepare(&env(&[]))
            .unwrap();
        assert!(cmd.display().contains("--port 8080"));
    }

    #[test]
    fn test_configured_interpreter_used_for_import_and_server() {
        let tmp = tempfile::tempdir().unwrap();
        let mut recipe = built(tmp.path(), true);
        recipe.python.interpreter = Some("/opt/venv/bin/python".into());
        recipe.launch.verify_import = true;
        let runner = SystemPythonOnly::default();
        let port = free_port().to_string();
        let cmd = Launcher::new(&recipe, &runner, LaunchOverrides::default())
            .prepare(&env(&[("PORT", port.as_str())]))
            .unwrap();

        let seen = runner.seen.borrow();
        assert_eq!(seen.len(), 1);
        assert!(seen[0].starts_with("/opt/venv/bin/python -c "));
        assert_eq!(cmd.program, "/opt/venv/bin/python");
        assert!(cmd.display().starts_with("/opt/venv/bin/python -m uvicorn app.main:app"));
    }
}
