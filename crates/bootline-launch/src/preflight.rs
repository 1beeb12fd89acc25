//! Checks run before the server starts. Each one fails fast with a
//! [`LaunchError`], before the server binds anything.

use std::io::ErrorKind;
use std::net::TcpListener;
use std::path::{Path, PathBuf};

use bootline_core::layout::EntryPoint;
use bootline_core::state::ReadyMarker;
use bootline_core::LaunchError;
use bootline_provision::process::{CommandRunner, CommandSpec};

use crate::command::BIND_HOST;

/// Loads the ready marker; `NotReady` when the build never completed.
pub fn check_ready(install_root: &Path) -> Result<ReadyMarker, LaunchError> {
    ReadyMarker::read(install_root)?.ok_or_else(|| LaunchError::NotReady(install_root.to_path_buf()))
}

/// The entry module file must exist under the install root.
pub fn check_entry(install_root: &Path, entry: &EntryPoint) -> Result<PathBuf, LaunchError> {
    entry.locate(install_root).ok_or_else(|| {
        let tried = entry
            .module_candidates(install_root)
            .iter()
            .map(|p| p.display().to_string())
            .collect::<Vec<_>>()
            .join(", ");
        LaunchError::EntryUnresolvable {
            entry: entry.to_string(),
            reason: format!("no module file (tried {tried})"),
        }
    })
}

const IMPORT_PROBE: &str =
    "import importlib, sys; m = importlib.import_module(sys.argv[1]); getattr(m, sys.argv[2])";

/// Import the entry module and read the application object in a throwaway
/// run of `python`, the interpreter the dependencies were installed into.
/// Skipped with a warning when there is none.
pub fn probe_import(
    runner: &dyn CommandRunner,
    python: Option<&str>,
    install_root: &Path,
    entry: &EntryPoint,
    timeout_secs: u64,
) -> Result<(), LaunchError> {
    let Some(python) = python else {
        tracing::warn!("No Python interpreter available, skipping import check");
        return Ok(());
    };
    let spec = CommandSpec::new(python)
        .args(["-c", IMPORT_PROBE])
        .arg(entry.module_path())
        .arg(entry.object.clone())
        .cwd(install_root)
        .timeout_secs(timeout_secs);
    let unresolvable = |reason: String| LaunchError::EntryUnresolvable {
        entry: entry.to_string(),
        reason,
    };

    let outcome = runner.run(&spec).map_err(|e| unresolvable(format!("{e:#}")))?;
    if outcome.timed_out {
        return Err(unresolvable(format!("import did not finish within {timeout_secs}s")));
    }
    if !outcome.success() {
        let last = outcome
            .stderr
            .lines()
            .rev()
            .find(|l| !l.trim().is_empty())
            .unwrap_or("import failed")
            .trim()
            .to_string();
        return Err(unresolvable(last));
    }
    tracing::debug!(entry = %entry, "Import probe passed");
    Ok(())
}

/// Bind and immediately release `0.0.0.0:<port>`.
pub fn probe_port(port: u16) -> Result<(), LaunchError> {
    match TcpListener::bind((BIND_HOST, port)) {
        Ok(listener) => {
            drop(listener);
            Ok(())
        }
        Err(e) if e.kind() == ErrorKind::AddrInUse => Err(LaunchError::PortInUse { port }),
        Err(source) => Err(LaunchError::Bind { port, source }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bootline_provision::process::CommandOutcome;
    use std::cell::RefCell;
    use std::fs;

    /// Answers every command with one canned outcome.
    struct Canned {
        outcome: CommandOutcome,
        seen: RefCell<Vec<String>>,
    }

    impl CommandRunner for Canned {
        fn run(&self, spec: &CommandSpec) -> anyhow::Result<CommandOutcome> {
            self.seen.borrow_mut().push(spec.display());
            Ok(self.outcome.clone())
        }
    }

    fn canned(code: i32, stderr: &str) -> Canned {
        Canned {
            outcome: CommandOutcome {
                code: Some(code),
                stderr: stderr.to_string(),
                ..Default::default()
            },
            seen: RefCell::new(Vec::new()),
        }
    }

    fn entry() -> EntryPoint {
        EntryPoint::parse("app.main:app").unwrap()
    }

    #[test]
    fn test_check_ready_without_marker() {
        let tmp = tempfile::tempdir().unwrap();
        assert!(matches!(check_ready(tmp.path()), Err(LaunchError::NotReady(_))));
    }

    #[test]
    fn test_check_entry() {
        let tmp = tempfile::tempdir().unwrap();
        let err = check_entry(tmp.path(), &entry()).unwrap_err();
        assert!(err.to_string().contains("app.main:app"));

        fs::create_dir_all(tmp.path().join("app")).unwrap();
        fs::write(tmp.path().join("app/main.py"), "app = 1\n").unwrap();
        assert!(check_entry(tmp.path(), &entry()).is_ok());
    }

    #[test]
    fn test_import_probe_reports_last_error_line() {
        let tmp = tempfile::tempdir().unwrap();
        let runner = canned(
            1,
            "Traceback (most recent call last):\n  File \"<string>\", line 1\nAttributeError: module 'app.main' has no attribute 'app'\n",
        );
        let err = probe_import(&runner, Some("python3"), tmp.path(), &entry(), 30).unwrap_err();
        match err {
            LaunchError::EntryUnresolvable { reason, .. } => assert!(reason.starts_with("AttributeError")),
            other => panic!("unexpected error: {other}"),
        }
        assert!(runner.seen.borrow()[0].ends_with("app.main app"));
    }

    #[test]
    fn test_import_probe_passes() {
        let tmp = tempfile::tempdir().unwrap();
        probe_import(&canned(0, ""), Some("python3"), tmp.path(), &entry(), 30).unwrap();
    }

    #[test]
    fn test_import_check_uses_given_interpreter() {
        let tmp = tempfile::tempdir().unwrap();
        let runner = canned(0, "");
        probe_import(&runner, Some("/opt/venv/bin/python"), tmp.path(), &entry(), 30).unwrap();
        assert!(runner.seen.borrow()[0].starts_with("/opt/venv/bin/python -c "));
    }

    #[test]
    fn test_import_check_skipped_without_interpreter() {
        let tmp = tempfile::tempdir().unwrap();
        let runner = canned(1, "boom");
        probe_import(&runner, None, tmp.path(), &entry(), 30).unwrap();
        assert!(runner.seen.borrow().is_empty());
    }

    #[test]
    fn test_port_in_use_is_detected() {
        let held = TcpListener::bind((BIND_HOST, 0)).unwrap();
        let port = held.local_addr().unwrap().port();
        assert!(matches!(probe_port(port), Err(LaunchError::PortInUse { port: p }) if p == port));
        drop(held);
        probe_port(port).unwrap();
    }
}
