//! The server command line handed to `exec`.

use std::collections::BTreeMap;
use std::path::PathBuf;

use bootline_core::config::env_keys;
use bootline_core::layout::EntryPoint;
use bootline_core::LaunchError;
use bootline_provision::process::CommandRunner;
use serde::Serialize;

/// Bind address; the server must be reachable from outside the container.
pub const BIND_HOST: &str = "0.0.0.0";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LaunchCommand {
    pub program: String,
    pub args: Vec<String>,
    pub cwd: PathBuf,
    pub env: BTreeMap<String, String>,
}

impl LaunchCommand {
    /// `<server> <entry> --host 0.0.0.0 --port <port> [--timeout-keep-alive <secs>] <extra…>`
    ///
    /// When `server` is not on PATH it runs as `<python> -m <server>` instead.
    pub fn build(
        runner: &dyn CommandRunner,
        python: Option<&str>,
        server: &str,
        entry: &EntryPoint,
        port: u16,
        keep_alive: Option<u64>,
        extra: &[String],
        cwd: PathBuf,
    ) -> Result<Self, LaunchError> {
        let (program, mut args) = if runner.has_program(server) {
            (server.to_string(), Vec::new())
        } else {
            let python = python.ok_or_else(|| LaunchError::ServerMissing(server.to_string()))?;
            tracing::info!(server, python, "Server not on PATH, running as a module");
            (python.to_string(), vec!["-m".to_string(), server.to_string()])
        };

        args.extend([
            entry.to_string(),
            "--host".to_string(),
            BIND_HOST.to_string(),
            "--port".to_string(),
            port.to_string(),
        ]);
        if let Some(secs) = keep_alive {
            args.push("--timeout-keep-alive".to_string());
            args.push(secs.to_string());
        }
        args.extend(extra.iter().cloned());

        let env = BTreeMap::from([(env_keys::PORT.to_string(), port.to_string())]);
        Ok(Self { program, args, cwd, env })
    }

    pub fn display(&self) -> String {
        std::iter::once(self.program.as_str())
            .chain(self.args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ")
    }

    fn command(&self) -> std::process::Command {
        let mut cmd = std::process::Command::new(&self.program);
        cmd.args(&self.args).current_dir(&self.cwd).envs(&self.env);
        cmd
    }

    /// Replace the current process with the server. Only returns on failure.
    #[cfg(unix)]
    pub fn exec(&self) -> Result<i32, LaunchError> {
        use std::os::unix::process::CommandExt;

        let err = self.command().exec();
        Err(LaunchError::Exec {
            program: self.program.clone(),
            source: err,
        })
    }

    /// Run the server as a child and return its exit status.
    #[cfg(not(unix))]
    pub fn exec(&self) -> Result<i32, LaunchError> {
        let status = self
            .command()
            .status()
            .map_err(|source| LaunchError::Exec {
                program: self.program.clone(),
                source,
            })?;
        Ok(status.code().unwrap_or(1))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bootline_provision::process::{CommandOutcome, CommandSpec};
    use std::collections::HashSet;

    struct OnPath(HashSet<&'static str>);

    impl CommandRunner for OnPath {
        fn run(&self, _: &CommandSpec) -> anyhow::Result<CommandOutcome> {
            anyhow::bail!("not used")
        }
        fn has_program(&self, program: &str) -> bool {
            self.0.contains(program)
        }
    }

    fn entry() -> EntryPoint {
        EntryPoint::parse("app.main:app").unwrap()
    }

    #[test]
    fn test_uvicorn_command_line() {
        let runner = OnPath(HashSet::from(["uvicorn"]));
        let cmd = LaunchCommand::build(&runner, None, "uvicorn", &entry(), 8080, None, &[], "/app".into()).unwrap();
        assert_eq!(cmd.display(), "uvicorn app.main:app --host 0.0.0.0 --port 8080");
        assert_eq!(cmd.env.get("PORT").map(String::as_str), Some("8080"));
        assert_eq!(cmd.cwd, PathBuf::from("/app"));
    }

    #[test]
    fn test_keep_alive_and_extra_args() {
        let runner = OnPath(HashSet::from(["uvicorn"]));
        let extra = vec!["--proxy-headers".to_string()];
        let cmd =
            LaunchCommand::build(&runner, None, "uvicorn", &entry(), 5000, Some(120), &extra, "/app".into()).unwrap();
        assert_eq!(
            cmd.args,
            vec![
                "app.main:app",
                "--host",
                "0.0.0.0",
                "--port",
                "5000",
                "--timeout-keep-alive",
                "120",
                "--proxy-headers"
            ]
        );
    }

    #[test]
    fn test_falls_back_to_python_module() {
        let runner = OnPath(HashSet::from(["python3"]));
        let python = Some("/opt/venv/bin/python");
        let cmd = LaunchCommand::build(&runner, python, "uvicorn", &entry(), 8080, None, &[], "/app".into()).unwrap();
        assert_eq!(cmd.program, "/opt/venv/bin/python");
        assert!(cmd.display().starts_with("/opt/venv/bin/python -m uvicorn app.main:app"));
    }

    #[test]
    fn test_no_server_no_python() {
        let runner = OnPath(HashSet::new());
        let err = LaunchCommand::build(&runner, None, "uvicorn", &entry(), 8080, None, &[], "/app".into()).unwrap_err();
        assert!(matches!(err, LaunchError::ServerMissing(_)));
    }
}
