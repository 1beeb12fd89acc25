//! Subprocess execution for build stages.
//!
//! Stages describe work as [`CommandSpec`]s and hand them to a [`CommandRunner`];
//! [`SystemRunner`] is the real implementation, tests substitute a scripted one.

use std::collections::BTreeMap;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};

/// Default wall-clock limit for build subprocesses (pip, npm).
pub const DEFAULT_BUILD_TIMEOUT_SECS: u64 = 600;

/// Poll interval while waiting on a child.
const POLL_INTERVAL_MS: u64 = 100;

/// How long to wait for output readers after a kill before giving up on them.
const DRAIN_GRACE_MS: u64 = 500;

/// Keep this many bytes of stderr in error messages.
const STDERR_TAIL_BYTES: usize = 2000;

/// A program invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    pub program: String,
    pub args: Vec<String>,
    pub cwd: Option<PathBuf>,
    pub env: BTreeMap<String, String>,
    pub timeout: Option<Duration>,
    /// Mirror child output to our stderr while it runs.
    pub stream: bool,
}

impl CommandSpec {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            cwd: None,
            env: BTreeMap::new(),
            timeout: None,
            stream: false,
        }
    }

    /// Build from an argv vector; `None` when empty.
    pub fn from_argv(argv: &[String]) -> Option<Self> {
        let (program, args) = argv.split_first()?;
        Some(Self::new(program.clone()).args(args.iter().cloned()))
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn cwd(mut self, dir: impl AsRef<Path>) -> Self {
        self.cwd = Some(dir.as_ref().to_path_buf());
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    pub fn timeout_secs(mut self, secs: u64) -> Self {
        self.timeout = Some(Duration::from_secs(secs));
        self
    }

    pub fn streaming(mut self) -> Self {
        self.stream = true;
        self
    }

    /// Shell-like rendering for logs and error messages.
    pub fn display(&self) -> String {
        std::iter::once(self.program.as_str())
            .chain(self.args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// Result of a finished (or killed) command.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutcome {
    /// `None` when terminated by a signal or killed on timeout.
    pub code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
    pub timed_out: bool,
}

impl CommandOutcome {
    pub fn success(&self) -> bool {
        self.code == Some(0) && !self.timed_out
    }

    /// Last part of stderr, for error messages.
    pub fn stderr_tail(&self) -> String {
        let s = self.stderr.trim();
        if s.len() <= STDERR_TAIL_BYTES {
            return s.to_string();
        }
        let mut start = s.len() - STDERR_TAIL_BYTES;
        while !s.is_char_boundary(start) {
            start += 1;
        }
        format!("...{}", &s[start..])
    }
}

/// Runs commands on behalf of the build stages.
pub trait CommandRunner {
    /// `Err` only when the program could not be started at all.
    fn run(&self, spec: &CommandSpec) -> Result<CommandOutcome>;

    /// Whether `program` can be found on PATH (or is an existing path).
    fn has_program(&self, program: &str) -> bool {
        find_program(program).is_some()
    }
}

/// Resolve an executable on PATH.
pub fn find_program(program: &str) -> Option<PathBuf> {
    which::which(program).ok()
}

/// First of `python3`, `python` found on PATH.
pub fn find_python(runner: &dyn CommandRunner) -> Option<String> {
    ["python3", "python"]
        .into_iter()
        .find(|name| runner.has_program(name))
        .map(String::from)
}

/// Executes commands as real child processes.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemRunner;

impl CommandRunner for SystemRunner {
    fn run(&self, spec: &CommandSpec) -> Result<CommandOutcome> {
        tracing::debug!(command = %spec.display(), cwd = ?spec.cwd, "Spawning");
        let mut cmd = Command::new(&spec.program);
        cmd.args(&spec.args)
            .envs(&spec.env)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        if let Some(dir) = &spec.cwd {
            cmd.current_dir(dir);
        }
        // Own process group, so a timeout kill reaches every descendant.
        #[cfg(unix)]
        {
            use std::os::unix::process::CommandExt;
            cmd.process_group(0);
        }
        let mut child = cmd
            .spawn()
            .with_context(|| format!("Failed to start `{}`", spec.display()))?;
        wait_with_timeout(&mut child, spec.timeout, spec.stream)
    }
}

/// Output collected from one pipe by a background reader.
struct Drain {
    buf: Arc<Mutex<Vec<u8>>>,
    handle: thread::JoinHandle<()>,
}

impl Drain {
    fn spawn<R: Read + Send + 'static>(mut pipe: R, mirror: bool) -> Self {
        let buf = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&buf);
        let handle = thread::spawn(move || {
            let mut chunk = [0u8; 4096];
            loop {
                match pipe.read(&mut chunk) {
                    Ok(0) | Err(_) => break,
                    Ok(n) => {
                        if let Ok(mut collected) = sink.lock() {
                            collected.extend_from_slice(&chunk[..n]);
                        }
                        if mirror {
                            let mut err = std::io::stderr();
                            let _ = err.write_all(&chunk[..n]);
                            let _ = err.flush();
                        }
                    }
                }
            }
        });
        Self { buf, handle }
    }

    /// Everything read so far.
    fn snapshot(&self) -> String {
        Self::snapshot_of(&self.buf)
    }

    /// Wait for the pipe to close, then return all output.
    fn finish(self) -> String {
        let Self { buf, handle } = self;
        let _ = handle.join();
        Self::snapshot_of(&buf)
    }

    fn snapshot_of(buf: &Mutex<Vec<u8>>) -> String {
        buf.lock()
            .map(|b| String::from_utf8_lossy(&b).into_owned())
            .unwrap_or_default()
    }
}

fn finish(drain: Option<Drain>) -> String {
    drain.map(Drain::finish).unwrap_or_default()
}

/// Output gathered after a kill. A descendant that escaped the kill may still
/// hold the pipe open, so readers get a short grace period and are then left
/// running detached.
fn abandon(drains: [Option<Drain>; 2]) -> [String; 2] {
    let deadline = Instant::now() + Duration::from_millis(DRAIN_GRACE_MS);
    while Instant::now() < deadline
        && drains.iter().flatten().any(|d| !d.handle.is_finished())
    {
        thread::sleep(Duration::from_millis(10));
    }
    drains.map(|d| d.map(|d| d.snapshot()).unwrap_or_default())
}

/// Kill the child and, on Unix, every process in its group.
fn kill_tree(child: &mut Child) {
    #[cfg(unix)]
    {
        use nix::sys::signal::{killpg, Signal};
        use nix::unistd::Pid;

        if let Ok(pid) = i32::try_from(child.id()) {
            if let Err(e) = killpg(Pid::from_raw(pid), Signal::SIGKILL) {
                tracing::debug!(pid, error = %e, "killpg failed");
            }
        }
    }
    let _ = child.kill();
    let _ = child.wait();
}

/// Wait for `child`, killing its process tree once `timeout` elapses.
///
/// stdout/stderr are drained on background threads while the child runs, so a
/// child producing more than a pipe buffer of output never blocks. After a
/// kill the readers are not joined, which keeps the timeout a bound on
/// wall-clock time.
pub fn wait_with_timeout(
    child: &mut Child,
    timeout: Option<Duration>,
    stream: bool,
) -> Result<CommandOutcome> {
    let start = Instant::now();
    let stdout = child.stdout.take().map(|out| Drain::spawn(out, stream));
    let stderr = child.stderr.take().map(|err| Drain::spawn(err, stream));

    loop {
        match child.try_wait() {
            Ok(Some(status)) => {
                return Ok(CommandOutcome {
                    code: status.code(),
                    stdout: finish(stdout),
                    stderr: finish(stderr),
                    timed_out: false,
                });
            }
            Ok(None) => {}
            Err(e) => {
                kill_tree(child);
                abandon([stdout, stderr]);
                return Err(anyhow::anyhow!("Failed to wait for process: {}", e));
            }
        }

        if let Some(limit) = timeout {
            if start.elapsed() > limit {
                kill_tree(child);
                let [stdout, mut stderr] = abandon([stdout, stderr]);
                stderr.push_str(&format!(
                    "\nProcess killed: exceeded timeout of {} seconds",
                    limit.as_secs()
                ));
                return Ok(CommandOutcome {
                    code: None,
                    stdout,
                    stderr,
                    timed_out: true,
                });
            }
        }

        thread::sleep(Duration::from_millis(POLL_INTERVAL_MS));
    }
}
