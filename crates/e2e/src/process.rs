//! Managed process - spawning and tearing down the server under test

use std::fs::File;
use std::path::PathBuf;
use std::process::{Child, Command, ExitStatus, Stdio};
use std::thread::sleep;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::{E2eError, E2eResult};

/// Grace period used when a handle is dropped without an explicit terminate.
pub const DEFAULT_SHUTDOWN_GRACE: Duration = Duration::from_secs(15);

const EXIT_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Where the server's stdout/stderr go
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum ServerOutput {
    #[default]
    Inherit,
    Null,
    /// Both streams appended to this file
    File(PathBuf),
}

/// Command line for a long-running process
#[derive(Debug, Clone)]
pub struct ServerCommand {
    pub program: String,
    pub args: Vec<String>,
    pub current_dir: Option<PathBuf>,
    pub env: Vec<(String, String)>,
    pub output: ServerOutput,
}

impl ServerCommand {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            current_dir: None,
            env: Vec::new(),
            output: ServerOutput::default(),
        }
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

    pub fn current_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.current_dir = Some(dir.into());
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    pub fn output(mut self, output: ServerOutput) -> Self {
        self.output = output;
        self
    }

    /// Program and arguments joined for log lines
    pub fn display(&self) -> String {
        std::iter::once(self.program.as_str())
            .chain(self.args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ")
    }

    fn to_command(&self) -> E2eResult<Command> {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args).stdin(Stdio::null());

        if let Some(dir) = &self.current_dir {
            cmd.current_dir(dir);
        }
        for (key, value) in &self.env {
            cmd.env(key, value);
        }

        match &self.output {
            ServerOutput::Inherit => {}
            ServerOutput::Null => {
                cmd.stdout(Stdio::null()).stderr(Stdio::null());
            }
            ServerOutput::File(path) => {
                let log = File::options().create(true).append(true).open(path)?;
                let log_clone = log.try_clone()?;
                cmd.stdout(Stdio::from(log)).stderr(Stdio::from(log_clone));
            }
        }

        Ok(cmd)
    }
}

/// Lifecycle of a managed process
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", content = "exit_code", rename_all = "snake_case")]
pub enum ProcessState {
    NotStarted,
    Running,
    /// Exited on its own or after the graceful signal
    Exited(Option<i32>),
    KillRequested,
    Killed,
}

impl ProcessState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, ProcessState::Exited(_) | ProcessState::Killed)
    }
}

/// How a process was brought down
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShutdownReport {
    /// `true` unless the grace period ran out and the process was killed
    pub graceful: bool,
    pub waited_ms: u64,
    pub final_state: ProcessState,
}

/// Exclusively owned handle to a child process.
///
/// Dropping a running handle terminates it: SIGTERM, then SIGKILL once
/// [`DEFAULT_SHUTDOWN_GRACE`] has passed.
pub struct ManagedProcess {
    command: ServerCommand,
    child: Option<Child>,
    state: ProcessState,
}

impl ManagedProcess {
    pub fn new(command: ServerCommand) -> Self {
        Self {
            command,
            child: None,
            state: ProcessState::NotStarted,
        }
    }

    /// Create and start in one step
    pub fn spawn(command: ServerCommand) -> E2eResult<Self> {
        let mut process = Self::new(command);
        process.start()?;
        Ok(process)
    }

    pub fn start(&mut self) -> E2eResult<()> {
        if self.state != ProcessState::NotStarted {
            return Err(E2eError::ServerStartup(format!(
                "{} was already started",
                self.command.display()
            )));
        }

        info!("Spawning `{}`", self.command.display());
        if let Some(dir) = &self.command.current_dir {
            debug!("Working dir: {}", dir.display());
        }

        let child = self.command.to_command()?.spawn().map_err(|e| {
            E2eError::ServerStartup(format!("Failed to spawn `{}`: {}", self.command.display(), e))
        })?;

        info!("Started pid {}", child.id());
        self.child = Some(child);
        self.state = ProcessState::Running;
        Ok(())
    }

    pub fn command(&self) -> &ServerCommand {
        &self.command
    }

    pub fn pid(&self) -> Option<u32> {
        self.child.as_ref().map(Child::id)
    }

    pub fn state(&self) -> ProcessState {
        self.state
    }

    /// Non-blocking exit check; records a spontaneous exit.
    pub fn try_wait(&mut self) -> E2eResult<Option<ExitStatus>> {
        let Some(child) = self.child.as_mut() else {
            return Ok(None);
        };
        if self.state != ProcessState::Running {
            return Ok(None);
        }

        let status = child.try_wait()?;
        if let Some(status) = status {
            debug!("pid {} exited with {}", child.id(), status);
            self.state = ProcessState::Exited(status.code());
        }
        Ok(status)
    }

    pub fn is_running(&mut self) -> bool {
        matches!(self.try_wait(), Ok(None)) && self.state == ProcessState::Running
    }

    /// Graceful termination, then a forced kill after `grace`.
    ///
    /// The child is always reaped before this returns `Ok`.
    pub fn terminate(&mut self, grace: Duration) -> E2eResult<ShutdownReport> {
        let start = Instant::now();
        let already_stopped = ShutdownReport {
            graceful: true,
            waited_ms: 0,
            final_state: self.state,
        };

        if self.state != ProcessState::Running {
            return Ok(already_stopped);
        }
        // Errors propagate: an unknown child state must not count as stopped.
        if self.try_wait()?.is_some() {
            return Ok(ShutdownReport {
                final_state: self.state,
                ..already_stopped
            });
        }

        let Some(child) = self.child.as_mut() else {
            return Ok(already_stopped);
        };

        info!("Terminating server process (pid: {})", child.id());
        send_graceful_signal(child)?;

        loop {
            if let Some(status) = child.try_wait()? {
                self.state = ProcessState::Exited(status.code());
                info!("Server process terminated cleanly ({})", status);
                return Ok(ShutdownReport {
                    graceful: true,
                    waited_ms: start.elapsed().as_millis() as u64,
                    final_state: self.state,
                });
            }
            let remaining = grace.saturating_sub(start.elapsed());
            if remaining.is_zero() {
                break;
            }
            sleep(EXIT_POLL_INTERVAL.min(remaining));
        }

        warn!(
            "Server did not exit within {:?}, killing pid {}",
            grace,
            child.id()
        );
        self.state = ProcessState::KillRequested;

        // Fails with InvalidInput only if the child was already reaped.
        if let Err(e) = child.kill() {
            debug!("kill after grace period: {}", e);
        }
        child.wait()?;
        self.state = ProcessState::Killed;

        Ok(ShutdownReport {
            graceful: false,
            waited_ms: start.elapsed().as_millis() as u64,
            final_state: self.state,
        })
    }
}

impl Drop for ManagedProcess {
    fn drop(&mut self) {
        if self.state == ProcessState::Running {
            if let Err(e) = self.terminate(DEFAULT_SHUTDOWN_GRACE) {
                warn!("Failed to stop `{}`: {}", self.command.display(), e);
                if let Some(child) = self.child.as_mut() {
                    let _ = child.kill();
                    let _ = child.wait();
                }
            }
        }
    }
}

#[cfg(unix)]
fn send_graceful_signal(child: &mut Child) -> E2eResult<()> {
    use nix::errno::Errno;
    use nix::sys::signal::{kill, Signal};
    use nix::unistd::Pid;

    let pid = Pid::from_raw(child.id() as i32);
    match kill(pid, Signal::SIGTERM) {
        // Exited between the liveness check and the signal
        Ok(()) | Err(Errno::ESRCH) => Ok(()),
        Err(e) => Err(E2eError::Io(e.into())),
    }
}

#[cfg(not(unix))]
fn send_graceful_signal(child: &mut Child) -> E2eResult<()> {
    child.kill()?;
    Ok(())
}
