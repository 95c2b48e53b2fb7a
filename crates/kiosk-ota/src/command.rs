use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::thread;
use std::time::{Duration, Instant};

use kiosk_core::OtaError;
use thiserror::Error;
use tracing::debug;

pub const DEFAULT_NETWORK_TIMEOUT: Duration = Duration::from_secs(120);
pub const DEFAULT_LOCAL_TIMEOUT: Duration = Duration::from_secs(30);

const POLL_INTERVAL: Duration = Duration::from_millis(25);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommandTimeouts {
    pub network: Duration,
    pub local: Duration,
}

impl Default for CommandTimeouts {
    fn default() -> Self {
        Self {
            network: DEFAULT_NETWORK_TIMEOUT,
            local: DEFAULT_LOCAL_TIMEOUT,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandClass {
    Network,
    Local,
}

impl CommandTimeouts {
    pub fn for_class(&self, class: CommandClass) -> Duration {
        match class {
            CommandClass::Network => self.network,
            CommandClass::Local => self.local,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    pub program: String,
    pub args: Vec<String>,
    pub cwd: Option<PathBuf>,
    pub envs: Vec<(String, String)>,
    pub timeout: Duration,
}

impl Invocation {
    pub fn new(program: impl Into<String>, timeout: Duration) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            cwd: None,
            envs: Vec::new(),
            timeout,
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

    pub fn current_dir(mut self, cwd: impl AsRef<Path>) -> Self {
        self.cwd = Some(cwd.as_ref().to_path_buf());
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.envs.push((key.into(), value.into()));
        self
    }

    pub fn display(&self) -> String {
        let mut rendered = self.program.clone();
        for arg in &self.args {
            rendered.push(' ');
            rendered.push_str(arg);
        }
        rendered
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CommandError {
    #[error("{program}: executable not found")]
    NotFound { program: String },

    #[error("{command}: failed to start: {detail}")]
    Spawn { command: String, detail: String },

    #[error("{command}: timed out after {}s", .timeout.as_secs())]
    TimedOut { command: String, timeout: Duration },

    #[error("{command}: exited with {exit_code:?}: {stderr}")]
    Failed {
        command: String,
        exit_code: Option<i32>,
        stderr: String,
    },
}

impl CommandError {
    pub fn command(&self) -> &str {
        match self {
            Self::NotFound { program } => program,
            Self::Spawn { command, .. }
            | Self::TimedOut { command, .. }
            | Self::Failed { command, .. } => command,
        }
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::TimedOut { .. })
    }

    /// Network-class failures become network errors; local failures keep
    /// their exit code and stderr.
    pub fn into_ota(self, class: CommandClass) -> OtaError {
        match (class, self) {
            (CommandClass::Network, err) => {
                OtaError::network(err.command().to_string(), err.to_string())
            }
            (
                CommandClass::Local,
                Self::Failed {
                    command,
                    exit_code,
                    stderr,
                },
            ) => OtaError::Command {
                command,
                exit_code,
                stderr,
            },
            (CommandClass::Local, err) => OtaError::Command {
                command: err.command().to_string(),
                exit_code: None,
                stderr: err.to_string(),
            },
        }
    }
}

impl From<CommandError> for OtaError {
    fn from(err: CommandError) -> Self {
        err.into_ota(CommandClass::Local)
    }
}

pub trait CommandRunner: Send + Sync {
    fn run(&self, invocation: &Invocation) -> Result<String, CommandError>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemRunner;

impl CommandRunner for SystemRunner {
    fn run(&self, invocation: &Invocation) -> Result<String, CommandError> {
        let rendered = invocation.display();
        let mut command = Command::new(&invocation.program);
        command
            .args(&invocation.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        if let Some(cwd) = &invocation.cwd {
            command.current_dir(cwd);
        }
        for (key, value) in &invocation.envs {
            command.env(key, value);
        }

        debug!(target: "kiosk::command", command = %rendered, timeout_secs = invocation.timeout.as_secs(), "running command");
        let mut child = command.spawn().map_err(|err| {
            if err.kind() == io::ErrorKind::NotFound {
                CommandError::NotFound {
                    program: invocation.program.clone(),
                }
            } else {
                CommandError::Spawn {
                    command: rendered.clone(),
                    detail: err.to_string(),
                }
            }
        })?;

        let stdout_reader = spawn_pipe_reader(child.stdout.take());
        let stderr_reader = spawn_pipe_reader(child.stderr.take());

        let deadline = Instant::now() + invocation.timeout;
        let status = loop {
            match child.try_wait() {
                Ok(Some(status)) => break status,
                Ok(None) => {}
                Err(err) => {
                    let _ = child.kill();
                    let _ = child.wait();
                    return Err(CommandError::Spawn {
                        command: rendered,
                        detail: err.to_string(),
                    });
                }
            }

            let now = Instant::now();
            if now >= deadline {
                let _ = child.kill();
                let _ = child.wait();
                // Readers are left detached: a grandchild may still hold the pipes open.
                return Err(CommandError::TimedOut {
                    command: rendered,
                    timeout: invocation.timeout,
                });
            }
            thread::sleep(POLL_INTERVAL.min(deadline - now));
        };

        let stdout = stdout_reader.join().unwrap_or_default();
        let stderr = stderr_reader.join().unwrap_or_default();

        if !status.success() {
            return Err(CommandError::Failed {
                command: rendered,
                exit_code: status.code(),
                stderr: String::from_utf8_lossy(&stderr).trim().to_string(),
            });
        }

        Ok(String::from_utf8_lossy(&stdout).into_owned())
    }
}

fn spawn_pipe_reader<R>(pipe: Option<R>) -> thread::JoinHandle<Vec<u8>>
where
    R: Read + Send + 'static,
{
    thread::spawn(move || {
        let mut buffer = Vec::new();
        if let Some(mut pipe) = pipe {
            let _ = pipe.read_to_end(&mut buffer);
        }
        buffer
    })
}
