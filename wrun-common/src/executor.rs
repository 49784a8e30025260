//! Runs requested executables from a fixed base directory.
//!
//! The executor is the default server action: it decodes a [`Command`],
//! resolves the executable strictly inside its base directory, runs it with
//! that directory as the working directory, and encodes the [`ExecResult`].

use std::ffi::OsString;
use std::io;
use std::path::{Component, Path, PathBuf, Prefix};
use std::process::{ExitStatus, Stdio};

use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};

use crate::errors::{ErrorCode, HandlerError};
use crate::protocol::{Command, ExecResult};
use crate::server::Action;
use crate::util::mask_command_line;

/// Per-instance executor settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutorConfig {
    /// Directory that holds the executables; also the working directory.
    pub base_dir: PathBuf,
    /// Return the child's standard error in the result.
    pub capture_stderr: bool,
}

impl ExecutorConfig {
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
            capture_stderr: false,
        }
    }

    pub fn with_capture_stderr(mut self, capture_stderr: bool) -> Self {
        self.capture_stderr = capture_stderr;
        self
    }
}

/// Reasons an executable could not be run.
#[derive(Debug, Error)]
pub enum ExecError {
    #[error("invalid executable name '{0}'")]
    InvalidName(String),

    #[error("executable not found: {}", .0.display())]
    NotFound(PathBuf),

    #[error("failed to launch {}: {source}", .path.display())]
    Launch {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("invalid base directory {}: {reason}", .path.display())]
    BaseDir { path: PathBuf, reason: String },

    #[error("child process IO failed: {0}")]
    Io(#[source] io::Error),
}

impl ExecError {
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::InvalidName(_) => ErrorCode::ExecInvalidName,
            Self::NotFound(_) => ErrorCode::ExecNotFound,
            Self::Launch { .. } => ErrorCode::ExecLaunchFailed,
            Self::BaseDir { .. } => ErrorCode::ExecBaseDirInvalid,
            Self::Io(_) => ErrorCode::ExecIo,
        }
    }
}

/// Longest path the non-verbatim Win32 APIs accept.
const MAX_PLAIN_PATH: usize = 260;

/// Rewrite a Windows verbatim path (`\\?\C:\jobs`, `\\?\UNC\host\share`) into
/// its plain form. `canonicalize` returns verbatim paths on Windows, and
/// `cmd.exe` refuses them as a working directory. Other paths pass through.
fn strip_verbatim(path: PathBuf) -> PathBuf {
    let plain_prefix = match path.components().next() {
        Some(Component::Prefix(prefix)) => match prefix.kind() {
            Prefix::VerbatimDisk(drive) => Some(OsString::from(format!("{}:", drive as char))),
            Prefix::VerbatimUNC(server, share) => {
                let mut unc = OsString::from(r"\\");
                unc.push(server);
                unc.push(r"\");
                unc.push(share);
                Some(unc)
            }
            _ => None,
        },
        _ => None,
    };
    let Some(mut plain) = plain_prefix else {
        return path;
    };

    let rest: PathBuf = path.components().skip(1).collect();
    plain.push(rest.as_os_str());
    if plain.len() >= MAX_PLAIN_PATH {
        return path;
    }
    PathBuf::from(plain)
}

#[derive(Debug, Clone)]
pub struct Executor {
    base_dir: PathBuf,
    capture_stderr: bool,
}

impl Executor {
    /// Canonicalize the base directory; fails if it is missing or not a directory.
    pub fn new(config: ExecutorConfig) -> Result<Self, ExecError> {
        let base_dir = config
            .base_dir
            .canonicalize()
            .map(strip_verbatim)
            .map_err(|e| ExecError::BaseDir {
                path: config.base_dir.clone(),
                reason: e.to_string(),
            })?;
        if !base_dir.is_dir() {
            return Err(ExecError::BaseDir {
                path: base_dir,
                reason: "not a directory".to_string(),
            });
        }
        info!(base_dir = %base_dir.display(), capture_stderr = config.capture_stderr, "executor ready");
        Ok(Self {
            base_dir,
            capture_stderr: config.capture_stderr,
        })
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    pub fn captures_stderr(&self) -> bool {
        self.capture_stderr
    }

    /// Path of `name` inside the base directory.
    ///
    /// Only plain relative names are accepted: no root, drive prefix, `.`
    /// or `..` components.
    pub fn resolve(&self, name: &str) -> Result<PathBuf, ExecError> {
        let relative = Path::new(name);
        let confined = !name.is_empty()
            && relative
                .components()
                .all(|c| matches!(c, Component::Normal(_)));
        if !confined {
            return Err(ExecError::InvalidName(name.to_string()));
        }

        let path = self.base_dir.join(relative);
        if !path.is_file() {
            return Err(ExecError::NotFound(path));
        }
        Ok(path)
    }

    pub async fn run(&self, command: &Command) -> Result<ExecResult, ExecError> {
        let path = self.resolve(&command.executable)?;
        info!(
            command = %mask_command_line(&command.executable, &command.arguments),
            stdin_bytes = command.stdin.len(),
            "running"
        );

        let mut child = tokio::process::Command::new(&path)
            .args(&command.arguments)
            .current_dir(&self.base_dir)
            .stdin(if command.stdin.is_empty() {
                Stdio::null()
            } else {
                Stdio::piped()
            })
            .stdout(Stdio::piped())
            .stderr(if self.capture_stderr {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| ExecError::Launch {
                path: path.clone(),
                source,
            })?;

        let stdin_pipe = child.stdin.take();
        let input = command.stdin.as_bytes();
        let feed = async move {
            if let Some(mut pipe) = stdin_pipe {
                match pipe.write_all(input).await {
                    // The child may exit without reading its input.
                    Err(e) if e.kind() == io::ErrorKind::BrokenPipe => {}
                    other => other?,
                }
            }
            Ok::<_, io::Error>(())
        };

        let ((), output) =
            tokio::try_join!(feed, child.wait_with_output()).map_err(ExecError::Io)?;

        let result = ExecResult {
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: self
                .capture_stderr
                .then(|| String::from_utf8_lossy(&output.stderr).into_owned()),
            returncode: exit_code(output.status),
        };
        debug!(
            executable = %command.executable,
            returncode = result.returncode,
            stdout_bytes = result.stdout.len(),
            "finished"
        );
        Ok(result)
    }

    /// Decode a request, run it and encode the result.
    pub async fn execute(&self, request: &[u8]) -> Result<Vec<u8>, HandlerError> {
        let command = Command::decode(request)?;
        let result = match self.run(&command).await {
            Ok(result) => result,
            Err(e) => {
                warn!(executable = %command.executable, code = %e.code().code_string(), "{}", e);
                return Err(e.into());
            }
        };
        Ok(result.encode()?)
    }
}

impl Action for Executor {
    async fn call(&self, request: Vec<u8>) -> Result<Vec<u8>, HandlerError> {
        self.execute(&request).await
    }
}

#[cfg(unix)]
fn exit_code(status: ExitStatus) -> i32 {
    use std::os::unix::process::ExitStatusExt;
    status
        .code()
        .or_else(|| status.signal().map(|signal| -signal))
        .unwrap_or(-1)
}

#[cfg(not(unix))]
fn exit_code(status: ExitStatus) -> i32 {
    status.code().unwrap_or(-1)
}
