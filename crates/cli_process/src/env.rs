//! Login-shell environment resolution.
//!
//! Processes launched from a desktop session or a service manager often
//! inherit a trimmed `PATH`. The resolver asks the user's login shell for the
//! `PATH` it would export and substitutes that single entry into the current
//! environment.

use std::collections::HashMap;
use std::env;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::thread;
use std::time::Duration;

use crossbeam_channel::bounded;
use tracing::{debug, warn};
use wait_timeout::ChildExt;

use crate::error::ProcessError;
use crate::supervisor::read_pipe_bytes;

pub const LOGIN_SHELL_TIMEOUT: Duration = Duration::from_secs(5);
pub const DEFAULT_LOGIN_SHELL: &str = "/bin/zsh";
pub const SHELL_ENV_VAR: &str = "SHELL";
pub const PATH_ENV_VAR: &str = "PATH";

pub type Environment = HashMap<String, String>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnvResolver {
    shell: PathBuf,
    timeout: Duration,
}

impl Default for EnvResolver {
    fn default() -> Self {
        Self::new()
    }
}

impl EnvResolver {
    /// Uses `$SHELL`, falling back to [`DEFAULT_LOGIN_SHELL`].
    pub fn new() -> Self {
        let shell = env::var_os(SHELL_ENV_VAR)
            .filter(|value| !value.is_empty())
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_LOGIN_SHELL));

        Self::with_shell(shell)
    }

    pub fn with_shell(shell: impl Into<PathBuf>) -> Self {
        Self {
            shell: shell.into(),
            timeout: LOGIN_SHELL_TIMEOUT,
        }
    }

    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn shell(&self) -> &Path {
        &self.shell
    }

    /// Current process environment with `PATH` replaced by the login shell's.
    ///
    /// Never fails: any problem with the shell lookup is logged and the base
    /// environment is returned unchanged.
    pub fn resolve(&self) -> Environment {
        let mut environment: Environment = env::vars().collect();

        match login_shell_path(&self.shell, self.timeout) {
            Ok(path) => {
                debug!(shell = %self.shell.display(), "resolved PATH from login shell");
                environment.insert(PATH_ENV_VAR.to_string(), path);
            }
            Err(error) => {
                warn!(shell = %self.shell.display(), %error, "keeping inherited PATH");
            }
        }

        environment
    }
}

/// Runs `<shell> -l -c 'echo $PATH'` and returns the last line it printed.
pub fn login_shell_path(shell: &Path, timeout: Duration) -> Result<String, ProcessError> {
    let mut child = Command::new(shell)
        .arg("-l")
        .arg("-c")
        .arg("echo $PATH")
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .map_err(|source| ProcessError::spawn(shell, source))?;

    let pid = child.id();
    // Drain while waiting so a chatty login script cannot fill the pipe.
    let (stdout_tx, stdout_rx) = bounded::<Vec<u8>>(1);
    let stdout = child.stdout.take();
    let drain = thread::Builder::new()
        .name(format!("login-shell-stdout-{pid}"))
        .spawn(move || {
            let _ = stdout_tx.send(read_pipe_bytes(stdout));
        });
    if let Err(source) = drain {
        let _ = child.kill();
        let _ = child.wait();
        return Err(ProcessError::io("draining login shell output", pid, source));
    }

    let status = match child
        .wait_timeout(timeout)
        .map_err(|source| ProcessError::io("waiting for login shell", pid, source))?
    {
        Some(status) => status,
        None => {
            let _ = child.kill();
            let _ = child.wait();
            return Err(shell_timeout(shell, timeout));
        }
    };

    if !status.success() {
        return Err(ProcessError::ShellStatus {
            program: shell.to_path_buf(),
            code: status.code().unwrap_or(-1),
        });
    }

    // Background jobs started by the login script may hold the pipe open.
    let stdout = stdout_rx
        .recv_timeout(timeout)
        .map_err(|_| shell_timeout(shell, timeout))?;
    let stdout = String::from_utf8_lossy(&stdout);
    // Login scripts may print banners; the echo is always last.
    let path = stdout
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .last()
        .unwrap_or_default();

    if path.is_empty() {
        return Err(ProcessError::EmptyPath {
            program: shell.to_path_buf(),
        });
    }

    Ok(path.to_string())
}

fn shell_timeout(shell: &Path, timeout: Duration) -> ProcessError {
    ProcessError::ShellTimeout {
        program: shell.to_path_buf(),
        timeout_ms: timeout.as_millis(),
    }
}
