use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ProcessError {
    #[error("failed to launch {program}: {source}")]
    Spawn {
        program: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("I/O error while {operation} for pid {pid}: {source}")]
    Io {
        operation: &'static str,
        pid: u32,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to send {signal} to process group {pgid}: {source}")]
    Signal {
        signal: &'static str,
        pgid: u32,
        #[source]
        source: std::io::Error,
    },

    #[error("{program} exited with status {code} while resolving the login environment")]
    ShellStatus { program: PathBuf, code: i32 },

    #[error("{program} did not finish within {timeout_ms}ms")]
    ShellTimeout { program: PathBuf, timeout_ms: u128 },

    #[error("{program} printed an empty PATH")]
    EmptyPath { program: PathBuf },
}

impl ProcessError {
    #[must_use]
    pub fn spawn(program: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Spawn {
            program: program.into(),
            source,
        }
    }

    #[must_use]
    pub fn io(operation: &'static str, pid: u32, source: std::io::Error) -> Self {
        Self::Io {
            operation,
            pid,
            source,
        }
    }

    /// True when the signal target no longer exists.
    pub fn is_no_such_process(&self) -> bool {
        #[cfg(unix)]
        {
            matches!(self, Self::Signal { source, .. } if source.raw_os_error() == Some(libc::ESRCH))
        }
        #[cfg(not(unix))]
        {
            false
        }
    }
}
