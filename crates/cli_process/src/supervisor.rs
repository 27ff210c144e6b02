//! Single-shot supervision of a CLI child process.
//!
//! The child runs in its own process group with stdin closed. Stdout is read
//! line by line on the thread calling [`ProcessSupervisor::run`]; stderr is
//! drained on a helper thread so neither pipe can stall the other.
//!
//! Cancellation goes through a [`ProcessHandle`], which may be cloned to any
//! thread. It sends SIGTERM to the group, waits up to the grace period, then
//! sends SIGKILL. Without process-group support (non-unix targets) only the
//! direct child is killed.

use std::collections::HashMap;
use std::io::{self, BufRead, BufReader, Read};
use std::path::{Path, PathBuf};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread;
use std::time::{Duration, Instant};

use crossbeam_channel::bounded;
use tracing::{debug, error, info, warn};
use wait_timeout::ChildExt;

use crate::error::ProcessError;

pub const CANCEL_GRACE_PERIOD: Duration = Duration::from_secs(3);
pub const EXIT_CODE_SPAWN_FAILED: i32 = -1;
pub const EXIT_CODE_CANCELLED: i32 = -2;
pub const CANCELLED_MARKER: &str = "Cancelled by user.";

const STDERR_JOIN_TIMEOUT: Duration = Duration::from_secs(5);
const REAP_POLL_INTERVAL: Duration = Duration::from_millis(25);
const CANCEL_POLL_INTERVAL: Duration = Duration::from_millis(20);

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProcessCommand {
    program: PathBuf,
    args: Vec<String>,
    cwd: Option<PathBuf>,
    env: Option<HashMap<String, String>>,
}

impl ProcessCommand {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    #[must_use]
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    #[must_use]
    pub fn current_dir(mut self, cwd: impl Into<PathBuf>) -> Self {
        self.cwd = Some(cwd.into());
        self
    }

    /// Replaces the inherited environment entirely.
    #[must_use]
    pub fn environment(mut self, env: HashMap<String, String>) -> Self {
        self.env = Some(env);
        self
    }

    pub fn program(&self) -> &Path {
        &self.program
    }

    pub fn arguments(&self) -> &[String] {
        &self.args
    }

    pub fn working_dir(&self) -> Option<&Path> {
        self.cwd.as_deref()
    }

    fn to_command(&self) -> Command {
        let mut command = Command::new(&self.program);
        command
            .args(&self.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        if let Some(cwd) = &self.cwd {
            command.current_dir(cwd);
        }
        if let Some(env) = &self.env {
            command.env_clear().envs(env);
        }

        #[cfg(unix)]
        {
            use std::os::unix::process::CommandExt;
            command.process_group(0);
        }

        command
    }
}

/// Terminal result of one supervised run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessOutcome {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i32,
}

impl ProcessOutcome {
    pub fn cancelled(stdout: String) -> Self {
        Self {
            stdout,
            stderr: CANCELLED_MARKER.to_string(),
            exit_code: EXIT_CODE_CANCELLED,
        }
    }

    pub fn spawn_failed(error: &ProcessError) -> Self {
        Self {
            stdout: String::new(),
            stderr: error.to_string(),
            exit_code: EXIT_CODE_SPAWN_FAILED,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.exit_code == EXIT_CODE_CANCELLED
    }

    pub fn is_spawn_failure(&self) -> bool {
        self.exit_code == EXIT_CODE_SPAWN_FAILED
    }

    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

struct ProcessState {
    // Holds the child from spawn until it is reaped.
    child: Mutex<Option<Child>>,
    pid: AtomicU32,
    cancelled: AtomicBool,
    exited: AtomicBool,
    created: Instant,
    // Millis since `created`, offset by one; zero means no output yet.
    last_output_ms: AtomicU64,
    grace_period: Duration,
}

/// Thread-safe view of a supervised process: cancellation and stall checks.
#[derive(Clone)]
pub struct ProcessHandle {
    state: Arc<ProcessState>,
}

impl std::fmt::Debug for ProcessHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProcessHandle")
            .field("pid", &self.pid())
            .field("cancelled", &self.is_cancelled())
            .field("exited", &self.has_exited())
            .finish()
    }
}

impl ProcessHandle {
    pub fn pid(&self) -> Option<u32> {
        match self.state.pid.load(Ordering::SeqCst) {
            0 => None,
            pid => Some(pid),
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.state.cancelled.load(Ordering::SeqCst)
    }

    pub fn has_exited(&self) -> bool {
        self.state.exited.load(Ordering::SeqCst)
    }

    /// When stdout last produced a line.
    pub fn last_output(&self) -> Option<Instant> {
        match self.state.last_output_ms.load(Ordering::Relaxed) {
            0 => None,
            offset => Some(self.state.created + Duration::from_millis(offset - 1)),
        }
    }

    /// Time since the last stdout line, or since the handle was created.
    pub fn idle_for(&self) -> Duration {
        self.last_output()
            .unwrap_or(self.state.created)
            .elapsed()
    }

    fn touch(&self) {
        let offset = u64::try_from(self.state.created.elapsed().as_millis()).unwrap_or(u64::MAX - 1);
        self.state
            .last_output_ms
            .store(offset.saturating_add(1), Ordering::Relaxed);
    }

    /// Terminates the process group. Idempotent, and a no-op once the child
    /// has exited. Blocks for at most the grace period plus one reap poll.
    pub fn cancel(&self) {
        let pid = {
            let mut slot = lock_unpoisoned(&self.state.child);
            if self.has_exited() {
                debug!("cancel ignored: process already exited");
                return;
            }
            if self.state.cancelled.swap(true, Ordering::SeqCst) {
                debug!("cancel already requested");
                return;
            }
            let Some(child) = slot.as_mut() else {
                debug!("cancel requested before spawn");
                return;
            };

            let pid = child.id();
            info!(pid, "terminating cli process group");
            if let Err(error) = signal_group(pid, GroupSignal::Terminate) {
                if error.is_no_such_process() {
                    debug!(pid, "process group already gone");
                } else {
                    warn!(pid, %error, "group signal failed, killing direct child");
                    kill_direct_child(child);
                }
                return;
            }

            pid
        };

        let deadline = Instant::now() + self.state.grace_period;
        loop {
            if self.has_exited() {
                debug!(pid, "process exited after SIGTERM");
                return;
            }
            let now = Instant::now();
            if now >= deadline {
                break;
            }
            thread::sleep(CANCEL_POLL_INTERVAL.min(deadline - now));
        }

        let mut slot = lock_unpoisoned(&self.state.child);
        let Some(child) = slot.as_mut() else {
            return;
        };

        warn!(pid, grace_ms = self.state.grace_period.as_millis(), "process survived SIGTERM, sending SIGKILL");
        if let Err(error) = signal_group(pid, GroupSignal::Kill) {
            if !error.is_no_such_process() {
                error!(pid, %error, "SIGKILL to process group failed, killing direct child");
                kill_direct_child(child);
            }
        }
    }
}

pub struct ProcessSupervisor {
    handle: ProcessHandle,
}

impl Default for ProcessSupervisor {
    fn default() -> Self {
        Self::new()
    }
}

impl ProcessSupervisor {
    pub fn new() -> Self {
        Self::with_grace_period(CANCEL_GRACE_PERIOD)
    }

    pub fn with_grace_period(grace_period: Duration) -> Self {
        Self {
            handle: ProcessHandle {
                state: Arc::new(ProcessState {
                    child: Mutex::new(None),
                    pid: AtomicU32::new(0),
                    cancelled: AtomicBool::new(false),
                    exited: AtomicBool::new(false),
                    created: Instant::now(),
                    last_output_ms: AtomicU64::new(0),
                    grace_period,
                }),
            },
        }
    }

    pub fn handle(&self) -> ProcessHandle {
        self.handle.clone()
    }

    /// Runs `command` to completion, calling `on_line` for every stdout line
    /// in order. Consumes the supervisor: one supervisor, one process.
    pub fn run(self, command: &ProcessCommand, on_line: &mut dyn FnMut(&str)) -> ProcessOutcome {
        let state = &self.handle.state;
        if state.cancelled.load(Ordering::SeqCst) {
            info!(program = %command.program().display(), "run cancelled before spawn");
            return ProcessOutcome::cancelled(String::new());
        }

        let mut child = match command.to_command().spawn() {
            Ok(child) => child,
            Err(source) => {
                let error = ProcessError::spawn(command.program(), source);
                warn!(%error, "cli spawn failed");
                return ProcessOutcome::spawn_failed(&error);
            }
        };

        let pid = child.id();
        let stdout = child.stdout.take();
        let stderr = child.stderr.take();
        {
            let mut slot = lock_unpoisoned(&state.child);
            state.pid.store(pid, Ordering::SeqCst);
            if state.cancelled.load(Ordering::SeqCst) {
                debug!(pid, "cancel raced spawn, killing immediately");
                if signal_group(pid, GroupSignal::Kill).is_err() {
                    kill_direct_child(&mut child);
                }
            }
            *slot = Some(child);
        }
        debug!(pid, program = %command.program().display(), "cli process started");

        let (stderr_tx, stderr_rx) = bounded::<String>(1);
        match stderr {
            Some(pipe) => {
                let spawned = thread::Builder::new()
                    .name(format!("cli-stderr-{pid}"))
                    .spawn(move || {
                        let bytes = read_pipe_bytes(Some(pipe));
                        let _ = stderr_tx.send(String::from_utf8_lossy(&bytes).into_owned());
                    });
                if let Err(error) = spawned {
                    warn!(pid, %error, "failed to spawn stderr drain thread");
                }
            }
            None => drop(stderr_tx),
        }

        let stdout_text = self.pump_stdout(pid, stdout, on_line);
        let status = self.reap(pid);

        let stderr_text = match stderr_rx.recv_timeout(STDERR_JOIN_TIMEOUT) {
            Ok(text) => text,
            Err(_) => {
                warn!(pid, "stderr drain did not finish in time");
                String::new()
            }
        };

        if state.cancelled.load(Ordering::SeqCst) {
            info!(pid, "cli run cancelled");
            return ProcessOutcome::cancelled(stdout_text);
        }

        let exit_code = match status {
            Some(status) => exit_code_of(status),
            None => EXIT_CODE_SPAWN_FAILED,
        };
        debug!(pid, exit_code, "cli process finished");

        ProcessOutcome {
            stdout: stdout_text,
            stderr: stderr_text,
            exit_code,
        }
    }

    fn pump_stdout(
        &self,
        pid: u32,
        stdout: Option<impl Read>,
        on_line: &mut dyn FnMut(&str),
    ) -> String {
        let mut collected = String::new();
        let Some(pipe) = stdout else {
            return collected;
        };

        let mut reader = BufReader::new(pipe);
        let mut buffer = Vec::new();
        loop {
            buffer.clear();
            match reader.read_until(b'\n', &mut buffer) {
                Ok(0) => break,
                Ok(_) => {
                    let line = String::from_utf8_lossy(&buffer);
                    self.handle.touch();
                    collected.push_str(&line);
                    on_line(&line);
                }
                Err(error) if error.kind() == io::ErrorKind::Interrupted => continue,
                Err(error) => {
                    warn!(pid, %error, "stdout read failed");
                    break;
                }
            }
        }

        collected
    }

    fn reap(&self, pid: u32) -> Option<ExitStatus> {
        let state = &self.handle.state;
        loop {
            let mut slot = lock_unpoisoned(&state.child);
            let child = slot.as_mut()?;

            match child.wait_timeout(REAP_POLL_INTERVAL) {
                Ok(Some(status)) => {
                    state.exited.store(true, Ordering::SeqCst);
                    *slot = None;
                    return Some(status);
                }
                Ok(None) => {}
                Err(source) => {
                    let error = ProcessError::io("waiting for cli process", pid, source);
                    error!(%error, "failed to reap cli process");
                    state.exited.store(true, Ordering::SeqCst);
                    *slot = None;
                    return None;
                }
            }

            drop(slot);
            thread::yield_now();
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum GroupSignal {
    Terminate,
    Kill,
}

impl GroupSignal {
    fn name(self) -> &'static str {
        match self {
            Self::Terminate => "SIGTERM",
            Self::Kill => "SIGKILL",
        }
    }
}

#[cfg(unix)]
fn signal_group(pgid: u32, signal: GroupSignal) -> Result<(), ProcessError> {
    let raw_signal = match signal {
        GroupSignal::Terminate => libc::SIGTERM,
        GroupSignal::Kill => libc::SIGKILL,
    };
    let Ok(raw_pgid) = libc::pid_t::try_from(pgid) else {
        return Err(ProcessError::Signal {
            signal: signal.name(),
            pgid,
            source: io::Error::from(io::ErrorKind::InvalidInput),
        });
    };

    // SAFETY: killpg takes plain integers and has no memory-safety requirements.
    let rc = unsafe { libc::killpg(raw_pgid, raw_signal) };
    if rc == 0 {
        Ok(())
    } else {
        Err(ProcessError::Signal {
            signal: signal.name(),
            pgid,
            source: io::Error::last_os_error(),
        })
    }
}

#[cfg(not(unix))]
fn signal_group(pgid: u32, signal: GroupSignal) -> Result<(), ProcessError> {
    Err(ProcessError::Signal {
        signal: signal.name(),
        pgid,
        source: io::Error::from(io::ErrorKind::Unsupported),
    })
}

fn kill_direct_child(child: &mut Child) {
    if let Err(error) = child.kill() {
        if error.kind() != io::ErrorKind::InvalidInput {
            warn!(pid = child.id(), %error, "failed to kill cli process");
        }
    }
}

fn exit_code_of(status: ExitStatus) -> i32 {
    if let Some(code) = status.code() {
        return code;
    }

    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signal) = status.signal() {
            return 128 + signal;
        }
    }

    EXIT_CODE_SPAWN_FAILED
}

pub(crate) fn read_pipe_bytes(pipe: Option<impl Read>) -> Vec<u8> {
    let Some(mut pipe) = pipe else {
        return Vec::new();
    };

    let mut bytes = Vec::new();
    let _ = pipe.read_to_end(&mut bytes);
    bytes
}

fn lock_unpoisoned<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}
