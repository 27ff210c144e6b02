mod classifier;
mod env;
mod error;
mod supervisor;
mod watchdog;

pub use classifier::{
    preview, OutputClassifier, OutputDelta, THINKING_PREVIEW_CHARS, TOOL_RESULT_PREVIEW_CHARS,
};
pub use env::{
    login_shell_path, EnvResolver, Environment, DEFAULT_LOGIN_SHELL, LOGIN_SHELL_TIMEOUT,
    PATH_ENV_VAR,
};
pub use error::ProcessError;
pub use supervisor::{
    ProcessCommand, ProcessHandle, ProcessOutcome, ProcessSupervisor, CANCELLED_MARKER,
    CANCEL_GRACE_PERIOD, EXIT_CODE_CANCELLED, EXIT_CODE_SPAWN_FAILED,
};
pub use watchdog::{IdleVerdict, IdleWatchdog};
