//! Shared configuration and logging for the transcript chat workspace.
//!
//! ## Environment
//!
//! - `TRANSCRIPT_CHAT_CONFIG`: path to a JSON [`config::ChatConfig`] file.
//!   Missing fields fall back to defaults; unknown fields are ignored.
//! - `TRANSCRIPT_CHAT_RECORDING_DIR`: directory holding `chats/` and `.backup/`.
//! - `TRANSCRIPT_CHAT_TRANSCRIPT`: transcript text file read before every turn.
//! - `TRANSCRIPT_CHAT_CLI` / `TRANSCRIPT_CHAT_MODEL`: override the config file.
//! - `TRANSCRIPT_CHAT_LOG`: tracing filter directive (falls back to `RUST_LOG`).
//! - `TRANSCRIPT_CHAT_LOG_FILE`: append logs to a file instead of stderr.
//!
//! Example config:
//!
//! ```json
//! {
//!   "cli_binary": "cortex",
//!   "model": "claude-sonnet",
//!   "extra_args": ["--bypass"],
//!   "max_history": 5,
//!   "output_format": "stream_json"
//! }
//! ```

pub mod config;
pub mod logging;

pub use config::{ChatConfig, ConfigError, EnvConfig, OutputFormat};
pub use logging::init_logging;
