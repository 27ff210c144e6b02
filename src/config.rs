//! Environment and file configuration.

use std::env;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const CONFIG_PATH_ENV_VAR: &str = "TRANSCRIPT_CHAT_CONFIG";
pub const RECORDING_DIR_ENV_VAR: &str = "TRANSCRIPT_CHAT_RECORDING_DIR";
pub const TRANSCRIPT_PATH_ENV_VAR: &str = "TRANSCRIPT_CHAT_TRANSCRIPT";
pub const LOG_FILTER_ENV_VAR: &str = "TRANSCRIPT_CHAT_LOG";
pub const LOG_FILE_ENV_VAR: &str = "TRANSCRIPT_CHAT_LOG_FILE";
pub const CLI_BINARY_ENV_VAR: &str = "TRANSCRIPT_CHAT_CLI";
pub const MODEL_ENV_VAR: &str = "TRANSCRIPT_CHAT_MODEL";

pub const DEFAULT_CLI_BINARY: &str = "cortex";
pub const DEFAULT_ASSISTANT_NAME: &str = "Assistant";
pub const DEFAULT_MAX_HISTORY: usize = 5;
pub const DEFAULT_SYSTEM_PROMPT: &str = "You are a helpful assistant analyzing a meeting transcript. Respond in well-formatted markdown. Be concise and specific.";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("I/O error while {operation} at {path}: {source}")]
    Io {
        operation: &'static str,
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to parse config JSON at {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

/// Values read from the process environment. Blank values count as unset.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EnvConfig {
    pub config_path: Option<PathBuf>,
    pub recording_dir: Option<PathBuf>,
    pub transcript_path: Option<PathBuf>,
    pub log_filter: Option<String>,
    pub log_file: Option<PathBuf>,
    pub cli_binary: Option<String>,
    pub model: Option<String>,
}

impl EnvConfig {
    pub fn from_env() -> Self {
        Self {
            config_path: env_string_opt(CONFIG_PATH_ENV_VAR).map(PathBuf::from),
            recording_dir: env_string_opt(RECORDING_DIR_ENV_VAR).map(PathBuf::from),
            transcript_path: env_string_opt(TRANSCRIPT_PATH_ENV_VAR).map(PathBuf::from),
            log_filter: env_string_opt(LOG_FILTER_ENV_VAR),
            log_file: env_string_opt(LOG_FILE_ENV_VAR).map(PathBuf::from),
            cli_binary: env_string_opt(CLI_BINARY_ENV_VAR),
            model: env_string_opt(MODEL_ENV_VAR),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutputFormat {
    Raw,
    #[default]
    StreamJson,
}

impl OutputFormat {
    /// Value passed to the CLI's output-format flag, if any.
    pub fn flag_value(self) -> Option<&'static str> {
        match self {
            Self::Raw => None,
            Self::StreamJson => Some("stream-json"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChatConfig {
    pub cli_binary: String,
    pub model: String,
    pub connection: String,
    pub extra_args: Vec<String>,
    pub system_prompt: String,
    pub max_history: usize,
    pub assistant_name: String,
    pub output_format: OutputFormat,
    pub model_flag: String,
    pub connection_flag: String,
    pub prompt_flag: String,
    pub output_format_flag: String,
    pub idle_warn_secs: u64,
    pub idle_kill_secs: u64,
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            cli_binary: DEFAULT_CLI_BINARY.to_string(),
            model: String::new(),
            connection: String::new(),
            extra_args: vec!["--bypass".to_string()],
            system_prompt: DEFAULT_SYSTEM_PROMPT.to_string(),
            max_history: DEFAULT_MAX_HISTORY,
            assistant_name: DEFAULT_ASSISTANT_NAME.to_string(),
            output_format: OutputFormat::default(),
            model_flag: "--model".to_string(),
            connection_flag: "--connection".to_string(),
            prompt_flag: "-p".to_string(),
            output_format_flag: "--output-format".to_string(),
            idle_warn_secs: 30,
            idle_kill_secs: 120,
        }
    }
}

impl ChatConfig {
    /// Reads a JSON config file. A missing file yields defaults.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = match fs::read_to_string(path) {
            Ok(raw) => raw,
            Err(source) if source.kind() == io::ErrorKind::NotFound => {
                return Ok(Self::default());
            }
            Err(source) => {
                return Err(ConfigError::Io {
                    operation: "reading config file",
                    path: path.to_path_buf(),
                    source,
                });
            }
        };

        serde_json::from_str(&raw).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Loads the configured file (if any) and applies environment overrides.
    pub fn resolve(env: &EnvConfig) -> Result<Self, ConfigError> {
        let mut config = match &env.config_path {
            Some(path) => Self::load(path)?,
            None => Self::default(),
        };

        if let Some(cli_binary) = &env.cli_binary {
            config.cli_binary = cli_binary.clone();
        }
        if let Some(model) = &env.model {
            config.model = model.clone();
        }
        if config.max_history == 0 {
            config.max_history = DEFAULT_MAX_HISTORY;
        }

        Ok(config)
    }
}

fn env_string_opt(key: &str) -> Option<String> {
    env::var(key).ok().and_then(|value| {
        if value.trim().is_empty() {
            None
        } else {
            Some(value)
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Mutex, OnceLock};

    struct EnvGuard {
        key: &'static str,
        previous: Option<String>,
    }

    impl Drop for EnvGuard {
        fn drop(&mut self) {
            if let Some(value) = &self.previous {
                env::set_var(self.key, value);
            } else {
                env::remove_var(self.key);
            }
        }
    }

    fn env_lock() -> std::sync::MutexGuard<'static, ()> {
        static LOCK: OnceLock<Mutex<()>> = OnceLock::new();
        LOCK.get_or_init(|| Mutex::new(()))
            .lock()
            .expect("env lock poisoned")
    }

    fn set_env_guard(key: &'static str, value: Option<&str>) -> EnvGuard {
        let previous = env::var(key).ok();
        if let Some(value) = value {
            env::set_var(key, value);
        } else {
            env::remove_var(key);
        }
        EnvGuard { key, previous }
    }

    #[test]
    fn env_defaults_are_unset() {
        let _lock = env_lock();
        let _g1 = set_env_guard(CONFIG_PATH_ENV_VAR, None);
        let _g2 = set_env_guard(RECORDING_DIR_ENV_VAR, None);
        let _g3 = set_env_guard(TRANSCRIPT_PATH_ENV_VAR, None);
        let _g4 = set_env_guard(LOG_FILTER_ENV_VAR, None);
        let _g5 = set_env_guard(LOG_FILE_ENV_VAR, None);
        let _g6 = set_env_guard(CLI_BINARY_ENV_VAR, None);
        let _g7 = set_env_guard(MODEL_ENV_VAR, None);

        assert_eq!(EnvConfig::from_env(), EnvConfig::default());
    }

    #[test]
    fn blank_env_values_are_ignored() {
        let _lock = env_lock();
        let _g1 = set_env_guard(RECORDING_DIR_ENV_VAR, Some("   "));
        let _g2 = set_env_guard(MODEL_ENV_VAR, Some("sonnet"));

        let config = EnvConfig::from_env();
        assert!(config.recording_dir.is_none());
        assert_eq!(config.model.as_deref(), Some("sonnet"));
    }

    #[test]
    fn missing_config_file_yields_defaults() {
        let dir = tempfile::tempdir().expect("tempdir");
        let config = ChatConfig::load(&dir.path().join("absent.json")).expect("defaults");
        assert_eq!(config, ChatConfig::default());
        assert_eq!(config.max_history, 5);
        assert_eq!(config.extra_args, vec!["--bypass".to_string()]);
    }

    #[test]
    fn partial_config_file_keeps_defaults_for_missing_fields() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("config.json");
        fs::write(
            &path,
            r#"{"model": "opus", "output_format": "raw", "unknown_field": true}"#,
        )
        .expect("write config");

        let config = ChatConfig::load(&path).expect("config loads");
        assert_eq!(config.model, "opus");
        assert_eq!(config.output_format, OutputFormat::Raw);
        assert_eq!(config.cli_binary, DEFAULT_CLI_BINARY);
        assert_eq!(config.system_prompt, DEFAULT_SYSTEM_PROMPT);
    }

    #[test]
    fn malformed_config_is_reported() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("config.json");
        fs::write(&path, "{not json").expect("write config");

        let error = ChatConfig::load(&path).expect_err("parse error");
        assert!(matches!(error, ConfigError::Parse { .. }));
    }

    #[test]
    fn env_overrides_apply_on_top_of_file() {
        let env = EnvConfig {
            cli_binary: Some("/opt/bin/cortex".to_string()),
            model: Some("haiku".to_string()),
            ..EnvConfig::default()
        };

        let config = ChatConfig::resolve(&env).expect("resolve");
        assert_eq!(config.cli_binary, "/opt/bin/cortex");
        assert_eq!(config.model, "haiku");
    }
}
