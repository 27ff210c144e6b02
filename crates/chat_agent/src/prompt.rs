use cli_process::ProcessCommand;
use session_store::{ChatMessage, Role, TranscriptMode};
use transcript_chat::{ChatConfig, OutputFormat};

use crate::transcript::TranscriptSelection;

/// Header placed above attached transcript text.
pub fn transcript_header(selection: &TranscriptSelection) -> String {
    match selection.mode {
        TranscriptMode::LastN => format!("--- Transcript (last {} lines) ---", selection.lines_sent),
        TranscriptMode::Updates => "--- Transcript Update (new content) ---".to_string(),
        TranscriptMode::Full => "--- Meeting Transcript ---".to_string(),
    }
}

/// One-shot prompt: system prompt, the trailing history window (errors
/// skipped), the new user text, then any attached transcript.
pub fn build_prompt(
    system_prompt: &str,
    history: &[ChatMessage],
    max_history: usize,
    user_text: &str,
    selection: Option<&TranscriptSelection>,
) -> String {
    let mut parts = Vec::new();
    if !system_prompt.trim().is_empty() {
        parts.push(system_prompt.to_string());
    }

    let window_start = history.len().saturating_sub(max_history);
    for message in history[window_start..].iter().filter(|message| !message.is_error) {
        let speaker = match message.role {
            Role::User => "User",
            Role::Assistant => "Assistant",
        };
        parts.push(format!("\n{speaker}: {}", message.content));
    }

    parts.push(format!("\nUser: {user_text}"));

    if let Some(selection) = selection {
        parts.push(format!("\n{}", transcript_header(selection)));
        parts.push(selection.text.clone());
    }

    parts.join("\n")
}

/// Per-turn invocation settings, snapshotted from config at session start.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TurnSettings {
    pub cli_binary: String,
    pub model: String,
    pub connection: String,
    pub extra_args: Vec<String>,
    pub output_format: OutputFormat,
    pub model_flag: String,
    pub connection_flag: String,
    pub prompt_flag: String,
    pub output_format_flag: String,
}

impl From<&ChatConfig> for TurnSettings {
    fn from(config: &ChatConfig) -> Self {
        Self {
            cli_binary: config.cli_binary.clone(),
            model: config.model.clone(),
            connection: config.connection.clone(),
            extra_args: config.extra_args.clone(),
            output_format: config.output_format,
            model_flag: config.model_flag.clone(),
            connection_flag: config.connection_flag.clone(),
            prompt_flag: config.prompt_flag.clone(),
            output_format_flag: config.output_format_flag.clone(),
        }
    }
}

impl TurnSettings {
    /// Argument vector for one turn. Flags with empty values are left out.
    pub fn command(&self, prompt: &str) -> ProcessCommand {
        let mut command = ProcessCommand::new(&self.cli_binary);
        command = push_flag(command, &self.model_flag, &self.model);
        command = push_flag(command, &self.connection_flag, &self.connection);
        if let Some(format) = self.output_format.flag_value() {
            command = push_flag(command, &self.output_format_flag, format);
        }
        command = command.args(self.extra_args.iter().cloned());

        if self.prompt_flag.is_empty() {
            command.arg(prompt)
        } else {
            command.arg(&self.prompt_flag).arg(prompt)
        }
    }
}

fn push_flag(command: ProcessCommand, flag: &str, value: &str) -> ProcessCommand {
    if flag.is_empty() || value.trim().is_empty() {
        command
    } else {
        command.arg(flag).arg(value)
    }
}
