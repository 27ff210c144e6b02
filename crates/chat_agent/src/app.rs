use std::path::PathBuf;

use cli_process::{OutputClassifier, OutputDelta, ProcessCommand, ProcessOutcome, EXIT_CODE_CANCELLED};
use session_store::{
    format_rfc3339, transcript_lines, ChatMessage, ChatSession,
    SessionManifestEntry, TranscriptAttachment,
};
use time::OffsetDateTime;
use transcript_chat::{ChatConfig, OutputFormat};

use crate::commands::{parse_slash_command, SlashCommand, TranscriptCommand, HELP_TEXT};
use crate::prompt::{build_prompt, TurnSettings};
use crate::transcript::{ForcedInclusion, TranscriptPolicy, TranscriptStatus};

pub type TurnId = u64;

pub const CANCELLED_NOTICE: &str = "*Chat cancelled.*";
pub const TURN_ALREADY_ACTIVE: &str = "Turn already active";
const BUSY_NOTICE: &str = "A response is still streaming. Use /cancel to stop it.";
const ERROR_DETAIL_THRESHOLD: usize = 3;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Mode {
    Idle,
    AwaitingResponse { turn_id: TurnId },
    Cancelling { turn_id: TurnId },
    Exiting,
}

/// Output accumulated for the in-flight turn.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StreamingTurn {
    pub turn_id: TurnId,
    pub content: String,
    pub thinking: String,
    pub last_status: Option<String>,
}

pub trait HostOps {
    fn start_turn(
        &mut self,
        command: ProcessCommand,
        classifier: OutputClassifier,
    ) -> Result<TurnId, String>;
    fn cancel_turn(&mut self, turn_id: TurnId);
    fn current_transcript(&mut self) -> String;
    /// Fresh session id for a chat created at `created`, unique among saved chats.
    fn allocate_session_id(&mut self, created: OffsetDateTime) -> String;
    /// Returns the backup path relative to the recording directory.
    fn write_transcript_backup(&mut self, session_id: &str, transcript: &str) -> Option<String>;
    fn list_sessions(&mut self) -> Vec<SessionManifestEntry>;
    fn load_session(&mut self, session_id: &str) -> Option<ChatSession>;
    fn delete_session(&mut self, session_id: &str);
    fn export_session(&mut self, session: &ChatSession) -> Option<PathBuf>;
    fn reconstruct_excerpt(&mut self, message: &ChatMessage) -> String;
    fn request_stop(&mut self);
}

/// Session coordinator: owns the active session and drives one turn at a time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatApp {
    pub mode: Mode,
    pub input: String,
    pub notices: Vec<String>,
    pub should_exit: bool,
    session: ChatSession,
    policy: TranscriptPolicy,
    settings: TurnSettings,
    system_prompt: String,
    assistant_name: String,
    max_history: usize,
    streaming: Option<StreamingTurn>,
}

impl Default for ChatApp {
    fn default() -> Self {
        Self::new(&ChatConfig::default())
    }
}

impl ChatApp {
    pub fn new(config: &ChatConfig) -> Self {
        let mut app = Self {
            mode: Mode::Idle,
            input: String::new(),
            notices: Vec::new(),
            should_exit: false,
            session: ChatSession::default(),
            policy: TranscriptPolicy::new(),
            settings: TurnSettings::from(config),
            system_prompt: config.system_prompt.clone(),
            assistant_name: config.assistant_name.clone(),
            max_history: config.max_history.max(1),
            streaming: None,
        };
        app.session = app.fresh_session();
        app
    }

    pub fn session(&self) -> &ChatSession {
        &self.session
    }

    pub fn policy(&self) -> &TranscriptPolicy {
        &self.policy
    }

    pub fn streaming(&self) -> Option<&StreamingTurn> {
        self.streaming.as_ref()
    }

    pub fn max_history(&self) -> usize {
        self.max_history
    }

    pub fn classifier(&self) -> OutputClassifier {
        match self.settings.output_format {
            OutputFormat::Raw => OutputClassifier::Raw,
            OutputFormat::StreamJson => OutputClassifier::StreamJson,
        }
    }

    pub fn is_busy(&self) -> bool {
        matches!(
            self.mode,
            Mode::AwaitingResponse { .. } | Mode::Cancelling { .. }
        )
    }

    pub fn transcript_status(&self, current_line_count: usize) -> TranscriptStatus {
        self.policy
            .status(&self.session.messages, self.max_history, current_line_count)
    }

    pub fn on_input_replace(&mut self, text: String) {
        self.input = text;
    }

    pub fn take_notices(&mut self) -> Vec<String> {
        std::mem::take(&mut self.notices)
    }

    pub fn on_submit(&mut self, host: &mut dyn HostOps) {
        let submitted = std::mem::take(&mut self.input);
        let text = submitted.trim().to_string();
        if text.is_empty() {
            return;
        }

        if let Some(command) = parse_slash_command(&text) {
            self.on_command(command, host);
            return;
        }

        if self.is_busy() || self.mode == Mode::Exiting {
            self.push_notice(BUSY_NOTICE);
            return;
        }

        let now = OffsetDateTime::now_utc();
        if self.session.id.is_empty() {
            self.session.id = host.allocate_session_id(now);
        }

        let transcript = host.current_transcript();
        let policy_before = self.policy.clone();
        let selection = self.policy.select(&transcript);

        let mut message = ChatMessage::user(text.clone());
        if let Some(selection) = &selection {
            let backup_file = host
                .write_transcript_backup(&self.session.id, &transcript)
                .unwrap_or_default();
            message = message.with_transcript(TranscriptAttachment {
                line_count: selection.line_count,
                included_at: format_rfc3339(now).unwrap_or_default(),
                mode: selection.mode,
                lines_sent: selection.lines_sent,
                start_line: selection.start_line,
                backup_file,
            });
        }

        let prompt = build_prompt(
            &self.system_prompt,
            &self.session.messages,
            self.max_history,
            &text,
            selection.as_ref(),
        );
        self.session.messages.push(message);

        match host.start_turn(self.settings.command(&prompt), self.classifier()) {
            Ok(turn_id) => {
                self.mode = Mode::AwaitingResponse { turn_id };
                self.streaming = Some(StreamingTurn {
                    turn_id,
                    ..StreamingTurn::default()
                });
            }
            Err(error) if error == TURN_ALREADY_ACTIVE => {
                self.session.messages.pop();
                self.policy = policy_before;
                self.push_notice(BUSY_NOTICE);
            }
            Err(error) => {
                self.session
                    .messages
                    .push(ChatMessage::assistant_error(format!("**Error:** {error}")));
                self.push_notice(format!("Failed to start turn: {error}"));
            }
        }
    }

    fn on_command(&mut self, command: SlashCommand, host: &mut dyn HostOps) {
        match command {
            SlashCommand::Help => self.push_notice(HELP_TEXT),
            SlashCommand::New => {
                if self.reject_while_busy() {
                    return;
                }
                self.session = self.fresh_session();
                self.policy = TranscriptPolicy::new();
                self.push_notice("Started a new chat");
            }
            SlashCommand::Cancel => self.on_cancel(host),
            SlashCommand::Quit => self.on_quit(host),
            SlashCommand::Transcript(command) => self.on_transcript_command(command, host),
            SlashCommand::Sessions => {
                let sessions = host.list_sessions();
                if sessions.is_empty() {
                    self.push_notice("No saved chats");
                    return;
                }
                for entry in sessions {
                    self.push_notice(format!(
                        "{}  {} ({} messages)",
                        entry.id, entry.title, entry.message_count
                    ));
                }
            }
            SlashCommand::Load(session_id) => {
                if self.reject_while_busy() {
                    return;
                }
                match host.load_session(&session_id) {
                    Some(session) => self.restore_session(session),
                    None => self.push_notice(format!("Chat {session_id} not found")),
                }
            }
            SlashCommand::Delete(session_id) => {
                let is_current = session_id == self.session.id;
                if is_current && self.reject_while_busy() {
                    return;
                }
                host.delete_session(&session_id);
                if is_current {
                    self.session = self.fresh_session();
                    self.policy = TranscriptPolicy::new();
                }
                self.push_notice(format!("Deleted chat {session_id}"));
            }
            SlashCommand::Export => {
                if self.session.messages.is_empty() {
                    self.push_notice("Nothing to export yet");
                    return;
                }
                match host.export_session(&self.session) {
                    Some(path) => self.push_notice(format!("Chat saved to {}", path.display())),
                    None => self.push_notice("Chat export failed; see log for details"),
                }
            }
            SlashCommand::Show(position) => self.show_transcript_excerpt(position, host),
            SlashCommand::Usage(usage) => self.push_notice(format!("Usage: {usage}")),
            SlashCommand::Unknown(command) => {
                self.push_notice(format!("Unknown command: {command}"));
            }
        }
    }

    fn on_transcript_command(&mut self, command: TranscriptCommand, host: &mut dyn HostOps) {
        match command {
            TranscriptCommand::Full => self.policy.queue(ForcedInclusion::Full),
            TranscriptCommand::Updates => self.policy.queue(ForcedInclusion::Updates),
            TranscriptCommand::LastN(n) => self.policy.queue(ForcedInclusion::LastN(n)),
            TranscriptCommand::None => self.policy.skip_next_message(),
            TranscriptCommand::Status => {}
        }

        let line_count = transcript_lines(&host.current_transcript()).len();
        let status = self.transcript_status(line_count);
        self.push_notice(status.to_string());
    }

    fn show_transcript_excerpt(&mut self, position: usize, host: &mut dyn HostOps) {
        let Some(message) = position
            .checked_sub(1)
            .and_then(|index| self.session.messages.get(index))
        else {
            self.push_notice(format!("No message {position} in this chat"));
            return;
        };
        let Some(attachment) = &message.transcript else {
            self.push_notice(format!("Message {position} has no transcript attached"));
            return;
        };

        let label = attachment.mode.label(attachment.lines_sent);
        let excerpt = host.reconstruct_excerpt(message);
        self.push_notice(format!("{label}\n{excerpt}"));
    }

    pub fn on_cancel(&mut self, host: &mut dyn HostOps) {
        match self.mode {
            Mode::AwaitingResponse { turn_id } => {
                self.mode = Mode::Cancelling { turn_id };
                self.push_notice("Cancelling response, please wait.");
                host.cancel_turn(turn_id);
            }
            Mode::Cancelling { .. } => self.push_notice("Cancellation already in progress"),
            _ => self.push_notice("No response in progress"),
        }
    }

    pub fn on_quit(&mut self, host: &mut dyn HostOps) {
        if let Mode::AwaitingResponse { turn_id } | Mode::Cancelling { turn_id } = self.mode {
            host.cancel_turn(turn_id);
        }
        self.mode = Mode::Exiting;
        self.should_exit = true;
        host.request_stop();
    }

    pub fn on_turn_delta(&mut self, turn_id: TurnId, delta: &OutputDelta) {
        let Some(streaming) = self
            .streaming
            .as_mut()
            .filter(|streaming| streaming.turn_id == turn_id)
        else {
            return;
        };

        match delta {
            OutputDelta::Text(text) => match self.settings.output_format {
                OutputFormat::Raw => streaming.content.push_str(text),
                OutputFormat::StreamJson => append_block(&mut streaming.content, text),
            },
            OutputDelta::Thinking(thinking) => append_block(&mut streaming.thinking, thinking),
            OutputDelta::Status(_) => {}
        }
        streaming.last_status = Some(delta.render());
    }

    /// Finalizes the turn's assistant message. Returns `true` when the
    /// session changed and should be persisted.
    pub fn on_turn_finished(&mut self, turn_id: TurnId, outcome: &ProcessOutcome) -> bool {
        let active = match self.mode {
            Mode::AwaitingResponse { turn_id: active } | Mode::Cancelling { turn_id: active } => {
                active == turn_id
            }
            // Quitting still records whatever the turn produced.
            Mode::Exiting => self
                .streaming
                .as_ref()
                .is_some_and(|streaming| streaming.turn_id == turn_id),
            Mode::Idle => false,
        };
        if !active {
            return false;
        }

        let streaming = self.streaming.take().unwrap_or_default();
        self.session
            .messages
            .push(finalize_message(streaming.content, streaming.thinking, outcome));

        if self.mode != Mode::Exiting {
            self.mode = Mode::Idle;
        }
        true
    }

    fn restore_session(&mut self, session: ChatSession) {
        if !session.model.is_empty() {
            self.settings.model = session.model.clone();
        }
        if !session.connection.is_empty() {
            self.settings.connection = session.connection.clone();
        }
        if !session.cli_binary.is_empty() {
            self.settings.cli_binary = session.cli_binary.clone();
        }
        if !session.extra_args.is_empty() {
            self.settings.extra_args = session.extra_args.clone();
        }
        if !session.system_prompt.is_empty() {
            self.system_prompt = session.system_prompt.clone();
        }
        if !session.assistant_name.is_empty() {
            self.assistant_name = session.assistant_name.clone();
        }

        self.policy = TranscriptPolicy::restore(&session.messages);
        self.push_notice(format!(
            "Loaded chat {} ({} messages)",
            session.id,
            session.messages.len()
        ));
        self.session = session;
    }

    fn fresh_session(&self) -> ChatSession {
        ChatSession {
            id: String::new(),
            model: self.settings.model.clone(),
            connection: self.settings.connection.clone(),
            assistant_name: self.assistant_name.clone(),
            cli_binary: self.settings.cli_binary.clone(),
            extra_args: self.settings.extra_args.clone(),
            system_prompt: self.system_prompt.clone(),
            messages: Vec::new(),
        }
    }

    fn reject_while_busy(&mut self) -> bool {
        if self.is_busy() {
            self.push_notice(BUSY_NOTICE);
            return true;
        }
        false
    }

    fn push_notice(&mut self, notice: impl Into<String>) {
        self.notices.push(notice.into());
    }
}

/// Assistant message for a finished turn, classified by exit code and output.
pub fn finalize_message(content: String, thinking: String, outcome: &ProcessOutcome) -> ChatMessage {
    if outcome.exit_code == EXIT_CODE_CANCELLED {
        return ChatMessage::assistant_error(CANCELLED_NOTICE).with_thinking(thinking);
    }

    let content = content.trim().to_string();
    if outcome.exit_code != 0 && content.is_empty() {
        return ChatMessage::assistant_error(error_summary(&outcome.stderr, outcome.exit_code));
    }

    ChatMessage::assistant(content).with_thinking(thinking)
}

/// Markdown summary of a failed run's stderr.
pub fn error_summary(stderr: &str, exit_code: i32) -> String {
    let lines: Vec<&str> = stderr
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .collect();

    let Some(last) = lines.last() else {
        return format!("**Error:** CLI exited with code {exit_code}");
    };

    if lines.len() <= ERROR_DETAIL_THRESHOLD {
        return format!("**Error:** {last}");
    }

    format!(
        "**Error:** {last}\n\n<details><summary>Full output</summary>\n\n```\n{}\n```\n\n</details>",
        stderr.trim()
    )
}

fn append_block(target: &mut String, block: &str) {
    if block.is_empty() {
        return;
    }
    if !target.is_empty() {
        target.push_str("\n\n");
    }
    target.push_str(block);
}

#[cfg(test)]
mod tests {
    use super::*;

    fn outcome(exit_code: i32, stdout: &str, stderr: &str) -> ProcessOutcome {
        ProcessOutcome {
            stdout: stdout.to_string(),
            stderr: stderr.to_string(),
            exit_code,
        }
    }

    #[test]
    fn error_summary_uses_last_line_for_short_stderr() {
        assert_eq!(
            error_summary("warning: retrying\nerror: model unreachable\n", 1),
            "**Error:** error: model unreachable"
        );
        assert_eq!(error_summary("  \n", 7), "**Error:** CLI exited with code 7");
    }

    #[test]
    fn error_summary_folds_long_stderr_into_details() {
        let stderr = "a\nb\nc\nfatal: boom";
        let summary = error_summary(stderr, 2);
        assert!(summary.starts_with("**Error:** fatal: boom\n\n<details><summary>Full output</summary>"));
        assert!(summary.contains("```\na\nb\nc\nfatal: boom\n```"));
    }

    #[test]
    fn non_zero_exit_with_output_is_a_normal_answer() {
        let message = finalize_message("partial answer\n".to_string(), String::new(), &outcome(1, "", "warn"));
        assert!(!message.is_error);
        assert_eq!(message.content, "partial answer");
    }

    #[test]
    fn cancellation_overrides_streamed_content() {
        let message = finalize_message(
            "half".to_string(),
            "thought".to_string(),
            &ProcessOutcome::cancelled("half".to_string()),
        );
        assert!(message.is_error);
        assert_eq!(message.content, CANCELLED_NOTICE);
        assert_eq!(message.thinking, "thought");
    }

    #[test]
    fn structured_text_blocks_are_separated() {
        let mut content = String::new();
        append_block(&mut content, "first");
        append_block(&mut content, "second");
        assert_eq!(content, "first\n\nsecond");
    }
}
