use std::path::{Path, PathBuf};

use time::OffsetDateTime;
use tracing::info;

use crate::error::SessionStoreError;
use crate::paths::markdown_file_name;
use crate::schema::{ChatSession, Role};
use crate::store::{format_rfc3339, write_atomic, ChatHistoryStore};

const DEFAULT_MODEL_LABEL: &str = "auto";
const DEFAULT_ASSISTANT_LABEL: &str = "Assistant";

/// Renders a session for humans: YAML frontmatter, then each message.
pub fn render_markdown(session: &ChatSession, date: &str, transcript_directory: &str) -> String {
    let model = non_empty_or(&session.model, DEFAULT_MODEL_LABEL);
    let assistant = non_empty_or(&session.assistant_name, DEFAULT_ASSISTANT_LABEL);

    let mut lines = vec![
        "---".to_string(),
        format!("date: {date}"),
        format!("model: {model}"),
        format!("assistant_name: {assistant}"),
        format!("chat_id: \"{}\"", session.id),
        format!("transcript_directory: {transcript_directory}"),
        "---".to_string(),
        String::new(),
        format!("# Chat {}", session.id),
        String::new(),
    ];

    for message in &session.messages {
        lines.push("---".to_string());
        lines.push(String::new());
        match message.role {
            Role::User => lines.push("**You:**".to_string()),
            Role::Assistant => lines.push(format!("**{assistant}:**")),
        }
        lines.push(String::new());

        if message.role == Role::Assistant && !message.thinking.is_empty() {
            lines.push("<details><summary>Thinking</summary>".to_string());
            lines.push(String::new());
            lines.push(message.thinking.clone());
            lines.push(String::new());
            lines.push("</details>".to_string());
            lines.push(String::new());
        }

        lines.push(message.content.clone());
        lines.push(String::new());
    }

    lines.join("\n")
}

impl ChatHistoryStore {
    /// Writes `chat_<id>.md` into `export_dir` (default `chats/`) and records
    /// the export on the session's manifest entry.
    pub fn export_markdown(
        &self,
        session: &ChatSession,
        export_dir: Option<&Path>,
        now: OffsetDateTime,
    ) -> Result<PathBuf, SessionStoreError> {
        let dir = export_dir
            .map(Path::to_path_buf)
            .unwrap_or_else(|| self.default_export_dir());
        let path = dir.join(markdown_file_name(&session.id));

        let date = format_rfc3339(now)?;
        let text = render_markdown(session, &date, &self.recording_dir.display().to_string());
        write_atomic(&path, text.as_bytes())?;
        info!(session_id = %session.id, path = %path.display(), "exported chat markdown");

        self.record_session_with_markdown(session, now, Some(path.display().to_string()))?;
        Ok(path)
    }
}

fn non_empty_or<'a>(value: &'a str, fallback: &'a str) -> &'a str {
    if value.trim().is_empty() {
        fallback
    } else {
        value
    }
}
