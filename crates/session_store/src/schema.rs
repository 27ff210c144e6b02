use serde::{Deserialize, Serialize};

pub const TITLE_MAX_CHARS: usize = 80;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Role {
    #[default]
    User,
    Assistant,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Assistant => "assistant",
        }
    }

    /// Unknown roles read as `User`.
    fn parse(value: &str) -> Self {
        match value {
            "assistant" => Self::Assistant,
            _ => Self::User,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TranscriptMode {
    Full,
    Updates,
    LastN,
}

impl TranscriptMode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Full => "full",
            Self::Updates => "updates",
            Self::LastN => "last_n",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "full" => Some(Self::Full),
            "updates" => Some(Self::Updates),
            "last_n" => Some(Self::LastN),
            _ => None,
        }
    }

    /// Heading shown above a reconstructed excerpt.
    pub fn label(self, lines_sent: usize) -> String {
        match self {
            Self::LastN => format!("Transcript (last {lines_sent} lines)"),
            Self::Updates => "Transcript Update (new content)".to_string(),
            Self::Full => "Full Transcript".to_string(),
        }
    }
}

/// What transcript text went out with a user message, and where to find it again.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TranscriptAttachment {
    /// Total transcript lines at the time of sending.
    pub line_count: usize,
    /// RFC3339 UTC timestamp.
    pub included_at: String,
    pub mode: TranscriptMode,
    pub lines_sent: usize,
    pub start_line: usize,
    /// Backup path relative to the recording directory.
    pub backup_file: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "MessageRecord", into = "MessageRecord")]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
    pub thinking: String,
    pub is_error: bool,
    pub transcript: Option<TranscriptAttachment>,
}

impl ChatMessage {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
            ..Self::default()
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
            ..Self::default()
        }
    }

    pub fn assistant_error(content: impl Into<String>) -> Self {
        Self {
            is_error: true,
            ..Self::assistant(content)
        }
    }

    #[must_use]
    pub fn with_thinking(mut self, thinking: impl Into<String>) -> Self {
        self.thinking = thinking.into();
        self
    }

    #[must_use]
    pub fn with_transcript(mut self, transcript: TranscriptAttachment) -> Self {
        self.transcript = Some(transcript);
        self
    }

    pub fn has_transcript(&self) -> bool {
        self.transcript.is_some()
    }
}

// Flat on-disk shape. Every field is optional so older and newer files load.
#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(default)]
struct MessageRecord {
    role: String,
    content: String,
    thinking: String,
    has_transcript: bool,
    is_error: bool,
    transcript_line_count: usize,
    transcript_included_at: String,
    transcript_mode: String,
    transcript_lines_sent: usize,
    transcript_start_line: usize,
    transcript_backup_file: String,
}

impl From<MessageRecord> for ChatMessage {
    fn from(record: MessageRecord) -> Self {
        let transcript = record.has_transcript.then(|| TranscriptAttachment {
            line_count: record.transcript_line_count,
            included_at: record.transcript_included_at,
            mode: TranscriptMode::parse(&record.transcript_mode).unwrap_or(TranscriptMode::Full),
            lines_sent: record.transcript_lines_sent,
            start_line: record.transcript_start_line,
            backup_file: record.transcript_backup_file,
        });

        Self {
            role: Role::parse(&record.role),
            content: record.content,
            thinking: record.thinking,
            is_error: record.is_error,
            transcript,
        }
    }
}

impl From<ChatMessage> for MessageRecord {
    fn from(message: ChatMessage) -> Self {
        let mut record = Self {
            role: message.role.as_str().to_string(),
            content: message.content,
            thinking: message.thinking,
            is_error: message.is_error,
            ..Self::default()
        };

        if let Some(transcript) = message.transcript {
            record.has_transcript = true;
            record.transcript_line_count = transcript.line_count;
            record.transcript_included_at = transcript.included_at;
            record.transcript_mode = transcript.mode.as_str().to_string();
            record.transcript_lines_sent = transcript.lines_sent;
            record.transcript_start_line = transcript.start_line;
            record.transcript_backup_file = transcript.backup_file;
        }

        record
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChatSession {
    pub id: String,
    pub model: String,
    pub connection: String,
    pub assistant_name: String,
    pub cli_binary: String,
    pub extra_args: Vec<String>,
    pub system_prompt: String,
    pub messages: Vec<ChatMessage>,
}

impl ChatSession {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            ..Self::default()
        }
    }

    /// First user message, single-lined and cut to [`TITLE_MAX_CHARS`].
    pub fn title(&self) -> String {
        self.messages
            .iter()
            .find(|message| message.role == Role::User)
            .map(|message| {
                message
                    .content
                    .chars()
                    .take(TITLE_MAX_CHARS)
                    .map(|c| if c == '\n' || c == '\r' { ' ' } else { c })
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Index and metadata of the most recent transcript-bearing message.
    pub fn last_transcript(&self) -> Option<(usize, &TranscriptAttachment)> {
        self.messages
            .iter()
            .enumerate()
            .rev()
            .find_map(|(index, message)| message.transcript.as_ref().map(|t| (index, t)))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionManifestEntry {
    pub id: String,
    /// RFC3339 UTC.
    pub created: String,
    pub updated: String,
    pub title: String,
    pub model: String,
    pub cli_binary: String,
    pub assistant_name: String,
    pub message_count: usize,
    pub markdown_file: String,
    pub session_file: String,
    pub transcript_directory: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub(crate) struct Manifest {
    pub(crate) chats: Vec<SessionManifestEntry>,
}
