//! Transcript window policy.
//!
//! Decides how much of the growing transcript rides along with each outgoing
//! message, and reports where the last attached copy sits relative to the
//! history window the model will see next.

use std::fmt;

use session_store::{transcript_lines, ChatMessage, TranscriptMode};
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;

/// A one-shot inclusion the user asked for explicitly.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ForcedInclusion {
    Full,
    Updates,
    LastN(usize),
}

/// Transcript text chosen for one outgoing message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TranscriptSelection {
    pub mode: TranscriptMode,
    pub text: String,
    /// Total transcript lines when the selection was made.
    pub line_count: usize,
    pub start_line: usize,
    pub lines_sent: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TranscriptPolicy {
    first_message_sent: bool,
    forced: Option<ForcedInclusion>,
    skip_next: bool,
    last_included_line_count: usize,
}

impl TranscriptPolicy {
    pub fn new() -> Self {
        Self::default()
    }

    /// Policy state implied by a loaded session's history.
    pub fn restore(messages: &[ChatMessage]) -> Self {
        let last_included_line_count = messages
            .iter()
            .rev()
            .find_map(|message| message.transcript.as_ref())
            .map(|attachment| attachment.line_count)
            .unwrap_or(0);

        Self {
            first_message_sent: !messages.is_empty(),
            forced: None,
            skip_next: false,
            last_included_line_count,
        }
    }

    pub fn first_message_sent(&self) -> bool {
        self.first_message_sent
    }

    pub fn last_included_line_count(&self) -> usize {
        self.last_included_line_count
    }

    pub fn forced(&self) -> Option<ForcedInclusion> {
        self.forced
    }

    pub fn skip_next(&self) -> bool {
        self.skip_next
    }

    /// Queues an inclusion for the next message, replacing any pending choice.
    pub fn queue(&mut self, inclusion: ForcedInclusion) {
        self.forced = Some(inclusion);
        self.skip_next = false;
    }

    /// Sends the next message without any transcript, even the first one.
    pub fn skip_next_message(&mut self) {
        self.skip_next = true;
        self.forced = None;
    }

    /// Picks the transcript text for the outgoing message. Pending choices are
    /// consumed whether or not anything gets attached.
    pub fn select(&mut self, transcript: &str) -> Option<TranscriptSelection> {
        let skip = std::mem::take(&mut self.skip_next);
        let forced = self.forced.take();
        let first_message = !self.first_message_sent;
        self.first_message_sent = true;

        if skip {
            return None;
        }

        let lines = transcript_lines(transcript);
        let total = lines.len();
        if total == 0 {
            return None;
        }

        let inclusion = match forced {
            Some(inclusion) => inclusion,
            None if first_message => ForcedInclusion::Full,
            None => return None,
        };

        let last = self.last_included_line_count;
        let (mode, start_line) = match inclusion {
            ForcedInclusion::Updates if last > 0 && last < total => (TranscriptMode::Updates, last),
            ForcedInclusion::LastN(n) if n > 0 => (TranscriptMode::LastN, total - n.min(total)),
            _ => (TranscriptMode::Full, 0),
        };

        self.last_included_line_count = total;
        Some(TranscriptSelection {
            mode,
            text: lines[start_line..].join("\n"),
            line_count: total,
            start_line,
            lines_sent: total - start_line,
        })
    }

    /// User-facing status for the current history and transcript size.
    pub fn status(
        &self,
        messages: &[ChatMessage],
        max_history: usize,
        current_line_count: usize,
    ) -> TranscriptStatus {
        if self.skip_next {
            return TranscriptStatus::SkipQueued;
        }
        if let Some(inclusion) = self.forced {
            return TranscriptStatus::Queued(inclusion);
        }
        if !self.first_message_sent && current_line_count > 0 {
            return TranscriptStatus::AutoFullOnFirstSend;
        }

        match locate_transcript(messages, max_history, current_line_count) {
            TranscriptPlacement::InWindow {
                position,
                window,
                included_at,
                new_lines,
            } => TranscriptStatus::InWindow {
                position,
                window,
                included_at,
                new_lines,
            },
            TranscriptPlacement::ScrolledOut { window, new_lines } => {
                TranscriptStatus::ScrolledOut { window, new_lines }
            }
            TranscriptPlacement::Never if current_line_count > 0 => TranscriptStatus::NotIncluded {
                lines: current_line_count,
            },
            TranscriptPlacement::Never => TranscriptStatus::NoTranscript,
        }
    }
}

/// Where the most recent transcript-bearing message sits in the history.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TranscriptPlacement {
    Never,
    InWindow {
        /// 1-based position inside the trailing window.
        position: usize,
        window: usize,
        included_at: String,
        new_lines: usize,
    },
    ScrolledOut {
        window: usize,
        new_lines: usize,
    },
}

/// Finds the most recent transcript-bearing message and checks whether it is
/// among the last `max_history` messages. The reported window never exceeds
/// the history length. Pure.
pub fn locate_transcript(
    messages: &[ChatMessage],
    max_history: usize,
    current_line_count: usize,
) -> TranscriptPlacement {
    let Some((index, attachment)) = messages
        .iter()
        .enumerate()
        .rev()
        .find_map(|(index, message)| message.transcript.as_ref().map(|t| (index, t)))
    else {
        return TranscriptPlacement::Never;
    };

    let new_lines = current_line_count.saturating_sub(attachment.line_count);
    let window = max_history.min(messages.len());
    let window_start = messages.len() - window;
    if index >= window_start && window > 0 {
        TranscriptPlacement::InWindow {
            position: index - window_start + 1,
            window,
            included_at: attachment.included_at.clone(),
            new_lines,
        }
    } else {
        TranscriptPlacement::ScrolledOut { window, new_lines }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TranscriptStatus {
    NoTranscript,
    SkipQueued,
    Queued(ForcedInclusion),
    AutoFullOnFirstSend,
    InWindow {
        position: usize,
        window: usize,
        included_at: String,
        new_lines: usize,
    },
    ScrolledOut {
        window: usize,
        new_lines: usize,
    },
    NotIncluded {
        lines: usize,
    },
}

impl TranscriptStatus {
    /// New transcript lines beyond the last attached copy.
    pub fn new_lines(&self) -> usize {
        match self {
            Self::InWindow { new_lines, .. } | Self::ScrolledOut { new_lines, .. } => *new_lines,
            _ => 0,
        }
    }
}

impl fmt::Display for TranscriptStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NoTranscript => f.write_str("Chat History: no transcript"),
            Self::SkipQueued => f.write_str("Chat History: transcript skipped for next message"),
            Self::Queued(ForcedInclusion::Full) => {
                f.write_str("Chat History: full transcript queued")
            }
            Self::Queued(ForcedInclusion::Updates) => f.write_str("Chat History: new lines queued"),
            Self::Queued(ForcedInclusion::LastN(n)) => {
                write!(f, "Chat History: last {n} lines queued")
            }
            Self::AutoFullOnFirstSend => {
                f.write_str("Chat History: full transcript auto-included on first send")
            }
            Self::InWindow {
                position,
                window,
                included_at,
                new_lines,
            } => {
                write!(f, "Transcript in msg {position} of {window}")?;
                if let Some(clock) = clock_label(included_at) {
                    write!(f, " ({clock})")?;
                }
                write_new_lines(f, *new_lines)
            }
            Self::ScrolledOut { window, new_lines } => {
                write!(f, "Transcript not in last {window} msgs")?;
                write_new_lines(f, *new_lines)
            }
            Self::NotIncluded { lines } => {
                write!(f, "Transcript not yet included, {lines} lines available")
            }
        }
    }
}

fn write_new_lines(f: &mut fmt::Formatter<'_>, new_lines: usize) -> fmt::Result {
    match new_lines {
        0 => Ok(()),
        1 => f.write_str(", +1 new line"),
        n => write!(f, ", +{n} new lines"),
    }
}

fn clock_label(included_at: &str) -> Option<String> {
    let at = OffsetDateTime::parse(included_at, &Rfc3339).ok()?;
    Some(format!("{:02}:{:02}", at.hour(), at.minute()))
}
