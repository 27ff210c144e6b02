use std::fs;
use std::io;

use tracing::warn;

use crate::error::SessionStoreError;
use crate::schema::{ChatMessage, TranscriptAttachment};
use crate::store::ChatHistoryStore;

pub const REFERENCE_UNAVAILABLE: &str =
    "(Transcript reference not available, older session format)";
pub const SNAPSHOT_UNAVAILABLE: &str =
    "(Transcript snapshot unavailable, backup may have been overwritten by a later inclusion)";
pub const BACKUP_READ_FAILED: &str = "(Failed to read transcript backup)";

/// Lines of a transcript as counted for inclusion offsets. Whitespace-only
/// text has no lines.
pub fn transcript_lines(text: &str) -> Vec<&str> {
    if text.trim().is_empty() {
        return Vec::new();
    }
    text.lines().collect()
}

/// Cuts the recorded range out of a backup's text, or `None` when the range
/// no longer fits. A zero `lines_sent` means the range was never recorded.
pub fn slice_excerpt(backup: &str, attachment: &TranscriptAttachment) -> Option<String> {
    let lines = transcript_lines(backup);
    if attachment.lines_sent == 0 {
        return Some(lines.join("\n"));
    }

    let end = attachment.start_line.checked_add(attachment.lines_sent)?;
    lines
        .get(attachment.start_line..end)
        .map(|excerpt| excerpt.join("\n"))
}

impl ChatHistoryStore {
    /// Best-effort recovery of the transcript text sent with `message`.
    ///
    /// The backup holds the latest inclusion only. Earlier ranges stay valid
    /// while the transcript grows by appending; otherwise a placeholder comes
    /// back instead of text.
    pub fn reconstruct_transcript_excerpt(&self, message: &ChatMessage) -> String {
        let Some(attachment) = message
            .transcript
            .as_ref()
            .filter(|attachment| !attachment.backup_file.is_empty())
        else {
            return REFERENCE_UNAVAILABLE.to_string();
        };

        let path = self.resolve(&attachment.backup_file);
        let backup = match fs::read_to_string(&path) {
            Ok(backup) => backup,
            Err(source) if source.kind() == io::ErrorKind::NotFound => {
                return SNAPSHOT_UNAVAILABLE.to_string();
            }
            Err(source) => {
                let error = SessionStoreError::io("reading transcript backup", &path, source);
                warn!(%error, "transcript reconstruction failed");
                return BACKUP_READ_FAILED.to_string();
            }
        };

        slice_excerpt(&backup, attachment).unwrap_or_else(|| {
            warn!(
                path = %path.display(),
                start_line = attachment.start_line,
                lines_sent = attachment.lines_sent,
                "recorded range does not fit the current backup"
            );
            SNAPSHOT_UNAVAILABLE.to_string()
        })
    }
}
