use std::path::{Path, PathBuf};

use time::OffsetDateTime;

use crate::error::SessionStoreError;

pub const CHATS_DIR: &str = "chats";
pub const MANIFEST_FILE: &str = "chats.json";
pub const SESSIONS_DIR: &str = "sessions";
pub const BACKUP_DIR: &str = ".backup";

#[must_use]
pub fn chats_dir(recording_dir: &Path) -> PathBuf {
    recording_dir.join(CHATS_DIR)
}

#[must_use]
pub fn manifest_path(recording_dir: &Path) -> PathBuf {
    chats_dir(recording_dir).join(MANIFEST_FILE)
}

#[must_use]
pub fn session_file_name(session_id: &str) -> String {
    format!("{session_id}.json")
}

#[must_use]
pub fn session_path(recording_dir: &Path, session_id: &str) -> PathBuf {
    chats_dir(recording_dir)
        .join(SESSIONS_DIR)
        .join(session_file_name(session_id))
}

#[must_use]
pub fn markdown_file_name(session_id: &str) -> String {
    format!("chat_{session_id}.md")
}

/// Backup path relative to the recording directory, as stored on messages.
#[must_use]
pub fn backup_relative_path(session_id: &str) -> String {
    format!("{BACKUP_DIR}/transcript_{session_id}.txt")
}

/// Sortable id derived from the creation time: `YYYYMMDD_HHMMSS`.
#[must_use]
pub fn session_id_for(created: OffsetDateTime) -> String {
    format!(
        "{:04}{:02}{:02}_{:02}{:02}{:02}",
        created.year(),
        u8::from(created.month()),
        created.day(),
        created.hour(),
        created.minute(),
        created.second()
    )
}

/// First of `base`, `base_2`, `base_3`, ... that `taken` does not claim.
/// Suffixed ids still sort after their base and before later seconds.
#[must_use]
pub fn unique_session_id(base: &str, mut taken: impl FnMut(&str) -> bool) -> String {
    if !taken(base) {
        return base.to_string();
    }
    (2..)
        .map(|suffix| format!("{base}_{suffix}"))
        .find(|candidate| !taken(candidate))
        .unwrap_or_else(|| base.to_string())
}

/// Rejects ids that would escape the sessions directory.
pub fn validate_session_id(session_id: &str) -> Result<(), SessionStoreError> {
    let valid = !session_id.is_empty()
        && session_id != "."
        && session_id != ".."
        && !session_id.contains(['/', '\\']);

    if valid {
        Ok(())
    } else {
        Err(SessionStoreError::InvalidSessionId {
            id: session_id.to_string(),
        })
    }
}
