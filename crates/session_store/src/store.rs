use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;
use tracing::{debug, info, warn};

use crate::error::SessionStoreError;
use crate::paths::{
    backup_relative_path, chats_dir, manifest_path, session_file_name, session_path,
    session_id_for, unique_session_id, validate_session_id, CHATS_DIR, SESSIONS_DIR,
};
use crate::schema::{ChatSession, Manifest, SessionManifestEntry};

/// Chat sessions and their manifest under one recording directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatHistoryStore {
    pub(crate) recording_dir: PathBuf,
}

impl ChatHistoryStore {
    pub fn new(recording_dir: impl Into<PathBuf>) -> Self {
        Self {
            recording_dir: recording_dir.into(),
        }
    }

    pub fn recording_dir(&self) -> &Path {
        &self.recording_dir
    }

    /// Manifest entries, newest created first. A missing or unreadable
    /// manifest yields an empty list.
    pub fn list_sessions(&self) -> Vec<SessionManifestEntry> {
        let path = manifest_path(&self.recording_dir);
        match read_manifest(&path) {
            Ok(mut manifest) => {
                sort_newest_first(&mut manifest.chats);
                manifest.chats
            }
            Err(error) => {
                warn!(%error, "treating manifest as empty");
                Vec::new()
            }
        }
    }

    pub fn manifest_entry(&self, session_id: &str) -> Option<SessionManifestEntry> {
        self.list_sessions()
            .into_iter()
            .find(|entry| entry.id == session_id)
    }

    /// Replaces the entry with the same id in place, or appends it.
    pub fn upsert_manifest_entry(
        &self,
        entry: SessionManifestEntry,
    ) -> Result<(), SessionStoreError> {
        let path = manifest_path(&self.recording_dir);
        let mut manifest = read_manifest(&path).unwrap_or_else(|error| {
            warn!(%error, "rewriting unreadable manifest");
            Manifest::default()
        });

        match manifest.chats.iter_mut().find(|existing| existing.id == entry.id) {
            Some(existing) => *existing = entry,
            None => manifest.chats.push(entry),
        }
        sort_newest_first(&mut manifest.chats);

        write_json_atomic(&path, &manifest)
    }

    pub fn save_session(&self, session: &ChatSession) -> Result<PathBuf, SessionStoreError> {
        validate_session_id(&session.id)?;
        let path = session_path(&self.recording_dir, &session.id);
        write_json_atomic(&path, session)?;
        debug!(session_id = %session.id, path = %path.display(), "saved chat session");
        Ok(path)
    }

    /// Loads a session record. Missing or malformed records yield `None`.
    pub fn load_session(&self, session_id: &str) -> Option<ChatSession> {
        if let Err(error) = validate_session_id(session_id) {
            warn!(%error, "refusing to load session");
            return None;
        }

        let path = session_path(&self.recording_dir, session_id);
        let raw = match fs::read_to_string(&path) {
            Ok(raw) => raw,
            Err(source) => {
                let error = SessionStoreError::io("reading session file", &path, source);
                warn!(%error, "failed to load session");
                return None;
            }
        };

        match serde_json::from_str::<ChatSession>(&raw) {
            Ok(mut session) => {
                if session.id.is_empty() {
                    session.id = session_id.to_string();
                }
                Some(session)
            }
            Err(source) => {
                let error = SessionStoreError::json_parse(&path, source);
                warn!(%error, "failed to load session");
                None
            }
        }
    }

    /// Removes the session record, its manifest entry and its markdown export.
    /// Each step is attempted independently; failures are logged.
    pub fn delete_session(&self, session_id: &str) {
        if let Err(error) = validate_session_id(session_id) {
            warn!(%error, "refusing to delete session");
            return;
        }

        remove_file_logged(&session_path(&self.recording_dir, session_id), "session file");

        let path = manifest_path(&self.recording_dir);
        let mut manifest = match read_manifest(&path) {
            Ok(manifest) => manifest,
            Err(error) => {
                warn!(%error, "failed to update manifest after delete");
                return;
            }
        };

        let removed = manifest
            .chats
            .iter()
            .position(|entry| entry.id == session_id)
            .map(|index| manifest.chats.remove(index));

        if let Err(error) = write_json_atomic(&path, &manifest) {
            warn!(%error, "failed to update manifest after delete");
        }

        if let Some(entry) = removed {
            if !entry.markdown_file.is_empty() {
                let markdown = self.resolve(&entry.markdown_file);
                remove_file_logged(&markdown, "markdown export");
            }
        }
    }

    /// Saves `session` and refreshes its manifest entry, keeping the original
    /// creation time and markdown export path.
    pub fn record_session(
        &self,
        session: &ChatSession,
        now: OffsetDateTime,
    ) -> Result<SessionManifestEntry, SessionStoreError> {
        self.record_session_with_markdown(session, now, None)
    }

    pub(crate) fn record_session_with_markdown(
        &self,
        session: &ChatSession,
        now: OffsetDateTime,
        markdown_file: Option<String>,
    ) -> Result<SessionManifestEntry, SessionStoreError> {
        self.save_session(session)?;

        let timestamp = format_rfc3339(now)?;
        let existing = self.manifest_entry(&session.id);
        let (created, previous_markdown) = match existing {
            Some(entry) => (entry.created, entry.markdown_file),
            None => (timestamp.clone(), String::new()),
        };

        let entry = SessionManifestEntry {
            id: session.id.clone(),
            created,
            updated: timestamp,
            title: session.title(),
            model: session.model.clone(),
            cli_binary: session.cli_binary.clone(),
            assistant_name: session.assistant_name.clone(),
            message_count: session.messages.len(),
            markdown_file: markdown_file.unwrap_or(previous_markdown),
            session_file: format!("{CHATS_DIR}/{SESSIONS_DIR}/{}", session_file_name(&session.id)),
            transcript_directory: self.recording_dir.display().to_string(),
        };

        self.upsert_manifest_entry(entry.clone())?;
        Ok(entry)
    }

    /// Whether any saved record, manifest entry or transcript backup already
    /// uses `session_id`.
    pub fn session_id_in_use(&self, session_id: &str) -> bool {
        session_path(&self.recording_dir, session_id).exists()
            || self
                .recording_dir
                .join(backup_relative_path(session_id))
                .exists()
            || self.manifest_entry(session_id).is_some()
    }

    /// Id for a chat created at `created` that collides with nothing on disk.
    pub fn allocate_session_id(&self, created: OffsetDateTime) -> String {
        unique_session_id(&session_id_for(created), |id| self.session_id_in_use(id))
    }

    /// Overwrites the session's transcript backup and returns its path
    /// relative to the recording directory.
    pub fn write_transcript_backup(
        &self,
        session_id: &str,
        transcript: &str,
    ) -> Result<String, SessionStoreError> {
        validate_session_id(session_id)?;
        let relative = backup_relative_path(session_id);
        write_atomic(&self.recording_dir.join(&relative), transcript.as_bytes())?;
        Ok(relative)
    }

    pub(crate) fn resolve(&self, path: &str) -> PathBuf {
        let path = Path::new(path);
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.recording_dir.join(path)
        }
    }

    pub(crate) fn default_export_dir(&self) -> PathBuf {
        chats_dir(&self.recording_dir)
    }
}

pub fn format_rfc3339(at: OffsetDateTime) -> Result<String, SessionStoreError> {
    at.format(&Rfc3339).map_err(SessionStoreError::ClockFormat)
}

pub(crate) fn read_manifest(path: &Path) -> Result<Manifest, SessionStoreError> {
    let raw = match fs::read_to_string(path) {
        Ok(raw) => raw,
        Err(source) if source.kind() == io::ErrorKind::NotFound => return Ok(Manifest::default()),
        Err(source) => return Err(SessionStoreError::io("reading manifest", path, source)),
    };

    serde_json::from_str(&raw).map_err(|source| SessionStoreError::json_parse(path, source))
}

fn sort_newest_first(entries: &mut [SessionManifestEntry]) {
    // Unparseable timestamps sort after every valid one.
    entries.sort_by_cached_key(|entry| {
        std::cmp::Reverse((
            OffsetDateTime::parse(&entry.created, &Rfc3339).ok(),
            entry.created.clone(),
        ))
    });
}

pub(crate) fn write_json_atomic<T: serde::Serialize>(
    path: &Path,
    value: &T,
) -> Result<(), SessionStoreError> {
    let mut bytes = serde_json::to_vec_pretty(value)
        .map_err(|source| SessionStoreError::json_serialize(path, source))?;
    bytes.push(b'\n');
    write_atomic(path, &bytes)
}

/// Writes to a sibling temp file, syncs it, then renames over `path`.
pub(crate) fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), SessionStoreError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .map_err(|source| SessionStoreError::io("creating directory", parent, source))?;
    }

    let mut tmp_name = path.file_name().unwrap_or_default().to_os_string();
    tmp_name.push(".tmp");
    let tmp_path = path.with_file_name(tmp_name);

    let mut file = fs::File::create(&tmp_path)
        .map_err(|source| SessionStoreError::io("creating temp file", &tmp_path, source))?;
    file.write_all(bytes)
        .map_err(|source| SessionStoreError::io("writing temp file", &tmp_path, source))?;
    file.sync_all()
        .map_err(|source| SessionStoreError::io("syncing temp file", &tmp_path, source))?;
    drop(file);

    fs::rename(&tmp_path, path)
        .map_err(|source| SessionStoreError::io("replacing file", path, source))
}

fn remove_file_logged(path: &Path, what: &'static str) {
    match fs::remove_file(path) {
        Ok(()) => info!(path = %path.display(), "deleted {what}"),
        Err(source) if source.kind() == io::ErrorKind::NotFound => {
            debug!(path = %path.display(), "{what} already absent");
        }
        Err(source) => {
            let error = SessionStoreError::io("deleting file", path, source);
            warn!(%error, "failed to delete {what}");
        }
    }
}
