mod error;
mod markdown;
mod paths;
mod replay;
mod schema;
mod store;

pub use error::SessionStoreError;
pub use markdown::render_markdown;
pub use paths::{
    backup_relative_path, manifest_path, markdown_file_name, session_file_name, session_id_for,
    session_path, unique_session_id,
};
pub use replay::{
    slice_excerpt, transcript_lines, BACKUP_READ_FAILED, REFERENCE_UNAVAILABLE,
    SNAPSHOT_UNAVAILABLE,
};
pub use schema::{
    ChatMessage, ChatSession, Role, SessionManifestEntry, TranscriptAttachment, TranscriptMode,
    TITLE_MAX_CHARS,
};
pub use store::{format_rfc3339, ChatHistoryStore};
