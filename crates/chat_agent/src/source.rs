//! Upstream collaborators: where transcript text and recording folders come from.

use std::fs;
use std::io;
use std::path::PathBuf;

use tracing::warn;

/// Returns the current full transcript on demand.
pub trait TranscriptSource: Send + Sync {
    fn transcript(&self) -> String;
}

/// Returns the directory a session's artifacts live under, if any.
pub trait RecordingScope: Send + Sync {
    fn recording_dir(&self) -> Option<PathBuf>;
}

impl<F> TranscriptSource for F
where
    F: Fn() -> String + Send + Sync,
{
    fn transcript(&self) -> String {
        self()
    }
}

/// Transcript kept in a text file that an external recorder appends to.
#[derive(Debug, Clone)]
pub struct FileTranscript {
    path: PathBuf,
}

impl FileTranscript {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl TranscriptSource for FileTranscript {
    fn transcript(&self) -> String {
        match fs::read_to_string(&self.path) {
            Ok(text) => text,
            Err(error) if error.kind() == io::ErrorKind::NotFound => String::new(),
            Err(error) => {
                warn!(path = %self.path.display(), %error, "failed to read transcript");
                String::new()
            }
        }
    }
}

/// Source with no transcript at all.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoTranscript;

impl TranscriptSource for NoTranscript {
    fn transcript(&self) -> String {
        String::new()
    }
}

/// Fixed recording directory, or none.
#[derive(Debug, Clone, Default)]
pub struct FixedScope(pub Option<PathBuf>);

impl RecordingScope for FixedScope {
    fn recording_dir(&self) -> Option<PathBuf> {
        self.0.clone()
    }
}
