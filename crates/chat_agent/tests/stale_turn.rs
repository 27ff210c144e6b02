use std::path::PathBuf;

use chat_agent::app::{ChatApp, HostOps, Mode, TurnId};
use cli_process::{OutputClassifier, OutputDelta, ProcessCommand, ProcessOutcome};
use session_store::{session_id_for, ChatMessage, ChatSession, SessionManifestEntry};
use time::OffsetDateTime;

struct HostStub {
    next_turn_id: TurnId,
}

impl HostStub {
    fn new(next_turn_id: TurnId) -> Self {
        Self { next_turn_id }
    }
}

impl HostOps for HostStub {
    fn start_turn(
        &mut self,
        _command: ProcessCommand,
        _classifier: OutputClassifier,
    ) -> Result<TurnId, String> {
        Ok(self.next_turn_id)
    }

    fn cancel_turn(&mut self, _turn_id: TurnId) {}

    fn current_transcript(&mut self) -> String {
        String::new()
    }

    fn allocate_session_id(&mut self, created: OffsetDateTime) -> String {
        session_id_for(created)
    }

    fn write_transcript_backup(&mut self, _session_id: &str, _transcript: &str) -> Option<String> {
        None
    }

    fn list_sessions(&mut self) -> Vec<SessionManifestEntry> {
        Vec::new()
    }

    fn load_session(&mut self, _session_id: &str) -> Option<ChatSession> {
        None
    }

    fn delete_session(&mut self, _session_id: &str) {}

    fn export_session(&mut self, _session: &ChatSession) -> Option<PathBuf> {
        None
    }

    fn reconstruct_excerpt(&mut self, _message: &ChatMessage) -> String {
        String::new()
    }

    fn request_stop(&mut self) {}
}

fn exited(code: i32, stderr: &str) -> ProcessOutcome {
    ProcessOutcome {
        stdout: String::new(),
        stderr: stderr.to_string(),
        exit_code: code,
    }
}

#[test]
fn stale_turn_events_are_ignored_while_different_turn_is_active() {
    let stale_turn = 10;
    let active_turn = 20;

    let mut app = ChatApp::default();
    let mut host = HostStub::new(active_turn);

    app.on_input_replace("active prompt".to_string());
    app.on_submit(&mut host);
    app.on_turn_delta(active_turn, &OutputDelta::Text("live output".to_string()));

    let snapshot = app.clone();

    app.on_turn_delta(stale_turn, &OutputDelta::Text("stale chunk".to_string()));
    app.on_turn_delta(stale_turn, &OutputDelta::Thinking("stale thought".to_string()));
    assert!(!app.on_turn_finished(stale_turn, &exited(1, "stale error")));
    assert!(!app.on_turn_finished(stale_turn, &ProcessOutcome::cancelled(String::new())));

    assert_eq!(app, snapshot);

    app.on_turn_delta(active_turn, &OutputDelta::Text("still live".to_string()));
    assert_eq!(app.mode, Mode::AwaitingResponse { turn_id: active_turn });
    assert_eq!(
        app.streaming().map(|streaming| streaming.content.as_str()),
        Some("live output\n\nstill live")
    );
}

#[test]
fn late_events_after_completion_do_not_touch_the_session() {
    let turn = 3;
    let mut app = ChatApp::default();
    let mut host = HostStub::new(turn);

    app.on_input_replace("question".to_string());
    app.on_submit(&mut host);
    app.on_turn_delta(turn, &OutputDelta::Text("answer".to_string()));
    assert!(app.on_turn_finished(turn, &exited(0, "")));

    let messages = app.session().messages.clone();
    app.on_turn_delta(turn, &OutputDelta::Text("late".to_string()));
    assert!(!app.on_turn_finished(turn, &exited(0, "")));

    assert_eq!(app.session().messages, messages);
    assert_eq!(app.mode, Mode::Idle);
    assert!(app.streaming().is_none());
}
