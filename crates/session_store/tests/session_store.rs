use std::fs;
use std::path::Path;

use serde_json::json;
use session_store::{
    manifest_path, session_path, ChatHistoryStore, ChatMessage, ChatSession, Role,
    SessionManifestEntry, TranscriptAttachment, TranscriptMode, REFERENCE_UNAVAILABLE,
    SNAPSHOT_UNAVAILABLE,
};
use tempfile::TempDir;
use time::macros::datetime;

fn store() -> (TempDir, ChatHistoryStore) {
    let dir = tempfile::tempdir().expect("tempdir should be created");
    let store = ChatHistoryStore::new(dir.path());
    (dir, store)
}

fn manifest_entry(id: &str, created: &str) -> SessionManifestEntry {
    SessionManifestEntry {
        id: id.to_string(),
        created: created.to_string(),
        updated: created.to_string(),
        title: format!("title {id}"),
        ..SessionManifestEntry::default()
    }
}

fn attachment(mode: TranscriptMode, start_line: usize, lines_sent: usize, line_count: usize) -> TranscriptAttachment {
    TranscriptAttachment {
        line_count,
        included_at: "2026-03-04T09:05:07Z".to_string(),
        mode,
        lines_sent,
        start_line,
        backup_file: ".backup/transcript_s1.txt".to_string(),
    }
}

fn numbered_lines(count: usize) -> String {
    (1..=count)
        .map(|n| format!("line {n}"))
        .collect::<Vec<_>>()
        .join("\n")
}

fn sample_session() -> ChatSession {
    let mut session = ChatSession::new("20260304_090507");
    session.model = "sonnet".to_string();
    session.connection = "work".to_string();
    session.assistant_name = "Scribe".to_string();
    session.cli_binary = "/usr/local/bin/cortex".to_string();
    session.extra_args = vec!["--bypass".to_string()];
    session.system_prompt = "Be brief.".to_string();
    session.messages = vec![
        ChatMessage::user("Résumé des décisions? 会议纪要 🚀\nsecond line")
            .with_transcript(attachment(TranscriptMode::Full, 0, 10, 10)),
        ChatMessage::assistant("**Décision:** ship it")
            .with_thinking("Reading the transcript…"),
        ChatMessage::user("and now?"),
        ChatMessage::assistant_error("*Chat cancelled.*"),
    ];
    session
}

#[test]
fn save_then_load_round_trips_every_field() {
    let (_dir, store) = store();
    let session = sample_session();

    let path = store.save_session(&session).expect("session should save");
    assert!(path.ends_with("chats/sessions/20260304_090507.json"));

    let loaded = store
        .load_session(&session.id)
        .expect("session should load");
    assert_eq!(loaded, session);
}

#[test]
fn load_defaults_missing_fields_and_ignores_unknown_ones() {
    let (dir, store) = store();
    let path = session_path(dir.path(), "legacy");
    fs::create_dir_all(path.parent().expect("parent")).expect("dirs");
    fs::write(
        &path,
        json!({
            "id": "legacy",
            "future_field": {"nested": true},
            "messages": [
                {"content": "no role given"},
                {"role": "assistant", "content": "hi", "extra": 1},
                {"role": "user", "content": "old transcript", "has_transcript": true}
            ]
        })
        .to_string(),
    )
    .expect("write legacy session");

    let loaded = store.load_session("legacy").expect("legacy session loads");
    assert_eq!(loaded.model, "");
    assert_eq!(loaded.messages.len(), 3);
    assert_eq!(loaded.messages[0].role, Role::User);
    assert_eq!(loaded.messages[1].role, Role::Assistant);
    assert!(!loaded.messages[1].is_error);

    let legacy = loaded.messages[2]
        .transcript
        .as_ref()
        .expect("transcript flag preserved");
    assert_eq!(legacy.mode, TranscriptMode::Full);
    assert_eq!(legacy.line_count, 0);
    assert_eq!(legacy.backup_file, "");
    assert_eq!(
        store.reconstruct_transcript_excerpt(&loaded.messages[2]),
        REFERENCE_UNAVAILABLE
    );
}

#[test]
fn load_of_missing_or_corrupt_session_is_absent() {
    let (dir, store) = store();
    assert!(store.load_session("nope").is_none());

    let path = session_path(dir.path(), "broken");
    fs::create_dir_all(path.parent().expect("parent")).expect("dirs");
    fs::write(&path, "{\"id\": \"broken\", \"messages\": [").expect("write");
    assert!(store.load_session("broken").is_none());

    assert!(store.load_session("../outside").is_none());
}

#[test]
fn missing_or_corrupt_manifest_lists_no_sessions() {
    let (dir, store) = store();
    assert!(store.list_sessions().is_empty());

    let path = manifest_path(dir.path());
    fs::create_dir_all(path.parent().expect("parent")).expect("dirs");
    fs::write(&path, "{\"chats\": [{\"id\": \"half").expect("write");
    assert!(store.list_sessions().is_empty());
}

#[test]
fn upsert_replaces_existing_entry_and_keeps_newest_first_order() {
    let (dir, store) = store();

    store
        .upsert_manifest_entry(manifest_entry("a", "2026-03-01T10:00:00Z"))
        .expect("upsert a");
    store
        .upsert_manifest_entry(manifest_entry("c", "2026-03-03T10:00:00Z"))
        .expect("upsert c");
    store
        .upsert_manifest_entry(manifest_entry("b", "2026-03-02T10:00:00Z"))
        .expect("upsert b");

    let mut replacement = manifest_entry("b", "2026-03-02T10:00:00Z");
    replacement.title = "renamed".to_string();
    replacement.message_count = 7;
    store.upsert_manifest_entry(replacement).expect("replace b");

    let listed = store.list_sessions();
    let ids: Vec<&str> = listed.iter().map(|entry| entry.id.as_str()).collect();
    assert_eq!(ids, vec!["c", "b", "a"]);
    assert_eq!(listed[1].title, "renamed");
    assert_eq!(listed[1].message_count, 7);

    let raw: serde_json::Value =
        serde_json::from_str(&fs::read_to_string(manifest_path(dir.path())).expect("manifest"))
            .expect("manifest json");
    assert_eq!(raw["chats"].as_array().map(Vec::len), Some(3));

    let leftovers: Vec<_> = fs::read_dir(dir.path().join("chats"))
        .expect("chats dir")
        .filter_map(Result::ok)
        .filter(|entry| entry.file_name().to_string_lossy().ends_with(".tmp"))
        .collect();
    assert!(leftovers.is_empty());
}

#[test]
fn record_session_preserves_creation_time_and_derives_title() {
    let (_dir, store) = store();
    let mut session = sample_session();

    let first = store
        .record_session(&session, datetime!(2026-03-04 09:05:07 UTC))
        .expect("first record");
    assert_eq!(first.created, "2026-03-04T09:05:07Z");
    assert_eq!(first.title, "Résumé des décisions? 会议纪要 🚀 second line");
    assert_eq!(first.message_count, 4);
    assert_eq!(first.session_file, "chats/sessions/20260304_090507.json");

    session.messages.push(ChatMessage::user("follow up"));
    let second = store
        .record_session(&session, datetime!(2026-03-04 09:30:00 UTC))
        .expect("second record");
    assert_eq!(second.created, "2026-03-04T09:05:07Z");
    assert_eq!(second.updated, "2026-03-04T09:30:00Z");
    assert_eq!(second.message_count, 5);
    assert_eq!(store.list_sessions().len(), 1);
}

#[test]
fn allocated_ids_skip_chats_already_on_disk() {
    let (_dir, store) = store();
    let created = datetime!(2026-03-04 09:05:07 UTC);
    assert_eq!(store.allocate_session_id(created), "20260304_090507");

    store
        .record_session(&sample_session(), created)
        .expect("record");
    assert_eq!(store.allocate_session_id(created), "20260304_090507_2");

    store
        .write_transcript_backup("20260304_090507_2", "line 1")
        .expect("backup");
    assert!(store.session_id_in_use("20260304_090507_2"));
    assert_eq!(store.allocate_session_id(created), "20260304_090507_3");
}

#[test]
fn long_titles_are_cut_to_eighty_characters() {
    let mut session = ChatSession::new("s");
    session.messages.push(ChatMessage::assistant("greeting first"));
    session.messages.push(ChatMessage::user("é".repeat(100)));
    assert_eq!(session.title(), "é".repeat(80));
}

#[test]
fn delete_removes_record_manifest_entry_and_markdown() {
    let (dir, store) = store();
    let session = sample_session();
    let other = ChatSession::new("20260305_000000");

    store
        .record_session(&other, datetime!(2026-03-05 00:00:00 UTC))
        .expect("record other");
    let markdown = store
        .export_markdown(&session, None, datetime!(2026-03-04 09:05:07 UTC))
        .expect("export markdown");
    assert!(markdown.exists());
    assert_eq!(
        store
            .manifest_entry(&session.id)
            .expect("entry exists")
            .markdown_file,
        markdown.display().to_string()
    );

    store.delete_session(&session.id);

    assert!(!session_path(dir.path(), &session.id).exists());
    assert!(!markdown.exists());
    let ids: Vec<String> = store.list_sessions().into_iter().map(|entry| entry.id).collect();
    assert_eq!(ids, vec!["20260305_000000".to_string()]);

    // Already gone: tolerated.
    store.delete_session(&session.id);
    store.delete_session("never-existed");
}

#[test]
fn export_honors_custom_directory() {
    let (_dir, store) = store();
    let export_dir = tempfile::tempdir().expect("export dir");
    let session = sample_session();

    let path = store
        .export_markdown(&session, Some(export_dir.path()), datetime!(2026-03-04 09:05:07 UTC))
        .expect("export");

    assert_eq!(path, export_dir.path().join("chat_20260304_090507.md"));
    let text = fs::read_to_string(&path).expect("markdown");
    assert!(text.contains("**Scribe:**"));
    assert!(text.contains("<details><summary>Thinking</summary>"));
}

#[test]
fn excerpts_survive_backup_growth() {
    let (dir, store) = store();

    let first_backup = store
        .write_transcript_backup("s1", &numbered_lines(10))
        .expect("first backup");
    assert_eq!(first_backup, ".backup/transcript_s1.txt");
    let first = ChatMessage::user("q1").with_transcript(attachment(TranscriptMode::Full, 0, 10, 10));

    store
        .write_transcript_backup("s1", &numbered_lines(25))
        .expect("second backup");
    let second =
        ChatMessage::user("q2").with_transcript(attachment(TranscriptMode::LastN, 20, 5, 25));

    assert_eq!(store.reconstruct_transcript_excerpt(&first), numbered_lines(10));
    assert_eq!(
        store.reconstruct_transcript_excerpt(&second),
        "line 21\nline 22\nline 23\nline 24\nline 25"
    );
    assert!(dir.path().join(".backup/transcript_s1.txt").exists());
}

#[test]
fn excerpts_report_placeholders_when_backup_cannot_serve_them() {
    let (_dir, store) = store();
    let message =
        ChatMessage::user("q").with_transcript(attachment(TranscriptMode::LastN, 20, 5, 25));

    assert_eq!(store.reconstruct_transcript_excerpt(&message), SNAPSHOT_UNAVAILABLE);

    store
        .write_transcript_backup("s1", &numbered_lines(8))
        .expect("shrunk backup");
    assert_eq!(store.reconstruct_transcript_excerpt(&message), SNAPSHOT_UNAVAILABLE);

    assert_eq!(
        store.reconstruct_transcript_excerpt(&ChatMessage::user("plain")),
        REFERENCE_UNAVAILABLE
    );
}

#[test]
fn session_files_are_pretty_json_with_flat_message_fields() {
    let (dir, store) = store();
    store.save_session(&sample_session()).expect("save");

    let raw = fs::read_to_string(session_path(dir.path(), "20260304_090507")).expect("read");
    let value: serde_json::Value = serde_json::from_str(&raw).expect("json");
    let first = &value["messages"][0];
    assert_eq!(first["role"], "user");
    assert_eq!(first["has_transcript"], true);
    assert_eq!(first["transcript_mode"], "full");
    assert_eq!(first["transcript_lines_sent"], 10);
    assert!(Path::new(&dir.path().join("chats/sessions")).is_dir());
}
