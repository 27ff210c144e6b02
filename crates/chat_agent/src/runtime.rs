use std::collections::HashSet;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, OnceLock};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use cli_process::{
    EnvResolver, Environment, IdleVerdict, IdleWatchdog, OutputClassifier, OutputDelta,
    ProcessCommand, ProcessHandle, ProcessOutcome, ProcessSupervisor, CANCEL_GRACE_PERIOD,
    EXIT_CODE_SPAWN_FAILED,
};
use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};
use session_store::{
    session_id_for, unique_session_id, ChatHistoryStore, ChatMessage, ChatSession,
    SessionManifestEntry, REFERENCE_UNAVAILABLE,
};
use time::OffsetDateTime;
use tracing::{debug, info, warn};

use crate::app::{ChatApp, HostOps, Mode, TurnId, TURN_ALREADY_ACTIVE};
use crate::source::{RecordingScope, TranscriptSource};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TurnEvent {
    Delta { turn_id: TurnId, delta: OutputDelta },
    Finished { turn_id: TurnId, outcome: ProcessOutcome },
}

impl TurnEvent {
    pub fn turn_id(&self) -> TurnId {
        match self {
            Self::Delta { turn_id, .. } | Self::Finished { turn_id, .. } => *turn_id,
        }
    }

    fn is_terminal(&self) -> bool {
        matches!(self, Self::Finished { .. })
    }
}

/// Knobs for how turns are run.
#[derive(Debug, Clone)]
pub struct RuntimeOptions {
    pub env: EnvResolver,
    pub watchdog: Option<IdleWatchdog>,
    pub grace_period: Duration,
}

impl Default for RuntimeOptions {
    fn default() -> Self {
        Self {
            env: EnvResolver::new(),
            watchdog: Some(IdleWatchdog::default()),
            grace_period: CANCEL_GRACE_PERIOD,
        }
    }
}

struct ActiveTurn {
    turn_id: TurnId,
    handle: ProcessHandle,
    join_handle: Option<JoinHandle<()>>,
    idle_warned: bool,
    idle_cancelled: bool,
}

pub struct RuntimeController {
    app: Arc<Mutex<ChatApp>>,
    events_tx: Sender<TurnEvent>,
    events_rx: Receiver<TurnEvent>,
    next_turn_id: AtomicU64,
    active_turn: Mutex<Option<ActiveTurn>>,
    transcript: Arc<dyn TranscriptSource>,
    scope: Arc<dyn RecordingScope>,
    env: EnvResolver,
    environment: OnceLock<Environment>,
    watchdog: Option<IdleWatchdog>,
    grace_period: Duration,
    stop_requested: AtomicBool,
    issued_session_ids: Mutex<HashSet<String>>,
}

impl RuntimeController {
    pub fn new(
        app: Arc<Mutex<ChatApp>>,
        transcript: Arc<dyn TranscriptSource>,
        scope: Arc<dyn RecordingScope>,
        options: RuntimeOptions,
    ) -> Arc<Self> {
        let (events_tx, events_rx) = crossbeam_channel::unbounded();
        Arc::new(Self {
            app,
            events_tx,
            events_rx,
            next_turn_id: AtomicU64::new(1),
            active_turn: Mutex::new(None),
            transcript,
            scope,
            env: options.env,
            environment: OnceLock::new(),
            watchdog: options.watchdog,
            grace_period: options.grace_period,
            stop_requested: AtomicBool::new(false),
            issued_session_ids: Mutex::new(HashSet::new()),
        })
    }

    /// Runs `f` against the app with `self` as its host.
    pub fn with_app<R>(self: &Arc<Self>, f: impl FnOnce(&mut ChatApp, &mut dyn HostOps) -> R) -> R {
        let mut host = Arc::clone(self);
        let mut app = lock_unpoisoned(&self.app);
        f(&mut app, &mut host)
    }

    pub fn stop_requested(&self) -> bool {
        self.stop_requested.load(Ordering::SeqCst)
    }

    pub fn has_active_turn(&self) -> bool {
        self.lock_active_turn().is_some()
    }

    fn start_turn_internal(
        self: &Arc<Self>,
        command: ProcessCommand,
        classifier: OutputClassifier,
    ) -> Result<TurnId, String> {
        let mut active_turn = self.lock_active_turn();
        if active_turn.is_some() {
            return Err(TURN_ALREADY_ACTIVE.to_string());
        }

        let turn_id = self.next_turn_id.fetch_add(1, Ordering::SeqCst);
        let supervisor = ProcessSupervisor::with_grace_period(self.grace_period);
        let handle = supervisor.handle();

        let controller = Arc::clone(self);
        let join_handle = thread::Builder::new()
            .name(format!("chat-turn-{turn_id}"))
            .spawn(move || controller.run_worker(turn_id, supervisor, command, classifier))
            .map_err(|error| format!("Failed to spawn turn worker: {error}"))?;

        info!(turn_id, "turn started");
        *active_turn = Some(ActiveTurn {
            turn_id,
            handle,
            join_handle: Some(join_handle),
            idle_warned: false,
            idle_cancelled: false,
        });

        Ok(turn_id)
    }

    fn run_worker(
        self: Arc<Self>,
        turn_id: TurnId,
        supervisor: ProcessSupervisor,
        command: ProcessCommand,
        classifier: OutputClassifier,
    ) {
        self.wait_for_app_turn_visibility(turn_id);

        let environment = self.environment.get_or_init(|| self.env.resolve()).clone();
        let command = command.environment(environment);
        let events = self.events_tx.clone();

        let outcome = catch_unwind(AssertUnwindSafe(|| {
            supervisor.run(&command, &mut |line| {
                for delta in classifier.deltas(line) {
                    let _ = events.send(TurnEvent::Delta { turn_id, delta });
                }
            })
        }));

        let outcome = outcome.unwrap_or_else(|_| ProcessOutcome {
            stdout: String::new(),
            stderr: "CLI supervisor panicked".to_string(),
            exit_code: EXIT_CODE_SPAWN_FAILED,
        });
        info!(turn_id, exit_code = outcome.exit_code, "turn finished");
        let _ = self.events_tx.send(TurnEvent::Finished { turn_id, outcome });
    }

    fn wait_for_app_turn_visibility(&self, turn_id: TurnId) {
        for _ in 0..256 {
            let turn_visible = {
                let app = lock_unpoisoned(&self.app);
                matches!(app.mode, Mode::AwaitingResponse { turn_id: current } if current == turn_id)
            };

            if turn_visible {
                return;
            }

            thread::yield_now();
        }
    }

    /// Applies queued turn events, waiting up to `timeout` for the first one.
    /// `observer` sees each event after the app has absorbed it.
    pub fn pump_events(
        self: &Arc<Self>,
        timeout: Duration,
        observer: &mut dyn FnMut(&TurnEvent),
    ) -> usize {
        let first = match self.events_rx.recv_timeout(timeout) {
            Ok(event) => event,
            Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => return 0,
        };

        let mut applied = 0usize;
        let mut next = Some(first);
        while let Some(event) = next {
            self.apply_turn_event(&event);
            observer(&event);
            applied += 1;
            next = self.events_rx.try_recv().ok();
        }

        applied
    }

    /// Applies every queued event without waiting.
    pub fn flush_pending_turn_events(self: &Arc<Self>) -> usize {
        self.pump_events(Duration::ZERO, &mut |_| {})
    }

    fn apply_turn_event(&self, event: &TurnEvent) {
        let turn_id = event.turn_id();

        let finished_session = {
            let mut app = lock_unpoisoned(&self.app);
            match event {
                TurnEvent::Delta { turn_id, delta } => {
                    app.on_turn_delta(*turn_id, delta);
                    None
                }
                TurnEvent::Finished { turn_id, outcome } => app
                    .on_turn_finished(*turn_id, outcome)
                    .then(|| app.session().clone()),
            }
        };

        if let Some(session) = finished_session {
            self.persist(&session);
        }

        if event.is_terminal() {
            self.clear_active_turn_if_matching(turn_id);
        }
    }

    fn clear_active_turn_if_matching(&self, turn_id: TurnId) {
        let mut active_turn = self.lock_active_turn();
        let matches = active_turn.as_ref().map(|active| active.turn_id) == Some(turn_id);
        if !matches {
            return;
        }

        let Some(mut completed) = active_turn.take() else {
            return;
        };

        if let Some(join_handle) = completed.join_handle.take() {
            let is_current_thread = join_handle.thread().id() == thread::current().id();
            if !is_current_thread && join_handle.is_finished() {
                let _ = join_handle.join();
            }
        }
    }

    /// Checks the active turn for silence: warns once, then cancels it.
    pub fn check_idle(self: &Arc<Self>) {
        let Some(watchdog) = self.watchdog else {
            return;
        };

        let (turn_id, verdict) = {
            let mut active_turn = self.lock_active_turn();
            let Some(active) = active_turn.as_mut() else {
                return;
            };
            if active.idle_cancelled || active.handle.has_exited() {
                return;
            }

            let verdict = watchdog.check(active.handle.idle_for());
            match verdict {
                IdleVerdict::Active => return,
                IdleVerdict::Warn { .. } if active.idle_warned => return,
                IdleVerdict::Warn { .. } => active.idle_warned = true,
                IdleVerdict::Cancel { .. } => active.idle_cancelled = true,
            }
            (active.turn_id, verdict)
        };

        self.with_app(|app, host| match verdict {
            IdleVerdict::Warn { idle, cancel_in } => {
                warn!(turn_id, idle_secs = idle.as_secs(), "CLI has gone quiet");
                app.notices.push(format!(
                    "No output for {}s; cancelling in {}s",
                    idle.as_secs(),
                    cancel_in.as_secs()
                ));
            }
            IdleVerdict::Cancel { idle } => {
                warn!(turn_id, idle_secs = idle.as_secs(), "cancelling silent CLI");
                app.notices
                    .push(format!("No output for {}s; cancelling", idle.as_secs()));
                app.on_cancel(host);
            }
            IdleVerdict::Active => {}
        });
    }

    fn cancel_turn_internal(&self, turn_id: TurnId) {
        let handle = {
            let active_turn = self.lock_active_turn();
            match active_turn.as_ref() {
                Some(active) if active.turn_id == turn_id => active.handle.clone(),
                _ => return,
            }
        };

        // Escalation can block for the grace period.
        let spawned = thread::Builder::new()
            .name(format!("chat-turn-{turn_id}-cancel"))
            .spawn(move || handle.cancel());
        if let Err(error) = spawned {
            warn!(turn_id, %error, "failed to spawn cancel thread");
        }
    }

    fn store(&self) -> Option<ChatHistoryStore> {
        self.scope.recording_dir().map(ChatHistoryStore::new)
    }

    fn persist(&self, session: &ChatSession) {
        let Some(store) = self.store() else {
            debug!(session_id = %session.id, "no recording directory; chat not persisted");
            return;
        };

        if let Err(error) = store.record_session(session, OffsetDateTime::now_utc()) {
            warn!(session_id = %session.id, %error, "failed to save chat");
        }
    }

    fn lock_active_turn(&self) -> MutexGuard<'_, Option<ActiveTurn>> {
        lock_unpoisoned(&self.active_turn)
    }
}

impl HostOps for Arc<RuntimeController> {
    fn start_turn(
        &mut self,
        command: ProcessCommand,
        classifier: OutputClassifier,
    ) -> Result<TurnId, String> {
        self.start_turn_internal(command, classifier)
    }

    fn cancel_turn(&mut self, turn_id: TurnId) {
        self.cancel_turn_internal(turn_id);
    }

    fn current_transcript(&mut self) -> String {
        self.transcript.transcript()
    }

    fn allocate_session_id(&mut self, created: OffsetDateTime) -> String {
        let store = self.store();
        let mut issued = lock_unpoisoned(&self.issued_session_ids);
        // Chats that never reached disk still own their id for this process.
        let id = unique_session_id(&session_id_for(created), |id| {
            issued.contains(id)
                || store
                    .as_ref()
                    .is_some_and(|store| store.session_id_in_use(id))
        });
        issued.insert(id.clone());
        id
    }

    fn write_transcript_backup(&mut self, session_id: &str, transcript: &str) -> Option<String> {
        let store = self.store()?;
        match store.write_transcript_backup(session_id, transcript) {
            Ok(relative) => Some(relative),
            Err(error) => {
                warn!(session_id, %error, "failed to write transcript backup");
                None
            }
        }
    }

    fn list_sessions(&mut self) -> Vec<SessionManifestEntry> {
        self.store()
            .map(|store| store.list_sessions())
            .unwrap_or_default()
    }

    fn load_session(&mut self, session_id: &str) -> Option<ChatSession> {
        self.store()?.load_session(session_id)
    }

    fn delete_session(&mut self, session_id: &str) {
        if let Some(store) = self.store() {
            store.delete_session(session_id);
        }
    }

    fn export_session(&mut self, session: &ChatSession) -> Option<PathBuf> {
        let store = self.store()?;
        match store.export_markdown(session, None, OffsetDateTime::now_utc()) {
            Ok(path) => Some(path),
            Err(error) => {
                warn!(session_id = %session.id, %error, "failed to export chat");
                None
            }
        }
    }

    fn reconstruct_excerpt(&mut self, message: &ChatMessage) -> String {
        match self.store() {
            Some(store) => store.reconstruct_transcript_excerpt(message),
            None => REFERENCE_UNAVAILABLE.to_string(),
        }
    }

    fn request_stop(&mut self) {
        self.stop_requested.store(true, Ordering::SeqCst);
    }
}

fn lock_unpoisoned<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}
