use std::io::{self, BufRead, Write};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use chat_agent::app::ChatApp;
use chat_agent::commands::HELP_TEXT;
use chat_agent::runtime::{RuntimeController, RuntimeOptions, TurnEvent};
use chat_agent::signals::install_interrupt_handler;
use chat_agent::source::{FileTranscript, FixedScope, NoTranscript, TranscriptSource};
use cli_process::{IdleWatchdog, OutputDelta};
use crossbeam_channel::{select, Receiver};
use tracing::info;
use transcript_chat::{init_logging, ChatConfig, EnvConfig};

const TICK: Duration = Duration::from_millis(100);
const EXIT_WAIT_MARGIN: Duration = Duration::from_secs(1);

enum LoopInput {
    Line(String),
    Closed,
    Interrupt,
    Tick,
}

fn main() -> io::Result<()> {
    let env = EnvConfig::from_env();
    let config = ChatConfig::resolve(&env).map_err(io::Error::other)?;
    init_logging(&env).map_err(io::Error::other)?;

    let transcript: Arc<dyn TranscriptSource> = match &env.transcript_path {
        Some(path) => Arc::new(FileTranscript::new(path)),
        None => Arc::new(NoTranscript),
    };
    let options = RuntimeOptions {
        watchdog: IdleWatchdog::from_secs(config.idle_warn_secs, config.idle_kill_secs),
        ..RuntimeOptions::default()
    };
    let grace_period = options.grace_period;

    let app = Arc::new(Mutex::new(ChatApp::new(&config)));
    let host = RuntimeController::new(
        app,
        transcript,
        Arc::new(FixedScope(env.recording_dir.clone())),
        options,
    );
    info!(cli = %config.cli_binary, model = %config.model, "chat started");

    let (interrupt_tx, interrupt_rx) = crossbeam_channel::unbounded();
    let _interrupt_guard = install_interrupt_handler(move || {
        let _ = interrupt_tx.send(());
    })?;
    let mut input_rx = spawn_stdin_reader()?;

    println!("{HELP_TEXT}");
    if env.recording_dir.is_none() {
        println!("No recording directory set; chats will not be saved.");
    }
    prompt_marker()?;

    let mut exit_deadline: Option<Instant> = None;
    loop {
        let input = select! {
            recv(input_rx) -> line => match line {
                Ok(line) => LoopInput::Line(line),
                Err(_) => LoopInput::Closed,
            },
            recv(interrupt_rx) -> _ => LoopInput::Interrupt,
            default(TICK) => LoopInput::Tick,
        };

        let submitted = matches!(input, LoopInput::Line(_));
        match input {
            LoopInput::Line(line) => host.with_app(|app, host| {
                app.on_input_replace(line);
                app.on_submit(host);
            }),
            LoopInput::Closed => {
                input_rx = crossbeam_channel::never();
                host.with_app(|app, host| app.on_quit(host));
            }
            LoopInput::Interrupt => host.with_app(|app, host| {
                if app.is_busy() {
                    app.on_cancel(host);
                } else {
                    app.on_quit(host);
                }
            }),
            LoopInput::Tick => {}
        }

        let assistant_name = config.assistant_name.clone();
        host.pump_events(Duration::ZERO, &mut |event| {
            print_event(&host, &assistant_name, event);
        });
        host.check_idle();

        let (notices, should_exit, busy) = host.with_app(|app, _| {
            (app.take_notices(), app.should_exit, app.is_busy())
        });
        for notice in &notices {
            println!("{notice}");
        }

        if should_exit {
            // Let a cancelled turn land so it gets saved.
            let deadline =
                *exit_deadline.get_or_insert_with(|| Instant::now() + grace_period + EXIT_WAIT_MARGIN);
            if !host.has_active_turn() || Instant::now() >= deadline {
                break;
            }
        } else if (submitted || !notices.is_empty()) && !busy {
            prompt_marker()?;
        }
    }

    info!("chat finished");
    Ok(())
}

fn print_event(host: &Arc<RuntimeController>, assistant_name: &str, event: &TurnEvent) {
    match event {
        TurnEvent::Delta {
            delta: OutputDelta::Text(text),
            ..
        } => {
            print!("{text}");
            if !text.ends_with('\n') {
                println!();
            }
        }
        TurnEvent::Delta { delta, .. } => println!("{}", delta.render()),
        TurnEvent::Finished { .. } => {
            let last = host.with_app(|app, _| app.session().messages.last().cloned());
            if let Some(message) = last.filter(|message| message.is_error) {
                println!("{assistant_name}: {}", message.content);
            }
            let _ = prompt_marker();
        }
    }
    let _ = io::stdout().flush();
}

fn prompt_marker() -> io::Result<()> {
    let mut stdout = io::stdout();
    write!(stdout, "> ")?;
    stdout.flush()
}

fn spawn_stdin_reader() -> io::Result<Receiver<String>> {
    let (tx, rx) = crossbeam_channel::unbounded();
    thread::Builder::new()
        .name("chat-stdin".to_string())
        .spawn(move || {
            for line in io::stdin().lock().lines() {
                let Ok(line) = line else {
                    break;
                };
                if tx.send(line).is_err() {
                    break;
                }
            }
        })?;
    Ok(rx)
}
