use std::io;
use std::thread::{self, JoinHandle};

use signal_hook::consts::SIGINT;
use signal_hook::iterator::{Handle, Signals};
use tracing::debug;

/// Keeps the SIGINT listener alive; dropping it unregisters the handler.
pub struct InterruptGuard {
    handle: Handle,
    thread: Option<JoinHandle<()>>,
}

impl Drop for InterruptGuard {
    fn drop(&mut self) {
        self.handle.close();
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

/// Calls `on_interrupt` for every SIGINT delivered to the process.
pub fn install_interrupt_handler<F>(on_interrupt: F) -> io::Result<InterruptGuard>
where
    F: Fn() + Send + 'static,
{
    let mut signals = Signals::new([SIGINT])?;
    let handle = signals.handle();

    let thread = thread::Builder::new()
        .name("chat-interrupt".to_string())
        .spawn(move || {
            for signal in signals.forever() {
                debug!(signal, "interrupt received");
                on_interrupt();
            }
        })?;

    Ok(InterruptGuard {
        handle,
        thread: Some(thread),
    })
}
