//! Line-oriented chat over a local model CLI, with an optional live
//! transcript riding along.
//!
//! ## Turn lifecycle
//!
//! [`app::ChatApp`] owns the session and its transcript policy. Submitting text
//! builds a one-shot prompt from the system prompt, the trailing history
//! window and any transcript selected for this message, then asks its
//! [`app::HostOps`] to start a turn. [`runtime::RuntimeController`] runs each
//! turn on its own worker thread under a `cli_process::ProcessSupervisor` and
//! feeds output deltas back over a channel; the app finalizes the assistant
//! message when the terminal outcome arrives, and the controller saves the
//! session to the recording directory.
//!
//! Only one turn runs at a time. Events from a turn that is no longer active
//! are ignored.

pub mod app;
pub mod commands;
pub mod prompt;
pub mod runtime;
pub mod signals;
pub mod source;
pub mod transcript;
