//! Run psql over editor documents, selections and SQL files.
//!
//! A [`settings::SessionRegistry`] holds one layered [`settings::SettingsStore`] per
//! editor session. An [`engine::Dispatcher`] turns an [`model::Invocation`] into work
//! units, runs each one through the client on its own thread, and a completion
//! supervisor reports per-unit timing. Results and status messages travel to the
//! display-owning loop in [`orchestrator`], the only code that touches the host's
//! [`surface`] collaborators.

pub mod engine;
pub mod error;
pub mod model;
pub mod orchestrator;
pub mod settings;
pub mod surface;
pub mod terminal;

use std::sync::{Mutex, MutexGuard, PoisonError};

/// Lock ignoring poisoning: the guarded state stays usable after a panicking writer.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
