//! Foreground side of a dispatch.
//!
//! This module owns everything that touches the display: the consumer loop that
//! receives results and status messages from background tasks, and the sink that
//! serializes writes into the shared output region.

mod controller;
mod output;

pub use controller::spawn_foreground;
pub use output::OutputSink;
