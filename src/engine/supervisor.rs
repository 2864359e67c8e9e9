//! Completion supervisor.
//!
//! Polls the worker threads of one invocation with non-blocking liveness checks and
//! posts a timing notification for each unit as soon as it is seen finished.

use crate::model::{elapsed_ms, ForegroundEvent, UnitTicket};
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::debug;

/// Handle to a unit's worker.
pub enum WorkerHandle {
    Thread(std::thread::JoinHandle<()>),
    /// The worker thread could not be started; its failure was delivered directly.
    NotStarted,
}

impl WorkerHandle {
    fn is_finished(&self) -> bool {
        match self {
            WorkerHandle::Thread(handle) => handle.is_finished(),
            WorkerHandle::NotStarted => true,
        }
    }

    fn reap(self) {
        if let WorkerHandle::Thread(handle) = self {
            // Already finished, so this does not block.
            let _ = handle.join();
        }
    }
}

pub struct TrackedUnit {
    pub ticket: UnitTicket,
    pub handle: WorkerHandle,
}

pub enum SupervisorState {
    Polling { pending: Vec<TrackedUnit> },
    Done,
}

/// Status line for a finished unit. The elapsed time keeps its fractional part.
pub fn completion_message(label: &str, elapsed: Duration) -> String {
    format!("{label} completed in {} ms.", elapsed_ms(elapsed))
}

/// One poll: report everything that finished and keep the rest.
pub fn tick(
    pending: Vec<TrackedUnit>,
    total: usize,
    foreground: &mpsc::UnboundedSender<ForegroundEvent>,
) -> SupervisorState {
    let (finished, running): (Vec<_>, Vec<_>) =
        pending.into_iter().partition(|t| t.handle.is_finished());

    for tracked in finished {
        let elapsed = tracked.ticket.started.elapsed();
        let label = tracked.ticket.unit.label(total);
        debug!(unit = %label, elapsed_ms = elapsed_ms(elapsed), "unit completed");
        let _ = foreground.send(ForegroundEvent::Status(completion_message(&label, elapsed)));
        tracked.handle.reap();
    }

    if running.is_empty() {
        SupervisorState::Done
    } else {
        SupervisorState::Polling { pending: running }
    }
}

/// Poll until every unit is done, yielding to the runtime between ticks.
pub async fn supervise(
    pending: Vec<TrackedUnit>,
    total: usize,
    foreground: mpsc::UnboundedSender<ForegroundEvent>,
    interval: Duration,
) {
    let mut state = SupervisorState::Polling { pending };
    while let SupervisorState::Polling { pending } = state {
        state = tick(pending, total, &foreground);
        if matches!(state, SupervisorState::Polling { .. }) {
            tokio::time::sleep(interval).await;
        }
    }
    debug!(total, "all units completed");
}
