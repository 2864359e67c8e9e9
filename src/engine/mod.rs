mod partition;
mod supervisor;
#[cfg(test)]
pub(crate) mod testing;
mod worker;

pub use partition::{file_list, partition};
pub use supervisor::completion_message;
pub use worker::{
    build_environment, encode_query, run_unit, WorkerJob, FAILURE_CODE, NO_PASSWORD_FLAG,
};

use crate::error::DispatchError;
use crate::model::{
    env_value, Destination, ForegroundEvent, Invocation, ProcessResult, ResolvedSettings,
    UnitTicket, Value, Variable,
};
use crate::settings::Session;
use crate::surface::{ConfirmDialog, InputPanel};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use supervisor::{TrackedUnit, WorkerHandle};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

pub const DEFAULT_CLIENT_PATH: &str = "/usr/bin/psql";
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(25);

#[derive(Debug, Clone)]
pub struct DispatcherConfig {
    /// Delay between completion polls.
    pub poll_interval: Duration,
    /// Local password file whose presence makes prompting unnecessary (`~/.pgpass`).
    pub password_file: Option<PathBuf>,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            poll_interval: DEFAULT_POLL_INTERVAL,
            password_file: dirs::home_dir().map(|h| h.join(".pgpass")),
        }
    }
}

/// The interactive collaborators a dispatch may suspend on.
#[derive(Clone)]
pub struct Collaborators {
    pub input: Arc<dyn InputPanel>,
    pub confirm: Arc<dyn ConfirmDialog>,
}

/// A dispatched invocation. Dropping it leaves the units running.
pub struct DispatchHandle {
    units: usize,
    supervisor: tokio::task::JoinHandle<()>,
}

impl DispatchHandle {
    pub fn units(&self) -> usize {
        self.units
    }

    /// Wait until the supervisor has reported every unit.
    pub async fn wait(self) {
        if let Err(e) = self.supervisor.await {
            warn!(error = %e, "completion supervisor stopped early");
        }
    }
}

pub struct Dispatcher {
    session: Arc<Session>,
    collaborators: Collaborators,
    foreground: mpsc::UnboundedSender<ForegroundEvent>,
    cfg: DispatcherConfig,
}

impl Dispatcher {
    pub fn new(
        session: Arc<Session>,
        collaborators: Collaborators,
        foreground: mpsc::UnboundedSender<ForegroundEvent>,
        cfg: DispatcherConfig,
    ) -> Self {
        Self {
            session,
            collaborators,
            foreground,
            cfg,
        }
    }

    fn status(&self, msg: &str) {
        let _ = self.foreground.send(ForegroundEvent::Status(msg.to_string()));
    }

    /// Prompting is needed only when it is enabled and no other credential source
    /// (passfile, service, local password file) is configured.
    pub fn password_required(&self, settings: &ResolvedSettings) -> bool {
        settings.flag(Variable::PromptForPassword)
            && settings.get(Variable::Passfile).is_none()
            && settings.get(Variable::Service).is_none()
            && !self.cfg.password_file.as_deref().is_some_and(Path::is_file)
    }

    /// Settle the password for `settings`, suspending on the input panel and the
    /// empty-password confirmation when needed. Returns a password newly entered at
    /// the prompt.
    async fn resolve_password(
        &self,
        settings: &ResolvedSettings,
    ) -> Result<Option<String>, DispatchError> {
        let required = self.password_required(settings);
        let known = settings.get(Variable::Password).map(env_value);

        let password = match known.clone() {
            Some(p) => p,
            None if required => {
                self.status("Enter password for PostgreSQL database.");
                // A dropped reply is a cancel, and a cancel is an empty password.
                self.collaborators
                    .input
                    .request("Enter password:")
                    .await
                    .ok()
                    .flatten()
                    .unwrap_or_default()
            }
            None => String::new(),
        };

        if password.is_empty() && required && settings.flag(Variable::WarnOnEmptyPassword) {
            let proceed = self
                .collaborators
                .confirm
                .confirm("Proceed with empty password?", "Proceed")
                .await
                .unwrap_or(false);
            if !proceed {
                self.status("PostgreSQL query cancelled.");
                return Err(DispatchError::Declined);
            }
        }
        Ok((known.is_none() && !password.is_empty()).then_some(password))
    }

    /// Run an invocation: settle the password, split into units and start one worker
    /// thread per unit, then hand the workers to the completion supervisor.
    pub async fn run(&self, invocation: Invocation) -> Result<DispatchHandle, DispatchError> {
        let settings = self.session.settings();
        let mut resolved = settings.resolve_with(&invocation.overrides);

        if let Some(password) = self.resolve_password(&resolved).await? {
            // Remembered for the session until the next reload.
            settings.set(Variable::Password, Value::String(password))?;
            resolved = settings.resolve_with(&invocation.overrides);
        }

        let resolved = Arc::new(resolved);
        let encoding = invocation.effective_encoding().to_string();
        let destination = if resolved.flag(Variable::OutputToNewFile) {
            Destination::NewDocument
        } else {
            Destination::SharedRegion
        };
        let client_path = resolved
            .truthy(Variable::PsqlPath)
            .map(|v| PathBuf::from(env_value(v)))
            .unwrap_or_else(|| PathBuf::from(DEFAULT_CLIENT_PATH));

        if destination == Destination::SharedRegion {
            let _ = self.foreground.send(ForegroundEvent::ResetShared {
                encoding: encoding.clone(),
            });
        }
        self.status("PostgreSQL query executing...");

        let units = partition(resolved.get(Variable::Files), &invocation.document);
        let total = units.len();
        info!(
            session = %self.session.id(),
            units = total,
            ?destination,
            client = %client_path.display(),
            "dispatching invocation"
        );

        let mut tracked = Vec::with_capacity(total);
        for unit in units {
            let label = unit.label(total);
            let job = WorkerJob {
                unit: unit.clone(),
                label: label.clone(),
                settings: resolved.clone(),
                client_path: client_path.clone(),
                encoding: encoding.clone(),
                destination,
            };
            let started = Instant::now();
            let tx = self.foreground.clone();
            let handle = match std::thread::Builder::new()
                .name(format!("pgrun-unit-{}", unit.ordinal))
                .spawn(move || worker::run_and_deliver(job, tx))
            {
                Ok(handle) => WorkerHandle::Thread(handle),
                Err(e) => {
                    warn!(unit = %label, error = %e, "could not start worker thread");
                    let _ = self.foreground.send(ForegroundEvent::Deliver {
                        label,
                        destination,
                        encoding: encoding.clone(),
                        result: ProcessResult {
                            code: FAILURE_CODE,
                            output: format!("failed to start worker thread: {e}\n"),
                            elapsed: started.elapsed(),
                            failed: true,
                        },
                    });
                    WorkerHandle::NotStarted
                }
            };
            debug!(ordinal = unit.ordinal, "unit spawned");
            tracked.push(TrackedUnit {
                ticket: UnitTicket { unit, started },
                handle,
            });
        }

        let supervisor = tokio::spawn(supervisor::supervise(
            tracked,
            total,
            self.foreground.clone(),
            self.cfg.poll_interval,
        ));
        Ok(DispatchHandle {
            units: total,
            supervisor,
        })
    }
}
