//! Process-wide session registry.
//!
//! Construct one [`SessionRegistry`] at startup and hand it to whatever creates
//! dispatchers. Sessions are created on first access and torn down explicitly with
//! [`SessionRegistry::close`] when the host reports the window closed.

use super::{SettingsBackend, SettingsStore};
use crate::lock;
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex};
use tracing::{debug, info};

/// Identity of an editor session/window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionId(pub u64);

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "session-{}", self.0)
    }
}

/// Per-session state: the settings store and the shared-region output lock.
pub struct Session {
    id: SessionId,
    settings: SettingsStore,
    output_lock: Arc<Mutex<()>>,
}

impl Session {
    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn settings(&self) -> &SettingsStore {
        &self.settings
    }

    pub fn output_lock(&self) -> Arc<Mutex<()>> {
        self.output_lock.clone()
    }
}

pub struct SessionRegistry {
    backend: Arc<dyn SettingsBackend>,
    sessions: Mutex<HashMap<SessionId, Arc<Session>>>,
}

impl SessionRegistry {
    /// Build the registry and subscribe it to backend change notifications.
    pub fn new(backend: Arc<dyn SettingsBackend>) -> Arc<Self> {
        let registry = Arc::new(Self {
            backend: backend.clone(),
            sessions: Mutex::new(HashMap::new()),
        });
        let weak = Arc::downgrade(&registry);
        backend.subscribe(Arc::new(move || {
            if let Some(registry) = weak.upgrade() {
                registry.reload_all();
            }
        }));
        registry
    }

    pub fn backend(&self) -> &Arc<dyn SettingsBackend> {
        &self.backend
    }

    /// The session's state, created on first access.
    pub fn session(&self, id: SessionId) -> Arc<Session> {
        lock(&self.sessions)
            .entry(id)
            .or_insert_with(|| {
                debug!(%id, "creating session settings");
                Arc::new(Session {
                    id,
                    settings: SettingsStore::new(self.backend.clone()),
                    output_lock: Arc::new(Mutex::new(())),
                })
            })
            .clone()
    }

    pub fn get(&self, id: SessionId) -> Option<Arc<Session>> {
        lock(&self.sessions).get(&id).cloned()
    }

    /// Tear down a closed session. Returns whether it was live.
    pub fn close(&self, id: SessionId) -> bool {
        let removed = lock(&self.sessions).remove(&id).is_some();
        if removed {
            info!(%id, "session closed");
        }
        removed
    }

    pub fn len(&self) -> usize {
        lock(&self.sessions).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Reload every live session. Safe to call from any thread.
    pub fn reload_all(&self) {
        let sessions: Vec<Arc<Session>> = lock(&self.sessions).values().cloned().collect();
        debug!(count = sessions.len(), "reloading session settings");
        for session in sessions {
            session.settings.reload();
        }
    }
}
