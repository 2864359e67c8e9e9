//! Layered connection settings, one store per editor session.
//!
//! Resolution order for a name is: explicit per-invocation value, session override,
//! persisted default (`default_<name>` in the backend). Persisted defaults are copied
//! into the store on first read so repeated reads agree with each other until the
//! next reload.

mod backend;
mod registry;

pub use backend::{ChangeListener, JsonFileBackend, MemoryBackend, SettingsBackend};
pub use registry::{Session, SessionId, SessionRegistry};

use crate::error::SettingsError;
use crate::lock;
use crate::model::{is_truthy, IntoVariable, ResolvedSettings, Value, Variable};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, Mutex};
use tracing::debug;

#[derive(Debug, Default)]
struct Layers {
    /// Session overrides. Only persisted by [`SettingsStore::save`].
    user_specified: BTreeMap<Variable, Value>,
    /// Values set for the current invocation(s).
    explicit: BTreeMap<Variable, Value>,
    /// Persisted defaults copied in on first read.
    backfilled: BTreeMap<Variable, Value>,
}

impl Layers {
    fn lookup(&self, var: Variable) -> Option<&Value> {
        self.explicit
            .get(&var)
            .or_else(|| self.user_specified.get(&var))
            .or_else(|| self.backfilled.get(&var))
    }

    fn names(&self) -> BTreeSet<Variable> {
        self.explicit
            .keys()
            .chain(self.user_specified.keys())
            .chain(self.backfilled.keys())
            .copied()
            .collect()
    }
}

pub struct SettingsStore {
    backend: Arc<dyn SettingsBackend>,
    layers: Mutex<Layers>,
}

impl SettingsStore {
    pub fn new(backend: Arc<dyn SettingsBackend>) -> Self {
        Self {
            backend,
            layers: Mutex::new(Layers::default()),
        }
    }

    fn persisted(&self, var: Variable) -> Option<Value> {
        self.backend
            .get(&var.default_key())
            .filter(|v| is_truthy(v))
    }

    pub fn get(&self, name: impl IntoVariable) -> Result<Option<Value>, SettingsError> {
        let var = name.into_variable()?;
        if let Some(v) = lock(&self.layers).lookup(var) {
            return Ok(Some(v.clone()));
        }
        // Backend read happens without our lock held: backend notifications reload us.
        let Some(default) = self.persisted(var) else {
            return Ok(None);
        };
        let mut layers = lock(&self.layers);
        if let Some(v) = layers.lookup(var) {
            return Ok(Some(v.clone()));
        }
        Ok(Some(layers.backfilled.entry(var).or_insert(default).clone()))
    }

    /// The value if resolvable and truthy.
    pub fn get_truthy(&self, name: impl IntoVariable) -> Result<Option<Value>, SettingsError> {
        Ok(self.get(name)?.filter(is_truthy))
    }

    /// Set an explicit value. Not persisted.
    pub fn set(&self, name: impl IntoVariable, value: Value) -> Result<(), SettingsError> {
        let var = name.into_variable()?;
        lock(&self.layers).explicit.insert(var, value);
        Ok(())
    }

    /// Drop an explicit (or backfilled) value; the session override and then the
    /// persisted default become visible again.
    pub fn delete(&self, name: impl IntoVariable) -> Result<Option<Value>, SettingsError> {
        let var = name.into_variable()?;
        let mut layers = lock(&self.layers);
        let explicit = layers.explicit.remove(&var);
        let backfilled = layers.backfilled.remove(&var);
        Ok(explicit.or(backfilled))
    }

    pub fn contains(&self, name: impl IntoVariable) -> Result<bool, SettingsError> {
        let var = name.into_variable()?;
        if lock(&self.layers).lookup(var).is_some() {
            return Ok(true);
        }
        Ok(self.persisted(var).is_some())
    }

    /// Names currently held by the working layer.
    pub fn iter(&self) -> impl Iterator<Item = Variable> {
        lock(&self.layers).names().into_iter()
    }

    pub fn len(&self) -> usize {
        lock(&self.layers).names().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn set_user_specified(
        &self,
        name: impl IntoVariable,
        value: Value,
    ) -> Result<(), SettingsError> {
        let var = name.into_variable()?;
        lock(&self.layers).user_specified.insert(var, value);
        self.reload();
        Ok(())
    }

    pub fn unset_user_specified(&self, name: impl IntoVariable) -> Result<(), SettingsError> {
        let var = name.into_variable()?;
        lock(&self.layers).user_specified.remove(&var);
        self.reload();
        Ok(())
    }

    pub fn has_user_specified(&self) -> bool {
        !lock(&self.layers).user_specified.is_empty()
    }

    pub fn user_specified(&self) -> BTreeMap<Variable, Value> {
        lock(&self.layers).user_specified.clone()
    }

    /// Reset the working layer to the session overrides.
    pub fn reload(&self) {
        let mut layers = lock(&self.layers);
        layers.explicit.clear();
        layers.backfilled.clear();
    }

    /// Forget every session override.
    pub fn clear(&self) {
        lock(&self.layers).user_specified.clear();
        self.reload();
    }

    /// Write the session overrides to the backend as defaults, then forget them.
    pub fn save(&self) -> Result<(), SettingsError> {
        let pending = self.user_specified();
        if pending.is_empty() {
            return Ok(());
        }
        for (var, value) in &pending {
            self.backend.set(&var.default_key(), value.clone());
        }
        self.backend.save()?;
        debug!(count = pending.len(), "saved session overrides as defaults");
        self.clear();
        Ok(())
    }

    /// Resolve every variable in the vocabulary.
    pub fn resolve(&self) -> ResolvedSettings {
        let values = Variable::ALL
            .iter()
            .filter_map(|var| match self.get(*var) {
                Ok(Some(v)) => Some((*var, v)),
                _ => None,
            })
            .collect();
        ResolvedSettings::new(values)
    }

    /// Resolve with per-invocation `overrides` layered on top. The store is left as is.
    pub fn resolve_with(&self, overrides: &BTreeMap<Variable, Value>) -> ResolvedSettings {
        let mut values: BTreeMap<Variable, Value> = self
            .resolve()
            .iter()
            .map(|(k, v)| (k, v.clone()))
            .collect();
        values.extend(overrides.iter().map(|(k, v)| (*k, v.clone())));
        ResolvedSettings::new(values)
    }
}
