use crate::error::SettingsError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::{Duration, Instant};

/// A setting value as stored in the settings layers.
pub type Value = serde_json::Value;

macro_rules! variables {
    ($($variant:ident => $name:literal, $env:literal;)+) => {
        /// The closed vocabulary of recognised connection and behaviour settings.
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(rename_all = "snake_case")]
        pub enum Variable {
            $($variant,)+
        }

        impl Variable {
            pub const ALL: &'static [Variable] = &[$(Variable::$variant,)+];

            pub fn name(self) -> &'static str {
                match self {
                    $(Variable::$variant => $name,)+
                }
            }

            /// Environment variable the value is exported as. Empty means the
            /// setting only steers behaviour and is never exported.
            pub fn env_var(self) -> &'static str {
                match self {
                    $(Variable::$variant => $env,)+
                }
            }
        }

        impl FromStr for Variable {
            type Err = SettingsError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($name => Ok(Variable::$variant),)+
                    other => Err(SettingsError::UnknownVariable(other.to_string())),
                }
            }
        }
    };
}

variables! {
    Host => "host", "PGHOST";
    HostAddr => "hostaddr", "PGHOSTADDR";
    Port => "port", "PGPORT";
    Database => "database", "PGDATABASE";
    User => "user", "PGUSER";
    Password => "password", "PGPASSWORD";
    Passfile => "passfile", "PGPASSFILE";
    Service => "service", "PGSERVICE";
    ServiceFile => "servicefile", "PGSERVICEFILE";
    KerberosRealm => "kerberos_realm", "PGREALM";
    Options => "options", "PGOPTIONS";
    ApplicationName => "application_name", "PGAPPNAME";
    SslMode => "sslmode", "PGSSLMODE";
    RequireSsl => "requiressl", "PGREQUIRESSL";
    SslCompression => "sslcompression", "PGSSLCOMPRESSION";
    SslCert => "sslcert", "PGSSLCERT";
    SslKey => "sslkey", "PGSSLKEY";
    SslRootCert => "sslrootcert", "PGSSLROOTCERT";
    SslCrl => "sslcrl", "PGSSLCRL";
    RequirePeer => "requirepeer", "PGREQUIREPEER";
    KrbSrvName => "krbsrvname", "PGKRBSRVNAME";
    GssLib => "gsslib", "PGGSSLIB";
    ConnectTimeout => "connect_timeout", "PGCONNECT_TIMEOUT";
    ClientEncoding => "client_encoding", "PGCLIENTENCODING";
    DateStyle => "datestyle", "PGDATESTYLE";
    Timezone => "timezone", "PGTZ";
    Geqo => "geqo", "PGGEQO";
    SysConfDir => "sysconfdir", "PGSYSCONFDIR";
    LocaleDir => "localedir", "PGLOCALEDIR";
    PsqlPath => "psql_path", "";
    PromptForPassword => "prompt_for_password", "";
    WarnOnEmptyPassword => "warn_on_empty_password", "";
    OutputToNewFile => "output_to_newfile", "";
    Files => "files", "";
}

impl Variable {
    /// Key under which the persisted backend stores this setting's default.
    pub fn default_key(self) -> String {
        format!("default_{}", self.name())
    }
}

impl fmt::Display for Variable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Anything that names a setting: a typed [`Variable`] or a raw string that
/// still has to be checked against the vocabulary.
pub trait IntoVariable {
    fn into_variable(self) -> Result<Variable, SettingsError>;
}

impl IntoVariable for Variable {
    fn into_variable(self) -> Result<Variable, SettingsError> {
        Ok(self)
    }
}

impl IntoVariable for &str {
    fn into_variable(self) -> Result<Variable, SettingsError> {
        self.parse()
    }
}

impl IntoVariable for &String {
    fn into_variable(self) -> Result<Variable, SettingsError> {
        self.parse()
    }
}

/// Truthiness of a setting value: null, false, zero and empty containers are falsy.
pub fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().map(|f| f != 0.0).unwrap_or(true),
        Value::String(s) => !s.is_empty(),
        Value::Array(a) => !a.is_empty(),
        Value::Object(o) => !o.is_empty(),
    }
}

/// Render a value the way it is exported into the client's environment.
pub fn env_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Bool(true) => "1".to_string(),
        Value::Bool(false) => "0".to_string(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

/// Parse a `key=value` style command line value into a setting value.
/// JSON literals (numbers, booleans, arrays) are kept typed, anything else is a string.
pub fn parse_value(raw: &str) -> Value {
    match serde_json::from_str::<Value>(raw) {
        Ok(v @ (Value::Bool(_) | Value::Number(_) | Value::Array(_) | Value::Null)) => v,
        _ => Value::String(raw.to_string()),
    }
}

/// Every variable resolved for one invocation.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ResolvedSettings {
    values: BTreeMap<Variable, Value>,
}

impl ResolvedSettings {
    pub fn new(values: BTreeMap<Variable, Value>) -> Self {
        Self { values }
    }

    pub fn get(&self, var: Variable) -> Option<&Value> {
        self.values.get(&var)
    }

    /// The value if present and truthy.
    pub fn truthy(&self, var: Variable) -> Option<&Value> {
        self.get(var).filter(|v| is_truthy(v))
    }

    pub fn flag(&self, var: Variable) -> bool {
        self.truthy(var).is_some()
    }

    pub fn iter(&self) -> impl Iterator<Item = (Variable, &Value)> {
        self.values.iter().map(|(k, v)| (*k, v))
    }
}

/// Character-offset region of a document. `a` may be after `b`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Selection {
    pub a: usize,
    pub b: usize,
}

impl Selection {
    pub fn new(a: usize, b: usize) -> Self {
        Self { a, b }
    }

    pub fn begin(&self) -> usize {
        self.a.min(self.b)
    }

    pub fn end(&self) -> usize {
        self.a.max(self.b)
    }

    pub fn is_empty(&self) -> bool {
        self.a == self.b
    }
}

/// The editor document an invocation was triggered from.
#[derive(Debug, Clone, Default)]
pub struct DocumentSnapshot {
    pub text: String,
    pub selections: Vec<Selection>,
}

/// What an invocation asks for: explicit overrides, the document, and its encoding.
#[derive(Debug, Clone, Default)]
pub struct Invocation {
    pub overrides: BTreeMap<Variable, Value>,
    pub document: DocumentSnapshot,
    pub encoding: String,
}

impl Invocation {
    /// The document's encoding with the editor's "Undefined" placeholder mapped to UTF-8.
    pub fn effective_encoding(&self) -> &str {
        match self.encoding.trim() {
            "" | "Undefined" => "UTF-8",
            other => other,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UnitSource {
    Query(String),
    File(PathBuf),
}

/// One independently executed query or file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkUnit {
    /// 1-based position within the invocation.
    pub ordinal: usize,
    pub source: UnitSource,
}

impl WorkUnit {
    /// Human label used in completion notifications.
    pub fn label(&self, total: usize) -> String {
        match &self.source {
            UnitSource::File(path) => {
                let name = path
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_else(|| path.display().to_string());
                format!("file {name}")
            }
            UnitSource::Query(_) if total == 1 => "query".to_string(),
            UnitSource::Query(_) => format!("query {}/{}", self.ordinal, total),
        }
    }
}

/// Where finished output is written.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Destination {
    SharedRegion,
    NewDocument,
}

/// Outcome of running one work unit.
#[derive(Debug, Clone)]
pub struct ProcessResult {
    pub code: i32,
    pub output: String,
    pub elapsed: Duration,
    /// The process could not be run or talked to, as opposed to exiting nonzero.
    pub failed: bool,
}

/// A unit in flight, as tracked by the completion supervisor.
#[derive(Debug, Clone)]
pub struct UnitTicket {
    pub unit: WorkUnit,
    pub started: Instant,
}

/// Milliseconds with the fractional part kept.
pub fn elapsed_ms(elapsed: Duration) -> f64 {
    elapsed.as_secs_f64() * 1000.0
}

/// Per-unit summary handed back by the foreground loop.
#[derive(Debug, Clone, Serialize)]
pub struct UnitReport {
    pub label: String,
    pub code: i32,
    pub failed: bool,
    pub elapsed_ms: f64,
}

/// Messages from background tasks to the foreground consumer that owns the display.
#[derive(Debug)]
pub enum ForegroundEvent {
    Status(String),
    ResetShared { encoding: String },
    Deliver {
        label: String,
        destination: Destination,
        encoding: String,
        result: ProcessResult,
    },
}
