use thiserror::Error;

#[derive(Debug, Error)]
pub enum SettingsError {
    /// A setting name outside the recognised vocabulary.
    #[error("Argument {0} not recognized.")]
    UnknownVariable(String),

    #[error("settings file I/O failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("settings file is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("settings file must hold a JSON object")]
    NotAnObject,
}

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error(transparent)]
    Settings(#[from] SettingsError),

    /// The user turned down the password or empty-password confirmation step.
    #[error("PostgreSQL query cancelled.")]
    Declined,
}
