// Error taxonomy for the control surface.
//
// Every recoverable failure is returned to the caller as a structured
// payload carrying a stable kind string and a human-readable message;
// nothing here is allowed to crash the server.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ControlError {
    #[error("{0}")]
    InvalidArgs(String),

    #[error("unknown key: {0:?}")]
    UnknownKey(String),

    #[error("no terminal session available (use run_tui or create_process to start one)")]
    NoSession,

    #[error("unknown terminal '{id}'{}", available_hint(.available))]
    UnknownSession { id: String, available: Vec<String> },

    #[error("terminal '{0}' is not running")]
    NotRunning(String),

    #[error("failed to spawn '{command}': {source}")]
    SpawnFailed {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("terminal '{0}' is already running")]
    AlreadyRunning(String),
}

impl ControlError {
    /// Stable kind string used in the wire payload.
    pub fn kind(&self) -> &'static str {
        match self {
            ControlError::InvalidArgs(_) => "InvalidArgs",
            ControlError::UnknownKey(_) => "UnknownKey",
            ControlError::NoSession => "NoSession",
            ControlError::UnknownSession { .. } => "UnknownSession",
            ControlError::NotRunning(_) => "NotRunning",
            ControlError::SpawnFailed { .. } => "SpawnFailed",
            ControlError::AlreadyRunning(_) => "AlreadyRunning",
        }
    }
}

fn available_hint(available: &[String]) -> String {
    if available.is_empty() {
        String::new()
    } else {
        format!(" (available: {})", available.join(", "))
    }
}

pub type Result<T> = std::result::Result<T, ControlError>;
