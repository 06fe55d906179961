//! Error types

use thiserror::Error;

use crate::types::Eligible;

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type
#[derive(Debug, Error)]
pub enum Error {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Transition from '{from}' to '{to}' does not exist")]
    IllegalTransition { from: String, to: String },

    #[error("Transition from '{from}' to '{to}' is not allowed for actor '{actor}'")]
    Forbidden {
        from: String,
        to: String,
        actor: Eligible,
    },

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Machine-readable error code, stable across releases
    pub fn code(&self) -> &'static str {
        match self {
            Self::Validation(_) => "wfx.validationError",
            Self::NotFound(_) => "wfx.notFound",
            Self::Conflict(_) => "wfx.conflict",
            Self::IllegalTransition { .. } => "wfx.illegalTransition",
            Self::Forbidden { .. } => "wfx.forbidden",
            Self::Storage(_) | Self::Io(_) => "wfx.storageError",
            Self::Config(_) => "wfx.configError",
        }
    }

    pub fn job_not_found(id: &str) -> Self {
        Self::NotFound(format!("job '{}' not found", id))
    }

    pub fn workflow_not_found(name: &str) -> Self {
        Self::NotFound(format!("workflow '{}' not found", name))
    }
}

// Storage layers annotate sqlx failures with anyhow context
impl From<anyhow::Error> for Error {
    fn from(err: anyhow::Error) -> Self {
        Error::Storage(format!("{:#}", err))
    }
}
