//! Error types for frametrace

use crate::host::ExceptionInfo;
use std::path::PathBuf;
use thiserror::Error;

/// Result type alias using frametrace's Error
pub type Result<T> = std::result::Result<T, Error>;

/// frametrace error types
#[derive(Error, Debug)]
pub enum Error {
    #[error("Scope resolution failed: {message}")]
    ScopeResolution { message: String },

    #[error("Method {name} not found in {}", path.display())]
    MethodNotFound { path: PathBuf, name: String },

    #[error("Invalid trace target: {message}")]
    InvalidTarget { message: String },

    #[error("Target program raised {exception}")]
    TargetProgram { exception: ExceptionInfo },

    #[error("Tracer state inconsistency: {message}")]
    StateInconsistency { message: String },

    #[error("Configuration error: {message}")]
    ConfigError { message: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML parse error: {0}")]
    TomlParse(#[from] toml::de::Error),
}

impl Error {
    /// True for failures of the traced program rather than of the tracer
    pub fn is_program_failure(&self) -> bool {
        matches!(self, Error::TargetProgram { .. })
    }
}

impl From<ExceptionInfo> for Error {
    fn from(exception: ExceptionInfo) -> Self {
        Error::TargetProgram { exception }
    }
}
