use thiserror::Error;

/// Compositor-wide error type
///
/// Every variant is recoverable: a failure is local to the call that
/// produced it and never leaves a partially composed device visible.
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Capacity exceeded: {0}")]
    Capacity(String),

    #[error("Function already loaded: {0}")]
    Duplicate(String),

    #[error("Out of range: {0}")]
    Range(String),

    #[error("Fragment parse error [{function}]: {reason}")]
    FragmentParse { function: String, reason: String },

    #[error("Composite device not ready: {0}")]
    NotReady(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl AppError {
    /// Short machine-readable code, carried by `composition.failed` events
    pub fn code(&self) -> &'static str {
        match self {
            Self::Capacity(_) => "capacity",
            Self::Duplicate(_) => "duplicate",
            Self::Range(_) => "range",
            Self::FragmentParse { .. } => "fragment_parse",
            Self::NotReady(_) => "not_ready",
            Self::NotFound(_) => "not_found",
            Self::Config(_) => "config",
            Self::Io(_) => "io",
            Self::Serialization(_) => "serialization",
            Self::Internal(_) => "internal",
        }
    }
}

/// Result type alias used across the crate
pub type Result<T> = std::result::Result<T, AppError>;
