/// Shared error type used across all Palaver crates.
///
/// The domain variants (`Validation`, `NotFound`, `SecurityViolation`,
/// `Provider`, `ToolExecution`) carry the engine's error taxonomy; the
/// remaining variants wrap infrastructure failures.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("IO: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("HTTP: {0}")]
    Http(String),

    #[error("timeout: {0}")]
    Timeout(String),

    /// A caller-supplied value is missing or malformed.
    #[error("validation: {0}")]
    Validation(String),

    #[error("{kind} not found: {id}")]
    NotFound { kind: &'static str, id: String },

    /// Attempted mutation of an immutable field or cross-tenant access.
    #[error("security violation: {0}")]
    SecurityViolation(String),

    #[error("provider {provider}: {message}")]
    Provider { provider: String, message: String },

    #[error("tool {tool}: {message}")]
    ToolExecution { tool: String, message: String },

    #[error("config: {0}")]
    Config(String),

    #[error("{0}")]
    Other(String),
}

impl Error {
    pub fn not_found(kind: &'static str, id: impl Into<String>) -> Self {
        Self::NotFound {
            kind,
            id: id.into(),
        }
    }

    /// Errors the caller can fix by changing the request (bad arguments,
    /// unknown ids).
    pub fn is_client_error(&self) -> bool {
        matches!(self, Self::Validation(_) | Self::NotFound { .. })
    }

    /// Errors that must never be retried or auto-corrected.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::SecurityViolation(_))
    }
}

pub type Result<T> = std::result::Result<T, Error>;
