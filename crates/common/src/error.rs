//! Error types for CraftCloud

use thiserror::Error;

/// Result type alias using CraftCloud Error
pub type Result<T> = std::result::Result<T, Error>;

/// CraftCloud error types
#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Authentication failed: {0}")]
    Authentication(String),

    #[error("Resource not found: {kind} with id {id}")]
    NotFound { kind: String, id: String },

    #[error("Resource already exists: {kind} with id {id}")]
    AlreadyExists { kind: String, id: String },

    /// Transport failure or non-2xx answer from the upstream panel.
    #[error("Upstream panel unavailable (status {status:?}): {body}")]
    UpstreamUnavailable { status: Option<u16>, body: String },

    /// 409 from the upstream panel while the server is still being installed.
    #[error("Server is still installing")]
    ServerInstalling,

    #[error("Provisioning incomplete for {identifier}: {reason}")]
    ProvisioningIncomplete { identifier: String, reason: String },

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Operation timeout after {seconds}s")]
    Timeout { seconds: u64 },

    #[error("Internal error: {0}")]
    Internal(String),
}

/// How a caller that retries should treat a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureClass {
    /// Upstream reports the server is still installing.
    Installing,
    /// Worth another attempt after a delay.
    Transient,
    /// Retrying cannot help.
    Fatal,
}

impl Error {
    pub fn upstream(status: Option<u16>, body: impl Into<String>) -> Self {
        Error::UpstreamUnavailable {
            status,
            body: body.into(),
        }
    }

    pub fn not_found(kind: &str, id: impl ToString) -> Self {
        Error::NotFound {
            kind: kind.to_string(),
            id: id.to_string(),
        }
    }

    /// Classify this error for retry loops.
    ///
    /// Credential and request-shape rejections (400, 401, 403, 422) are fatal.
    /// 404 stays transient: a freshly created server can take a moment to
    /// become visible to the client API.
    pub fn failure_class(&self) -> FailureClass {
        match self {
            Error::ServerInstalling => FailureClass::Installing,
            Error::UpstreamUnavailable { status: None, .. } => FailureClass::Transient,
            Error::UpstreamUnavailable {
                status: Some(code), ..
            } => match *code {
                400 | 401 | 403 | 422 => FailureClass::Fatal,
                _ => FailureClass::Transient,
            },
            Error::Timeout { .. } => FailureClass::Transient,
            _ => FailureClass::Fatal,
        }
    }

    pub fn is_installing(&self) -> bool {
        matches!(self, Error::ServerInstalling)
    }
}

impl From<reqwest::Error> for Error {
    fn from(e: reqwest::Error) -> Self {
        Error::UpstreamUnavailable {
            status: e.status().map(|s| s.as_u16()),
            body: e.to_string(),
        }
    }
}
