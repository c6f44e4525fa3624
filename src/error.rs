//! Error types for the CoprHD driver
//!
//! Provides one structured error type shared by the transport, the resource
//! client, the task waiter, the export orchestrator and the driver facade.

use thiserror::Error;

/// Unified error type for the driver
#[derive(Error, Debug)]
pub enum Error {
    // =========================================================================
    // Local Errors
    // =========================================================================
    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Operation not supported by this backend: {0}")]
    BackendUnsupported(String),

    // =========================================================================
    // Resource Errors
    // =========================================================================
    #[error("Resource not found: {kind}/{name}")]
    NotFound { kind: String, name: String },

    #[error("Resource already exists: {kind}/{name}")]
    AlreadyExists { kind: String, name: String },

    // =========================================================================
    // Controller HTTP Errors
    // =========================================================================
    #[error("Authentication required: {0}")]
    Unauthenticated(String),

    #[error("Access forbidden: {0}")]
    Forbidden(String),

    #[error("Method not allowed: {0}")]
    MethodNotAllowed(String),

    #[error("Controller unavailable: {0}")]
    Unavailable(String),

    #[error("Controller internal error: {0}")]
    ControllerInternal(String),

    #[error("Unexpected controller response (HTTP {status}): {body}")]
    Protocol { status: u16, body: String },

    // =========================================================================
    // Task Errors
    // =========================================================================
    #[error("Task {operation} on {resource} failed: {message}")]
    TaskFailed {
        resource: String,
        operation: String,
        message: String,
    },

    #[error("Task {operation} on {resource} timed out after {duration}")]
    TaskTimedOut {
        resource: String,
        operation: String,
        duration: String,
    },

    // =========================================================================
    // Driver Facade Errors
    // =========================================================================
    #[error("{operation} failed for {resource}: {source}")]
    BackendApi {
        operation: String,
        resource: String,
        #[source]
        source: Box<Error>,
    },

    // =========================================================================
    // Transport / Parse Errors
    // =========================================================================
    #[error("HTTP transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("JSON parse error: {0}")]
    JsonParse(#[from] serde_json::Error),

    #[error("YAML parse error: {0}")]
    YamlParse(#[from] serde_yaml::Error),

    #[error("Capacity parse error: {0}")]
    CapacityParse(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Shorthand for a resolver miss
    pub fn not_found(kind: impl Into<String>, name: impl Into<String>) -> Self {
        Error::NotFound {
            kind: kind.into(),
            name: name.into(),
        }
    }

    /// Wrap an error with the failing driver operation and resource
    pub fn backend(operation: impl Into<String>, resource: impl Into<String>, source: Error) -> Self {
        Error::BackendApi {
            operation: operation.into(),
            resource: resource.into(),
            source: Box::new(source),
        }
    }

    /// Check if this error means the resource does not exist
    pub fn is_not_found(&self) -> bool {
        match self {
            Error::NotFound { .. } => true,
            Error::BackendApi { source, .. } => source.is_not_found(),
            _ => false,
        }
    }

    /// Check if this error should invalidate the session and retry once.
    ///
    /// Besides an explicit 401, some controller versions answer an expired
    /// session with an arbitrary status whose payload mentions the cookie.
    pub fn triggers_reauth(&self) -> bool {
        match self {
            Error::Unauthenticated(_) => true,
            Error::Protocol { status: 401, .. } => true,
            Error::Forbidden(body)
            | Error::MethodNotAllowed(body)
            | Error::Unavailable(body)
            | Error::ControllerInternal(body)
            | Error::Protocol { body, .. } => mentions_cookie(body),
            _ => false,
        }
    }

    /// Check if this error signals a name conflict on creation
    pub fn is_conflict(&self) -> bool {
        match self {
            Error::AlreadyExists { .. } => true,
            Error::Protocol { status, body } => {
                (*status == 400 || *status == 409) && body.to_lowercase().contains("already exist")
            }
            _ => false,
        }
    }

}

fn mentions_cookie(body: &str) -> bool {
    body.to_lowercase().contains("cookie")
}

/// Result type alias for the driver
pub type Result<T> = std::result::Result<T, Error>;
