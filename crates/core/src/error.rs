// crates/core/src/error.rs
use std::path::PathBuf;
use thiserror::Error;

use crate::api::JobKind;

/// Failures raised by the HTTP/auth collaborator.
///
/// The core never looks at raw status codes itself; the transport layer
/// classifies them with [`TransportError::from_status`] and the core
/// propagates the result unchanged.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    #[error("Not authorized ({status}): {message}")]
    Unauthorized { status: u16, message: String },

    #[error("Resource not found: {message}")]
    NotFound { message: String },

    #[error("Rate limited, retry after {retry_after_secs} seconds")]
    RateLimited { retry_after_secs: u64 },

    #[error("Server error ({status}): {message}")]
    Server { status: u16, message: String },

    #[error("Request rejected ({status}): {message}")]
    Client { status: u16, message: String },

    #[error("Network error: {0}")]
    Network(String),

    #[error("Failed to decode response: {0}")]
    Decode(String),

    #[error("Cannot read upload {path}: {message}")]
    LocalFile { path: String, message: String },

    #[error("{operation} is not supported for {kind} jobs")]
    Unsupported { kind: JobKind, operation: String },
}

impl TransportError {
    /// Classify a non-success HTTP status and its body.
    ///
    /// The server reports errors as `{"error": "..."}` or
    /// `{"errors": ["...", ...]}`; when neither is present the raw body is kept.
    pub fn from_status(status: u16, body: &str) -> Self {
        let message = error_message_from_body(body);
        match status {
            401 | 403 => Self::Unauthorized { status, message },
            404 => Self::NotFound { message },
            429 => Self::RateLimited {
                retry_after_secs: 0,
            },
            400..=499 => Self::Client { status, message },
            _ => Self::Server { status, message },
        }
    }

    /// HTTP status carried by this error, if it came from a response.
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Unauthorized { status, .. }
            | Self::Server { status, .. }
            | Self::Client { status, .. } => Some(*status),
            Self::NotFound { .. } => Some(404),
            Self::RateLimited { .. } => Some(429),
            _ => None,
        }
    }
}

fn error_message_from_body(body: &str) -> String {
    let trimmed = body.trim();
    if let Ok(json) = serde_json::from_str::<serde_json::Value>(trimmed) {
        if let Some(msg) = json.get("error").and_then(|v| v.as_str()) {
            return msg.to_string();
        }
        if let Some(errors) = json.get("errors") {
            if let Some(list) = errors.as_array() {
                let parts: Vec<String> = list
                    .iter()
                    .map(|e| e.as_str().map(str::to_string).unwrap_or_else(|| e.to_string()))
                    .collect();
                return parts.join("; ");
            }
            if let Some(msg) = errors.as_str() {
                return msg.to_string();
            }
        }
    }
    trimmed.chars().take(500).collect()
}

/// Errors from job submission, refresh, polling and schedule tracking.
#[derive(Debug, Error)]
pub enum JobError {
    #[error("{kind} job has not been submitted yet")]
    NotSubmitted { kind: JobKind },

    #[error("{kind} job was already submitted as {id}")]
    AlreadySubmitted { kind: JobKind, id: String },

    #[error("{kind} job {id} still '{last_state}' after {attempts} attempts")]
    PollTimeout {
        kind: JobKind,
        id: String,
        attempts: u32,
        last_state: String,
    },

    #[error("{kind} job {id} finished as '{state}': {}", failure_text(.code, .message))]
    Failed {
        kind: JobKind,
        id: String,
        state: String,
        code: Option<String>,
        message: Option<String>,
    },

    #[error("Invalid poll policy: {0}")]
    InvalidPolicy(String),

    #[error("Malformed {kind} payload: {message}")]
    Decode { kind: JobKind, message: String },

    #[error("Unknown session token: {0}")]
    UnknownToken(String),

    #[error("{0} does not name a {1}")]
    WrongTarget(String, &'static str),

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Token(#[from] TokenError),

    #[error("Failed to write output: {0}")]
    Output(#[from] std::io::Error),
}

fn failure_text(code: &Option<String>, message: &Option<String>) -> String {
    match (code, message) {
        (Some(code), Some(message)) => format!("[{code}] {message}"),
        (Some(code), None) => format!("error code {code}"),
        (None, Some(message)) => message.clone(),
        (None, None) => "no error details".to_string(),
    }
}

impl JobError {
    pub fn decode(kind: JobKind, err: impl std::fmt::Display) -> Self {
        Self::Decode {
            kind,
            message: err.to_string(),
        }
    }
}

/// Errors from the persisted session-token store.
#[derive(Debug, Error)]
pub enum TokenError {
    #[error("Token store not found: {path}")]
    NotFound { path: PathBuf },

    #[error("Permission denied accessing token store: {path}")]
    PermissionDenied { path: PathBuf },

    #[error("IO error on token store {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Malformed token store {path}: {message}")]
    Malformed { path: PathBuf, message: String },

    #[error("Id chain must hold 1 to 3 ids, got {len}")]
    InvalidChain { len: usize },

    #[error("No token assigned to parent id {id}")]
    UnknownParent { id: String },

    #[error("Token registry lock poisoned")]
    Poisoned,
}

impl TokenError {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        let path = path.into();
        match source.kind() {
            std::io::ErrorKind::NotFound => Self::NotFound { path },
            std::io::ErrorKind::PermissionDenied => Self::PermissionDenied { path },
            _ => Self::Io { path, source },
        }
    }
}
