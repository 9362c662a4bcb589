//! Unified error type hierarchy for vLLM Panel
//!
//! Provides structured error handling with TransportError, PreconditionError,
//! SchemeError, ConfigError, ChannelError, and AppError.

use std::io;
use thiserror::Error;

/// Request/response failures against the process host.
///
/// Always caught by the caller, always surfaced as a transient notification,
/// and never leaves a partially applied mutation behind.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum TransportError {
    #[error("Request to {endpoint} failed: {reason}")]
    Request { endpoint: String, reason: String },

    #[error("Server returned HTTP {status} for {endpoint}")]
    Status { endpoint: String, status: u16 },

    #[error("Invalid response from {endpoint}: {reason}")]
    Decode { endpoint: String, reason: String },

    #[error("Request rejected: {0}")]
    Rejected(String),
}

impl TransportError {
    pub fn request(endpoint: &str, reason: impl ToString) -> Self {
        TransportError::Request {
            endpoint: endpoint.to_string(),
            reason: reason.to_string(),
        }
    }

    pub fn decode(endpoint: &str, reason: impl ToString) -> Self {
        TransportError::Decode {
            endpoint: endpoint.to_string(),
            reason: reason.to_string(),
        }
    }
}

/// An action was invoked in a run state that does not permit it.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PreconditionError {
    #[error("Server is already {0}")]
    AlreadyActive(&'static str),

    #[error("Server is not running (state: {0})")]
    NotRunning(&'static str),
}

/// Scheme store failures.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SchemeError {
    #[error("Scheme not found: {0}")]
    NotFound(String),

    #[error("Scheme name cannot be empty")]
    EmptyName,

    #[error("Deletion of scheme '{0}' was not confirmed")]
    NotConfirmed(String),

    #[error("Scheme store rejected the request: {0}")]
    Rejected(String),

    #[error(transparent)]
    Transport(#[from] TransportError),
}

/// Settings and configuration file errors.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Configuration file not found: {0}")]
    FileNotFound(String),

    #[error("Invalid JSON in config: {0}")]
    InvalidJson(#[from] serde_json::Error),

    #[error("Configuration validation failed: {0}")]
    ValidationFailed(String),

    #[error("IO error during config operations: {0}")]
    IoError(#[from] io::Error),
}

/// Realtime event channel errors.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ChannelError {
    #[error("Connection to {url} failed: {reason}")]
    Connect { url: String, reason: String },

    #[error("Malformed event frame: {0}")]
    MalformedFrame(String),
}

/// Global error type for the panel.
///
/// Provides unified error categorization and user-facing messages.
#[derive(Error, Debug, Clone)]
pub enum AppError {
    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Precondition(#[from] PreconditionError),

    #[error(transparent)]
    Scheme(#[from] SchemeError),

    #[error(transparent)]
    Channel(#[from] ChannelError),

    /// Settings persist or deserialize error
    #[error("Settings error: {0}")]
    Settings(String),

    /// Invalid operator input
    #[error("Invalid input: {0}")]
    InvalidInput(String),
}

impl AppError {
    /// Get a user-facing error message suitable for a notification
    pub fn user_message(&self) -> String {
        match self {
            AppError::Transport(e) => format!("Request failed: {}", e),
            AppError::Precondition(e) => e.to_string(),
            AppError::Scheme(SchemeError::Transport(e)) => format!("Scheme store unreachable: {}", e),
            AppError::Scheme(e) => e.to_string(),
            AppError::Channel(e) => format!("Event channel: {}", e),
            AppError::Settings(msg) => format!("Settings error: {}", msg),
            AppError::InvalidInput(msg) => format!("Invalid input: {}", msg),
        }
    }
}

impl From<ConfigError> for AppError {
    fn from(e: ConfigError) -> Self {
        AppError::Settings(e.to_string())
    }
}

/// Top-level result type for operations that may fail.
pub type Result<T> = std::result::Result<T, AppError>;
