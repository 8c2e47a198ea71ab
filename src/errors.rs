//! Error types shared across the application.

use std::fmt::{Display, Formatter};

/// Shared application result type.
pub type Result<T> = std::result::Result<T, AppError>;

/// Application error enumeration covering all domain failure modes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AppError {
    /// Configuration parsing or validation failure.
    Config(String),
    /// File-system or I/O operation failure.
    Io(String),
    /// Task document missing, malformed, or not writable.
    Persistence(String),
    /// Concurrent modification or an attempt to re-refine a settled section.
    Conflict(String),
    /// Agent computation raised or produced an unusable result.
    Stage(String),
    /// Sending to or reading from the client connection failed.
    Transport(String),
    /// Inbound client message could not be classified.
    Protocol(String),
    /// Client connection closed.
    Disconnected,
    /// Client requested cancellation of the session.
    Cancelled,
    /// A stage or clarification deadline elapsed.
    Timeout(String),
    /// Requested entity does not exist.
    NotFound(String),
}

impl Display for AppError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Config(msg) => write!(f, "config: {msg}"),
            Self::Io(msg) => write!(f, "io: {msg}"),
            Self::Persistence(msg) => write!(f, "persistence: {msg}"),
            Self::Conflict(msg) => write!(f, "conflict: {msg}"),
            Self::Stage(msg) => write!(f, "stage: {msg}"),
            Self::Transport(msg) => write!(f, "transport: {msg}"),
            Self::Protocol(msg) => write!(f, "protocol: {msg}"),
            Self::Disconnected => write!(f, "client disconnected"),
            Self::Cancelled => write!(f, "cancelled by client"),
            Self::Timeout(msg) => write!(f, "timeout: {msg}"),
            Self::NotFound(msg) => write!(f, "not found: {msg}"),
        }
    }
}

impl std::error::Error for AppError {}

impl From<toml::de::Error> for AppError {
    fn from(err: toml::de::Error) -> Self {
        Self::Config(format!("invalid config: {err}"))
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        Self::Persistence(format!("invalid json: {err}"))
    }
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}
