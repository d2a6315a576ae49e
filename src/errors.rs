//! Error types shared across the crate.

use std::fmt::{Display, Formatter};

/// Shared crate result type.
pub type Result<T> = std::result::Result<T, AppError>;

/// Error enumeration covering all engine failure modes.
///
/// Internal protocol noise (malformed lines, unknown envelopes, unmatched
/// control responses) never surfaces as an `AppError`; the pump logs and
/// recovers from it. These variants are reserved for caller-facing failures.
#[derive(Debug)]
pub enum AppError {
    /// Configuration parsing or validation failure.
    Config(String),
    /// Worker transport failure (spawn, pipe, or write on a closed stream).
    Transport(String),
    /// Wire-level framing or encoding failure.
    Protocol(String),
    /// Operation invoked in a session state that does not permit it.
    SessionState(String),
    /// The session closed while the operation was in flight.
    SessionClosed(String),
    /// The worker answered a control request with an error.
    Control(String),
    /// Permission callback or external tool executor failure.
    Permission(String),
    /// File-system or I/O operation failure.
    Io(String),
}

impl Display for AppError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Config(msg) => write!(f, "config: {msg}"),
            Self::Transport(msg) => write!(f, "transport: {msg}"),
            Self::Protocol(msg) => write!(f, "protocol: {msg}"),
            Self::SessionState(msg) => write!(f, "session state: {msg}"),
            Self::SessionClosed(msg) => write!(f, "session closed: {msg}"),
            Self::Control(msg) => write!(f, "control: {msg}"),
            Self::Permission(msg) => write!(f, "permission: {msg}"),
            Self::Io(msg) => write!(f, "io: {msg}"),
        }
    }
}

impl AppError {
    /// The message without its category prefix.
    #[must_use]
    pub fn message(&self) -> &str {
        match self {
            Self::Config(msg)
            | Self::Transport(msg)
            | Self::Protocol(msg)
            | Self::SessionState(msg)
            | Self::SessionClosed(msg)
            | Self::Control(msg)
            | Self::Permission(msg)
            | Self::Io(msg) => msg,
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
        Self::Protocol(format!("json: {err}"))
    }
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}
