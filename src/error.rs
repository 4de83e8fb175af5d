//! Error types for downsonic
//!
//! This module provides error handling for the library, including:
//! - The crate-wide [`Error`] type and [`Result`] alias
//! - Severity classification ([`Severity`]) deciding whether an error aborts a run
//! - Per-track failure classification ([`FailureKind`]) carried by failed outcomes

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for downsonic operations
pub type Result<T> = std::result::Result<T, Error>;

/// Subsonic error code for a missing or wrong username/password
const SUBSONIC_WRONG_CREDENTIALS: i64 = 40;
/// Subsonic error code for token authentication not being supported for the user
const SUBSONIC_TOKEN_UNSUPPORTED: i64 = 41;
/// Subsonic error code for an authenticated user lacking permission
const SUBSONIC_NOT_AUTHORIZED: i64 = 50;

/// Main error type for downsonic
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error with context about which setting is invalid
    #[error("configuration error: {message}")]
    Config {
        /// Human-readable error message describing the configuration issue
        message: String,
        /// The configuration key that caused the error (e.g., "concurrency")
        key: Option<String>,
    },

    /// Credentials could not be resolved
    #[error("credentials error: {0}")]
    Credentials(String),

    /// The server rejected the supplied credentials
    #[error("authentication failed: {0}")]
    Authentication(String),

    /// The server answered with a Subsonic error envelope
    #[error("server error {code}: {message}")]
    Api {
        /// Subsonic error code
        code: i64,
        /// Message reported by the server
        message: String,
    },

    /// Network error
    ///
    /// Built through `From`, which drops the request URL so token and salt never reach a message.
    #[error("network error: {0}")]
    Network(#[source] reqwest::Error),

    /// The server answered with a non-success HTTP status
    #[error("HTTP {status} from {url}")]
    HttpStatus {
        /// HTTP status code
        status: u16,
        /// Request URL with credentials stripped
        url: String,
    },

    /// The server answered with a payload that does not match the expected shape
    #[error("invalid server response: {0}")]
    InvalidResponse(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Destination directory is missing or cannot be written to
    #[error("destination {path} is unusable: {reason}")]
    DestinationUnwritable {
        /// The destination directory
        path: PathBuf,
        /// Why the destination was rejected
        reason: String,
    },

    /// Operation was cancelled before it completed
    #[error("cancelled")]
    Cancelled,

    /// Other error
    #[error("{0}")]
    Other(String),
}

/// How seriously an error (or log event) affects a run, coarsest first.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    /// Aborts the run before any transfer starts
    Fatal,
    /// Isolated to a single track
    Error,
    /// Logged, does not change any outcome
    Warning,
    /// Routine progress
    Info,
    /// Diagnostic detail
    Debug,
}

impl Severity {
    /// The `tracing` level an event of this severity is emitted at.
    ///
    /// `tracing` has no level above ERROR, so fatal and per-track errors share it.
    pub fn tracing_level(self) -> tracing::Level {
        match self {
            Severity::Fatal | Severity::Error => tracing::Level::ERROR,
            Severity::Warning => tracing::Level::WARN,
            Severity::Info => tracing::Level::INFO,
            Severity::Debug => tracing::Level::DEBUG,
        }
    }
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Severity::Fatal => "fatal",
            Severity::Error => "error",
            Severity::Warning => "warning",
            Severity::Info => "info",
            Severity::Debug => "debug",
        };
        f.write_str(s)
    }
}

/// Classification of a per-track failure
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// Connection could not be established or was dropped
    Network,
    /// Request or body read timed out
    Timeout,
    /// Server answered with an error status or error envelope
    Server,
    /// Local filesystem write, sync or rename failed
    Io,
    /// Server answered with something other than audio
    InvalidResponse,
    /// Worker ended abnormally
    Internal,
}

impl std::fmt::Display for FailureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            FailureKind::Network => "network",
            FailureKind::Timeout => "timeout",
            FailureKind::Server => "server",
            FailureKind::Io => "io",
            FailureKind::InvalidResponse => "invalid_response",
            FailureKind::Internal => "internal",
        };
        f.write_str(s)
    }
}

impl Error {
    /// Build an API error from a Subsonic error envelope.
    ///
    /// Credential and permission codes become [`Error::Authentication`].
    pub fn from_subsonic(code: i64, message: impl Into<String>) -> Self {
        let message = message.into();
        match code {
            SUBSONIC_WRONG_CREDENTIALS | SUBSONIC_TOKEN_UNSUPPORTED | SUBSONIC_NOT_AUTHORIZED => {
                Error::Authentication(message)
            }
            _ => Error::Api { code, message },
        }
    }

    /// Severity of this error when it escapes the operation that produced it.
    ///
    /// Startup and enumeration code treat anything at [`Severity::Fatal`] as a
    /// reason to abort the run; transfer workers convert everything into a
    /// per-track outcome regardless.
    pub fn severity(&self) -> Severity {
        match self {
            Error::Config { .. }
            | Error::Credentials(_)
            | Error::Authentication(_)
            | Error::DestinationUnwritable { .. } => Severity::Fatal,
            Error::Cancelled => Severity::Info,
            Error::Api { .. }
            | Error::Network(_)
            | Error::HttpStatus { .. }
            | Error::InvalidResponse(_)
            | Error::Io(_)
            | Error::Serialization(_)
            | Error::Other(_) => Severity::Error,
        }
    }

    /// Classify this error for a `Failed` transfer outcome.
    pub fn failure_kind(&self) -> FailureKind {
        match self {
            Error::Network(e) if e.is_timeout() => FailureKind::Timeout,
            Error::Network(e) if e.is_status() => FailureKind::Server,
            Error::Network(_) => FailureKind::Network,
            Error::Io(e) if e.kind() == std::io::ErrorKind::TimedOut => FailureKind::Timeout,
            Error::Io(e) if is_connection_error(e.kind()) => FailureKind::Network,
            Error::Io(_) | Error::DestinationUnwritable { .. } => FailureKind::Io,
            Error::Api { .. } | Error::HttpStatus { .. } | Error::Authentication(_) => {
                FailureKind::Server
            }
            Error::InvalidResponse(_) | Error::Serialization(_) => FailureKind::InvalidResponse,
            Error::Config { .. }
            | Error::Credentials(_)
            | Error::Cancelled
            | Error::Other(_) => FailureKind::Internal,
        }
    }

    /// Shorthand for a configuration error tied to a specific key
    pub fn config(key: &str, message: impl Into<String>) -> Self {
        Error::Config {
            message: message.into(),
            key: Some(key.to_string()),
        }
    }
}

impl From<reqwest::Error> for Error {
    fn from(e: reqwest::Error) -> Self {
        Error::Network(e.without_url())
    }
}

/// I/O error kinds raised by a broken connection rather than the local disk
fn is_connection_error(kind: std::io::ErrorKind) -> bool {
    use std::io::ErrorKind;
    matches!(
        kind,
        ErrorKind::ConnectionRefused
            | ErrorKind::ConnectionReset
            | ErrorKind::ConnectionAborted
            | ErrorKind::NotConnected
            | ErrorKind::BrokenPipe
            | ErrorKind::UnexpectedEof
    )
}
