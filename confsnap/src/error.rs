//! Error types for confsnap.

use std::io;
use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// Main error type for confsnap operations.
#[derive(Error, Debug)]
pub enum Error {
    /// SSH transport-level errors
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    /// Channel operation errors
    #[error("Channel error: {0}")]
    Channel(#[from] ChannelError),

    /// Session-level errors
    #[error("Session error: {0}")]
    Session(#[from] SessionError),

    /// Artifact persistence errors
    #[error("Artifact error: {0}")]
    Artifact(#[from] ArtifactError),

    /// Inventory errors
    #[error("Inventory error: {0}")]
    Inventory(#[from] InventoryError),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),
}

impl Error {
    /// Whether retrying the failed step could plausibly succeed.
    ///
    /// Timeouts, dropped connections and I/O hiccups are transient.
    /// Rejected credentials, host key mismatches and commands the device
    /// refused are permanent. Fetch retries reuse the open session, so a
    /// closed shell channel is permanent too.
    pub fn is_transient(&self) -> bool {
        match self {
            Error::Transport(e) => e.is_transient(),
            Error::Channel(e) => !matches!(e, ChannelError::InvalidPattern(_) | ChannelError::Closed),
            Error::Session(_)
            | Error::Artifact(_)
            | Error::Inventory(_)
            | Error::Config(_) => false,
        }
    }
}

/// Transport layer errors (SSH connection, authentication).
#[derive(Error, Debug)]
pub enum TransportError {
    /// SSH handshake or protocol error
    #[error("SSH error: {0}")]
    Ssh(#[from] russh::Error),

    /// Authentication failed
    #[error("Authentication failed for user '{user}'")]
    AuthenticationFailed { user: String },

    /// SSH key error
    #[error("SSH key error: {0}")]
    Key(String),

    /// Host key differs from the one recorded in known_hosts
    #[error("Host key for {host}:{port} changed (known_hosts line {line})")]
    HostKeyChanged { host: String, port: u16, line: usize },

    /// Host is not in known_hosts and strict checking is enabled
    #[error("Host key for {host}:{port} is unknown")]
    HostKeyUnknown { host: String, port: u16 },

    /// known_hosts could not be read or written
    #[error("known_hosts error: {0}")]
    KnownHosts(String),

    /// Connection was closed unexpectedly
    #[error("Connection disconnected")]
    Disconnected,

    /// Operation timed out
    #[error("Operation timed out after {0:?}")]
    Timeout(Duration),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl TransportError {
    fn is_transient(&self) -> bool {
        match self {
            TransportError::Ssh(_)
            | TransportError::Disconnected
            | TransportError::Timeout(_)
            | TransportError::Io(_) => true,
            TransportError::AuthenticationFailed { .. }
            | TransportError::Key(_)
            | TransportError::HostKeyChanged { .. }
            | TransportError::HostKeyUnknown { .. }
            | TransportError::KnownHosts(_) => false,
        }
    }
}

/// Channel layer errors (pattern matching, PTY operations).
#[derive(Error, Debug)]
pub enum ChannelError {
    /// Pattern matching timed out
    #[error("Pattern not found within {0:?}")]
    PatternTimeout(Duration),

    /// Channel closed unexpectedly
    #[error("Channel closed")]
    Closed,

    /// SSH protocol error on the channel
    #[error("Channel SSH error: {0}")]
    Ssh(russh::Error),

    /// Invalid regex pattern
    #[error("Invalid regex pattern: {0}")]
    InvalidPattern(#[from] regex::Error),
}

/// Session errors (state and command execution).
#[derive(Error, Debug)]
pub enum SessionError {
    /// Session already closed
    #[error("Session is closed")]
    Closed,

    /// The device rejected a command
    #[error("Command '{command}' failed: {message}")]
    CommandFailed { command: String, message: String },

    /// No platform registered under this name
    #[error("Unknown platform '{name}'")]
    UnknownPlatform { name: String },
}

/// Local artifact storage errors.
#[derive(Error, Debug)]
pub enum ArtifactError {
    /// Filesystem operation failed
    #[error("{action} {path}: {source}")]
    Io {
        action: &'static str,
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// Device name cannot be used as a file name component
    #[error("Device name '{name}' is not usable in a file name")]
    InvalidName { name: String },

    /// Every candidate file name was already taken
    #[error("No free artifact name for {path}")]
    NameExhausted { path: PathBuf },

    /// Write did not complete in time
    #[error("Write timed out after {0:?}")]
    Timeout(Duration),
}

/// Inventory validation errors.
#[derive(Error, Debug)]
pub enum InventoryError {
    /// Device name appears more than once
    #[error("Duplicate device '{name}'")]
    DuplicateDevice { name: String },

    /// Device name cannot be used as a file name component
    #[error("Invalid device name '{name}': {reason}")]
    InvalidName { name: String, reason: &'static str },

    /// Device has no address
    #[error("Device '{name}' has an empty address")]
    EmptyAddress { name: String },

    /// Device has no credentials, either its own or the fleet default
    #[error("Device '{name}' has no credentials")]
    MissingCredentials { name: String },
}

/// Fleet file and collector setting errors.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Fleet file could not be read
    #[error("Failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// Fleet file is not valid TOML or does not match the schema
    #[error("Failed to parse {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    /// A setting has an unusable value
    #[error("Invalid configuration: {message}")]
    Invalid { message: String },
}

/// Result type alias using confsnap's Error.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timeouts_are_transient() {
        let err: Error = TransportError::Timeout(Duration::from_secs(1)).into();
        assert!(err.is_transient());

        let err: Error = ChannelError::PatternTimeout(Duration::from_secs(1)).into();
        assert!(err.is_transient());
    }

    #[test]
    fn test_rejections_are_permanent() {
        let err: Error = TransportError::AuthenticationFailed {
            user: "root".into(),
        }
        .into();
        assert!(!err.is_transient());

        let err: Error = SessionError::CommandFailed {
            command: "show configuration".into(),
            message: "syntax error".into(),
        }
        .into();
        assert!(!err.is_transient());

        let err: Error = ChannelError::Closed.into();
        assert!(!err.is_transient());
    }
}
