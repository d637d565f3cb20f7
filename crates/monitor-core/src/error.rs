use std::path::PathBuf;
use thiserror::Error;

/// Startup failures raised while resolving the effective configuration.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// A required field is missing or a value is out of range after merging.
    #[error("Configuration invalid: {0}")]
    Invalid(String),

    /// The config file exists but is not a YAML key/value mapping.
    #[error("Config file {} is unreadable: {reason}", path.display())]
    FileUnreadable { path: PathBuf, reason: String },

    /// The resolved device path does not exist on this machine.
    #[error("uBlox device missing! {}", .0.display())]
    DeviceMissing(PathBuf),
}

/// Failures reported by a device session.
#[derive(Error, Debug)]
pub enum DeviceError {
    /// The device node is absent or the OS refused to open it.
    #[error("Device unavailable at {}: {source}", path.display())]
    Unavailable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The transport reported a disconnect or an I/O failure mid-stream.
    #[error("Connection lost: {0}")]
    ConnectionLost(String),

    /// The session has been closed for good.
    #[error("Device session is closed")]
    Closed,

    /// The device sent a well-framed message whose contents break the
    /// decoder's contract.
    #[error("Decode error: {0}")]
    Decode(String),
}

/// Failures raised by a persistence sink.
#[derive(Error, Debug)]
pub enum PersistenceError {
    /// The time-series file could not be opened or written.
    #[error("Failed to write {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The relational store rejected an operation.
    #[error("Database failure in {context}: {details}")]
    Database {
        context: &'static str,
        details: String,
    },

    /// A reading could not be serialised.
    #[error("Failed to serialise reading: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The sink was appended to after it was closed.
    #[error("Reading store is closed")]
    Closed,
}

impl PersistenceError {
    /// Convenience constructor for IO errors with a known path.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

/// Runtime classification used by the supervisor.
///
/// Only [`MonitorError::ConnectionLost`] is recoverable; everything else is
/// collapsed into [`MonitorError::Fatal`] with a description.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MonitorError {
    /// The device link dropped; reconnecting is expected to help.
    #[error("Connection lost: {0}")]
    ConnectionLost(String),

    /// Anything reconnecting cannot fix.
    #[error("{0}")]
    Fatal(String),
}

impl From<DeviceError> for MonitorError {
    fn from(err: DeviceError) -> Self {
        match err {
            DeviceError::ConnectionLost(reason) => Self::ConnectionLost(reason),
            other => Self::Fatal(other.to_string()),
        }
    }
}

impl From<PersistenceError> for MonitorError {
    fn from(err: PersistenceError) -> Self {
        Self::Fatal(format!("Persistence error: {err}"))
    }
}
