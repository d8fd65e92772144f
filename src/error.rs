//! Error types for node bootstrap

use std::path::PathBuf;

use thiserror::Error;

use crate::artifact::ComponentId;

/// Main error type for nodeadm operations
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// Missing or unparseable configuration, or a node that cannot be classified
    #[error("configuration error: {0}")]
    Configuration(String),

    /// A remote fetch failed
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    /// The caller cancelled an in-flight operation
    #[error("operation cancelled")]
    Cancelled,

    /// The host platform is not in the component's capability table
    #[error("{component}: unsupported platform: arch={arch} os={os}")]
    UnsupportedPlatform {
        /// Component that was requested
        component: ComponentId,
        /// Detected CPU architecture
        arch: String,
        /// Detected operating system
        os: String,
    },

    /// Artifact content did not match its published digest
    #[error("checksum mismatch: expected {expected}, got {actual}")]
    ChecksumMismatch {
        /// Published digest
        expected: String,
        /// Digest of the bytes actually received
        actual: String,
    },

    /// Installing a component failed
    #[error("failed to install {component}: {source}")]
    Install {
        /// Component being installed
        component: ComponentId,
        /// Proximate cause
        #[source]
        source: Box<Error>,
    },

    /// Uninstalling a component failed
    #[error("failed to uninstall {component}: {source}")]
    Uninstall {
        /// Component being removed
        component: ComponentId,
        /// Proximate cause
        #[source]
        source: Box<Error>,
    },

    /// Bootstrap failed and undoing its installs failed too
    #[error("{source} (rollback also failed: {rollback})")]
    RollbackFailed {
        /// The failure that triggered the rollback
        #[source]
        source: Box<Error>,
        /// The failure of the rollback itself
        rollback: Box<Error>,
    },

    /// The OS package manager (or another subprocess) exited unsuccessfully
    #[error("command failed: {command} (exit status {status}): {stderr}")]
    CommandFailed {
        /// Command line that was run
        command: String,
        /// Exit status, or -1 when killed by a signal
        status: i32,
        /// Captured standard error
        stderr: String,
    },

    /// Tracker file could not be read or written
    #[error("tracker persistence error at {}: {message}", path.display())]
    Persistence {
        /// Tracker file path
        path: PathBuf,
        /// Underlying failure
        message: String,
    },

    /// Node validation failed
    #[error("validation error: {0}")]
    Validation(String),

    /// I/O error outside the tracker
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Failures of a single remote fetch attempt
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum TransportError {
    /// The server answered with a non-success status
    #[error("GET {url} returned status {status}")]
    Status {
        /// Requested URL
        url: String,
        /// HTTP status code
        status: u16,
    },

    /// The connection could not be established or broke mid-transfer
    #[error("GET {url} failed: {message}")]
    Connection {
        /// Requested URL
        url: String,
        /// Underlying failure
        message: String,
    },

    /// The fetch did not complete within its deadline
    #[error("GET {url} timed out after {timeout_secs}s")]
    Timeout {
        /// Requested URL
        url: String,
        /// Deadline that elapsed
        timeout_secs: u64,
    },
}

impl TransportError {
    /// HTTP status code, when the server answered
    pub fn status(&self) -> Option<u16> {
        match self {
            TransportError::Status { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// URL of the failed request
    pub fn url(&self) -> &str {
        match self {
            TransportError::Status { url, .. }
            | TransportError::Connection { url, .. }
            | TransportError::Timeout { url, .. } => url,
        }
    }
}

impl Error {
    /// Create a configuration error with the given message
    pub fn configuration(msg: impl Into<String>) -> Self {
        Self::Configuration(msg.into())
    }

    /// Create a validation error with the given message
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    /// Create a persistence error for the tracker at `path`
    pub fn persistence(path: impl Into<PathBuf>, msg: impl std::fmt::Display) -> Self {
        Self::Persistence {
            path: path.into(),
            message: msg.to_string(),
        }
    }

    /// Wrap `source` as an install failure of `component`
    pub fn install(component: ComponentId, source: Error) -> Self {
        Self::Install {
            component,
            source: Box::new(source),
        }
    }

    /// Wrap `source` as an uninstall failure of `component`
    pub fn uninstall(component: ComponentId, source: Error) -> Self {
        Self::Uninstall {
            component,
            source: Box::new(source),
        }
    }

    /// Report a failed rollback without hiding the failure that caused it
    pub fn rollback_failed(source: Error, rollback: Error) -> Self {
        Self::RollbackFailed {
            source: Box::new(source),
            rollback: Box::new(rollback),
        }
    }

    /// Whether a caller-side retry could plausibly succeed
    ///
    /// Only transport failures qualify: broken connections, timeouts, 429 and
    /// 5xx responses. Wrapped install errors are judged by their cause.
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Transport(TransportError::Connection { .. })
            | Error::Transport(TransportError::Timeout { .. }) => true,
            Error::Transport(TransportError::Status { status, .. }) => {
                *status == 429 || (500..600).contains(status)
            }
            Error::Install { source, .. } | Error::Uninstall { source, .. } => {
                source.is_retryable()
            }
            _ => false,
        }
    }

    /// The component a failure is attributed to, if any
    pub fn component(&self) -> Option<&ComponentId> {
        match self {
            Error::Install { component, .. }
            | Error::Uninstall { component, .. }
            | Error::UnsupportedPlatform { component, .. } => Some(component),
            _ => None,
        }
    }
}
