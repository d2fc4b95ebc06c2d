//! Error types for numa-affinity
//!
//! Every fallible operation in the crate returns [`AffinityError`]. The
//! variants follow the failure classes the engine distinguishes between:
//! unparseable input, platform access denials, topology discovery problems,
//! unrepresentable CPU ids and storage scope failures.

use std::path::PathBuf;
use thiserror::Error;

/// Main error type for affinity operations
#[derive(Error, Debug)]
pub enum AffinityError {
    /// Unparseable mask or CPU list text
    #[error("Invalid format '{input}': {message}")]
    Format { input: String, message: String },

    /// Platform denied reading or writing a process's affinity
    #[error("Access error for process {pid}: {message}")]
    Access { pid: u32, message: String },

    /// The process went away between enumeration and use
    #[error("Process {0} not found")]
    ProcessNotFound(u32),

    /// Process enumeration failed as a whole
    #[error("Process enumeration failed: {0}")]
    Enumeration(String),

    /// Topology discovery failed (callers fall back to a single node)
    #[error("Topology discovery error: {0}")]
    TopologyDiscovery(String),

    /// CPU ids at or above 64 cannot be represented in a 64-bit mask
    #[error("CPU ids {cpus:?} cannot be represented in a 64-bit affinity mask")]
    Truncation { cpus: Vec<usize> },

    /// CPU id outside the discovered topology
    #[error("Invalid CPU ID: {cpu} (system has {available} CPUs)")]
    InvalidCpu { cpu: usize, available: usize },

    /// No CPU was selected for an apply
    #[error("At least one CPU must be selected")]
    EmptySelection,

    /// Selection collides on hyperthread siblings and was not confirmed
    #[error("CPU selection shares physical cores {cores:?}; confirmation required")]
    UnconfirmedCollision { cores: Vec<usize> },

    /// One or more storage scopes failed to write
    #[error("Persistence error ({})", describe_failures(.failures))]
    Persistence { failures: Vec<ScopeFailure> },

    /// I/O error with path context
    #[error("I/O error at '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Configuration error
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// Serialization error (registry scopes, export files, config)
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Operation not available on this platform
    #[error("Unsupported operation: {0}")]
    UnsupportedOperation(String),
}

/// A single storage scope that failed to write
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScopeFailure {
    /// Backend name (e.g. `machine`, `user`)
    pub scope: String,
    /// Failure description
    pub message: String,
}

fn describe_failures(failures: &[ScopeFailure]) -> String {
    failures
        .iter()
        .map(|f| format!("{}: {}", f.scope, f.message))
        .collect::<Vec<_>>()
        .join("; ")
}

impl AffinityError {
    /// Create a format error
    pub fn format(input: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Format {
            input: input.into(),
            message: message.into(),
        }
    }

    /// Create an access error
    pub fn access(pid: u32, message: impl Into<String>) -> Self {
        Self::Access {
            pid,
            message: message.into(),
        }
    }

    /// Create an I/O error with path context
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Create a persistence error for a single scope
    pub fn persistence(scope: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Persistence {
            failures: vec![ScopeFailure {
                scope: scope.into(),
                message: message.into(),
            }],
        }
    }

    /// Create a configuration error
    pub fn config(message: impl Into<String>) -> Self {
        Self::ConfigError(message.into())
    }

    /// Check if this error is a per-process access issue
    pub fn is_access_error(&self) -> bool {
        match self {
            Self::Access { .. } | Self::ProcessNotFound(_) => true,
            Self::Io { source, .. } => source.kind() == std::io::ErrorKind::PermissionDenied,
            _ => false,
        }
    }

    /// Check if this error may go away on the next reconciliation tick
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::Access { .. }
                | Self::ProcessNotFound(_)
                | Self::Enumeration(_)
                | Self::Io { .. }
                | Self::Persistence { .. }
        )
    }
}

/// Result type alias for affinity operations
pub type Result<T> = std::result::Result<T, AffinityError>;

impl From<std::io::Error> for AffinityError {
    fn from(err: std::io::Error) -> Self {
        AffinityError::Io {
            path: PathBuf::new(),
            source: err,
        }
    }
}

impl From<serde_json::Error> for AffinityError {
    fn from(err: serde_json::Error) -> Self {
        AffinityError::Serialization(err.to_string())
    }
}

/// Extension trait for adding path context to std::io::Result
pub trait IoResultExt<T> {
    /// Add path context to an I/O error
    fn with_path(self, path: impl Into<PathBuf>) -> Result<T>;
}

impl<T> IoResultExt<T> for std::io::Result<T> {
    fn with_path(self, path: impl Into<PathBuf>) -> Result<T> {
        self.map_err(|e| AffinityError::io(path, e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_io_error_with_path() {
        let io_err = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied");
        let err: Result<()> = Err(io_err).with_path("/etc/rules");
        let err = err.unwrap_err();
        assert!(err.is_access_error());
        assert!(err.to_string().contains("/etc/rules"));
    }

    #[test]
    fn test_error_recoverability() {
        assert!(AffinityError::access(42, "denied").is_recoverable());
        assert!(AffinityError::Enumeration("boom".into()).is_recoverable());
        assert!(!AffinityError::format("zz", "not a number").is_recoverable());
    }

    #[test]
    fn test_persistence_message_lists_scopes() {
        let err = AffinityError::Persistence {
            failures: vec![
                ScopeFailure { scope: "machine".into(), message: "read-only".into() },
                ScopeFailure { scope: "user".into(), message: "disk full".into() },
            ],
        };
        let text = err.to_string();
        assert!(text.contains("machine: read-only"));
        assert!(text.contains("user: disk full"));
    }
}
