//! Error types for haconf-core.

use std::path::PathBuf;

use thiserror::Error;

use crate::types::BackendId;

/// Errors from loading or saving a desired-state file.
#[derive(Debug, Error)]
pub enum StateError {
    /// Underlying I/O failure (permission denied, read-only fs, etc.).
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// YAML serialization error (save path).
    #[error("YAML serialization error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// YAML parse error on load — includes file path and line context from serde_yaml.
    #[error("failed to parse desired state at {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    /// The desired-state file did not exist.
    #[error("desired state not found at {path}")]
    NotFound { path: PathBuf },
}

/// Errors raised by the build phases of a [`crate::Config`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BuildError {
    #[error("host entry with an empty hostname")]
    EmptyHostname,

    #[error("{kind} '{name}' {reason}")]
    InvalidName {
        kind: &'static str,
        name: String,
        reason: &'static str,
    },

    #[error("host '{host}' is declared more than once")]
    DuplicateHost { host: String },

    #[error("host '{host}' routes path '{path}' more than once")]
    DuplicatePath { host: String, path: String },

    #[error("ssl-passthrough host '{host}' can only route the root path")]
    PassthroughWithPaths { host: String },

    #[error("backend '{backend}' referenced by {host}{path} does not exist")]
    UnknownBackend {
        backend: BackendId,
        host: String,
        path: String,
    },

    #[error("default backend '{backend}' does not exist")]
    UnknownDefaultBackend { backend: BackendId },

    #[error("backend '{backend}' is declared more than once")]
    DuplicateBackend { backend: BackendId },

    #[error("backend '{backend}' has more than one server named '{endpoint}'")]
    DuplicateEndpoint { backend: BackendId, endpoint: String },

    #[error("backend '{backend}' server '{endpoint}': {reason}")]
    InvalidEndpoint {
        backend: BackendId,
        endpoint: String,
        reason: String,
    },
}
