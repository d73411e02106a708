//! Error types for haconf-instance.

use std::path::PathBuf;

use thiserror::Error;

/// Errors from loading instance options.
#[derive(Debug, Error)]
pub enum OptionsError {
    #[error("options file not found at {path}")]
    NotFound { path: PathBuf },

    #[error("failed to parse options at {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Errors from the validate / reload subprocesses.
#[derive(Debug, Error)]
pub enum ProcessError {
    #[error("failed to run {command}: {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to collect output of {command}: {source}")]
    Output {
        command: String,
        #[source]
        source: std::io::Error,
    },

    /// The proxy rejected the configuration; `output` is stdout and stderr interleaved.
    #[error("{output}")]
    Validation { output: String },

    #[error("reload command exited with {}: {output}", status.map_or_else(|| "signal".to_string(), |c| format!("status {c}")))]
    Reload { status: Option<i32>, output: String },
}

/// Errors from the runtime control channel.
#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error("cannot connect to runtime socket {socket}: {source}")]
    Connect {
        socket: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("runtime socket {socket} I/O error: {source}")]
    Io {
        socket: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("command '{command}' rejected: {reply}")]
    Rejected { command: String, reply: String },
}
