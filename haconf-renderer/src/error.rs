//! Error types for haconf-renderer.

use std::path::PathBuf;

use thiserror::Error;

/// All errors that can arise from template parsing, rendering and writing.
#[derive(Debug, Error)]
pub enum RenderError {
    /// Tera template engine error while rendering.
    #[error("template engine error: {0}")]
    Tera(#[from] tera::Error),

    /// A template source failed to parse.
    #[error("failed to parse template '{name}': {source}")]
    Parse {
        name: String,
        #[source]
        source: tera::Error,
    },

    /// Rendering was requested for a template that was never registered.
    #[error("template '{name}' is not registered")]
    UnknownTemplate { name: String },

    /// Rendered output was not valid UTF-8.
    #[error("template '{name}' rendered invalid UTF-8: {source}")]
    Utf8 {
        name: String,
        #[source]
        source: std::string::FromUtf8Error,
    },

    /// JSON serialization error (building tera context).
    #[error("context serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Filesystem error while reading a template or writing an artifact.
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Convenience constructor for [`RenderError::Io`].
pub(crate) fn io_err(path: impl Into<PathBuf>, source: std::io::Error) -> RenderError {
    RenderError::Io {
        path: path.into(),
        source,
    }
}
