//! Unified diffs between rendered output and what is on disk.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use similar::TextDiff;

use haconf_core::Config;

use crate::error::{io_err, RenderError};
use crate::writer::{Artifact, TemplateWriter};

/// A single rendered file diff.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileDiff {
    pub path: PathBuf,
    pub unified_diff: String,
}

impl TemplateWriter {
    /// Render `config` and compare every output with the current file.
    ///
    /// No files are written. Files whose content already matches are omitted.
    pub fn diff(&self, config: &Config) -> Result<Vec<FileDiff>, RenderError> {
        diff_artifacts(&self.render(config)?)
    }
}

pub fn diff_artifacts(artifacts: &[Artifact]) -> Result<Vec<FileDiff>, RenderError> {
    let mut diffs = Vec::new();
    for artifact in artifacts {
        let rendered = normalize_line_endings(&artifact.content);
        let existing = read_existing_or_empty(&artifact.path)?;
        if existing == rendered {
            continue;
        }

        let old_header = format!("a/{}", artifact.path.display());
        let new_header = format!("b/{}", artifact.path.display());
        let unified = TextDiff::from_lines(&existing, &rendered)
            .unified_diff()
            .header(&old_header, &new_header)
            .context_radius(3)
            .to_string();

        diffs.push(FileDiff {
            path: artifact.path.clone(),
            unified_diff: unified,
        });
    }
    Ok(diffs)
}

fn read_existing_or_empty(path: &Path) -> Result<String, RenderError> {
    match std::fs::read_to_string(path) {
        Ok(content) => Ok(normalize_line_endings(&content)),
        Err(err) if err.kind() == ErrorKind::NotFound => Ok(String::new()),
        Err(err) => Err(io_err(path, err)),
    }
}

fn normalize_line_endings(content: &str) -> String {
    content.replace("\r\n", "\n")
}
