//! Template writer: renders a [`Config`] into files and writes them atomically.
//!
//! ## `atomic_write` protocol
//!
//! 1. Normalise line endings and SHA-256 hash the rendered content.
//! 2. Hash the file currently on disk; identical content is left untouched.
//! 3. Write `<path>.haconf.tmp` next to the target.
//! 4. Copy the live file to `<path>.1` after shifting older copies, when
//!    old generations are kept.
//! 5. Rename the tmp file over the target (atomic on POSIX).

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};

use haconf_core::Config;

use crate::context::{map_path, MapContext, RenderSettings, TemplateContext};
use crate::engine::{
    TemplateSet, TemplateSource, HAPROXY_TEMPLATE, MAP_TEMPLATE, MODSECURITY_TEMPLATE,
};
use crate::error::{io_err, RenderError};

pub const HAPROXY_TMPL: &str = "haproxy.tmpl";
pub const MODSECURITY_TMPL: &str = "spoe-modsecurity.tmpl";
pub const MAP_TMPL: &str = "map.tmpl";

const HAPROXY_SIZE_HINT: usize = 16384;
const MODSECURITY_SIZE_HINT: usize = 1024;
const MAP_SIZE_HINT: usize = 2048;

// ---------------------------------------------------------------------------
// Layout
// ---------------------------------------------------------------------------

/// Where templates come from and where their output goes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TemplateLayout {
    pub config_file: PathBuf,
    pub config_dir: PathBuf,
    pub maps_dir: PathBuf,
    pub haproxy_template: TemplateSource,
    pub modsecurity_template: TemplateSource,
    pub map_template: TemplateSource,
    pub max_old_config_files: usize,
    pub stats_socket: Option<PathBuf>,
}

impl TemplateLayout {
    /// Layout using the embedded templates.
    pub fn embedded(config_file: PathBuf, config_dir: PathBuf, maps_dir: PathBuf) -> Self {
        Self {
            config_file,
            config_dir,
            maps_dir,
            haproxy_template: TemplateSource::Embedded(HAPROXY_TEMPLATE),
            modsecurity_template: TemplateSource::Embedded(MODSECURITY_TEMPLATE),
            map_template: TemplateSource::Embedded(MAP_TEMPLATE),
            max_old_config_files: 0,
            stats_socket: None,
        }
    }

    pub fn modsecurity_file(&self) -> PathBuf {
        self.config_dir.join("spoe-modsecurity.conf")
    }

    pub fn render_settings(&self) -> RenderSettings {
        RenderSettings {
            maps_dir: self.maps_dir.clone(),
            modsecurity_config: self.modsecurity_file(),
            stats_socket: self.stats_socket.clone(),
        }
    }
}

// ---------------------------------------------------------------------------
// Results
// ---------------------------------------------------------------------------

/// Outcome of an individual file write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WriteResult {
    /// File was written (content changed or did not previously exist).
    Written { path: PathBuf },
    /// File was skipped; the on-disk content already matches.
    Unchanged { path: PathBuf },
}

impl WriteResult {
    pub fn path(&self) -> &Path {
        match self {
            WriteResult::Written { path } | WriteResult::Unchanged { path } => path,
        }
    }

    pub fn is_written(&self) -> bool {
        matches!(self, WriteResult::Written { .. })
    }
}

/// One rendered file, not yet written.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Artifact {
    pub path: PathBuf,
    pub content: String,
    pub max_old_files: usize,
}

// ---------------------------------------------------------------------------
// TemplateWriter
// ---------------------------------------------------------------------------

/// Renders a generation through the main and map template sets.
pub struct TemplateWriter {
    layout: TemplateLayout,
    templates: TemplateSet,
    maps: TemplateSet,
}

impl TemplateWriter {
    pub fn new(layout: TemplateLayout) -> Self {
        Self {
            layout,
            templates: TemplateSet::new(),
            maps: TemplateSet::new(),
        }
    }

    pub fn layout(&self) -> &TemplateLayout {
        &self.layout
    }

    pub fn templates(&self) -> &TemplateSet {
        &self.templates
    }

    pub fn maps(&self) -> &TemplateSet {
        &self.maps
    }

    /// Reset both template sets and register the three templates.
    pub fn parse_templates(&mut self) -> Result<(), RenderError> {
        self.templates.clear_templates();
        self.maps.clear_templates();

        let layout = &self.layout;
        self.templates.new_template(
            MODSECURITY_TMPL,
            &layout.modsecurity_template,
            Some(layout.modsecurity_file()),
            0,
            MODSECURITY_SIZE_HINT,
        )?;
        self.templates.new_template(
            HAPROXY_TMPL,
            &layout.haproxy_template,
            Some(layout.config_file.clone()),
            layout.max_old_config_files,
            HAPROXY_SIZE_HINT,
        )?;
        self.maps
            .new_template(MAP_TMPL, &layout.map_template, None, 0, MAP_SIZE_HINT)?;

        tracing::debug!(
            templates = self.templates.entries().len(),
            "proxy templates parsed"
        );
        Ok(())
    }

    /// Render every output of `config`, maps first so that files they are
    /// referenced from are written after them.
    pub fn render(&self, config: &Config) -> Result<Vec<Artifact>, RenderError> {
        if self.templates.is_empty() {
            return Err(RenderError::UnknownTemplate {
                name: HAPROXY_TMPL.to_string(),
            });
        }
        let mut artifacts = Vec::new();

        for map in config.maps() {
            let ctx = MapContext::new(map).to_tera_context()?;
            artifacts.push(Artifact {
                path: map_path(&self.layout.maps_dir, &map.name),
                content: self.maps.render(MAP_TMPL, &ctx)?,
                max_old_files: 0,
            });
        }

        let ctx = TemplateContext::from_config(config, &self.layout.render_settings())
            .to_tera_context()?;
        for entry in self.templates.entries() {
            let Some(output) = &entry.output else {
                continue;
            };
            artifacts.push(Artifact {
                path: output.clone(),
                content: self.templates.render(&entry.name, &ctx)?,
                max_old_files: entry.max_old_files,
            });
        }
        Ok(artifacts)
    }

    /// Render and write every output of `config`.
    pub fn write(&self, config: &Config) -> Result<Vec<WriteResult>, RenderError> {
        let artifacts = self.render(config)?;
        let mut writes = Vec::with_capacity(artifacts.len());
        for artifact in &artifacts {
            writes.push(atomic_write(
                &artifact.path,
                &artifact.content,
                artifact.max_old_files,
            )?);
        }
        Ok(writes)
    }
}

// ---------------------------------------------------------------------------
// atomic_write
// ---------------------------------------------------------------------------

/// Atomically replace `path` with `content`, keeping `max_old_files`
/// previous versions as `<path>.1..N`.
pub fn atomic_write(
    path: &Path,
    content: &str,
    max_old_files: usize,
) -> Result<WriteResult, RenderError> {
    let tmp = PathBuf::from(format!("{}.haconf.tmp", path.display()));
    atomic_write_with_tmp(path, content, max_old_files, &tmp)
}

fn atomic_write_with_tmp(
    path: &Path,
    content: &str,
    max_old_files: usize,
    tmp: &Path,
) -> Result<WriteResult, RenderError> {
    let normalized = content.replace("\r\n", "\n");
    let content = normalized.as_str();

    if file_digest(path)?.as_deref() == Some(digest(content.as_bytes()).as_str()) {
        tracing::debug!(path = %path.display(), "unchanged");
        return Ok(WriteResult::Unchanged {
            path: path.to_path_buf(),
        });
    }

    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|e| io_err(parent, e))?;
    }
    fs::write(tmp, content).map_err(|e| io_err(tmp, e))?;

    if max_old_files > 0 && path.exists() {
        if let Err(e) = keep_old_file(path, max_old_files) {
            let _ = fs::remove_file(tmp);
            return Err(io_err(path, e));
        }
    }

    if let Err(e) = fs::rename(tmp, path) {
        let _ = fs::remove_file(tmp);
        return Err(io_err(path, e));
    }

    tracing::debug!(path = %path.display(), "wrote");
    Ok(WriteResult::Written {
        path: path.to_path_buf(),
    })
}

fn digest(bytes: &[u8]) -> String {
    let mut h = Sha256::new();
    h.update(bytes);
    hex::encode(h.finalize())
}

/// SHA-256 of the file at `path`, or `None` when it does not exist.
fn file_digest(path: &Path) -> Result<Option<String>, RenderError> {
    match fs::read(path) {
        Ok(bytes) => Ok(Some(digest(&bytes))),
        Err(err) if err.kind() == ErrorKind::NotFound => Ok(None),
        Err(err) => Err(io_err(path, err)),
    }
}

/// Shift `<path>.n` to `<path>.n+1`, dropping the oldest, then copy the live
/// file to `<path>.1`. The live file stays in place until the rename.
fn keep_old_file(path: &Path, max_old_files: usize) -> std::io::Result<()> {
    let oldest = numbered_path(path, max_old_files);
    if oldest.exists() {
        fs::remove_file(&oldest)?;
    }
    for n in (1..max_old_files).rev() {
        let src = numbered_path(path, n);
        if src.exists() {
            fs::rename(&src, numbered_path(path, n + 1))?;
        }
    }
    fs::copy(path, numbered_path(path, 1))?;
    Ok(())
}

/// Path of the `n`-th previous generation of `base` (e.g. `haproxy.cfg.2`).
pub fn numbered_path(base: &Path, n: usize) -> PathBuf {
    let mut name = base.as_os_str().to_os_string();
    name.push(format!(".{n}"));
    PathBuf::from(name)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
