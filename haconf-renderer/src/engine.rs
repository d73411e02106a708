//! Tera template set: named templates, each bound to an output file.
//!
//! Two sets back a [`crate::TemplateWriter`]: the main set (`haproxy.tmpl`,
//! `spoe-modsecurity.tmpl`) whose entries each produce one file, and the
//! maps set (`map.tmpl`) which is rendered once per map with no fixed output.

use std::path::PathBuf;

use tera::Tera;

use crate::error::{io_err, RenderError};

// ---------------------------------------------------------------------------
// Embedded templates, baked into the binary at compile time via include_str!
// ---------------------------------------------------------------------------

pub const HAPROXY_TEMPLATE: &str = include_str!("../templates/haproxy.cfg.tera");
pub const MODSECURITY_TEMPLATE: &str = include_str!("../templates/spoe-modsecurity.conf.tera");
pub const MAP_TEMPLATE: &str = include_str!("../templates/map.tera");

/// Where a template's text comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TemplateSource {
    Embedded(&'static str),
    File(PathBuf),
}

impl TemplateSource {
    fn load(&self) -> Result<String, RenderError> {
        match self {
            TemplateSource::Embedded(text) => Ok((*text).to_string()),
            TemplateSource::File(path) => {
                std::fs::read_to_string(path).map_err(|e| io_err(path, e))
            }
        }
    }
}

/// One registered template.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TemplateEntry {
    pub name: String,
    /// Rendered file; `None` for templates rendered once per item.
    pub output: Option<PathBuf>,
    /// Number of previous generations to keep as `<output>.1..N`.
    pub max_old_files: usize,
    /// Initial capacity of the render buffer.
    pub size_hint: usize,
}

// ---------------------------------------------------------------------------
// TemplateSet
// ---------------------------------------------------------------------------

/// Ordered collection of parsed templates.
#[derive(Default)]
pub struct TemplateSet {
    tera: Tera,
    entries: Vec<TemplateEntry>,
}

impl TemplateSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Forget every registered template.
    pub fn clear_templates(&mut self) {
        self.tera = Tera::default();
        self.entries.clear();
    }

    /// Parse `source` and register it as `name`, replacing an earlier entry
    /// of the same name in place.
    pub fn new_template(
        &mut self,
        name: &str,
        source: &TemplateSource,
        output: Option<PathBuf>,
        max_old_files: usize,
        size_hint: usize,
    ) -> Result<(), RenderError> {
        let text = source.load()?;
        self.tera
            .add_raw_template(name, &text)
            .map_err(|source| RenderError::Parse {
                name: name.to_string(),
                source,
            })?;

        let entry = TemplateEntry {
            name: name.to_string(),
            output,
            max_old_files,
            size_hint,
        };
        match self.entries.iter_mut().find(|e| e.name == name) {
            Some(existing) => *existing = entry,
            None => self.entries.push(entry),
        }
        Ok(())
    }

    /// Registered templates in registration order.
    pub fn entries(&self) -> &[TemplateEntry] {
        &self.entries
    }

    pub fn names(&self) -> Vec<&str> {
        self.entries.iter().map(|e| e.name.as_str()).collect()
    }

    pub fn entry(&self, name: &str) -> Option<&TemplateEntry> {
        self.entries.iter().find(|e| e.name == name)
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Render the template `name` with `ctx`.
    pub fn render(&self, name: &str, ctx: &tera::Context) -> Result<String, RenderError> {
        let entry = self.entry(name).ok_or_else(|| RenderError::UnknownTemplate {
            name: name.to_string(),
        })?;
        let mut buf = Vec::with_capacity(entry.size_hint);
        self.tera.render_to(name, ctx, &mut buf)?;
        String::from_utf8(buf).map_err(|source| RenderError::Utf8 {
            name: name.to_string(),
            source,
        })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
