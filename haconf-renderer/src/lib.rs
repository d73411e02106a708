//! # haconf-renderer
//!
//! Tera-based rendering of a proxy configuration generation into the main
//! proxy file, the modsecurity SPOE file and one file per map.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use std::path::PathBuf;
//! use haconf_core::Config;
//! use haconf_renderer::{TemplateLayout, TemplateWriter};
//!
//! fn write(config: &Config) -> Result<(), haconf_renderer::RenderError> {
//!     let layout = TemplateLayout::embedded(
//!         PathBuf::from("/etc/haproxy/haproxy.cfg"),
//!         PathBuf::from("/etc/haproxy"),
//!         PathBuf::from("/etc/haproxy/maps"),
//!     );
//!     let mut writer = TemplateWriter::new(layout);
//!     writer.parse_templates()?;
//!     for result in writer.write(config)? {
//!         println!("{}", result.path().display());
//!     }
//!     Ok(())
//! }
//! ```

pub mod context;
pub mod diff;
pub mod engine;
pub mod error;
pub mod writer;

pub use context::{RenderSettings, TemplateContext};
pub use diff::FileDiff;
pub use engine::{TemplateEntry, TemplateSet, TemplateSource};
pub use error::RenderError;
pub use writer::{atomic_write, Artifact, TemplateLayout, TemplateWriter, WriteResult};
