//! Instance options, loaded from `haconf.yaml`.
//!
//! Every field has a default so an empty (or missing, via
//! [`InstanceOptions::load_or_default`]) file yields a usable dry-run setup:
//! no validate or reload command, no runtime socket.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use haconf_renderer::{TemplateLayout, TemplateSource};

use crate::error::OptionsError;

/// Default file name looked up when `--config` is not given.
pub const DEFAULT_OPTIONS_FILE: &str = "haconf.yaml";

/// Optional template overrides; `None` uses the embedded default.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct TemplatePaths {
    pub haproxy: Option<PathBuf>,
    pub modsecurity: Option<PathBuf>,
    pub map: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct InstanceOptions {
    /// Desired-state YAML the daemon watches.
    pub state_file: PathBuf,
    pub config_file: PathBuf,
    pub config_dir: PathBuf,
    pub maps_dir: PathBuf,
    pub templates: TemplatePaths,
    /// Previous `config_file` generations kept as `<config_file>.1..N`; 0 keeps none.
    pub max_old_config_files: usize,
    /// Binary used for `-c -f <config_file>`; unset skips validation.
    pub haproxy_cmd: Option<PathBuf>,
    /// Called as `<reload_cmd> <reload_strategy> <config_file>`; unset skips reloads.
    pub reload_cmd: Option<PathBuf>,
    pub reload_strategy: String,
    pub sort_backends: bool,
    /// Validate the written file after a live update.
    pub validate_config: bool,
    /// Proxy runtime API socket; unset disables live updates.
    pub runtime_socket: Option<PathBuf>,
    /// Empty server slots are padded to a multiple of this on every reload.
    pub backend_server_slots_increment: usize,
    /// Directory of the daemon control socket.
    pub run_dir: PathBuf,
    pub resync_interval_secs: Option<u64>,
}

impl Default for InstanceOptions {
    fn default() -> Self {
        Self {
            state_file: PathBuf::from("haconf-state.yaml"),
            config_file: PathBuf::from("/etc/haproxy/haproxy.cfg"),
            config_dir: PathBuf::from("/etc/haproxy"),
            maps_dir: PathBuf::from("/etc/haproxy/maps"),
            templates: TemplatePaths::default(),
            max_old_config_files: 0,
            haproxy_cmd: None,
            reload_cmd: None,
            reload_strategy: "native".to_string(),
            sort_backends: false,
            validate_config: false,
            runtime_socket: None,
            backend_server_slots_increment: 32,
            run_dir: PathBuf::from("/var/run/haconf"),
            resync_interval_secs: None,
        }
    }
}

impl InstanceOptions {
    /// Load options from `path`.
    pub fn load_at(path: &Path) -> Result<Self, OptionsError> {
        let raw = match std::fs::read_to_string(path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Err(OptionsError::NotFound {
                    path: path.to_path_buf(),
                })
            }
            Err(source) => {
                return Err(OptionsError::Io {
                    path: path.to_path_buf(),
                    source,
                })
            }
        };
        if raw.trim().is_empty() {
            return Ok(Self::default());
        }
        serde_yaml::from_str(&raw).map_err(|source| OptionsError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Load `path` when given; otherwise `haconf.yaml` in the working
    /// directory if it exists, else defaults.
    pub fn load_or_default(path: Option<&Path>) -> Result<Self, OptionsError> {
        match path {
            Some(path) => Self::load_at(path),
            None => match Self::load_at(Path::new(DEFAULT_OPTIONS_FILE)) {
                Err(OptionsError::NotFound { .. }) => Ok(Self::default()),
                other => other,
            },
        }
    }

    pub fn template_layout(&self) -> TemplateLayout {
        let mut layout = TemplateLayout::embedded(
            self.config_file.clone(),
            self.config_dir.clone(),
            self.maps_dir.clone(),
        );
        if let Some(path) = &self.templates.haproxy {
            layout.haproxy_template = TemplateSource::File(path.clone());
        }
        if let Some(path) = &self.templates.modsecurity {
            layout.modsecurity_template = TemplateSource::File(path.clone());
        }
        if let Some(path) = &self.templates.map {
            layout.map_template = TemplateSource::File(path.clone());
        }
        layout.max_old_config_files = self.max_old_config_files;
        layout.stats_socket = self.runtime_socket.clone();
        layout
    }

    /// Daemon control socket path.
    pub fn socket_path(&self) -> PathBuf {
        self.run_dir.join("haconf.sock")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn partial_file_keeps_defaults() {
        let dir = TempDir::new().expect("tempdir");
        let path = dir.path().join("haconf.yaml");
        std::fs::write(
            &path,
            "config_file: /tmp/h.cfg\nreload_cmd: /usr/local/bin/reload\nmax_old_config_files: 3\n",
        )
        .expect("write");

        let opts = InstanceOptions::load_at(&path).expect("load");
        assert_eq!(opts.config_file, PathBuf::from("/tmp/h.cfg"));
        assert_eq!(opts.reload_cmd, Some(PathBuf::from("/usr/local/bin/reload")));
        assert_eq!(opts.max_old_config_files, 3);
        assert_eq!(opts.reload_strategy, "native");
        assert!(opts.haproxy_cmd.is_none());
    }

    #[test]
    fn empty_file_is_default() {
        let dir = TempDir::new().expect("tempdir");
        let path = dir.path().join("haconf.yaml");
        std::fs::write(&path, "\n").expect("write");
        assert_eq!(
            InstanceOptions::load_at(&path).expect("load"),
            InstanceOptions::default()
        );
    }

    #[test]
    fn missing_file_is_not_found() {
        let dir = TempDir::new().expect("tempdir");
        let err = InstanceOptions::load_at(&dir.path().join("nope.yaml")).unwrap_err();
        assert!(matches!(err, OptionsError::NotFound { .. }));
    }

    #[test]
    fn bad_yaml_reports_path() {
        let dir = TempDir::new().expect("tempdir");
        let path = dir.path().join("haconf.yaml");
        std::fs::write(&path, "max_old_config_files: [oops\n").expect("write");
        let err = InstanceOptions::load_at(&path).unwrap_err();
        assert!(matches!(err, OptionsError::Parse { .. }));
        assert!(err.to_string().contains("haconf.yaml"));
    }

    #[test]
    fn template_overrides_flow_into_layout() {
        let opts = InstanceOptions {
            templates: TemplatePaths {
                haproxy: Some(PathBuf::from("/t/haproxy.tera")),
                ..TemplatePaths::default()
            },
            runtime_socket: Some(PathBuf::from("/run/haproxy.sock")),
            ..InstanceOptions::default()
        };
        let layout = opts.template_layout();
        assert_eq!(
            layout.haproxy_template,
            TemplateSource::File(PathBuf::from("/t/haproxy.tera"))
        );
        assert!(matches!(layout.map_template, TemplateSource::Embedded(_)));
        assert_eq!(layout.stats_socket, Some(PathBuf::from("/run/haproxy.sock")));
    }
}
