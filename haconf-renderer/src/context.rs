//! Template context: the serializable rendering payload built from a [`Config`].

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use haconf_core::types::{Backend, BackendMaps, BackendMode, Frontend, MapFile};
use haconf_core::Config;

use crate::error::RenderError;

/// Unix socket the TLS passthrough listener forwards terminated traffic to.
pub const HTTPS_SOCKET: &str = "unix@/var/run/haproxy/_https_socket.sock";

/// Paths the templates need that are not part of the configuration itself.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderSettings {
    pub maps_dir: PathBuf,
    pub modsecurity_config: PathBuf,
    pub stats_socket: Option<PathBuf>,
}

/// Payload for the main proxy and modsecurity templates.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TemplateContext {
    pub global: GlobalCtx,
    pub frontends: FrontendsCtx,
    pub backends: Vec<BackendCtx>,
    pub default_backend: Option<String>,
    /// Certificate files of TLS hosts, sorted and deduplicated.
    pub certificates: Vec<String>,
    pub modsecurity: ModsecurityCtx,
    pub stats_socket: Option<String>,
    pub meta: MetaCtx,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GlobalCtx {
    pub max_conn: u32,
    pub timeout_connect: String,
    pub timeout_client: String,
    pub timeout_server: String,
    pub bind_http: String,
    pub bind_https: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FrontendCtx {
    pub name: String,
    pub bind: String,
    /// Host map path; `None` when the frontend routes nothing.
    pub map_file: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FrontendsCtx {
    pub http: FrontendCtx,
    pub https: FrontendCtx,
    pub passthrough_map: Option<String>,
    pub redirect_map: Option<String>,
    pub https_socket: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackendCtx {
    pub id: String,
    pub mode: String,
    pub balance: String,
    /// Path id map consulted by HTTP backends that routes point at.
    pub paths_map: Option<String>,
    pub servers: Vec<ServerCtx>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerCtx {
    pub name: String,
    pub address: String,
    pub port: u16,
    pub weight: u32,
    pub enabled: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModsecurityCtx {
    pub agents: Vec<String>,
    pub config_file: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetaCtx {
    pub version: String,
}

/// Payload for one map file.
#[derive(Debug, Clone, Serialize)]
pub struct MapContext<'a> {
    pub name: &'a str,
    pub entries: &'a [haconf_core::types::MapEntry],
    pub version: &'static str,
}

/// Where a map named `name` lives under `maps_dir`.
pub fn map_path(maps_dir: &Path, name: &str) -> PathBuf {
    maps_dir.join(format!("{name}.map"))
}

impl TemplateContext {
    /// Build a [`TemplateContext`] from a built [`Config`].
    ///
    /// A config whose build phases have not run renders with empty frontends.
    pub fn from_config(config: &Config, settings: &RenderSettings) -> Self {
        let global = config.global();
        let maps_dir = settings.maps_dir.as_path();
        let group = config.frontend_group();

        let passthrough_map = group.and_then(|g| map_ref(maps_dir, &g.passthrough));
        let https_bind = if passthrough_map.is_some() {
            format!("{HTTPS_SOCKET} accept-proxy")
        } else {
            global.bind_https.clone()
        };

        let frontends = FrontendsCtx {
            http: frontend_ctx(
                maps_dir,
                group.map(|g| &g.http),
                haconf_core::config::HTTP_FRONTEND,
                &global.bind_http,
            ),
            https: FrontendCtx {
                bind: https_bind,
                ..frontend_ctx(
                    maps_dir,
                    group.map(|g| &g.https),
                    haconf_core::config::HTTPS_FRONTEND,
                    &global.bind_https,
                )
            },
            passthrough_map,
            redirect_map: group.and_then(|g| map_ref(maps_dir, &g.redirect)),
            https_socket: HTTPS_SOCKET.to_string(),
        };

        let mut certificates: Vec<String> = config
            .hosts()
            .iter()
            .filter(|h| !h.ssl_passthrough)
            .filter_map(|h| h.tls.as_ref())
            .map(|tls| tls.cert_file.display().to_string())
            .collect();
        certificates.sort();
        certificates.dedup();

        TemplateContext {
            global: GlobalCtx {
                max_conn: global.max_conn,
                timeout_connect: global.timeout_connect.clone(),
                timeout_client: global.timeout_client.clone(),
                timeout_server: global.timeout_server.clone(),
                bind_http: global.bind_http.clone(),
                bind_https: global.bind_https.clone(),
            },
            frontends,
            backends: config
                .backends()
                .iter()
                .map(|b| backend_ctx(b, maps_dir, config.backend_maps()))
                .collect(),
            default_backend: config.default_backend().map(|id| id.0.clone()),
            certificates,
            modsecurity: ModsecurityCtx {
                agents: global.modsecurity_endpoints.clone(),
                config_file: settings.modsecurity_config.display().to_string(),
            },
            stats_socket: settings
                .stats_socket
                .as_ref()
                .map(|p| p.display().to_string()),
            meta: MetaCtx {
                version: env!("CARGO_PKG_VERSION").to_string(),
            },
        }
    }

    /// Convert to a [`tera::Context`] for rendering.
    pub fn to_tera_context(&self) -> Result<tera::Context, RenderError> {
        tera::Context::from_serialize(self).map_err(RenderError::from)
    }
}

impl<'a> MapContext<'a> {
    pub fn new(map: &'a MapFile) -> Self {
        MapContext {
            name: &map.name,
            entries: &map.entries,
            version: env!("CARGO_PKG_VERSION"),
        }
    }

    pub fn to_tera_context(&self) -> Result<tera::Context, RenderError> {
        tera::Context::from_serialize(self).map_err(RenderError::from)
    }
}

fn map_ref(maps_dir: &Path, map: &MapFile) -> Option<String> {
    if map.is_empty() {
        None
    } else {
        Some(map_path(maps_dir, &map.name).display().to_string())
    }
}

fn frontend_ctx(
    maps_dir: &Path,
    frontend: Option<&Frontend>,
    default_name: &str,
    default_bind: &str,
) -> FrontendCtx {
    match frontend {
        Some(f) => FrontendCtx {
            name: f.name.clone(),
            bind: f.bind.clone(),
            map_file: map_ref(maps_dir, &f.host_map),
        },
        None => FrontendCtx {
            name: default_name.to_string(),
            bind: default_bind.to_string(),
            map_file: None,
        },
    }
}

fn backend_ctx(backend: &Backend, maps_dir: &Path, maps: Option<&BackendMaps>) -> BackendCtx {
    let paths_map = match backend.mode {
        BackendMode::Http => maps
            .and_then(|m| m.paths_of(&backend.id))
            .and_then(|m| map_ref(maps_dir, m)),
        BackendMode::Tcp => None,
    };
    BackendCtx {
        id: backend.id.0.clone(),
        mode: backend.mode.to_string(),
        balance: backend.balance.clone(),
        paths_map,
        servers: backend
            .endpoints
            .iter()
            .map(|e| ServerCtx {
                name: e.name.clone(),
                address: e.ip.clone(),
                port: e.port,
                weight: e.weight,
                enabled: e.enabled,
            })
            .collect(),
    }
}
