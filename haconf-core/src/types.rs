//! Domain types for a proxy configuration generation.
//!
//! [`DesiredState`] is what callers describe (usually loaded from YAML); the
//! `FrontendGroup` / `BackendMaps` types are produced by the build phases on
//! [`crate::Config`]. Everything derives `PartialEq` so two generations can be
//! compared structurally.

use std::collections::HashSet;
use std::fmt;
use std::net::IpAddr;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Target used by disabled placeholder servers.
pub const EMPTY_SLOT_IP: &str = "127.0.0.1";
/// Port used by disabled placeholder servers.
pub const EMPTY_SLOT_PORT: u16 = 1023;

// ---------------------------------------------------------------------------
// Newtypes
// ---------------------------------------------------------------------------

/// A strongly-typed backend identifier, e.g. `default_echo_8080`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct BackendId(pub String);

impl fmt::Display for BackendId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<String> for BackendId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for BackendId {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

// ---------------------------------------------------------------------------
// Enums
// ---------------------------------------------------------------------------

/// Proxy mode of a backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum BackendMode {
    #[default]
    Http,
    Tcp,
}

impl fmt::Display for BackendMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BackendMode::Http => write!(f, "http"),
            BackendMode::Tcp => write!(f, "tcp"),
        }
    }
}

// ---------------------------------------------------------------------------
// Desired state
// ---------------------------------------------------------------------------

/// Process-wide settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Global {
    pub max_conn: u32,
    pub timeout_connect: String,
    pub timeout_client: String,
    pub timeout_server: String,
    /// Redirect plain HTTP requests of TLS hosts to HTTPS.
    pub ssl_redirect: bool,
    pub bind_http: String,
    pub bind_https: String,
    /// `host:port` of ModSecurity SPOE agents; empty disables the filter.
    pub modsecurity_endpoints: Vec<String>,
}

impl Default for Global {
    fn default() -> Self {
        Self {
            max_conn: 2000,
            timeout_connect: "5s".to_string(),
            timeout_client: "50s".to_string(),
            timeout_server: "50s".to_string(),
            ssl_redirect: true,
            bind_http: ":80".to_string(),
            bind_https: ":443".to_string(),
            modsecurity_endpoints: Vec::new(),
        }
    }
}

/// A single server of a backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Endpoint {
    /// Server name inside the backend. Assigned by `Config::from_state` when empty.
    #[serde(default)]
    pub name: String,
    pub ip: String,
    pub port: u16,
    #[serde(default = "default_weight")]
    pub weight: u32,
    /// `false` marks a placeholder slot that can be filled at runtime.
    #[serde(default = "default_true")]
    pub enabled: bool,
}

impl Endpoint {
    /// Disabled placeholder server used for live scale-ups.
    pub fn empty_slot(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ip: EMPTY_SLOT_IP.to_string(),
            port: EMPTY_SLOT_PORT,
            weight: 0,
            enabled: false,
        }
    }

    /// `ip:port` of this server.
    pub fn target(&self) -> String {
        format!("{}:{}", self.ip, self.port)
    }

    pub fn is_empty_slot(&self) -> bool {
        !self.enabled
    }
}

/// A backend and its servers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Backend {
    pub id: BackendId,
    #[serde(default)]
    pub mode: BackendMode,
    #[serde(default = "default_balance")]
    pub balance: String,
    #[serde(default)]
    pub endpoints: Vec<Endpoint>,
}

impl Backend {
    pub fn new(id: impl Into<BackendId>) -> Self {
        Self {
            id: id.into(),
            mode: BackendMode::default(),
            balance: default_balance(),
            endpoints: Vec::new(),
        }
    }

    /// Order servers by address, then port, then name.
    pub fn sort_endpoints(&mut self) {
        self.endpoints.sort_by(|a, b| {
            let ka = (a.ip.parse::<IpAddr>().ok(), &a.ip, a.port, &a.name);
            let kb = (b.ip.parse::<IpAddr>().ok(), &b.ip, b.port, &b.name);
            ka.cmp(&kb)
        });
    }

    /// True when everything except the server list matches.
    pub fn same_settings(&self, other: &Backend) -> bool {
        self.id == other.id && self.mode == other.mode && self.balance == other.balance
    }

    /// First `srvNNN` name not used by any server of this backend.
    pub fn next_server_name(&self) -> String {
        let used: HashSet<&str> = self.endpoints.iter().map(|e| e.name.as_str()).collect();
        (1..)
            .map(|n| format!("srv{n:03}"))
            .find(|name| !used.contains(name.as_str()))
            .unwrap_or_default()
    }

    /// Pad the server list with empty slots up to the next multiple of
    /// `increment`. A backend with no servers receives one full increment.
    pub fn fill_empty_slots(&mut self, increment: usize) {
        if increment == 0 {
            return;
        }
        let total = self.endpoints.len();
        let target = if total == 0 {
            increment
        } else {
            total.div_ceil(increment) * increment
        };
        while self.endpoints.len() < target {
            let name = self.next_server_name();
            self.endpoints.push(Endpoint::empty_slot(name));
        }
    }

    pub fn enabled_endpoints(&self) -> impl Iterator<Item = &Endpoint> {
        self.endpoints.iter().filter(|e| e.enabled)
    }
}

/// TLS settings of a host.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostTls {
    pub cert_file: PathBuf,
}

/// One routed path of a host.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostPath {
    pub path: String,
    pub backend: BackendId,
}

/// A virtual host.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Host {
    pub hostname: String,
    #[serde(default)]
    pub paths: Vec<HostPath>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tls: Option<HostTls>,
    /// Route raw TLS by SNI to the backend of `/` without terminating it.
    #[serde(default)]
    pub ssl_passthrough: bool,
}

/// Everything a caller wants the proxy to serve.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct DesiredState {
    #[serde(default)]
    pub global: Global,
    #[serde(default)]
    pub hosts: Vec<Host>,
    #[serde(default)]
    pub backends: Vec<Backend>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_backend: Option<BackendId>,
}

// ---------------------------------------------------------------------------
// Build artifacts
// ---------------------------------------------------------------------------

/// One `key value` line of a proxy map file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MapEntry {
    pub key: String,
    pub value: String,
}

/// A named map file; written as `<maps_dir>/<name>.map`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MapFile {
    pub name: String,
    pub entries: Vec<MapEntry>,
}

impl MapFile {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            entries: Vec::new(),
        }
    }

    pub fn push(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.entries.push(MapEntry {
            key: key.into(),
            value: value.into(),
        });
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// A listening frontend and its host routing map.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Frontend {
    pub name: String,
    pub bind: String,
    pub host_map: MapFile,
}

/// Result of `Config::build_frontend_group`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FrontendGroup {
    pub http: Frontend,
    pub https: Frontend,
    /// SNI → backend for passthrough hosts.
    pub passthrough: MapFile,
    /// Hosts whose plain HTTP requests are redirected to HTTPS.
    pub redirect: MapFile,
}

/// Result of `Config::build_backend_maps`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct BackendMaps {
    pub maps: Vec<MapFile>,
}

impl BackendMaps {
    /// Path map of backend `id`; `None` when no route points at it.
    pub fn paths_of(&self, id: &BackendId) -> Option<&MapFile> {
        let name = paths_map_name(id);
        self.maps.iter().find(|m| m.name == name)
    }
}

/// Name of the map that tags requests routed to `id` with a path id.
pub fn paths_map_name(id: &BackendId) -> String {
    format!("{id}_paths")
}

fn default_weight() -> u32 {
    1
}

fn default_true() -> bool {
    true
}

fn default_balance() -> String {
    "roundrobin".to_string()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn ep(name: &str, ip: &str, port: u16) -> Endpoint {
        Endpoint {
            name: name.to_string(),
            ip: ip.to_string(),
            port,
            weight: 1,
            enabled: true,
        }
    }

    #[test]
    fn backend_id_display() {
        assert_eq!(BackendId::from("default_echo_8080").to_string(), "default_echo_8080");
    }

    #[test]
    fn sort_endpoints_orders_by_numeric_address() {
        let mut backend = Backend::new("b");
        backend.endpoints = vec![
            ep("srv001", "10.0.0.10", 8080),
            ep("srv002", "10.0.0.9", 8080),
            ep("srv003", "10.0.0.9", 80),
        ];
        backend.sort_endpoints();
        let names: Vec<_> = backend.endpoints.iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names, ["srv003", "srv002", "srv001"]);
    }

    #[test]
    fn fill_empty_slots_rounds_up_to_increment() {
        let mut backend = Backend::new("b");
        backend.endpoints = vec![ep("srv001", "10.0.0.1", 80), ep("srv002", "10.0.0.2", 80)];
        backend.fill_empty_slots(5);
        assert_eq!(backend.endpoints.len(), 5);
        assert_eq!(backend.endpoints[2].name, "srv003");
        assert!(backend.endpoints[4].is_empty_slot());
        assert_eq!(backend.endpoints[4].target(), "127.0.0.1:1023");
    }

    #[test]
    fn fill_empty_slots_keeps_exact_multiple_and_skips_zero() {
        let mut backend = Backend::new("b");
        backend.endpoints = vec![ep("srv001", "10.0.0.1", 80), ep("srv002", "10.0.0.2", 80)];
        backend.fill_empty_slots(2);
        assert_eq!(backend.endpoints.len(), 2);
        backend.fill_empty_slots(0);
        assert_eq!(backend.endpoints.len(), 2);

        let mut empty = Backend::new("e");
        empty.fill_empty_slots(3);
        assert_eq!(empty.endpoints.len(), 3);
    }

    #[test]
    fn next_server_name_skips_used_names() {
        let mut backend = Backend::new("b");
        backend.endpoints = vec![ep("srv001", "10.0.0.1", 80), ep("srv003", "10.0.0.3", 80)];
        assert_eq!(backend.next_server_name(), "srv002");
    }

    #[test]
    fn desired_state_yaml_defaults() {
        let yaml = r#"
hosts:
  - hostname: echo.local
    paths:
      - path: /
        backend: default_echo_8080
backends:
  - id: default_echo_8080
    endpoints:
      - ip: 10.0.0.1
        port: 8080
"#;
        let state: DesiredState = serde_yaml::from_str(yaml).expect("parse");
        assert_eq!(state.global, Global::default());
        let backend = &state.backends[0];
        assert_eq!(backend.mode, BackendMode::Http);
        assert_eq!(backend.balance, "roundrobin");
        assert_eq!(backend.endpoints[0].weight, 1);
        assert!(backend.endpoints[0].enabled);
        assert!(backend.endpoints[0].name.is_empty());
    }
}
