//! A configuration generation and its build phases.
//!
//! A [`Config`] is filled from a [`DesiredState`], then built in two phases:
//!
//! 1. [`Config::build_frontend_group`] — validates hosts and produces the
//!    frontend host maps, SNI passthrough map and HTTPS redirect list.
//! 2. [`Config::build_backend_maps`] — validates backends/servers, resolves
//!    every route to an existing backend and produces per-backend path maps.
//!
//! Either phase can fail on its own; a failed phase leaves its artifact unset.

use std::collections::{BTreeMap, HashSet};
use std::net::IpAddr;

use crate::error::BuildError;
use crate::types::{
    paths_map_name, Backend, BackendId, BackendMaps, DesiredState, Frontend, FrontendGroup,
    Global, Host, HostPath, MapFile,
};

pub const HTTP_FRONTEND: &str = "_front_http";
pub const HTTPS_FRONTEND: &str = "_front_https";

/// One generation of proxy configuration.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Config {
    state: DesiredState,
    frontend_group: Option<FrontendGroup>,
    backend_maps: Option<BackendMaps>,
}

impl Config {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wrap a desired state, naming every unnamed server `srvNNN`.
    pub fn from_state(mut state: DesiredState) -> Self {
        for backend in &mut state.backends {
            for i in 0..backend.endpoints.len() {
                if backend.endpoints[i].name.is_empty() {
                    let name = backend.next_server_name();
                    backend.endpoints[i].name = name;
                }
            }
        }
        Self {
            state,
            frontend_group: None,
            backend_maps: None,
        }
    }

    pub fn state(&self) -> &DesiredState {
        &self.state
    }

    pub fn global(&self) -> &Global {
        &self.state.global
    }

    pub fn global_mut(&mut self) -> &mut Global {
        &mut self.state.global
    }

    pub fn hosts(&self) -> &[Host] {
        &self.state.hosts
    }

    pub fn backends(&self) -> &[Backend] {
        &self.state.backends
    }

    pub fn backends_mut(&mut self) -> &mut [Backend] {
        &mut self.state.backends
    }

    pub fn backend(&self, id: &BackendId) -> Option<&Backend> {
        self.state.backends.iter().find(|b| &b.id == id)
    }

    pub fn backend_mut(&mut self, id: &BackendId) -> Option<&mut Backend> {
        self.state.backends.iter_mut().find(|b| &b.id == id)
    }

    /// Return the backend `id`, creating an empty one if needed.
    pub fn acquire_backend(&mut self, id: impl Into<BackendId>) -> &mut Backend {
        let id = id.into();
        match self.state.backends.iter().position(|b| b.id == id) {
            Some(idx) => &mut self.state.backends[idx],
            None => {
                self.state.backends.push(Backend::new(id));
                let last = self.state.backends.len() - 1;
                &mut self.state.backends[last]
            }
        }
    }

    /// Return the host `hostname`, creating an empty one if needed.
    pub fn acquire_host(&mut self, hostname: &str) -> &mut Host {
        match self.state.hosts.iter().position(|h| h.hostname == hostname) {
            Some(idx) => &mut self.state.hosts[idx],
            None => {
                self.state.hosts.push(Host {
                    hostname: hostname.to_string(),
                    paths: Vec::new(),
                    tls: None,
                    ssl_passthrough: false,
                });
                let last = self.state.hosts.len() - 1;
                &mut self.state.hosts[last]
            }
        }
    }

    pub fn default_backend(&self) -> Option<&BackendId> {
        self.state.default_backend.as_ref()
    }

    pub fn set_default_backend(&mut self, id: Option<BackendId>) {
        self.state.default_backend = id;
    }

    pub fn frontend_group(&self) -> Option<&FrontendGroup> {
        self.frontend_group.as_ref()
    }

    pub fn backend_maps(&self) -> Option<&BackendMaps> {
        self.backend_maps.as_ref()
    }

    /// Every map file produced by the build phases, frontend maps first.
    pub fn maps(&self) -> Vec<&MapFile> {
        let mut maps = Vec::new();
        if let Some(group) = &self.frontend_group {
            maps.push(&group.http.host_map);
            maps.push(&group.https.host_map);
            maps.push(&group.passthrough);
            maps.push(&group.redirect);
        }
        if let Some(backend_maps) = &self.backend_maps {
            maps.extend(backend_maps.maps.iter());
        }
        maps
    }

    // -----------------------------------------------------------------------
    // Build phases
    // -----------------------------------------------------------------------

    /// Group hosts into the HTTP / HTTPS frontends.
    pub fn build_frontend_group(&mut self) -> Result<(), BuildError> {
        self.frontend_group = None;
        let global = &self.state.global;

        let mut http = Frontend {
            name: HTTP_FRONTEND.to_string(),
            bind: global.bind_http.clone(),
            host_map: MapFile::new(format!("{HTTP_FRONTEND}_host")),
        };
        let mut https = Frontend {
            name: HTTPS_FRONTEND.to_string(),
            bind: global.bind_https.clone(),
            host_map: MapFile::new(format!("{HTTPS_FRONTEND}_host")),
        };
        let mut passthrough = MapFile::new("_front_sni_passthrough");
        let mut redirect = MapFile::new("_front_redirect_https");

        let mut seen = HashSet::new();
        for host in sorted_hosts(&self.state.hosts) {
            if host.hostname.trim().is_empty() {
                return Err(BuildError::EmptyHostname);
            }
            check_name("hostname", &host.hostname)?;
            if !seen.insert(host.hostname.as_str()) {
                return Err(BuildError::DuplicateHost {
                    host: host.hostname.clone(),
                });
            }
            let paths = sorted_paths(host)?;
            for path in &paths {
                if let Some(reason) = unsafe_token(&path.path) {
                    return Err(BuildError::InvalidName {
                        kind: "path",
                        name: format!("{}{}", host.hostname, path.path),
                        reason,
                    });
                }
            }

            if host.ssl_passthrough {
                if paths.iter().any(|p| p.path != "/") {
                    return Err(BuildError::PassthroughWithPaths {
                        host: host.hostname.clone(),
                    });
                }
                if let Some(root) = paths.first() {
                    passthrough.push(&host.hostname, root.backend.0.as_str());
                }
                continue;
            }

            let redirect_host = host.tls.is_some() && global.ssl_redirect;
            for path in paths {
                let key = format!("{}{}", host.hostname, path.path);
                if host.tls.is_some() {
                    https.host_map.push(key.clone(), path.backend.0.as_str());
                }
                if !redirect_host {
                    http.host_map.push(key, path.backend.0.as_str());
                }
            }
            if redirect_host {
                redirect.push(&host.hostname, "https");
            }
        }

        self.frontend_group = Some(FrontendGroup {
            http,
            https,
            passthrough,
            redirect,
        });
        Ok(())
    }

    /// Validate backends and build one path map per routed backend.
    pub fn build_backend_maps(&mut self) -> Result<(), BuildError> {
        self.backend_maps = None;

        let mut ids = HashSet::new();
        for backend in &self.state.backends {
            check_name("backend id", &backend.id.0)?;
            if !ids.insert(&backend.id) {
                return Err(BuildError::DuplicateBackend {
                    backend: backend.id.clone(),
                });
            }
            validate_endpoints(backend)?;
        }

        if let Some(default) = &self.state.default_backend {
            if !ids.contains(default) {
                return Err(BuildError::UnknownDefaultBackend {
                    backend: default.clone(),
                });
            }
        }

        let mut maps: BTreeMap<&BackendId, MapFile> = BTreeMap::new();
        for host in sorted_hosts(&self.state.hosts) {
            for path in sorted_paths(host)? {
                if !ids.contains(&path.backend) {
                    return Err(BuildError::UnknownBackend {
                        backend: path.backend.clone(),
                        host: host.hostname.clone(),
                        path: path.path.clone(),
                    });
                }
                let map = maps
                    .entry(&path.backend)
                    .or_insert_with(|| MapFile::new(paths_map_name(&path.backend)));
                let path_id = format!("path{:02}", map.entries.len() + 1);
                map.push(format!("{}{}", host.hostname, path.path), path_id);
            }
        }

        self.backend_maps = Some(BackendMaps {
            maps: maps.into_values().collect(),
        });
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Comparison
    // -----------------------------------------------------------------------

    /// Equality against a previous generation as the running proxy sees it.
    /// `None` never matches.
    ///
    /// Backends compare by their enabled servers as an `ip:port`/weight set,
    /// so server names, list order and empty slots left by padding or live
    /// updates do not count as differences.
    pub fn equals(&self, other: Option<&Config>) -> bool {
        let Some(other) = other else {
            return false;
        };
        self.same_routing(other)
            && self.state.backends.len() == other.state.backends.len()
            && self.state.backends.iter().all(|backend| {
                other.backend(&backend.id).is_some_and(|previous| {
                    backend.same_settings(previous) && live_servers(backend) == live_servers(previous)
                })
            })
    }

    /// Take over the server lists of `other`, which [`Config::equals`] this
    /// generation. Keeps slot names and padding of the running process.
    pub fn adopt_server_layout(&mut self, other: &Config) {
        self.state.backends = other.state.backends.clone();
    }

    /// True when everything except backend server lists matches `other`.
    pub fn same_routing(&self, other: &Config) -> bool {
        self.state.global == other.state.global
            && self.state.hosts == other.state.hosts
            && self.state.default_backend == other.state.default_backend
            && self.frontend_group == other.frontend_group
            && self.backend_maps == other.backend_maps
    }
}

fn live_servers(backend: &Backend) -> Vec<(&str, u16, u32)> {
    let mut servers: Vec<_> = backend
        .enabled_endpoints()
        .map(|e| (e.ip.as_str(), e.port, e.weight))
        .collect();
    servers.sort_unstable();
    servers
}

/// Reason `token` cannot appear in a map line, server line or file name.
fn unsafe_token(token: &str) -> Option<&'static str> {
    if token.chars().any(char::is_whitespace) {
        Some("contains whitespace")
    } else if token.chars().any(char::is_control) {
        Some("contains a control character")
    } else {
        None
    }
}

/// Names end up as file names under the maps directory and as runtime
/// command arguments.
fn check_name(kind: &'static str, name: &str) -> Result<(), BuildError> {
    let reason = if name.is_empty() {
        Some("is empty")
    } else if name.contains('/') {
        Some("contains '/'")
    } else if name.contains("..") {
        Some("contains '..'")
    } else {
        unsafe_token(name)
    };
    match reason {
        Some(reason) => Err(BuildError::InvalidName {
            kind,
            name: name.to_string(),
            reason,
        }),
        None => Ok(()),
    }
}

fn sorted_hosts(hosts: &[Host]) -> Vec<&Host> {
    let mut sorted: Vec<&Host> = hosts.iter().collect();
    sorted.sort_by(|a, b| a.hostname.cmp(&b.hostname));
    sorted
}

/// Paths of `host`, longest first, rejecting duplicates.
fn sorted_paths(host: &Host) -> Result<Vec<&HostPath>, BuildError> {
    let mut seen = HashSet::new();
    for path in &host.paths {
        if !seen.insert(path.path.as_str()) {
            return Err(BuildError::DuplicatePath {
                host: host.hostname.clone(),
                path: path.path.clone(),
            });
        }
    }
    let mut sorted: Vec<&HostPath> = host.paths.iter().collect();
    sorted.sort_by(|a, b| b.path.len().cmp(&a.path.len()).then_with(|| a.path.cmp(&b.path)));
    Ok(sorted)
}

fn validate_endpoints(backend: &Backend) -> Result<(), BuildError> {
    let mut names = HashSet::new();
    for endpoint in &backend.endpoints {
        check_name("server name", &endpoint.name)?;
        if !names.insert(endpoint.name.as_str()) {
            return Err(BuildError::DuplicateEndpoint {
                backend: backend.id.clone(),
                endpoint: endpoint.name.clone(),
            });
        }
        if !endpoint.enabled {
            continue;
        }
        if endpoint.port == 0 {
            return Err(BuildError::InvalidEndpoint {
                backend: backend.id.clone(),
                endpoint: endpoint.name.clone(),
                reason: "port must be greater than zero".to_string(),
            });
        }
        if endpoint.ip.parse::<IpAddr>().is_err() {
            return Err(BuildError::InvalidEndpoint {
                backend: backend.id.clone(),
                endpoint: endpoint.name.clone(),
                reason: format!("'{}' is not an IP address", endpoint.ip),
            });
        }
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use rstest::rstest;

    use super::*;
    use crate::types::{Endpoint, HostTls};

    fn route(path: &str, backend: &str) -> HostPath {
        HostPath {
            path: path.to_string(),
            backend: BackendId::from(backend),
        }
    }

    fn endpoint(ip: &str, port: u16) -> Endpoint {
        Endpoint {
            name: String::new(),
            ip: ip.to_string(),
            port,
            weight: 1,
            enabled: true,
        }
    }

    fn sample_state() -> DesiredState {
        let mut echo = Backend::new("default_echo_8080");
        echo.endpoints = vec![endpoint("10.0.0.1", 8080), endpoint("10.0.0.2", 8080)];
        let api = Backend::new("default_api_80");
        DesiredState {
            hosts: vec![
                Host {
                    hostname: "echo.local".to_string(),
                    paths: vec![route("/", "default_echo_8080"), route("/api", "default_api_80")],
                    tls: None,
                    ssl_passthrough: false,
                },
                Host {
                    hostname: "secure.local".to_string(),
                    paths: vec![route("/", "default_echo_8080")],
                    tls: Some(HostTls {
                        cert_file: PathBuf::from("/etc/haproxy/ssl/secure.pem"),
                    }),
                    ssl_passthrough: false,
                },
            ],
            backends: vec![echo, api],
            ..DesiredState::default()
        }
    }

    fn built(state: DesiredState) -> Config {
        let mut config = Config::from_state(state);
        config.build_frontend_group().expect("frontend group");
        config.build_backend_maps().expect("backend maps");
        config
    }

    #[test]
    fn from_state_names_servers() {
        let config = Config::from_state(sample_state());
        let names: Vec<_> = config.backends()[0]
            .endpoints
            .iter()
            .map(|e| e.name.as_str())
            .collect();
        assert_eq!(names, ["srv001", "srv002"]);
    }

    #[test]
    fn frontend_group_routes_longest_path_first() {
        let config = built(sample_state());
        let group = config.frontend_group().expect("group");
        let keys: Vec<_> = group.http.host_map.entries.iter().map(|e| e.key.as_str()).collect();
        assert_eq!(keys, ["echo.local/api", "echo.local/"]);
    }

    #[test]
    fn tls_host_redirects_instead_of_plain_routing() {
        let config = built(sample_state());
        let group = config.frontend_group().expect("group");
        assert_eq!(group.https.host_map.entries.len(), 1);
        assert_eq!(group.https.host_map.entries[0].key, "secure.local/");
        assert_eq!(group.redirect.entries[0].key, "secure.local");
        assert!(group
            .http
            .host_map
            .entries
            .iter()
            .all(|e| !e.key.starts_with("secure.local")));
    }

    #[test]
    fn tls_host_without_redirect_is_served_on_both_frontends() {
        let mut state = sample_state();
        state.global.ssl_redirect = false;
        let config = built(state);
        let group = config.frontend_group().expect("group");
        assert!(group.redirect.is_empty());
        assert!(group.http.host_map.entries.iter().any(|e| e.key == "secure.local/"));
    }

    #[test]
    fn passthrough_host_goes_to_sni_map() {
        let mut state = sample_state();
        state.hosts.push(Host {
            hostname: "raw.local".to_string(),
            paths: vec![route("/", "default_echo_8080")],
            tls: None,
            ssl_passthrough: true,
        });
        let config = built(state);
        let group = config.frontend_group().expect("group");
        assert_eq!(group.passthrough.entries[0].key, "raw.local");
        assert_eq!(group.passthrough.entries[0].value, "default_echo_8080");
    }

    #[rstest]
    #[case::empty_hostname("", vec![route("/", "default_echo_8080")], false)]
    #[case::duplicate_path("dup.local", vec![route("/", "default_echo_8080"), route("/", "default_api_80")], false)]
    #[case::passthrough_subpath("raw.local", vec![route("/app", "default_echo_8080")], true)]
    fn frontend_group_rejects_invalid_hosts(
        #[case] hostname: &str,
        #[case] paths: Vec<HostPath>,
        #[case] passthrough: bool,
    ) {
        let mut state = sample_state();
        state.hosts.push(Host {
            hostname: hostname.to_string(),
            paths,
            tls: None,
            ssl_passthrough: passthrough,
        });
        let mut config = Config::from_state(state);
        assert!(config.build_frontend_group().is_err());
        assert!(config.frontend_group().is_none());
    }

    #[test]
    fn duplicate_host_is_rejected() {
        let mut state = sample_state();
        let copy = state.hosts[0].clone();
        state.hosts.push(copy);
        let mut config = Config::from_state(state);
        assert_eq!(
            config.build_frontend_group(),
            Err(BuildError::DuplicateHost {
                host: "echo.local".to_string()
            })
        );
    }

    #[test]
    fn backend_maps_resolve_routes() {
        let config = built(sample_state());
        let maps = config.backend_maps().expect("maps");
        let names: Vec<_> = maps.maps.iter().map(|m| m.name.as_str()).collect();
        assert_eq!(names, ["default_api_80_paths", "default_echo_8080_paths"]);
        let echo = &maps.maps[1];
        assert_eq!(echo.entries.len(), 2);
        assert_eq!(echo.entries[0].value, "path01");
        assert_eq!(
            maps.paths_of(&BackendId::from("default_echo_8080")).map(|m| m.name.as_str()),
            Some("default_echo_8080_paths")
        );
        assert!(maps.paths_of(&BackendId::from("unrouted")).is_none());
    }

    #[test]
    fn backend_maps_reject_unknown_backend() {
        let mut state = sample_state();
        state.hosts[0].paths.push(route("/missing", "nope"));
        let mut config = Config::from_state(state);
        config.build_frontend_group().expect("group");
        let err = config.build_backend_maps().unwrap_err();
        assert!(matches!(err, BuildError::UnknownBackend { .. }));
        assert!(err.to_string().contains("echo.local/missing"));
        assert!(config.backend_maps().is_none());
    }

    #[rstest]
    #[case::zero_port(endpoint("10.0.0.9", 0))]
    #[case::not_an_ip(endpoint("echo.svc", 8080))]
    fn backend_maps_reject_invalid_endpoints(#[case] bad: Endpoint) {
        let mut state = sample_state();
        state.backends[1].endpoints.push(bad);
        let mut config = Config::from_state(state);
        let err = config.build_backend_maps().unwrap_err();
        assert!(matches!(err, BuildError::InvalidEndpoint { .. }));
    }

    #[test]
    fn backend_maps_reject_unknown_default_backend() {
        let mut state = sample_state();
        state.default_backend = Some(BackendId::from("ghost"));
        let mut config = Config::from_state(state);
        assert!(matches!(
            config.build_backend_maps(),
            Err(BuildError::UnknownDefaultBackend { .. })
        ));
    }

    #[test]
    fn disabled_slots_skip_address_validation() {
        let mut state = sample_state();
        state.backends[1].fill_empty_slots(2);
        let mut config = Config::from_state(state);
        config.build_backend_maps().expect("slots are valid");
    }

    #[test]
    fn equals_requires_previous_generation() {
        let a = built(sample_state());
        let b = built(sample_state());
        assert!(a.equals(Some(&b)));
        assert!(!a.equals(None));
    }

    #[test]
    fn weight_change_keeps_routing_equal() {
        let a = built(sample_state());
        let mut b = built(sample_state());
        b.backends_mut()[0].endpoints[0].weight = 5;
        assert!(!a.equals(Some(&b)));
        assert!(a.same_routing(&b));
    }

    #[rstest]
    #[case::traversing_backend("backend id", "../../escaped")]
    #[case::slash_in_backend("backend id", "team/api")]
    #[case::space_in_backend("backend id", "default api")]
    #[case::space_in_server("server name", "srv 1")]
    #[case::newline_in_server("server name", "srv1\nset server x")]
    #[case::tab_in_hostname("hostname", "echo\t.local")]
    #[case::slash_in_hostname("hostname", "echo.local/x")]
    #[case::dotdot_hostname("hostname", "..")]
    fn build_rejects_unsafe_names(#[case] kind: &str, #[case] name: &str) {
        let mut state = sample_state();
        match kind {
            "backend id" => {
                state.backends.push(Backend::new(name));
                state.hosts[0].paths.push(route("/x", name));
            }
            "server name" => {
                let mut ep = endpoint("10.0.0.7", 8080);
                ep.name = name.to_string();
                state.backends[1].endpoints.push(ep);
            }
            _ => state.hosts.push(Host {
                hostname: name.to_string(),
                paths: vec![route("/", "default_echo_8080")],
                tls: None,
                ssl_passthrough: false,
            }),
        }
        let mut config = Config::from_state(state);
        let err = config
            .build_frontend_group()
            .and_then(|()| config.build_backend_maps())
            .unwrap_err();
        match err {
            BuildError::InvalidName {
                kind: got_kind,
                name: got_name,
                ..
            } => {
                assert_eq!(got_kind, kind);
                assert_eq!(got_name, name);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn wildcard_hostname_is_accepted() {
        let mut state = sample_state();
        state.hosts.push(Host {
            hostname: "*.apps.local".to_string(),
            paths: vec![route("/", "default_echo_8080")],
            tls: None,
            ssl_passthrough: false,
        });
        built(state);
    }

    #[test]
    fn path_with_whitespace_is_rejected() {
        let mut state = sample_state();
        state.hosts[0].paths.push(route("/a b", "default_api_80"));
        let mut config = Config::from_state(state);
        assert!(matches!(
            config.build_frontend_group(),
            Err(BuildError::InvalidName { kind: "path", .. })
        ));
    }

    #[test]
    fn padded_generation_equals_fresh_one() {
        let fresh = built(sample_state());
        let mut running = built(sample_state());
        for backend in running.backends_mut() {
            backend.fill_empty_slots(32);
        }
        assert!(fresh.equals(Some(&running)));
        assert!(running.equals(Some(&fresh)));
    }

    #[test]
    fn server_names_and_order_do_not_affect_equality() {
        let fresh = built(sample_state());
        let mut running = built(sample_state());
        let echo = &mut running.backends_mut()[0];
        echo.endpoints.reverse();
        echo.endpoints[0].name = "srv007".into();
        assert!(fresh.equals(Some(&running)));
    }

    #[test]
    fn moved_server_is_a_difference() {
        let fresh = built(sample_state());
        let mut running = built(sample_state());
        running.backends_mut()[0].endpoints[1].port = 9090;
        assert!(!fresh.equals(Some(&running)));
    }

    #[test]
    fn adopting_layout_keeps_slots() {
        let mut fresh = built(sample_state());
        let mut running = built(sample_state());
        running.backends_mut()[0].fill_empty_slots(4);
        fresh.adopt_server_layout(&running);
        assert_eq!(fresh.backends()[0].endpoints.len(), 4);
        assert_eq!(fresh, running);
    }

    #[test]
    fn acquire_creates_once() {
        let mut config = Config::new();
        config.acquire_backend("b1").endpoints.push(endpoint("10.0.0.1", 80));
        config.acquire_backend("b1");
        config.acquire_host("h.local").paths.push(route("/", "b1"));
        config.acquire_host("h.local");
        assert_eq!(config.backends().len(), 1);
        assert_eq!(config.hosts().len(), 1);
        assert_eq!(config.backends()[0].endpoints.len(), 1);
    }

    #[test]
    fn maps_lists_frontend_then_backend_maps() {
        let config = built(sample_state());
        let names: Vec<_> = config.maps().iter().map(|m| m.name.clone()).collect();
        assert_eq!(names[0], "_front_http_host");
        assert_eq!(names.len(), 6);
    }
}
