//! Live updates: apply the difference between two generations through the
//! runtime channel when it only touches backend servers.
//!
//! Servers are matched by `ip:port`. A changed weight is patched in place, a
//! vanished server is put in maintenance and becomes an empty slot, and a new
//! server takes over an empty slot. Everything else needs a reload.

use std::collections::{HashMap, HashSet};

use haconf_core::types::{Backend, BackendId, Endpoint};
use haconf_core::Config;

use crate::runtime::RuntimeChannel;

/// Result of a live update attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DynUpdate {
    /// Every change is live; `commands` were sent (possibly none).
    Applied { commands: usize },
    /// The proxy must reload; `commands` were sent before giving up.
    ReloadRequired { commands: usize },
}

impl DynUpdate {
    /// Artifacts must be rewritten: a reload is due, or the running process
    /// was patched and the files must catch up.
    pub fn needs_write(&self) -> bool {
        match self {
            DynUpdate::Applied { commands } => *commands > 0,
            DynUpdate::ReloadRequired { .. } => true,
        }
    }

    pub fn needs_reload(&self) -> bool {
        matches!(self, DynUpdate::ReloadRequired { .. })
    }

    pub fn commands(&self) -> usize {
        match self {
            DynUpdate::Applied { commands } | DynUpdate::ReloadRequired { commands } => *commands,
        }
    }
}

/// Seam between the cycle and the live update strategy.
pub trait LiveUpdate: Send {
    /// Called at most once per cycle. Must not change `old`; may rewrite
    /// `current` so that it describes the patched process.
    fn update(&mut self, old: Option<&Config>, current: &mut Config) -> DynUpdate;
}

/// [`LiveUpdate`] backed by an optional runtime channel.
pub struct RuntimeUpdater {
    runtime: Option<Box<dyn RuntimeChannel>>,
    slots_increment: usize,
}

impl RuntimeUpdater {
    pub fn new(runtime: Option<Box<dyn RuntimeChannel>>, slots_increment: usize) -> Self {
        Self {
            runtime,
            slots_increment,
        }
    }
}

impl LiveUpdate for RuntimeUpdater {
    fn update(&mut self, old: Option<&Config>, current: &mut Config) -> DynUpdate {
        let runtime: Option<&mut dyn RuntimeChannel> = match self.runtime.as_mut() {
            Some(rt) => Some(rt.as_mut()),
            None => None,
        };
        DynUpdater::new(old, current, runtime, self.slots_increment).update()
    }
}

// ---------------------------------------------------------------------------
// DynUpdater
// ---------------------------------------------------------------------------

/// One live update attempt bound to an `(old, current)` pair.
pub struct DynUpdater<'a> {
    old: Option<&'a Config>,
    current: &'a mut Config,
    runtime: Option<&'a mut dyn RuntimeChannel>,
    slots_increment: usize,
}

/// Patched server list of one backend and the commands that produce it.
#[derive(Debug, Clone, PartialEq, Eq)]
struct BackendPlan {
    id: BackendId,
    endpoints: Vec<Endpoint>,
    commands: Vec<String>,
}

impl<'a> DynUpdater<'a> {
    pub fn new(
        old: Option<&'a Config>,
        current: &'a mut Config,
        runtime: Option<&'a mut dyn RuntimeChannel>,
        slots_increment: usize,
    ) -> Self {
        Self {
            old,
            current,
            runtime,
            slots_increment,
        }
    }

    pub fn update(mut self) -> DynUpdate {
        let result = self.check_and_apply();
        if result.needs_reload() && self.slots_increment > 0 {
            for backend in self.current.backends_mut() {
                backend.fill_empty_slots(self.slots_increment);
            }
        }
        result
    }

    fn check_and_apply(&mut self) -> DynUpdate {
        let Some(old) = self.old else {
            return DynUpdate::ReloadRequired { commands: 0 };
        };
        let Some(plans) = plan(old, self.current) else {
            return DynUpdate::ReloadRequired { commands: 0 };
        };

        let commands: Vec<&str> = plans
            .iter()
            .flat_map(|p| p.commands.iter().map(String::as_str))
            .collect();
        if !commands.is_empty() {
            let Some(runtime) = self.runtime.as_deref_mut() else {
                tracing::debug!(
                    commands = commands.len(),
                    "no runtime channel, backend changes need a reload"
                );
                return DynUpdate::ReloadRequired { commands: 0 };
            };
            for (sent, command) in commands.iter().enumerate() {
                if let Err(error) = runtime.send(command) {
                    tracing::warn!(%error, "live update failed, falling back to reload");
                    return DynUpdate::ReloadRequired { commands: sent };
                }
            }
        }

        let sent = commands.len();
        for plan in plans {
            if let Some(backend) = self.current.backend_mut(&plan.id) {
                backend.endpoints = plan.endpoints;
            }
        }
        DynUpdate::Applied { commands: sent }
    }
}

/// Plan every backend of `current` against `old`. `None` means a live
/// update cannot express the difference.
fn plan(old: &Config, current: &Config) -> Option<Vec<BackendPlan>> {
    if !current.same_routing(old) {
        tracing::debug!("routing changed, reload required");
        return None;
    }
    let old_ids: HashSet<&BackendId> = old.backends().iter().map(|b| &b.id).collect();
    let cur_ids: HashSet<&BackendId> = current.backends().iter().map(|b| &b.id).collect();
    if old_ids != cur_ids {
        tracing::debug!("backend list changed, reload required");
        return None;
    }

    current
        .backends()
        .iter()
        .map(|backend| {
            let previous = old.backend(&backend.id)?;
            if !backend.same_settings(previous) {
                tracing::debug!(backend = %backend.id, "backend settings changed, reload required");
                return None;
            }
            plan_backend(previous, backend)
        })
        .collect()
}

fn plan_backend(old: &Backend, current: &Backend) -> Option<BackendPlan> {
    let mut wanted: HashMap<String, &Endpoint> = HashMap::new();
    for ep in current.enabled_endpoints() {
        if wanted.insert(ep.target(), ep).is_some() {
            return None;
        }
    }

    let id = &current.id;
    let mut slots = old.endpoints.clone();
    let mut commands = Vec::new();

    for slot in slots.iter_mut().filter(|s| s.enabled) {
        match wanted.remove(&slot.target()) {
            Some(ep) => {
                if ep.weight != slot.weight {
                    commands.push(format!("set server {id}/{} weight {}", slot.name, ep.weight));
                    slot.weight = ep.weight;
                }
            }
            None => {
                commands.push(format!("set server {id}/{} state maint", slot.name));
                *slot = Endpoint::empty_slot(slot.name.clone());
            }
        }
    }

    // Added servers, in the order `current` lists them.
    for ep in current.enabled_endpoints() {
        if !wanted.contains_key(&ep.target()) {
            continue;
        }
        let Some(slot) = slots.iter_mut().find(|s| s.is_empty_slot()) else {
            tracing::debug!(backend = %id, "no empty slot left, reload required");
            return None;
        };
        let name = slot.name.clone();
        commands.push(format!("set server {id}/{name} addr {} port {}", ep.ip, ep.port));
        commands.push(format!("set server {id}/{name} weight {}", ep.weight));
        commands.push(format!("set server {id}/{name} state ready"));
        *slot = Endpoint {
            name,
            ip: ep.ip.clone(),
            port: ep.port,
            weight: ep.weight,
            enabled: true,
        };
    }

    Some(BackendPlan {
        id: id.clone(),
        endpoints: slots,
        commands,
    })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::RuntimeError;
    use haconf_core::types::HostPath;

    /// Records commands; rejects the `fail_at`-th one (0-based).
    #[derive(Default)]
    struct FakeRuntime {
        sent: Vec<String>,
        fail_at: Option<usize>,
    }

    impl RuntimeChannel for FakeRuntime {
        fn send(&mut self, command: &str) -> Result<String, RuntimeError> {
            if self.fail_at == Some(self.sent.len()) {
                return Err(RuntimeError::Rejected {
                    command: command.to_string(),
                    reply: "No such server.".to_string(),
                });
            }
            self.sent.push(command.to_string());
            Ok(String::new())
        }
    }

    fn ep(name: &str, ip: &str, weight: u32) -> Endpoint {
        Endpoint {
            name: name.to_string(),
            ip: ip.to_string(),
            port: 8080,
            weight,
            enabled: true,
        }
    }

    fn config(endpoints: Vec<Endpoint>) -> Config {
        let mut config = Config::new();
        config.acquire_backend("web").endpoints = endpoints;
        config.acquire_host("web.local").paths.push(HostPath {
            path: "/".into(),
            backend: "web".into(),
        });
        config.build_frontend_group().expect("frontends");
        config.build_backend_maps().expect("maps");
        config
    }

    fn run(old: Option<&Config>, current: &mut Config, rt: &mut FakeRuntime) -> DynUpdate {
        DynUpdater::new(old, current, Some(rt), 0).update()
    }

    #[test]
    fn no_old_generation_requires_reload() {
        let mut cur = config(vec![ep("srv001", "10.0.0.1", 1)]);
        let mut rt = FakeRuntime::default();
        assert_eq!(
            run(None, &mut cur, &mut rt),
            DynUpdate::ReloadRequired { commands: 0 }
        );
        assert!(rt.sent.is_empty());
    }

    #[test]
    fn weight_change_is_one_command() {
        let old = config(vec![ep("srv001", "10.0.0.1", 1), ep("srv002", "10.0.0.2", 1)]);
        let mut cur = config(vec![ep("srv001", "10.0.0.1", 1), ep("srv002", "10.0.0.2", 5)]);
        let mut rt = FakeRuntime::default();

        assert_eq!(run(Some(&old), &mut cur, &mut rt), DynUpdate::Applied { commands: 1 });
        assert_eq!(rt.sent, ["set server web/srv002 weight 5"]);
    }

    #[test]
    fn removed_server_becomes_empty_slot() {
        let old = config(vec![ep("srv001", "10.0.0.1", 1), ep("srv002", "10.0.0.2", 1)]);
        let mut cur = config(vec![ep("srv001", "10.0.0.1", 1)]);
        let mut rt = FakeRuntime::default();

        assert_eq!(run(Some(&old), &mut cur, &mut rt), DynUpdate::Applied { commands: 1 });
        assert_eq!(rt.sent, ["set server web/srv002 state maint"]);
        let servers = &cur.backends()[0].endpoints;
        assert_eq!(servers.len(), 2, "slot is kept");
        assert!(servers[1].is_empty_slot());
        assert_eq!(servers[1].name, "srv002");
    }

    #[test]
    fn added_server_fills_empty_slot() {
        let old = config(vec![ep("srv001", "10.0.0.1", 1), Endpoint::empty_slot("srv002")]);
        let mut cur = config(vec![ep("srv001", "10.0.0.1", 1), ep("srvX", "10.0.0.9", 3)]);
        let mut rt = FakeRuntime::default();

        assert_eq!(run(Some(&old), &mut cur, &mut rt), DynUpdate::Applied { commands: 3 });
        assert_eq!(
            rt.sent,
            [
                "set server web/srv002 addr 10.0.0.9 port 8080",
                "set server web/srv002 weight 3",
                "set server web/srv002 state ready",
            ]
        );
        let patched = &cur.backends()[0].endpoints[1];
        assert_eq!(patched.name, "srv002", "slot name comes from the running process");
        assert_eq!(patched.ip, "10.0.0.9");
    }

    #[test]
    fn replaced_server_reuses_freed_slot() {
        let old = config(vec![ep("srv001", "10.0.0.1", 1)]);
        let mut cur = config(vec![ep("srv001", "10.0.0.2", 1)]);
        let mut rt = FakeRuntime::default();

        assert_eq!(run(Some(&old), &mut cur, &mut rt), DynUpdate::Applied { commands: 4 });
        assert_eq!(rt.sent[0], "set server web/srv001 state maint");
        assert_eq!(rt.sent[1], "set server web/srv001 addr 10.0.0.2 port 8080");
    }

    #[test]
    fn added_server_without_slot_requires_reload() {
        let old = config(vec![ep("srv001", "10.0.0.1", 1)]);
        let mut cur = config(vec![ep("srv001", "10.0.0.1", 1), ep("srv002", "10.0.0.2", 1)]);
        let before = cur.clone();
        let mut rt = FakeRuntime::default();

        assert_eq!(
            run(Some(&old), &mut cur, &mut rt),
            DynUpdate::ReloadRequired { commands: 0 }
        );
        assert!(rt.sent.is_empty(), "nothing is sent when planning fails");
        assert_eq!(cur, before);
    }

    #[test]
    fn routing_change_requires_reload() {
        let old = config(vec![ep("srv001", "10.0.0.1", 1)]);
        let mut cur = config(vec![ep("srv001", "10.0.0.1", 1)]);
        cur.global_mut().max_conn = 9000;
        let mut rt = FakeRuntime::default();
        assert!(run(Some(&old), &mut cur, &mut rt).needs_reload());
    }

    #[test]
    fn backend_settings_change_requires_reload() {
        let old = config(vec![ep("srv001", "10.0.0.1", 1)]);
        let mut cur = config(vec![ep("srv001", "10.0.0.1", 1)]);
        cur.acquire_backend("web").balance = "leastconn".to_string();
        let mut rt = FakeRuntime::default();
        assert!(run(Some(&old), &mut cur, &mut rt).needs_reload());
    }

    #[test]
    fn rejected_command_reports_commands_sent_so_far() {
        let old = config(vec![ep("srv001", "10.0.0.1", 1), ep("srv002", "10.0.0.2", 1)]);
        let mut cur = config(vec![ep("srv001", "10.0.0.1", 2), ep("srv002", "10.0.0.2", 2)]);
        let before = cur.clone();
        let mut rt = FakeRuntime {
            fail_at: Some(1),
            ..FakeRuntime::default()
        };

        assert_eq!(
            run(Some(&old), &mut cur, &mut rt),
            DynUpdate::ReloadRequired { commands: 1 }
        );
        assert_eq!(cur, before, "current is only patched on full success");
    }

    #[test]
    fn missing_runtime_requires_reload_for_changes() {
        let old = config(vec![ep("srv001", "10.0.0.1", 1)]);
        let mut cur = config(vec![ep("srv001", "10.0.0.1", 7)]);
        let result = DynUpdater::new(Some(&old), &mut cur, None, 0).update();
        assert_eq!(result, DynUpdate::ReloadRequired { commands: 0 });
    }

    #[test]
    fn missing_runtime_is_fine_without_changes() {
        let old = config(vec![ep("srv001", "10.0.0.1", 1), Endpoint::empty_slot("srv002")]);
        let mut cur = config(vec![ep("srv001", "10.0.0.1", 1)]);
        let result = DynUpdater::new(Some(&old), &mut cur, None, 0).update();
        assert_eq!(result, DynUpdate::Applied { commands: 0 });
        assert_eq!(cur, old, "current adopts the running layout");
    }

    #[test]
    fn reload_pads_backends_with_empty_slots() {
        let mut cur = config(vec![ep("srv001", "10.0.0.1", 1)]);
        let result = DynUpdater::new(None, &mut cur, None, 4).update();
        assert!(result.needs_reload());
        let servers = &cur.backends()[0].endpoints;
        assert_eq!(servers.len(), 4);
        assert_eq!(servers.iter().filter(|e| e.is_empty_slot()).count(), 3);
    }

    #[test]
    fn old_generation_is_never_modified() {
        let old = config(vec![ep("srv001", "10.0.0.1", 1), Endpoint::empty_slot("srv002")]);
        let snapshot = old.clone();
        let mut cur = config(vec![ep("srv003", "10.0.0.3", 1)]);
        let mut rt = FakeRuntime::default();
        run(Some(&old), &mut cur, &mut rt);
        assert_eq!(old, snapshot);
    }

    #[test]
    fn write_and_reload_gating_helpers() {
        assert!(!DynUpdate::Applied { commands: 0 }.needs_write());
        assert!(DynUpdate::Applied { commands: 2 }.needs_write());
        assert!(DynUpdate::ReloadRequired { commands: 0 }.needs_write());
        assert!(DynUpdate::ReloadRequired { commands: 1 }.needs_write());
        assert!(!DynUpdate::Applied { commands: 2 }.needs_reload());
        assert!(DynUpdate::ReloadRequired { commands: 0 }.needs_reload());
        assert_eq!(DynUpdate::ReloadRequired { commands: 3 }.commands(), 3);
    }
}
