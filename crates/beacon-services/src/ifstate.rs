//! Interface liveness: which inter-domain links are usable right now.
//!
//! The topology (remote AS, remote interface, MTU, link type) is static
//! and comes from config. The state of each link is driven by keepalives.
//! Readers take an `Arc` snapshot and never observe a half-applied update:
//! every change clones the current snapshot, modifies the clone, and
//! swaps it in under the write lock.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::RwLock;
use serde::Serialize;

use beacon_core::config::InterfaceConfig;
use beacon_core::{IfId, IsdAs, LinkType};

/// Liveness of one interface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum InterfaceState {
    /// No keepalive seen yet.
    Inactive,
    /// Keepalives arriving. The only state usable for beaconing.
    Active,
    /// Was active, keepalives stopped.
    Expired,
    /// Explicitly taken out of service.
    Revoked,
}

/// Static description of the link behind an interface.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopoInfo {
    pub ifid: IfId,
    pub link_type: LinkType,
    pub remote_ia: IsdAs,
    pub remote_ifid: IfId,
    pub mtu: u16,
}

impl From<&InterfaceConfig> for TopoInfo {
    fn from(cfg: &InterfaceConfig) -> Self {
        Self {
            ifid: cfg.ifid,
            link_type: cfg.link_type,
            remote_ia: cfg.remote_ia,
            remote_ifid: cfg.remote_ifid,
            mtu: cfg.mtu,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Interface {
    topo: TopoInfo,
    state: InterfaceState,
    last_keepalive: Option<Instant>,
}

impl Interface {
    fn new(topo: TopoInfo) -> Self {
        Self {
            topo,
            state: InterfaceState::Inactive,
            last_keepalive: None,
        }
    }

    pub fn state(&self) -> InterfaceState {
        self.state
    }

    pub fn topo_info(&self) -> &TopoInfo {
        &self.topo
    }

    pub fn last_keepalive(&self) -> Option<Instant> {
        self.last_keepalive
    }
}

/// A consistent view of every interface at one point in time.
#[derive(Debug, Clone, Default)]
pub struct InterfaceSnapshot {
    interfaces: BTreeMap<IfId, Interface>,
}

impl InterfaceSnapshot {
    pub fn get(&self, ifid: IfId) -> Option<&Interface> {
        self.interfaces.get(&ifid)
    }

    /// All interfaces, ordered by id.
    pub fn all(&self) -> impl Iterator<Item = (IfId, &Interface)> {
        self.interfaces.iter().map(|(ifid, intf)| (*ifid, intf))
    }

    pub fn is_active(&self, ifid: IfId) -> bool {
        self.get(ifid)
            .map(|intf| intf.state == InterfaceState::Active)
            .unwrap_or(false)
    }

    /// Active interfaces of the given link type, ordered by id.
    pub fn active_of_type(&self, link_type: LinkType) -> Vec<IfId> {
        self.all()
            .filter(|(_, intf)| {
                intf.state == InterfaceState::Active && intf.topo.link_type == link_type
            })
            .map(|(ifid, _)| ifid)
            .collect()
    }

    pub fn len(&self) -> usize {
        self.interfaces.len()
    }

    pub fn is_empty(&self) -> bool {
        self.interfaces.is_empty()
    }
}

/// Shared handle to the interface table. Cheap to clone.
#[derive(Clone, Default)]
pub struct Interfaces {
    current: Arc<RwLock<Arc<InterfaceSnapshot>>>,
}

impl Interfaces {
    /// Build the table from static topology. Every interface starts inactive.
    pub fn new(topology: impl IntoIterator<Item = TopoInfo>) -> Self {
        let interfaces = topology
            .into_iter()
            .map(|topo| (topo.ifid, Interface::new(topo)))
            .collect();
        Self {
            current: Arc::new(RwLock::new(Arc::new(InterfaceSnapshot { interfaces }))),
        }
    }

    pub fn from_config(interfaces: &[InterfaceConfig]) -> Self {
        Self::new(interfaces.iter().map(TopoInfo::from))
    }

    /// The current snapshot. Stays valid and unchanged while held.
    pub fn snapshot(&self) -> Arc<InterfaceSnapshot> {
        self.current.read().clone()
    }

    pub fn get(&self, ifid: IfId) -> Option<Interface> {
        self.snapshot().get(ifid).cloned()
    }

    fn modify<R>(&self, f: impl FnOnce(&mut InterfaceSnapshot) -> R) -> R {
        let mut guard = self.current.write();
        let mut next = (**guard).clone();
        let result = f(&mut next);
        *guard = Arc::new(next);
        result
    }

    /// Record a keepalive. Returns true if the interface became active.
    pub fn activate(&self, ifid: IfId) -> bool {
        self.modify(|snap| match snap.interfaces.get_mut(&ifid) {
            Some(intf) => {
                intf.last_keepalive = Some(Instant::now());
                let changed = intf.state != InterfaceState::Active;
                intf.state = InterfaceState::Active;
                changed
            }
            None => false,
        })
    }

    /// Take an interface out of service until its next keepalive.
    pub fn revoke(&self, ifid: IfId) -> bool {
        self.set_state(ifid, InterfaceState::Revoked)
    }

    pub fn set_state(&self, ifid: IfId, state: InterfaceState) -> bool {
        self.modify(|snap| match snap.interfaces.get_mut(&ifid) {
            Some(intf) => {
                intf.state = state;
                true
            }
            None => false,
        })
    }

    /// Expire active interfaces whose last keepalive is older than `timeout`.
    /// Returns the ids that changed state.
    pub fn expire(&self, timeout: Duration) -> Vec<IfId> {
        self.modify(|snap| {
            let mut expired = Vec::new();
            for (ifid, intf) in snap.interfaces.iter_mut() {
                if intf.state != InterfaceState::Active {
                    continue;
                }
                let stale = intf
                    .last_keepalive
                    .map(|t| t.elapsed() >= timeout)
                    .unwrap_or(true);
                if stale {
                    intf.state = InterfaceState::Expired;
                    expired.push(*ifid);
                }
            }
            expired
        })
    }

    /// Replace the static topology. Interfaces that survive keep their state.
    pub fn update_topology(&self, topology: impl IntoIterator<Item = TopoInfo>) {
        let topology: Vec<TopoInfo> = topology.into_iter().collect();
        self.modify(|snap| {
            let mut next = BTreeMap::new();
            for topo in topology {
                let intf = match snap.interfaces.remove(&topo.ifid) {
                    Some(mut old) => {
                        old.topo = topo;
                        old
                    }
                    None => Interface::new(topo),
                };
                next.insert(intf.topo.ifid, intf);
            }
            snap.interfaces = next;
        });
    }
}
