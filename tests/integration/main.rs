//! Beaconing integration tests.
//!
//! Several ASes run in one process. Each has its own interfaces, keys,
//! store and registry; links between them are in-memory [`Wire`]s that
//! hand sent beacons straight to the remote AS's handler.
//!
//!   cargo test --test integration
//!
//! Default topology, built by [`Topology::chain`]:
//!
//!   AS 1 (core) if 1 ──child── if 21 AS 2 if 23 ──child── if 32 AS 3
//!                                    if 24 ──peer── if 42 AS 4

use std::collections::BTreeMap;
use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;

use beacon_core::config::MacScheme;
use beacon_core::crypto::{HopKey, SigningIdentity};
use beacon_core::{IfId, IsdAs, LinkType, PathSegment};
use beacon_services::{
    new_extender, Beacon, BeaconHandler, BeaconSender, CancelToken, Extender, ExtenderConfig,
    Interfaces, MemoryBeaconStore, Originator, Propagator, Registrar, SegmentRegistry, SendError,
    StorePolicy, TopoInfo,
};

mod extension;
mod pipeline;
mod store;

// ── Harness ───────────────────────────────────────────────────────────────────

pub const MTU: u16 = 1472;

pub fn ia(asn: u64) -> IsdAs {
    IsdAs::new(1, asn).unwrap()
}

/// One end of a link: (local ifid, link type, remote AS number, remote ifid).
pub type LinkEnd = (IfId, LinkType, u64, IfId);

/// A single AS with everything the pipeline needs.
pub struct Node {
    pub ia: IsdAs,
    pub core: bool,
    pub scheme: MacScheme,
    pub interfaces: Interfaces,
    pub store: MemoryBeaconStore,
    pub registry: SegmentRegistry,
    pub handler: Arc<BeaconHandler>,
    pub hop_key: Arc<HopKey>,
    pub signer: Arc<SigningIdentity>,
}

impl Node {
    pub fn new(asn: u64, core: bool, scheme: MacScheme, links: &[LinkEnd]) -> Result<Self> {
        let local = ia(asn);
        let interfaces = Interfaces::new(links.iter().map(|&(ifid, link_type, remote, remote_ifid)| {
            TopoInfo {
                ifid,
                link_type,
                remote_ia: ia(remote),
                remote_ifid,
                mtu: 1400,
            }
        }));
        let store = MemoryBeaconStore::new(
            StorePolicy {
                local_ia: local,
                core,
                best_set_size: 8,
                max_hops: 16,
                channel_capacity: 4,
            },
            interfaces.clone(),
        );
        let handler = Arc::new(BeaconHandler::new(local, interfaces.clone(), Arc::new(store.clone())));
        let hop_key = HopKey::derive(&[asn as u8 + 100; 32])
            .with_context(|| format!("hop key for AS {asn}"))?;
        Ok(Self {
            ia: local,
            core,
            scheme,
            interfaces,
            store,
            registry: SegmentRegistry::new(),
            handler,
            hop_key: Arc::new(hop_key),
            signer: Arc::new(SigningIdentity::from_secret([asn as u8 + 50; 32])),
        })
    }

    /// Mark every interface as having seen a keepalive.
    pub fn bring_up(&self) {
        let ifids: Vec<IfId> = self.interfaces.snapshot().all().map(|(ifid, _)| ifid).collect();
        for ifid in ifids {
            self.interfaces.activate(ifid);
        }
    }

    pub fn extender(&self) -> Arc<dyn Extender> {
        new_extender(
            self.scheme,
            ExtenderConfig {
                ia: self.ia,
                signer: self.signer.clone(),
                mac: self.hop_key.clone(),
                interfaces: self.interfaces.clone(),
                mtu: MTU,
                max_exp_time: Some(Arc::new(|| 63)),
                task: format!("as{}", self.ia.asn()),
            },
        )
    }

    pub fn originator(&self, wire: Arc<Wire>) -> Originator {
        Originator::new(self.core, self.extender(), self.interfaces.clone(), wire)
    }

    pub fn propagator(&self, wire: Arc<Wire>) -> Propagator {
        Propagator::new(
            self.core,
            self.extender(),
            self.interfaces.clone(),
            Arc::new(self.store.clone()),
            wire,
            4,
        )
    }

    pub fn registrar(&self) -> Registrar {
        Registrar::new(
            self.core,
            self.extender(),
            self.interfaces.clone(),
            Arc::new(self.store.clone()),
            Arc::new(self.registry.clone()),
        )
    }
}

/// Outgoing links of one AS: egress ifid → (remote handler, remote ifid).
#[derive(Default)]
pub struct Wire {
    ends: BTreeMap<IfId, (Arc<BeaconHandler>, IfId)>,
}

impl Wire {
    pub fn connect(&mut self, egress: IfId, remote: &Node, remote_ifid: IfId) {
        self.ends.insert(egress, (remote.handler.clone(), remote_ifid));
    }
}

#[async_trait]
impl BeaconSender for Wire {
    async fn send(&self, egress: IfId, segment: &PathSegment) -> Result<(), SendError> {
        let (handler, in_ifid) = self.ends.get(&egress).ok_or(SendError::NoTransport(egress))?;
        handler
            .handle(&CancelToken::new(), Beacon::new(segment.clone(), *in_ifid))
            .await
            .map_err(|e| SendError::Rejected(e.to_string()))
    }
}

/// Nodes plus the wires between them, indexed by AS number.
pub struct Topology {
    pub nodes: BTreeMap<u64, Node>,
    pub wires: BTreeMap<u64, Arc<Wire>>,
}

impl Topology {
    pub fn chain(scheme: MacScheme) -> Result<Self> {
        let nodes = BTreeMap::from([
            (1, Node::new(1, true, scheme, &[(1, LinkType::Child, 2, 21)])?),
            (
                2,
                Node::new(
                    2,
                    false,
                    scheme,
                    &[
                        (21, LinkType::Parent, 1, 1),
                        (23, LinkType::Child, 3, 32),
                        (24, LinkType::Peer, 4, 42),
                    ],
                )?,
            ),
            (3, Node::new(3, false, scheme, &[(32, LinkType::Parent, 2, 23)])?),
            (4, Node::new(4, false, scheme, &[(42, LinkType::Peer, 2, 24)])?),
        ]);
        for node in nodes.values() {
            node.bring_up();
        }

        let mut w1 = Wire::default();
        w1.connect(1, &nodes[&2], 21);
        let mut w2 = Wire::default();
        w2.connect(21, &nodes[&1], 1);
        w2.connect(23, &nodes[&3], 32);
        let mut w3 = Wire::default();
        w3.connect(32, &nodes[&2], 23);

        let wires = BTreeMap::from([(1, Arc::new(w1)), (2, Arc::new(w2)), (3, Arc::new(w3)), (4, Arc::new(Wire::default()))]);
        Ok(Self { nodes, wires })
    }

    pub fn node(&self, asn: u64) -> &Node {
        &self.nodes[&asn]
    }

    pub fn wire(&self, asn: u64) -> Arc<Wire> {
        self.wires[&asn].clone()
    }

    /// Originate at AS 1, then propagate one hop at a time down the chain.
    pub async fn beacon_round(&self) -> Result<()> {
        let cancel = CancelToken::new();
        self.node(1).originator(self.wire(1)).run(&cancel).await;
        self.node(2).propagator(self.wire(2)).run(&cancel).await.context("propagate at AS 2")?;
        self.node(3).propagator(self.wire(3)).run(&cancel).await.context("propagate at AS 3")?;
        Ok(())
    }
}
