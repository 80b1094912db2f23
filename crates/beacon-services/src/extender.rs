//! Segment extender — appends the local AS entry to a path segment.
//!
//! One [`Extender`] per scheme. Both share the same checks and assembly
//! steps (`extend_with`) and differ only in how the hop chain is seeded
//! and how hop fields are authenticated (see [`crate::hopauth`]).
//!
//! The primary hop must resolve and authenticate or the whole call fails.
//! A peer that cannot be resolved or encoded is dropped and logged; the
//! entry is still produced without it.

use std::sync::Arc;

use beacon_core::config::MacScheme;
use beacon_core::crypto::{CryptoError, MacFactory, Signer};
use beacon_core::wire::{LegacyHopField, WireError};
use beacon_core::{
    AsEntry, HopEntry, HopField, IfId, IsdAs, LinkType, PathSegment, PeerEntry, SegmentError,
    ValidationMode, NO_INTERFACE,
};
use thiserror::Error;

use crate::hopauth::{self, HopError};
use crate::ifstate::{InterfaceSnapshot, InterfaceState, Interfaces};

/// Supplies the relative expiration time for new hop fields.
pub type ExpTimeFn = Arc<dyn Fn() -> u8 + Send + Sync>;

pub trait Extender: Send + Sync {
    /// Append the local AS entry for `ingress → egress` to `segment`.
    ///
    /// On error the segment may already hold the new entry and must be
    /// discarded by the caller.
    fn extend(
        &self,
        segment: &mut PathSegment,
        ingress: IfId,
        egress: IfId,
        peers: &[IfId],
    ) -> Result<(), ExtendError>;
}

/// What both extenders need. Fixed at construction.
#[derive(Clone)]
pub struct ExtenderConfig {
    pub ia: IsdAs,
    pub signer: Arc<dyn Signer>,
    pub mac: Arc<dyn MacFactory>,
    pub interfaces: Interfaces,
    pub mtu: u16,
    pub max_exp_time: Option<ExpTimeFn>,
    /// Name used in peer-skip diagnostics.
    pub task: String,
}

/// Build the extender for `scheme`.
pub fn new_extender(scheme: MacScheme, cfg: ExtenderConfig) -> Arc<dyn Extender> {
    match scheme {
        MacScheme::Legacy => Arc::new(LegacyExtender::new(cfg)),
        MacScheme::Current => Arc::new(DefaultExtender::new(cfg)),
    }
}

// ── Scheme plumbing ───────────────────────────────────────────────────────────

/// How one scheme seeds the chain and authenticates hop fields.
trait Scheme {
    type Chain;

    fn chain(&self, segment: &PathSegment) -> Result<Self::Chain, ExtendError>;

    fn hop_field(
        &self,
        ingress: IfId,
        egress: IfId,
        exp_time: u8,
        timestamp: u32,
        chain: &Self::Chain,
    ) -> Result<HopField, HopError>;

    /// Chain input for the peer hop fields of an entry whose primary hop
    /// field is `hop`.
    fn peer_chain(&self, chain: &Self::Chain, hop: &HopField) -> Result<Self::Chain, ExtendError>;
}

/// Extender for the 3-byte legacy MAC scheme.
pub struct LegacyExtender {
    cfg: ExtenderConfig,
}

impl LegacyExtender {
    pub fn new(cfg: ExtenderConfig) -> Self {
        Self { cfg }
    }
}

impl Scheme for LegacyExtender {
    type Chain = Option<LegacyHopField>;

    fn chain(&self, segment: &PathSegment) -> Result<Self::Chain, ExtendError> {
        Ok(hopauth::legacy_prev_at(segment, segment.len())?)
    }

    fn hop_field(
        &self,
        ingress: IfId,
        egress: IfId,
        exp_time: u8,
        timestamp: u32,
        chain: &Self::Chain,
    ) -> Result<HopField, HopError> {
        hopauth::legacy_hop_field(&*self.cfg.mac, ingress, egress, exp_time, timestamp, chain.as_ref())
    }

    fn peer_chain(&self, _chain: &Self::Chain, hop: &HopField) -> Result<Self::Chain, ExtendError> {
        Ok(Some(LegacyHopField::pack(hop)?))
    }
}

impl Extender for LegacyExtender {
    fn extend(
        &self,
        segment: &mut PathSegment,
        ingress: IfId,
        egress: IfId,
        peers: &[IfId],
    ) -> Result<(), ExtendError> {
        extend_with(self, &self.cfg, segment, ingress, egress, peers)
    }
}

/// Extender for the current 6-byte MAC scheme.
pub struct DefaultExtender {
    cfg: ExtenderConfig,
}

impl DefaultExtender {
    pub fn new(cfg: ExtenderConfig) -> Self {
        Self { cfg }
    }
}

impl Scheme for DefaultExtender {
    type Chain = u16;

    fn chain(&self, segment: &PathSegment) -> Result<Self::Chain, ExtendError> {
        Ok(hopauth::extract_beta(segment))
    }

    fn hop_field(
        &self,
        ingress: IfId,
        egress: IfId,
        exp_time: u8,
        timestamp: u32,
        chain: &Self::Chain,
    ) -> Result<HopField, HopError> {
        Ok(hopauth::current_hop_field(&*self.cfg.mac, ingress, egress, exp_time, timestamp, *chain)?)
    }

    fn peer_chain(&self, chain: &Self::Chain, hop: &HopField) -> Result<Self::Chain, ExtendError> {
        Ok(hopauth::peer_beta(*chain, hop))
    }
}

impl Extender for DefaultExtender {
    fn extend(
        &self,
        segment: &mut PathSegment,
        ingress: IfId,
        egress: IfId,
        peers: &[IfId],
    ) -> Result<(), ExtendError> {
        extend_with(self, &self.cfg, segment, ingress, egress, peers)
    }
}

// ── Shared algorithm ──────────────────────────────────────────────────────────

fn extend_with<S: Scheme>(
    scheme: &S,
    cfg: &ExtenderConfig,
    segment: &mut PathSegment,
    ingress: IfId,
    egress: IfId,
    peers: &[IfId],
) -> Result<(), ExtendError> {
    if cfg.mtu == 0 {
        return Err(ExtendError::MtuNotSet);
    }
    let exp_fn = cfg.max_exp_time.as_ref().ok_or(ExtendError::ExpirationUnset)?;
    if segment.is_terminated() {
        return Err(ExtendError::SegmentTerminated);
    }
    let first_hop = segment.max_idx() < 0;
    if ingress == NO_INTERFACE && !first_hop {
        return Err(ExtendError::IngressZeroNotFirst);
    }
    if ingress != NO_INTERFACE && first_hop {
        return Err(ExtendError::IngressNotFirst { ingress });
    }
    if ingress == NO_INTERFACE && egress == NO_INTERFACE {
        return Err(ExtendError::BothZero);
    }

    // One snapshot for the whole call.
    let snap = cfg.interfaces.snapshot();
    let exp_time = exp_fn();
    let timestamp = segment.info().timestamp;

    let in_remote = resolve(&snap, ingress).map_err(|source| ExtendError::Interface { ifid: ingress, source })?;
    let chain = scheme.chain(segment)?;
    let hop_field = scheme.hop_field(ingress, egress, exp_time, timestamp, &chain)?;

    let peer_chain = scheme.peer_chain(&chain, &hop_field)?;
    let mut peer_entries = Vec::with_capacity(peers.len());
    for &peer in peers {
        match peer_entry(scheme, &snap, peer, egress, exp_time, timestamp, &peer_chain) {
            Ok(entry) => peer_entries.push(entry),
            Err(PeerError::Crypto(e)) => return Err(ExtendError::Crypto(e)),
            Err(e) => {
                tracing::debug!(task = %cfg.task, ifid = peer, error = %e, "ignoring peer link upon error");
            }
        }
    }

    let next = resolve(&snap, egress).map_err(|source| ExtendError::Interface { ifid: egress, source })?;

    let entry = AsEntry {
        local: cfg.ia,
        next: next.ia,
        mtu: cfg.mtu,
        hop_entry: HopEntry {
            ingress_mtu: in_remote.mtu,
            hop_field,
        },
        peer_entries,
    };
    segment.add_as_entry(entry, &*cfg.signer)?;

    let mode = if egress == NO_INTERFACE {
        ValidationMode::Segment
    } else {
        ValidationMode::Beacon
    };
    segment.validate(mode)?;
    Ok(())
}

fn peer_entry<S: Scheme>(
    scheme: &S,
    snap: &InterfaceSnapshot,
    peer: IfId,
    egress: IfId,
    exp_time: u8,
    timestamp: u32,
    chain: &S::Chain,
) -> Result<PeerEntry, PeerError> {
    if peer == NO_INTERFACE {
        return Err(PeerError::Resolve(ResolveError::NotFound));
    }
    let remote = resolve(snap, peer)?;
    if remote.link_type != LinkType::Peer {
        return Err(PeerError::Resolve(ResolveError::NotPeering(remote.link_type)));
    }
    let hop_field = scheme
        .hop_field(peer, egress, exp_time, timestamp, chain)
        .map_err(|e| match e {
            HopError::Wire(e) => PeerError::Wire(e),
            HopError::Crypto(e) => PeerError::Crypto(e),
        })?;
    Ok(PeerEntry {
        peer: remote.ia,
        peer_interface: remote.ifid,
        peer_mtu: remote.mtu,
        hop_field,
    })
}

/// The far side of one of our interfaces.
struct Remote {
    ia: IsdAs,
    ifid: IfId,
    mtu: u16,
    link_type: LinkType,
}

/// Interface 0 resolves to "no remote". Any other id must be known, active
/// and point at a concrete remote AS and interface.
fn resolve(snap: &InterfaceSnapshot, ifid: IfId) -> Result<Remote, ResolveError> {
    if ifid == NO_INTERFACE {
        return Ok(Remote {
            ia: IsdAs::WILDCARD,
            ifid: NO_INTERFACE,
            mtu: 0,
            link_type: LinkType::Core,
        });
    }
    let intf = snap.get(ifid).ok_or(ResolveError::NotFound)?;
    if intf.state() != InterfaceState::Active {
        return Err(ResolveError::NotActive(intf.state()));
    }
    let topo = intf.topo_info();
    if topo.remote_ifid == NO_INTERFACE {
        return Err(ResolveError::RemoteIfIdUnset);
    }
    if topo.remote_ia.is_wildcard() {
        return Err(ResolveError::WildcardRemote(topo.remote_ia));
    }
    Ok(Remote {
        ia: topo.remote_ia,
        ifid: topo.remote_ifid,
        mtu: topo.mtu,
        link_type: topo.link_type,
    })
}

// ── Errors ────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ResolveError {
    #[error("interface not found")]
    NotFound,

    #[error("interface is {0:?}")]
    NotActive(InterfaceState),

    #[error("remote interface id not set")]
    RemoteIfIdUnset,

    #[error("remote AS {0} is a wildcard")]
    WildcardRemote(IsdAs),

    #[error("{0:?} link is not a peering link")]
    NotPeering(LinkType),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ExtendError {
    #[error("MTU not set")]
    MtuNotSet,

    #[error("max expiration time not set")]
    ExpirationUnset,

    #[error("ingress must be zero in first hop, got {ingress}")]
    IngressNotFirst { ingress: IfId },

    #[error("ingress must only be zero in first hop")]
    IngressZeroNotFirst,

    #[error("ingress and egress must not both be zero")]
    BothZero,

    #[error("segment is terminated")]
    SegmentTerminated,

    #[error("interface {ifid}: {source}")]
    Interface {
        ifid: IfId,
        #[source]
        source: ResolveError,
    },

    #[error("hop field encoding: {0}")]
    Wire(#[from] WireError),

    #[error("hop MAC: {0}")]
    Crypto(#[from] CryptoError),

    #[error(transparent)]
    Segment(#[from] SegmentError),
}

impl From<HopError> for ExtendError {
    fn from(e: HopError) -> Self {
        match e {
            HopError::Wire(e) => ExtendError::Wire(e),
            HopError::Crypto(e) => ExtendError::Crypto(e),
        }
    }
}

#[derive(Debug, Error)]
enum PeerError {
    #[error(transparent)]
    Resolve(#[from] ResolveError),
    #[error(transparent)]
    Wire(WireError),
    #[error(transparent)]
    Crypto(CryptoError),
}
