//! Hop fields — the authenticated unit of a path segment.
//!
//! A hop field covers one traversal of an AS: the interface the segment
//! entered through (construction direction), the interface it leaves
//! through, a relative expiration time and a truncated MAC. The MAC binds
//! these values to every hop field before it in the segment.

use serde::{Deserialize, Serialize};

use crate::addr::{IfId, IsdAs};

/// Stored MAC width. The legacy scheme only fills the first 3 bytes.
pub const MAC_LEN: usize = 6;

/// One expiration unit is 1/256 of 24 hours (337.5 s), in milliseconds.
const EXP_TIME_UNIT_MS: u64 = 337_500;

/// Authenticated (ingress, egress, expiration, MAC) tuple.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct HopField {
    /// Ingress interface in construction direction. 0 only in the first entry.
    pub cons_ingress: IfId,
    /// Egress interface in construction direction. 0 only in the last entry.
    pub cons_egress: IfId,
    /// Relative expiration, in units of 337.5 s after the segment timestamp.
    pub exp_time: u8,
    #[serde(with = "crate::wire::hex_array")]
    pub mac: [u8; MAC_LEN],
}

impl HopField {
    /// Absolute expiry in unix seconds, given the segment timestamp.
    pub fn expiry(&self, timestamp: u32) -> u64 {
        timestamp as u64 + (self.exp_time as u64 + 1) * EXP_TIME_UNIT_MS / 1000
    }

    /// The leading two MAC bytes, big-endian. Folded into the chain value
    /// of the current scheme.
    pub fn mac_prefix(&self) -> u16 {
        u16::from_be_bytes([self.mac[0], self.mac[1]])
    }
}

/// The primary hop of an AS entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct HopEntry {
    /// MTU of the link the segment arrived on. 0 for the first entry.
    pub ingress_mtu: u16,
    pub hop_field: HopField,
}

/// A hop over a peering link, attached next to the primary hop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerEntry {
    /// The AS at the other end of the peering link.
    pub peer: IsdAs,
    /// Interface id on the peer's side of the link.
    pub peer_interface: IfId,
    /// MTU of the peering link.
    pub peer_mtu: u16,
    pub hop_field: HopField,
}
