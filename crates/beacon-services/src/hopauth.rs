//! Computes and checks hop-field MACs.
//!
//! Both schemes bind a hop field to every hop before it:
//!
//! - legacy: the MAC input embeds the packed previous hop field (which
//!   carries the previous MAC), so a change anywhere upstream changes
//!   every MAC downstream. 3 MAC bytes are kept.
//! - current: the MAC input embeds `beta`, the segment id XOR-folded with
//!   the leading two MAC bytes of every earlier hop. 6 MAC bytes are kept.
//!   Peer hop fields use `beta ^ mac_prefix(own hop field)`.
//!
//! The functions here are pure given the MAC factory and their inputs.

use beacon_core::crypto::{compute_mac, CryptoError, MacFactory};
use beacon_core::hop::MAC_LEN;
use beacon_core::wire::{self, LegacyHopField, WireError, LEGACY_MAC_LEN};
use beacon_core::{HopField, IfId, PathSegment};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum HopError {
    #[error(transparent)]
    Wire(#[from] WireError),
    #[error(transparent)]
    Crypto(#[from] CryptoError),
}

// ── Current scheme ────────────────────────────────────────────────────────────

/// Chain value for the entry at `index`: the segment id folded with the
/// MAC prefixes of entries `[0, index)`.
pub fn beta_at(segment: &PathSegment, index: usize) -> u16 {
    segment.as_entries()[..index.min(segment.len())]
        .iter()
        .fold(segment.info().segment_id, |beta, signed| {
            beta ^ signed.entry.hop_entry.hop_field.mac_prefix()
        })
}

/// Chain value for the next entry to be appended.
pub fn extract_beta(segment: &PathSegment) -> u16 {
    beta_at(segment, segment.len())
}

/// Chain value for the peer hop fields of an entry.
pub fn peer_beta(entry_beta: u16, hop_field: &HopField) -> u16 {
    entry_beta ^ hop_field.mac_prefix()
}

pub fn current_hop_field(
    mac: &dyn MacFactory,
    ingress: IfId,
    egress: IfId,
    exp_time: u8,
    timestamp: u32,
    beta: u16,
) -> Result<HopField, CryptoError> {
    let input = wire::mac_input(beta, timestamp, exp_time, ingress, egress);
    let full = compute_mac(mac, &input)?;
    let mut truncated = [0u8; MAC_LEN];
    truncated.copy_from_slice(&full[..MAC_LEN]);
    Ok(HopField {
        cons_ingress: ingress,
        cons_egress: egress,
        exp_time,
        mac: truncated,
    })
}

/// Recompute the hop and peer MACs of entry `index` under the current
/// scheme. True when all of them match.
pub fn verify_current(
    mac: &dyn MacFactory,
    segment: &PathSegment,
    index: usize,
) -> Result<bool, CryptoError> {
    let Some(signed) = segment.as_entries().get(index) else {
        return Ok(false);
    };
    let entry = &signed.entry;
    let ts = segment.info().timestamp;
    let beta = beta_at(segment, index);

    let hop = &entry.hop_entry.hop_field;
    let expected = current_hop_field(mac, hop.cons_ingress, hop.cons_egress, hop.exp_time, ts, beta)?;
    if expected.mac != hop.mac {
        return Ok(false);
    }
    let beta = peer_beta(beta, hop);
    for peer in &entry.peer_entries {
        let p = &peer.hop_field;
        let expected = current_hop_field(mac, p.cons_ingress, p.cons_egress, p.exp_time, ts, beta)?;
        if expected.mac != p.mac {
            return Ok(false);
        }
    }
    Ok(true)
}

// ── Legacy scheme ─────────────────────────────────────────────────────────────

/// The packed hop field of the entry before `index`, if any.
pub fn legacy_prev_at(segment: &PathSegment, index: usize) -> Result<Option<LegacyHopField>, WireError> {
    if index == 0 {
        return Ok(None);
    }
    segment
        .as_entries()
        .get(index - 1)
        .map(|signed| LegacyHopField::pack(&signed.entry.hop_entry.hop_field))
        .transpose()
}

pub fn legacy_hop_field(
    mac: &dyn MacFactory,
    ingress: IfId,
    egress: IfId,
    exp_time: u8,
    timestamp: u32,
    prev: Option<&LegacyHopField>,
) -> Result<HopField, HopError> {
    let input = wire::legacy_mac_input(timestamp, exp_time, ingress, egress, prev)?;
    let full = compute_mac(mac, &input)?;
    let mut stored = [0u8; MAC_LEN];
    stored[..LEGACY_MAC_LEN].copy_from_slice(&full[..LEGACY_MAC_LEN]);
    Ok(HopField {
        cons_ingress: ingress,
        cons_egress: egress,
        exp_time,
        mac: stored,
    })
}

/// Legacy counterpart of [`verify_current`]. Peer MACs chain over the
/// entry's own packed hop field.
pub fn verify_legacy(mac: &dyn MacFactory, segment: &PathSegment, index: usize) -> Result<bool, HopError> {
    let Some(signed) = segment.as_entries().get(index) else {
        return Ok(false);
    };
    let entry = &signed.entry;
    let ts = segment.info().timestamp;
    let prev = legacy_prev_at(segment, index)?;

    let hop = &entry.hop_entry.hop_field;
    let expected = legacy_hop_field(mac, hop.cons_ingress, hop.cons_egress, hop.exp_time, ts, prev.as_ref())?;
    if expected.mac != hop.mac {
        return Ok(false);
    }
    let own = LegacyHopField::pack(hop)?;
    for peer in &entry.peer_entries {
        let p = &peer.hop_field;
        let expected = legacy_hop_field(mac, p.cons_ingress, p.cons_egress, p.exp_time, ts, Some(&own))?;
        if expected.mac != p.mac {
            return Ok(false);
        }
    }
    Ok(true)
}
