//! The path segment container.
//!
//! A segment is an append-only chain of signed AS entries plus the
//! segment info (creation timestamp and segment id) that seeds the hop
//! MAC chain. Each entry is signed over the segment info, the signatures
//! of every earlier entry, and the entry itself, so entries cannot be
//! removed, reordered, or altered after the fact without breaking the
//! signature chain.

use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

use crate::addr::{IfId, IsdAs, NO_INTERFACE};
use crate::crypto::{self, CryptoError, Signer};
use crate::hop::{HopEntry, HopField, PeerEntry};

/// Upper bound on AS entries in one segment.
pub const MAX_AS_ENTRIES: usize = 64;

// ── Segment info ──────────────────────────────────────────────────────────────

/// Per-segment values shared by every hop MAC in the chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SegmentInfo {
    /// Creation time, unix seconds. Hop expirations are relative to it.
    pub timestamp: u32,
    /// Random nonce seeding the MAC chain.
    pub segment_id: u16,
}

impl SegmentInfo {
    pub fn new(timestamp: u32, segment_id: u16) -> Self {
        Self {
            timestamp,
            segment_id,
        }
    }

    /// Fresh info for a beacon originated now.
    pub fn now() -> Self {
        Self::new(unix_now() as u32, rand::random())
    }

    fn pack(&self) -> [u8; 6] {
        let mut out = [0u8; 6];
        out[..4].copy_from_slice(&self.timestamp.to_be_bytes());
        out[4..].copy_from_slice(&self.segment_id.to_be_bytes());
        out
    }
}

/// Current unix time in seconds.
pub fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

// ── AS entries ────────────────────────────────────────────────────────────────

/// One domain's contribution to a segment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AsEntry {
    /// The AS that created this entry.
    pub local: IsdAs,
    /// The AS behind the egress interface. Wildcard when the path ends here.
    pub next: IsdAs,
    /// The AS's advertised MTU.
    pub mtu: u16,
    pub hop_entry: HopEntry,
    pub peer_entries: Vec<PeerEntry>,
}

impl AsEntry {
    /// Canonical byte form covered by the entry signature.
    pub fn pack(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(32 + 30 * self.peer_entries.len());
        out.extend_from_slice(&self.local.to_u64().to_be_bytes());
        out.extend_from_slice(&self.next.to_u64().to_be_bytes());
        out.extend_from_slice(&self.mtu.to_be_bytes());
        out.extend_from_slice(&self.hop_entry.ingress_mtu.to_be_bytes());
        pack_hop_field(&mut out, &self.hop_entry.hop_field);
        out.extend_from_slice(&(self.peer_entries.len() as u16).to_be_bytes());
        for peer in &self.peer_entries {
            out.extend_from_slice(&peer.peer.to_u64().to_be_bytes());
            out.extend_from_slice(&peer.peer_interface.to_be_bytes());
            out.extend_from_slice(&peer.peer_mtu.to_be_bytes());
            pack_hop_field(&mut out, &peer.hop_field);
        }
        out
    }

    pub fn ingress(&self) -> IfId {
        self.hop_entry.hop_field.cons_ingress
    }

    pub fn egress(&self) -> IfId {
        self.hop_entry.hop_field.cons_egress
    }
}

fn pack_hop_field(out: &mut Vec<u8>, hop: &HopField) {
    out.extend_from_slice(&hop.cons_ingress.to_be_bytes());
    out.extend_from_slice(&hop.cons_egress.to_be_bytes());
    out.push(hop.exp_time);
    out.extend_from_slice(&hop.mac);
}

/// An AS entry together with its signature.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignedAsEntry {
    pub entry: AsEntry,
    /// Ed25519 public key of the signing AS.
    #[serde(with = "crate::wire::hex_array")]
    pub signer: [u8; 32],
    #[serde(with = "crate::wire::hex_array")]
    pub signature: [u8; 64],
}

// ── Path segment ──────────────────────────────────────────────────────────────

/// Which shape `validate` enforces.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValidationMode {
    /// A beacon still being propagated: the last entry must be open.
    Beacon,
    /// A finished segment: the last entry must terminate the path.
    Segment,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PathSegment {
    info: SegmentInfo,
    as_entries: Vec<SignedAsEntry>,
}

impl PathSegment {
    pub fn new(info: SegmentInfo) -> Self {
        Self {
            info,
            as_entries: Vec::new(),
        }
    }

    pub fn info(&self) -> &SegmentInfo {
        &self.info
    }

    pub fn as_entries(&self) -> &[SignedAsEntry] {
        &self.as_entries
    }

    pub fn len(&self) -> usize {
        self.as_entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.as_entries.is_empty()
    }

    /// Index of the last entry, -1 when empty.
    pub fn max_idx(&self) -> isize {
        self.as_entries.len() as isize - 1
    }

    pub fn last_entry(&self) -> Option<&AsEntry> {
        self.as_entries.last().map(|signed| &signed.entry)
    }

    /// True once an entry with egress 0 has been appended.
    pub fn is_terminated(&self) -> bool {
        self.last_entry()
            .map(|entry| entry.egress() == NO_INTERFACE)
            .unwrap_or(false)
    }

    /// The AS that originated the segment.
    pub fn first_ia(&self) -> Option<IsdAs> {
        self.as_entries.first().map(|signed| signed.entry.local)
    }

    pub fn contains_ia(&self, ia: IsdAs) -> bool {
        self.as_entries.iter().any(|signed| signed.entry.local == ia)
    }

    /// Earliest expiry over all hop and peer fields, unix seconds.
    pub fn expiry(&self) -> Option<u64> {
        let ts = self.info.timestamp;
        self.as_entries
            .iter()
            .flat_map(|signed| {
                let entry = &signed.entry;
                std::iter::once(&entry.hop_entry.hop_field)
                    .chain(entry.peer_entries.iter().map(|p| &p.hop_field))
            })
            .map(|hop| hop.expiry(ts))
            .min()
    }

    /// Identity of the path itself: the (AS, ingress, egress) sequence.
    /// Two beacons over the same path share a fingerprint regardless of
    /// when they were created.
    pub fn fingerprint(&self) -> [u8; 32] {
        let mut hasher = blake3::Hasher::new();
        for signed in &self.as_entries {
            let entry = &signed.entry;
            hasher.update(&entry.local.to_u64().to_be_bytes());
            hasher.update(&entry.ingress().to_be_bytes());
            hasher.update(&entry.egress().to_be_bytes());
        }
        *hasher.finalize().as_bytes()
    }

    /// Sign `entry` under `signer` and append it.
    pub fn add_as_entry(&mut self, entry: AsEntry, signer: &dyn Signer) -> Result<(), SegmentError> {
        if self.is_terminated() {
            return Err(SegmentError::Terminated);
        }
        if self.as_entries.len() >= MAX_AS_ENTRIES {
            return Err(SegmentError::TooManyEntries(MAX_AS_ENTRIES));
        }
        let input = self.signing_input(self.as_entries.len(), &entry);
        let signature = signer.sign(&input)?;
        self.as_entries.push(SignedAsEntry {
            entry,
            signer: signer.public_key(),
            signature,
        });
        Ok(())
    }

    /// info ‖ signatures of entries [0, idx) ‖ entry
    fn signing_input(&self, idx: usize, entry: &AsEntry) -> Vec<u8> {
        let mut input = Vec::with_capacity(6 + 64 * idx + 64);
        input.extend_from_slice(&self.info.pack());
        for prev in &self.as_entries[..idx] {
            input.extend_from_slice(&prev.signature);
        }
        input.extend_from_slice(&entry.pack());
        input
    }

    /// Check every entry signature against the chain.
    pub fn verify_signatures(&self) -> Result<(), SegmentError> {
        for (index, signed) in self.as_entries.iter().enumerate() {
            let input = self.signing_input(index, &signed.entry);
            crypto::verify(&signed.signer, &input, &signed.signature)
                .map_err(|source| SegmentError::Signature { index, source })?;
        }
        Ok(())
    }

    /// Structural validation of the segment shape.
    pub fn validate(&self, mode: ValidationMode) -> Result<(), SegmentError> {
        if self.as_entries.is_empty() {
            return Err(SegmentError::Empty);
        }
        let last = self.as_entries.len() - 1;
        for (index, signed) in self.as_entries.iter().enumerate() {
            let entry = &signed.entry;
            if entry.local.is_wildcard() {
                return Err(SegmentError::WildcardLocal { index });
            }
            if entry.mtu == 0 {
                return Err(SegmentError::MtuZero { index });
            }
            match (index, entry.ingress()) {
                (0, NO_INTERFACE) => {}
                (0, ingress) => return Err(SegmentError::FirstIngressSet(ingress)),
                (_, NO_INTERFACE) => return Err(SegmentError::IngressZero { index }),
                _ => {}
            }
            if index > 0 {
                let expected = self.as_entries[index - 1].entry.next;
                if expected != entry.local {
                    return Err(SegmentError::NextMismatch {
                        index,
                        expected,
                        actual: entry.local,
                    });
                }
            }
            if index < last && entry.egress() == NO_INTERFACE {
                return Err(SegmentError::EgressZero { index });
            }
            for peer in &entry.peer_entries {
                let hop = &peer.hop_field;
                if hop.cons_ingress == NO_INTERFACE || hop.cons_egress != entry.egress() {
                    return Err(SegmentError::PeerMismatch { index });
                }
            }
        }

        let tail = &self.as_entries[last].entry;
        match mode {
            ValidationMode::Beacon => {
                if tail.egress() == NO_INTERFACE {
                    return Err(SegmentError::Terminated);
                }
                if tail.next.is_wildcard() {
                    return Err(SegmentError::OpenWithoutNext);
                }
            }
            ValidationMode::Segment => {
                if tail.egress() != NO_INTERFACE || !tail.next.is_wildcard() {
                    return Err(SegmentError::NotTerminated);
                }
            }
        }
        Ok(())
    }
}

// ── Errors ────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SegmentError {
    #[error("segment has no AS entries")]
    Empty,

    #[error("segment is terminated, no further entries allowed")]
    Terminated,

    #[error("segment is not terminated")]
    NotTerminated,

    #[error("open segment has no next AS")]
    OpenWithoutNext,

    #[error("segment already holds the maximum of {0} AS entries")]
    TooManyEntries(usize),

    #[error("first entry has ingress {0}, must be 0")]
    FirstIngressSet(IfId),

    #[error("entry {index} has ingress 0")]
    IngressZero { index: usize },

    #[error("entry {index} has egress 0 but is not the last entry")]
    EgressZero { index: usize },

    #[error("entry {index} has a wildcard local AS")]
    WildcardLocal { index: usize },

    #[error("entry {index} has MTU 0")]
    MtuZero { index: usize },

    #[error("entry {index}: previous entry points to {expected}, entry is {actual}")]
    NextMismatch {
        index: usize,
        expected: IsdAs,
        actual: IsdAs,
    },

    #[error("entry {index} has a peer hop field inconsistent with its hop entry")]
    PeerMismatch { index: usize },

    #[error("entry {index}: {source}")]
    Signature {
        index: usize,
        #[source]
        source: CryptoError,
    },

    #[error("signing failed: {0}")]
    Signing(#[from] CryptoError),
}
