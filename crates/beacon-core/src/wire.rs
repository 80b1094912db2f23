//! Byte layouts that feed the hop authenticator.
//!
//! Two MAC schemes coexist. The legacy one packs the previous hop field
//! into the MAC input; its 8-byte on-wire hop field is defined here with
//! zerocopy so the layout is fixed at compile time. The current one builds
//! a 16-byte input from the rolling chain value `beta`.
//!
//! Changing any offset here invalidates every MAC already in circulation.

use static_assertions::assert_eq_size;
use zerocopy::{AsBytes, FromBytes, FromZeroes};

use crate::addr::IfId;
use crate::hop::HopField;

/// Length of every MAC input block.
pub const MAC_INPUT_LEN: usize = 16;

/// Bytes of the MAC kept in a legacy hop field.
pub const LEGACY_MAC_LEN: usize = 3;

/// Legacy hop fields carry 12-bit interface ids.
pub const LEGACY_IFID_BITS: u32 = 12;

/// Largest interface id a legacy hop field can express.
pub const LEGACY_IFID_MAX: IfId = (1 << LEGACY_IFID_BITS) - 1;

// ── Legacy hop field ──────────────────────────────────────────────────────────

/// The legacy packed hop field.
///
/// Wire size: 8 bytes.
#[derive(Debug, Clone, AsBytes, FromBytes, FromZeroes)]
#[repr(C, packed)]
pub struct LegacyHopField {
    /// Flag byte. Never part of a MAC input.
    pub flags: u8,
    /// Relative expiration time.
    pub exp_time: u8,
    /// ingress (12 bits) ‖ egress (12 bits), big-endian.
    pub ifids: [u8; 3],
    /// First three bytes of the hop MAC.
    pub mac: [u8; LEGACY_MAC_LEN],
}

assert_eq_size!(LegacyHopField, [u8; 8]);

impl LegacyHopField {
    /// Pack a hop field. Fails when an interface id does not fit in 12 bits.
    pub fn pack(hop: &HopField) -> Result<Self, WireError> {
        let ifids = pack_ifids(hop.cons_ingress, hop.cons_egress)?;
        let mut mac = [0u8; LEGACY_MAC_LEN];
        mac.copy_from_slice(&hop.mac[..LEGACY_MAC_LEN]);
        Ok(Self {
            flags: 0,
            exp_time: hop.exp_time,
            ifids,
            mac,
        })
    }

    pub fn ingress(&self) -> IfId {
        let ifids = self.ifids;
        ((ifids[0] as u16) << 4) | ((ifids[1] as u16) >> 4)
    }

    pub fn egress(&self) -> IfId {
        let ifids = self.ifids;
        (((ifids[1] & 0x0f) as u16) << 8) | ifids[2] as u16
    }
}

fn pack_ifids(ingress: IfId, egress: IfId) -> Result<[u8; 3], WireError> {
    for ifid in [ingress, egress] {
        if ifid > LEGACY_IFID_MAX {
            return Err(WireError::LegacyIfIdOverflow(ifid));
        }
    }
    let packed = ((ingress as u32) << LEGACY_IFID_BITS) | egress as u32;
    let bytes = packed.to_be_bytes();
    Ok([bytes[1], bytes[2], bytes[3]])
}

// ── MAC inputs ────────────────────────────────────────────────────────────────

/// Legacy MAC input:
///
/// ```text
/// ts (4) | 0x00 | exp (1) | ifids (3) | previous hop field without flags (7)
/// ```
///
/// The previous-hop bytes stay zero for the first hop of a segment.
pub fn legacy_mac_input(
    timestamp: u32,
    exp_time: u8,
    ingress: IfId,
    egress: IfId,
    prev: Option<&LegacyHopField>,
) -> Result<[u8; MAC_INPUT_LEN], WireError> {
    let mut input = [0u8; MAC_INPUT_LEN];
    input[0..4].copy_from_slice(&timestamp.to_be_bytes());
    input[5] = exp_time;
    input[6..9].copy_from_slice(&pack_ifids(ingress, egress)?);
    if let Some(prev) = prev {
        input[9..16].copy_from_slice(&prev.as_bytes()[1..]);
    }
    Ok(input)
}

/// Current MAC input:
///
/// ```text
/// 0x0000 | beta (2) | ts (4) | 0x00 | exp (1) | ingress (2) | egress (2) | 0x0000
/// ```
pub fn mac_input(
    beta: u16,
    timestamp: u32,
    exp_time: u8,
    ingress: IfId,
    egress: IfId,
) -> [u8; MAC_INPUT_LEN] {
    let mut input = [0u8; MAC_INPUT_LEN];
    input[2..4].copy_from_slice(&beta.to_be_bytes());
    input[4..8].copy_from_slice(&timestamp.to_be_bytes());
    input[9] = exp_time;
    input[10..12].copy_from_slice(&ingress.to_be_bytes());
    input[12..14].copy_from_slice(&egress.to_be_bytes());
    input
}

// ── Serde helpers ─────────────────────────────────────────────────────────────

/// Fixed-size byte arrays as lowercase hex strings.
pub(crate) mod hex_array {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S, const N: usize>(bytes: &[u8; N], serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&hex::encode(bytes))
    }

    pub fn deserialize<'de, D, const N: usize>(deserializer: D) -> Result<[u8; N], D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        let bytes = hex::decode(&s).map_err(serde::de::Error::custom)?;
        bytes
            .try_into()
            .map_err(|_| serde::de::Error::custom(format!("expected {} bytes", N)))
    }
}

// ── Errors ────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum WireError {
    #[error("interface id {0} does not fit in a legacy hop field (max {})", LEGACY_IFID_MAX)]
    LegacyIfIdOverflow(IfId),
}
