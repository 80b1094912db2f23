//! Domain identifiers — ISD-AS numbers, interface ids, and link types.
//!
//! An ISD-AS is a 16-bit isolation domain number paired with a 48-bit AS
//! number. Text form is `isd-asn`; AS numbers that fit in 32 bits are
//! written in decimal, larger ones as three colon-separated hex groups
//! (`1-ff00:0:110`).

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Interface identifier, scoped to one AS.
pub type IfId = u16;

/// Reserved interface id meaning "no interface". Marks segment endpoints.
pub const NO_INTERFACE: IfId = 0;

/// Largest representable AS number (48 bits).
pub const MAX_AS: u64 = (1 << 48) - 1;

/// AS numbers up to this value use the decimal text form.
const MAX_DECIMAL_AS: u64 = u32::MAX as u64;

// ── ISD-AS ────────────────────────────────────────────────────────────────────

/// An autonomous routing domain, qualified by its isolation domain.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct IsdAs {
    isd: u16,
    asn: u64,
}

impl IsdAs {
    /// The all-zero wildcard. Used as "no next AS" in terminal entries.
    pub const WILDCARD: IsdAs = IsdAs { isd: 0, asn: 0 };

    pub fn new(isd: u16, asn: u64) -> Result<Self, AddrError> {
        if asn > MAX_AS {
            return Err(AddrError::AsOutOfRange(asn));
        }
        Ok(Self { isd, asn })
    }

    pub fn isd(&self) -> u16 {
        self.isd
    }

    pub fn asn(&self) -> u64 {
        self.asn
    }

    /// Either component zero means "any".
    pub fn is_wildcard(&self) -> bool {
        self.isd == 0 || self.asn == 0
    }

    /// Packed form: ISD in the top 16 bits, AS in the low 48.
    pub fn to_u64(self) -> u64 {
        ((self.isd as u64) << 48) | self.asn
    }

    pub fn from_u64(raw: u64) -> Self {
        Self {
            isd: (raw >> 48) as u16,
            asn: raw & MAX_AS,
        }
    }
}

impl fmt::Display for IsdAs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.asn <= MAX_DECIMAL_AS {
            write!(f, "{}-{}", self.isd, self.asn)
        } else {
            write!(
                f,
                "{}-{:x}:{:x}:{:x}",
                self.isd,
                (self.asn >> 32) & 0xffff,
                (self.asn >> 16) & 0xffff,
                self.asn & 0xffff
            )
        }
    }
}

impl FromStr for IsdAs {
    type Err = AddrError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || AddrError::InvalidIsdAs(s.to_string());
        let (isd, asn) = s.split_once('-').ok_or_else(invalid)?;
        let isd: u16 = isd.parse().map_err(|_| invalid())?;

        let asn = if asn.contains(':') {
            let groups: Vec<&str> = asn.split(':').collect();
            if groups.len() != 3 {
                return Err(invalid());
            }
            let mut value = 0u64;
            for group in groups {
                let part = u16::from_str_radix(group, 16).map_err(|_| invalid())?;
                value = (value << 16) | part as u64;
            }
            value
        } else {
            let value: u64 = asn.parse().map_err(|_| invalid())?;
            if value > MAX_DECIMAL_AS {
                return Err(invalid());
            }
            value
        };

        IsdAs::new(isd, asn)
    }
}

impl Serialize for IsdAs {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for IsdAs {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

// ── Link type ─────────────────────────────────────────────────────────────────

/// Relationship between the local AS and the AS across an interface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LinkType {
    /// Core-to-core link. Core beacons travel along these.
    Core,
    /// The remote AS is our provider.
    Parent,
    /// The remote AS is our customer. Intra-ISD beacons travel downwards.
    Child,
    /// Peering link. Never on the primary path, only as a peer entry.
    Peer,
}

// ── Errors ────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AddrError {
    #[error("invalid ISD-AS: {0:?}")]
    InvalidIsdAs(String),

    #[error("AS number {0} exceeds 48 bits")]
    AsOutOfRange(u64),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_decimal_and_hex_forms() {
        let ia: IsdAs = "1-64512".parse().unwrap();
        assert_eq!(ia.isd(), 1);
        assert_eq!(ia.asn(), 64512);

        let ia: IsdAs = "1-ff00:0:110".parse().unwrap();
        assert_eq!(ia.asn(), 0xff00_0000_0110);
        assert_eq!(ia.to_string(), "1-ff00:0:110");
    }

    #[test]
    fn decimal_form_is_limited_to_32_bits() {
        assert!("1-4294967296".parse::<IsdAs>().is_err());
        assert!("1-4294967295".parse::<IsdAs>().is_ok());
    }

    #[test]
    fn rejects_malformed_text() {
        for bad in ["", "1", "1-", "-5", "x-5", "1-ff00:0", "1-ff00:0:110:1", "1-zz:0:1"] {
            assert!(bad.parse::<IsdAs>().is_err(), "{bad:?} should not parse");
        }
    }

    #[test]
    fn wildcard_detection() {
        assert!(IsdAs::WILDCARD.is_wildcard());
        assert!(IsdAs::new(0, 5).unwrap().is_wildcard());
        assert!(IsdAs::new(1, 0).unwrap().is_wildcard());
        assert!(!IsdAs::new(1, 5).unwrap().is_wildcard());
    }

    #[test]
    fn packed_form_preserves_components() {
        let ia: IsdAs = "17-ff00:0:1".parse().unwrap();
        assert_eq!(IsdAs::from_u64(ia.to_u64()), ia);
    }

    #[test]
    fn as_number_range_is_enforced() {
        assert_eq!(IsdAs::new(1, MAX_AS + 1), Err(AddrError::AsOutOfRange(MAX_AS + 1)));
    }

    #[test]
    fn serde_uses_text_form() {
        let ia: IsdAs = "2-ff00:0:222".parse().unwrap();
        let json = serde_json::to_string(&ia).unwrap();
        assert_eq!(json, "\"2-ff00:0:222\"");
        let back: IsdAs = serde_json::from_str(&json).unwrap();
        assert_eq!(back, ia);
    }

    #[test]
    fn link_type_serde_is_lowercase() {
        assert_eq!(serde_json::to_string(&LinkType::Peer).unwrap(), "\"peer\"");
        let lt: LinkType = serde_json::from_str("\"child\"").unwrap();
        assert_eq!(lt, LinkType::Child);
    }
}
