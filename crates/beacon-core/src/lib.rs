//! beacon-core — identifiers, hop fields, the path segment container,
//! hop authentication primitives, and configuration.
//! All other beacon crates depend on this one.

pub mod addr;
pub mod config;
pub mod crypto;
pub mod hop;
pub mod segment;
pub mod wire;

pub use addr::{IfId, IsdAs, LinkType, NO_INTERFACE};
pub use hop::{HopEntry, HopField, PeerEntry};
pub use segment::{AsEntry, PathSegment, SegmentError, SegmentInfo, SignedAsEntry, ValidationMode};
