use beacon_core::{IfId, PathSegment};
use serde::{Deserialize, Serialize};

use crate::store::StoreError;

/// A path segment as received on one of our interfaces.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Beacon {
    pub segment: PathSegment,
    /// Interface the beacon arrived on. Zero for locally originated beacons.
    pub in_ifid: IfId,
}

impl Beacon {
    pub fn new(segment: PathSegment, in_ifid: IfId) -> Self {
        Self { segment, in_ifid }
    }
}

/// One item of a store stream: a beacon, or the error that replaced it.
pub type BeaconOrErr = Result<Beacon, StoreError>;

/// Kind of segment a registration run produces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SegmentType {
    Up,
    Down,
    Core,
}

impl SegmentType {
    pub fn as_str(&self) -> &'static str {
        match self {
            SegmentType::Up => "up",
            SegmentType::Down => "down",
            SegmentType::Core => "core",
        }
    }
}

impl std::fmt::Display for SegmentType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
