//! Local segment registry. Terminated segments end up here.

use std::sync::Arc;

use async_trait::async_trait;
use beacon_core::segment::unix_now;
use beacon_core::PathSegment;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde::Serialize;

use crate::beacon::SegmentType;
use crate::sender::{SegmentRegistrar, SendError};

#[derive(Debug, Clone, Serialize)]
pub struct RegisteredSegment {
    pub seg_type: SegmentType,
    pub segment: PathSegment,
    /// Unix seconds.
    pub registered_at: u64,
}

/// Registered segments keyed by (type, path fingerprint). A newer segment
/// over the same path replaces the older one.
#[derive(Clone, Default)]
pub struct SegmentRegistry {
    segments: Arc<DashMap<(SegmentType, [u8; 32]), RegisteredSegment>>,
}

impl SegmentRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.segments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    /// All segments of `seg_type`, or every segment when `None`.
    pub fn segments(&self, seg_type: Option<SegmentType>) -> Vec<RegisteredSegment> {
        let mut out: Vec<RegisteredSegment> = self
            .segments
            .iter()
            .filter(|e| seg_type.map(|t| t == e.key().0).unwrap_or(true))
            .map(|e| e.value().clone())
            .collect();
        out.sort_by_key(|r| (r.seg_type.as_str(), r.segment.len(), r.segment.first_ia().map(|ia| ia.to_u64())));
        out
    }

    /// Drop segments expired at `now`. Returns how many were removed.
    pub fn purge_expired(&self, now: u64) -> usize {
        let before = self.segments.len();
        self.segments
            .retain(|_, r| r.segment.expiry().map(|e| e > now).unwrap_or(false));
        before - self.segments.len()
    }
}

#[async_trait]
impl SegmentRegistrar for SegmentRegistry {
    async fn register(&self, seg_type: SegmentType, segment: PathSegment) -> Result<(), SendError> {
        if !segment.is_terminated() {
            return Err(SendError::Rejected("segment is not terminated".into()));
        }
        let key = (seg_type, segment.fingerprint());
        let timestamp = segment.info().timestamp;
        let registered = RegisteredSegment {
            seg_type,
            segment,
            registered_at: unix_now(),
        };
        match self.segments.entry(key) {
            Entry::Occupied(mut existing) => {
                if timestamp > existing.get().segment.info().timestamp {
                    existing.insert(registered);
                }
            }
            Entry::Vacant(slot) => {
                slot.insert(registered);
            }
        }
        Ok(())
    }
}
