//! Accepted beacons and the selection streams fed from them.
//!
//! Records are kept serialized, the way a database would hand them back, so
//! a record that no longer decodes is delivered as an error element on the
//! stream instead of ending it.

use std::cmp::Reverse;
use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use beacon_core::segment::unix_now;
use beacon_core::{IfId, IsdAs};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use thiserror::Error;
use tokio::sync::mpsc;

use crate::beacon::{Beacon, BeaconOrErr, SegmentType};
use crate::cancel::CancelToken;
use crate::ifstate::Interfaces;

/// Admission and pre-filter side of the store.
#[async_trait]
pub trait BeaconInserter: Send + Sync {
    /// Cheap structural and policy check before a beacon is inserted.
    fn pre_filter(&self, beacon: &Beacon) -> Result<(), StoreError>;

    /// Store `beacons`. Returns how many were new or replaced an older copy.
    async fn insert_beacons(&self, cancel: &CancelToken, beacons: Vec<Beacon>) -> Result<usize, StoreError>;
}

/// Beacons selected for propagation to neighbors.
pub trait BeaconProvider: Send + Sync {
    fn beacons_to_propagate(&self, cancel: &CancelToken) -> Result<mpsc::Receiver<BeaconOrErr>, StoreError>;
}

/// Beacons selected for termination and registration as `seg_type`.
pub trait SegmentProvider: Send + Sync {
    fn segments_to_register(
        &self,
        cancel: &CancelToken,
        seg_type: SegmentType,
    ) -> Result<mpsc::Receiver<BeaconOrErr>, StoreError>;
}

#[derive(Debug, Clone)]
pub struct StorePolicy {
    pub local_ia: IsdAs,
    pub core: bool,
    /// Beacons kept per origin AS.
    pub best_set_size: usize,
    pub max_hops: usize,
    pub channel_capacity: usize,
}

/// What selection needs to know without decoding the record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BeaconMeta {
    pub origin: IsdAs,
    pub hops: usize,
    pub timestamp: u32,
    pub expiry: u64,
    pub in_ifid: IfId,
}

impl BeaconMeta {
    pub fn of(beacon: &Beacon) -> Self {
        let segment = &beacon.segment;
        Self {
            origin: segment.first_ia().unwrap_or(IsdAs::WILDCARD),
            hops: segment.len(),
            timestamp: segment.info().timestamp,
            expiry: segment.expiry().unwrap_or(0),
            in_ifid: beacon.in_ifid,
        }
    }
}

type RecordKey = ([u8; 32], IfId);

#[derive(Debug, Clone)]
struct Record {
    meta: BeaconMeta,
    raw: Vec<u8>,
}

/// In-memory beacon store keyed by (path fingerprint, ingress interface).
#[derive(Clone)]
pub struct MemoryBeaconStore {
    policy: StorePolicy,
    interfaces: Interfaces,
    records: Arc<DashMap<RecordKey, Record>>,
}

impl MemoryBeaconStore {
    pub fn new(policy: StorePolicy, interfaces: Interfaces) -> Self {
        Self {
            policy,
            interfaces,
            records: Arc::new(DashMap::new()),
        }
    }

    pub fn policy(&self) -> &StorePolicy {
        &self.policy
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Store an already-encoded record as is, skipping the pre-filter and
    /// the newer-than check. Tests use it to plant corrupt records.
    #[cfg(test)]
    pub(crate) fn insert_raw(&self, fingerprint: [u8; 32], meta: BeaconMeta, raw: Vec<u8>) {
        self.records.insert((fingerprint, meta.in_ifid), Record { meta, raw });
    }

    /// Every decodable beacon, in selection order. Corrupt records are
    /// skipped.
    pub fn beacons(&self) -> Vec<Beacon> {
        let mut records: Vec<(RecordKey, Record)> = self
            .records
            .iter()
            .map(|r| (*r.key(), r.value().clone()))
            .collect();
        sort_records(&mut records);
        records
            .into_iter()
            .filter_map(|(_, record)| serde_json::from_slice(&record.raw).ok())
            .collect()
    }

    /// Drop beacons whose earliest hop expiry is at or before `now`.
    /// Returns how many were removed.
    pub fn purge_expired(&self, now: u64) -> usize {
        let before = self.records.len();
        self.records.retain(|_, record| record.meta.expiry > now);
        before - self.records.len()
    }

    /// Best `best_set_size` beacons per origin, unexpired, origin order.
    fn select(&self, now: u64) -> Vec<(RecordKey, Record)> {
        let mut by_origin: BTreeMap<u64, Vec<(RecordKey, Record)>> = BTreeMap::new();
        for r in self.records.iter() {
            if r.meta.expiry <= now {
                continue;
            }
            by_origin
                .entry(r.meta.origin.to_u64())
                .or_default()
                .push((*r.key(), r.value().clone()));
        }
        let mut selected = Vec::new();
        for (_, mut group) in by_origin {
            sort_records(&mut group);
            group.truncate(self.policy.best_set_size);
            selected.extend(group);
        }
        selected
    }

    /// Decode `records` in order onto a fresh channel.
    fn stream(&self, cancel: &CancelToken, records: Vec<(RecordKey, Record)>) -> mpsc::Receiver<BeaconOrErr> {
        let (tx, rx) = mpsc::channel(self.policy.channel_capacity.max(1));
        let cancel = cancel.clone();
        tokio::spawn(async move {
            for ((fingerprint, _), record) in records {
                let item = serde_json::from_slice::<Beacon>(&record.raw).map_err(|e| StoreError::Corrupt {
                    key: hex::encode(&fingerprint[..8]),
                    reason: e.to_string(),
                });
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => return,
                    sent = tx.send(item) => {
                        if sent.is_err() {
                            return;
                        }
                    }
                }
            }
        });
        rx
    }
}

fn sort_records(records: &mut [(RecordKey, Record)]) {
    records.sort_by_key(|(key, record)| {
        (
            record.meta.origin.to_u64(),
            record.meta.hops,
            Reverse(record.meta.timestamp),
            *key,
        )
    });
}

#[async_trait]
impl BeaconInserter for MemoryBeaconStore {
    fn pre_filter(&self, beacon: &Beacon) -> Result<(), StoreError> {
        let segment = &beacon.segment;
        if segment.is_empty() {
            return Err(StoreError::Empty);
        }
        if segment.contains_ia(self.policy.local_ia) {
            return Err(StoreError::Loop(self.policy.local_ia));
        }
        if segment.len() > self.policy.max_hops {
            return Err(StoreError::TooLong {
                hops: segment.len(),
                max: self.policy.max_hops,
            });
        }
        let expiry = segment.expiry().unwrap_or(0);
        if expiry <= unix_now() {
            return Err(StoreError::Expired { expiry });
        }
        if self.interfaces.snapshot().get(beacon.in_ifid).is_none() {
            return Err(StoreError::UnknownInterface(beacon.in_ifid));
        }
        Ok(())
    }

    async fn insert_beacons(&self, cancel: &CancelToken, beacons: Vec<Beacon>) -> Result<usize, StoreError> {
        let mut stored = 0;
        for beacon in beacons {
            if cancel.is_cancelled() {
                return Err(StoreError::Cancelled);
            }
            let meta = BeaconMeta::of(&beacon);
            let key = (beacon.segment.fingerprint(), beacon.in_ifid);
            let raw = serde_json::to_vec(&beacon).map_err(|e| StoreError::Encode(e.to_string()))?;
            // Compare and replace under the same shard lock.
            match self.records.entry(key) {
                Entry::Occupied(mut existing) => {
                    if meta.timestamp <= existing.get().meta.timestamp {
                        continue;
                    }
                    existing.insert(Record { meta, raw });
                }
                Entry::Vacant(slot) => {
                    slot.insert(Record { meta, raw });
                }
            }
            stored += 1;
        }
        Ok(stored)
    }
}

impl BeaconProvider for MemoryBeaconStore {
    fn beacons_to_propagate(&self, cancel: &CancelToken) -> Result<mpsc::Receiver<BeaconOrErr>, StoreError> {
        if cancel.is_cancelled() {
            return Err(StoreError::Cancelled);
        }
        Ok(self.stream(cancel, self.select(unix_now())))
    }
}

impl SegmentProvider for MemoryBeaconStore {
    fn segments_to_register(
        &self,
        cancel: &CancelToken,
        seg_type: SegmentType,
    ) -> Result<mpsc::Receiver<BeaconOrErr>, StoreError> {
        if cancel.is_cancelled() {
            return Err(StoreError::Cancelled);
        }
        let allowed = match seg_type {
            SegmentType::Core => self.policy.core,
            SegmentType::Up | SegmentType::Down => !self.policy.core,
        };
        if !allowed {
            return Err(StoreError::UnsupportedSegmentType {
                seg_type,
                core: self.policy.core,
            });
        }
        Ok(self.stream(cancel, self.select(unix_now())))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    #[error("store operation cancelled")]
    Cancelled,

    #[error("{seg_type} segments are not registered by this AS (core: {core})")]
    UnsupportedSegmentType { seg_type: SegmentType, core: bool },

    #[error("corrupt beacon record {key}: {reason}")]
    Corrupt { key: String, reason: String },

    #[error("encode beacon: {0}")]
    Encode(String),

    #[error("beacon has no AS entries")]
    Empty,

    #[error("beacon already traverses {0}")]
    Loop(IsdAs),

    #[error("beacon has {hops} hops, limit is {max}")]
    TooLong { hops: usize, max: usize },

    #[error("beacon expired at {expiry}")]
    Expired { expiry: u64 },

    #[error("beacon arrived on unknown interface {0}")]
    UnknownInterface(IfId),
}
