//! HTTP API handlers — exposes beaconing state as JSON.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;

use axum::extract::{Query, State};
use axum::Json;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};

use beacon_core::config::MacScheme;
use beacon_core::{IfId, IsdAs, LinkType, PathSegment};
use beacon_services::{
    InterfaceState, Interfaces, MemoryBeaconStore, RunSummary, SegmentRegistry, SegmentType,
};

/// Latest summary per pipeline task, written by the daemon loops.
pub type RunLog = Arc<DashMap<String, RunSummary>>;

#[derive(Clone)]
pub struct ApiState {
    pub ia: IsdAs,
    pub core: bool,
    pub scheme: MacScheme,
    pub started: Instant,
    pub interfaces: Interfaces,
    pub store: MemoryBeaconStore,
    pub registry: SegmentRegistry,
    pub runs: RunLog,
}

// ── /status ──────────────────────────────────────────────────────────────────

#[derive(Serialize)]
pub struct StatusResponse {
    pub ia: IsdAs,
    pub core: bool,
    pub scheme: MacScheme,
    pub uptime_secs: u64,
    pub interfaces: usize,
    pub interfaces_active: usize,
    pub beacons: usize,
    pub segments: usize,
    pub runs: BTreeMap<String, RunSummary>,
}

pub async fn handle_status(State(state): State<ApiState>) -> Json<StatusResponse> {
    let snap = state.interfaces.snapshot();
    let interfaces_active = snap
        .all()
        .filter(|(_, intf)| intf.state() == InterfaceState::Active)
        .count();
    let runs = state
        .runs
        .iter()
        .map(|e| (e.key().clone(), *e.value()))
        .collect();

    Json(StatusResponse {
        ia: state.ia,
        core: state.core,
        scheme: state.scheme,
        uptime_secs: state.started.elapsed().as_secs(),
        interfaces: snap.len(),
        interfaces_active,
        beacons: state.store.len(),
        segments: state.registry.len(),
        runs,
    })
}

// ── /interfaces ──────────────────────────────────────────────────────────────

#[derive(Serialize)]
pub struct InterfaceInfo {
    pub ifid: IfId,
    pub link_type: LinkType,
    pub remote_ia: IsdAs,
    pub remote_ifid: IfId,
    pub mtu: u16,
    pub state: InterfaceState,
    /// Seconds since the last keepalive, if one was ever seen.
    pub last_keepalive_secs: Option<u64>,
}

pub async fn handle_interfaces(State(state): State<ApiState>) -> Json<Vec<InterfaceInfo>> {
    let snap = state.interfaces.snapshot();
    let interfaces = snap
        .all()
        .map(|(ifid, intf)| {
            let topo = intf.topo_info();
            InterfaceInfo {
                ifid,
                link_type: topo.link_type,
                remote_ia: topo.remote_ia,
                remote_ifid: topo.remote_ifid,
                mtu: topo.mtu,
                state: intf.state(),
                last_keepalive_secs: intf.last_keepalive().map(|t| t.elapsed().as_secs()),
            }
        })
        .collect();
    Json(interfaces)
}

// ── /beacons, /segments ──────────────────────────────────────────────────────

#[derive(Serialize)]
pub struct SegmentSummary {
    pub segment_id: String,
    pub timestamp: u32,
    pub expiry: Option<u64>,
    /// One `ia ingress>egress` element per hop.
    pub hops: Vec<String>,
}

impl From<&PathSegment> for SegmentSummary {
    fn from(segment: &PathSegment) -> Self {
        Self {
            segment_id: hex::encode(segment.info().segment_id.to_be_bytes()),
            timestamp: segment.info().timestamp,
            expiry: segment.expiry(),
            hops: segment
                .as_entries()
                .iter()
                .map(|signed| {
                    let e = &signed.entry;
                    format!("{} {}>{}", e.local, e.ingress(), e.egress())
                })
                .collect(),
        }
    }
}

#[derive(Serialize)]
pub struct BeaconInfo {
    pub in_ifid: IfId,
    #[serde(flatten)]
    pub segment: SegmentSummary,
}

pub async fn handle_beacons(State(state): State<ApiState>) -> Json<Vec<BeaconInfo>> {
    let beacons = state
        .store
        .beacons()
        .iter()
        .map(|b| BeaconInfo {
            in_ifid: b.in_ifid,
            segment: SegmentSummary::from(&b.segment),
        })
        .collect();
    Json(beacons)
}

#[derive(Deserialize)]
pub struct SegmentsQuery {
    #[serde(rename = "type")]
    pub seg_type: Option<SegmentType>,
}

#[derive(Serialize)]
pub struct SegmentInfoResponse {
    #[serde(rename = "type")]
    pub seg_type: SegmentType,
    pub registered_at: u64,
    #[serde(flatten)]
    pub segment: SegmentSummary,
}

pub async fn handle_segments(
    State(state): State<ApiState>,
    Query(query): Query<SegmentsQuery>,
) -> Json<Vec<SegmentInfoResponse>> {
    let segments = state
        .registry
        .segments(query.seg_type)
        .iter()
        .map(|r| SegmentInfoResponse {
            seg_type: r.seg_type,
            registered_at: r.registered_at,
            segment: SegmentSummary::from(&r.segment),
        })
        .collect();
    Json(segments)
}
