//! Beacon pipeline — originate, propagate, register.
//!
//! Every run fans out one task per target (egress interface or segment
//! type). A propagation target owns its own result channel: a producer
//! extends copies of the selected beacons onto it, the consumer hands them
//! to the sender. A failing beacon or send only costs that one item.
//!
//! All waits observe the run's [`CancelToken`]. A cancelled run stops
//! extending, drops what it has not sent yet and returns its summary.

use std::sync::Arc;

use anyhow::{Context, Result};
use beacon_core::segment::SegmentInfo;
use beacon_core::{IfId, IsdAs, LinkType, PathSegment, NO_INTERFACE};
use serde::Serialize;
use tokio::sync::mpsc;
use tokio::task::JoinSet;

use crate::beacon::{Beacon, BeaconOrErr, SegmentType};
use crate::cancel::CancelToken;
use crate::extender::{ExtendError, Extender};
use crate::ifstate::{InterfaceSnapshot, Interfaces};
use crate::sender::{BeaconSender, SegmentRegistrar};
use crate::store::{BeaconProvider, SegmentProvider};

/// Outcome counters of one run.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RunSummary {
    pub extended: usize,
    pub sent: usize,
    pub failed: usize,
    pub stream_errors: usize,
}

impl RunSummary {
    pub fn merge(&mut self, other: RunSummary) {
        self.extended += other.extended;
        self.sent += other.sent;
        self.failed += other.failed;
        self.stream_errors += other.stream_errors;
    }

    fn log(&self, task: &str) {
        if *self == RunSummary::default() {
            tracing::debug!(task, "run finished, nothing to do");
        } else {
            tracing::info!(
                task,
                extended = self.extended,
                sent = self.sent,
                failed = self.failed,
                stream_errors = self.stream_errors,
                "run finished"
            );
        }
    }
}

fn active_peers(snap: &InterfaceSnapshot) -> Vec<IfId> {
    snap.active_of_type(LinkType::Peer)
}

/// Active interfaces of `types` with the AS behind each.
fn targets(snap: &InterfaceSnapshot, types: &[LinkType]) -> Vec<(IfId, IsdAs)> {
    let mut out: Vec<(IfId, IsdAs)> = types
        .iter()
        .flat_map(|t| snap.active_of_type(*t))
        .filter_map(|ifid| snap.get(ifid).map(|intf| (ifid, intf.topo_info().remote_ia)))
        .collect();
    out.sort_by_key(|(ifid, _)| *ifid);
    out
}

async fn join_targets(mut tasks: JoinSet<RunSummary>, task: &str) -> RunSummary {
    let mut summary = RunSummary::default();
    while let Some(joined) = tasks.join_next().await {
        match joined {
            Ok(part) => summary.merge(part),
            Err(e) => {
                tracing::warn!(task, error = %e, "target task failed");
                summary.failed += 1;
            }
        }
    }
    summary
}

// ── Originator ────────────────────────────────────────────────────────────────

/// Starts new beacons on a core AS.
pub struct Originator {
    core: bool,
    extender: Arc<dyn Extender>,
    interfaces: Interfaces,
    sender: Arc<dyn BeaconSender>,
}

impl Originator {
    pub fn new(
        core: bool,
        extender: Arc<dyn Extender>,
        interfaces: Interfaces,
        sender: Arc<dyn BeaconSender>,
    ) -> Self {
        Self {
            core,
            extender,
            interfaces,
            sender,
        }
    }

    pub async fn run(&self, cancel: &CancelToken) -> RunSummary {
        if !self.core {
            return RunSummary::default();
        }
        let snap = self.interfaces.snapshot();
        let peers = Arc::new(active_peers(&snap));

        let mut tasks = JoinSet::new();
        for (egress, _) in targets(&snap, &[LinkType::Core, LinkType::Child]) {
            let extender = self.extender.clone();
            let sender = self.sender.clone();
            let peers = peers.clone();
            let cancel = cancel.clone();
            tasks.spawn(async move {
                let mut summary = RunSummary::default();
                if cancel.is_cancelled() {
                    return summary;
                }
                let mut segment = PathSegment::new(SegmentInfo::now());
                if let Err(e) = extender.extend(&mut segment, NO_INTERFACE, egress, &peers) {
                    tracing::warn!(egress, error = %e, "failed to originate beacon");
                    summary.failed += 1;
                    return summary;
                }
                summary.extended += 1;
                send_one(&*sender, &cancel, egress, &segment, &mut summary).await;
                summary
            });
        }
        let summary = join_targets(tasks, "originator").await;
        summary.log("originator");
        summary
    }
}

async fn send_one(
    sender: &dyn BeaconSender,
    cancel: &CancelToken,
    egress: IfId,
    segment: &PathSegment,
    summary: &mut RunSummary,
) {
    let sent = tokio::select! {
        biased;
        _ = cancel.cancelled() => return,
        sent = sender.send(egress, segment) => sent,
    };
    match sent {
        Ok(()) => summary.sent += 1,
        Err(e) => {
            tracing::warn!(egress, error = %e, "failed to send beacon");
            summary.failed += 1;
        }
    }
}

// ── Propagator ────────────────────────────────────────────────────────────────

/// Extends selected beacons towards every eligible neighbor.
pub struct Propagator {
    core: bool,
    extender: Arc<dyn Extender>,
    interfaces: Interfaces,
    provider: Arc<dyn BeaconProvider>,
    sender: Arc<dyn BeaconSender>,
    channel_capacity: usize,
}

impl Propagator {
    pub fn new(
        core: bool,
        extender: Arc<dyn Extender>,
        interfaces: Interfaces,
        provider: Arc<dyn BeaconProvider>,
        sender: Arc<dyn BeaconSender>,
        channel_capacity: usize,
    ) -> Self {
        Self {
            core,
            extender,
            interfaces,
            provider,
            sender,
            channel_capacity,
        }
    }

    /// Fails only when the selection cannot be started.
    pub async fn run(&self, cancel: &CancelToken) -> Result<RunSummary> {
        let rx = self
            .provider
            .beacons_to_propagate(cancel)
            .context("query beacons to propagate")?;
        let mut summary = RunSummary::default();
        let beacons = Arc::new(drain(cancel, rx, "propagator", &mut summary).await);
        if beacons.is_empty() || cancel.is_cancelled() {
            summary.log("propagator");
            return Ok(summary);
        }

        let snap = self.interfaces.snapshot();
        let peers = Arc::new(active_peers(&snap));
        let link_type = if self.core { LinkType::Core } else { LinkType::Child };

        let mut tasks = JoinSet::new();
        for (egress, remote) in targets(&snap, &[link_type]) {
            tasks.spawn(propagate_to(
                Target { egress, remote },
                beacons.clone(),
                peers.clone(),
                self.extender.clone(),
                self.sender.clone(),
                self.channel_capacity,
                cancel.clone(),
            ));
        }
        summary.merge(join_targets(tasks, "propagator").await);
        summary.log("propagator");
        Ok(summary)
    }
}

/// Pull a selection stream to its end. Error elements are counted and
/// skipped.
async fn drain(
    cancel: &CancelToken,
    mut rx: mpsc::Receiver<BeaconOrErr>,
    task: &str,
    summary: &mut RunSummary,
) -> Vec<Beacon> {
    let mut beacons = Vec::new();
    loop {
        let item = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            item = rx.recv() => item,
        };
        match item {
            Some(Ok(beacon)) => beacons.push(beacon),
            Some(Err(e)) => {
                tracing::warn!(task, error = %e, "skipping unreadable beacon");
                summary.stream_errors += 1;
            }
            None => break,
        }
    }
    beacons
}

#[derive(Debug, Clone, Copy)]
struct Target {
    egress: IfId,
    remote: IsdAs,
}

async fn propagate_to(
    target: Target,
    beacons: Arc<Vec<Beacon>>,
    peers: Arc<Vec<IfId>>,
    extender: Arc<dyn Extender>,
    sender: Arc<dyn BeaconSender>,
    capacity: usize,
    cancel: CancelToken,
) -> RunSummary {
    let (tx, mut rx) = mpsc::channel::<Result<PathSegment, ExtendError>>(capacity.max(1));

    let producer = {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            for beacon in beacons.iter() {
                if cancel.is_cancelled() {
                    return;
                }
                if beacon.in_ifid == target.egress || beacon.segment.contains_ia(target.remote) {
                    continue;
                }
                let mut segment = beacon.segment.clone();
                let item = extender
                    .extend(&mut segment, beacon.in_ifid, target.egress, &peers)
                    .map(|()| segment);
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
        })
    };

    let mut summary = RunSummary::default();
    loop {
        let item = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            item = rx.recv() => item,
        };
        match item {
            Some(Ok(segment)) => {
                summary.extended += 1;
                send_one(&*sender, &cancel, target.egress, &segment, &mut summary).await;
            }
            Some(Err(e)) => {
                tracing::warn!(egress = target.egress, error = %e, "failed to extend beacon");
                summary.failed += 1;
            }
            None => break,
        }
    }
    drop(rx);
    if let Err(e) = producer.await {
        tracing::warn!(egress = target.egress, error = %e, "beacon producer failed");
        summary.failed += 1;
    }
    summary
}

// ── Registrar ─────────────────────────────────────────────────────────────────

/// Terminates selected beacons and registers them as segments.
pub struct Registrar {
    core: bool,
    extender: Arc<dyn Extender>,
    interfaces: Interfaces,
    provider: Arc<dyn SegmentProvider>,
    registrar: Arc<dyn SegmentRegistrar>,
}

impl Registrar {
    pub fn new(
        core: bool,
        extender: Arc<dyn Extender>,
        interfaces: Interfaces,
        provider: Arc<dyn SegmentProvider>,
        registrar: Arc<dyn SegmentRegistrar>,
    ) -> Self {
        Self {
            core,
            extender,
            interfaces,
            provider,
            registrar,
        }
    }

    /// Core ASes register core segments, everyone else up and down segments.
    pub fn segment_types(core: bool) -> &'static [SegmentType] {
        if core {
            &[SegmentType::Core]
        } else {
            &[SegmentType::Up, SegmentType::Down]
        }
    }

    pub async fn run(&self, cancel: &CancelToken) -> RunSummary {
        let peers = Arc::new(active_peers(&self.interfaces.snapshot()));
        let mut tasks = JoinSet::new();
        for &seg_type in Self::segment_types(self.core) {
            tasks.spawn(register_type(
                seg_type,
                self.provider.clone(),
                self.extender.clone(),
                self.registrar.clone(),
                peers.clone(),
                cancel.clone(),
            ));
        }
        let summary = join_targets(tasks, "registrar").await;
        summary.log("registrar");
        summary
    }
}

async fn register_type(
    seg_type: SegmentType,
    provider: Arc<dyn SegmentProvider>,
    extender: Arc<dyn Extender>,
    registrar: Arc<dyn SegmentRegistrar>,
    peers: Arc<Vec<IfId>>,
    cancel: CancelToken,
) -> RunSummary {
    let mut summary = RunSummary::default();
    let mut rx = match provider.segments_to_register(&cancel, seg_type) {
        Ok(rx) => rx,
        Err(e) => {
            tracing::warn!(%seg_type, error = %e, "cannot query segments to register");
            summary.failed += 1;
            return summary;
        }
    };

    loop {
        let item = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            item = rx.recv() => item,
        };
        let mut beacon = match item {
            Some(Ok(beacon)) => beacon,
            Some(Err(e)) => {
                tracing::warn!(%seg_type, error = %e, "skipping unreadable beacon");
                summary.stream_errors += 1;
                continue;
            }
            None => break,
        };
        if let Err(e) = extender.extend(&mut beacon.segment, beacon.in_ifid, NO_INTERFACE, &peers) {
            tracing::warn!(%seg_type, ifid = beacon.in_ifid, error = %e, "failed to terminate segment");
            summary.failed += 1;
            continue;
        }
        summary.extended += 1;
        let registered = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            r = registrar.register(seg_type, beacon.segment) => r,
        };
        match registered {
            Ok(()) => summary.sent += 1,
            Err(e) => {
                tracing::warn!(%seg_type, error = %e, "failed to register segment");
                summary.failed += 1;
            }
        }
    }
    summary
}
