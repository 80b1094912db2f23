//! Periodic daemon loops. Each runs until the shared token is cancelled.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::time::MissedTickBehavior;

use beacon_api::RunLog;
use beacon_core::segment::unix_now;
use beacon_core::IsdAs;
use beacon_services::{
    CancelToken, Interfaces, MemoryBeaconStore, Originator, Propagator, Registrar, SegmentRegistry,
};

use crate::net::UdpTransport;

/// Call `tick` every `period` until cancelled. A slow tick delays the
/// next one instead of piling up.
pub async fn every<F, Fut>(task: &'static str, period: Duration, cancel: CancelToken, mut tick: F)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = ()>,
{
    let mut interval = tokio::time::interval(period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                tracing::debug!(task, "loop stopping");
                return;
            }
            _ = interval.tick() => {}
        }
        tick().await;
    }
}

pub async fn originate_loop(originator: Arc<Originator>, period: Duration, runs: RunLog, cancel: CancelToken) {
    every("originator", period, cancel.clone(), || {
        let originator = originator.clone();
        let runs = runs.clone();
        // A run may not outlive its period.
        let run = cancel.child_with_timeout(period);
        async move {
            let summary = originator.run(&run).await;
            runs.insert("originator".into(), summary);
        }
    })
    .await
}

pub async fn propagate_loop(propagator: Arc<Propagator>, period: Duration, runs: RunLog, cancel: CancelToken) {
    every("propagator", period, cancel.clone(), || {
        let propagator = propagator.clone();
        let runs = runs.clone();
        let run = cancel.child_with_timeout(period);
        async move {
            match propagator.run(&run).await {
                Ok(summary) => {
                    runs.insert("propagator".into(), summary);
                }
                Err(e) => tracing::warn!(error = %e, "propagation run failed"),
            }
        }
    })
    .await
}

pub async fn register_loop(registrar: Arc<Registrar>, period: Duration, runs: RunLog, cancel: CancelToken) {
    every("registrar", period, cancel.clone(), || {
        let registrar = registrar.clone();
        let runs = runs.clone();
        let run = cancel.child_with_timeout(period);
        async move {
            let summary = registrar.run(&run).await;
            runs.insert("registrar".into(), summary);
        }
    })
    .await
}

/// Send keepalives and expire interfaces that stopped answering.
pub async fn keepalive_loop(
    ia: IsdAs,
    transport: UdpTransport,
    interfaces: Interfaces,
    period: Duration,
    timeout: Duration,
    cancel: CancelToken,
) {
    every("keepalive", period, cancel, || {
        let transport = transport.clone();
        let interfaces = interfaces.clone();
        async move {
            transport.send_keepalives(ia).await;
            for ifid in interfaces.expire(timeout) {
                tracing::warn!(ifid, "interface expired, no keepalive");
            }
        }
    })
    .await
}

/// Drop expired beacons and segments.
pub async fn expiry_loop(
    store: MemoryBeaconStore,
    registry: SegmentRegistry,
    period: Duration,
    cancel: CancelToken,
) {
    every("expiry", period, cancel, || {
        let now = unix_now();
        let beacons = store.purge_expired(now);
        let segments = registry.purge_expired(now);
        if beacons + segments > 0 {
            tracing::debug!(beacons, segments, "expired entries removed");
        }
        std::future::ready(())
    })
    .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn every_stops_on_cancel() {
        let cancel = CancelToken::new();
        let ticks = Arc::new(AtomicUsize::new(0));
        let handle = {
            let ticks = ticks.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move {
                every("test", Duration::from_millis(5), cancel, || {
                    ticks.fetch_add(1, Ordering::SeqCst);
                    std::future::ready(())
                })
                .await
            })
        };
        tokio::time::sleep(Duration::from_millis(30)).await;
        cancel.cancel();
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("loop stopped")
            .unwrap();
        assert!(ticks.load(Ordering::SeqCst) >= 1);
    }
}
