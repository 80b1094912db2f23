use crate::*;

use beacon_services::{InterfaceState, RunSummary};

#[tokio::test]
async fn one_round_reaches_the_leaf() -> Result<()> {
    let topo = Topology::chain(MacScheme::Current)?;
    topo.beacon_round().await?;

    assert!(topo.node(1).store.is_empty());
    assert_eq!(topo.node(2).store.len(), 1);
    assert_eq!(topo.node(3).store.len(), 1);
    // Peering links carry no beacons.
    assert!(topo.node(4).store.is_empty());

    let at_leaf = &topo.node(3).store.beacons()[0];
    assert_eq!(at_leaf.in_ifid, 32);
    assert_eq!(at_leaf.segment.len(), 2);
    assert_eq!(at_leaf.segment.first_ia(), Some(ia(1)));
    Ok(())
}

#[tokio::test]
async fn repeated_rounds_keep_one_beacon_per_path() -> Result<()> {
    let topo = Topology::chain(MacScheme::Current)?;
    for _ in 0..3 {
        topo.beacon_round().await?;
    }
    assert_eq!(topo.node(2).store.len(), 1);
    assert_eq!(topo.node(3).store.len(), 1);

    for _ in 0..2 {
        topo.node(3).registrar().run(&CancelToken::new()).await;
    }
    assert_eq!(topo.node(3).registry.len(), 2);
    Ok(())
}

#[tokio::test]
async fn core_as_does_not_propagate_down() -> Result<()> {
    let topo = Topology::chain(MacScheme::Current)?;
    let cancel = CancelToken::new();
    topo.node(1).originator(topo.wire(1)).run(&cancel).await;
    // A core propagator only follows core links, and AS 1 has none.
    let summary = topo.node(1).propagator(topo.wire(1)).run(&cancel).await.unwrap();
    assert_eq!(summary, RunSummary::default());
    assert!(topo.node(3).store.is_empty());
    Ok(())
}

#[tokio::test]
async fn revoked_egress_stops_propagation() -> Result<()> {
    let topo = Topology::chain(MacScheme::Current)?;
    topo.node(2).interfaces.revoke(23);
    topo.beacon_round().await?;
    assert_eq!(topo.node(2).store.len(), 1);
    assert!(topo.node(3).store.is_empty());
    Ok(())
}

#[tokio::test]
async fn inactive_receiver_counts_as_send_failure() -> Result<()> {
    let topo = Topology::chain(MacScheme::Current)?;
    let cancel = CancelToken::new();
    topo.node(1).originator(topo.wire(1)).run(&cancel).await;

    topo.node(3).interfaces.set_state(32, InterfaceState::Expired);
    let summary = topo.node(2).propagator(topo.wire(2)).run(&cancel).await.unwrap();
    assert_eq!(
        summary,
        RunSummary {
            extended: 1,
            sent: 0,
            failed: 1,
            stream_errors: 0
        }
    );
    assert!(topo.node(3).store.is_empty());
    Ok(())
}

#[tokio::test]
async fn peer_goes_missing_without_breaking_extension() -> Result<()> {
    let topo = Topology::chain(MacScheme::Current)?;
    topo.node(2).interfaces.revoke(24);
    topo.beacon_round().await?;

    let at_leaf = &topo.node(3).store.beacons()[0];
    assert!(at_leaf.segment.as_entries()[1].entry.peer_entries.is_empty());
    Ok(())
}

#[tokio::test]
async fn cancelled_round_sends_nothing() -> Result<()> {
    let topo = Topology::chain(MacScheme::Current)?;
    let cancel = CancelToken::new();
    cancel.cancel();
    let summary = topo.node(1).originator(topo.wire(1)).run(&cancel).await;
    assert_eq!(summary.sent, 0);
    assert!(topo.node(2).store.is_empty());
    assert!(topo.node(2).propagator(topo.wire(2)).run(&cancel).await.is_err());
    Ok(())
}
