use crate::*;

use std::time::Duration;

use beacon_core::segment::unix_now;
use beacon_services::{BeaconInserter, SegmentType};

/// AS 1 (core) reaches AS 3 directly and through AS 2.
///
///   AS 1 if 1 ──child── if 21 AS 2 if 23 ──child── if 32 AS 3
///   AS 1 if 2 ──child── if 31 AS 3
fn triangle() -> Result<Topology> {
    let scheme = MacScheme::Current;
    let nodes = BTreeMap::from([
        (
            1,
            Node::new(1, true, scheme, &[(1, LinkType::Child, 2, 21), (2, LinkType::Child, 3, 31)])?,
        ),
        (
            2,
            Node::new(2, false, scheme, &[(21, LinkType::Parent, 1, 1), (23, LinkType::Child, 3, 32)])?,
        ),
        (
            3,
            Node::new(3, false, scheme, &[(31, LinkType::Parent, 1, 2), (32, LinkType::Parent, 2, 23)])?,
        ),
    ]);
    for node in nodes.values() {
        node.bring_up();
    }
    let mut w1 = Wire::default();
    w1.connect(1, &nodes[&2], 21);
    w1.connect(2, &nodes[&3], 31);
    let mut w2 = Wire::default();
    w2.connect(23, &nodes[&3], 32);
    let wires = BTreeMap::from([(1, Arc::new(w1)), (2, Arc::new(w2)), (3, Arc::new(Wire::default()))]);
    Ok(Topology { nodes, wires })
}

#[tokio::test]
async fn selection_prefers_shorter_paths() -> Result<()> {
    let topo = triangle()?;
    topo.beacon_round().await?;

    let leaf = topo.node(3);
    assert_eq!(leaf.store.len(), 2);
    let lens: Vec<usize> = leaf.store.beacons().iter().map(|b| b.segment.len()).collect();
    assert_eq!(lens, vec![1, 2]);

    leaf.registrar().run(&CancelToken::new()).await;
    let up = leaf.registry.segments(Some(SegmentType::Up));
    assert_eq!(up.iter().map(|r| r.segment.len()).collect::<Vec<_>>(), vec![2, 3]);
    Ok(())
}

#[tokio::test]
async fn duplicate_delivery_keeps_one_record() -> Result<()> {
    let topo = Topology::chain(MacScheme::Current)?;
    topo.node(1).originator(topo.wire(1)).run(&CancelToken::new()).await;
    let beacon = topo.node(2).store.beacons().remove(0);

    topo.node(2).handler.handle(&CancelToken::new(), beacon.clone()).await.unwrap();
    let stored = topo
        .node(2)
        .store
        .insert_beacons(&CancelToken::new(), vec![beacon])
        .await
        .unwrap();
    assert_eq!(stored, 0);
    assert_eq!(topo.node(2).store.len(), 1);
    Ok(())
}

#[tokio::test]
async fn expired_state_is_purged() -> Result<()> {
    let topo = Topology::chain(MacScheme::Current)?;
    topo.beacon_round().await?;
    let leaf = topo.node(3);
    leaf.registrar().run(&CancelToken::new()).await;
    assert_eq!(leaf.registry.len(), 2);

    assert_eq!(leaf.store.purge_expired(unix_now()), 0);
    assert_eq!(leaf.registry.purge_expired(unix_now()), 0);

    // exp_time 63 is 64 * 337.5 s, well under a week.
    let later = unix_now() + Duration::from_secs(7 * 24 * 3600).as_secs();
    assert_eq!(leaf.store.purge_expired(later), 1);
    assert_eq!(leaf.registry.purge_expired(later), 2);
    assert!(leaf.store.is_empty());
    assert!(leaf.registry.is_empty());
    Ok(())
}
