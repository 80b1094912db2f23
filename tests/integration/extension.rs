use crate::*;

use beacon_core::ValidationMode;
use beacon_services::hopauth::{verify_current, verify_legacy};
use beacon_services::SegmentType;

/// Run one round and register at the leaf. Returns the leaf's down segment.
async fn leaf_segment(topo: &Topology) -> Result<PathSegment> {
    topo.beacon_round().await?;
    let summary = topo.node(3).registrar().run(&CancelToken::new()).await;
    assert_eq!(summary.sent, 2, "up and down registration at AS 3");
    let down = topo.node(3).registry.segments(Some(SegmentType::Down));
    assert_eq!(down.len(), 1);
    Ok(down[0].segment.clone())
}

fn assert_chain_shape(segment: &PathSegment) {
    segment.validate(ValidationMode::Segment).unwrap();
    segment.verify_signatures().unwrap();

    let entries: Vec<_> = segment.as_entries().iter().map(|s| &s.entry).collect();
    assert_eq!(entries.len(), 3);
    assert_eq!(
        entries.iter().map(|e| (e.local, e.ingress(), e.egress(), e.next)).collect::<Vec<_>>(),
        vec![
            (ia(1), 0, 1, ia(2)),
            (ia(2), 21, 23, ia(3)),
            (ia(3), 32, 0, IsdAs::WILDCARD),
        ]
    );
    assert_eq!(entries[0].hop_entry.ingress_mtu, 0);
    assert_eq!(entries[1].hop_entry.ingress_mtu, 1400);
    assert!(entries.iter().all(|e| e.mtu == MTU));

    // AS 2 advertises its peering link to AS 4.
    assert!(entries[0].peer_entries.is_empty());
    assert_eq!(entries[1].peer_entries.len(), 1);
    let peer = &entries[1].peer_entries[0];
    assert_eq!((peer.peer, peer.peer_interface, peer.peer_mtu), (ia(4), 42, 1400));
    assert_eq!((peer.hop_field.cons_ingress, peer.hop_field.cons_egress), (24, 23));
}

#[tokio::test]
async fn current_scheme_chain_verifies_at_every_hop() -> Result<()> {
    let topo = Topology::chain(MacScheme::Current)?;
    let segment = leaf_segment(&topo).await?;
    assert_chain_shape(&segment);

    for (index, asn) in [1u64, 2, 3].into_iter().enumerate() {
        let key = &*topo.node(asn).hop_key;
        assert!(verify_current(key, &segment, index).unwrap(), "hop {index} of AS {asn}");
    }
    // Keys are per AS.
    assert!(!verify_current(&*topo.node(1).hop_key, &segment, 1).unwrap());
    Ok(())
}

#[tokio::test]
async fn legacy_scheme_chain_verifies_at_every_hop() -> Result<()> {
    let topo = Topology::chain(MacScheme::Legacy)?;
    let segment = leaf_segment(&topo).await?;
    assert_chain_shape(&segment);

    for (index, asn) in [1u64, 2, 3].into_iter().enumerate() {
        let key = &*topo.node(asn).hop_key;
        assert!(verify_legacy(key, &segment, index).unwrap(), "hop {index} of AS {asn}");
    }
    for signed in segment.as_entries() {
        assert_eq!(signed.entry.hop_entry.hop_field.mac[3..], [0, 0, 0]);
    }
    assert!(!verify_legacy(&*topo.node(3).hop_key, &segment, 0).unwrap());
    Ok(())
}

#[tokio::test]
async fn up_and_down_segments_match() -> Result<()> {
    let topo = Topology::chain(MacScheme::Current)?;
    let down = leaf_segment(&topo).await?;
    let up = topo.node(3).registry.segments(Some(SegmentType::Up));
    assert_eq!(up.len(), 1);
    assert_eq!(up[0].segment, down);
    Ok(())
}

#[tokio::test]
async fn tampered_hop_is_rejected_downstream() -> Result<()> {
    let topo = Topology::chain(MacScheme::Current)?;
    let cancel = CancelToken::new();
    topo.node(1).originator(topo.wire(1)).run(&cancel).await;

    // Rewrite AS 1's expiration in the stored beacon. AS 2 extends it
    // without noticing; AS 3 checks signatures and rejects it.
    let stored = topo.node(2).store.beacons();
    assert_eq!(stored.len(), 1);
    let mut value = serde_json::to_value(&stored[0].segment).unwrap();
    value["as_entries"][0]["entry"]["hop_entry"]["hop_field"]["exp_time"] = 1.into();
    let forged: PathSegment = serde_json::from_value(value).unwrap();
    assert!(forged.verify_signatures().is_err());

    let mut segment = forged;
    topo.node(2)
        .extender()
        .extend(&mut segment, 21, 23, &[])
        .unwrap();
    let err = topo.wire(2).send(23, &segment).await.unwrap_err();
    assert!(matches!(err, SendError::Rejected(_)), "{err}");
    assert!(topo.node(3).store.is_empty());
    Ok(())
}
