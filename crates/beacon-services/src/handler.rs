//! Inbound beacon handler.
//!
//! A beacon received on interface `ifid` is accepted when the interface is
//! active, the segment was sent to us over that link, its shape and
//! signature chain check out, and the store's pre-filter lets it through.

use std::sync::Arc;

use beacon_core::{IfId, IsdAs, SegmentError, ValidationMode};
use thiserror::Error;

use crate::beacon::Beacon;
use crate::cancel::CancelToken;
use crate::ifstate::{InterfaceState, Interfaces};
use crate::store::{BeaconInserter, StoreError};

pub struct BeaconHandler {
    ia: IsdAs,
    interfaces: Interfaces,
    inserter: Arc<dyn BeaconInserter>,
}

impl BeaconHandler {
    pub fn new(ia: IsdAs, interfaces: Interfaces, inserter: Arc<dyn BeaconInserter>) -> Self {
        Self { ia, interfaces, inserter }
    }

    pub async fn handle(&self, cancel: &CancelToken, beacon: Beacon) -> Result<(), HandlerError> {
        let ifid = beacon.in_ifid;
        let intf = self.interfaces.get(ifid).ok_or(HandlerError::UnknownInterface(ifid))?;
        if intf.state() != InterfaceState::Active {
            return Err(HandlerError::InactiveInterface {
                ifid,
                state: intf.state(),
            });
        }

        let segment = &beacon.segment;
        let last = segment.last_entry().ok_or(HandlerError::Invalid(SegmentError::Empty))?;
        if last.next != self.ia {
            return Err(HandlerError::Misdirected {
                expected: self.ia,
                actual: last.next,
            });
        }
        let topo = intf.topo_info();
        if last.local != topo.remote_ia || last.egress() != topo.remote_ifid {
            return Err(HandlerError::WrongLink {
                ifid,
                sender: last.local,
                egress: last.egress(),
            });
        }
        segment.validate(ValidationMode::Beacon)?;
        segment.verify_signatures()?;

        self.inserter.pre_filter(&beacon).map_err(HandlerError::Filtered)?;
        self.inserter.insert_beacons(cancel, vec![beacon]).await?;
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HandlerError {
    #[error("beacon on unknown interface {0}")]
    UnknownInterface(IfId),

    #[error("beacon on interface {ifid} which is {state:?}")]
    InactiveInterface { ifid: IfId, state: InterfaceState },

    #[error("beacon addressed to {actual}, local AS is {expected}")]
    Misdirected { expected: IsdAs, actual: IsdAs },

    #[error("beacon on interface {ifid} was sent by {sender} over its interface {egress}")]
    WrongLink { ifid: IfId, sender: IsdAs, egress: IfId },

    #[error("invalid beacon: {0}")]
    Invalid(#[from] SegmentError),

    #[error("beacon filtered: {0}")]
    Filtered(StoreError),

    #[error("store beacon: {0}")]
    Store(#[from] StoreError),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extender::{DefaultExtender, Extender, ExtenderConfig};
    use crate::ifstate::TopoInfo;
    use crate::store::{MemoryBeaconStore, StorePolicy};
    use beacon_core::crypto::{HopKey, SigningIdentity};
    use beacon_core::segment::{unix_now, SegmentInfo};
    use beacon_core::{LinkType, PathSegment};

    fn ia(asn: u64) -> IsdAs {
        IsdAs::new(1, asn).unwrap()
    }

    /// Origin AS 1 sends over its interface 3 to our interface 4.
    fn originate() -> PathSegment {
        let interfaces = Interfaces::new([TopoInfo {
            ifid: 3,
            link_type: LinkType::Child,
            remote_ia: ia(2),
            remote_ifid: 4,
            mtu: 1400,
        }]);
        interfaces.activate(3);
        let ext = DefaultExtender::new(ExtenderConfig {
            ia: ia(1),
            signer: Arc::new(SigningIdentity::from_secret([1; 32])),
            mac: Arc::new(HopKey::derive(&[1; 32]).unwrap()),
            interfaces,
            mtu: 1400,
            max_exp_time: Some(Arc::new(|| 63)),
            task: "test".into(),
        });
        let mut seg = PathSegment::new(SegmentInfo::new(unix_now() as u32, 42));
        ext.extend(&mut seg, 0, 3, &[]).unwrap();
        seg
    }

    fn local() -> (BeaconHandler, MemoryBeaconStore, Interfaces) {
        let interfaces = Interfaces::new([TopoInfo {
            ifid: 4,
            link_type: LinkType::Parent,
            remote_ia: ia(1),
            remote_ifid: 3,
            mtu: 1400,
        }]);
        let store = MemoryBeaconStore::new(
            StorePolicy {
                local_ia: ia(2),
                core: false,
                best_set_size: 5,
                max_hops: 8,
                channel_capacity: 4,
            },
            interfaces.clone(),
        );
        let handler = BeaconHandler::new(ia(2), interfaces.clone(), Arc::new(store.clone()));
        (handler, store, interfaces)
    }

    #[tokio::test]
    async fn accepts_well_formed_beacon() {
        let (handler, store, interfaces) = local();
        interfaces.activate(4);
        handler
            .handle(&CancelToken::new(), Beacon::new(originate(), 4))
            .await
            .unwrap();
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn rejects_on_inactive_or_unknown_interface() {
        let (handler, store, _) = local();
        let cancel = CancelToken::new();
        assert_eq!(
            handler.handle(&cancel, Beacon::new(originate(), 4)).await,
            Err(HandlerError::InactiveInterface {
                ifid: 4,
                state: InterfaceState::Inactive
            })
        );
        assert_eq!(
            handler.handle(&cancel, Beacon::new(originate(), 8)).await,
            Err(HandlerError::UnknownInterface(8))
        );
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn rejects_beacon_for_someone_else() {
        let (_, store, interfaces) = local();
        interfaces.activate(4);
        let handler = BeaconHandler::new(ia(9), interfaces, Arc::new(store.clone()));
        assert_eq!(
            handler.handle(&CancelToken::new(), Beacon::new(originate(), 4)).await,
            Err(HandlerError::Misdirected {
                expected: ia(9),
                actual: ia(2)
            })
        );
    }

    #[tokio::test]
    async fn rejects_forged_signature() {
        let (handler, store, interfaces) = local();
        interfaces.activate(4);
        let mut value = serde_json::to_value(originate()).unwrap();
        value["as_entries"][0]["entry"]["mtu"] = 9000.into();
        let forged: PathSegment = serde_json::from_value(value).unwrap();
        let err = handler
            .handle(&CancelToken::new(), Beacon::new(forged, 4))
            .await
            .unwrap_err();
        assert!(matches!(err, HandlerError::Invalid(SegmentError::Signature { index: 0, .. })));
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn pre_filter_runs_before_insert() {
        let (handler, store, interfaces) = local();
        interfaces.activate(4);
        let mut value = serde_json::to_value(originate()).unwrap();
        value["info"]["timestamp"] = 1_000.into();
        let stale: PathSegment = serde_json::from_value(value).unwrap();
        // The timestamp is signed, so the signature check fires first.
        assert!(matches!(
            handler.handle(&CancelToken::new(), Beacon::new(stale, 4)).await,
            Err(HandlerError::Invalid(SegmentError::Signature { .. }))
        ));

        let looped = BeaconHandler::new(ia(2), interfaces, Arc::new(MemoryBeaconStore::new(
            StorePolicy {
                local_ia: ia(1),
                core: false,
                best_set_size: 5,
                max_hops: 8,
                channel_capacity: 4,
            },
            Interfaces::default(),
        )));
        assert_eq!(
            looped.handle(&CancelToken::new(), Beacon::new(originate(), 4)).await,
            Err(HandlerError::Filtered(StoreError::Loop(ia(1))))
        );
        assert!(store.is_empty());
    }
}
