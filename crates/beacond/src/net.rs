//! Underlay transport, one UDP socket per inter-domain interface.
//!
//! Datagrams are JSON: keepalives that keep an interface active, and
//! beacons handed to the [`BeaconHandler`].

use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::net::UdpSocket;

use beacon_core::config::InterfaceConfig;
use beacon_core::{IfId, IsdAs, PathSegment};
use beacon_services::{Beacon, BeaconHandler, BeaconSender, CancelToken, Interfaces, SendError};

/// Largest UDP payload over IPv4.
pub const MAX_DATAGRAM: usize = 65_507;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum Datagram {
    /// Sent by `ia` over its interface `ifid`.
    Keepalive { ia: IsdAs, ifid: IfId },
    Beacon { segment: PathSegment },
}

#[derive(Clone)]
pub struct Link {
    pub ifid: IfId,
    pub socket: Arc<UdpSocket>,
    pub remote: SocketAddr,
}

#[derive(Clone)]
pub struct UdpTransport {
    links: Arc<BTreeMap<IfId, Link>>,
}

impl UdpTransport {
    pub async fn bind(interfaces: &[InterfaceConfig]) -> Result<Self> {
        let mut links = BTreeMap::new();
        for intf in interfaces {
            let socket = UdpSocket::bind(intf.local_addr)
                .await
                .with_context(|| format!("failed to bind interface {} on {}", intf.ifid, intf.local_addr))?;
            tracing::info!(ifid = intf.ifid, local = %intf.local_addr, remote = %intf.remote_addr, "interface bound");
            links.insert(
                intf.ifid,
                Link {
                    ifid: intf.ifid,
                    socket: Arc::new(socket),
                    remote: intf.remote_addr,
                },
            );
        }
        Ok(Self { links: Arc::new(links) })
    }

    pub fn links(&self) -> impl Iterator<Item = &Link> {
        self.links.values()
    }

    async fn send_datagram(&self, ifid: IfId, datagram: &Datagram) -> Result<(), SendError> {
        let link = self.links.get(&ifid).ok_or(SendError::NoTransport(ifid))?;
        let bytes = serde_json::to_vec(datagram).map_err(|e| SendError::Encode(e.to_string()))?;
        if bytes.len() > MAX_DATAGRAM {
            return Err(SendError::Encode(format!("datagram of {} bytes is too large", bytes.len())));
        }
        link.socket
            .send_to(&bytes, link.remote)
            .await
            .map_err(|e| SendError::Io {
                ifid,
                reason: e.to_string(),
            })?;
        Ok(())
    }

    /// One keepalive on every interface. Failures are logged and skipped.
    pub async fn send_keepalives(&self, ia: IsdAs) {
        for &ifid in self.links.keys() {
            if let Err(e) = self.send_datagram(ifid, &Datagram::Keepalive { ia, ifid }).await {
                tracing::debug!(ifid, error = %e, "keepalive send failed");
            }
        }
    }
}

#[async_trait]
impl BeaconSender for UdpTransport {
    async fn send(&self, egress: IfId, segment: &PathSegment) -> Result<(), SendError> {
        let datagram = Datagram::Beacon {
            segment: segment.clone(),
        };
        self.send_datagram(egress, &datagram).await
    }
}

/// Receive on `link` until cancelled.
pub async fn recv_loop(link: Link, interfaces: Interfaces, handler: Arc<BeaconHandler>, cancel: CancelToken) {
    let mut buf = vec![0u8; MAX_DATAGRAM];
    tracing::debug!(ifid = link.ifid, "receiver starting");
    loop {
        let received = tokio::select! {
            _ = cancel.cancelled() => {
                tracing::debug!(ifid = link.ifid, "receiver stopping");
                return;
            }
            r = link.socket.recv_from(&mut buf) => r,
        };
        let (len, from) = match received {
            Ok(r) => r,
            Err(e) => {
                tracing::warn!(ifid = link.ifid, error = %e, "recv_from failed");
                continue;
            }
        };
        if from != link.remote {
            tracing::trace!(ifid = link.ifid, %from, "ignoring datagram from unexpected sender");
            continue;
        }
        match serde_json::from_slice::<Datagram>(&buf[..len]) {
            Ok(datagram) => handle_datagram(link.ifid, datagram, &interfaces, &handler, &cancel).await,
            Err(e) => tracing::debug!(ifid = link.ifid, error = %e, "undecodable datagram"),
        }
    }
}

pub async fn handle_datagram(
    ifid: IfId,
    datagram: Datagram,
    interfaces: &Interfaces,
    handler: &BeaconHandler,
    cancel: &CancelToken,
) {
    match datagram {
        Datagram::Keepalive { ia, ifid: remote_ifid } => {
            let Some(intf) = interfaces.get(ifid) else {
                return;
            };
            let topo = intf.topo_info();
            if topo.remote_ia != ia || topo.remote_ifid != remote_ifid {
                tracing::warn!(ifid, %ia, remote_ifid, "keepalive does not match topology");
                return;
            }
            if interfaces.activate(ifid) {
                tracing::info!(ifid, remote = %ia, "interface active");
            }
        }
        Datagram::Beacon { segment } => match handler.handle(cancel, Beacon::new(segment, ifid)).await {
            Ok(()) => tracing::debug!(ifid, "beacon accepted"),
            Err(e) => tracing::debug!(ifid, error = %e, "beacon rejected"),
        },
    }
}
