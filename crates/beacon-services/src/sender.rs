//! Outbound seams of the pipeline: neighbor sends and segment registration.

use async_trait::async_trait;
use beacon_core::{IfId, PathSegment};
use thiserror::Error;

use crate::beacon::SegmentType;

/// Hands an extended beacon to the neighbor behind `egress`.
#[async_trait]
pub trait BeaconSender: Send + Sync {
    async fn send(&self, egress: IfId, segment: &PathSegment) -> Result<(), SendError>;
}

/// Accepts terminated segments for registration.
#[async_trait]
pub trait SegmentRegistrar: Send + Sync {
    async fn register(&self, seg_type: SegmentType, segment: PathSegment) -> Result<(), SendError>;
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SendError {
    #[error("no transport for interface {0}")]
    NoTransport(IfId),

    #[error("interface {ifid}: {reason}")]
    Io { ifid: IfId, reason: String },

    #[error("encode segment: {0}")]
    Encode(String),

    #[error("registration rejected: {0}")]
    Rejected(String),
}
