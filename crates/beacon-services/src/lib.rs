//! beacon-services — interface liveness, segment extension, the beacon
//! store and the originate / propagate / register pipeline.

pub mod beacon;
pub mod cancel;
pub mod extender;
pub mod handler;
pub mod hopauth;
pub mod ifstate;
pub mod pipeline;
pub mod registry;
pub mod sender;
pub mod store;

pub use beacon::{Beacon, BeaconOrErr, SegmentType};
pub use cancel::CancelToken;
pub use extender::{
    new_extender, DefaultExtender, ExpTimeFn, ExtendError, Extender, ExtenderConfig, LegacyExtender,
    ResolveError,
};
pub use handler::{BeaconHandler, HandlerError};
pub use ifstate::{Interface, InterfaceSnapshot, InterfaceState, Interfaces, TopoInfo};
pub use pipeline::{Originator, Propagator, Registrar, RunSummary};
pub use registry::{RegisteredSegment, SegmentRegistry};
pub use sender::{BeaconSender, SegmentRegistrar, SendError};
pub use store::{
    BeaconInserter, BeaconMeta, BeaconProvider, MemoryBeaconStore, SegmentProvider, StoreError,
    StorePolicy,
};
