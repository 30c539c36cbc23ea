//! The wire-protocol seams.
//!
//! The gateway core never encodes or decodes the imaging protocol itself:
//! an implementation of [`StoreScp`] drives an accepted connection and hands
//! decoded instances to an [`InstanceSink`]; an implementation of
//! [`PeerConnector`] opens outbound associations for echo probes and study
//! delivery. The in-process [`sim`] stack implements both seams for tests
//! and local development; a production DIMSE stack plugs in the same way.

pub mod association;
pub mod error;
pub mod sim;
pub mod sop_class;
pub mod traits;

pub use association::{AssociationContext, ListenerContext, PeerEndpoint, PresentationContext};
pub use error::{ProtocolError, Result};
pub use traits::{
    InstanceSink, PeerConnector, PeerSession, ReceivedInstance, StoreOutcome, StoreScp,
};
