//! Shared types for the collaboration engine.
//!
//! This crate has no opinion on *how* a document is replicated or *how* bytes
//! reach another peer — it only defines the data model (§3 of the design) and
//! the capability traits (§6) that the rest of the engine is generic over.
//! Concrete CRDT and transport implementations live outside this workspace;
//! the `testing` feature ships small reference implementations so the other
//! crates can exercise real control flow in their test suites without one.

pub mod awareness;
pub mod defaults;
pub mod document;
pub mod model;
pub mod paths;
pub mod peer_id;
pub mod substrate;
pub mod transport;

#[cfg(feature = "testing")]
pub mod testing;

pub use awareness::AwarenessReplica;
pub use document::{DocumentReplica, UpdateOrigin};
pub use peer_id::PeerId;
pub use substrate::Substrate;
pub use transport::PeerTransport;
