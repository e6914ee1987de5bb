//! Change-detection, batching, and broadcast for the document and its
//! awareness state (spec §4.3, §4.8, §4.9).
//!
//! Sits above `collab-network`: both pipelines here talk to a
//! [`collab_network::PeerConnectionManager`] to fan updates out over the
//! mesh, the same way the teacher's `calimero-sync` crate sits above
//! `calimero-network` rather than re-implementing transport concerns.

pub mod awareness_pipeline;
pub mod config;
pub mod error;
pub mod events;
pub mod persistence;
pub mod update_pipeline;

pub use awareness_pipeline::AwarenessPipeline;
pub use config::SyncConfig;
pub use error::PersistError;
pub use events::SyncEvent;
pub use persistence::SnapshotStore;
pub use update_pipeline::UpdatePipeline;
