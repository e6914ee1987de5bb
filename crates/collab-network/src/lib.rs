//! Discovery, signaling, and RTC connection management for the direct
//! peer-to-peer mesh (spec §4.4, §4.5, §4.6).
//!
//! Three collaborating pieces, each independently testable against a
//! [`collab_primitives::Substrate`] mock:
//!
//! - [`presence`]: liveness record publishing and stale-peer GC (C4).
//! - [`signaling`]: per-peer SDP offer/answer inbox (C5).
//! - [`manager`]: discovery, non-trickle ICE negotiation, data-channel I/O,
//!   and the cleanup paths that own both a live connection and its
//!   presence/signaling footprint (C6).
//!
//! [`state`] is the explicit per-peer negotiation state machine the spec's
//! redesign notes call for in place of ad hoc promise chains.

pub mod config;
pub mod events;
pub mod manager;
pub mod presence;
pub mod signaling;
pub mod state;

pub use config::NetworkConfig;
pub use events::{EventSink, NetworkEvent, Payload};
pub use manager::{NetworkError, PeerConnectionManager};
pub use presence::PresenceService;
pub use signaling::SignalingChannel;
pub use state::{IllegalTransition, PeerConnState};
