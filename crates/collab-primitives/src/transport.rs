//! The WebRTC-style peer transport capability (spec §6, "Transport contract").

use async_trait::async_trait;

use crate::model::SessionDescription;

#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum TransportError {
    #[error("failed to create offer: {0}")]
    CreateOffer(String),
    #[error("failed to set local description: {0}")]
    SetLocalDescription(String),
    #[error("failed to set remote description: {0}")]
    SetRemoteDescription(String),
    #[error("failed to create answer: {0}")]
    CreateAnswer(String),
    #[error("data channel is not open")]
    ChannelNotOpen,
    #[error("transport closed")]
    Closed,
}

/// STUN-only ICE configuration (spec: "Non-goals" excludes TURN relay).
#[derive(Clone, Debug)]
pub struct IceConfig {
    pub stun_servers: Vec<String>,
}

impl Default for IceConfig {
    fn default() -> Self {
        Self {
            stun_servers: crate::defaults::DEFAULT_STUN_SERVERS
                .iter()
                .map(|s| (*s).to_owned())
                .collect(),
        }
    }
}

/// Observed RTC peer connection states (spec §4.6).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum IceGatheringState {
    New,
    Gathering,
    Complete,
}

/// A single remote peer connection plus its one named data channel.
///
/// Non-trickle ICE: callers await [`PeerConnection::gathering_complete`]
/// before sending the finalized offer or answer, rather than streaming
/// individual ICE candidates over the signaling channel.
#[async_trait]
pub trait PeerConnection: Send + Sync {
    async fn create_offer(&self) -> Result<SessionDescription, TransportError>;

    async fn create_answer(&self) -> Result<SessionDescription, TransportError>;

    async fn set_local_description(&self, sdp: SessionDescription)
        -> Result<(), TransportError>;

    async fn set_remote_description(
        &self,
        sdp: SessionDescription,
    ) -> Result<(), TransportError>;

    /// Resolves once ICE gathering reaches [`IceGatheringState::Complete`].
    async fn gathering_complete(&self) -> Result<(), TransportError>;

    /// Sends a framed byte payload over the `data` channel.
    async fn send(&self, payload: Vec<u8>) -> Result<(), TransportError>;

    /// Pulls the next inbound payload, or `None` once the channel has closed.
    async fn recv(&self) -> Option<Vec<u8>>;

    fn is_open(&self) -> bool;

    async fn close(&self);
}

/// Factory for outbound/inbound RTC connections, injected into the peer
/// connection manager. Mirrors how `calimero-network-primitives::stream`
/// wraps a transport-layer substream behind a `Sink + Stream` facade, except
/// here the whole negotiation lifecycle — not just the open channel — is
/// behind the trait.
#[async_trait]
pub trait PeerTransport: Send + Sync {
    async fn new_connection(&self, ice: &IceConfig) -> Result<Box<dyn PeerConnection>, TransportError>;
}
