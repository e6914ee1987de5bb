//! The peer manager's typed event stream (spec §9: replaces a string-keyed
//! listener map with a closed variant set).

use collab_primitives::PeerId;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum NetworkEvent {
    PeerJoined { peer_id: PeerId },
    PeerLeft { peer_id: PeerId },
    /// A `sync`/`sync-chunk`/`awareness` envelope arrived from `peer_id` and
    /// was fully reassembled, carrying the CRDT or awareness payload.
    MessageReceived { peer_id: PeerId, payload: Payload },
    Error { message: String, context: &'static str },
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Payload {
    Sync(Vec<u8>),
    Awareness(Vec<u8>),
}

pub type EventSink = tokio::sync::mpsc::UnboundedSender<NetworkEvent>;
