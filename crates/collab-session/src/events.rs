//! The typed event stream embedders subscribe to, in place of a string-keyed
//! listener map (spec §4.10 "Events", §9 "`AdapterEvent`").

use collab_primitives::peer_id::PeerId;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConnectionStatus {
    Connecting,
    Connected,
    Disconnected,
}

#[derive(Clone, Debug, PartialEq)]
pub enum SessionEvent {
    ConnectionStateChanged {
        state: ConnectionStatus,
    },
    /// `user` is `None` until this peer's first awareness publish arrives:
    /// the peer record (spec §3) carries only `id`/`lastSeen`, not a display
    /// name, so there is nothing to report synchronously at join time.
    PeerJoined {
        peer_id: PeerId,
        user: Option<serde_json::Value>,
    },
    PeerLeft {
        peer_id: PeerId,
    },
    DocumentPersisted {
        doc_id: String,
        version: u64,
    },
    SyncCompleted {
        doc_id: String,
        update_size: usize,
    },
    AwarenessUpdated {
        peer_id: PeerId,
        user: serde_json::Value,
    },
    Error {
        error: String,
        context: &'static str,
    },
}
