//! Internal event stream the session coordinator folds into
//! [`collab-session`'s public `SessionEvent`](../collab_session/events/enum.SessionEvent.html).

use collab_primitives::peer_id::PeerId;

#[derive(Clone, Debug, PartialEq)]
pub enum SyncEvent {
    /// A snapshot write completed; `version` is the session-local counter
    /// from spec §4.3 ("a counter is sufficient").
    DocumentPersisted { version: u64 },
    /// A batched local update was merged and broadcast.
    SyncCompleted { update_size: usize },
    /// A remote awareness update from `peer_id` was applied; `state` is the
    /// raw JSON value the peer published for the touched client ids.
    AwarenessUpdated {
        peer_id: PeerId,
        state: serde_json::Value,
    },
    Error { message: String, context: &'static str },
}
