//! Durable and on-wire record shapes (spec §3, §6).

use serde::{Deserialize, Serialize};

use crate::peer_id::PeerId;

/// `rooms/peers/{peerId}` — ephemeral, auto-removed on disconnect by the substrate.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerRecord {
    pub id: PeerId,
    #[serde(rename = "lastSeen")]
    pub last_seen: i64,
}

/// `signaling/{to}/{autoId}` — one offer or answer.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignalEnvelope {
    #[serde(rename = "type")]
    pub kind: SignalKind,
    pub sdp: SessionDescription,
    pub from: PeerId,
    pub to: PeerId,
    pub timestamp: i64,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SignalKind {
    Offer,
    Answer,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionDescription {
    #[serde(rename = "type")]
    pub kind: SignalKind,
    pub sdp: String,
}

/// `snapshots/latest` and `snapshots/{label}_{ts}`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentSnapshot {
    /// base64 of the CRDT full-state bytes.
    pub update: String,
    /// base64 of the CRDT state-vector bytes.
    #[serde(rename = "stateVector")]
    pub state_vector: String,
    #[serde(rename = "updatedAt")]
    pub updated_at: i64,
    pub version: u64,
    /// Lowercase hex SHA-256 over the raw (pre-base64) `update` bytes.
    pub checksum: String,
}

/// Legacy backward-compatible record read from the flat `documents` path.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LegacyDocumentRecord {
    pub update: String,
}

/// On-wire data-channel envelopes (spec §6).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum WireMessage {
    Sync {
        update: Vec<u8>,
    },
    SyncChunk {
        #[serde(rename = "messageId")]
        message_id: String,
        chunk: u32,
        #[serde(rename = "totalChunks")]
        total_chunks: u32,
        update: Vec<u8>,
    },
    Awareness {
        update: Vec<u8>,
        compressed: bool,
    },
}

/// One entry in the bounded, time-ordered in-memory message buffer.
#[derive(Clone, Copy, Debug)]
pub struct MessageBufferEntry {
    pub timestamp_ms: i64,
    pub size: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wire_message_round_trips_through_json() {
        let msg = WireMessage::SyncChunk {
            message_id: "peer-1".to_owned(),
            chunk: 2,
            total_chunks: 3,
            update: vec![1, 2, 3],
        };
        let json = serde_json::to_string(&msg).unwrap();
        let back: WireMessage = serde_json::from_str(&json).unwrap();
        assert_eq!(msg, back);
    }

    #[test]
    fn signal_kind_serializes_lowercase() {
        assert_eq!(serde_json::to_string(&SignalKind::Offer).unwrap(), "\"offer\"");
    }
}
