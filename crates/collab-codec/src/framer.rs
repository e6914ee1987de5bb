//! Splits an outbound CRDT update into one or more wire envelopes
//! (spec §6, "Message framing" and testable property #6).

use collab_primitives::defaults::{CHUNK_HEADER_SIZE, MAX_CHUNK_SIZE, MIN_BROADCAST_UPDATE_SIZE};
use collab_primitives::model::WireMessage;
use collab_primitives::peer_id::PeerId;

fn chunk_budget() -> usize {
    MAX_CHUNK_SIZE.saturating_sub(CHUNK_HEADER_SIZE)
}

fn message_id(self_id: &PeerId, now_ms: i64) -> String {
    format!("{self_id}-{now_ms}")
}

/// Frames `update` for the wire. Updates shorter than
/// [`MIN_BROADCAST_UPDATE_SIZE`] are dropped (too small to be worth the round
/// trip). Updates that fit the per-chunk budget go out as a single `sync`
/// message; larger ones are split into ordered `sync-chunk` messages the
/// receiver reassembles before applying, tagged with a `"{selfId}-{now}"`
/// message id.
#[must_use]
pub fn frame_update(update: &[u8], self_id: &PeerId, now_ms: i64) -> Vec<WireMessage> {
    if update.len() < MIN_BROADCAST_UPDATE_SIZE {
        return Vec::new();
    }
    let budget = chunk_budget();
    if update.len() <= budget {
        return vec![WireMessage::Sync {
            update: update.to_vec(),
        }];
    }

    let message_id = message_id(self_id, now_ms);
    let chunks: Vec<&[u8]> = update.chunks(budget).collect();
    let total_chunks = chunks.len() as u32;
    chunks
        .into_iter()
        .enumerate()
        .map(|(i, chunk)| WireMessage::SyncChunk {
            message_id: message_id.clone(),
            chunk: i as u32,
            total_chunks,
            update: chunk.to_vec(),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn peer() -> PeerId {
        PeerId::from("aaaa")
    }

    #[test]
    fn tiny_update_is_dropped() {
        assert!(frame_update(&[1, 2], &peer(), 0).is_empty());
    }

    #[test]
    fn small_update_frames_as_single_sync() {
        let update = vec![0u8; 128];
        let framed = frame_update(&update, &peer(), 0);
        assert_eq!(framed.len(), 1);
        assert!(matches!(framed[0], WireMessage::Sync { .. }));
    }

    #[test]
    fn oversized_update_splits_into_ordered_chunks() {
        let update = vec![7u8; chunk_budget() * 3 + 17];
        let framed = frame_update(&update, &peer(), 1_700_000_000_000);
        assert!(framed.len() > 1);
        for (i, msg) in framed.iter().enumerate() {
            match msg {
                WireMessage::SyncChunk {
                    chunk,
                    total_chunks,
                    message_id,
                    ..
                } => {
                    assert_eq!(*chunk, i as u32);
                    assert_eq!(*total_chunks as usize, framed.len());
                    assert_eq!(message_id, "aaaa-1700000000000");
                }
                _ => panic!("expected sync-chunk"),
            }
        }
    }
}
