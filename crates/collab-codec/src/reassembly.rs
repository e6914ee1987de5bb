//! Receive-side counterpart to [`crate::framer`]: buffers `sync-chunk`
//! envelopes per `(peer, messageId)` until every chunk has arrived.

use std::collections::HashMap;

use tracing::trace;

use crate::error::CodecError;

#[derive(Default)]
struct Pending {
    total_chunks: u32,
    received: Vec<Option<Vec<u8>>>,
    received_count: u32,
}

/// Keyed by `(peer key, messageId)` so two peers' in-flight chunked messages
/// never collide even if they happen to mint the same `"{selfId}-{now}"` id.
#[derive(Default)]
pub struct ChunkReassembler {
    pending: HashMap<(String, String), Pending>,
}

impl ChunkReassembler {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Feeds one chunk in. Returns the fully reassembled payload once every
    /// chunk for `message_id` has arrived, consuming that entry; otherwise
    /// returns `None` and keeps buffering.
    pub fn ingest(
        &mut self,
        peer_key: &str,
        message_id: &str,
        chunk: u32,
        total_chunks: u32,
        data: Vec<u8>,
    ) -> Result<Option<Vec<u8>>, CodecError> {
        if chunk >= total_chunks {
            return Err(CodecError::ChunkOutOfRange {
                message_id: message_id.to_owned(),
                chunk,
                total_chunks,
            });
        }
        let key = (peer_key.to_owned(), message_id.to_owned());
        let entry = self.pending.entry(key.clone()).or_insert_with(|| Pending {
            total_chunks,
            received: vec![None; total_chunks as usize],
            received_count: 0,
        });
        if entry.total_chunks != total_chunks {
            return Err(CodecError::InconsistentTotal {
                message_id: message_id.to_owned(),
                expected: entry.total_chunks,
                actual: total_chunks,
            });
        }
        let slot = &mut entry.received[chunk as usize];
        if slot.is_none() {
            entry.received_count += 1;
        }
        *slot = Some(data);

        if entry.received_count < entry.total_chunks {
            trace!(message_id, chunk, total_chunks, "buffered sync chunk");
            return Ok(None);
        }

        let Pending { received, .. } = self.pending.remove(&key).expect("just inserted");
        let mut full = Vec::new();
        for part in received {
            full.extend(part.expect("all slots filled once received_count == total_chunks"));
        }
        Ok(Some(full))
    }

    /// Drops any in-flight reassembly state for a peer whose connection closed.
    pub fn forget_peer(&mut self, peer_key: &str) {
        self.pending.retain(|(peer, _), _| peer != peer_key);
    }

    #[must_use]
    pub fn pending_message_count(&self) -> usize {
        self.pending.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reassembles_out_of_order_chunks() {
        let mut r = ChunkReassembler::new();
        assert!(r.ingest("peer-1", "m1", 2, 3, b"ghi".to_vec()).unwrap().is_none());
        assert!(r.ingest("peer-1", "m1", 0, 3, b"abc".to_vec()).unwrap().is_none());
        let full = r.ingest("peer-1", "m1", 1, 3, b"def".to_vec()).unwrap().unwrap();
        assert_eq!(full, b"abcdefghi");
        assert_eq!(r.pending_message_count(), 0);
    }

    #[test]
    fn distinct_peers_do_not_share_buffers() {
        let mut r = ChunkReassembler::new();
        r.ingest("peer-1", "m1", 0, 2, b"aa".to_vec()).unwrap();
        r.ingest("peer-2", "m1", 0, 2, b"bb".to_vec()).unwrap();
        assert_eq!(r.pending_message_count(), 2);
    }

    #[test]
    fn chunk_index_out_of_range_is_rejected() {
        let mut r = ChunkReassembler::new();
        let err = r.ingest("peer-1", "m1", 3, 3, vec![]).unwrap_err();
        assert!(matches!(err, CodecError::ChunkOutOfRange { .. }));
    }

    #[test]
    fn forget_peer_drops_its_pending_messages() {
        let mut r = ChunkReassembler::new();
        r.ingest("peer-1", "m1", 0, 2, b"aa".to_vec()).unwrap();
        r.forget_peer("peer-1");
        assert_eq!(r.pending_message_count(), 0);
    }
}
