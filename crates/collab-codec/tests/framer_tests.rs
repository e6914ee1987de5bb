use collab_codec::framer::frame_update;
use collab_codec::reassembly::ChunkReassembler;
use collab_primitives::model::WireMessage;
use collab_primitives::peer_id::PeerId;

#[test]
fn framed_chunks_reassemble_to_the_original_update() {
    let self_id = PeerId::from("peer-a");
    let original = vec![42u8; 200_000];
    let framed = frame_update(&original, &self_id, 1_700_000_000_000);
    assert!(framed.len() > 1, "expected chunking for a 200KB update");

    let mut reassembler = ChunkReassembler::new();
    let mut result = None;
    for msg in framed {
        let WireMessage::SyncChunk {
            message_id,
            chunk,
            total_chunks,
            update,
        } = msg
        else {
            panic!("expected sync-chunk envelopes");
        };
        result = reassembler
            .ingest("peer-a", &message_id, chunk, total_chunks, update)
            .unwrap();
    }
    assert_eq!(result.unwrap(), original);
}

#[test]
fn sub_threshold_update_never_reaches_the_wire() {
    let self_id = PeerId::from("peer-a");
    assert!(frame_update(&[1], &self_id, 0).is_empty());
    assert!(frame_update(&[], &self_id, 0).is_empty());
}
