#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum CodecError {
    #[error("failed to decompress payload: {0}")]
    Decompress(String),
    #[error("chunk {chunk} is out of range for message `{message_id}` with {total_chunks} total chunks")]
    ChunkOutOfRange {
        message_id: String,
        chunk: u32,
        total_chunks: u32,
    },
    #[error("conflicting totalChunks for message `{message_id}`: had {expected}, got {actual}")]
    InconsistentTotal {
        message_id: String,
        expected: u32,
        actual: u32,
    },
}
