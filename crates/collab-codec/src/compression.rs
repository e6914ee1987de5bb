//! gzip compression for awareness payloads (spec §6, "Compression").
//!
//! Compression only ever applies below the wire, never changes semantics: a
//! payload that doesn't shrink is sent uncompressed rather than penalizing
//! the receiver with decompression work for no gain.

use std::io::{Read as _, Write as _};

use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;

use collab_primitives::defaults::COMPRESSION_THRESHOLD;

use crate::error::CodecError;

/// Compresses `payload` if it is at least [`COMPRESSION_THRESHOLD`] bytes and
/// doing so actually shrinks it. Returns the bytes to put on the wire and
/// whether they are compressed.
#[must_use]
pub fn maybe_compress(payload: &[u8]) -> (Vec<u8>, bool) {
    if payload.len() < COMPRESSION_THRESHOLD {
        return (payload.to_vec(), false);
    }
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    if encoder.write_all(payload).is_err() {
        return (payload.to_vec(), false);
    }
    match encoder.finish() {
        Ok(compressed) if compressed.len() < payload.len() => (compressed, true),
        _ => (payload.to_vec(), false),
    }
}

/// Inverse of [`maybe_compress`]: `compressed` tells us whether to gunzip.
pub fn decompress(payload: &[u8], compressed: bool) -> Result<Vec<u8>, CodecError> {
    if !compressed {
        return Ok(payload.to_vec());
    }
    let mut decoder = GzDecoder::new(payload);
    let mut out = Vec::new();
    decoder
        .read_to_end(&mut out)
        .map_err(|e| CodecError::Decompress(e.to_string()))?;
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn small_payloads_are_left_uncompressed() {
        let (bytes, compressed) = maybe_compress(b"short");
        assert!(!compressed);
        assert_eq!(bytes, b"short");
    }

    #[test]
    fn large_compressible_payload_round_trips() {
        let payload = vec![b'a'; COMPRESSION_THRESHOLD * 4];
        let (bytes, compressed) = maybe_compress(&payload);
        assert!(compressed);
        assert!(bytes.len() < payload.len());
        let restored = decompress(&bytes, compressed).unwrap();
        assert_eq!(restored, payload);
    }

    #[test]
    fn incompressible_payload_falls_back_uncompressed() {
        // Already-high-entropy bytes won't shrink under gzip; the fallback
        // must still hand back exactly what was given.
        let payload: Vec<u8> = (0..COMPRESSION_THRESHOLD * 2)
            .map(|i| ((i * 2654435761u32 as usize) % 256) as u8)
            .collect();
        let (bytes, compressed) = maybe_compress(&payload);
        if !compressed {
            assert_eq!(bytes, payload);
        }
        let restored = decompress(&bytes, compressed).unwrap();
        assert_eq!(restored, payload);
    }
}
