//! Wire framing for the peer data channel (spec §6, "Message framing").
//!
//! Three concerns live here, mirroring how `calimero-network-primitives`
//! keeps codec, framing, and transport as separate small modules rather than
//! one do-everything `Stream` impl:
//!
//! - [`compression`]: gzip awareness payloads above a size threshold, with a
//!   no-gain fallback.
//! - [`framer`]: split an oversized update into `sync-chunk` envelopes.
//! - [`reassembly`]: buffer chunks per `(peer, messageId)` until complete.

pub mod compression;
pub mod error;
pub mod framer;
pub mod reassembly;

pub use error::CodecError;
