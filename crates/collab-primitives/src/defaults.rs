//! Tunables shared across crates (spec §6, "Defaults and tunables").
//!
//! Each owning crate wraps the constants relevant to it in its own `Config`
//! struct with a hand-written `Default` impl; values are centralized here so
//! a component that only reads a neighboring component's threshold (e.g. the
//! awareness pipeline reading the memory-cleanup ceiling) doesn't have to
//! depend on that component's crate just for a `usize`.

use core::time::Duration;

/// Maximum size of a single data-channel frame, chunk header included.
pub const MAX_CHUNK_SIZE: usize = 32 * 1024;

/// Reserved bytes per chunk envelope for `messageId`/`chunk`/`totalChunks` framing.
pub const CHUNK_HEADER_SIZE: usize = 256;

/// Lower bound of the awareness-broadcast debounce window.
pub const AWARENESS_THROTTLE_MS_MIN: u64 = 50;
/// Upper bound of the awareness-broadcast debounce window.
pub const AWARENESS_THROTTLE_MS_MAX: u64 = 100;
/// The concrete value this implementation uses within the spec's 50-100ms range.
pub const AWARENESS_THROTTLE_MS: u64 = 75;

/// Lower bound of the compression threshold range.
pub const COMPRESSION_THRESHOLD_MIN: usize = 100;
/// Upper bound of the compression threshold range.
pub const COMPRESSION_THRESHOLD_MAX: usize = 512;
/// The concrete value this implementation uses within the spec's 100-512B range.
pub const COMPRESSION_THRESHOLD: usize = 256;

pub const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(5 * 60);
pub const CLEANUP_INTERVAL: Duration = Duration::from_secs(5 * 60);
pub const STALE_PEER_THRESHOLD: Duration = Duration::from_secs(10 * 60);
pub const PEER_PRESENCE_TIMEOUT: Duration = Duration::from_secs(10 * 60);
pub const STALE_CONNECTION_TIMEOUT: Duration = Duration::from_secs(10 * 60);
pub const IDLE_PEER_TIMEOUT: Duration = Duration::from_secs(5 * 60);
pub const MIN_VISIBILITY_UPDATE_INTERVAL: Duration = Duration::from_secs(2 * 60);

pub const MAX_AWARENESS_STATES: usize = 50;
pub const MAX_MEMORY_BUFFER_BYTES: u64 = 10 * 1024 * 1024;
pub const MESSAGE_BUFFER_MAX_ENTRIES: usize = 1_000;
pub const MESSAGE_BUFFER_RETENTION: Duration = Duration::from_secs(60 * 60);

pub const UPDATE_BATCH_MS: u64 = 50;
pub const PERSISTENCE_DEBOUNCE: Duration = Duration::from_secs(2);
pub const PERSISTENCE_BACKSTOP_INTERVAL: Duration = Duration::from_millis(15_000);
pub const DEFAULT_SYNC_INTERVAL: Duration = Duration::from_secs(15);
pub const DEFAULT_MAX_DIRECT_PEERS: usize = 20;

/// Outbound updates below this size are no-ops and are never broadcast.
pub const MIN_BROADCAST_UPDATE_SIZE: usize = 3;

pub const DEFAULT_STUN_SERVERS: &[&str] = &[
    "stun:stun.l.google.com:19302",
    "stun:stun1.l.google.com:19302",
];
