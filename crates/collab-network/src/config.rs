//! Tunables for discovery, negotiation, and connection housekeeping (spec §4.6, §5).

use core::time::Duration;

use collab_primitives::defaults::{
    CLEANUP_INTERVAL, DEFAULT_MAX_DIRECT_PEERS, HEARTBEAT_INTERVAL, IDLE_PEER_TIMEOUT,
    MIN_VISIBILITY_UPDATE_INTERVAL, PEER_PRESENCE_TIMEOUT, STALE_CONNECTION_TIMEOUT,
    STALE_PEER_THRESHOLD,
};
use collab_primitives::transport::IceConfig;

/// Configuration for the [`crate::manager::PeerConnectionManager`] and the
/// presence/cleanup timers it owns.
#[derive(Clone, Debug)]
#[non_exhaustive]
pub struct NetworkConfig {
    pub ice: IceConfig,
    pub max_direct_peers: usize,
    pub heartbeat_interval: Duration,
    pub cleanup_interval: Duration,
    pub stale_peer_threshold: Duration,
    pub peer_presence_timeout: Duration,
    pub stale_connection_timeout: Duration,
    pub idle_peer_timeout: Duration,
    pub min_visibility_update_interval: Duration,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            ice: IceConfig::default(),
            max_direct_peers: DEFAULT_MAX_DIRECT_PEERS,
            heartbeat_interval: HEARTBEAT_INTERVAL,
            cleanup_interval: CLEANUP_INTERVAL,
            stale_peer_threshold: STALE_PEER_THRESHOLD,
            peer_presence_timeout: PEER_PRESENCE_TIMEOUT,
            stale_connection_timeout: STALE_CONNECTION_TIMEOUT,
            idle_peer_timeout: IDLE_PEER_TIMEOUT,
            min_visibility_update_interval: MIN_VISIBILITY_UPDATE_INTERVAL,
        }
    }
}

impl NetworkConfig {
    #[must_use]
    pub fn with_max_direct_peers(mut self, n: usize) -> Self {
        self.max_direct_peers = n;
        self
    }
}
