//! Tunables for persistence, batching, and awareness throttling (spec §6).

use core::time::Duration;

use collab_primitives::defaults::{
    AWARENESS_THROTTLE_MS, MAX_AWARENESS_STATES, PERSISTENCE_BACKSTOP_INTERVAL,
    PERSISTENCE_DEBOUNCE, UPDATE_BATCH_MS,
};

/// Configuration shared by [`crate::persistence::SnapshotStore`],
/// [`crate::update_pipeline::UpdatePipeline`], and
/// [`crate::awareness_pipeline::AwarenessPipeline`].
#[derive(Clone, Debug)]
#[non_exhaustive]
pub struct SyncConfig {
    pub update_batch: Duration,
    pub persistence_debounce: Duration,
    pub persistence_backstop: Duration,
    pub awareness_throttle: Duration,
    pub max_awareness_states: usize,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            update_batch: Duration::from_millis(UPDATE_BATCH_MS),
            persistence_debounce: PERSISTENCE_DEBOUNCE,
            persistence_backstop: PERSISTENCE_BACKSTOP_INTERVAL,
            awareness_throttle: Duration::from_millis(AWARENESS_THROTTLE_MS),
            max_awareness_states: MAX_AWARENESS_STATES,
        }
    }
}

impl SyncConfig {
    #[must_use]
    pub fn with_sync_interval(mut self, backstop: Duration) -> Self {
        self.persistence_backstop = backstop;
        self
    }
}
