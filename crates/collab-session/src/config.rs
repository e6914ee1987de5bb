//! Session-wide configuration assembled by [`crate::builder::CollabSessionBuilder`]
//! (spec §4.10, "Construction contract").

use collab_network::NetworkConfig;
use collab_primitives::paths::PathLayout;
use collab_sync::SyncConfig;

#[derive(Clone, Debug)]
#[non_exhaustive]
pub struct SessionConfig {
    pub path_layout: PathLayout,
    pub network: NetworkConfig,
    pub sync: SyncConfig,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            path_layout: PathLayout::default(),
            network: NetworkConfig::default(),
            sync: SyncConfig::default(),
        }
    }
}
