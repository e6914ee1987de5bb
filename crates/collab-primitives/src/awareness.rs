//! The awareness (presence/cursor) replica capability (spec §3, "Awareness Replica").

use crate::document::UpdateOrigin;

/// Added/updated/removed client ids delivered by an awareness change callback.
///
/// Carries the same [`UpdateOrigin`] tag the document update callback does:
/// a `Local` change came from `set_local_field`, a `Remote` one from
/// `apply_update`. The awareness pipeline needs this to avoid re-broadcasting
/// a state it just received back out to the mesh it came from.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AwarenessChange {
    pub added: Vec<u64>,
    pub updated: Vec<u64>,
    pub removed: Vec<u64>,
    pub origin: UpdateOrigin,
}

impl AwarenessChange {
    /// The union of added, updated, and removed ids — what the awareness
    /// pipeline accumulates into its pending-flush set.
    pub fn touched_ids(&self) -> impl Iterator<Item = u64> + '_ {
        self.added
            .iter()
            .chain(self.updated.iter())
            .chain(self.removed.iter())
            .copied()
    }
}

pub type AwarenessChangeCallback = Box<dyn Fn(&AwarenessChange) + Send + Sync>;

pub trait AwarenessReplica: Send + Sync {
    fn set_local_field(&self, key: &str, value: serde_json::Value);

    fn subscribe(&self, callback: AwarenessChangeCallback);

    /// Encodes the state of the given client ids into a single update.
    fn encode_update(&self, client_ids: &[u64]) -> Vec<u8>;

    fn apply_update(&self, update: &[u8]) -> Result<(), AwarenessError>;

    fn remove_states(&self, client_ids: &[u64]);

    /// All client ids currently tracked, including the local one.
    fn client_ids(&self) -> Vec<u64>;

    fn len(&self) -> usize {
        self.client_ids().len()
    }

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum AwarenessError {
    #[error("failed to apply awareness update: {0}")]
    ApplyFailed(String),
}
