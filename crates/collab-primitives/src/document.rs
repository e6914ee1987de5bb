//! The CRDT document capability (spec §3, "Document Replica").
//!
//! The engine treats the CRDT library as a black box: this trait is the only
//! seam it reaches through. Production code plugs in a real Yjs-family
//! binding; `testing::InMemoryDocument` stands in for it in this workspace's
//! own test suites.

/// Tags an update with where it came from, so the update pipeline can
/// suppress echoing a just-applied remote update back out over the mesh.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UpdateOrigin {
    /// Produced by a local mutation.
    Local,
    /// Applied from a peer; must not be re-broadcast.
    Remote,
}

/// A callback invoked whenever the document produces an update, whatever the
/// origin. Boxed rather than generic so `DocumentReplica` implementations can
/// be trait objects.
pub type UpdateCallback = Box<dyn Fn(&[u8], UpdateOrigin) + Send + Sync>;

pub trait DocumentReplica: Send + Sync {
    /// Encodes the full current state.
    fn encode_state(&self) -> Vec<u8>;

    /// Encodes a compact summary of this replica's version, used for delta
    /// computation and dirtiness checks.
    fn encode_state_vector(&self) -> Vec<u8>;

    /// Encodes only the operations this replica has that `state_vector`
    /// (encoded by some other replica) does not.
    fn encode_delta_since(&self, state_vector: &[u8]) -> Vec<u8>;

    /// Applies `update`, tagged with `origin`. Idempotent for a given update.
    fn apply_update(&self, update: &[u8], origin: UpdateOrigin) -> Result<(), DocumentError>;

    /// Merges several updates into one minimal update, without applying it.
    fn merge_updates(&self, updates: &[Vec<u8>]) -> Vec<u8>;

    /// Registers a callback invoked on every update the document produces.
    /// Implementations may support multiple subscribers.
    fn subscribe(&self, callback: UpdateCallback);
}

#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum DocumentError {
    #[error("failed to apply CRDT update: {0}")]
    ApplyFailed(String),
}
