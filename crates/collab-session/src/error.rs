//! Errors propagated to callers of the public session API (spec §7,
//! "Fatal session error" and the `forcePersist`/`reconnect` contracts).

#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum SessionError {
    #[error(transparent)]
    Path(#[from] collab_primitives::paths::PathError),
    #[error(transparent)]
    Persist(#[from] collab_sync::PersistError),
    #[error(transparent)]
    Network(#[from] collab_network::NetworkError),
}
