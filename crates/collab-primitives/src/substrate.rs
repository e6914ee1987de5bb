//! The shared realtime key-value substrate capability (spec §6).
//!
//! Modeled the same way `calimero-dag`'s `DeltaApplier<T>` models an
//! operation the DAG store itself cannot perform: the engine is generic
//! over, and delegates to, an injected implementation it does not own.

use core::pin::Pin;

use async_trait::async_trait;
use futures_util::Stream;
use serde_json::Value;

#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum SubstrateError {
    #[error("substrate read failed for `{path}`: {source}")]
    Read {
        path: String,
        #[source]
        source: eyre::Error,
    },
    #[error("substrate write failed for `{path}`: {source}")]
    Write {
        path: String,
        #[source]
        source: eyre::Error,
    },
    #[error("substrate remove failed for `{path}`: {source}")]
    Remove {
        path: String,
        #[source]
        source: eyre::Error,
    },
}

/// One `(key, value)` child-added/child-removed event.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ChildEvent {
    pub key: String,
    pub value: Value,
}

pub type SubscriptionStream = Pin<Box<dyn Stream<Item = ChildEvent> + Send>>;

/// A hierarchical realtime key-value store with push/subscribe semantics
/// (spec §6, "Substrate contract").
#[async_trait]
pub trait Substrate: Send + Sync {
    async fn read(&self, path: &str) -> Result<Option<Value>, SubstrateError>;

    async fn write(&self, path: &str, value: Value) -> Result<(), SubstrateError>;

    async fn remove(&self, path: &str) -> Result<(), SubstrateError>;

    /// Writes a new auto-id child under `path` and returns its full path.
    async fn push_child(&self, path: &str, value: Value) -> Result<String, SubstrateError>;

    /// Registers a server-side removal of `path` to run when this client's
    /// connection drops.
    async fn bind_auto_remove_on_disconnect(&self, path: &str) -> Result<(), SubstrateError>;

    fn subscribe_child_added(&self, path: &str) -> SubscriptionStream;

    fn subscribe_child_removed(&self, path: &str) -> SubscriptionStream;

    /// Range query: children of `path` whose `field` is `<= value`.
    async fn query_le(
        &self,
        path: &str,
        field: &str,
        value: Value,
    ) -> Result<Vec<ChildEvent>, SubstrateError>;

    /// A sentinel the substrate replaces with its own clock on write.
    fn server_timestamp(&self) -> Value;
}
