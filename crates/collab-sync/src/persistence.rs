//! Load-on-start, debounced change-driven persistence (spec §4.3).
//!
//! Dirtiness is gated on state-vector equality rather than a boolean flag so
//! that a flush triggered by the backstop timer costs nothing when no edits
//! happened in between — the full-state re-encode only runs when the vector
//! actually moved.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex as StdMutex};

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use serde_json::{json, Value};
use sha2::{Digest, Sha256};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use collab_primitives::document::DocumentReplica;
use collab_primitives::substrate::Substrate;

use crate::config::SyncConfig;
use crate::error::PersistError;
use crate::events::SyncEvent;

pub struct SnapshotStore<S, D> {
    substrate: Arc<S>,
    document: Arc<D>,
    snapshots_path: String,
    documents_path: String,
    config: SyncConfig,
    version: AtomicU64,
    last_persisted_vector: StdMutex<Option<Vec<u8>>>,
    debounce_handle: StdMutex<Option<JoinHandle<()>>>,
    events: mpsc::UnboundedSender<SyncEvent>,
}

impl<S, D> SnapshotStore<S, D>
where
    S: Substrate + 'static,
    D: DocumentReplica + 'static,
{
    pub fn new(
        substrate: Arc<S>,
        document: Arc<D>,
        snapshots_path: String,
        documents_path: String,
        config: SyncConfig,
        events: mpsc::UnboundedSender<SyncEvent>,
    ) -> Arc<Self> {
        Arc::new(Self {
            substrate,
            document,
            snapshots_path,
            documents_path,
            config,
            version: AtomicU64::new(0),
            last_persisted_vector: StdMutex::new(None),
            debounce_handle: StdMutex::new(None),
            events,
        })
    }

    fn latest_path(&self) -> String {
        format!("{}/latest", self.snapshots_path)
    }

    /// Reads `snapshots/latest`; falls back to the legacy flat `documents`
    /// record if absent (spec: "for backward compatibility").
    pub async fn load(&self) -> Option<Vec<u8>> {
        match self.substrate.read(&self.latest_path()).await {
            Ok(Some(value)) => {
                if let Some(bytes) = decode_update_field(&value) {
                    *self.last_persisted_vector.lock().unwrap() =
                        value.get("stateVector").and_then(Value::as_str).and_then(|s| BASE64.decode(s).ok());
                    return Some(bytes);
                }
                warn!(path = %self.latest_path(), "snapshot record had no decodable `update` field");
            }
            Ok(None) => {}
            Err(err) => warn!(%err, "failed to read latest snapshot"),
        }

        match self.substrate.read(&self.documents_path).await {
            Ok(Some(value)) => decode_update_field(&value),
            Ok(None) => None,
            Err(err) => {
                warn!(%err, "failed to read legacy documents record");
                None
            }
        }
    }

    /// Schedules a flush [`SyncConfig::persistence_debounce`] from now,
    /// cancelling any flush already scheduled (spec: "schedule a debounced
    /// flush"; each new dirty mark resets the window).
    pub fn mark_dirty(self: &Arc<Self>) {
        let this = Arc::clone(self);
        let debounce = self.config.persistence_debounce;
        let mut guard = self.debounce_handle.lock().unwrap();
        if let Some(old) = guard.take() {
            old.abort();
        }
        *guard = Some(tokio::spawn(async move {
            tokio::time::sleep(debounce).await;
            if let Err(err) = this.flush().await {
                let _ = this.events.send(SyncEvent::Error {
                    message: err.to_string(),
                    context: "persistence-debounce",
                });
            }
        }));
    }

    /// Runs the same dirtiness check on a fixed interval regardless of
    /// whether a debounced flush is pending, as a backstop against a
    /// persistence error window swallowing the debounced attempt (spec §4.3).
    /// The returned handle is owned by the caller (the session coordinator),
    /// which aborts it in `disconnect()`.
    pub fn spawn_backstop(self: &Arc<Self>) -> JoinHandle<()> {
        let this = Arc::clone(self);
        let interval = self.config.persistence_backstop;
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await; // first tick fires immediately; skip it
            loop {
                ticker.tick().await;
                if let Err(err) = this.flush().await {
                    let _ = this.events.send(SyncEvent::Error {
                        message: err.to_string(),
                        context: "persistence-backstop",
                    });
                }
            }
        })
    }

    /// Awaits an immediate write regardless of dirtiness, for
    /// `CollabSession::force_persist()`. Propagates errors to the caller
    /// (spec §4.10: "forcePersist() ... propagates errors").
    pub async fn force_persist(&self) -> Result<(), PersistError> {
        self.flush_unconditional().await
    }

    /// Cancels any pending debounced flush without running it. Part of
    /// `disconnect()`'s synchronous timer teardown.
    pub fn cancel_pending(&self) {
        if let Some(handle) = self.debounce_handle.lock().unwrap().take() {
            handle.abort();
        }
    }

    async fn flush(&self) -> Result<(), PersistError> {
        let state_vector = self.document.encode_state_vector();
        let unchanged = self
            .last_persisted_vector
            .lock()
            .unwrap()
            .as_deref()
            .is_some_and(|last| last == state_vector.as_slice());
        if unchanged {
            debug!("snapshot flush skipped: state vector unchanged since last write");
            return Ok(());
        }
        self.write_snapshot(state_vector).await
    }

    async fn flush_unconditional(&self) -> Result<(), PersistError> {
        let state_vector = self.document.encode_state_vector();
        self.write_snapshot(state_vector).await
    }

    async fn write_snapshot(&self, state_vector: Vec<u8>) -> Result<(), PersistError> {
        let full_state = self.document.encode_state();
        let checksum = hex::encode(Sha256::digest(&full_state));
        let version = self.version.fetch_add(1, Ordering::SeqCst);
        let record = json!({
            "update": BASE64.encode(&full_state),
            "stateVector": BASE64.encode(&state_vector),
            "updatedAt": self.substrate.server_timestamp(),
            "version": version,
            "checksum": checksum,
        });
        self.substrate.write(&self.latest_path(), record).await?;
        *self.last_persisted_vector.lock().unwrap() = Some(state_vector);
        let _ = self.events.send(SyncEvent::DocumentPersisted { version });
        Ok(())
    }
}

fn decode_update_field(value: &Value) -> Option<Vec<u8>> {
    value.get("update").and_then(Value::as_str).and_then(|s| BASE64.decode(s).ok())
}

/// Verifies that `checksum` (lowercase hex) is the SHA-256 of `update`
/// (testable property #4).
#[must_use]
pub fn verify_checksum(update: &[u8], checksum: &str) -> bool {
    hex::encode(Sha256::digest(update)) == checksum
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use collab_primitives::testing::{InMemoryDocument, MemorySubstrate};

    use super::*;

    fn config_with_debounce(ms: u64) -> SyncConfig {
        SyncConfig {
            persistence_debounce: Duration::from_millis(ms),
            persistence_backstop: Duration::from_secs(3600),
            ..SyncConfig::default()
        }
    }

    #[tokio::test]
    async fn debounced_flush_writes_exactly_once_after_quiet_period() {
        let substrate = Arc::new(MemorySubstrate::new());
        let document = Arc::new(InMemoryDocument::new(1));
        let (tx, _rx) = mpsc::unbounded_channel();
        let store = SnapshotStore::new(
            substrate.clone(),
            document.clone(),
            "snapshots".to_owned(),
            "documents".to_owned(),
            config_with_debounce(20),
            tx,
        );

        document.insert_text(0, "Hello");
        store.mark_dirty();
        tokio::time::sleep(Duration::from_millis(60)).await;

        let stored = substrate.read("snapshots/latest").await.unwrap().unwrap();
        assert_eq!(stored["version"], 0);
        let update_b64 = stored["update"].as_str().unwrap();
        let checksum = stored["checksum"].as_str().unwrap();
        let bytes = BASE64.decode(update_b64).unwrap();
        assert!(verify_checksum(&bytes, checksum));

        let fresh = InMemoryDocument::new(99);
        fresh.apply_update(&bytes, collab_primitives::document::UpdateOrigin::Remote).unwrap();
        assert_eq!(fresh.text(), "Hello");
    }

    #[tokio::test]
    async fn unchanged_state_vector_skips_the_write() {
        let substrate = Arc::new(MemorySubstrate::new());
        let document = Arc::new(InMemoryDocument::new(1));
        let (tx, _rx) = mpsc::unbounded_channel();
        let store = SnapshotStore::new(
            substrate.clone(),
            document.clone(),
            "snapshots".to_owned(),
            "documents".to_owned(),
            config_with_debounce(10),
            tx,
        );

        document.insert_text(0, "x");
        store.force_persist().await.unwrap();
        let first = substrate.read("snapshots/latest").await.unwrap().unwrap();

        store.force_persist().await.unwrap();
        // flush() (not force_persist) is the gated path; force_persist always
        // writes, so exercise the gate directly instead.
        let gated = store.flush_and_report().await;
        assert!(!gated, "no edits occurred since the last persisted vector");
        let second = substrate.read("snapshots/latest").await.unwrap().unwrap();
        assert_eq!(first["version"], second["version"]);
    }

    #[tokio::test]
    async fn load_falls_back_to_legacy_documents_path() {
        let substrate = Arc::new(MemorySubstrate::new());
        substrate
            .write("documents", json!({"update": BASE64.encode(b"legacy-bytes")}))
            .await
            .unwrap();
        let document = Arc::new(InMemoryDocument::new(1));
        let (tx, _rx) = mpsc::unbounded_channel();
        let store = SnapshotStore::new(
            substrate,
            document,
            "snapshots".to_owned(),
            "documents".to_owned(),
            SyncConfig::default(),
            tx,
        );
        let loaded = store.load().await.unwrap();
        assert_eq!(loaded, b"legacy-bytes");
    }
}

#[cfg(test)]
impl<S, D> SnapshotStore<S, D>
where
    S: Substrate + 'static,
    D: DocumentReplica + 'static,
{
    /// Test helper: runs the gated flush and reports whether it actually wrote.
    async fn flush_and_report(&self) -> bool {
        let before = self.version.load(Ordering::SeqCst);
        let _ = self.flush().await;
        self.version.load(Ordering::SeqCst) != before
    }
}
