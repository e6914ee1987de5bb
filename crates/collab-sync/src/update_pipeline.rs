//! Local-origin batching, merge, and per-peer delta sync (spec §4.8).
//!
//! The document's update callback is synchronous and may fire from whatever
//! context the CRDT library calls it on, so it only forwards bytes into an
//! unbounded channel; all batching/timer logic runs in one spawned task that
//! owns the receiver — the same shape `collab-network`'s manager uses for
//! its receive loops.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::warn;

use collab_network::PeerConnectionManager;
use collab_primitives::defaults::MIN_BROADCAST_UPDATE_SIZE;
use collab_primitives::document::{DocumentReplica, UpdateOrigin};
use collab_primitives::peer_id::PeerId;
use collab_primitives::substrate::Substrate;
use collab_primitives::transport::PeerTransport;

use crate::config::SyncConfig;
use crate::events::SyncEvent;

/// Far enough out that the debounce sleep never fires on its own; it is
/// always reset to `now + update_batch` by an incoming local update before
/// that happens.
const PARKED: Duration = Duration::from_secs(365 * 24 * 3600);

pub struct UpdatePipeline<S, T, D> {
    document: Arc<D>,
    network: Arc<PeerConnectionManager<S, T>>,
    config: SyncConfig,
    events: mpsc::UnboundedSender<SyncEvent>,
}

impl<S, T, D> UpdatePipeline<S, T, D>
where
    S: Substrate + 'static,
    T: PeerTransport + 'static,
    D: DocumentReplica + 'static,
{
    pub fn new(
        document: Arc<D>,
        network: Arc<PeerConnectionManager<S, T>>,
        config: SyncConfig,
        events: mpsc::UnboundedSender<SyncEvent>,
    ) -> Arc<Self> {
        Arc::new(Self {
            document,
            network,
            config,
            events,
        })
    }

    /// Subscribes to the document's local updates and spawns the
    /// batch/merge/broadcast loop. Returns the loop's handle so the caller
    /// can abort it in `disconnect()`.
    pub fn start(self: &Arc<Self>) -> JoinHandle<()> {
        let (tx, mut rx) = mpsc::unbounded_channel::<Vec<u8>>();
        self.document.subscribe(Box::new(move |bytes, origin| {
            // Echo suppression: only locally-produced updates re-enter the
            // pipeline. Remote updates are applied with origin = Remote by
            // whoever called `apply_update`, precisely so they never loop
            // back out here (testable property #7).
            if origin == UpdateOrigin::Local {
                let _ = tx.send(bytes.to_vec());
            }
        }));

        let this = Arc::clone(self);
        tokio::spawn(async move {
            let mut pending: Vec<Vec<u8>> = Vec::new();
            let sleep = tokio::time::sleep(PARKED);
            tokio::pin!(sleep);
            loop {
                tokio::select! {
                    received = rx.recv() => {
                        match received {
                            Some(bytes) => {
                                pending.push(bytes);
                                sleep.as_mut().reset(Instant::now() + this.config.update_batch);
                            }
                            None => {
                                if !pending.is_empty() {
                                    this.flush_batch(std::mem::take(&mut pending)).await;
                                }
                                break;
                            }
                        }
                    }
                    () = &mut sleep, if !pending.is_empty() => {
                        this.flush_batch(std::mem::take(&mut pending)).await;
                        sleep.as_mut().reset(Instant::now() + PARKED);
                    }
                }
            }
        })
    }

    /// Merges a drained batch (bypassing the merge for a lone update — the
    /// "fast path" in spec §4.8) and broadcasts it to every connected peer.
    async fn flush_batch(&self, batch: Vec<Vec<u8>>) {
        let merged = match <[Vec<u8>; 1]>::try_from(batch) {
            Ok([only]) => only,
            Err(batch) => self.document.merge_updates(&batch),
        };
        if merged.len() < MIN_BROADCAST_UPDATE_SIZE {
            return;
        }

        let peer_ids = self.network.connected_peer_ids().await;
        if peer_ids.is_empty() {
            return;
        }
        let current_vector = self.document.encode_state_vector();
        for peer_id in &peer_ids {
            if let Err(err) = self.network.send_sync(peer_id, merged.clone()).await {
                warn!(%peer_id, %err, "failed to broadcast batched update");
                continue;
            }
            self.network.record_sent_state_vector(peer_id, current_vector.clone()).await;
        }
        let _ = self.events.send(SyncEvent::SyncCompleted {
            update_size: merged.len(),
        });
    }

    /// Sends the initial sync to a peer whose data channel just opened:
    /// full state if this is the first sync it's been sent, otherwise only
    /// the delta since its last known state vector (spec §4.8, tested by
    /// scenario S3).
    pub async fn send_initial_sync(&self, peer_id: &PeerId) {
        let payload = match self.network.last_sent_state_vector(peer_id).await {
            None => self.document.encode_state(),
            Some(known_vector) => self.document.encode_delta_since(&known_vector),
        };
        if let Err(err) = self.network.send_sync(peer_id, payload).await {
            warn!(%peer_id, %err, "failed to send initial sync");
            return;
        }
        let current_vector = self.document.encode_state_vector();
        self.network.record_sent_state_vector(peer_id, current_vector).await;
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration as StdDuration;

    use collab_network::{EventSink, NetworkConfig};
    use collab_primitives::testing::{InMemoryDocument, LoopbackTransport, MemorySubstrate};

    use super::*;

    async fn connected_pair() -> (
        Arc<PeerConnectionManager<MemorySubstrate, LoopbackTransport>>,
        Arc<PeerConnectionManager<MemorySubstrate, LoopbackTransport>>,
    ) {
        let substrate = Arc::new(MemorySubstrate::new());
        let transport = Arc::new(LoopbackTransport::new(StdDuration::from_millis(1)));
        let (tx_a, _rx_a): (EventSink, _) = mpsc::unbounded_channel();
        let (tx_b, _rx_b): (EventSink, _) = mpsc::unbounded_channel();

        let a = PeerConnectionManager::new(
            PeerId::from("aaaa"),
            NetworkConfig::default(),
            substrate.clone(),
            transport.clone(),
            "rooms/peers".to_owned(),
            "signaling".to_owned(),
            tx_a,
        );
        let b = PeerConnectionManager::new(
            PeerId::from("bbbb"),
            NetworkConfig::default(),
            substrate,
            transport,
            "rooms/peers".to_owned(),
            "signaling".to_owned(),
            tx_b,
        );
        a.start().await.unwrap();
        b.start().await.unwrap();
        tokio::time::sleep(StdDuration::from_millis(100)).await;
        (a, b)
    }

    #[tokio::test]
    async fn batched_local_updates_merge_and_broadcast_once() {
        let (a, _b) = connected_pair().await;
        tokio::time::sleep(StdDuration::from_millis(50)).await;
        assert_eq!(a.connected_peer_count().await, 1);

        let document = Arc::new(InMemoryDocument::new(1));
        let (events_tx, mut events_rx) = mpsc::unbounded_channel();
        let pipeline = UpdatePipeline::new(document.clone(), a, SyncConfig::default(), events_tx);
        pipeline.start();

        document.insert_text(0, "a");
        document.insert_text(1, "b");
        document.insert_text(2, "c");

        let event = tokio::time::timeout(StdDuration::from_millis(500), events_rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert!(matches!(event, SyncEvent::SyncCompleted { .. }));
    }

    #[tokio::test]
    async fn initial_sync_sends_full_state_then_delta_on_resync() {
        let (a, b) = connected_pair().await;
        tokio::time::sleep(StdDuration::from_millis(50)).await;

        let document = Arc::new(InMemoryDocument::new(1));
        document.insert_text(0, "x");
        let (events_tx, _events_rx) = mpsc::unbounded_channel();
        let pipeline = UpdatePipeline::new(document.clone(), Arc::clone(&a), SyncConfig::default(), events_tx);

        let b_id = PeerId::from("bbbb");
        assert!(a.last_sent_state_vector(&b_id).await.is_none());
        pipeline.send_initial_sync(&b_id).await;
        assert!(a.last_sent_state_vector(&b_id).await.is_some());

        // A second initial sync for the same peer now takes the delta path;
        // with nothing new to send it still records an (unchanged) vector.
        pipeline.send_initial_sync(&b_id).await;
        let _ = b;
    }
}
