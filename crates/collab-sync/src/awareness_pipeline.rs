//! Throttled local broadcast and bounded remote application of awareness
//! state (spec §4.9).

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use tokio::sync::{mpsc, Mutex as AsyncMutex};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::warn;

use collab_codec::compression;
use collab_network::PeerConnectionManager;
use collab_primitives::awareness::{AwarenessChange, AwarenessReplica};
use collab_primitives::document::UpdateOrigin;
use collab_primitives::peer_id::PeerId;
use collab_primitives::substrate::Substrate;
use collab_primitives::transport::PeerTransport;

use crate::config::SyncConfig;
use crate::events::SyncEvent;

const PARKED: Duration = Duration::from_secs(365 * 24 * 3600);

pub struct AwarenessPipeline<S, T, A> {
    awareness: Arc<A>,
    network: Arc<PeerConnectionManager<S, T>>,
    config: SyncConfig,
    events: mpsc::UnboundedSender<SyncEvent>,
    self_client_id: u64,
    /// Which client ids a given peer's awareness updates have introduced, so
    /// the memory-check tick can tell which tracked states belong to peers
    /// that are no longer connected (spec §3: "Awareness cardinality is
    /// bounded ... entries for client-ids not in the connected-peer set").
    peer_client_ids: AsyncMutex<HashMap<PeerId, HashSet<u64>>>,
    dropped_over_cardinality: AtomicUsize,
}

impl<S, T, A> AwarenessPipeline<S, T, A>
where
    S: Substrate + 'static,
    T: PeerTransport + 'static,
    A: AwarenessReplica + 'static,
{
    pub fn new(
        awareness: Arc<A>,
        network: Arc<PeerConnectionManager<S, T>>,
        config: SyncConfig,
        events: mpsc::UnboundedSender<SyncEvent>,
        self_client_id: u64,
    ) -> Arc<Self> {
        Arc::new(Self {
            awareness,
            network,
            config,
            events,
            self_client_id,
            peer_client_ids: AsyncMutex::new(HashMap::new()),
            dropped_over_cardinality: AtomicUsize::new(0),
        })
    }

    /// Subscribes to local awareness changes and spawns the debounced
    /// broadcast loop (spec: "debounce with AWARENESS_THROTTLE_MS").
    pub fn start(self: &Arc<Self>) -> JoinHandle<()> {
        let pending: Arc<StdMutex<HashSet<u64>>> = Arc::new(StdMutex::new(HashSet::new()));
        let pending_cb = Arc::clone(&pending);
        let (wake_tx, mut wake_rx) = mpsc::unbounded_channel::<()>();

        self.awareness.subscribe(Box::new(move |change: &AwarenessChange| {
            if change.origin != UpdateOrigin::Local {
                return; // don't re-broadcast a state we just received (mesh-wide echo suppression)
            }
            pending_cb.lock().unwrap().extend(change.touched_ids());
            let _ = wake_tx.send(());
        }));

        let this = Arc::clone(self);
        tokio::spawn(async move {
            let sleep = tokio::time::sleep(PARKED);
            tokio::pin!(sleep);
            loop {
                tokio::select! {
                    woken = wake_rx.recv() => {
                        match woken {
                            Some(()) => sleep.as_mut().reset(Instant::now() + this.config.awareness_throttle),
                            None => break,
                        }
                    }
                    () = &mut sleep, if !pending.lock().unwrap().is_empty() => {
                        let ids: Vec<u64> = pending.lock().unwrap().drain().collect();
                        this.flush_local(ids).await;
                        sleep.as_mut().reset(Instant::now() + PARKED);
                    }
                }
            }
        })
    }

    async fn flush_local(&self, client_ids: Vec<u64>) {
        if client_ids.is_empty() {
            return;
        }
        let update = self.awareness.encode_update(&client_ids);
        let (payload, compressed) = compression::maybe_compress(&update);
        self.network.broadcast_awareness(payload, compressed).await;
    }

    /// Applies a remote awareness update from `peer_id`, enforcing the
    /// cardinality ceiling (testable property #8) and recording which
    /// client ids now belong to that peer.
    pub async fn apply_remote(&self, peer_id: &PeerId, update: &[u8], compressed: bool) {
        if self.awareness.len() >= self.config.max_awareness_states {
            self.dropped_over_cardinality.fetch_add(1, Ordering::Relaxed);
            warn!(%peer_id, "dropping remote awareness update: at cardinality ceiling");
            return;
        }
        let decoded = match compression::decompress(update, compressed) {
            Ok(bytes) => bytes,
            Err(err) => {
                warn!(%peer_id, %err, "dropping undecodable awareness update");
                return;
            }
        };
        let before: HashSet<u64> = self.awareness.client_ids().into_iter().collect();
        if let Err(err) = self.awareness.apply_update(&decoded) {
            warn!(%peer_id, %err, "failed to apply remote awareness update");
            return;
        }
        let after: HashSet<u64> = self.awareness.client_ids().into_iter().collect();
        let touched: HashSet<u64> = after.difference(&before).copied().chain(after.intersection(&before).copied()).collect();

        self.peer_client_ids
            .lock()
            .await
            .entry(peer_id.clone())
            .or_default()
            .extend(touched.iter().copied());

        let state = serde_json::json!({ "clientIds": touched.iter().copied().collect::<Vec<_>>() });
        let _ = self.events.send(SyncEvent::AwarenessUpdated {
            peer_id: peer_id.clone(),
            state,
        });
    }

    /// Drops this peer's attributed client ids from the registry and from
    /// the awareness replica itself, called on `peer-left`.
    pub async fn forget_peer(&self, peer_id: &PeerId) {
        let ids = self.peer_client_ids.lock().await.remove(peer_id);
        if let Some(ids) = ids {
            let ids: Vec<u64> = ids.into_iter().collect();
            if !ids.is_empty() {
                self.awareness.remove_states(&ids);
            }
        }
    }

    /// Current awareness cardinality, used by `getMemoryStats()`.
    #[must_use]
    pub fn state_count(&self) -> usize {
        self.awareness.len()
    }

    /// Periodic memory-check tick (spec §4.9, "remove entries whose
    /// client-id is neither self nor a currently connected peer").
    pub async fn prune_to_connected_peers(&self) {
        let connected: HashSet<PeerId> = self.network.connected_peer_ids().await.into_iter().collect();
        let mut registry = self.peer_client_ids.lock().await;
        registry.retain(|peer_id, _| connected.contains(peer_id));

        let allowed: HashSet<u64> = registry
            .values()
            .flatten()
            .copied()
            .chain(core::iter::once(self.self_client_id))
            .collect();
        drop(registry);

        let stale: Vec<u64> = self
            .awareness
            .client_ids()
            .into_iter()
            .filter(|id| !allowed.contains(id))
            .collect();
        if !stale.is_empty() {
            self.awareness.remove_states(&stale);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration as StdDuration;

    use collab_network::{EventSink, NetworkConfig};
    use collab_primitives::testing::{InMemoryAwareness, LoopbackTransport, MemorySubstrate};

    use super::*;

    fn manager() -> Arc<PeerConnectionManager<MemorySubstrate, LoopbackTransport>> {
        let substrate = Arc::new(MemorySubstrate::new());
        let transport = Arc::new(LoopbackTransport::new(StdDuration::from_millis(1)));
        let (tx, _rx): (EventSink, _) = mpsc::unbounded_channel();
        PeerConnectionManager::new(
            PeerId::from("self"),
            NetworkConfig::default(),
            substrate,
            transport,
            "rooms/peers".to_owned(),
            "signaling".to_owned(),
            tx,
        )
    }

    #[tokio::test]
    async fn local_field_change_is_broadcast_after_throttle() {
        let awareness = Arc::new(InMemoryAwareness::new(1));
        let net = manager();
        net.start().await.unwrap();
        let (events_tx, _events_rx) = mpsc::unbounded_channel();
        let config = SyncConfig {
            awareness_throttle: StdDuration::from_millis(20),
            ..SyncConfig::default()
        };
        let pipeline = AwarenessPipeline::new(awareness.clone(), net, config, events_tx, 1);
        pipeline.start();

        awareness.set_local_field("cursor", serde_json::json!(5));
        tokio::time::sleep(StdDuration::from_millis(60)).await;
        // No peers connected: broadcast is a no-op, but this exercises the
        // debounce path without panicking or hanging.
    }

    #[tokio::test]
    async fn remote_update_over_ceiling_is_dropped() {
        let awareness = Arc::new(InMemoryAwareness::new(1));
        let net = manager();
        let (events_tx, mut events_rx) = mpsc::unbounded_channel();
        let config = SyncConfig {
            max_awareness_states: 1, // self already counts as one entry
            ..SyncConfig::default()
        };
        let pipeline = AwarenessPipeline::new(awareness.clone(), net, config, events_tx, 1);

        let mut remote = HashMap::new();
        remote.insert(2u64, serde_json::json!({"name": "bob"}));
        let update = serde_json::to_vec(&remote).unwrap();
        pipeline.apply_remote(&PeerId::from("bbbb"), &update, false).await;

        assert_eq!(awareness.len(), 1, "update should have been dropped at the ceiling");
        assert!(events_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn forget_peer_removes_its_attributed_states() {
        let awareness = Arc::new(InMemoryAwareness::new(1));
        let net = manager();
        let (events_tx, mut events_rx) = mpsc::unbounded_channel();
        let pipeline = AwarenessPipeline::new(awareness.clone(), net, SyncConfig::default(), events_tx, 1);

        let mut remote = HashMap::new();
        remote.insert(2u64, serde_json::json!({"name": "bob"}));
        let update = serde_json::to_vec(&remote).unwrap();
        let peer_id = PeerId::from("bbbb");
        pipeline.apply_remote(&peer_id, &update, false).await;
        assert!(matches!(events_rx.recv().await, Some(SyncEvent::AwarenessUpdated { .. })));
        assert_eq!(awareness.len(), 2);

        pipeline.forget_peer(&peer_id).await;
        assert_eq!(awareness.len(), 1);
    }
}
