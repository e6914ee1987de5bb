//! The composition root: owns every subcomponent and exposes the public
//! session API (spec §4.10, "Session Coordinator").

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, Mutex as StdMutex};

use tokio::sync::{broadcast, mpsc, RwLock as AsyncRwLock};
use tokio::task::JoinHandle;
use tracing::{info, warn};

use collab_network::{NetworkEvent, Payload, PeerConnectionManager};
use collab_primitives::awareness::AwarenessReplica;
use collab_primitives::document::{DocumentReplica, UpdateOrigin};
use collab_primitives::peer_id::PeerId;
use collab_primitives::substrate::Substrate;
use collab_primitives::transport::PeerTransport;
use collab_sync::{AwarenessPipeline, SnapshotStore, SyncEvent, UpdatePipeline};

use crate::config::SessionConfig;
use crate::error::SessionError;
use crate::events::{ConnectionStatus, SessionEvent};
use crate::memory::{MemoryStats, MessageBuffer};

pub struct CollabSession<S, T, D, A> {
    doc_id: String,
    self_id: PeerId,
    user_name: String,
    signaling_path: String,
    config: SessionConfig,
    document: Arc<D>,
    awareness_replica: Arc<A>,
    network: Arc<PeerConnectionManager<S, T>>,
    snapshots: Arc<SnapshotStore<S, D>>,
    updates: Arc<UpdatePipeline<S, T, D>>,
    awareness: Arc<AwarenessPipeline<S, T, A>>,
    network_rx: AsyncRwLock<Option<mpsc::UnboundedReceiver<NetworkEvent>>>,
    sync_rx: AsyncRwLock<Option<mpsc::UnboundedReceiver<SyncEvent>>>,
    events: broadcast::Sender<SessionEvent>,
    message_buffer: MessageBuffer,
    status: StdMutex<ConnectionStatus>,
    last_cleanup: AtomicI64,
    tasks: StdMutex<Vec<JoinHandle<()>>>,
}

impl<S, T, D, A> CollabSession<S, T, D, A>
where
    S: Substrate + 'static,
    T: PeerTransport + 'static,
    D: DocumentReplica + 'static,
    A: AwarenessReplica + 'static,
{
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        doc_id: String,
        signaling_path: String,
        config: SessionConfig,
        self_id: PeerId,
        user_name: String,
        document: Arc<D>,
        awareness_replica: Arc<A>,
        network: Arc<PeerConnectionManager<S, T>>,
        network_rx: mpsc::UnboundedReceiver<NetworkEvent>,
        snapshots: Arc<SnapshotStore<S, D>>,
        updates: Arc<UpdatePipeline<S, T, D>>,
        awareness: Arc<AwarenessPipeline<S, T, A>>,
        sync_rx: mpsc::UnboundedReceiver<SyncEvent>,
    ) -> Arc<Self> {
        let (events, _) = broadcast::channel(256);
        Arc::new(Self {
            doc_id,
            self_id,
            user_name,
            signaling_path,
            config,
            document,
            awareness_replica,
            network,
            snapshots,
            updates,
            awareness,
            network_rx: AsyncRwLock::new(Some(network_rx)),
            sync_rx: AsyncRwLock::new(Some(sync_rx)),
            events,
            message_buffer: MessageBuffer::new(),
            status: StdMutex::new(ConnectionStatus::Disconnected),
            last_cleanup: AtomicI64::new(0),
            tasks: StdMutex::new(Vec::new()),
        })
    }

    /// Runs the startup order from spec §4.10, steps (2)-(6): by the time
    /// this is called the embedder has already built and handed over the
    /// document and awareness replicas (step 1), so those are not this
    /// method's concern.
    pub async fn start(self: &Arc<Self>) {
        self.set_status(ConnectionStatus::Connecting);

        // (2) Load and apply the latest snapshot, if any.
        if let Some(bytes) = self.snapshots.load().await {
            if let Err(err) = self.document.apply_update(&bytes, UpdateOrigin::Remote) {
                self.emit_error(err.to_string(), "snapshot-load");
            }
        }

        // (3) Announce presence, ahead of wiring subscriptions or starting
        // the snapshot loop, so other peers can discover this one as soon
        // as possible. A failure here is reported but does not block (4)-(6).
        match self.network.announce().await {
            Ok(()) => self.set_status(ConnectionStatus::Connected),
            Err(err) => {
                self.set_status(ConnectionStatus::Disconnected);
                self.emit_error(err.to_string(), "presence-announce");
            }
        }

        // (4) Wire origin-tagged update and awareness subscriptions.
        self.awareness_replica
            .set_local_field("user", serde_json::json!({ "name": self.user_name }));
        self.wire_dirty_marking();
        self.tasks.lock().unwrap().push(self.updates.start());
        self.tasks.lock().unwrap().push(self.awareness.start());

        // (5) Start the snapshot loop.
        self.tasks.lock().unwrap().push(self.snapshots.spawn_backstop());

        // (6) Initialize the peer manager: discovery/signaling subscriptions
        // plus this session's own heartbeat/cleanup/page-lifecycle hooks.
        if let Err(err) = self.network.start_subscriptions().await {
            self.emit_error(err.to_string(), "network-start");
        }

        self.spawn_network_dispatch().await;
        self.spawn_sync_bridge().await;
        self.spawn_maintenance();
    }

    fn wire_dirty_marking(&self) {
        // A second, independent subscriber on the same document —
        // `DocumentReplica::subscribe` supports multiple callbacks — kept
        // separate from `UpdatePipeline::start`'s own subscription so the
        // batching/broadcast path and the persistence-dirtiness path don't
        // have to share a callback.
        let snapshots = Arc::clone(&self.snapshots);
        self.document.subscribe(Box::new(move |_bytes, origin| {
            if origin == UpdateOrigin::Local {
                snapshots.mark_dirty();
            }
        }));
    }

    async fn spawn_network_dispatch(self: &Arc<Self>) {
        let Some(mut rx) = self.network_rx.write().await.take() else {
            return;
        };
        let this = Arc::clone(self);
        let handle = tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                this.handle_network_event(event).await;
            }
        });
        self.tasks.lock().unwrap().push(handle);
    }

    async fn handle_network_event(&self, event: NetworkEvent) {
        match event {
            NetworkEvent::PeerJoined { peer_id } => {
                self.updates.send_initial_sync(&peer_id).await;
                let _ = self.events.send(SessionEvent::PeerJoined { peer_id, user: None });
            }
            NetworkEvent::PeerLeft { peer_id } => {
                self.awareness.forget_peer(&peer_id).await;
                let _ = self.events.send(SessionEvent::PeerLeft { peer_id });
            }
            NetworkEvent::MessageReceived { peer_id, payload } => match payload {
                Payload::Sync(update) => {
                    self.message_buffer.record(update.len() as u64);
                    // Applied with origin = Remote so `UpdatePipeline`'s local
                    // subscriber never re-broadcasts it (echo suppression).
                    if let Err(err) = self.document.apply_update(&update, UpdateOrigin::Remote) {
                        warn!(%peer_id, %err, "failed to apply remote sync update");
                        self.emit_error(err.to_string(), "apply-remote-update");
                    }
                }
                Payload::Awareness(decoded) => {
                    self.message_buffer.record(decoded.len() as u64);
                    self.awareness.apply_remote(&peer_id, &decoded, false).await;
                }
            },
            NetworkEvent::Error { message, context } => self.emit_error(message, context),
        }
    }

    async fn spawn_sync_bridge(self: &Arc<Self>) {
        let Some(mut rx) = self.sync_rx.write().await.take() else {
            return;
        };
        let this = Arc::clone(self);
        let handle = tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                this.handle_sync_event(event);
            }
        });
        self.tasks.lock().unwrap().push(handle);
    }

    fn handle_sync_event(&self, event: SyncEvent) {
        let translated = match event {
            SyncEvent::DocumentPersisted { version } => SessionEvent::DocumentPersisted {
                doc_id: self.doc_id.clone(),
                version,
            },
            SyncEvent::SyncCompleted { update_size } => SessionEvent::SyncCompleted {
                doc_id: self.doc_id.clone(),
                update_size,
            },
            SyncEvent::AwarenessUpdated { peer_id, state } => {
                SessionEvent::AwarenessUpdated { peer_id, user: state }
            }
            SyncEvent::Error { message, context } => SessionEvent::Error { error: message, context },
        };
        let _ = self.events.send(translated);
    }

    fn spawn_maintenance(self: &Arc<Self>) {
        let this = Arc::clone(self);
        let heartbeat_interval = self.config.network.heartbeat_interval;
        let cleanup_interval = self.config.network.cleanup_interval;
        let handle = tokio::spawn(async move {
            let mut heartbeat = tokio::time::interval(heartbeat_interval);
            let mut cleanup = tokio::time::interval(cleanup_interval);
            heartbeat.tick().await;
            cleanup.tick().await;
            loop {
                tokio::select! {
                    _ = heartbeat.tick() => {
                        if let Err(err) = this.network.presence().heartbeat().await {
                            this.emit_error(err.to_string(), "heartbeat");
                        }
                    }
                    _ = cleanup.tick() => this.run_cleanup_tick().await,
                }
            }
        });
        self.tasks.lock().unwrap().push(handle);
    }

    async fn run_cleanup_tick(&self) {
        let _ = self
            .network
            .presence()
            .cleanup_stale_peers(&self.signaling_path, self.config.network.stale_peer_threshold)
            .await;
        self.network.sweep_idle_connections().await;
        self.awareness.prune_to_connected_peers().await;
        self.last_cleanup.store(now_ms(), Ordering::Relaxed);
    }

    /// Idempotent; safe to call from any state (spec §4.10).
    pub async fn disconnect(self: &Arc<Self>) {
        for handle in self.tasks.lock().unwrap().drain(..) {
            handle.abort();
        }
        self.network.shutdown().await;
        self.snapshots.cancel_pending();
        self.set_status(ConnectionStatus::Disconnected);
        let _ = self.events.send(SessionEvent::ConnectionStateChanged {
            state: ConnectionStatus::Disconnected,
        });
    }

    /// Tears down and re-runs the peer-manager init phase on the same
    /// network instance, relying on a fresh `subscribeChildAdded` pass to
    /// rediscover peers already present on the substrate. A second set of
    /// discovery/signal-listener tasks is left running rather than
    /// cancelled; `handle_peer_record_added`/`handle_answer`'s existing
    /// duplicate-peer guards make the overlap harmless beyond the wasted
    /// background task.
    pub async fn reconnect(self: &Arc<Self>) -> Result<(), SessionError> {
        let _ = self.events.send(SessionEvent::ConnectionStateChanged {
            state: ConnectionStatus::Connecting,
        });
        self.set_status(ConnectionStatus::Connecting);

        self.network.shutdown().await;
        match self.network.start().await {
            Ok(()) => {
                self.set_status(ConnectionStatus::Connected);
                let _ = self.events.send(SessionEvent::ConnectionStateChanged {
                    state: ConnectionStatus::Connected,
                });
                Ok(())
            }
            Err(err) => {
                self.set_status(ConnectionStatus::Disconnected);
                self.emit_error(err.to_string(), "reconnect");
                let _ = self.events.send(SessionEvent::ConnectionStateChanged {
                    state: ConnectionStatus::Disconnected,
                });
                Err(err.into())
            }
        }
    }

    /// Awaits an immediate snapshot write regardless of dirtiness,
    /// propagating errors to the caller (spec §4.10).
    pub async fn force_persist(&self) -> Result<(), SessionError> {
        self.snapshots.force_persist().await.map_err(Into::into)
    }

    /// No-op: the CRDT library runs its own incremental garbage collection
    /// when enabled, which is out of this engine's scope (spec §4.10).
    pub fn force_garbage_collection(&self) {
        info!("forceGarbageCollection is a documented no-op; the CRDT's own incremental GC applies");
    }

    #[must_use]
    pub async fn get_peer_count(&self) -> usize {
        self.network.connected_peer_count().await
    }

    #[must_use]
    pub fn get_connection_status(&self) -> ConnectionStatus {
        *self.status.lock().unwrap()
    }

    #[must_use]
    pub fn peer_id(&self) -> &PeerId {
        &self.self_id
    }

    #[must_use]
    pub async fn get_memory_stats(&self) -> MemoryStats {
        MemoryStats {
            message_buffer_bytes: self.message_buffer.total_bytes(),
            connection_count: self.network.connected_peer_count().await,
            last_cleanup: match self.last_cleanup.load(Ordering::Relaxed) {
                0 => None,
                ts => Some(ts),
            },
            awareness_states: self.awareness.state_count(),
        }
    }

    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    /// Best-effort synchronous snapshot write and presence removal,
    /// fire-and-forget so the caller (an unload/pagehide handler) never
    /// blocks on them (spec §4.10, "Page lifecycle hooks").
    pub fn handle_page_hide(self: &Arc<Self>) {
        let snapshots = Arc::clone(&self.snapshots);
        tokio::spawn(async move {
            let _ = snapshots.force_persist().await;
        });
        let network = Arc::clone(&self.network);
        tokio::spawn(async move {
            network.presence().stop().await;
        });
    }

    /// On becoming visible: force a heartbeat if due, and if peers are known
    /// but none are `connected`, drop stale connections and let discovery
    /// reform the mesh (spec §4.10). Becoming hidden is a no-op here: this
    /// implementation does not throttle heartbeat frequency while hidden,
    /// since the fixed-interval heartbeat in `spawn_maintenance` already
    /// stays well under any reasonable hidden-tab budget.
    pub async fn handle_visibility_change(&self, visible: bool) {
        if !visible {
            return;
        }
        if self.network.presence().should_force_on_visible(self.config.network.min_visibility_update_interval) {
            if let Err(err) = self.network.presence().heartbeat().await {
                self.emit_error(err.to_string(), "visibility-heartbeat");
            }
        }
        let total = self.network.total_peer_count().await;
        let connected = self.network.connected_peer_count().await;
        if total > 0 && connected == 0 {
            self.network.sweep_idle_connections().await;
        }
    }

    fn set_status(&self, status: ConnectionStatus) {
        *self.status.lock().unwrap() = status;
    }

    fn emit_error(&self, message: String, context: &'static str) {
        warn!(%message, context, "session error");
        let _ = self.events.send(SessionEvent::Error { error: message, context });
    }
}

fn now_ms() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as i64
}
