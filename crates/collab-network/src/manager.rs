//! Composition of discovery, negotiation, and data-channel I/O (spec §4.6).
//!
//! Deliberately not an actor: the manager is a plain struct behind an `Arc`,
//! background work is plain `tokio::spawn`ed tasks closing over that `Arc`,
//! and results/events flow out through an injected [`EventSink`] rather than
//! a back-reference to whatever owns this manager.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use futures_util::StreamExt as _;
use serde_json::Value;
use tokio::sync::{mpsc, Mutex as AsyncMutex, RwLock};
use tracing::{debug, error, info, warn};

use collab_codec::compression;
use collab_codec::framer::frame_update;
use collab_codec::reassembly::ChunkReassembler;
use collab_primitives::model::{SessionDescription, SignalEnvelope, SignalKind, WireMessage};
use collab_primitives::peer_id::PeerId;
use collab_primitives::substrate::{Substrate, SubstrateError};
use collab_primitives::transport::{IceConfig, PeerConnection, PeerTransport};

use crate::config::NetworkConfig;
use crate::events::{EventSink, NetworkEvent, Payload};
use crate::presence::PresenceService;
use crate::signaling::SignalingChannel;
use crate::state::PeerConnState;

#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum NetworkError {
    #[error("already at the maxDirectPeers ceiling ({0})")]
    PeerCeilingReached(usize),
    #[error("no such connected peer `{0}`")]
    UnknownPeer(PeerId),
    #[error(transparent)]
    Transport(#[from] collab_primitives::transport::TransportError),
    #[error(transparent)]
    Substrate(#[from] SubstrateError),
}

struct PeerRuntime {
    state: PeerConnState,
    conn: Arc<dyn PeerConnection>,
    last_sent_state_vector: Option<Vec<u8>>,
    last_activity: Instant,
}

pub struct PeerConnectionManager<S, T> {
    self_id: PeerId,
    config: NetworkConfig,
    substrate: Arc<S>,
    transport: Arc<T>,
    rooms_path: String,
    signaling: Arc<SignalingChannel<S>>,
    presence: Arc<PresenceService<S>>,
    peers: RwLock<HashMap<PeerId, PeerRuntime>>,
    reassembler: AsyncMutex<ChunkReassembler>,
    events: EventSink,
}

impl<S, T> PeerConnectionManager<S, T>
where
    S: Substrate + 'static,
    T: PeerTransport + 'static,
{
    pub fn new(
        self_id: PeerId,
        config: NetworkConfig,
        substrate: Arc<S>,
        transport: Arc<T>,
        rooms_path: String,
        signaling_path: String,
        events: EventSink,
    ) -> Arc<Self> {
        let signaling = Arc::new(SignalingChannel::new(
            substrate.clone(),
            signaling_path,
            self_id.clone(),
        ));
        let presence = Arc::new(PresenceService::new(substrate.clone(), rooms_path.clone(), self_id.clone()));
        Arc::new(Self {
            self_id,
            config,
            substrate,
            transport,
            rooms_path,
            signaling,
            presence,
            peers: RwLock::new(HashMap::new()),
            reassembler: AsyncMutex::new(ChunkReassembler::new()),
            events,
        })
    }

    #[must_use]
    pub fn presence(&self) -> &Arc<PresenceService<S>> {
        &self.presence
    }

    /// Announces presence. Split out from [`Self::start_subscriptions`] so
    /// the session can run it as its own startup step, ahead of wiring the
    /// update/awareness subscriptions and the snapshot loop.
    pub async fn announce(&self) -> Result<(), NetworkError> {
        self.presence.announce().await?;
        Ok(())
    }

    /// Wires discovery and signaling subscriptions. The heartbeat and
    /// cleanup timers are the caller's (the session's) responsibility to
    /// schedule, so `disconnect()` can cancel them uniformly alongside its
    /// other owned timers.
    pub async fn start_subscriptions(self: &Arc<Self>) -> Result<(), NetworkError> {
        let mut added = self.substrate.subscribe_child_added(&self.rooms_path);
        let mut removed = self.substrate.subscribe_child_removed(&self.rooms_path);

        let this = Arc::clone(self);
        tokio::spawn(async move {
            while let Some(event) = added.next().await {
                this.handle_peer_record_added(event.key, event.value).await;
            }
        });

        let this = Arc::clone(self);
        tokio::spawn(async move {
            while let Some(event) = removed.next().await {
                this.cleanup_peer(&PeerId::from(event.key)).await;
            }
        });

        let (signal_tx, mut signal_rx) = mpsc::unbounded_channel();
        Arc::clone(&self.signaling).listen(signal_tx);
        let this = Arc::clone(self);
        tokio::spawn(async move {
            while let Some((_path, envelope)) = signal_rx.recv().await {
                this.handle_signal(envelope).await;
            }
        });

        Ok(())
    }

    /// Convenience combining [`Self::announce`] and
    /// [`Self::start_subscriptions`] for callers that don't need the
    /// session's finer-grained startup ordering.
    pub async fn start(self: &Arc<Self>) -> Result<(), NetworkError> {
        self.announce().await?;
        self.start_subscriptions().await
    }

    async fn handle_peer_record_added(&self, key: String, value: Value) {
        if key == self.self_id.as_str() {
            return; // never self-connect
        }
        let peer_id = PeerId::from(key);
        let last_seen = value.get("lastSeen").and_then(Value::as_i64).unwrap_or(0);
        let now_ms = self.substrate.server_timestamp().as_i64().unwrap_or(0);
        if now_ms.saturating_sub(last_seen) > self.config.peer_presence_timeout.as_millis() as i64 {
            return; // stale record; discovery ignores it, GC will reap it
        }
        if self.peers.read().await.contains_key(&peer_id) {
            return; // already connected/connecting: a no-op per spec
        }
        if self.self_id < peer_id {
            if let Err(err) = self.initiate(peer_id.clone()).await {
                warn!(%peer_id, %err, "failed to initiate connection; cleaning up");
                self.cleanup_peer(&peer_id).await;
                self.emit_error(err.to_string(), "initiate");
            }
        }
    }

    async fn initiate(self: &Arc<Self>, peer_id: PeerId) -> Result<(), NetworkError> {
        self.check_ceiling().await?;
        let conn: Arc<dyn PeerConnection> = self.transport.new_connection(&self.config.ice).await?.into();

        self.insert_runtime(peer_id.clone(), Arc::clone(&conn), PeerConnState::Offering).await;

        let offer = conn.create_offer().await?;
        conn.set_local_description(offer.clone()).await?;
        self.transition(&peer_id, PeerConnState::GatheringLocal).await;
        conn.gathering_complete().await?;
        self.transition(&peer_id, PeerConnState::Offered).await;

        let envelope = SignalEnvelope {
            kind: SignalKind::Offer,
            sdp: offer,
            from: self.self_id.clone(),
            to: peer_id.clone(),
            timestamp: self.substrate.server_timestamp().as_i64().unwrap_or(0),
        };
        self.signaling.send(&envelope).await.map_err(|e| {
            NetworkError::Transport(collab_primitives::transport::TransportError::CreateOffer(e.to_string()))
        })?;

        self.spawn_open_watcher(peer_id, conn);
        Ok(())
    }

    async fn handle_signal(self: &Arc<Self>, envelope: SignalEnvelope) {
        if envelope.to != self.self_id {
            return;
        }
        let from = envelope.from.clone();
        let result = match envelope.sdp.kind {
            SignalKind::Offer => self.handle_offer(envelope.from, envelope.sdp).await,
            SignalKind::Answer => self.handle_answer(envelope.from, envelope.sdp).await,
        };
        if let Err(err) = result {
            warn!(%err, peer_id = %from, "signaling handler failed; cleaning up offending peer");
            self.cleanup_peer(&from).await;
        }
    }

    async fn handle_offer(
        self: &Arc<Self>,
        from: PeerId,
        offer: SessionDescription,
    ) -> Result<(), NetworkError> {
        if self.peers.read().await.contains_key(&from) {
            debug!(peer_id = %from, "ignoring duplicate offer from known peer");
            return Ok(());
        }
        self.check_ceiling().await?;

        let conn: Arc<dyn PeerConnection> = self.transport.new_connection(&self.config.ice).await?.into();
        self.insert_runtime(from.clone(), Arc::clone(&conn), PeerConnState::Offered).await;

        conn.set_remote_description(offer).await?;
        let answer = conn.create_answer().await?;
        conn.set_local_description(answer.clone()).await?;
        conn.gathering_complete().await?;

        let envelope = SignalEnvelope {
            kind: SignalKind::Answer,
            sdp: answer,
            from: self.self_id.clone(),
            to: from.clone(),
            timestamp: self.substrate.server_timestamp().as_i64().unwrap_or(0),
        };
        self.signaling.send(&envelope).await.map_err(|e| {
            NetworkError::Transport(collab_primitives::transport::TransportError::CreateAnswer(e.to_string()))
        })?;

        self.spawn_open_watcher(from, conn);
        Ok(())
    }

    async fn handle_answer(
        self: &Arc<Self>,
        from: PeerId,
        answer: SessionDescription,
    ) -> Result<(), NetworkError> {
        let conn = {
            let peers = self.peers.read().await;
            let runtime = peers.get(&from).ok_or_else(|| NetworkError::UnknownPeer(from.clone()))?;
            if runtime.state != PeerConnState::Offered {
                debug!(peer_id = %from, state = ?runtime.state, "ignoring answer for peer not awaiting one");
                return Ok(());
            }
            Arc::clone(&runtime.conn)
        };
        conn.set_remote_description(answer).await?;
        self.transition(&from, PeerConnState::Answered).await;
        Ok(())
    }

    async fn insert_runtime(&self, peer_id: PeerId, conn: Arc<dyn PeerConnection>, state: PeerConnState) {
        let runtime = PeerRuntime {
            state,
            conn,
            last_sent_state_vector: None,
            last_activity: Instant::now(),
        };
        self.peers.write().await.insert(peer_id, runtime);
    }

    async fn transition(&self, peer_id: &PeerId, to: PeerConnState) {
        let mut peers = self.peers.write().await;
        if let Some(runtime) = peers.get_mut(peer_id) {
            match runtime.state.transition(to) {
                Ok(new_state) => {
                    runtime.state = new_state;
                    runtime.last_activity = Instant::now();
                }
                Err(err) => warn!(%peer_id, %err, "dropped illegal state transition"),
            }
        }
    }

    /// Polls `is_open` until the data channel is usable, then marks the peer
    /// `Connected`, emits `PeerJoined`, and starts its receive loop.
    fn spawn_open_watcher(self: &Arc<Self>, peer_id: PeerId, conn: Arc<dyn PeerConnection>) {
        let this = Arc::clone(self);
        tokio::spawn(async move {
            for _ in 0..200 {
                if conn.is_open() {
                    this.transition(&peer_id, PeerConnState::Connected).await;
                    let _ = this.events.send(NetworkEvent::PeerJoined {
                        peer_id: peer_id.clone(),
                    });
                    this.recv_loop(peer_id, conn).await;
                    return;
                }
                tokio::time::sleep(core::time::Duration::from_millis(10)).await;
            }
            warn!(%peer_id, "data channel never opened; cleaning up");
            this.cleanup_peer(&peer_id).await;
        });
    }

    async fn recv_loop(self: Arc<Self>, peer_id: PeerId, conn: Arc<dyn PeerConnection>) {
        loop {
            match conn.recv().await {
                Some(bytes) => self.handle_incoming(&peer_id, bytes).await,
                None => {
                    self.cleanup_peer(&peer_id).await;
                    return;
                }
            }
        }
    }

    async fn handle_incoming(&self, peer_id: &PeerId, bytes: Vec<u8>) {
        let message: WireMessage = match serde_json::from_slice(&bytes) {
            Ok(m) => m,
            Err(err) => {
                warn!(%peer_id, %err, "dropping malformed wire message");
                return;
            }
        };
        if let Some(runtime) = self.peers.write().await.get_mut(peer_id) {
            runtime.last_activity = Instant::now();
        }
        match message {
            WireMessage::Sync { update } => {
                let _ = self.events.send(NetworkEvent::MessageReceived {
                    peer_id: peer_id.clone(),
                    payload: Payload::Sync(update),
                });
            }
            WireMessage::SyncChunk {
                message_id,
                chunk,
                total_chunks,
                update,
            } => {
                let result = self
                    .reassembler
                    .lock()
                    .await
                    .ingest(peer_id.as_str(), &message_id, chunk, total_chunks, update);
                match result {
                    Ok(Some(full)) => {
                        let _ = self.events.send(NetworkEvent::MessageReceived {
                            peer_id: peer_id.clone(),
                            payload: Payload::Sync(full),
                        });
                    }
                    Ok(None) => {}
                    Err(err) => warn!(%peer_id, %err, "dropping malformed chunk"),
                }
            }
            WireMessage::Awareness { update, compressed } => match compression::decompress(&update, compressed) {
                Ok(decoded) => {
                    let _ = self.events.send(NetworkEvent::MessageReceived {
                        peer_id: peer_id.clone(),
                        payload: Payload::Awareness(decoded),
                    });
                }
                Err(err) => warn!(%peer_id, %err, "dropping undecodable awareness update"),
            },
        }
    }

    async fn send_wire(&self, peer_id: &PeerId, message: &WireMessage) -> Result<(), NetworkError> {
        let conn = {
            let peers = self.peers.read().await;
            let runtime = peers
                .get(peer_id)
                .ok_or_else(|| NetworkError::UnknownPeer(peer_id.clone()))?;
            Arc::clone(&runtime.conn)
        };
        let bytes = serde_json::to_vec(message).expect("WireMessage always serializes");
        conn.send(bytes).await?;
        Ok(())
    }

    /// Sends `update` to `peer_id`, chunking it if it exceeds the budget.
    pub async fn send_sync(&self, peer_id: &PeerId, update: Vec<u8>) -> Result<(), NetworkError> {
        let now_ms = self.substrate.server_timestamp().as_i64().unwrap_or(0);
        for message in frame_update(&update, &self.self_id, now_ms) {
            self.send_wire(peer_id, &message).await?;
        }
        Ok(())
    }

    /// Sends an already-encoded, already-(maybe)compressed awareness update.
    pub async fn send_awareness(&self, peer_id: &PeerId, update: Vec<u8>, compressed: bool) -> Result<(), NetworkError> {
        self.send_wire(peer_id, &WireMessage::Awareness { update, compressed }).await
    }

    pub async fn broadcast_awareness(&self, update: Vec<u8>, compressed: bool) {
        let peer_ids: Vec<PeerId> = self.connected_peer_ids().await;
        for peer_id in peer_ids {
            if let Err(err) = self.send_awareness(&peer_id, update.clone(), compressed).await {
                warn!(%peer_id, %err, "failed to send awareness update");
            }
        }
    }

    #[must_use]
    pub async fn connected_peer_ids(&self) -> Vec<PeerId> {
        self.peers
            .read()
            .await
            .iter()
            .filter(|(_, r)| r.state == PeerConnState::Connected)
            .map(|(id, _)| id.clone())
            .collect()
    }

    #[must_use]
    pub async fn connected_peer_count(&self) -> usize {
        self.connected_peer_ids().await.len()
    }

    /// Every tracked peer runtime regardless of negotiation state, used by
    /// the visibility-change hook to tell "no peers yet" apart from "peers
    /// known but none `connected`" (spec §4.10).
    #[must_use]
    pub async fn total_peer_count(&self) -> usize {
        self.peers.read().await.len()
    }

    pub async fn last_sent_state_vector(&self, peer_id: &PeerId) -> Option<Vec<u8>> {
        self.peers.read().await.get(peer_id).and_then(|r| r.last_sent_state_vector.clone())
    }

    pub async fn record_sent_state_vector(&self, peer_id: &PeerId, state_vector: Vec<u8>) {
        if let Some(runtime) = self.peers.write().await.get_mut(peer_id) {
            runtime.last_sent_state_vector = Some(state_vector);
        }
    }

    async fn check_ceiling(&self) -> Result<(), NetworkError> {
        if self.peers.read().await.len() >= self.config.max_direct_peers {
            return Err(NetworkError::PeerCeilingReached(self.config.max_direct_peers));
        }
        Ok(())
    }

    /// Tears down a single peer: idempotent, safe to call more than once.
    pub async fn cleanup_peer(&self, peer_id: &PeerId) {
        let runtime = self.peers.write().await.remove(peer_id);
        let Some(runtime) = runtime else {
            return; // already cleaned up
        };
        runtime.conn.close().await;
        self.reassembler.lock().await.forget_peer(peer_id.as_str());
        let peer_path = format!("{}/{}", self.rooms_path, peer_id.as_str());
        if let Err(err) = self.substrate.remove(&peer_path).await {
            debug!(%peer_id, %err, "best-effort removal of peer record after cleanup failed");
        }
        let _ = self.events.send(NetworkEvent::PeerLeft { peer_id: peer_id.clone() });
        info!(%peer_id, "peer connection cleaned up");
    }

    /// Closes every connection. Idempotent.
    pub async fn shutdown(&self) {
        let peer_ids: Vec<PeerId> = self.peers.read().await.keys().cloned().collect();
        for peer_id in peer_ids {
            self.cleanup_peer(&peer_id).await;
        }
        self.presence.stop().await;
    }

    /// Tears down connections that have gone idle past the configured
    /// thresholds (spec §5, "Stale in-memory connections" / "Idle peer
    /// connections").
    pub async fn sweep_idle_connections(&self) {
        let now = Instant::now();
        let stale: Vec<PeerId> = self
            .peers
            .read()
            .await
            .iter()
            .filter(|(_, r)| {
                let idle_for = now.duration_since(r.last_activity);
                if r.state == PeerConnState::Connected {
                    idle_for > self.config.stale_connection_timeout
                } else {
                    idle_for > self.config.idle_peer_timeout
                }
            })
            .map(|(id, _)| id.clone())
            .collect();
        for peer_id in stale {
            self.cleanup_peer(&peer_id).await;
        }
    }

    fn emit_error(&self, message: String, context: &'static str) {
        error!(%message, context, "network error");
        let _ = self.events.send(NetworkEvent::Error { message, context });
    }
}
