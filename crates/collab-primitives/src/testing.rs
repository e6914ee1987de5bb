//! Reference implementations of the capability traits.
//!
//! None of this is a production CRDT or transport — the real Yjs-family
//! library and the real WebRTC stack are both external dependencies (see
//! spec Non-goals). These exist so the rest of the workspace's test suites
//! can drive real control flow — convergence, echo suppression, chunking,
//! delta sync — without either dependency.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use futures_util::StreamExt as _;
use tokio::sync::{broadcast, mpsc, Mutex as AsyncMutex, RwLock};
use tokio_stream::wrappers::BroadcastStream;

use crate::awareness::{AwarenessChange, AwarenessChangeCallback, AwarenessError, AwarenessReplica};
use crate::document::{DocumentError, UpdateCallback, UpdateOrigin};
use crate::model::SessionDescription;
use crate::substrate::{ChildEvent, Substrate, SubstrateError, SubscriptionStream};
use crate::transport::{IceConfig, PeerConnection, PeerTransport, TransportError};
use crate::DocumentReplica;

// ---------------------------------------------------------------------
// Document: a minimal causal-tree (RGA-style) sequence CRDT for text.
// ---------------------------------------------------------------------

type OpId = (u64, u64);

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
struct CrdtOp {
    id: OpId,
    parent: Option<OpId>,
    ch: char,
    tombstone: bool,
}

#[derive(Default)]
struct DocState {
    ops: HashMap<OpId, CrdtOp>,
    sequence: Vec<OpId>,
    counter: u64,
}

impl DocState {
    /// Inserts `op` at the position the RGA ordering rule dictates: directly
    /// after its parent, but after any existing sibling (same parent) whose
    /// id sorts higher — so concurrent inserts at the same spot converge on
    /// the same order everywhere regardless of arrival order.
    fn insert(&mut self, op: CrdtOp) {
        if self.ops.contains_key(&op.id) {
            return;
        }
        let mut idx = match op.parent {
            None => 0,
            Some(p) => match self.sequence.iter().position(|id| *id == p) {
                Some(i) => i + 1,
                None => {
                    self.sequence.len() // parent unknown: append at the tail (best-effort)
                }
            },
        };
        while idx < self.sequence.len() {
            let sibling = &self.ops[&self.sequence[idx]];
            if sibling.parent == op.parent && sibling.id > op.id {
                idx += 1;
            } else {
                break;
            }
        }
        self.sequence.insert(idx, op.id);
        self.ops.insert(op.id, op);
    }

    fn mark_tombstone(&mut self, id: OpId) {
        if let Some(op) = self.ops.get_mut(&id) {
            op.tombstone = true;
        }
    }

    fn text(&self) -> String {
        self.sequence
            .iter()
            .filter_map(|id| self.ops.get(id))
            .filter(|op| !op.tombstone)
            .map(|op| op.ch)
            .collect()
    }

    fn state_vector(&self) -> HashMap<u64, u64> {
        let mut sv = HashMap::new();
        for (client, counter) in self.ops.keys() {
            let entry = sv.entry(*client).or_insert(0u64);
            if *counter > *entry {
                *entry = *counter;
            }
        }
        sv
    }

    fn apply_ops(&mut self, ops: Vec<CrdtOp>) {
        let mut pending = ops;
        // Fixed-point loop: an op whose parent hasn't arrived yet is retried
        // after the rest of the batch has had a chance to land.
        loop {
            let before = pending.len();
            let mut next_round = Vec::new();
            for op in pending {
                if op.tombstone {
                    if self.ops.contains_key(&op.id) {
                        self.mark_tombstone(op.id);
                        continue;
                    }
                }
                let parent_ready = match op.parent {
                    None => true,
                    Some(p) => self.ops.contains_key(&p),
                };
                if parent_ready || self.ops.contains_key(&op.id) {
                    self.insert(op);
                } else {
                    next_round.push(op);
                }
            }
            if next_round.is_empty() || next_round.len() == before {
                // Either fully drained, or nothing resolved this pass —
                // append the stragglers best-effort rather than spin forever.
                for op in next_round {
                    self.insert(op);
                }
                break;
            }
            pending = next_round;
        }
    }
}

/// A reference [`DocumentReplica`] backed by the RGA above.
pub struct InMemoryDocument {
    client_id: u64,
    state: StdMutex<DocState>,
    callbacks: StdMutex<Vec<UpdateCallback>>,
}

impl InMemoryDocument {
    #[must_use]
    pub fn new(client_id: u64) -> Self {
        Self {
            client_id,
            state: StdMutex::new(DocState::default()),
            callbacks: StdMutex::new(Vec::new()),
        }
    }

    /// Test convenience: insert `text` at character offset `pos`, producing
    /// a chain of ops authored by this replica and firing the local update
    /// callback with exactly those new ops.
    pub fn insert_text(&self, pos: usize, text: &str) {
        let mut state = self.state.lock().unwrap();
        let mut parent = (pos > 0)
            .then(|| state.sequence.get(pos - 1).copied())
            .flatten();
        let mut new_ops = Vec::new();
        for ch in text.chars() {
            state.counter += 1;
            let op = CrdtOp {
                id: (self.client_id, state.counter),
                parent,
                ch,
                tombstone: false,
            };
            parent = Some(op.id);
            new_ops.push(op.clone());
            state.insert(op);
        }
        drop(state);
        let bytes = serde_json::to_vec(&new_ops).expect("ops serialize");
        for cb in self.callbacks.lock().unwrap().iter() {
            cb(&bytes, UpdateOrigin::Local);
        }
    }

    #[must_use]
    pub fn text(&self) -> String {
        self.state.lock().unwrap().text()
    }
}

impl DocumentReplica for InMemoryDocument {
    fn encode_state(&self) -> Vec<u8> {
        let state = self.state.lock().unwrap();
        let ops: Vec<&CrdtOp> = state.sequence.iter().filter_map(|id| state.ops.get(id)).collect();
        serde_json::to_vec(&ops).expect("ops serialize")
    }

    fn encode_state_vector(&self) -> Vec<u8> {
        let sv = self.state.lock().unwrap().state_vector();
        serde_json::to_vec(&sv).expect("state vector serialize")
    }

    fn encode_delta_since(&self, state_vector: &[u8]) -> Vec<u8> {
        let known: HashMap<u64, u64> = serde_json::from_slice(state_vector).unwrap_or_default();
        let state = self.state.lock().unwrap();
        let delta: Vec<&CrdtOp> = state
            .ops
            .values()
            .filter(|op| op.id.1 > *known.get(&op.id.0).unwrap_or(&0))
            .collect();
        serde_json::to_vec(&delta).expect("delta serialize")
    }

    fn apply_update(&self, update: &[u8], _origin: UpdateOrigin) -> Result<(), DocumentError> {
        let ops: Vec<CrdtOp> = serde_json::from_slice(update)
            .map_err(|e| DocumentError::ApplyFailed(e.to_string()))?;
        self.state.lock().unwrap().apply_ops(ops);
        Ok(())
    }

    fn merge_updates(&self, updates: &[Vec<u8>]) -> Vec<u8> {
        let mut merged: HashMap<OpId, CrdtOp> = HashMap::new();
        for update in updates {
            let ops: Vec<CrdtOp> = serde_json::from_slice(update).unwrap_or_default();
            for op in ops {
                merged
                    .entry(op.id)
                    .and_modify(|existing| existing.tombstone |= op.tombstone)
                    .or_insert(op);
            }
        }
        let ops: Vec<CrdtOp> = merged.into_values().collect();
        serde_json::to_vec(&ops).expect("merged ops serialize")
    }

    fn subscribe(&self, callback: UpdateCallback) {
        self.callbacks.lock().unwrap().push(callback);
    }
}

// ---------------------------------------------------------------------
// Awareness
// ---------------------------------------------------------------------

pub struct InMemoryAwareness {
    local_client_id: u64,
    states: StdMutex<HashMap<u64, Value>>,
    callbacks: StdMutex<Vec<AwarenessChangeCallback>>,
}

impl InMemoryAwareness {
    #[must_use]
    pub fn new(local_client_id: u64) -> Self {
        let mut states = HashMap::new();
        states.insert(local_client_id, Value::Object(Default::default()));
        Self {
            local_client_id,
            states: StdMutex::new(states),
            callbacks: StdMutex::new(Vec::new()),
        }
    }

    fn notify(&self, change: AwarenessChange) {
        for cb in self.callbacks.lock().unwrap().iter() {
            cb(&change);
        }
    }
}

impl AwarenessReplica for InMemoryAwareness {
    fn set_local_field(&self, key: &str, value: Value) {
        let mut states = self.states.lock().unwrap();
        let entry = states
            .entry(self.local_client_id)
            .or_insert_with(|| Value::Object(Default::default()));
        if let Value::Object(map) = entry {
            let _ = map.insert(key.to_owned(), value);
        }
        drop(states);
        self.notify(AwarenessChange {
            added: Vec::new(),
            updated: vec![self.local_client_id],
            removed: Vec::new(),
            origin: UpdateOrigin::Local,
        });
    }

    fn subscribe(&self, callback: AwarenessChangeCallback) {
        self.callbacks.lock().unwrap().push(callback);
    }

    fn encode_update(&self, client_ids: &[u64]) -> Vec<u8> {
        let states = self.states.lock().unwrap();
        let subset: HashMap<u64, Value> = client_ids
            .iter()
            .filter_map(|id| states.get(id).map(|v| (*id, v.clone())))
            .collect();
        serde_json::to_vec(&subset).expect("awareness subset serialize")
    }

    fn apply_update(&self, update: &[u8]) -> Result<(), AwarenessError> {
        let incoming: HashMap<u64, Value> =
            serde_json::from_slice(update).map_err(|e| AwarenessError::ApplyFailed(e.to_string()))?;
        let mut added = Vec::new();
        let mut updated = Vec::new();
        {
            let mut states = self.states.lock().unwrap();
            for (id, value) in incoming {
                if states.insert(id, value).is_some() {
                    updated.push(id);
                } else {
                    added.push(id);
                }
            }
        }
        self.notify(AwarenessChange {
            added,
            updated,
            removed: Vec::new(),
            origin: UpdateOrigin::Remote,
        });
        Ok(())
    }

    fn remove_states(&self, client_ids: &[u64]) {
        let mut removed = Vec::new();
        {
            let mut states = self.states.lock().unwrap();
            for id in client_ids {
                if states.remove(id).is_some() {
                    removed.push(*id);
                }
            }
        }
        if !removed.is_empty() {
            self.notify(AwarenessChange {
                added: Vec::new(),
                updated: Vec::new(),
                removed,
                origin: UpdateOrigin::Remote,
            });
        }
    }

    fn client_ids(&self) -> Vec<u64> {
        self.states.lock().unwrap().keys().copied().collect()
    }
}

// ---------------------------------------------------------------------
// Substrate
// ---------------------------------------------------------------------

fn split_parent(path: &str) -> Option<(&str, &str)> {
    path.rsplit_once('/')
}

struct SubstrateInner {
    data: HashMap<String, Value>,
    added_channels: HashMap<String, broadcast::Sender<ChildEvent>>,
    removed_channels: HashMap<String, broadcast::Sender<ChildEvent>>,
    auto_remove: Vec<String>,
}

/// An in-memory stand-in for the realtime substrate (spec §6).
pub struct MemorySubstrate {
    inner: RwLock<SubstrateInner>,
    counter: AtomicU64,
}

impl Default for MemorySubstrate {
    fn default() -> Self {
        Self {
            inner: RwLock::new(SubstrateInner {
                data: HashMap::new(),
                added_channels: HashMap::new(),
                removed_channels: HashMap::new(),
                auto_remove: Vec::new(),
            }),
            counter: AtomicU64::new(0),
        }
    }
}

impl MemorySubstrate {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Test hook: simulates an abrupt client disconnect, triggering the
    /// substrate's auto-remove-on-disconnect bindings.
    pub async fn simulate_disconnect(&self) {
        let paths: Vec<String> = {
            let inner = self.inner.read().await;
            inner.auto_remove.clone()
        };
        for path in paths {
            let _ = self.remove(&path).await;
        }
    }

    fn notify_added(inner: &mut SubstrateInner, path: &str, event: ChildEvent) {
        if let Some(tx) = inner.added_channels.get(path) {
            let _ = tx.send(event);
        }
    }

    fn notify_removed(inner: &mut SubstrateInner, path: &str, event: ChildEvent) {
        if let Some(tx) = inner.removed_channels.get(path) {
            let _ = tx.send(event);
        }
    }
}

#[async_trait]
impl Substrate for MemorySubstrate {
    async fn read(&self, path: &str) -> Result<Option<Value>, SubstrateError> {
        Ok(self.inner.read().await.data.get(path).cloned())
    }

    async fn write(&self, path: &str, value: Value) -> Result<(), SubstrateError> {
        let mut inner = self.inner.write().await;
        inner.data.insert(path.to_owned(), value.clone());
        if let Some((parent, key)) = split_parent(path) {
            Self::notify_added(
                &mut inner,
                parent,
                ChildEvent {
                    key: key.to_owned(),
                    value,
                },
            );
        }
        Ok(())
    }

    async fn remove(&self, path: &str) -> Result<(), SubstrateError> {
        let mut inner = self.inner.write().await;
        let removed_value = inner.data.remove(path);
        let prefix = format!("{path}/");
        let descendants: Vec<String> = inner
            .data
            .keys()
            .filter(|k| k.starts_with(&prefix))
            .cloned()
            .collect();
        for d in descendants {
            inner.data.remove(&d);
        }
        if let (Some((parent, key)), Some(value)) = (split_parent(path), removed_value) {
            Self::notify_removed(
                &mut inner,
                parent,
                ChildEvent {
                    key: key.to_owned(),
                    value,
                },
            );
        }
        Ok(())
    }

    async fn push_child(&self, path: &str, value: Value) -> Result<String, SubstrateError> {
        let id = self.counter.fetch_add(1, Ordering::SeqCst);
        let full = format!("{path}/auto{id:016x}");
        self.write(&full, value).await?;
        Ok(full)
    }

    async fn bind_auto_remove_on_disconnect(&self, path: &str) -> Result<(), SubstrateError> {
        self.inner.write().await.auto_remove.push(path.to_owned());
        Ok(())
    }

    fn subscribe_child_added(&self, path: &str) -> SubscriptionStream {
        // Registering requires a write lock, but `subscribe_*` is sync per
        // the external contract; a blocking_write would deadlock inside an
        // async context, so we take a best-effort try_write and fall back to
        // a throwaway channel (no existing writer holds the lock across a
        // register call in this reference implementation).
        let mut inner = self
            .inner
            .try_write()
            .expect("MemorySubstrate: no concurrent writer during subscribe");
        let tx = inner
            .added_channels
            .entry(path.to_owned())
            .or_insert_with(|| broadcast::channel(256).0)
            .clone();
        // Mirrors real realtime-KV semantics: `child_added` fires once for
        // every child already present at subscribe time, not only for
        // children added afterward (discovery and signaling both rely on
        // this to see peers/envelopes that existed before they subscribed).
        let prefix = format!("{path}/");
        let existing: Vec<ChildEvent> = inner
            .data
            .iter()
            .filter_map(|(k, v)| {
                let rest = k.strip_prefix(prefix.as_str())?;
                (!rest.contains('/')).then(|| ChildEvent {
                    key: rest.to_owned(),
                    value: v.clone(),
                })
            })
            .collect();
        let replay = futures_util::stream::iter(existing);
        let live = BroadcastStream::new(tx.subscribe()).filter_map(|r| r.ok());
        Box::pin(replay.chain(live))
    }

    fn subscribe_child_removed(&self, path: &str) -> SubscriptionStream {
        let mut inner = self
            .inner
            .try_write()
            .expect("MemorySubstrate: no concurrent writer during subscribe");
        let tx = inner
            .removed_channels
            .entry(path.to_owned())
            .or_insert_with(|| broadcast::channel(256).0)
            .clone();
        Box::pin(BroadcastStream::new(tx.subscribe()).filter_map(|r| r.ok()))
    }

    async fn query_le(
        &self,
        path: &str,
        field: &str,
        value: Value,
    ) -> Result<Vec<ChildEvent>, SubstrateError> {
        let inner = self.inner.read().await;
        let prefix = format!("{path}/");
        let threshold = value.as_i64();
        let mut matches = Vec::new();
        for (k, v) in &inner.data {
            let Some(rest) = k.strip_prefix(&prefix) else {
                continue;
            };
            if rest.contains('/') {
                continue; // only direct children
            }
            let candidate = v.get(field).and_then(Value::as_i64);
            if let (Some(t), Some(c)) = (threshold, candidate) {
                if c <= t {
                    matches.push(ChildEvent {
                        key: rest.to_owned(),
                        value: v.clone(),
                    });
                }
            }
        }
        Ok(matches)
    }

    fn server_timestamp(&self) -> Value {
        let now = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis() as i64;
        Value::from(now)
    }
}

// ---------------------------------------------------------------------
// Transport
// ---------------------------------------------------------------------

struct LoopbackState {
    peer_tx: Option<mpsc::UnboundedSender<Vec<u8>>>,
    rx: mpsc::UnboundedReceiver<Vec<u8>>,
    closed: bool,
}

struct LoopbackLink {
    own_tx: mpsc::UnboundedSender<Vec<u8>>,
}

/// An in-process, latency-injected stand-in for a WebRTC data channel pair.
///
/// Two sides call [`PeerTransport::new_connection`] on the *same* shared
/// instance; the SDP exchanged between them is just the other side's opaque
/// connection id, which this loopback uses to link their channels together
/// once both `set_remote_description` calls have happened.
pub struct LoopbackTransport {
    latency: Duration,
    registry: Arc<AsyncMutex<HashMap<String, LoopbackLink>>>,
    next_id: AtomicU64,
}

impl LoopbackTransport {
    #[must_use]
    pub fn new(latency: Duration) -> Self {
        Self {
            latency,
            registry: Arc::new(AsyncMutex::new(HashMap::new())),
            next_id: AtomicU64::new(0),
        }
    }
}

#[async_trait]
impl PeerTransport for LoopbackTransport {
    async fn new_connection(
        &self,
        _ice: &IceConfig,
    ) -> Result<Box<dyn PeerConnection>, TransportError> {
        let id = format!("conn-{}", self.next_id.fetch_add(1, Ordering::SeqCst));
        let (own_tx, rx) = mpsc::unbounded_channel();
        self.registry
            .lock()
            .await
            .insert(id.clone(), LoopbackLink { own_tx: own_tx.clone() });

        let state = Arc::new(AsyncMutex::new(LoopbackState {
            peer_tx: None,
            rx,
            closed: false,
        }));

        // A single background task owns the outbox, so concurrent `send`
        // calls are delivered in the order they were issued: each payload
        // waits out the injected latency before the next one is even looked
        // at, rather than racing on independently-scheduled sleeps.
        let (outbox_tx, mut outbox_rx) = mpsc::unbounded_channel::<Vec<u8>>();
        let latency = self.latency;
        let drain_state = Arc::clone(&state);
        tokio::spawn(async move {
            while let Some(payload) = outbox_rx.recv().await {
                if !latency.is_zero() {
                    tokio::time::sleep(latency).await;
                }
                let peer_tx = drain_state.lock().await.peer_tx.clone();
                if let Some(peer_tx) = peer_tx {
                    let _ = peer_tx.send(payload);
                }
            }
        });

        Ok(Box::new(LoopbackConnection {
            id,
            own_tx,
            outbox: outbox_tx,
            registry: Arc::clone(&self.registry),
            state,
        }))
    }
}

struct LoopbackConnection {
    id: String,
    own_tx: mpsc::UnboundedSender<Vec<u8>>,
    outbox: mpsc::UnboundedSender<Vec<u8>>,
    registry: Arc<AsyncMutex<HashMap<String, LoopbackLink>>>,
    state: Arc<AsyncMutex<LoopbackState>>,
}

#[async_trait]
impl PeerConnection for LoopbackConnection {
    async fn create_offer(&self) -> Result<SessionDescription, TransportError> {
        Ok(SessionDescription {
            kind: crate::model::SignalKind::Offer,
            sdp: self.id.clone(),
        })
    }

    async fn create_answer(&self) -> Result<SessionDescription, TransportError> {
        Ok(SessionDescription {
            kind: crate::model::SignalKind::Answer,
            sdp: self.id.clone(),
        })
    }

    async fn set_local_description(&self, _sdp: SessionDescription) -> Result<(), TransportError> {
        Ok(())
    }

    async fn set_remote_description(&self, sdp: SessionDescription) -> Result<(), TransportError> {
        let registry = self.registry.lock().await;
        let Some(peer) = registry.get(&sdp.sdp) else {
            return Err(TransportError::SetRemoteDescription(format!(
                "unknown peer connection id `{}`",
                sdp.sdp
            )));
        };
        self.state.lock().await.peer_tx = Some(peer.own_tx.clone());
        Ok(())
    }

    async fn gathering_complete(&self) -> Result<(), TransportError> {
        Ok(())
    }

    async fn send(&self, payload: Vec<u8>) -> Result<(), TransportError> {
        {
            let state = self.state.lock().await;
            if state.closed {
                return Err(TransportError::Closed);
            }
            if state.peer_tx.is_none() {
                return Err(TransportError::ChannelNotOpen);
            }
        }
        self.outbox.send(payload).map_err(|_| TransportError::Closed)
    }

    async fn recv(&self) -> Option<Vec<u8>> {
        self.state.lock().await.rx.recv().await
    }

    fn is_open(&self) -> bool {
        true
    }

    async fn close(&self) {
        let mut state = self.state.lock().await;
        state.closed = true;
        state.peer_tx = None;
        self.registry.lock().await.remove(&self.id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rga_converges_regardless_of_chunk_permutation() {
        let a = InMemoryDocument::new(1);
        a.insert_text(0, "Hello");
        let full = a.encode_state();

        // Split into three chunks and apply out of order.
        let ops: Vec<CrdtOp> = serde_json::from_slice(&full).unwrap();
        let chunks = vec![
            serde_json::to_vec(&ops[2..3].to_vec()).unwrap(),
            serde_json::to_vec(&ops[0..2].to_vec()).unwrap(),
            serde_json::to_vec(&ops[3..5].to_vec()).unwrap(),
        ];

        let b = InMemoryDocument::new(2);
        for chunk in chunks {
            b.apply_update(&chunk, UpdateOrigin::Remote).unwrap();
        }
        assert_eq!(b.text(), "Hello");
    }

    #[tokio::test]
    async fn memory_substrate_round_trips_and_notifies() {
        let substrate = MemorySubstrate::new();
        let mut added = substrate.subscribe_child_added("rooms/peers");
        substrate
            .write("rooms/peers/a", serde_json::json!({"id": "a"}))
            .await
            .unwrap();
        let event = tokio::time::timeout(Duration::from_millis(100), added.next())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(event.key, "a");
    }

    #[tokio::test]
    async fn loopback_transport_delivers_in_order() {
        let transport = LoopbackTransport::new(Duration::from_millis(1));
        let ice = IceConfig::default();
        let a = transport.new_connection(&ice).await.unwrap();
        let b = transport.new_connection(&ice).await.unwrap();

        let offer = a.create_offer().await.unwrap();
        b.set_remote_description(offer).await.unwrap();
        let answer = b.create_answer().await.unwrap();
        a.set_remote_description(answer).await.unwrap();

        b.send(b"hello".to_vec()).await.unwrap();
        let got = a.recv().await.unwrap();
        assert_eq!(got, b"hello");

        // Back-to-back sends must arrive in call order, not in whatever
        // order their independently-scheduled latencies happen to elapse.
        b.send(b"one".to_vec()).await.unwrap();
        b.send(b"two".to_vec()).await.unwrap();
        b.send(b"three".to_vec()).await.unwrap();
        assert_eq!(a.recv().await.unwrap(), b"one");
        assert_eq!(a.recv().await.unwrap(), b"two");
        assert_eq!(a.recv().await.unwrap(), b"three");
    }
}
