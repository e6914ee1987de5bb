//! Liveness record publishing and stale-peer reaping (spec §4.4).

use std::sync::Arc;
use std::time::Instant;

use serde_json::json;
use tokio::sync::Mutex as AsyncMutex;
use tracing::{debug, warn};

use collab_primitives::peer_id::PeerId;
use collab_primitives::substrate::{Substrate, SubstrateError};

/// Publishes and refreshes this client's `rooms/peers/{selfId}` record.
///
/// Heartbeats are serialized through a single in-flight lock (spec: "at most
/// one in-flight heartbeat at any time") rather than letting a forced
/// visibility-triggered heartbeat race a scheduled one.
pub struct PresenceService<S> {
    substrate: Arc<S>,
    rooms_path: String,
    self_id: PeerId,
    inflight: AsyncMutex<()>,
    last_update: std::sync::Mutex<Option<Instant>>,
}

impl<S: Substrate> PresenceService<S> {
    pub fn new(substrate: Arc<S>, rooms_path: String, self_id: PeerId) -> Self {
        Self {
            substrate,
            rooms_path,
            self_id,
            inflight: AsyncMutex::new(()),
            last_update: std::sync::Mutex::new(None),
        }
    }

    fn self_path(&self) -> String {
        format!("{}/{}", self.rooms_path, self.self_id.as_str())
    }

    /// Registers the auto-remove-on-disconnect binding, then writes the record.
    pub async fn announce(&self) -> Result<(), SubstrateError> {
        self.heartbeat().await
    }

    /// Re-applies the auto-remove binding and the record write. Serialized
    /// against concurrent calls.
    pub async fn heartbeat(&self) -> Result<(), SubstrateError> {
        let _guard = self.inflight.lock().await;
        let path = self.self_path();
        self.substrate.bind_auto_remove_on_disconnect(&path).await?;
        let record = json!({
            "id": self.self_id.as_str(),
            "lastSeen": self.substrate.server_timestamp(),
        });
        self.substrate.write(&path, record).await?;
        *self.last_update.lock().unwrap() = Some(Instant::now());
        debug!(peer_id = %self.self_id, "presence heartbeat sent");
        Ok(())
    }

    /// Whether at least `min_interval` has elapsed since the last heartbeat,
    /// used to gate a visibility-triggered forced refresh.
    #[must_use]
    pub fn should_force_on_visible(&self, min_interval: core::time::Duration) -> bool {
        match *self.last_update.lock().unwrap() {
            None => true,
            Some(last) => last.elapsed() >= min_interval,
        }
    }

    /// Idempotent, best-effort removal of the own presence record.
    pub async fn stop(&self) {
        let path = self.self_path();
        if let Err(err) = self.substrate.remove(&path).await {
            warn!(peer_id = %self.self_id, %err, "failed to remove presence record on stop");
        }
    }

    /// Removes stale peer records (and their signaling inboxes) whose
    /// `lastSeen` is at or before `now - stale_peer_threshold`.
    pub async fn cleanup_stale_peers(
        &self,
        signaling_path: &str,
        stale_peer_threshold: core::time::Duration,
    ) -> Vec<PeerId> {
        let threshold_ms = self.now_ms().saturating_sub(stale_peer_threshold.as_millis() as i64);
        let stale = match self
            .substrate
            .query_le(&self.rooms_path, "lastSeen", json!(threshold_ms))
            .await
        {
            Ok(entries) => entries,
            Err(err) => {
                warn!(%err, "stale-peer query failed");
                return Vec::new();
            }
        };

        let mut reaped = Vec::new();
        for entry in stale {
            let peer_id = PeerId::from(entry.key.clone());
            let peer_path = format!("{}/{}", self.rooms_path, entry.key);
            let inbox_path = format!("{signaling_path}/{}", entry.key);
            let (peer_result, inbox_result) =
                tokio::join!(self.substrate.remove(&peer_path), self.substrate.remove(&inbox_path));
            if let Err(err) = peer_result {
                warn!(%err, %peer_id, "failed to remove stale peer record");
            }
            if let Err(err) = inbox_result {
                warn!(%err, %peer_id, "failed to remove stale peer signaling inbox");
            }
            reaped.push(peer_id);
        }
        reaped
    }

    fn now_ms(&self) -> i64 {
        self.substrate
            .server_timestamp()
            .as_i64()
            .unwrap_or_else(|| {
                std::time::SystemTime::now()
                    .duration_since(std::time::UNIX_EPOCH)
                    .unwrap_or_default()
                    .as_millis() as i64
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use collab_primitives::testing::MemorySubstrate;

    #[tokio::test]
    async fn announce_writes_record_with_auto_remove_binding() {
        let substrate = Arc::new(MemorySubstrate::new());
        let presence = PresenceService::new(substrate.clone(), "rooms/peers".to_owned(), PeerId::from("a"));
        presence.announce().await.unwrap();
        let stored = substrate.read("rooms/peers/a").await.unwrap().unwrap();
        assert_eq!(stored["id"], "a");
    }

    #[tokio::test]
    async fn stop_removes_the_record_and_is_idempotent() {
        let substrate = Arc::new(MemorySubstrate::new());
        let presence = PresenceService::new(substrate.clone(), "rooms/peers".to_owned(), PeerId::from("a"));
        presence.announce().await.unwrap();
        presence.stop().await;
        presence.stop().await;
        assert!(substrate.read("rooms/peers/a").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn cleanup_reaps_only_stale_peers() {
        let substrate = Arc::new(MemorySubstrate::new());
        substrate
            .write("rooms/peers/stale", json!({"id": "stale", "lastSeen": 0}))
            .await
            .unwrap();
        substrate
            .write(
                "rooms/peers/fresh",
                json!({"id": "fresh", "lastSeen": 9_999_999_999_999i64}),
            )
            .await
            .unwrap();
        let presence = PresenceService::new(substrate.clone(), "rooms/peers".to_owned(), PeerId::from("self"));
        let reaped = presence
            .cleanup_stale_peers("signaling", core::time::Duration::from_secs(1))
            .await;
        assert_eq!(reaped, vec![PeerId::from("stale")]);
        assert!(substrate.read("rooms/peers/fresh").await.unwrap().is_some());
    }
}
