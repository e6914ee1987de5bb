//! Per-peer inbox of SDP offers/answers over the substrate (spec §4.5).

use std::sync::Arc;

use futures_util::StreamExt as _;
use serde_json::json;
use tokio::sync::mpsc;
use tracing::warn;

use collab_primitives::model::SignalEnvelope;
use collab_primitives::peer_id::PeerId;
use collab_primitives::substrate::{Substrate, SubstrateError};

pub struct SignalingChannel<S> {
    substrate: Arc<S>,
    signaling_path: String,
    self_id: PeerId,
}

impl<S: Substrate + 'static> SignalingChannel<S> {
    pub fn new(substrate: Arc<S>, signaling_path: String, self_id: PeerId) -> Self {
        Self {
            substrate,
            signaling_path,
            self_id,
        }
    }

    fn inbox_path(&self) -> String {
        format!("{}/{}", self.signaling_path, self.self_id.as_str())
    }

    /// Pushes `envelope` to `to`'s inbox.
    pub async fn send(&self, envelope: &SignalEnvelope) -> Result<String, SubstrateError> {
        let path = format!("{}/{}", self.signaling_path, envelope.to.as_str());
        let value = serde_json::to_value(envelope).expect("SignalEnvelope always serializes");
        self.substrate.push_child(&path, value).await
    }

    /// Spawns a task that subscribes to this peer's inbox and forwards each
    /// envelope to `out`, deleting the child immediately after each send
    /// (spec: "process, then delete that specific child").
    pub fn listen(self: Arc<Self>, out: mpsc::UnboundedSender<(String, SignalEnvelope)>) {
        tokio::spawn(async move {
            let mut added = self.substrate.subscribe_child_added(&self.inbox_path());
            while let Some(event) = added.next().await {
                match serde_json::from_value::<SignalEnvelope>(event.value) {
                    Ok(envelope) => {
                        let full_path = format!("{}/{}", self.inbox_path(), event.key);
                        if out.send((full_path.clone(), envelope)).is_err() {
                            break; // receiver dropped, e.g. session tearing down
                        }
                        if let Err(err) = self.substrate.remove(&full_path).await {
                            warn!(%err, path = %full_path, "failed to delete handled signal envelope");
                        }
                    }
                    Err(err) => {
                        warn!(%err, key = %event.key, "dropping malformed signal envelope");
                    }
                }
            }
        });
    }

    /// Batch-clears the whole inbox after a burst, instead of one delete per
    /// envelope.
    pub async fn clear_inbox(&self) -> Result<(), SubstrateError> {
        self.substrate.write(&self.inbox_path(), json!(null)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use collab_primitives::model::SignalKind;
    use collab_primitives::testing::MemorySubstrate;

    fn envelope(from: &str, to: &str) -> SignalEnvelope {
        SignalEnvelope {
            kind: SignalKind::Offer,
            sdp: collab_primitives::model::SessionDescription {
                kind: SignalKind::Offer,
                sdp: "sdp-blob".to_owned(),
            },
            from: PeerId::from(from),
            to: PeerId::from(to),
            timestamp: 0,
        }
    }

    #[tokio::test]
    async fn send_pushes_a_child_under_the_recipients_inbox() {
        let substrate = Arc::new(MemorySubstrate::new());
        let channel = SignalingChannel::new(substrate.clone(), "signaling".to_owned(), PeerId::from("a"));
        let path = channel.send(&envelope("a", "b")).await.unwrap();
        assert!(path.starts_with("signaling/b/"));
        assert!(substrate.read(&path).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn listen_forwards_and_deletes_each_envelope() {
        let substrate = Arc::new(MemorySubstrate::new());
        let sender_side = SignalingChannel::new(substrate.clone(), "signaling".to_owned(), PeerId::from("a"));
        let receiver_side = Arc::new(SignalingChannel::new(
            substrate.clone(),
            "signaling".to_owned(),
            PeerId::from("b"),
        ));

        let (tx, mut rx) = mpsc::unbounded_channel();
        Arc::clone(&receiver_side).listen(tx);

        let pushed_path = sender_side.send(&envelope("a", "b")).await.unwrap();

        let (path, envelope) = tokio::time::timeout(core::time::Duration::from_millis(200), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(path, pushed_path);
        assert_eq!(envelope.from, PeerId::from("a"));

        // give the delete a beat to land
        tokio::time::sleep(core::time::Duration::from_millis(20)).await;
        assert!(substrate.read(&pushed_path).await.unwrap().is_none());
    }
}
