//! Assembles a [`crate::session::CollabSession`] from injected capability
//! implementations (spec §4.10, "Construction contract").
//!
//! The document and awareness replicas are constructed by the embedder, not
//! by this builder: their construction depends on whichever CRDT library is
//! plugged in, which is out of scope here. The builder owns wiring the
//! capability implementations together, not creating them.

use std::sync::Arc;

use collab_network::{EventSink, NetworkEvent, PeerConnectionManager};
use collab_primitives::awareness::AwarenessReplica;
use collab_primitives::document::DocumentReplica;
use collab_primitives::paths::PathKind;
use collab_primitives::peer_id::PeerId;
use collab_primitives::substrate::Substrate;
use collab_primitives::transport::PeerTransport;
use collab_sync::{AwarenessPipeline, SnapshotStore, UpdatePipeline};
use tokio::sync::mpsc;

use crate::config::SessionConfig;
use crate::error::SessionError;
use crate::session::CollabSession;

pub struct CollabSessionBuilder<S, T, D, A> {
    substrate: Arc<S>,
    transport: Arc<T>,
    document: Arc<D>,
    awareness: Arc<A>,
    doc_id: String,
    self_id: PeerId,
    self_client_id: u64,
    user_name: Option<String>,
    config: SessionConfig,
}

impl<S, T, D, A> CollabSessionBuilder<S, T, D, A>
where
    S: Substrate + 'static,
    T: PeerTransport + 'static,
    D: DocumentReplica + 'static,
    A: AwarenessReplica + 'static,
{
    pub fn new(
        substrate: Arc<S>,
        transport: Arc<T>,
        document: Arc<D>,
        awareness: Arc<A>,
        doc_id: impl Into<String>,
        self_client_id: u64,
    ) -> Self {
        Self {
            substrate,
            transport,
            document,
            awareness,
            doc_id: doc_id.into(),
            self_id: PeerId::random(),
            self_client_id,
            user_name: None,
            config: SessionConfig::default(),
        }
    }

    #[must_use]
    pub fn with_peer_id(mut self, self_id: PeerId) -> Self {
        self.self_id = self_id;
        self
    }

    /// Overrides the default `"User-<first 6 of peerId>"` awareness display
    /// name (spec §4.10, construction contract `user.name`).
    #[must_use]
    pub fn with_user_name(mut self, user_name: impl Into<String>) -> Self {
        self.user_name = Some(user_name.into());
        self
    }

    #[must_use]
    pub fn with_config(mut self, config: SessionConfig) -> Self {
        self.config = config;
        self
    }

    /// Resolves the four substrate subtrees, wires the network manager and
    /// the sync/persistence pipelines on top of it, and returns a session
    /// ready for [`CollabSession::start`]. Does not touch the network or the
    /// substrate itself: that is `start()`'s job, so construction failures
    /// (a misconfigured [`collab_primitives::paths::PathLayout`]) surface
    /// before anything observable happens.
    pub fn build(self) -> Result<Arc<CollabSession<S, T, D, A>>, SessionError> {
        let rooms_path = self.config.path_layout.resolve(PathKind::Rooms, &self.doc_id)?;
        let signaling_path = self.config.path_layout.resolve(PathKind::Signaling, &self.doc_id)?;
        let snapshots_path = self.config.path_layout.resolve(PathKind::Snapshots, &self.doc_id)?;
        let documents_path = self.config.path_layout.resolve(PathKind::Documents, &self.doc_id)?;
        let signaling_path_for_session = signaling_path.clone();

        let (network_tx, network_rx): (EventSink, mpsc::UnboundedReceiver<NetworkEvent>) =
            mpsc::unbounded_channel();
        let network = PeerConnectionManager::new(
            self.self_id.clone(),
            self.config.network.clone(),
            Arc::clone(&self.substrate),
            Arc::clone(&self.transport),
            rooms_path,
            signaling_path,
            network_tx,
        );

        let (sync_tx, sync_rx) = mpsc::unbounded_channel();
        let snapshots = SnapshotStore::new(
            Arc::clone(&self.substrate),
            Arc::clone(&self.document),
            snapshots_path,
            documents_path,
            self.config.sync.clone(),
            sync_tx.clone(),
        );
        let updates = UpdatePipeline::new(
            Arc::clone(&self.document),
            Arc::clone(&network),
            self.config.sync.clone(),
            sync_tx.clone(),
        );
        let awareness_pipeline = AwarenessPipeline::new(
            Arc::clone(&self.awareness),
            Arc::clone(&network),
            self.config.sync.clone(),
            sync_tx,
            self.self_client_id,
        );

        let user_name = self
            .user_name
            .unwrap_or_else(|| format!("User-{}", self.self_id.short()));

        Ok(CollabSession::new(
            self.doc_id,
            signaling_path_for_session,
            self.config,
            self.self_id,
            user_name,
            Arc::clone(&self.document),
            Arc::clone(&self.awareness),
            network,
            network_rx,
            snapshots,
            updates,
            awareness_pipeline,
            sync_rx,
        ))
    }
}
