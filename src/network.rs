//! Network directory and the external collaborators the dispatcher talks to.
//!
//! The directory owns every [`ConnectionRecord`] for the lifetime of the
//! process. It is append-only: the relay adds one record per accepted local
//! offer and never removes or edits one.

use std::collections::HashSet;

use anyhow::Result;
use async_trait::async_trait;
use log::debug;
use tokio::sync::RwLock;

use crate::signaling::protocol::{Answer, ConnectionRecord, Offer, OfferEnvelope, PeerNode};

/// Known nodes and the connections recorded between them.
#[derive(Debug)]
pub struct NetworkDirectory {
    discoverer: PeerNode,
    connections: RwLock<Vec<ConnectionRecord>>,
}

impl NetworkDirectory {
    pub fn new(discoverer: PeerNode) -> Self {
        Self {
            discoverer,
            connections: RwLock::new(Vec::new()),
        }
    }

    /// The relay's own node.
    pub fn discoverer(&self) -> &PeerNode {
        &self.discoverer
    }

    /// Whether `peer` is the relay's own node.
    pub fn is_discoverer(&self, peer: &PeerNode) -> bool {
        peer.id == self.discoverer.id
    }

    /// Append a connection record.
    pub async fn add_connection(&self, record: ConnectionRecord) {
        let mut connections = self.connections.write().await;
        debug!(
            "Recording connection {} -> {} (total: {})",
            record.from.id,
            record.to.id,
            connections.len() + 1
        );
        connections.push(record);
    }

    /// Snapshot of every recorded connection.
    pub async fn connections(&self) -> Vec<ConnectionRecord> {
        self.connections.read().await.clone()
    }

    pub async fn connection_count(&self) -> usize {
        self.connections.read().await.len()
    }

    /// Every distinct endpoint across all connections.
    ///
    /// Deduplicated by id, keeping the first-seen node, in first-seen order.
    /// Recomputed on each call.
    pub async fn list_known_peers(&self) -> Vec<PeerNode> {
        let connections = self.connections.read().await;
        let mut seen = HashSet::new();
        let mut peers = Vec::new();

        for record in connections.iter() {
            for node in [&record.from, &record.to] {
                if seen.insert(node.id.as_str()) {
                    peers.push(node.clone());
                }
            }
        }

        peers
    }
}

/// Outcome of accepting an offer addressed to the relay's own node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Accepted {
    /// Record to append to the directory.
    pub connection: ConnectionRecord,
    /// Answer to return to the offering peer.
    pub answer: Answer,
}

/// Accepts offers addressed to the relay's own node.
#[async_trait]
pub trait OfferAcceptor: Send + Sync {
    async fn accept(&self, offer: &Offer) -> Result<Accepted>;
}

/// Delivers offers to remote nodes. Fire-and-forget.
pub trait OfferRelay: Send + Sync {
    /// Returns true if the offer was handed to a delivery channel. Delivery to
    /// the peer itself is not guaranteed either way.
    fn forward(&self, target: &PeerNode, envelope: OfferEnvelope) -> bool;
}

/// Acceptor for a relay that never opens media or data channels itself.
///
/// Records the offering peer as connected to the discoverer, which makes it
/// discoverable, and answers with an empty session description.
#[derive(Debug, Clone)]
pub struct SignalingOnlyAcceptor {
    discoverer: PeerNode,
}

impl SignalingOnlyAcceptor {
    pub fn new(discoverer: PeerNode) -> Self {
        Self { discoverer }
    }
}

#[async_trait]
impl OfferAcceptor for SignalingOnlyAcceptor {
    async fn accept(&self, offer: &Offer) -> Result<Accepted> {
        Ok(Accepted {
            connection: ConnectionRecord::new(offer.from.clone(), self.discoverer.clone()),
            answer: Answer {
                from: self.discoverer.clone(),
                to: offer.from.clone(),
                sdp: String::new(),
            },
        })
    }
}
