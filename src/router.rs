//! Routes forwarded offers to live signaling sessions.
//!
//! A session is bound to every peer id it has declared as the `from` of an
//! offer or answer. Forwarding an offer to that id pushes it onto the
//! session's outbound queue.

use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;
use log::{debug, info, warn};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;

use crate::network::OfferRelay;
use crate::signaling::protocol::{OfferEnvelope, PeerId, PeerNode, Response};

/// Identifier of one connected session.
pub type SessionId = u64;

#[derive(Debug, Clone)]
struct Route {
    session: SessionId,
    tx: mpsc::Sender<Response>,
}

/// Peer id → owning session.
#[derive(Debug, Default)]
pub struct SessionRouter {
    routes: DashMap<PeerId, Route>,
    next_session: AtomicU64,
}

impl SessionRouter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocate an id for a newly accepted session.
    pub fn next_session_id(&self) -> SessionId {
        self.next_session.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Bind `peer_id` to `session`. A newer session claiming the same id
    /// replaces the older binding.
    pub fn bind(&self, peer_id: &str, session: SessionId, tx: &mpsc::Sender<Response>) {
        let previous = self.routes.insert(
            peer_id.to_string(),
            Route {
                session,
                tx: tx.clone(),
            },
        );

        match previous {
            Some(route) if route.session == session => {}
            Some(route) => info!(
                "Peer {} moved from session {} to session {}",
                peer_id, route.session, session
            ),
            None => debug!("Peer {} bound to session {}", peer_id, session),
        }
    }

    /// Drop every binding owned by `session`.
    pub fn unbind_session(&self, session: SessionId) {
        self.routes.retain(|peer_id, route| {
            let keep = route.session != session;
            if !keep {
                debug!("Peer {} unbound from session {}", peer_id, session);
            }
            keep
        });
    }

    /// Session currently bound to `peer_id`, if any.
    pub fn session_for(&self, peer_id: &str) -> Option<SessionId> {
        self.routes.get(peer_id).map(|route| route.session)
    }

    pub fn bound_count(&self) -> usize {
        self.routes.len()
    }
}

impl OfferRelay for SessionRouter {
    fn forward(&self, target: &PeerNode, envelope: OfferEnvelope) -> bool {
        let Some(route) = self.routes.get(&target.id).map(|route| route.clone()) else {
            warn!("No session bound to {}; offer not delivered", target.id);
            return false;
        };

        match route.tx.try_send(Response::Offer { object: envelope }) {
            Ok(()) => {
                debug!("Forwarded offer to {} via session {}", target.id, route.session);
                true
            }
            Err(TrySendError::Full(_)) => {
                warn!(
                    "Session {} outbound queue full; offer to {} dropped",
                    route.session, target.id
                );
                false
            }
            Err(TrySendError::Closed(_)) => {
                warn!(
                    "Session {} closed; offer to {} dropped",
                    route.session, target.id
                );
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::signaling::protocol::Offer;

    fn envelope(to: &str) -> OfferEnvelope {
        OfferEnvelope {
            to: PeerNode::new(to),
            offer: Offer {
                from: PeerNode::new("alice"),
                to: PeerNode::new(to),
                sdp: "v=0".into(),
            },
        }
    }

    #[tokio::test]
    async fn test_forward_reaches_bound_session() {
        let router = SessionRouter::new();
        let (tx, mut rx) = mpsc::channel(4);
        let session = router.next_session_id();
        router.bind("bob", session, &tx);

        assert!(router.forward(&PeerNode::new("bob"), envelope("bob")));
        assert_eq!(
            rx.recv().await,
            Some(Response::Offer {
                object: envelope("bob")
            })
        );
    }

    #[test]
    fn test_forward_without_binding() {
        let router = SessionRouter::new();
        assert!(!router.forward(&PeerNode::new("bob"), envelope("bob")));
    }

    #[test]
    fn test_forward_to_closed_session() {
        let router = SessionRouter::new();
        let (tx, rx) = mpsc::channel(1);
        router.bind("bob", 1, &tx);
        drop(rx);
        assert!(!router.forward(&PeerNode::new("bob"), envelope("bob")));
    }

    #[test]
    fn test_unbind_only_removes_own_routes() {
        let router = SessionRouter::new();
        let (tx1, _rx1) = mpsc::channel(1);
        let (tx2, _rx2) = mpsc::channel(1);
        router.bind("bob", 1, &tx1);
        router.bind("bob-alt", 1, &tx1);
        router.bind("carol", 2, &tx2);

        router.unbind_session(1);
        assert_eq!(router.bound_count(), 1);
        assert_eq!(router.session_for("carol"), Some(2));
        assert_eq!(router.session_for("bob"), None);
    }

    #[test]
    fn test_rebind_moves_peer() {
        let router = SessionRouter::new();
        let (tx1, _rx1) = mpsc::channel(1);
        let (tx2, _rx2) = mpsc::channel(1);
        router.bind("bob", 1, &tx1);
        router.bind("bob", 2, &tx2);

        // The old session closing must not drop the new binding.
        router.unbind_session(1);
        assert_eq!(router.session_for("bob"), Some(2));
    }

    #[test]
    fn test_session_ids_are_unique() {
        let router = SessionRouter::new();
        let a = router.next_session_id();
        let b = router.next_session_id();
        assert_ne!(a, b);
    }
}
