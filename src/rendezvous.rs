//! One-shot offer→answer rendezvous keyed by target peer id.
//!
//! A forwarding request registers a waiter for the target, forwards the offer,
//! then suspends on [`PendingAnswer::wait`]. Whichever session later receives
//! the target's answer calls [`RendezvousRegister::fulfill`], which completes
//! the waiter and removes the registration in one step.
//!
//! At most one waiter exists per peer id. A second registration while the
//! first is still live is rejected with [`RendezvousError::AlreadyPending`].

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use log::{debug, warn};
use tokio::sync::oneshot;

use crate::error::RendezvousError;
use crate::signaling::protocol::{Answer, PeerId};

/// Registered waiter. The ticket lets a dropped or timed-out handle remove
/// only its own entry.
#[derive(Debug)]
struct Waiter {
    ticket: u64,
    tx: oneshot::Sender<Answer>,
}

/// Registry of pending rendezvous, shared by all sessions.
#[derive(Debug, Default)]
pub struct RendezvousRegister {
    waiters: DashMap<PeerId, Waiter>,
    next_ticket: AtomicU64,
}

impl RendezvousRegister {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a waiter for `peer_id`.
    ///
    /// Must be called before the offer is forwarded so an answer that arrives
    /// immediately still finds the waiter.
    pub fn register(self: &Arc<Self>, peer_id: &str) -> Result<PendingAnswer, RendezvousError> {
        let (tx, rx) = oneshot::channel();
        let ticket = self.next_ticket.fetch_add(1, Ordering::Relaxed);

        match self.waiters.entry(peer_id.to_string()) {
            Entry::Occupied(mut occupied) => {
                // A closed receiver means the previous handle is gone; reuse the slot.
                if !occupied.get().tx.is_closed() {
                    return Err(RendezvousError::AlreadyPending(peer_id.to_string()));
                }
                occupied.insert(Waiter { ticket, tx });
            }
            Entry::Vacant(vacant) => {
                vacant.insert(Waiter { ticket, tx });
            }
        }

        debug!("Rendezvous registered for {} (ticket {})", peer_id, ticket);

        Ok(PendingAnswer {
            register: Arc::clone(self),
            peer_id: peer_id.to_string(),
            ticket,
            rx,
        })
    }

    /// Register and wait in one call.
    pub async fn await_answer(
        self: &Arc<Self>,
        peer_id: &str,
        timeout: Option<Duration>,
    ) -> Result<Answer, RendezvousError> {
        self.register(peer_id)?.wait(timeout).await
    }

    /// Deliver `answer` to the waiter registered for `peer_id`.
    ///
    /// Returns false if nobody was waiting; the answer is dropped.
    pub fn fulfill(&self, peer_id: &str, answer: Answer) -> bool {
        let Some((_, waiter)) = self.waiters.remove(peer_id) else {
            warn!("Dropping answer from {}: no offer is waiting for it", peer_id);
            return false;
        };

        match waiter.tx.send(answer) {
            Ok(()) => {
                debug!("Rendezvous fulfilled for {} (ticket {})", peer_id, waiter.ticket);
                true
            }
            Err(_) => {
                warn!("Dropping answer from {}: waiter already gone", peer_id);
                false
            }
        }
    }

    /// Whether a live waiter is registered for `peer_id`.
    pub fn is_pending(&self, peer_id: &str) -> bool {
        self.waiters
            .get(peer_id)
            .map(|waiter| !waiter.tx.is_closed())
            .unwrap_or(false)
    }

    /// Number of registered waiters.
    pub fn pending_count(&self) -> usize {
        self.waiters.len()
    }

    fn release(&self, peer_id: &str, ticket: u64) {
        if self
            .waiters
            .remove_if(peer_id, |_, waiter| waiter.ticket == ticket)
            .is_some()
        {
            debug!("Rendezvous released for {} (ticket {})", peer_id, ticket);
        }
    }
}

/// Handle to a registered waiter. Dropping it removes the registration.
#[derive(Debug)]
pub struct PendingAnswer {
    register: Arc<RendezvousRegister>,
    peer_id: PeerId,
    ticket: u64,
    rx: oneshot::Receiver<Answer>,
}

impl PendingAnswer {
    pub fn peer_id(&self) -> &str {
        &self.peer_id
    }

    /// Suspend until the answer arrives, or until `timeout` elapses.
    ///
    /// `None` waits indefinitely.
    pub async fn wait(mut self, timeout: Option<Duration>) -> Result<Answer, RendezvousError> {
        let received = match timeout {
            Some(limit) => match tokio::time::timeout(limit, &mut self.rx).await {
                Ok(received) => received,
                Err(_) => {
                    return self.take_late_answer().ok_or_else(|| RendezvousError::TimedOut {
                        peer_id: self.peer_id.clone(),
                        after: limit,
                    })
                }
            },
            None => (&mut self.rx).await,
        };

        received.map_err(|_| RendezvousError::Closed(self.peer_id.clone()))
    }

    /// Stop accepting answers, then pick up one that was sent after the
    /// deadline fired but before the receiver closed.
    fn take_late_answer(&mut self) -> Option<Answer> {
        self.rx.close();
        self.rx.try_recv().ok()
    }
}

impl Drop for PendingAnswer {
    fn drop(&mut self) {
        self.register.release(&self.peer_id, self.ticket);
    }
}
