//! Request dispatcher.
//!
//! One call per inbound request, ending in exactly one [`Response`]:
//!
//! - `requestDiscover` → `responseDiscover` with a uniformly chosen known peer
//!   (or the discoverer itself while the directory is empty)
//! - `offer` to the discoverer → local accept → `answer`
//! - `offer` to anyone else → register rendezvous, forward, wait → `answer`
//! - `answer` → fulfil the matching rendezvous → `answerReceived`
//! - validation or rendezvous failure → `error`
//! - unexpected failure → `internalServerError` (detail only in the log)

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use anyhow::anyhow;
use log::{debug, error, info};
use rand::{Rng, RngCore};

use crate::error::{DispatchError, DispatchResult};
use crate::network::{NetworkDirectory, OfferAcceptor, OfferRelay};
use crate::rendezvous::RendezvousRegister;
use crate::signaling::protocol::{Answer, OfferEnvelope, PeerNode, Request, Response};

/// Source of uniform indices for peer selection.
pub trait UniformSource: Send + Sync {
    /// Uniform index in `[0, len)`. `len` is never zero.
    fn pick(&self, len: usize) -> usize;
}

/// Thread-local RNG from `rand`.
#[derive(Debug, Default, Clone, Copy)]
pub struct ThreadRngSource;

impl UniformSource for ThreadRngSource {
    fn pick(&self, len: usize) -> usize {
        rand::rng().random_range(0..len)
    }
}

/// Any RNG behind a mutex, e.g. a seeded generator for reproducible selection.
impl<R: RngCore + Send> UniformSource for Mutex<R> {
    fn pick(&self, len: usize) -> usize {
        let mut rng = self.lock().unwrap_or_else(PoisonError::into_inner);
        rng.random_range(0..len)
    }
}

/// Routes validated requests and turns their outcome into a [`Response`].
pub struct Dispatcher {
    directory: Arc<NetworkDirectory>,
    rendezvous: Arc<RendezvousRegister>,
    acceptor: Arc<dyn OfferAcceptor>,
    relay: Arc<dyn OfferRelay>,
    selector: Arc<dyn UniformSource>,
    answer_timeout: Option<Duration>,
}

impl Dispatcher {
    pub fn new(
        directory: Arc<NetworkDirectory>,
        rendezvous: Arc<RendezvousRegister>,
        acceptor: Arc<dyn OfferAcceptor>,
        relay: Arc<dyn OfferRelay>,
    ) -> Self {
        Self {
            directory,
            rendezvous,
            acceptor,
            relay,
            selector: Arc::new(ThreadRngSource),
            answer_timeout: None,
        }
    }

    /// Replace the random source used for discovery.
    pub fn with_selector(mut self, selector: Arc<dyn UniformSource>) -> Self {
        self.selector = selector;
        self
    }

    /// Bound the wait for a forwarded offer's answer. `None` waits forever.
    pub fn with_answer_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.answer_timeout = timeout;
        self
    }

    pub fn directory(&self) -> &Arc<NetworkDirectory> {
        &self.directory
    }

    pub fn rendezvous(&self) -> &Arc<RendezvousRegister> {
        &self.rendezvous
    }

    /// Handle a validated request.
    pub async fn handle(&self, request: Request) -> Response {
        match self.try_handle(request).await {
            Ok(response) => response,
            Err(DispatchError::Internal(e)) => {
                error!("Request handling failed: {:#}", e);
                Response::InternalServerError
            }
            Err(e) => {
                debug!("Request failed: {}", e);
                Response::error(e.to_string())
            }
        }
    }

    async fn try_handle(&self, request: Request) -> DispatchResult<Response> {
        match request {
            Request::Discover => self.handle_discover().await,
            Request::Offer(envelope) => self.handle_offer(envelope).await,
            Request::Answer(answer) => Ok(self.handle_answer(answer)),
        }
    }

    async fn handle_discover(&self) -> DispatchResult<Response> {
        let nodes = self.directory.list_known_peers().await;
        if nodes.is_empty() {
            return Ok(Response::Discover {
                object: self.directory.discoverer().clone(),
            });
        }

        let count = nodes.len();
        let index = self.selector.pick(count);
        let node = nodes.into_iter().nth(index).ok_or_else(|| {
            DispatchError::Internal(anyhow!(
                "Selector returned index {} for {} peers",
                index,
                count
            ))
        })?;

        debug!("Discover: picked {} of {} known peers", node.id, count);
        Ok(Response::Discover { object: node })
    }

    async fn handle_offer(&self, envelope: OfferEnvelope) -> DispatchResult<Response> {
        let target = envelope.to.clone();

        if self.directory.is_discoverer(&target) {
            return self.accept_locally(envelope).await;
        }

        // Register before forwarding so an immediate answer finds the waiter.
        let pending = self.rendezvous.register(&target.id)?;
        info!(
            "Forwarding offer from {} to {}",
            envelope.offer.from.id, target.id
        );
        self.forward(&target, envelope);

        let answer = pending.wait(self.answer_timeout).await?;
        debug!("Received answer from {} for forwarded offer", answer.from.id);
        Ok(Response::Answer { object: answer })
    }

    async fn accept_locally(&self, envelope: OfferEnvelope) -> DispatchResult<Response> {
        let accepted = self
            .acceptor
            .accept(&envelope.offer)
            .await
            .map_err(DispatchError::Internal)?;

        info!("Accepted offer from {}", envelope.offer.from.id);
        self.directory.add_connection(accepted.connection).await;
        Ok(Response::Answer {
            object: accepted.answer,
        })
    }

    fn forward(&self, target: &PeerNode, envelope: OfferEnvelope) {
        if !self.relay.forward(target, envelope) {
            debug!("Offer to {} was not handed to any channel", target.id);
        }
    }

    fn handle_answer(&self, answer: Answer) -> Response {
        let from = answer.from.id.clone();
        if self.rendezvous.fulfill(&from, answer) {
            debug!("Delivered answer from {}", from);
        }
        Response::AnswerReceived
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::{Accepted, SignalingOnlyAcceptor};
    use crate::signaling::protocol::{ConnectionRecord, Offer};
    use crate::signaling::validate::{parse_request, Frame};
    use async_trait::async_trait;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;
    use serde_json::json;
    use std::collections::HashSet;

    /// Records forwarded offers instead of delivering them.
    #[derive(Default)]
    struct RecordingRelay {
        forwarded: Mutex<Vec<OfferEnvelope>>,
    }

    impl OfferRelay for RecordingRelay {
        fn forward(&self, _target: &PeerNode, envelope: OfferEnvelope) -> bool {
            self.forwarded.lock().unwrap().push(envelope);
            true
        }
    }

    struct FailingAcceptor;

    #[async_trait]
    impl OfferAcceptor for FailingAcceptor {
        async fn accept(&self, _offer: &Offer) -> anyhow::Result<Accepted> {
            Err(anyhow!("ICE gathering failed: secret detail"))
        }
    }

    struct Fixture {
        dispatcher: Arc<Dispatcher>,
        relay: Arc<RecordingRelay>,
    }

    fn fixture_with(acceptor: Arc<dyn OfferAcceptor>, timeout: Option<Duration>) -> Fixture {
        let directory = Arc::new(NetworkDirectory::new(PeerNode::new("discoverer")));
        let relay = Arc::new(RecordingRelay::default());
        let dispatcher = Dispatcher::new(
            directory,
            Arc::new(RendezvousRegister::new()),
            acceptor,
            relay.clone(),
        )
        .with_selector(Arc::new(Mutex::new(ChaCha8Rng::seed_from_u64(7))))
        .with_answer_timeout(timeout);
        Fixture {
            dispatcher: Arc::new(dispatcher),
            relay,
        }
    }

    fn fixture() -> Fixture {
        fixture_with(
            Arc::new(SignalingOnlyAcceptor::new(PeerNode::new("discoverer"))),
            Some(Duration::from_secs(5)),
        )
    }

    fn offer_to(from: &str, to: &str) -> Request {
        Request::Offer(OfferEnvelope {
            to: PeerNode::new(to),
            offer: Offer {
                from: PeerNode::new(from),
                to: PeerNode::new(to),
                sdp: format!("offer-from-{}", from),
            },
        })
    }

    fn answer_from(from: &str, to: &str, sdp: &str) -> Answer {
        Answer {
            from: PeerNode::new(from),
            to: PeerNode::new(to),
            sdp: sdp.to_string(),
        }
    }

    /// Parse then handle, the way a session does.
    async fn handle_text(dispatcher: &Dispatcher, text: &str) -> Response {
        match parse_request(Frame::Text(text)) {
            Ok(request) => dispatcher.handle(request).await,
            Err(e) => Response::error(e.to_string()),
        }
    }

    #[tokio::test]
    async fn test_discover_empty_returns_discoverer() {
        let f = fixture();
        let response = f.dispatcher.handle(Request::Discover).await;
        assert_eq!(
            response,
            Response::Discover {
                object: PeerNode::new("discoverer")
            }
        );
    }

    #[tokio::test]
    async fn test_discover_reaches_every_known_peer() {
        let f = fixture();
        let directory = f.dispatcher.directory();
        for id in ["a", "b", "c"] {
            directory
                .add_connection(ConnectionRecord::new(
                    PeerNode::new(id),
                    PeerNode::new("discoverer"),
                ))
                .await;
        }
        let known: HashSet<String> = directory
            .list_known_peers()
            .await
            .into_iter()
            .map(|p| p.id)
            .collect();

        let mut seen = HashSet::new();
        for _ in 0..200 {
            match f.dispatcher.handle(Request::Discover).await {
                Response::Discover { object } => {
                    assert!(known.contains(&object.id));
                    seen.insert(object.id);
                }
                other => panic!("unexpected response {:?}", other),
            }
        }
        assert_eq!(seen, known);
    }

    #[tokio::test]
    async fn test_local_offer_skips_rendezvous() {
        let f = fixture();
        let response = f.dispatcher.handle(offer_to("alice", "discoverer")).await;

        match response {
            Response::Answer { object } => {
                assert_eq!(object.from, PeerNode::new("discoverer"));
                assert_eq!(object.to, PeerNode::new("alice"));
            }
            other => panic!("unexpected response {:?}", other),
        }
        assert_eq!(f.dispatcher.rendezvous().pending_count(), 0);
        assert!(f.relay.forwarded.lock().unwrap().is_empty());

        let peers = f.dispatcher.directory().list_known_peers().await;
        assert!(peers.contains(&PeerNode::new("alice")));
    }

    #[tokio::test]
    async fn test_remote_offer_waits_for_answer() {
        let f = fixture();
        let dispatcher = Arc::clone(&f.dispatcher);
        let waiting = tokio::spawn(async move { dispatcher.handle(offer_to("alice", "bob")).await });

        // Wait until the offer is registered and forwarded.
        while !f.dispatcher.rendezvous().is_pending("bob") {
            tokio::task::yield_now().await;
        }
        assert_eq!(f.relay.forwarded.lock().unwrap().len(), 1);

        let ack = f
            .dispatcher
            .handle(Request::Answer(answer_from("bob", "alice", "bob-sdp")))
            .await;
        assert_eq!(ack, Response::AnswerReceived);

        let response = waiting.await.unwrap();
        assert_eq!(
            response,
            Response::Answer {
                object: answer_from("bob", "alice", "bob-sdp")
            }
        );
        assert_eq!(f.dispatcher.rendezvous().pending_count(), 0);
    }

    #[tokio::test]
    async fn test_concurrent_offer_to_same_peer_rejected() {
        let f = fixture();
        let dispatcher = Arc::clone(&f.dispatcher);
        let first = tokio::spawn(async move { dispatcher.handle(offer_to("alice", "bob")).await });

        while !f.dispatcher.rendezvous().is_pending("bob") {
            tokio::task::yield_now().await;
        }

        let second = f.dispatcher.handle(offer_to("carol", "bob")).await;
        match second {
            Response::Error { message } => assert!(message.contains("already waiting")),
            other => panic!("unexpected response {:?}", other),
        }

        f.dispatcher
            .handle(Request::Answer(answer_from("bob", "alice", "x")))
            .await;
        assert!(matches!(first.await.unwrap(), Response::Answer { .. }));
    }

    #[tokio::test]
    async fn test_remote_offer_times_out() {
        let f = fixture_with(
            Arc::new(SignalingOnlyAcceptor::new(PeerNode::new("discoverer"))),
            Some(Duration::from_millis(20)),
        );
        let response = f.dispatcher.handle(offer_to("alice", "ghost")).await;
        match response {
            Response::Error { message } => assert!(message.contains("Timed out")),
            other => panic!("unexpected response {:?}", other),
        }
        assert_eq!(f.dispatcher.rendezvous().pending_count(), 0);
    }

    #[tokio::test]
    async fn test_answer_without_waiter_is_acknowledged() {
        let f = fixture();
        let response = f
            .dispatcher
            .handle(Request::Answer(answer_from("bob", "alice", "x")))
            .await;
        assert_eq!(response, Response::AnswerReceived);
    }

    #[tokio::test]
    async fn test_accept_failure_is_internal_error() {
        let f = fixture_with(Arc::new(FailingAcceptor), None);
        let response = f.dispatcher.handle(offer_to("alice", "discoverer")).await;
        assert_eq!(response, Response::InternalServerError);
        assert_eq!(f.dispatcher.directory().connection_count().await, 0);
    }

    #[tokio::test]
    async fn test_malformed_json_is_error_response() {
        let f = fixture();
        let response = handle_text(&f.dispatcher, "{oops").await;
        match response {
            Response::Error { message } => assert!(message.starts_with("Invalid JSON")),
            other => panic!("unexpected response {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_offer_missing_sdp_is_rejected_before_forwarding() {
        let f = fixture();
        let frame = json!({
            "type": "offer",
            "object": {"to": {"id": "bob"}, "offer": {"from": {"id": "alice"}, "to": {"id": "bob"}}}
        })
        .to_string();

        let response = handle_text(&f.dispatcher, &frame).await;
        match response {
            Response::Error { message } => assert!(message.starts_with("Invalid offer request")),
            other => panic!("unexpected response {:?}", other),
        }
        assert!(f.relay.forwarded.lock().unwrap().is_empty());
        assert_eq!(f.dispatcher.rendezvous().pending_count(), 0);
    }

    #[test]
    fn test_seeded_source_stays_in_range() {
        let source = Mutex::new(ChaCha8Rng::seed_from_u64(1));
        for len in 1..50 {
            assert!(source.pick(len) < len);
        }
        assert_eq!(ThreadRngSource.pick(1), 0);
    }
}
