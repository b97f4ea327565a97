//! JSON wire types for the discovery signaling protocol.

use serde::{Deserialize, Serialize};

/// Wire protocol revision.
///
/// Revision 2 carries the routing target next to the offer payload
/// (`{"object":{"to":..,"offer":..}}`). The flat revision-1 shape
/// (`{"offer":..,"to":..}`) is rejected.
pub const PROTOCOL_VERSION: u16 = 2;

/// Reserved id of the relay's own node unless configured otherwise.
pub const DEFAULT_DISCOVERER_ID: &str = "discoverer";

/// Opaque unique identifier of a node.
pub type PeerId = String;

/// A node in the peer network.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PeerNode {
    pub id: PeerId,
}

impl PeerNode {
    pub fn new(id: impl Into<PeerId>) -> Self {
        Self { id: id.into() }
    }
}

/// Directed connection between two nodes, as recorded in the network directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionRecord {
    pub from: PeerNode,
    pub to: PeerNode,
}

impl ConnectionRecord {
    pub fn new(from: PeerNode, to: PeerNode) -> Self {
        Self { from, to }
    }
}

/// Session-description offer. `sdp` is never inspected.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Offer {
    pub from: PeerNode,
    pub to: PeerNode,
    pub sdp: String,
}

/// Reciprocal session-description answer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Answer {
    pub from: PeerNode,
    pub to: PeerNode,
    pub sdp: String,
}

/// Body of an `offer` message: the routing target plus the offer itself.
///
/// Used both inbound (client → relay) and outbound when the relay pushes a
/// forwarded offer to the target's session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OfferEnvelope {
    pub to: PeerNode,
    pub offer: Offer,
}

/// A validated inbound request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Request {
    /// `{"type":"requestDiscover"}`
    Discover,
    /// `{"type":"offer","object":{"to":..,"offer":..}}`
    Offer(OfferEnvelope),
    /// `{"type":"answer","object":{"from":..,"to":..,"sdp":..}}`
    Answer(Answer),
}

impl Request {
    /// Id the sending client declared for itself, if the request carries one.
    pub fn sender_id(&self) -> Option<&str> {
        match self {
            Request::Discover => None,
            Request::Offer(envelope) => Some(envelope.offer.from.id.as_str()),
            Request::Answer(answer) => Some(answer.from.id.as_str()),
        }
    }
}

/// Every message the relay writes to a client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum Response {
    #[serde(rename = "responseDiscover")]
    Discover { object: PeerNode },
    Answer { object: Answer },
    /// Offer forwarded to the session bound to its target.
    Offer { object: OfferEnvelope },
    /// Acknowledges an inbound answer, whether or not anyone was waiting for it.
    AnswerReceived,
    Error { message: String },
    InternalServerError,
}

impl Response {
    pub fn error(message: impl Into<String>) -> Self {
        Response::Error {
            message: message.into(),
        }
    }

    /// Encode to a JSON text frame.
    pub fn encode(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }

    /// Decode from a JSON text frame.
    pub fn decode(text: &str) -> serde_json::Result<Self> {
        serde_json::from_str(text)
    }
}
