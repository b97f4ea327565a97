//! Error types for the signaling relay.

use std::time::Duration;
use thiserror::Error;

use crate::signaling::protocol::PeerId;

/// Rejections produced while turning a raw frame into a [`Request`].
///
/// These are always client-input problems: the dispatcher turns them into an
/// `error` response and the session stays open.
///
/// [`Request`]: crate::signaling::protocol::Request
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    /// Binary (or otherwise non-text) frame.
    #[error("Unsupported payload: only text frames are accepted")]
    UnsupportedPayload,

    /// Frame is not valid JSON.
    #[error("Invalid JSON: {0}")]
    InvalidJson(String),

    /// JSON object without a string `type` field.
    #[error("Missing request type")]
    MissingType,

    /// `offer` request whose body does not match `{to, offer: {from, to, sdp}}`.
    #[error("Invalid offer request: {0}")]
    InvalidOfferShape(String),

    /// `answer` request whose body does not match `{from, to, sdp}`.
    #[error("Invalid answer request: {0}")]
    InvalidAnswerShape(String),

    /// `type` names no known request.
    #[error("Unknown request type: {0}")]
    UnknownRequestType(String),
}

/// Failures of a pending offer→answer rendezvous.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RendezvousError {
    /// Another offer to the same peer is still waiting for its answer.
    #[error("An offer to {0} is already waiting for an answer")]
    AlreadyPending(PeerId),

    /// No answer arrived before the deadline.
    #[error("Timed out after {after:?} waiting for an answer from {peer_id}")]
    TimedOut { peer_id: PeerId, after: Duration },

    /// The registration was dropped without an answer being delivered.
    #[error("Rendezvous for {0} closed without an answer")]
    Closed(PeerId),
}

/// Errors raised while handling a validated request.
#[derive(Debug, Error)]
pub enum DispatchError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Rendezvous(#[from] RendezvousError),

    /// Unexpected failure in the accept or forward path. The detail is logged
    /// server-side and never sent to the client.
    #[error("Internal failure: {0:#}")]
    Internal(anyhow::Error),
}

impl DispatchError {
    /// Returns true if the client should only see `internalServerError`.
    pub fn is_internal(&self) -> bool {
        matches!(self, DispatchError::Internal(_))
    }
}

/// Result type alias for dispatcher operations.
pub type DispatchResult<T> = Result<T, DispatchError>;
