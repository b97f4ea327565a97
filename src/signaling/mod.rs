//! Signaling wire protocol.
//!
//! - `protocol`: JSON message types exchanged with clients
//! - `validate`: parsing and shape checks for inbound frames
//!
//! # Messages
//!
//! Client → relay: `requestDiscover`, `offer`, `answer`.
//!
//! Relay → client: `responseDiscover`, `answer`, `offer` (forwarded),
//! `answerReceived`, `error`, `internalServerError`.

pub mod protocol;
pub mod validate;

pub use protocol::{
    Answer, ConnectionRecord, Offer, OfferEnvelope, PeerId, PeerNode, Request, Response,
    DEFAULT_DISCOVERER_ID, PROTOCOL_VERSION,
};
pub use validate::{parse_request, Frame};
