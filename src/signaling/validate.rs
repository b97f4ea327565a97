//! Parsing and shape checks for inbound frames.
//!
//! Rules are applied in order: payload kind, JSON syntax, `type` field, then
//! the per-type body shape. The first failing rule decides the error.

use serde::de::DeserializeOwned;
use serde_json::Value;

use super::protocol::{Answer, OfferEnvelope, Request};
use crate::error::ValidationError;

pub const TYPE_REQUEST_DISCOVER: &str = "requestDiscover";
pub const TYPE_OFFER: &str = "offer";
pub const TYPE_ANSWER: &str = "answer";

/// A raw inbound frame as delivered by the transport.
#[derive(Debug, Clone, Copy)]
pub enum Frame<'a> {
    Text(&'a str),
    Binary(&'a [u8]),
}

/// Parse a raw frame into a typed request.
pub fn parse_request(frame: Frame<'_>) -> Result<Request, ValidationError> {
    let text = match frame {
        Frame::Text(text) => text,
        Frame::Binary(_) => return Err(ValidationError::UnsupportedPayload),
    };

    let value: Value =
        serde_json::from_str(text).map_err(|e| ValidationError::InvalidJson(e.to_string()))?;

    let request_type = value
        .get("type")
        .and_then(Value::as_str)
        .ok_or(ValidationError::MissingType)?;

    match request_type {
        TYPE_REQUEST_DISCOVER => Ok(Request::Discover),
        TYPE_OFFER => body::<OfferEnvelope>(&value)
            .map(Request::Offer)
            .map_err(ValidationError::InvalidOfferShape),
        TYPE_ANSWER => body::<Answer>(&value)
            .map(Request::Answer)
            .map_err(ValidationError::InvalidAnswerShape),
        other => Err(ValidationError::UnknownRequestType(other.to_string())),
    }
}

/// Deserialize the `object` field of a request.
fn body<T: DeserializeOwned>(value: &Value) -> Result<T, String> {
    let object = value
        .get("object")
        .filter(|object| object.is_object())
        .ok_or_else(|| "missing object".to_string())?;
    T::deserialize(object).map_err(|e| e.to_string())
}
