//! Envelope codec: `{"type": ..., "body": {...}}` to typed messages and back.
//!
//! Decoding happens in two steps. [`decode`] checks the envelope shape and
//! keeps the body as raw JSON text; [`dispatch`] maps the tag to a body
//! schema. [`decode_message`] chains both and never fails: anything that
//! does not make it through becomes [`Message::Error`], and tags it does
//! not recognise become [`Message::Unknown`].

use serde::Serialize;
use serde_json::value::RawValue;
use std::collections::HashMap;

use super::message::{
    ErrorMessage, Message, UnknownMessage, METADATA, PROJECT, SOLUTION, VERSION,
};
use crate::error::{Result, TetherError};

/// A structurally valid envelope whose body has not been interpreted yet.
#[derive(Debug)]
pub struct Envelope {
    pub type_tag: String,
    pub body: Box<RawValue>,
}

#[derive(Serialize)]
struct OutEnvelope<'a, B: Serialize> {
    #[serde(rename = "type")]
    type_tag: &'a str,
    body: B,
}

/// Serialize a message as envelope text.
pub fn encode(message: &Message) -> Result<String> {
    let text = match message {
        Message::Version(body) => wrap(VERSION, body)?,
        Message::Solution(body) => wrap(SOLUTION, body)?,
        Message::Project(body) => wrap(PROJECT, body)?,
        Message::Metadata(body) => wrap(METADATA, body)?,
        Message::Unknown(unknown) => {
            let body = RawValue::from_string(unknown.body.clone())?;
            wrap(&unknown.type_tag, body)?
        }
        Message::Error(_) => return Err(TetherError::NotSendable("error")),
    };
    Ok(text)
}

fn wrap<B: Serialize>(type_tag: &str, body: B) -> Result<String> {
    Ok(serde_json::to_string(&OutEnvelope { type_tag, body })?)
}

/// Check the envelope shape: a JSON object with a non-empty string `type`
/// and an object `body`. Other top-level keys are ignored.
pub fn decode(text: &str) -> Result<Envelope> {
    let mut fields: HashMap<String, Box<RawValue>> = serde_json::from_str(text)
        .map_err(|e| TetherError::MalformedFrame(format!("not a json object: {}", e)))?;

    let type_tag = fields
        .remove("type")
        .ok_or_else(|| TetherError::MalformedFrame("missing 'type'".to_string()))?;
    let type_tag: String = serde_json::from_str(type_tag.get())
        .map_err(|_| TetherError::MalformedFrame("'type' is not a string".to_string()))?;
    if type_tag.is_empty() {
        return Err(TetherError::MalformedFrame("'type' is empty".to_string()));
    }

    let body = fields
        .remove("body")
        .ok_or_else(|| TetherError::MalformedFrame("missing 'body'".to_string()))?;
    if !body.get().starts_with('{') {
        return Err(TetherError::MalformedFrame("'body' is not an object".to_string()));
    }

    Ok(Envelope { type_tag, body })
}

/// Map an envelope to its typed message.
///
/// Known tags whose body does not match the schema are an error; unknown
/// tags are not.
pub fn dispatch(envelope: &Envelope) -> std::result::Result<Message, serde_json::Error> {
    let body = envelope.body.get();
    let message = match envelope.type_tag.as_str() {
        VERSION => Message::Version(serde_json::from_str(body)?),
        SOLUTION => Message::Solution(serde_json::from_str(body)?),
        PROJECT => Message::Project(serde_json::from_str(body)?),
        METADATA => Message::Metadata(serde_json::from_str(body)?),
        other => Message::Unknown(UnknownMessage {
            type_tag: other.to_string(),
            body: body.to_string(),
        }),
    };
    Ok(message)
}

/// Decode envelope text into exactly one message.
pub fn decode_message(text: &str) -> Message {
    let envelope = match decode(text) {
        Ok(envelope) => envelope,
        Err(e) => {
            return Message::Error(ErrorMessage {
                original_text: text.to_string(),
                detail: Some(e.to_string()),
            })
        }
    };

    match dispatch(&envelope) {
        Ok(message) => message,
        Err(e) => Message::Error(ErrorMessage {
            original_text: text.to_string(),
            detail: Some(format!("bad '{}' body: {}", envelope.type_tag, e)),
        }),
    }
}
