//! Payload decoding: raw bytes into a validated [`ChangeRequest`].
//!
//! Pure; never performs I/O. Every failure is a [`DecodeError`], which the
//! consumer treats as poison for that one item.

use serde::Deserialize;
use serde_json::{Map, Value};
use thiserror::Error;

use crate::model::{Attribute, ChangeRequest, Operation};

/// Keys that only exist for transport and are stripped before storage.
pub const TRANSPORT_KEYS: [&str; 2] = ["requestId", "type"];

/// Attribute names owned by the widget itself.
pub const RESERVED_ATTRIBUTES: [&str; 4] = ["id", "owner", "label", "description"];

#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("malformed payload: {0}")]
    Malformed(String),

    #[error("missing required field: {0}")]
    MissingField(&'static str),

    #[error("unknown operation type: {0}")]
    UnknownOperation(String),

    #[error("attribute name {0:?} collides with a reserved field")]
    ReservedAttribute(String),

    #[error("field {field} cannot be used as a path segment: {value:?}")]
    InvalidField { field: &'static str, value: String },
}

/// Wire shape of a change request.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireRequest {
    request_id: Option<String>,
    widget_id: Option<String>,
    #[serde(rename = "type")]
    kind: Option<String>,
    owner: Option<String>,
    label: Option<String>,
    description: Option<String>,
    other_attributes: Option<Vec<Attribute>>,
}

/// Decode a raw payload into a change request.
pub fn decode(raw: &[u8]) -> Result<ChangeRequest, DecodeError> {
    let value: Value =
        serde_json::from_slice(raw).map_err(|e| DecodeError::Malformed(e.to_string()))?;
    let Value::Object(mut document) = value else {
        return Err(DecodeError::Malformed(
            "payload is not a JSON object".to_string(),
        ));
    };

    let wire: WireRequest = serde_json::from_value(Value::Object(document.clone()))
        .map_err(|e| DecodeError::Malformed(e.to_string()))?;

    let widget_id = wire
        .widget_id
        .filter(|id| !id.is_empty())
        .ok_or(DecodeError::MissingField("widgetId"))?;
    let operation: Operation = wire
        .kind
        .ok_or(DecodeError::MissingField("type"))?
        .parse()
        .map_err(DecodeError::UnknownOperation)?;

    let other_attributes = wire.other_attributes.unwrap_or_default();
    if let Some(clash) = other_attributes
        .iter()
        .find(|a| RESERVED_ATTRIBUTES.contains(&a.name.as_str()))
    {
        return Err(DecodeError::ReservedAttribute(clash.name.clone()));
    }

    strip_transport_keys(&mut document);

    Ok(ChangeRequest {
        request_id: wire.request_id,
        widget_id,
        operation,
        owner: wire.owner,
        label: wire.label,
        description: wire.description,
        other_attributes,
        document,
    })
}

fn strip_transport_keys(document: &mut Map<String, Value>) {
    for key in TRANSPORT_KEYS {
        document.remove(key);
    }
}
