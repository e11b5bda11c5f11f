//! Text-frame codec for [`ControlMessage`].

use crate::message::ControlMessage;
use serde_json::Value;

#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("control frame is not a JSON object: {0}")]
    NotJson(#[source] serde_json::Error),
    #[error("control frame has no string `type` field")]
    MissingType,
    #[error("malformed `{kind}` frame: {source}")]
    Malformed {
        kind: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("failed to encode `{kind}` frame: {source}")]
    Encode {
        kind: String,
        #[source]
        source: serde_json::Error,
    },
}

/// Encodes a message as a JSON text frame.
pub fn encode(message: &ControlMessage) -> Result<String, CodecError> {
    let encoded = match message {
        ControlMessage::Unknown { payload, .. } => serde_json::to_string(payload),
        typed => serde_json::to_string(typed),
    };
    encoded.map_err(|source| CodecError::Encode {
        kind: message.kind().to_string(),
        source,
    })
}

/// Decodes a JSON text frame.
///
/// Frames with an unrecognised `type` decode successfully to
/// [`ControlMessage::Unknown`]; only frames that are not objects, lack a
/// `type`, or carry wrongly typed fields for a known `type` are errors.
pub fn decode(frame: &str) -> Result<ControlMessage, CodecError> {
    let value: Value = serde_json::from_str(frame).map_err(CodecError::NotJson)?;
    let kind = value
        .get("type")
        .and_then(Value::as_str)
        .ok_or(CodecError::MissingType)?
        .to_string();

    if !ControlMessage::KNOWN_KINDS.contains(&kind.as_str()) {
        return Ok(ControlMessage::Unknown {
            kind,
            payload: value,
        });
    }

    serde_json::from_value(value).map_err(|source| CodecError::Malformed { kind, source })
}
