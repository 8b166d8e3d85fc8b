//! # Control Codec
//!
//! Typed JSON messages carried on the control channel. Every recognized
//! message is a tagged variant of [`ControlMessage`]; anything else is
//! preserved as [`ControlMessage::Unknown`] rather than rejected outright,
//! so a future protocol revision can add message types without breaking
//! older peers (spec §9: "Polymorphism over message kinds").

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{Error, Result};

/// Metadata describing a file offered for transfer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileMetadata {
    /// The file's name (no path component).
    pub name: String,
    /// Total size in bytes.
    pub size: u64,
    /// Lowercase hex-encoded MD5 of the whole file.
    pub md5: String,
}

/// One message on the control channel.
///
/// Variant names and field names mirror the wire encoding exactly (spec
/// §4.2): `capabilities`, `capabilities-ack`, `message`, `file-info`,
/// `chunk-info`, `chunk-confirm`, `request-chunks`, `file-complete`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ControlMessage {
    /// Sent once by each peer as soon as its channels open, advertising the
    /// largest chunk size it is willing to use.
    Capabilities {
        #[serde(rename = "maxChunkSize")]
        max_chunk_size: u32,
    },
    /// Sent in reply to a peer's `capabilities`, confirming the negotiated
    /// effective chunk size.
    CapabilitiesAck {
        #[serde(rename = "negotiatedChunkSize")]
        negotiated_chunk_size: u32,
    },
    /// A chat message. Never intermixed with file framing.
    Message { content: String },
    /// Announces an outbound transfer about to begin.
    FileInfo { info: FileMetadata },
    /// Advisory per-chunk metadata; the receiver does not depend on this
    /// arriving before (or even matching, in timing terms) the framed
    /// datagram it describes — the frame header is authoritative.
    ChunkInfo {
        sequence: u32,
        #[serde(rename = "totalChunks")]
        total_chunks: u32,
        size: u32,
    },
    /// Acknowledges receipt of one chunk.
    ChunkConfirm { sequence: u32 },
    /// Asks the peer to resend the given sequences.
    RequestChunks { sequences: Vec<u32> },
    /// Announces that the sender has emitted every chunk and is done.
    FileComplete {},
    /// A message type this build does not recognize. Logged and ignored;
    /// the original `type` tag is retained for diagnostics.
    #[serde(skip)]
    Unknown(String),
}

/// Parses one control-channel JSON message.
///
/// Unlike a plain `serde_json::from_str::<ControlMessage>`, unrecognized
/// `type` tags do not fail this call — they come back as
/// [`ControlMessage::Unknown`] so the caller can log and drop them (spec
/// §4.2: "Unknown message types are logged and ignored"). Malformed JSON,
/// or a recognized tag whose fields don't match, is reported as
/// [`Error::MalformedControl`].
pub fn parse(text: &str) -> Result<ControlMessage> {
    let value: Value = serde_json::from_str(text)
        .map_err(|e| Error::MalformedControl(format!("invalid JSON: {e}")))?;
    let type_tag = value
        .get("type")
        .and_then(Value::as_str)
        .ok_or_else(|| Error::MalformedControl("missing \"type\" field".into()))?
        .to_string();

    let parse_fields = |v: Value| -> Result<ControlMessage> {
        serde_json::from_value(v)
            .map_err(|e| Error::MalformedControl(format!("bad fields for \"{type_tag}\": {e}")))
    };

    match type_tag.as_str() {
        "capabilities" => parse_fields(value),
        "capabilities-ack" => parse_fields(value),
        "message" => parse_fields(value),
        "file-info" => parse_fields(value),
        "chunk-info" => parse_fields(value),
        "chunk-confirm" => parse_fields(value),
        "request-chunks" => parse_fields(value),
        "file-complete" => Ok(ControlMessage::FileComplete {}),
        other => Ok(ControlMessage::Unknown(other.to_string())),
    }
}

/// Serializes a control-channel message to its wire JSON.
///
/// Only recognized variants may be encoded; encoding `Unknown` is a logic
/// error since this side never originates a message type it doesn't
/// understand.
pub fn encode(message: &ControlMessage) -> Result<String> {
    if matches!(message, ControlMessage::Unknown(_)) {
        return Err(Error::MalformedControl(
            "refusing to encode an Unknown control message".into(),
        ));
    }
    serde_json::to_string(message)
        .map_err(|e| Error::MalformedControl(format!("failed to serialize: {e}")))
}

// `ControlMessage` needs a hand-written `Deserialize` impl because
// `#[serde(tag = "type")]` has no way to express "fall back to Unknown(tag)"
// for an unrecognized tag while still deriving the recognized variants —
// `parse` above does this instead and is the only supported entry point for
// inbound messages. `Deserialize` is still implemented for symmetry with
// tests that round-trip individual known variants directly.
impl<'de> Deserialize<'de> for ControlMessage {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let value = Value::deserialize(deserializer)?;
        let text = value.to_string();
        parse(&text).map_err(serde::de::Error::custom)
    }
}
