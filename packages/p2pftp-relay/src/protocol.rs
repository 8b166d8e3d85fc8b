//! Rendezvous wire protocol (spec §6).
//!
//! Every message is tagged JSON over the one WebSocket connection a client
//! holds with the relay. The relay matches peers by their opaque token only;
//! `sdp` and `ice` payloads are forwarded byte-for-byte, never inspected.

use serde::{Deserialize, Serialize};

/// One message on the rendezvous wire protocol.
///
/// `Offer`/`Answer`/`Ice` carry `peerToken` when a client originates them
/// (the token they're addressing) and `token` when the server forwards them
/// on (the sender's own token, rewritten in transit) — both fields are
/// optional so one variant covers both directions of the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RendezvousMessage {
    /// Server→client on connect: the newly assigned opaque token.
    Token { token: String },
    /// Client→server: ask to connect to a peer by its token.
    Connect {
        #[serde(rename = "peerToken")]
        peer_token: String,
    },
    /// Server→peer: someone wants to connect.
    Request { token: String },
    /// Client→server: accept an incoming request.
    Accept {
        #[serde(rename = "peerToken")]
        peer_token: String,
    },
    /// Client→server: reject an incoming request.
    Reject {
        #[serde(rename = "peerToken")]
        peer_token: String,
    },
    /// Server→initiator: the peer accepted.
    Accepted { token: String },
    /// Server→initiator: the peer rejected.
    Rejected { token: String },
    /// SDP offer, forwarded opaque by the server.
    Offer {
        #[serde(rename = "peerToken", skip_serializing_if = "Option::is_none", default)]
        peer_token: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none", default)]
        token: Option<String>,
        sdp: String,
    },
    /// SDP answer, forwarded opaque by the server.
    Answer {
        #[serde(rename = "peerToken", skip_serializing_if = "Option::is_none", default)]
        peer_token: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none", default)]
        token: Option<String>,
        sdp: String,
    },
    /// ICE candidate, forwarded opaque by the server.
    Ice {
        #[serde(rename = "peerToken", skip_serializing_if = "Option::is_none", default)]
        peer_token: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none", default)]
        token: Option<String>,
        ice: String,
    },
    /// Server→client: something went wrong. The reason is carried in the
    /// overloaded `sdp` field for wire compatibility (spec §9 Open
    /// Questions); `reason` is additionally populated for clients that look
    /// there instead.
    Error {
        #[serde(skip_serializing_if = "Option::is_none", default)]
        sdp: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none", default)]
        reason: Option<String>,
    },
}

impl RendezvousMessage {
    /// Builds the one error shape the relay ever originates, populating
    /// both the overloaded `sdp` field and the dedicated `reason` field with
    /// the same text.
    pub fn error(message: impl Into<String>) -> Self {
        let message = message.into();
        RendezvousMessage::Error {
            sdp: Some(message.clone()),
            reason: Some(message),
        }
    }

    /// The peer/remote token this message addresses, for the client→server
    /// variants that name one.
    pub fn addressed_peer_token(&self) -> Option<&str> {
        match self {
            RendezvousMessage::Connect { peer_token }
            | RendezvousMessage::Accept { peer_token }
            | RendezvousMessage::Reject { peer_token } => Some(peer_token),
            RendezvousMessage::Offer { peer_token, .. }
            | RendezvousMessage::Answer { peer_token, .. }
            | RendezvousMessage::Ice { peer_token, .. } => peer_token.as_deref(),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_token_message_shape() {
        let json = serde_json::to_string(&RendezvousMessage::Token {
            token: "ab12cd34".into(),
        })
        .unwrap();
        assert_eq!(json, r#"{"type":"token","token":"ab12cd34"}"#);
    }

    #[test]
    fn test_connect_parses_peer_token_field() {
        let json = r#"{"type":"connect","peerToken":"xyz98765"}"#;
        let msg: RendezvousMessage = serde_json::from_str(json).unwrap();
        assert_eq!(msg.addressed_peer_token(), Some("xyz98765"));
    }

    #[test]
    fn test_error_populates_both_overloaded_and_reason_fields() {
        let msg = RendezvousMessage::error("peer token not found");
        let json = serde_json::to_string(&msg).unwrap();
        assert!(json.contains(r#""sdp":"peer token not found""#));
        assert!(json.contains(r#""reason":"peer token not found""#));
    }

    #[test]
    fn test_offer_omits_absent_optional_fields() {
        let msg = RendezvousMessage::Offer {
            peer_token: Some("a1b2c3d4".into()),
            token: None,
            sdp: "v=0...".into(),
        };
        let json = serde_json::to_string(&msg).unwrap();
        assert!(!json.contains("\"token\""));
        assert!(json.contains("\"peerToken\":\"a1b2c3d4\""));
    }
}
