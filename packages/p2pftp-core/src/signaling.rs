//! # Signaling Adapter
//!
//! Translates the rendezvous service's WebSocket JSON stream (spec §6)
//! into session lifecycle events. [`RendezvousMessage`] is the wire
//! protocol; [`RendezvousClient`] is a thin `tokio-tungstenite` client
//! grounded in the teacher's `relay_client.rs` message shapes, generalized
//! to this spec's token/connect/accept/offer/answer/ice surface. The
//! rendezvous service itself — matching peers by token and forwarding
//! opaque blobs — is out of scope; only this wire contract is implemented
//! here.

use futures_util::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::net::TcpStream;
use tokio_tungstenite::{connect_async, tungstenite::Message as WsMessage, MaybeTlsStream, WebSocketStream};

use crate::error::{Error, Result};

/// One message on the rendezvous wire protocol (spec §6).
///
/// `Offer`/`Answer`/`Ice` carry `peerToken` when this side originates them
/// and `token` when the server forwards them (the server rewrites the
/// field name on the way through) — both are modeled as optional fields so
/// a single variant covers both directions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RendezvousMessage {
    /// Server→client on connect: our newly assigned opaque token.
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
    /// Error, carried in the overloaded `sdp` field (spec §9 Open
    /// Questions); a `reason` field is additionally tolerated for
    /// forward-compatible clients.
    Error {
        #[serde(skip_serializing_if = "Option::is_none", default)]
        sdp: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none", default)]
        reason: Option<String>,
    },
}

impl RendezvousMessage {
    /// The peer/remote token this message refers to, if any, regardless of
    /// whether it arrived as `peerToken` or the server-rewritten `token`.
    pub fn remote_token(&self) -> Option<&str> {
        match self {
            RendezvousMessage::Request { token } => Some(token),
            RendezvousMessage::Accepted { token } => Some(token),
            RendezvousMessage::Rejected { token } => Some(token),
            RendezvousMessage::Offer { peer_token, token, .. }
            | RendezvousMessage::Answer { peer_token, token, .. }
            | RendezvousMessage::Ice { peer_token, token, .. } => {
                peer_token.as_deref().or(token.as_deref())
            }
            _ => None,
        }
    }

    /// The human-readable text of an `error` message, preferring the
    /// dedicated `reason` field over the overloaded `sdp` field.
    pub fn error_reason(&self) -> Option<&str> {
        match self {
            RendezvousMessage::Error { sdp, reason } => reason.as_deref().or(sdp.as_deref()),
            _ => None,
        }
    }
}

/// A WebSocket client for the rendezvous service.
pub struct RendezvousClient {
    socket: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

impl RendezvousClient {
    /// Opens a WebSocket connection to the rendezvous service at `url`.
    pub async fn connect(url: &str) -> Result<Self> {
        let (socket, _response) = connect_async(url)
            .await
            .map_err(|e| Error::ConnectionLost(format!("rendezvous connect failed: {e}")))?;
        Ok(Self { socket })
    }

    /// Sends one rendezvous message.
    pub async fn send(&mut self, message: &RendezvousMessage) -> Result<()> {
        let text = serde_json::to_string(message)
            .map_err(|e| Error::MalformedControl(format!("failed to serialize: {e}")))?;
        self.socket
            .send(WsMessage::Text(text))
            .await
            .map_err(|e| Error::ConnectionLost(format!("rendezvous send failed: {e}")))
    }

    /// Receives the next rendezvous message, or `None` once the connection
    /// closes.
    pub async fn recv(&mut self) -> Option<Result<RendezvousMessage>> {
        loop {
            match self.socket.next().await? {
                Ok(WsMessage::Text(text)) => {
                    return Some(serde_json::from_str(&text).map_err(|e| {
                        Error::MalformedControl(format!("bad rendezvous message: {e}"))
                    }))
                }
                Ok(WsMessage::Close(_)) => return None,
                Ok(_) => continue, // ping/pong/binary — rendezvous never sends these
                Err(e) => return Some(Err(Error::ConnectionLost(e.to_string()))),
            }
        }
    }

    /// Convenience: initiates a connection to `peer_token`.
    pub async fn request_connect(&mut self, peer_token: impl Into<String>) -> Result<()> {
        self.send(&RendezvousMessage::Connect {
            peer_token: peer_token.into(),
        })
        .await
    }

    /// Convenience: accepts an incoming request from `peer_token`.
    pub async fn accept(&mut self, peer_token: impl Into<String>) -> Result<()> {
        self.send(&RendezvousMessage::Accept {
            peer_token: peer_token.into(),
        })
        .await
    }

    /// Convenience: rejects an incoming request from `peer_token`.
    pub async fn reject(&mut self, peer_token: impl Into<String>) -> Result<()> {
        self.send(&RendezvousMessage::Reject {
            peer_token: peer_token.into(),
        })
        .await
    }
}
