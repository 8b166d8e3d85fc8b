//! WebSocket connection handler.
//!
//! One task per connected client: assigns a token on connect, spawns a
//! sender task forwarding queued outbound messages, then loops reading
//! client messages and routing them by the token they address (spec §6).

use axum::extract::ws::{Message, WebSocket};
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;

use crate::protocol::RendezvousMessage;
use crate::state::RelayState;

/// Drives one client's WebSocket connection for its full lifetime.
pub async fn handle_websocket(socket: WebSocket, state: RelayState) {
    let (mut ws_sender, mut ws_receiver) = socket.split();
    let (tx, mut rx) = mpsc::unbounded_channel::<RendezvousMessage>();

    let token = state.register(tx);
    tracing::info!(token = token.as_str(), "client connected");

    if send_message(&mut ws_sender, &RendezvousMessage::Token { token: token.clone() })
        .await
        .is_err()
    {
        state.unregister(&token);
        return;
    }

    let sender_task = tokio::spawn(async move {
        while let Some(message) = rx.recv().await {
            if send_message(&mut ws_sender, &message).await.is_err() {
                break;
            }
        }
    });

    while let Some(frame) = ws_receiver.next().await {
        match frame {
            Ok(Message::Text(text)) => handle_client_text(&state, &token, &text).await,
            Ok(Message::Close(_)) => break,
            Ok(_) => continue,
            Err(e) => {
                tracing::debug!(token = token.as_str(), error = %e, "websocket read error");
                break;
            }
        }
    }

    state.unregister(&token);
    sender_task.abort();
    tracing::info!(token = token.as_str(), "client disconnected");
}

async fn send_message(
    sender: &mut futures::stream::SplitSink<WebSocket, Message>,
    message: &RendezvousMessage,
) -> Result<(), axum::Error> {
    let text = serde_json::to_string(message).expect("RendezvousMessage always serializes");
    sender.send(Message::Text(text)).await
}

/// Parses and routes one inbound client message. Malformed JSON is logged
/// and dropped — the relay's wire contract has no client-visible parse
/// error beyond the token-not-found case.
async fn handle_client_text(state: &RelayState, from_token: &str, text: &str) {
    let message: RendezvousMessage = match serde_json::from_str(text) {
        Ok(m) => m,
        Err(e) => {
            tracing::debug!(token = from_token, error = %e, "dropping malformed rendezvous message");
            return;
        }
    };

    match message {
        RendezvousMessage::Connect { peer_token } => {
            route_or_report_missing(state, from_token, &peer_token, RendezvousMessage::Request {
                token: from_token.to_string(),
            });
        }
        RendezvousMessage::Accept { peer_token } => {
            route_or_report_missing(state, from_token, &peer_token, RendezvousMessage::Accepted {
                token: from_token.to_string(),
            });
        }
        RendezvousMessage::Reject { peer_token } => {
            route_or_report_missing(state, from_token, &peer_token, RendezvousMessage::Rejected {
                token: from_token.to_string(),
            });
        }
        RendezvousMessage::Offer { peer_token: Some(peer_token), sdp, .. } => {
            route_or_report_missing(state, from_token, &peer_token, RendezvousMessage::Offer {
                peer_token: None,
                token: Some(from_token.to_string()),
                sdp,
            });
        }
        RendezvousMessage::Answer { peer_token: Some(peer_token), sdp, .. } => {
            route_or_report_missing(state, from_token, &peer_token, RendezvousMessage::Answer {
                peer_token: None,
                token: Some(from_token.to_string()),
                sdp,
            });
        }
        RendezvousMessage::Ice { peer_token: Some(peer_token), ice, .. } => {
            route_or_report_missing(state, from_token, &peer_token, RendezvousMessage::Ice {
                peer_token: None,
                token: Some(from_token.to_string()),
                ice,
            });
        }
        other => {
            tracing::debug!(token = from_token, ?other, "ignoring message with no addressable peer token");
        }
    }
}

/// Forwards `forwarded` to `peer_token`'s connection; if that token isn't
/// currently online, replies to the sender with `PeerNotFound` instead
/// (spec §7).
fn route_or_report_missing(
    state: &RelayState,
    from_token: &str,
    peer_token: &str,
    forwarded: RendezvousMessage,
) {
    if state.send_to(peer_token, forwarded) {
        return;
    }
    tracing::debug!(from = from_token, peer = peer_token, "peer token not found");
    state.send_to(
        from_token,
        RendezvousMessage::error(format!("peer token not found: {peer_token}")),
    );
}
