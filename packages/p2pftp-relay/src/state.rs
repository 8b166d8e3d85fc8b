//! Relay state: the token registry.
//!
//! The rendezvous service's entire job is matching two opaque tokens and
//! forwarding messages between the WebSocket connections they're bound to.
//! No message content is inspected or persisted (spec §6: "Persisted state:
//! none").

use std::sync::Arc;

use dashmap::DashMap;
use rand::distributions::Alphanumeric;
use rand::Rng;
use tokio::sync::mpsc;

use crate::protocol::RendezvousMessage;

/// Length of an assigned rendezvous token.
pub const TOKEN_LEN: usize = 8;

/// Outbound channel to one connected client.
pub type ClientSender = mpsc::UnboundedSender<RendezvousMessage>;

/// Server-wide configuration.
#[derive(Debug, Clone)]
pub struct RelayConfig {
    pub port: u16,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self { port: 8080 }
    }
}

/// Shared relay state: every online client's token and outbound channel.
#[derive(Clone)]
pub struct RelayState {
    /// Token → sender for every currently-connected client.
    clients: Arc<DashMap<String, ClientSender>>,
    pub config: RelayConfig,
}

impl RelayState {
    pub fn new(config: RelayConfig) -> Self {
        Self {
            clients: Arc::new(DashMap::new()),
            config,
        }
    }

    /// Generates an unused 8-character opaque token and registers `sender`
    /// under it.
    pub fn register(&self, sender: ClientSender) -> String {
        loop {
            let token = random_token();
            if let dashmap::mapref::entry::Entry::Vacant(slot) = self.clients.entry(token.clone()) {
                slot.insert(sender);
                return token;
            }
        }
    }

    /// Removes a client's registration on disconnect.
    pub fn unregister(&self, token: &str) {
        self.clients.remove(token);
    }

    /// Forwards `message` to the client currently holding `token`, if any.
    pub fn send_to(&self, token: &str, message: RendezvousMessage) -> bool {
        match self.clients.get(token) {
            Some(sender) => sender.send(message).is_ok(),
            None => false,
        }
    }

    /// Number of currently-connected clients.
    pub fn online_count(&self) -> usize {
        self.clients.len()
    }
}

fn random_token() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(TOKEN_LEN)
        .map(char::from)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_register_assigns_token_of_expected_length() {
        let state = RelayState::new(RelayConfig::default());
        let (tx, _rx) = mpsc::unbounded_channel();
        let token = state.register(tx);
        assert_eq!(token.len(), TOKEN_LEN);
        assert_eq!(state.online_count(), 1);
    }

    #[test]
    fn test_unregister_removes_client() {
        let state = RelayState::new(RelayConfig::default());
        let (tx, _rx) = mpsc::unbounded_channel();
        let token = state.register(tx);
        state.unregister(&token);
        assert_eq!(state.online_count(), 0);
    }

    #[tokio::test]
    async fn test_send_to_delivers_and_reports_success() {
        let state = RelayState::new(RelayConfig::default());
        let (tx, mut rx) = mpsc::unbounded_channel();
        let token = state.register(tx);

        let delivered = state.send_to(&token, RendezvousMessage::Request { token: "peer1234".into() });
        assert!(delivered);
        let received = rx.recv().await.unwrap();
        assert_eq!(received, RendezvousMessage::Request { token: "peer1234".into() });
    }

    #[test]
    fn test_send_to_unknown_token_reports_failure() {
        let state = RelayState::new(RelayConfig::default());
        assert!(!state.send_to("nobody12", RendezvousMessage::Accepted { token: "x".into() }));
    }
}
