//! # Chat Path
//!
//! Trivial by design (spec §4.6): a chat message is just a `message`
//! control frame, sendable in any `Ready` state, never intermixed with
//! file framing. Sent via [`crate::session::SessionCommand::SendChat`];
//! this module only builds the wire message.

use crate::control::ControlMessage;

/// Builds the control-channel message for one outgoing chat line.
pub fn chat_message(text: impl Into<String>) -> ControlMessage {
    ControlMessage::Message {
        content: text.into(),
    }
}
