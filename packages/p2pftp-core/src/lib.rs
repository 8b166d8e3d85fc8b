//! # p2pftp-core
//!
//! The peer-side engine for direct, end-to-end peer-to-peer file transfer
//! and chat: a two-channel framing protocol, a capability handshake, a
//! sliding-window reliable transfer with selective retransmission and
//! congestion control, and the session state machine that binds it all
//! together. The rendezvous service, the SDP/ICE/DTLS substrate, and any
//! terminal UI are out of scope — this crate treats the substrate as an
//! opaque [`channel::Channel`] and the rendezvous as a typed WebSocket
//! message stream ([`signaling::RendezvousClient`]).
//!
//! ## Module Hierarchy
//!
//! - [`error`] — the crate's error taxonomy
//! - [`channel`] — the `Channel` trait and its in-process loopback impl
//! - [`frame`] — the 8-byte chunk framing codec
//! - [`control`] — the control-channel JSON message codec
//! - [`transfer`] — windowed sender/receiver halves of a file transfer
//! - [`session`] — the state machine binding two channels into one session
//! - [`chat`] — the trivial chat message path
//! - [`signaling`] — the rendezvous WebSocket client
//! - [`events`] — events a running session surfaces to its application
//! - [`speed`] — rolling-window transfer throughput estimation
//! - [`time`] — timestamp helpers

#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]
#![cfg_attr(docsrs, feature(doc_cfg))]

pub mod chat;
pub mod channel;
pub mod control;
pub mod error;
pub mod events;
pub mod frame;
pub mod session;
pub mod signaling;
pub mod speed;
pub mod time;
pub mod transfer;

pub use channel::{Channel, DuplexChannel};
pub use control::ControlMessage;
pub use error::{Error, Result};
pub use events::SessionEvent;
pub use session::{Session, SessionCommand, SessionConfig, SessionState};

/// Returns this crate's version, as set by Cargo at build time.
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
