//! # Session Events
//!
//! Everything the session actor surfaces to the application layer —
//! lifecycle transitions, transfer progress, chat, and protocol-level
//! errors — flows out through a single [`SessionEvent`] broadcast
//! (`tokio::sync::broadcast`), the same shape the teacher uses for
//! `NetworkEvent`/`TransferEvent`.

use crate::session::SessionState;

/// An event emitted by a running [`crate::session::Session`].
#[derive(Debug, Clone)]
pub enum SessionEvent {
    /// The session's state machine transitioned.
    StateChanged {
        from: SessionState,
        to: SessionState,
    },
    /// A chat message arrived from the peer.
    ChatReceived { content: String },
    /// An inbound transfer began (`file-info` accepted).
    TransferStarted { name: String, size: u64 },
    /// Progress on the active outbound or inbound transfer.
    TransferProgress {
        direction: TransferDirection,
        chunks_done: u32,
        total_chunks: u32,
        bytes_done: u64,
        total_bytes: u64,
        /// Rolling-window throughput estimate in bytes/second (ambient
        /// observability; see [`crate::speed::SpeedTracker`]).
        speed_bps: u64,
    },
    /// A transfer completed and passed integrity verification.
    TransferCompleted { direction: TransferDirection, name: String },
    /// A transfer failed; the session itself remains alive unless the
    /// underlying error was `ConnectionLost`.
    TransferFailed {
        direction: TransferDirection,
        error: String,
    },
    /// A protocol-level error occurred. Logged by the session regardless;
    /// surfaced here so the application can display it.
    ProtocolError { error: String, recoverable: bool },
}

/// Which half of a transfer an event pertains to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferDirection {
    Outbound,
    Inbound,
}
