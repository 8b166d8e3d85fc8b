//! # Error Handling
//!
//! Error taxonomy for the transfer engine.
//!
//! ## Error Hierarchy
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                           ERROR HIERARCHY                               │
//! ├─────────────────────────────────────────────────────────────────────────┤
//! │                                                                         │
//! │  Error (top-level)                                                     │
//! │  │                                                                      │
//! │  ├── Rendezvous Errors                                                 │
//! │  │   └── PeerNotFound        - rendezvous cannot locate peer token     │
//! │  │                                                                      │
//! │  ├── Handshake Errors                                                  │
//! │  │   └── HandshakeTimeout    - no capabilities/ack within the window   │
//! │  │                                                                      │
//! │  ├── Wire-Format Errors                                                │
//! │  │   ├── MalformedFrame      - datagram fails the framing invariant    │
//! │  │   └── MalformedControl    - control-channel JSON fails to parse     │
//! │  │                                                                      │
//! │  ├── Transfer Protocol Errors                                         │
//! │  │   ├── UnexpectedChunk     - chunk with no active inbound transfer   │
//! │  │   ├── SequenceOutOfRange  - chunk seq >= total_chunks               │
//! │  │   ├── SizeMismatch        - frame len disagrees with expected size  │
//! │  │   ├── IntegrityFailure    - MD5 mismatch at completion              │
//! │  │   └── AlreadyInProgress   - transfer requested while one is active  │
//! │  │                                                                      │
//! │  ├── Connection Errors                                                 │
//! │  │   └── ConnectionLost      - a channel closed or errored in Ready    │
//! │  │                                                                      │
//! │  └── I/O Errors                                                        │
//! │      └── FileIoError         - open/seek/read/write failure            │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use thiserror::Error;

/// Result type alias for transfer-engine operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Top-level error type for `p2pftp-core`.
///
/// Every variant corresponds to exactly one entry of the error taxonomy:
/// protocol-level errors are surfaced to the application via
/// [`crate::events::SessionEvent`] and do not by themselves tear down a
/// session; only [`Error::ConnectionLost`] forces the session into
/// `Closing`.
#[derive(Error, Debug)]
pub enum Error {
    // ========================================================================
    // Rendezvous Errors
    // ========================================================================
    /// The rendezvous service could not locate the requested peer token.
    #[error("peer token not found: {0}")]
    PeerNotFound(String),

    // ========================================================================
    // Handshake Errors
    // ========================================================================
    /// Capability negotiation did not complete within the bounded window.
    #[error("handshake timed out waiting for capability negotiation")]
    HandshakeTimeout,

    // ========================================================================
    // Wire-Format Errors
    // ========================================================================
    /// A data-channel datagram violated the framing invariant
    /// (`datagram.len() == 8 + len`, or the datagram was shorter than the
    /// 8-byte header).
    #[error("malformed frame: {0}")]
    MalformedFrame(String),

    /// A control-channel message failed to parse as JSON or did not match
    /// any recognized or catch-all shape.
    #[error("malformed control message: {0}")]
    MalformedControl(String),

    // ========================================================================
    // Transfer Protocol Errors
    // ========================================================================
    /// A framed chunk arrived with no active inbound transfer.
    #[error("unexpected chunk with no active inbound transfer")]
    UnexpectedChunk,

    /// A chunk sequence fell outside `[0, total_chunks)`.
    #[error("sequence {seq} out of range for {total_chunks} total chunks")]
    SequenceOutOfRange {
        /// The offending sequence number.
        seq: u32,
        /// The transfer's total chunk count.
        total_chunks: u32,
    },

    /// A frame's `len` disagreed with the expected size for its sequence.
    #[error("size mismatch for sequence {seq}: expected {expected}, got {actual}")]
    SizeMismatch {
        /// The offending sequence number.
        seq: u32,
        /// The size implied by chunk geometry.
        expected: usize,
        /// The size actually observed in the frame.
        actual: usize,
    },

    /// The reassembled file's MD5 did not match `FileMetadata::md5`.
    #[error("integrity check failed: expected md5 {expected}, computed {actual}")]
    IntegrityFailure {
        /// The MD5 advertised in `file-info`.
        expected: String,
        /// The MD5 computed from the written file.
        actual: String,
    },

    /// A transfer was requested while one was already active in that
    /// direction.
    #[error("a transfer is already in progress in this direction")]
    AlreadyInProgress,

    // ========================================================================
    // Connection Errors
    // ========================================================================
    /// The control or data channel closed or errored while the session was
    /// `Ready`.
    #[error("connection lost: {0}")]
    ConnectionLost(String),

    // ========================================================================
    // I/O Errors
    // ========================================================================
    /// A file open/seek/read/write call failed.
    #[error("file I/O error: {0}")]
    FileIoError(#[from] std::io::Error),
}

impl Error {
    /// A stable numeric code per error category, grouped the way the
    /// taxonomy in spec §7 lists them. Useful for metrics labels; not part
    /// of any wire format.
    pub fn code(&self) -> i32 {
        match self {
            Error::PeerNotFound(_) => 100,
            Error::HandshakeTimeout => 200,
            Error::MalformedFrame(_) => 300,
            Error::MalformedControl(_) => 301,
            Error::UnexpectedChunk => 400,
            Error::SequenceOutOfRange { .. } => 401,
            Error::SizeMismatch { .. } => 402,
            Error::IntegrityFailure { .. } => 403,
            Error::AlreadyInProgress => 404,
            Error::ConnectionLost(_) => 500,
            Error::FileIoError(_) => 600,
        }
    }

    /// Whether this error is transient and never by itself fatal to the
    /// session (spec §7's policy: lower-layer transient errors are logged;
    /// only substrate-level channel closure forces session teardown).
    pub fn is_recoverable(&self) -> bool {
        !matches!(self, Error::ConnectionLost(_) | Error::HandshakeTimeout)
    }
}
