//! # Transfer Engine
//!
//! Sender and receiver halves of a windowed, selectively-retransmitting
//! file transfer (spec §4.4–4.5). Both sides share the chunk-geometry math
//! in this module; the direction-specific state machines live in
//! [`sender`] and [`receiver`].

pub mod receiver;
pub mod sender;

pub use receiver::Receiver;
pub use sender::Sender;

/// Smallest effective chunk size a peer will negotiate down to.
pub const MIN_CHUNK_SIZE: u32 = 4096;
/// Largest effective chunk size a peer will offer.
pub const MAX_CHUNK_SIZE: u32 = 262144;
/// Default sliding-window size, in chunks.
pub const DEFAULT_WINDOW_SIZE: u32 = 64;
/// Floor below which the congestion window never shrinks.
pub const MIN_CONGESTION_WINDOW: u32 = 1;
/// Congestion window size below which growth is slow-start (+1 per ack)
/// rather than congestion-avoidance (+1/cwnd per ack).
pub const SLOW_START_THRESHOLD: u32 = 32;
/// Multiplicative-decrease factor applied to `congestion_window` on a
/// repeated timeout.
pub const CONGESTION_DECREASE_FACTOR: f64 = 0.7;

/// Computes `total_chunks = ceil(size / chunk_size)`.
///
/// A zero-byte file still has exactly one (empty) chunk, matching the
/// receiver's requirement that every transfer produce at least one
/// `chunk-info`/frame pair to drive completion.
pub fn total_chunks(size: u64, chunk_size: u32) -> u32 {
    if size == 0 {
        return 1;
    }
    let chunk_size = chunk_size as u64;
    ((size + chunk_size - 1) / chunk_size) as u32
}

/// Computes the expected size in bytes of chunk `seq`, given the file size
/// and chunk geometry. The final chunk may be shorter than `chunk_size`;
/// every other chunk is exactly `chunk_size`.
pub fn expected_chunk_size(seq: u32, size: u64, chunk_size: u32) -> usize {
    let total = total_chunks(size, chunk_size) as u64;
    let chunk_size = chunk_size as u64;
    if (seq as u64) + 1 == total {
        (size - (total - 1) * chunk_size) as usize
    } else {
        chunk_size as usize
    }
}

/// Clamps a locally-proposed chunk size into `[MIN_CHUNK_SIZE,
/// MAX_CHUNK_SIZE]`. Used both for the value a peer offers in
/// `capabilities` and for the negotiated `min(local, peer)` result.
pub fn clamp_chunk_size(proposed: u32) -> u32 {
    proposed.clamp(MIN_CHUNK_SIZE, MAX_CHUNK_SIZE)
}
