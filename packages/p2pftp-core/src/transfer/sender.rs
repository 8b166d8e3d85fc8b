//! Outbound half of a file transfer (spec §4.4).
//!
//! [`Sender`] owns the file handle and all windowing/retransmission state.
//! It does not touch a [`crate::channel::Channel`] directly — the session
//! actor drains [`Sender::next_send_candidate`] / [`Sender::mark_sent`] and
//! performs the actual `send` calls, so the backpressure check against
//! `buffered_outbound()` stays in one place (the session loop).

use std::collections::{BTreeMap, BTreeSet};
use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::Path;

use md5::{Digest, Md5};

use crate::control::FileMetadata;
use crate::error::{Error, Result};
use crate::time::now_timestamp_millis;

use super::{
    clamp_chunk_size, expected_chunk_size, total_chunks, CONGESTION_DECREASE_FACTOR,
    DEFAULT_WINDOW_SIZE, MIN_CONGESTION_WINDOW, SLOW_START_THRESHOLD,
};

const MD5_STREAM_BUFFER: usize = 32 * 1024;

/// The outbound `Transfer` of spec §3.
pub struct Sender {
    pub metadata: FileMetadata,
    file: File,
    pub effective_chunk_size: u32,
    pub total_chunks: u32,
    pub next_to_send: u32,
    pub last_acked: i64,
    pub unacked: BTreeMap<u32, i64>,
    pub retransmit_queue: BTreeSet<u32>,
    pub window_size: u32,
    pub congestion_window: u32,
    pub consecutive_timeouts: u32,
    pub start_time: i64,
    confirmed: BTreeSet<u32>,
}

/// Outcome of folding in one `chunk-confirm`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfirmOutcome {
    /// The sequence was freshly confirmed.
    Advanced,
    /// The sequence had already been confirmed; no state changed.
    Idempotent,
    /// The sequence referred to a chunk not yet sent; discarded.
    Discarded,
}

impl Sender {
    /// Opens `path`, stats its size, and streams it once through a 32 KiB
    /// buffer to compute its MD5 (spec §4.4 step 1). This performs blocking
    /// I/O; callers on an async executor should run it via
    /// `spawn_blocking`.
    pub fn open(path: &Path, effective_chunk_size: u32) -> Result<Self> {
        let effective_chunk_size = clamp_chunk_size(effective_chunk_size);
        let mut file = File::open(path)?;
        let size = file.metadata()?.len();

        let mut hasher = Md5::new();
        let mut buf = vec![0u8; MD5_STREAM_BUFFER];
        loop {
            let n = file.read(&mut buf)?;
            if n == 0 {
                break;
            }
            hasher.update(&buf[..n]);
        }
        let md5 = hex::encode(hasher.finalize());
        file.seek(SeekFrom::Start(0))?;

        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();

        let total = total_chunks(size, effective_chunk_size);
        let now = now_timestamp_millis();

        Ok(Self {
            metadata: FileMetadata { name, size, md5 },
            file,
            effective_chunk_size,
            total_chunks: total,
            next_to_send: 0,
            last_acked: -1,
            unacked: BTreeMap::new(),
            retransmit_queue: BTreeSet::new(),
            window_size: DEFAULT_WINDOW_SIZE,
            congestion_window: DEFAULT_WINDOW_SIZE,
            consecutive_timeouts: 0,
            start_time: now,
            confirmed: BTreeSet::new(),
        })
    }

    /// `min(congestion_window, window_size)` — the bound on how many
    /// chunks may be outstanding at once.
    pub fn effective_window(&self) -> u32 {
        self.congestion_window.min(self.window_size)
    }

    /// Reads up to `effective_chunk_size` bytes for chunk `seq` from the
    /// current file position. Blocking I/O; run via `spawn_blocking`.
    pub fn read_chunk(&mut self, seq: u32) -> Result<Vec<u8>> {
        let offset = seq as u64 * self.effective_chunk_size as u64;
        self.file.seek(SeekFrom::Start(offset))?;
        let want = expected_chunk_size(seq, self.metadata.size, self.effective_chunk_size);
        let mut buf = vec![0u8; want];
        self.file.read_exact(&mut buf)?;
        Ok(buf)
    }

    /// Picks the next sequence the session should emit, retransmits taking
    /// priority over new sends, without mutating state (spec §4.4 step 5).
    /// Returns `None` if the window is full and nothing is queued for
    /// retransmission.
    pub fn next_send_candidate(&self) -> Option<u32> {
        if let Some(&seq) = self.retransmit_queue.iter().next() {
            return Some(seq);
        }
        let outstanding = (self.next_to_send as i64 - self.last_acked) as u32;
        if self.next_to_send < self.total_chunks && outstanding <= self.effective_window() {
            return Some(self.next_to_send);
        }
        None
    }

    /// Commits the result of having just emitted `seq`'s `chunk-info` and
    /// framed datagram: records `unacked[seq] = now` and advances
    /// `next_to_send` if this was a new send rather than a retransmit.
    pub fn mark_sent(&mut self, seq: u32, now_ms: i64) {
        self.retransmit_queue.remove(&seq);
        self.unacked.insert(seq, now_ms);
        if seq == self.next_to_send {
            self.next_to_send += 1;
        }
    }

    /// Folds in one `chunk-confirm(seq)` (spec §4.4 step 7).
    pub fn on_confirm(&mut self, seq: u32) -> ConfirmOutcome {
        if seq as i64 > self.next_to_send as i64 - 1 {
            return ConfirmOutcome::Discarded;
        }
        if self.confirmed.contains(&seq) {
            return ConfirmOutcome::Idempotent;
        }

        self.confirmed.insert(seq);
        self.unacked.remove(&seq);
        self.retransmit_queue.remove(&seq);

        if seq as i64 == self.last_acked + 1 {
            let mut next = self.last_acked + 1;
            while self.confirmed.contains(&(next as u32)) {
                next += 1;
            }
            self.last_acked = next - 1;
        }

        self.consecutive_timeouts = 0;
        if self.congestion_window < SLOW_START_THRESHOLD {
            self.congestion_window = (self.congestion_window + 1).min(self.window_size);
        } else {
            // Congestion avoidance: +1/cwnd per ack, expressed as an
            // integer ratchet so a full window of acks yields +1.
            let cwnd = self.congestion_window.max(1);
            if (seq as u64) % (cwnd as u64) == 0 {
                self.congestion_window = (self.congestion_window + 1).min(self.window_size);
            }
        }

        ConfirmOutcome::Advanced
    }

    /// Folds in one `request-chunks(sequences)` (spec §4.4 step 8). Ignored
    /// once the transfer has already announced `file-complete`.
    pub fn on_request_chunks(&mut self, sequences: &[u32]) {
        if self.is_complete() {
            return;
        }
        for &seq in sequences {
            if seq < self.total_chunks && !self.confirmed.contains(&seq) {
                self.retransmit_queue.insert(seq);
            }
        }
    }

    /// Scans `unacked` for chunks that have exceeded `retransmit_interval`
    /// and re-queues them, applying multiplicative decrease past the first
    /// timeout (spec §4.4 step 9).
    pub fn on_retransmit_tick(&mut self, now_ms: i64, retransmit_interval_ms: i64) {
        let timed_out: Vec<u32> = self
            .unacked
            .iter()
            .filter(|(_, &sent)| now_ms - sent > retransmit_interval_ms)
            .map(|(&seq, _)| seq)
            .collect();

        for seq in timed_out {
            self.retransmit_queue.insert(seq);
            self.consecutive_timeouts += 1;
            if self.consecutive_timeouts > 1 {
                self.congestion_window = ((self.congestion_window as f64
                    * CONGESTION_DECREASE_FACTOR)
                    .floor() as u32)
                    .max(MIN_CONGESTION_WINDOW);
            }
        }
    }

    /// Whether every chunk has been confirmed (spec §4.4 step 10).
    pub fn is_complete(&self) -> bool {
        self.last_acked + 1 == self.total_chunks as i64
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn make_file(bytes: &[u8]) -> tempfile::NamedTempFile {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        f.write_all(bytes).unwrap();
        f.flush().unwrap();
        f
    }

    #[test]
    fn test_open_computes_md5_and_chunk_count() {
        let data = vec![b'x'; 1_000_000];
        let file = make_file(&data);
        let sender = Sender::open(file.path(), 262_144).unwrap();
        assert_eq!(sender.total_chunks, 4);
        assert_eq!(sender.metadata.size, 1_000_000);

        let mut hasher = Md5::new();
        hasher.update(&data);
        assert_eq!(sender.metadata.md5, hex::encode(hasher.finalize()));
    }

    #[test]
    fn test_window_bound_respected() {
        let file = make_file(&vec![0u8; 100 * 4096]);
        let mut sender = Sender::open(file.path(), 4096).unwrap();
        sender.window_size = 4;
        sender.congestion_window = 4;

        for _ in 0..4 {
            let seq = sender.next_send_candidate().unwrap();
            sender.mark_sent(seq, 0);
        }
        assert!(sender.next_send_candidate().is_none());
        assert_eq!(sender.unacked.len(), 4);
    }

    #[test]
    fn test_confirm_advances_contiguous_prefix() {
        let file = make_file(&vec![0u8; 4 * 4096]);
        let mut sender = Sender::open(file.path(), 4096).unwrap();
        for _ in 0..4 {
            let seq = sender.next_send_candidate().unwrap();
            sender.mark_sent(seq, 0);
        }
        assert_eq!(sender.on_confirm(1), ConfirmOutcome::Advanced);
        assert_eq!(sender.last_acked, -1); // 0 still missing
        assert_eq!(sender.on_confirm(0), ConfirmOutcome::Advanced);
        assert_eq!(sender.last_acked, 1); // 0 and 1 now contiguous
    }

    #[test]
    fn test_idempotent_confirm() {
        let file = make_file(&vec![0u8; 4096]);
        let mut sender = Sender::open(file.path(), 4096).unwrap();
        let seq = sender.next_send_candidate().unwrap();
        sender.mark_sent(seq, 0);
        assert_eq!(sender.on_confirm(0), ConfirmOutcome::Advanced);
        assert_eq!(sender.on_confirm(0), ConfirmOutcome::Idempotent);
        assert_eq!(sender.last_acked, 0);
    }

    #[test]
    fn test_confirm_beyond_next_to_send_discarded() {
        let file = make_file(&vec![0u8; 4096]);
        let mut sender = Sender::open(file.path(), 4096).unwrap();
        assert_eq!(sender.on_confirm(5), ConfirmOutcome::Discarded);
    }

    #[test]
    fn test_retransmit_tick_shrinks_window_on_second_timeout() {
        let file = make_file(&vec![0u8; 4096]);
        let mut sender = Sender::open(file.path(), 4096).unwrap();
        sender.congestion_window = 10;
        let seq = sender.next_send_candidate().unwrap();
        sender.mark_sent(seq, 0);

        sender.on_retransmit_tick(4000, 3000);
        assert_eq!(sender.consecutive_timeouts, 1);
        assert_eq!(sender.congestion_window, 10); // first timeout: no decrease

        sender.retransmit_queue.remove(&seq);
        sender.unacked.insert(seq, 4000);
        sender.on_retransmit_tick(8000, 3000);
        assert_eq!(sender.consecutive_timeouts, 2);
        assert_eq!(sender.congestion_window, 7); // floor(0.7 * 10)
    }

    #[test]
    fn test_request_chunks_ignored_after_complete() {
        let file = make_file(&vec![0u8; 4096]);
        let mut sender = Sender::open(file.path(), 4096).unwrap();
        let seq = sender.next_send_candidate().unwrap();
        sender.mark_sent(seq, 0);
        sender.on_confirm(0);
        assert!(sender.is_complete());
        sender.on_request_chunks(&[0]);
        assert!(sender.retransmit_queue.is_empty());
    }
}
