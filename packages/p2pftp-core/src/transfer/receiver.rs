//! Inbound half of a file transfer (spec §4.5).

use std::collections::BTreeSet;
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use md5::{Digest, Md5};

use crate::control::FileMetadata;
use crate::error::{Error, Result};
use crate::time::now_timestamp_millis;

use super::{clamp_chunk_size, expected_chunk_size, total_chunks};

const MD5_STREAM_BUFFER: usize = 32 * 1024;

/// Outcome of feeding one framed datagram to [`Receiver::on_frame`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameOutcome {
    /// The chunk was new and has been written to disk.
    Written,
    /// The chunk had already been received; silently acknowledged.
    Duplicate,
}

/// Outcome of [`Receiver::on_file_complete`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CompletionOutcome {
    /// Every chunk was present and the MD5 matched.
    Verified,
    /// Every chunk was present but the MD5 did not match; file retained.
    IntegrityFailed { computed_md5: String },
    /// Chunks are still missing; the file is not finalized. Carries the
    /// sorted sequences the receiver should (re)request.
    StillMissing(Vec<u32>),
}

/// The inbound `Transfer` of spec §3.
pub struct Receiver {
    pub metadata: FileMetadata,
    file: File,
    pub path: PathBuf,
    pub effective_chunk_size: u32,
    pub total_chunks: u32,
    pub received: BTreeSet<u32>,
    pub missing: BTreeSet<u32>,
    pub received_bytes: u64,
    pub start_time: i64,
}

impl Receiver {
    /// Creates the receiver for a freshly-announced `file-info`, opening a
    /// writable file at a non-colliding path (spec §4.5 step 1).
    pub fn create(dir: &Path, metadata: FileMetadata, effective_chunk_size: u32) -> Result<Self> {
        let effective_chunk_size = clamp_chunk_size(effective_chunk_size);
        let path = unique_path(dir, &metadata.name);
        let file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)?;

        let total = total_chunks(metadata.size, effective_chunk_size);

        Ok(Self {
            metadata,
            file,
            path,
            effective_chunk_size,
            total_chunks: total,
            received: BTreeSet::new(),
            missing: BTreeSet::new(),
            received_bytes: 0,
            start_time: now_timestamp_millis(),
        })
    }

    /// Validates and writes one decoded frame at its computed offset (spec
    /// §4.5 step 3). The caller is responsible for having already checked
    /// that an inbound transfer is active (else it's `UnexpectedChunk`).
    pub fn on_frame(&mut self, seq: u32, payload: &[u8]) -> Result<FrameOutcome> {
        if seq >= self.total_chunks {
            return Err(Error::SequenceOutOfRange {
                seq,
                total_chunks: self.total_chunks,
            });
        }

        let expected = expected_chunk_size(seq, self.metadata.size, self.effective_chunk_size);
        if payload.len() != expected {
            self.missing.insert(seq);
            return Err(Error::SizeMismatch {
                seq,
                expected,
                actual: payload.len(),
            });
        }

        if self.received.contains(&seq) {
            return Ok(FrameOutcome::Duplicate);
        }

        let offset = seq as u64 * self.effective_chunk_size as u64;
        self.file.seek(SeekFrom::Start(offset))?;
        self.file.write_all(payload)?;

        self.received.insert(seq);
        self.missing.remove(&seq);
        self.received_bytes += payload.len() as u64;

        Ok(FrameOutcome::Written)
    }

    /// Periodic gap scan (spec §4.5 step 4): any sequence below the
    /// highest received one that is still absent is added to `missing`.
    /// Returns the sorted sequences that should be requested, or `None` if
    /// there is nothing to request.
    pub fn gap_scan(&mut self) -> Option<Vec<u32>> {
        let Some(&highest) = self.received.iter().next_back() else {
            return None;
        };
        for seq in 0..highest {
            if !self.received.contains(&seq) {
                self.missing.insert(seq);
            }
        }
        if self.missing.is_empty() {
            None
        } else {
            Some(self.missing.iter().copied().collect())
        }
    }

    /// Handles `file-complete` (spec §4.5 step 5).
    pub fn on_file_complete(&mut self) -> Result<CompletionOutcome> {
        if (self.received.len() as u32) < self.total_chunks {
            let missing: Vec<u32> = (0..self.total_chunks)
                .filter(|s| !self.received.contains(s))
                .collect();
            for &seq in &missing {
                self.missing.insert(seq);
            }
            return Ok(CompletionOutcome::StillMissing(missing));
        }

        self.file.sync_all()?;
        let computed = self.compute_md5()?;
        if computed == self.metadata.md5 {
            Ok(CompletionOutcome::Verified)
        } else {
            Ok(CompletionOutcome::IntegrityFailed {
                computed_md5: computed,
            })
        }
    }

    fn compute_md5(&mut self) -> Result<String> {
        let mut file = File::open(&self.path)?;
        let mut hasher = Md5::new();
        let mut buf = vec![0u8; MD5_STREAM_BUFFER];
        loop {
            let n = file.read(&mut buf)?;
            if n == 0 {
                break;
            }
            hasher.update(&buf[..n]);
        }
        Ok(hex::encode(hasher.finalize()))
    }
}

/// Appends `-1`, `-2`, … before the extension until an unused path is
/// found (spec §4.5 step 1).
fn unique_path(dir: &Path, name: &str) -> PathBuf {
    let candidate = dir.join(name);
    if !candidate.exists() {
        return candidate;
    }

    let path = Path::new(name);
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| name.to_string());
    let ext = path.extension().map(|e| e.to_string_lossy().into_owned());

    for n in 1u32.. {
        let candidate_name = match &ext {
            Some(ext) => format!("{stem}-{n}.{ext}"),
            None => format!("{stem}-{n}"),
        };
        let candidate = dir.join(candidate_name);
        if !candidate.exists() {
            return candidate;
        }
    }
    unreachable!("exhausted u32 suffixes")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn meta(size: u64) -> FileMetadata {
        FileMetadata {
            name: "report.bin".into(),
            size,
            md5: String::new(),
        }
    }

    #[test]
    fn test_unique_path_avoids_collision() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("report.bin"), b"x").unwrap();
        let path = unique_path(dir.path(), "report.bin");
        assert_eq!(path, dir.path().join("report-1.bin"));
    }

    #[test]
    fn test_write_at_offset_and_integrity() {
        let dir = tempfile::tempdir().unwrap();
        let data = b"abcdefgh";
        let mut hasher = Md5::new();
        hasher.update(data);
        let md5 = hex::encode(hasher.finalize());

        let mut metadata = meta(data.len() as u64);
        metadata.md5 = md5;
        let mut receiver = Receiver::create(dir.path(), metadata, 4).unwrap();
        assert_eq!(receiver.total_chunks, 2);

        assert_eq!(receiver.on_frame(1, &data[4..8]).unwrap(), FrameOutcome::Written);
        assert_eq!(receiver.on_frame(0, &data[0..4]).unwrap(), FrameOutcome::Written);

        match receiver.on_file_complete().unwrap() {
            CompletionOutcome::Verified => {}
            other => panic!("expected Verified, got {other:?}"),
        }

        let written = std::fs::read(&receiver.path).unwrap();
        assert_eq!(written, data);
    }

    #[test]
    fn test_duplicate_chunk_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let metadata = meta(4);
        let mut receiver = Receiver::create(dir.path(), metadata, 4).unwrap();
        assert_eq!(receiver.on_frame(0, b"abcd").unwrap(), FrameOutcome::Written);
        assert_eq!(receiver.on_frame(0, b"abcd").unwrap(), FrameOutcome::Duplicate);
        assert_eq!(receiver.received.len(), 1);
    }

    #[test]
    fn test_gap_scan_reports_missing() {
        let dir = tempfile::tempdir().unwrap();
        let metadata = meta(16);
        let mut receiver = Receiver::create(dir.path(), metadata, 4).unwrap();
        receiver.on_frame(3, b"ghij").unwrap();
        let missing = receiver.gap_scan().unwrap();
        assert_eq!(missing, vec![0, 1, 2]);
    }

    #[test]
    fn test_size_mismatch_treated_as_missing() {
        let dir = tempfile::tempdir().unwrap();
        let metadata = meta(8);
        let mut receiver = Receiver::create(dir.path(), metadata, 4).unwrap();
        let err = receiver.on_frame(0, b"abc").unwrap_err();
        assert!(matches!(err, Error::SizeMismatch { .. }));
        assert!(receiver.missing.contains(&0));
    }

    #[test]
    fn test_file_complete_with_gaps_reports_still_missing() {
        let dir = tempfile::tempdir().unwrap();
        let metadata = meta(8);
        let mut receiver = Receiver::create(dir.path(), metadata, 4).unwrap();
        receiver.on_frame(1, b"efgh").unwrap();
        match receiver.on_file_complete().unwrap() {
            CompletionOutcome::StillMissing(missing) => assert_eq!(missing, vec![0]),
            other => panic!("expected StillMissing, got {other:?}"),
        }
    }
}
