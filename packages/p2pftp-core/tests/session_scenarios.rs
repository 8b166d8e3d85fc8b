//! Actor-level coverage of the concrete end-to-end scenarios (spec §8):
//! full `Session` pairs driven through `Session::run`'s real `tokio::select!`
//! loop and real timers, not just the `Sender`/`Receiver` units in isolation.
//!
//! Loss and dropped acknowledgments are simulated with thin [`Channel`]
//! wrappers around [`DuplexChannel`] rather than a fault-injecting substrate
//! — the loopback pair stays faithful to its ordered/reliable contract, and
//! the wrapper is what plays the role of spec §8 property 7's "adversarial
//! but eventually-delivering channel".

use std::collections::HashSet;
use std::io::Write;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use bytes::Bytes;
use p2pftp_core::channel::{Channel, DuplexChannel};
use p2pftp_core::control::{self, ControlMessage};
use p2pftp_core::error::Result;
use p2pftp_core::events::TransferDirection;
use p2pftp_core::frame;
use p2pftp_core::session::{Session, SessionCommand, SessionConfig, SessionState};
use p2pftp_core::SessionEvent;
use tokio::sync::broadcast;

fn fast_config(dir: PathBuf) -> SessionConfig {
    SessionConfig {
        handshake_timeout_ms: 1_000,
        retransmit_tick_ms: 20,
        retransmit_interval_ms: 5_000,
        gap_scan_tick_ms: 20,
        download_dir: dir,
        ..SessionConfig::default()
    }
}

async fn drain_until<F>(rx: &mut broadcast::Receiver<SessionEvent>, mut pred: F) -> SessionEvent
where
    F: FnMut(&SessionEvent) -> bool,
{
    loop {
        let event = tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("timed out waiting for event")
            .expect("event channel closed");
        if pred(&event) {
            return event;
        }
    }
}

/// Counts every `send` call on the wrapped channel, for asserting the exact
/// datagram count a scenario promises.
struct CountingChannel {
    inner: Arc<dyn Channel>,
    count: AtomicUsize,
}

impl CountingChannel {
    fn wrap(inner: Arc<dyn Channel>) -> Arc<Self> {
        Arc::new(Self {
            inner,
            count: AtomicUsize::new(0),
        })
    }

    fn count(&self) -> usize {
        self.count.load(Ordering::SeqCst)
    }
}

impl Channel for CountingChannel {
    fn send(&self, bytes: Bytes) -> Result<()> {
        self.count.fetch_add(1, Ordering::SeqCst);
        self.inner.send(bytes)
    }

    fn try_recv(&self) -> Option<Bytes> {
        self.inner.try_recv()
    }

    fn recv(&self) -> futures::future::BoxFuture<'_, Option<Bytes>> {
        self.inner.recv()
    }

    fn is_open(&self) -> bool {
        self.inner.is_open()
    }

    fn buffered_outbound(&self) -> usize {
        self.inner.buffered_outbound()
    }
}

/// Silently drops the first `send` of any data frame whose sequence is in
/// `pending`, then lets retransmissions of that same sequence through.
struct DropFramesOnceChannel {
    inner: Arc<dyn Channel>,
    pending: Mutex<HashSet<u32>>,
}

impl DropFramesOnceChannel {
    fn wrap(inner: Arc<dyn Channel>, sequences: impl IntoIterator<Item = u32>) -> Arc<Self> {
        Arc::new(Self {
            inner,
            pending: Mutex::new(sequences.into_iter().collect()),
        })
    }
}

impl Channel for DropFramesOnceChannel {
    fn send(&self, bytes: Bytes) -> Result<()> {
        if let Ok((seq, _)) = frame::decode(&bytes) {
            if self.pending.lock().unwrap().remove(&seq) {
                return Ok(());
            }
        }
        self.inner.send(bytes)
    }

    fn try_recv(&self) -> Option<Bytes> {
        self.inner.try_recv()
    }

    fn recv(&self) -> futures::future::BoxFuture<'_, Option<Bytes>> {
        self.inner.recv()
    }

    fn is_open(&self) -> bool {
        self.inner.is_open()
    }

    fn buffered_outbound(&self) -> usize {
        self.inner.buffered_outbound()
    }
}

/// Silently drops the first outbound `chunk-confirm` for `sequence`,
/// simulating Scenario E's "confirmation is silently dropped".
struct DropConfirmOnceChannel {
    inner: Arc<dyn Channel>,
    sequence: u32,
    dropped: AtomicUsize,
}

impl DropConfirmOnceChannel {
    fn wrap(inner: Arc<dyn Channel>, sequence: u32) -> Arc<Self> {
        Arc::new(Self {
            inner,
            sequence,
            dropped: AtomicUsize::new(0),
        })
    }

    fn drop_count(&self) -> usize {
        self.dropped.load(Ordering::SeqCst)
    }
}

impl Channel for DropConfirmOnceChannel {
    fn send(&self, bytes: Bytes) -> Result<()> {
        if self.dropped.load(Ordering::SeqCst) == 0 {
            if let Ok(text) = std::str::from_utf8(&bytes) {
                if let Ok(ControlMessage::ChunkConfirm { sequence }) = control::parse(text) {
                    if sequence == self.sequence {
                        self.dropped.fetch_add(1, Ordering::SeqCst);
                        return Ok(());
                    }
                }
            }
        }
        self.inner.send(bytes)
    }

    fn try_recv(&self) -> Option<Bytes> {
        self.inner.try_recv()
    }

    fn recv(&self) -> futures::future::BoxFuture<'_, Option<Bytes>> {
        self.inner.recv()
    }

    fn is_open(&self) -> bool {
        self.inner.is_open()
    }

    fn buffered_outbound(&self) -> usize {
        self.inner.buffered_outbound()
    }
}

/// Scenario A: 1,000,000-byte file at the default 262,144-byte chunk size —
/// exactly 4 chunks, no loss, no retransmits.
#[tokio::test]
async fn scenario_a_happy_path_sends_exactly_four_datagrams() {
    let (a_ctrl, b_ctrl) = DuplexChannel::pair();
    let (a_data, b_data) = DuplexChannel::pair();
    let a_data_counted = CountingChannel::wrap(a_data);
    let dir_a = tempfile::tempdir().unwrap();
    let dir_b = tempfile::tempdir().unwrap();

    let mut source = tempfile::NamedTempFile::new_in(dir_a.path()).unwrap();
    let payload = vec![b'q'; 1_000_000];
    source.write_all(&payload).unwrap();
    source.flush().unwrap();
    let source_name = source.path().file_name().unwrap().to_owned();
    let source_path = source.path().to_path_buf();

    let (session_a, cmd_a, mut events_a) = Session::new(
        "aaaaaaaa".into(),
        "bbbbbbbb".into(),
        a_ctrl,
        a_data_counted.clone(),
        fast_config(dir_a.path().into()),
    );
    let (session_b, _cmd_b, mut events_b) = Session::new(
        "bbbbbbbb".into(),
        "aaaaaaaa".into(),
        b_ctrl,
        b_data,
        fast_config(dir_b.path().into()),
    );

    tokio::spawn(session_a.run());
    tokio::spawn(session_b.run());

    drain_until(&mut events_a, |e| matches!(e, SessionEvent::StateChanged { to: SessionState::Ready, .. })).await;
    drain_until(&mut events_b, |e| matches!(e, SessionEvent::StateChanged { to: SessionState::Ready, .. })).await;

    cmd_a.send(SessionCommand::SendFile(source_path)).unwrap();

    drain_until(&mut events_b, |e| {
        matches!(e, SessionEvent::TransferCompleted { direction: TransferDirection::Inbound, .. })
    })
    .await;

    assert_eq!(a_data_counted.count(), 4);
    let received = std::fs::read(dir_b.path().join(&source_name)).unwrap();
    assert_eq!(received, payload);
}

/// Scenario C: a 10-chunk transfer drops sequences 3 and 7 on first send;
/// the receiver's gap-scan recovers them via `request-chunks`.
#[tokio::test]
async fn scenario_c_lossy_delivery_recovers_via_gap_scan() {
    let (a_ctrl, b_ctrl) = DuplexChannel::pair();
    let (a_data, b_data) = DuplexChannel::pair();
    let a_data_lossy = DropFramesOnceChannel::wrap(a_data, [3, 7]);
    let dir_a = tempfile::tempdir().unwrap();
    let dir_b = tempfile::tempdir().unwrap();

    let chunk_size = 4096u32;
    let mut source = tempfile::NamedTempFile::new_in(dir_a.path()).unwrap();
    let payload = vec![b'z'; 9 * chunk_size as usize + 2_000];
    source.write_all(&payload).unwrap();
    source.flush().unwrap();
    let source_name = source.path().file_name().unwrap().to_owned();
    let source_path = source.path().to_path_buf();

    let config_a = SessionConfig {
        local_max_chunk_size: chunk_size,
        ..fast_config(dir_a.path().into())
    };
    let config_b = SessionConfig {
        local_max_chunk_size: chunk_size,
        ..fast_config(dir_b.path().into())
    };

    let (session_a, cmd_a, mut events_a) =
        Session::new("aaaaaaaa".into(), "bbbbbbbb".into(), a_ctrl, a_data_lossy, config_a);
    let (session_b, _cmd_b, mut events_b) =
        Session::new("bbbbbbbb".into(), "aaaaaaaa".into(), b_ctrl, b_data, config_b);

    tokio::spawn(session_a.run());
    tokio::spawn(session_b.run());

    drain_until(&mut events_a, |e| matches!(e, SessionEvent::StateChanged { to: SessionState::Ready, .. })).await;
    drain_until(&mut events_b, |e| matches!(e, SessionEvent::StateChanged { to: SessionState::Ready, .. })).await;

    cmd_a.send(SessionCommand::SendFile(source_path)).unwrap();

    drain_until(&mut events_b, |e| {
        matches!(e, SessionEvent::TransferCompleted { direction: TransferDirection::Inbound, .. })
    })
    .await;

    let received = std::fs::read(dir_b.path().join(&source_name)).unwrap();
    assert_eq!(received, payload);
}

/// Scenario E: a single `chunk-confirm` is silently dropped once; the
/// sender's own retransmit tick (not the receiver's gap-scan) recovers it.
#[tokio::test]
async fn scenario_e_timeout_triggered_retransmit_recovers_dropped_confirm() {
    let (a_ctrl, b_ctrl) = DuplexChannel::pair();
    let b_ctrl_lossy = DropConfirmOnceChannel::wrap(b_ctrl, 2);
    let (a_data, b_data) = DuplexChannel::pair();
    let dir_a = tempfile::tempdir().unwrap();
    let dir_b = tempfile::tempdir().unwrap();

    let mut source = tempfile::NamedTempFile::new_in(dir_a.path()).unwrap();
    let payload = vec![b'y'; 5 * 4096];
    source.write_all(&payload).unwrap();
    source.flush().unwrap();
    let source_name = source.path().file_name().unwrap().to_owned();
    let source_path = source.path().to_path_buf();

    // gap_scan_tick_ms is deliberately long: this scenario exercises the
    // sender-side timeout path, not the receiver-side gap-scan path that
    // scenario_c already covers.
    let config_a = SessionConfig {
        local_max_chunk_size: 4096,
        handshake_timeout_ms: 1_000,
        retransmit_tick_ms: 20,
        retransmit_interval_ms: 150,
        gap_scan_tick_ms: 5_000,
        download_dir: dir_a.path().into(),
        ..SessionConfig::default()
    };
    let config_b = SessionConfig {
        local_max_chunk_size: 4096,
        handshake_timeout_ms: 1_000,
        retransmit_tick_ms: 20,
        retransmit_interval_ms: 150,
        gap_scan_tick_ms: 5_000,
        download_dir: dir_b.path().into(),
        ..SessionConfig::default()
    };

    let (session_a, cmd_a, mut events_a) =
        Session::new("aaaaaaaa".into(), "bbbbbbbb".into(), a_ctrl, a_data, config_a);
    let (session_b, _cmd_b, mut events_b) = Session::new(
        "bbbbbbbb".into(),
        "aaaaaaaa".into(),
        b_ctrl_lossy.clone(),
        b_data,
        config_b,
    );

    tokio::spawn(session_a.run());
    tokio::spawn(session_b.run());

    drain_until(&mut events_a, |e| matches!(e, SessionEvent::StateChanged { to: SessionState::Ready, .. })).await;
    drain_until(&mut events_b, |e| matches!(e, SessionEvent::StateChanged { to: SessionState::Ready, .. })).await;

    cmd_a.send(SessionCommand::SendFile(source_path)).unwrap();

    drain_until(&mut events_b, |e| {
        matches!(e, SessionEvent::TransferCompleted { direction: TransferDirection::Inbound, .. })
    })
    .await;

    assert_eq!(b_ctrl_lossy.drop_count(), 1);
    let received = std::fs::read(dir_b.path().join(&source_name)).unwrap();
    assert_eq!(received, payload);
}
