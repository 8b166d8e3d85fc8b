//! # Channel Abstraction
//!
//! The transfer engine treats "a pre-negotiated ordered, reliable message
//! channel" as an opaque contract: the actual session-description/ICE
//! exchange and the DTLS-encrypted datagram substrate underneath it are out
//! of scope (spec §1). A real caller wraps a WebRTC `RTCDataChannel` (or any
//! other ordered, reliable transport) behind [`Channel`]; this crate only
//! ships [`DuplexChannel`], an in-process loopback used by tests and by the
//! CLI's self-test mode.

use bytes::Bytes;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;

/// A single ordered, reliable, bidirectional message channel.
///
/// Implementations must preserve delivery order of `send` calls (spec §5:
/// "the substrate provides in-order delivery per channel") and must not
/// block the caller of `send`/`try_recv`; `recv` is the only call allowed
/// to suspend.
pub trait Channel: Send + Sync {
    /// Queue `bytes` for delivery to the peer. Returns an error if the
    /// channel is known to be closed.
    fn send(&self, bytes: Bytes) -> crate::error::Result<()>;

    /// Non-blocking receive: returns the next inbound message if one is
    /// already buffered, without suspending the caller.
    fn try_recv(&self) -> Option<Bytes>;

    /// Suspends until the next inbound message arrives, or returns `None`
    /// once the channel is closed and drained.
    fn recv(&self) -> futures::future::BoxFuture<'_, Option<Bytes>>;

    /// Whether the channel is still open for sending.
    fn is_open(&self) -> bool;

    /// Approximate number of bytes queued for outbound delivery but not yet
    /// acknowledged by the substrate. Used for the backpressure check in
    /// spec §4.4 ("buffered-outbound exceeds a high-water threshold").
    fn buffered_outbound(&self) -> usize;
}

/// An in-process, `tokio::sync::mpsc`-backed implementation of [`Channel`].
///
/// Two `DuplexChannel`s created via [`DuplexChannel::pair`] are wired
/// directly to each other: whatever one side sends, the other receives, in
/// order. This is the loopback substrate used by integration tests (spec
/// §8) and by the CLI's `--loopback` self-test mode; it is not meant to
/// cross a process or machine boundary.
pub struct DuplexChannel {
    outbound: mpsc::UnboundedSender<Bytes>,
    inbound: tokio::sync::Mutex<mpsc::UnboundedReceiver<Bytes>>,
    open: AtomicBool,
    buffered: Arc<AtomicUsize>,
}

impl DuplexChannel {
    /// Creates a connected pair: `(a, b)` such that `a.send` is observed by
    /// `b.recv`/`b.try_recv` and vice versa.
    pub fn pair() -> (Arc<DuplexChannel>, Arc<DuplexChannel>) {
        let (a_tx, b_rx) = mpsc::unbounded_channel();
        let (b_tx, a_rx) = mpsc::unbounded_channel();
        let a = Arc::new(DuplexChannel {
            outbound: a_tx,
            inbound: tokio::sync::Mutex::new(a_rx),
            open: AtomicBool::new(true),
            buffered: Arc::new(AtomicUsize::new(0)),
        });
        let b = Arc::new(DuplexChannel {
            outbound: b_tx,
            inbound: tokio::sync::Mutex::new(b_rx),
            open: AtomicBool::new(true),
            buffered: Arc::new(AtomicUsize::new(0)),
        });
        (a, b)
    }

    /// Marks the channel closed. Further `send` calls fail with
    /// `ConnectionLost`; buffered inbound messages still drain via `recv`.
    pub fn close(&self) {
        self.open.store(false, Ordering::SeqCst);
    }
}

impl Channel for DuplexChannel {
    fn send(&self, bytes: Bytes) -> crate::error::Result<()> {
        if !self.open.load(Ordering::SeqCst) {
            return Err(crate::error::Error::ConnectionLost(
                "duplex channel closed".into(),
            ));
        }
        let len = bytes.len();
        self.outbound
            .send(bytes)
            .map_err(|_| crate::error::Error::ConnectionLost("peer channel dropped".into()))?;
        // Loopback delivery is effectively instantaneous, so the buffered
        // count is mostly useful for exercising the backpressure path in
        // tests that inspect it directly.
        self.buffered.fetch_add(len, Ordering::SeqCst);
        Ok(())
    }

    fn try_recv(&self) -> Option<Bytes> {
        self.inbound.try_lock().ok()?.try_recv().ok()
    }

    fn recv(&self) -> futures::future::BoxFuture<'_, Option<Bytes>> {
        Box::pin(async move {
            let mut guard = self.inbound.lock().await;
            guard.recv().await
        })
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }

    fn buffered_outbound(&self) -> usize {
        self.buffered.load(Ordering::SeqCst)
    }
}
