//! A [`Channel`] implementation over a plain TCP connection.
//!
//! The real substrate the spec places out of scope is a DTLS-encrypted
//! WebRTC data channel, negotiated via SDP/ICE. This CLI stands in a plain
//! length-prefixed TCP stream instead — ordered and reliable, same as the
//! real substrate's contract, just without the NAT traversal or
//! encryption a production transport would add. See `peer_link` for how the
//! rendezvous exchange bootstraps the two TCP connections this wraps.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use p2pftp_core::error::{Error, Result};
use p2pftp_core::Channel;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::mpsc;

/// One ordered, reliable message channel backed by a TCP socket.
///
/// Each message is framed as a 4-byte big-endian length prefix followed by
/// that many bytes — distinct from (and a layer below) the data channel's
/// own chunk framing in [`p2pftp_core::frame`].
pub struct TcpChannel {
    outbound: mpsc::UnboundedSender<Bytes>,
    inbound: tokio::sync::Mutex<mpsc::UnboundedReceiver<Bytes>>,
    open: Arc<AtomicBool>,
    buffered: Arc<AtomicUsize>,
}

impl TcpChannel {
    /// Splits `stream` and spawns its read/write pump tasks, returning a
    /// ready-to-use channel.
    pub fn spawn(stream: TcpStream) -> Arc<Self> {
        let _ = stream.set_nodelay(true);
        let (read_half, write_half) = stream.into_split();
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel::<Bytes>();
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel::<Bytes>();
        let open = Arc::new(AtomicBool::new(true));
        let buffered = Arc::new(AtomicUsize::new(0));

        tokio::spawn(read_loop(read_half, inbound_tx, open.clone()));
        tokio::spawn(write_loop(write_half, outbound_rx, buffered.clone(), open.clone()));

        Arc::new(Self {
            outbound: outbound_tx,
            inbound: tokio::sync::Mutex::new(inbound_rx),
            open,
            buffered,
        })
    }
}

impl Channel for TcpChannel {
    fn send(&self, bytes: Bytes) -> Result<()> {
        if !self.open.load(Ordering::SeqCst) {
            return Err(Error::ConnectionLost("tcp channel closed".into()));
        }
        let len = bytes.len();
        self.outbound
            .send(bytes)
            .map_err(|_| Error::ConnectionLost("tcp write task gone".into()))?;
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

async fn read_loop(mut read: OwnedReadHalf, tx: mpsc::UnboundedSender<Bytes>, open: Arc<AtomicBool>) {
    loop {
        let mut len_buf = [0u8; 4];
        if read.read_exact(&mut len_buf).await.is_err() {
            break;
        }
        let len = u32::from_be_bytes(len_buf) as usize;
        let mut body = vec![0u8; len];
        if read.read_exact(&mut body).await.is_err() {
            break;
        }
        if tx.send(Bytes::from(body)).is_err() {
            break;
        }
    }
    open.store(false, Ordering::SeqCst);
}

async fn write_loop(
    mut write: OwnedWriteHalf,
    mut rx: mpsc::UnboundedReceiver<Bytes>,
    buffered: Arc<AtomicUsize>,
    open: Arc<AtomicBool>,
) {
    while let Some(bytes) = rx.recv().await {
        let len = (bytes.len() as u32).to_be_bytes();
        let ok = write.write_all(&len).await.is_ok() && write.write_all(&bytes).await.is_ok();
        buffered.fetch_sub(bytes.len(), Ordering::SeqCst);
        if !ok {
            break;
        }
    }
    open.store(false, Ordering::SeqCst);
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn test_round_trip_over_loopback_socket() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let accept = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            TcpChannel::spawn(stream)
        });
        let dial = TcpStream::connect(addr).await.unwrap();
        let a = TcpChannel::spawn(dial);
        let b = accept.await.unwrap();

        a.send(Bytes::from_static(b"hello")).unwrap();
        let received = b.recv().await.unwrap();
        assert_eq!(received, Bytes::from_static(b"hello"));
    }
}
