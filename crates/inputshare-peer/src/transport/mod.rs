//! Framed duplex transport over an authenticated byte stream.
//!
//! A [`FramedTransport`] owns one connected stream (TLS in production,
//! in-memory duplex in tests) and runs a reader task and a writer task. The
//! reader reassembles length-prefixed frames and delivers them, in receipt
//! order, as [`TransportEvent::Frame`]s on the event channel; state changes
//! surface as [`TransportEvent::State`] before any dependent frame.
//!
//! Sending never blocks the caller's logic thread: frames enter a bounded
//! queue serviced by the writer task. Two send paths exist on purpose —
//! control frames and non-move events must not be dropped
//! ([`FramedTransport::send_control`] applies backpressure), while a
//! coalesced mouse move may be discarded when the queue is full
//! ([`FramedTransport::try_send_move`]); delta accumulation makes newer
//! motion strictly better than older motion.

pub mod tls;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use inputshare_core::protocol::{frame, FrameBuffer};
use rustls::pki_types::ServerName;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_rustls::TlsConnector;
use tracing::{debug, trace, warn};

/// Depth of the bounded outbound frame queue.
const SEND_QUEUE_DEPTH: usize = 64;

/// Read chunk size for the reassembly loop.
const READ_CHUNK: usize = 8 * 1024;

/// Suggested capacity for the event channel handed to
/// [`FramedTransport::spawn`].
pub const EVENT_QUEUE_DEPTH: usize = 256;

/// Connection lifecycle states reported on the event channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportState {
    Connecting,
    Ready,
    Failed,
    Cancelled,
}

/// Everything a transport reports to its owner.
#[derive(Debug)]
pub enum TransportEvent {
    State(TransportState),
    Frame(Vec<u8>),
}

/// Errors surfaced by transport operations.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("invalid host name: {0}")]
    InvalidHostName(String),

    /// The bounded send queue is full; only coalesced moves ever see this.
    #[error("send queue full")]
    SendQueueFull,

    /// The transport has shut down; the frame was not sent.
    #[error("transport closed")]
    Closed,
}

/// One framed connection with reader/writer tasks.
pub struct FramedTransport {
    out_tx: mpsc::Sender<Vec<u8>>,
    events_tx: mpsc::Sender<TransportEvent>,
    cancelled: Arc<AtomicBool>,
    reader: JoinHandle<()>,
    writer: JoinHandle<()>,
}

impl FramedTransport {
    /// Takes ownership of a connected stream and starts the reader and
    /// writer tasks. `Ready` is reported on `events` immediately.
    pub fn spawn<S>(stream: S, events: mpsc::Sender<TransportEvent>) -> Self
    where
        S: AsyncRead + AsyncWrite + Send + Unpin + 'static,
    {
        let (read_half, mut write_half) = tokio::io::split(stream);
        let (out_tx, mut out_rx) = mpsc::channel::<Vec<u8>>(SEND_QUEUE_DEPTH);
        let cancelled = Arc::new(AtomicBool::new(false));

        let _ = events.try_send(TransportEvent::State(TransportState::Ready));

        let reader = {
            let events = events.clone();
            let cancelled = Arc::clone(&cancelled);
            let mut read_half = read_half;
            tokio::spawn(async move {
                let mut chunk = vec![0u8; READ_CHUNK];
                let mut buffer = FrameBuffer::new();
                loop {
                    match read_half.read(&mut chunk).await {
                        Ok(0) => {
                            debug!("peer closed the stream");
                            report_end(&events, &cancelled).await;
                            return;
                        }
                        Ok(n) => {
                            buffer.extend(&chunk[..n]);
                            match buffer.drain_frames() {
                                Ok(frames) => {
                                    for f in frames {
                                        if events.send(TransportEvent::Frame(f)).await.is_err() {
                                            return;
                                        }
                                    }
                                }
                                Err(e) => {
                                    warn!("corrupt frame stream: {e}");
                                    report_end(&events, &cancelled).await;
                                    return;
                                }
                            }
                        }
                        Err(e) => {
                            debug!("read error: {e}");
                            report_end(&events, &cancelled).await;
                            return;
                        }
                    }
                }
            })
        };

        let writer = {
            let events = events.clone();
            let cancelled = Arc::clone(&cancelled);
            tokio::spawn(async move {
                while let Some(payload) = out_rx.recv().await {
                    let framed = frame(&payload);
                    if write_half.write_all(&framed).await.is_err()
                        || write_half.flush().await.is_err()
                    {
                        report_end(&events, &cancelled).await;
                        return;
                    }
                }
                // Queue closed: owner dropped the transport.
                let _ = write_half.shutdown().await;
            })
        };

        Self { out_tx, events_tx: events, cancelled, reader, writer }
    }

    /// Queues a frame that must not be dropped; waits for queue capacity.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::Closed`] after the transport shut down.
    pub async fn send_control(&self, payload: Vec<u8>) -> Result<(), TransportError> {
        self.out_tx
            .send(payload)
            .await
            .map_err(|_| TransportError::Closed)
    }

    /// Queues a coalesced mouse move without waiting.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::SendQueueFull`] when the queue is full —
    /// the caller drops the move in favor of newer motion — or
    /// [`TransportError::Closed`] after shutdown.
    pub fn try_send_move(&self, payload: Vec<u8>) -> Result<(), TransportError> {
        self.out_tx.try_send(payload).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => {
                trace!("send queue full; dropping coalesced move");
                TransportError::SendQueueFull
            }
            mpsc::error::TrySendError::Closed(_) => TransportError::Closed,
        })
    }

    /// Tears the connection down. Idempotent; reports `Cancelled` once.
    pub fn cancel(&self) {
        if self.cancelled.swap(true, Ordering::SeqCst) {
            return;
        }
        self.reader.abort();
        self.writer.abort();
        let _ = self
            .events_tx
            .try_send(TransportEvent::State(TransportState::Cancelled));
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

impl Drop for FramedTransport {
    fn drop(&mut self) {
        self.reader.abort();
        self.writer.abort();
    }
}

async fn report_end(events: &mpsc::Sender<TransportEvent>, cancelled: &AtomicBool) {
    let state = if cancelled.load(Ordering::SeqCst) {
        TransportState::Cancelled
    } else {
        TransportState::Failed
    };
    let _ = events.send(TransportEvent::State(state)).await;
}

/// Dials `host:port`, performs the pinned TLS handshake, and spawns the
/// framed transport. `Connecting` is reported before the dial.
///
/// # Errors
///
/// Returns [`TransportError::Io`] for dial or handshake failures (a pin
/// mismatch surfaces as a handshake failure).
pub async fn connect_tls(
    host: &str,
    port: u16,
    connector: TlsConnector,
    events: mpsc::Sender<TransportEvent>,
) -> Result<FramedTransport, TransportError> {
    let _ = events
        .send(TransportEvent::State(TransportState::Connecting))
        .await;

    let tcp = TcpStream::connect((host, port)).await?;
    tcp.set_nodelay(true)?;

    let name = ServerName::try_from(host.to_string())
        .map_err(|_| TransportError::InvalidHostName(host.to_string()))?;
    let stream = connector.connect(name, tcp).await?;

    Ok(FramedTransport::spawn(stream, events))
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::time::timeout;

    async fn next_event(rx: &mut mpsc::Receiver<TransportEvent>) -> TransportEvent {
        timeout(Duration::from_secs(2), rx.recv())
            .await
            .expect("event within deadline")
            .expect("channel open")
    }

    fn transport_pair() -> (
        FramedTransport,
        mpsc::Receiver<TransportEvent>,
        FramedTransport,
        mpsc::Receiver<TransportEvent>,
    ) {
        let (a_io, b_io) = tokio::io::duplex(64 * 1024);
        let (a_tx, a_rx) = mpsc::channel(EVENT_QUEUE_DEPTH);
        let (b_tx, b_rx) = mpsc::channel(EVENT_QUEUE_DEPTH);
        let a = FramedTransport::spawn(a_io, a_tx);
        let b = FramedTransport::spawn(b_io, b_tx);
        (a, a_rx, b, b_rx)
    }

    #[tokio::test]
    async fn test_spawn_reports_ready_first() {
        let (_a, mut a_rx, _b, mut b_rx) = transport_pair();
        assert!(matches!(
            next_event(&mut a_rx).await,
            TransportEvent::State(TransportState::Ready)
        ));
        assert!(matches!(
            next_event(&mut b_rx).await,
            TransportEvent::State(TransportState::Ready)
        ));
    }

    #[tokio::test]
    async fn test_frames_arrive_in_send_order() {
        let (a, _a_rx, _b, mut b_rx) = transport_pair();
        next_event(&mut b_rx).await; // Ready

        for i in 0u8..10 {
            a.send_control(vec![i; 3]).await.unwrap();
        }

        for i in 0u8..10 {
            match next_event(&mut b_rx).await {
                TransportEvent::Frame(f) => assert_eq!(f, vec![i; 3]),
                other => panic!("expected frame, got {other:?}"),
            }
        }
    }

    #[tokio::test]
    async fn test_try_send_move_delivers_like_control() {
        let (a, _a_rx, _b, mut b_rx) = transport_pair();
        next_event(&mut b_rx).await; // Ready

        a.try_send_move(vec![42]).unwrap();

        match next_event(&mut b_rx).await {
            TransportEvent::Frame(f) => assert_eq!(f, vec![42]),
            other => panic!("expected frame, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_cancel_reports_cancelled_once() {
        let (a, mut a_rx, _b, _b_rx) = transport_pair();
        next_event(&mut a_rx).await; // Ready

        a.cancel();
        a.cancel(); // idempotent

        assert!(matches!(
            next_event(&mut a_rx).await,
            TransportEvent::State(TransportState::Cancelled)
        ));
        assert!(a.is_cancelled());
        // No duplicate Cancelled event queued.
        assert!(
            timeout(Duration::from_millis(100), a_rx.recv()).await.is_err(),
            "exactly one Cancelled state expected"
        );
    }

    #[tokio::test]
    async fn test_peer_drop_reports_failed() {
        let (a, mut a_rx, b, _b_rx) = transport_pair();
        next_event(&mut a_rx).await; // Ready

        drop(b); // closes the duplex; a's reader sees EOF

        assert!(matches!(
            next_event(&mut a_rx).await,
            TransportEvent::State(TransportState::Failed)
        ));
    }

    #[tokio::test]
    async fn test_send_after_cancel_fails() {
        let (a, mut a_rx, _b, _b_rx) = transport_pair();
        next_event(&mut a_rx).await; // Ready
        a.cancel();
        // The writer task is gone; the queue may report closed immediately
        // or on the next poll. Either way no panic and an error surfaces.
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(a.send_control(vec![1]).await.is_err());
    }

    #[tokio::test]
    async fn test_large_frame_crosses_chunk_boundaries() {
        let (a, _a_rx, _b, mut b_rx) = transport_pair();
        next_event(&mut b_rx).await; // Ready

        let big = vec![0xA5u8; 100_000];
        a.send_control(big.clone()).await.unwrap();

        match next_event(&mut b_rx).await {
            TransportEvent::Frame(f) => assert_eq!(f, big),
            other => panic!("expected frame, got {other:?}"),
        }
    }
}
