//! In-memory transport for exercising sessions without a real socket.
//!
//! Integration tests pair a [`MockTransport`] (handed to the session) with
//! a [`MockServer`] (held by the test) that accepts connections, reads
//! outbound frames, pushes inbound frames, refuses handshakes, and drops
//! sockets on demand.

use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::task::{Context, Poll};
use std::time::Duration;

use bytes::Bytes;
use futures_util::{Sink, Stream};
use tokio::sync::mpsc;

use crate::core::{FeedError, Frame};
use crate::transport::{Transport, TransportConnectFuture};

struct MockCtl {
    conn_tx: mpsc::UnboundedSender<MockConn>,
    connects: AtomicUsize,
    refusals: AtomicUsize,
    refuse_all: AtomicBool,
}

/// Transport half handed to the session under test.
#[derive(Clone)]
pub struct MockTransport {
    ctl: Arc<MockCtl>,
}

impl MockTransport {
    /// Build a transport + server control pair.
    pub fn pair() -> (Self, MockServer) {
        let (conn_tx, conn_rx) = mpsc::unbounded_channel();
        let ctl = Arc::new(MockCtl {
            conn_tx,
            connects: AtomicUsize::new(0),
            refusals: AtomicUsize::new(0),
            refuse_all: AtomicBool::new(false),
        });
        (
            Self {
                ctl: Arc::clone(&ctl),
            },
            MockServer { conn_rx, ctl },
        )
    }
}

impl Transport for MockTransport {
    type Reader = MockReader;
    type Writer = MockWriter;

    fn connect(&self, _url: String) -> TransportConnectFuture<Self::Reader, Self::Writer> {
        let ctl = Arc::clone(&self.ctl);
        Box::pin(async move {
            ctl.connects.fetch_add(1, Ordering::SeqCst);

            if ctl.refuse_all.load(Ordering::SeqCst) {
                return Err(FeedError::ConnectFailed("connection refused".to_string()));
            }
            if ctl
                .refusals
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok()
            {
                return Err(FeedError::ConnectFailed("connection refused".to_string()));
            }

            let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
            let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
            ctl.conn_tx
                .send(MockConn {
                    outbound_rx,
                    inbound_tx: Some(inbound_tx),
                })
                .map_err(|_| FeedError::ConnectFailed("mock server gone".to_string()))?;

            Ok((
                MockReader { rx: inbound_rx },
                MockWriter { tx: outbound_tx },
            ))
        })
    }
}

/// Server-side control handle paired with [`MockTransport`].
pub struct MockServer {
    conn_rx: mpsc::UnboundedReceiver<MockConn>,
    ctl: Arc<MockCtl>,
}

impl MockServer {
    /// Wait for the session's next connection attempt to land.
    pub async fn accept(&mut self) -> Option<MockConn> {
        self.conn_rx.recv().await
    }

    pub async fn accept_timeout(&mut self, timeout: Duration) -> Option<MockConn> {
        tokio::time::timeout(timeout, self.conn_rx.recv())
            .await
            .unwrap_or_default()
    }

    /// Refuse the next `n` connection attempts.
    pub fn refuse_next(&self, n: usize) {
        self.ctl.refusals.fetch_add(n, Ordering::SeqCst);
    }

    /// Refuse every connection attempt from now on.
    pub fn refuse_all(&self) {
        self.ctl.refuse_all.store(true, Ordering::SeqCst);
    }

    /// Accept connections again.
    pub fn accept_all(&self) {
        self.ctl.refuse_all.store(false, Ordering::SeqCst);
    }

    /// Total connection attempts observed, refused ones included.
    pub fn connect_count(&self) -> usize {
        self.ctl.connects.load(Ordering::SeqCst)
    }
}

/// One accepted connection, seen from the server side.
pub struct MockConn {
    outbound_rx: mpsc::UnboundedReceiver<Frame>,
    inbound_tx: Option<mpsc::UnboundedSender<Frame>>,
}

impl MockConn {
    /// Receive the next frame the session wrote.
    pub async fn recv_outbound(&mut self) -> Option<Frame> {
        self.outbound_rx.recv().await
    }

    pub async fn recv_outbound_timeout(&mut self, timeout: Duration) -> Option<Frame> {
        tokio::time::timeout(timeout, self.outbound_rx.recv())
            .await
            .unwrap_or_default()
    }

    /// Push an inbound frame to the session.
    pub fn send_inbound(&self, frame: Frame) -> bool {
        self.inbound_tx
            .as_ref()
            .is_some_and(|tx| tx.send(frame).is_ok())
    }

    /// Push a UTF-8 payload as websocket text.
    pub fn send_text(&self, text: impl AsRef<str>) -> bool {
        self.send_inbound(Frame::Text(Bytes::copy_from_slice(
            text.as_ref().as_bytes(),
        )))
    }

    /// Simulate a server-side socket drop.
    pub fn drop_socket(&mut self) {
        self.inbound_tx = None;
    }
}

/// Reader side for [`MockTransport`].
pub struct MockReader {
    rx: mpsc::UnboundedReceiver<Frame>,
}

impl Stream for MockReader {
    type Item = Result<Frame, FeedError>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        match self.get_mut().rx.poll_recv(cx) {
            Poll::Ready(Some(frame)) => Poll::Ready(Some(Ok(frame))),
            Poll::Ready(None) => Poll::Ready(None),
            Poll::Pending => Poll::Pending,
        }
    }
}

/// Writer side for [`MockTransport`].
pub struct MockWriter {
    tx: mpsc::UnboundedSender<Frame>,
}

impl Sink<Frame> for MockWriter {
    type Error = FeedError;

    fn poll_ready(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn start_send(self: Pin<&mut Self>, item: Frame) -> Result<(), Self::Error> {
        self.get_mut()
            .tx
            .send(item)
            .map_err(|_| FeedError::Transport {
                context: "mock_write",
                error: "mock outbound channel closed".to_string(),
            })
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn poll_close(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }
}
