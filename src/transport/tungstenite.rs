use std::pin::Pin;
use std::task::{Context, Poll};

use bytes::Bytes;
use futures_util::{Sink, Stream, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::{
    MaybeTlsStream, WebSocketStream, connect_async as tungstenite_connect,
    tungstenite::{
        Message as TungsteniteMessage, Utf8Bytes, protocol::CloseFrame as TungCloseFrame,
    },
};

use crate::core::{CloseReason, FeedError, Frame};
use crate::tls::install_rustls_crypto_provider;
use crate::transport::{Transport, TransportConnectFuture};

fn map_ws_error(context: &'static str, err: impl ToString) -> FeedError {
    FeedError::Transport {
        context,
        error: err.to_string(),
    }
}

fn close_to_reason(frame: Option<TungCloseFrame>) -> Option<CloseReason> {
    frame.map(|f| CloseReason {
        code: u16::from(f.code),
        reason: AsRef::<Bytes>::as_ref(&f.reason).clone(),
    })
}

fn reason_to_close(reason: CloseReason) -> TungCloseFrame {
    let text = match std::str::from_utf8(reason.reason.as_ref()) {
        Ok(_) => unsafe { Utf8Bytes::from_bytes_unchecked(reason.reason) },
        Err(_) => Utf8Bytes::from_static(""),
    };
    TungCloseFrame {
        code: reason.code.into(),
        reason: text,
    }
}

fn msg_to_frame(msg: TungsteniteMessage) -> Frame {
    match msg {
        TungsteniteMessage::Text(text) => Frame::Text(AsRef::<Bytes>::as_ref(&text).clone()),
        TungsteniteMessage::Binary(bytes) => Frame::Binary(bytes),
        TungsteniteMessage::Ping(bytes) => Frame::Ping(bytes),
        TungsteniteMessage::Pong(bytes) => Frame::Pong(bytes),
        TungsteniteMessage::Close(frame) => Frame::Close(close_to_reason(frame)),
        TungsteniteMessage::Frame(_) => Frame::Binary(Bytes::new()),
    }
}

fn frame_to_msg(frame: Frame) -> TungsteniteMessage {
    match frame {
        Frame::Text(bytes) => match std::str::from_utf8(bytes.as_ref()) {
            Ok(_) => TungsteniteMessage::Text(unsafe { Utf8Bytes::from_bytes_unchecked(bytes) }),
            Err(_) => TungsteniteMessage::Binary(bytes),
        },
        Frame::Binary(bytes) => TungsteniteMessage::Binary(bytes),
        Frame::Ping(bytes) => TungsteniteMessage::Ping(bytes),
        Frame::Pong(bytes) => TungsteniteMessage::Pong(bytes),
        Frame::Close(reason) => TungsteniteMessage::Close(reason.map(reason_to_close)),
    }
}

/// Production transport backed by tokio-tungstenite.
///
/// TLS is selected by the URL scheme; `wss:` goes through rustls with the
/// process-level crypto provider installed on first use.
#[derive(Clone, Copy, Debug, Default)]
pub struct TungsteniteTransport;

pub struct TungsteniteReader {
    inner: futures_util::stream::SplitStream<WebSocketStream<MaybeTlsStream<TcpStream>>>,
}

impl Stream for TungsteniteReader {
    type Item = Result<Frame, FeedError>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        match Pin::new(&mut self.inner).poll_next(cx) {
            Poll::Ready(Some(Ok(msg))) => Poll::Ready(Some(Ok(msg_to_frame(msg)))),
            Poll::Ready(Some(Err(err))) => Poll::Ready(Some(Err(map_ws_error("read", err)))),
            Poll::Ready(None) => Poll::Ready(None),
            Poll::Pending => Poll::Pending,
        }
    }
}

pub struct TungsteniteWriter {
    inner: futures_util::stream::SplitSink<
        WebSocketStream<MaybeTlsStream<TcpStream>>,
        TungsteniteMessage,
    >,
}

impl Sink<Frame> for TungsteniteWriter {
    type Error = FeedError;

    fn poll_ready(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Pin::new(&mut self.inner)
            .poll_ready(cx)
            .map_err(|err| map_ws_error("write", err))
    }

    fn start_send(mut self: Pin<&mut Self>, item: Frame) -> Result<(), Self::Error> {
        Pin::new(&mut self.inner)
            .start_send(frame_to_msg(item))
            .map_err(|err| map_ws_error("write", err))
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Pin::new(&mut self.inner)
            .poll_flush(cx)
            .map_err(|err| map_ws_error("write", err))
    }

    fn poll_close(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Pin::new(&mut self.inner)
            .poll_close(cx)
            .map_err(|err| map_ws_error("write", err))
    }
}

impl Transport for TungsteniteTransport {
    type Reader = TungsteniteReader;
    type Writer = TungsteniteWriter;

    fn connect(&self, url: String) -> TransportConnectFuture<Self::Reader, Self::Writer> {
        Box::pin(async move {
            install_rustls_crypto_provider();
            let (stream, _) = tungstenite_connect(url)
                .await
                .map_err(|err| FeedError::ConnectFailed(err.to_string()))?;
            let (write, read) = stream.split();
            Ok((
                TungsteniteReader { inner: read },
                TungsteniteWriter { inner: write },
            ))
        })
    }
}
