use std::future::Future;
use std::pin::Pin;

use futures_util::{Sink, Stream};

use crate::core::{FeedError, FeedResult, Frame};

pub mod tungstenite;

/// Boxed connect future returned by transports.
pub type TransportConnectFuture<R, W> = Pin<Box<dyn Future<Output = FeedResult<(R, W)>> + Send>>;

/// Transport boundary for session IO.
///
/// Sessions own state and policy; the transport only produces split
/// read/write halves for one connection attempt. Implementations can be
/// swapped (tokio-tungstenite in production, in-memory channels in tests)
/// without touching session logic.
pub trait Transport: Clone + Send + Sync + 'static {
    type Reader: Stream<Item = FeedResult<Frame>> + Send + Unpin + 'static;
    type Writer: Sink<Frame, Error = FeedError> + Send + Sync + Unpin + 'static;

    fn connect(&self, url: String) -> TransportConnectFuture<Self::Reader, Self::Writer>;
}
