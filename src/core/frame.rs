use bytes::Bytes;

/// Transport-neutral WebSocket frame.
///
/// Transports convert their native message representation into/from
/// `Frame`; everything above the transport seam speaks only this type.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Frame {
    Text(Bytes),
    Binary(Bytes),
    Ping(Bytes),
    Pong(Bytes),
    Close(Option<CloseReason>),
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CloseReason {
    pub code: u16,
    pub reason: Bytes,
}

impl Frame {
    #[inline]
    pub fn text(payload: impl Into<Bytes>) -> Self {
        Self::Text(payload.into())
    }

    /// Borrow the payload bytes, if the frame carries any.
    #[inline]
    pub fn payload(&self) -> Option<&[u8]> {
        match self {
            Frame::Text(bytes)
            | Frame::Binary(bytes)
            | Frame::Ping(bytes)
            | Frame::Pong(bytes) => Some(bytes.as_ref()),
            Frame::Close(_) => None,
        }
    }
}
