//! Wire envelope codec.
//!
//! All traffic is JSON objects tagged by a `type` field. Decoding never
//! panics past this boundary: a malformed payload surfaces as
//! [`FeedError::Decode`] and the caller drops the frame.

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use sonic_rs::{JsonValueTrait, Value};

use super::types::{FeedError, FeedResult};

/// Fixed heartbeat payload sent while the connection is open.
pub const PING_PAYLOAD: &[u8] = br#"{"type":"ping"}"#;

/// Decoded wire envelope exchanged with the event server.
///
/// Immutable once decoded; subscribers share it behind an `Arc` and copy
/// out the fields they need.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Envelope {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scan_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub timestamp: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl Envelope {
    /// Minimal envelope carrying only a type tag.
    pub fn tagged(kind: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            ..Self::default()
        }
    }

    pub fn event_kind(&self) -> EventKind {
        EventKind::from_tag(&self.kind)
    }

    /// Typed projection of `data` for progress-bearing updates.
    pub fn scan_progress(&self) -> Option<ScanProgress> {
        let data = self.data.as_ref()?;
        Some(ScanProgress {
            progress: data.get("progress").as_f64().unwrap_or(0.0),
            phase: data.get("phase").as_str().map(str::to_owned),
            message: data.get("message").as_str().map(str::to_owned),
        })
    }
}

/// Progress fields commonly carried by `scan_update` payloads.
#[derive(Clone, Debug, PartialEq)]
pub struct ScanProgress {
    pub progress: f64,
    pub phase: Option<String>,
    pub message: Option<String>,
}

/// Classification of the wire `type` tag.
///
/// The tag set is closed-ish: unknown tags map to `Other` and still reach
/// subscribers through the generic message event.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EventKind {
    DashboardUpdate,
    ScanUpdate,
    ScanCompleted,
    ScanFailed,
    ScanAborted,
    Connected,
    Pong,
    Other,
}

impl EventKind {
    pub fn from_tag(tag: &str) -> Self {
        match tag {
            "dashboard_update" => Self::DashboardUpdate,
            "scan_update" => Self::ScanUpdate,
            "scan_completed" => Self::ScanCompleted,
            "scan_failed" => Self::ScanFailed,
            "scan_aborted" => Self::ScanAborted,
            "connected" => Self::Connected,
            "pong" => Self::Pong,
            _ => Self::Other,
        }
    }

    /// Dispatcher event name for tags consumers subscribe to narrowly.
    pub fn named_event(self) -> Option<&'static str> {
        match self {
            Self::DashboardUpdate => Some(crate::dispatch::event::DASHBOARD_UPDATE),
            Self::ScanUpdate => Some(crate::dispatch::event::SCAN_UPDATE),
            Self::ScanCompleted => Some(crate::dispatch::event::SCAN_COMPLETED),
            Self::ScanFailed => Some(crate::dispatch::event::SCAN_FAILED),
            Self::ScanAborted => Some(crate::dispatch::event::SCAN_ABORTED),
            Self::Connected | Self::Pong | Self::Other => None,
        }
    }

    /// Whether this tag marks the external query cache stale.
    pub fn invalidates_cache(self) -> bool {
        matches!(self, Self::DashboardUpdate | Self::ScanCompleted)
    }
}

/// Decode one inbound frame payload.
pub fn decode(payload: &[u8]) -> FeedResult<Envelope> {
    sonic_rs::from_slice(payload).map_err(|err| FeedError::Decode(err.to_string()))
}

/// Encode an envelope for the wire.
pub fn encode(envelope: &Envelope) -> FeedResult<Bytes> {
    sonic_rs::to_vec(envelope)
        .map(Bytes::from)
        .map_err(|err| FeedError::Encode(err.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_a_scan_update_with_progress_data() {
        let payload = br#"{
            "type": "scan_update",
            "scan_id": "scan-7",
            "data": {"progress": 42.5, "phase": "port_scan", "message": "scanning ports"},
            "timestamp": "2025-08-05T12:00:00Z"
        }"#;
        let envelope = decode(payload).unwrap();
        assert_eq!(envelope.kind, "scan_update");
        assert_eq!(envelope.scan_id.as_deref(), Some("scan-7"));
        assert_eq!(envelope.event_kind(), EventKind::ScanUpdate);

        let progress = envelope.scan_progress().unwrap();
        assert_eq!(progress.progress, 42.5);
        assert_eq!(progress.phase.as_deref(), Some("port_scan"));
        assert_eq!(progress.message.as_deref(), Some("scanning ports"));
    }

    #[test]
    fn unknown_tags_classify_as_other() {
        let envelope = decode(br#"{"type":"surprise_v2"}"#).unwrap();
        assert_eq!(envelope.event_kind(), EventKind::Other);
        assert!(envelope.event_kind().named_event().is_none());
    }

    #[test]
    fn malformed_payloads_fail_decode() {
        assert!(decode(b"not json").is_err());
        assert!(decode(br#"{"missing":"tag"}"#).is_err());
        assert!(decode(b"").is_err());
    }

    #[test]
    fn ping_envelope_matches_the_fixed_payload() {
        let encoded = encode(&Envelope::tagged("ping")).unwrap();
        assert_eq!(encoded.as_ref(), PING_PAYLOAD);
        assert_eq!(decode(PING_PAYLOAD).unwrap().kind, "ping");
    }

    #[test]
    fn only_broadcast_and_completion_tags_touch_the_cache() {
        assert!(EventKind::DashboardUpdate.invalidates_cache());
        assert!(EventKind::ScanCompleted.invalidates_cache());
        assert!(!EventKind::ScanUpdate.invalidates_cache());
        assert!(!EventKind::ScanFailed.invalidates_cache());
        assert!(!EventKind::Pong.invalidates_cache());
        assert!(!EventKind::Other.invalidates_cache());
    }
}
