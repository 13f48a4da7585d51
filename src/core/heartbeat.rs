use std::time::{Duration, Instant};

/// Bookkeeping for the application-level heartbeat.
///
/// The session sends `{"type":"ping"}` on a fixed interval while open and
/// the server answers with a `pong` envelope; round-trip time is measured
/// against the most recent ping.
#[derive(Clone, Debug)]
pub struct HeartbeatClock {
    interval: Duration,
    last_ping: Option<Instant>,
}

impl HeartbeatClock {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            last_ping: None,
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Call when a ping goes out.
    pub fn mark_ping(&mut self) {
        self.last_ping = Some(Instant::now());
    }

    /// Call when a pong envelope arrives; yields the round-trip time and
    /// clears the outstanding ping.
    pub fn pong_received(&mut self) -> Option<Duration> {
        self.last_ping.take().map(|sent| sent.elapsed())
    }

    pub fn reset(&mut self) {
        self.last_ping = None;
    }
}
