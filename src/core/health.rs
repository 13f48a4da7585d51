use hdrhistogram::Histogram;
use std::time::{Duration, Instant};

/// Snapshot of one session's connection statistics.
#[derive(Clone, Debug)]
pub struct SessionStats {
    pub uptime: Duration,
    pub messages: u64,
    pub decode_errors: u64,
    pub reconnects: u64,
    pub last_message_age: Duration,
    pub p50_rtt_us: u64,
    pub p99_rtt_us: u64,
    pub rtt_samples: u64,
}

/// Per-session health counters, owned by the session actor.
#[derive(Debug)]
pub struct SessionHealth {
    connection_started: Instant,
    last_message_received: Instant,
    message_count: u64,
    decode_error_count: u64,
    reconnect_count: u64,
    rtt_histogram: Histogram<u64>,
}

impl SessionHealth {
    pub fn new() -> Self {
        let now = Instant::now();
        Self {
            connection_started: now,
            last_message_received: now,
            message_count: 0,
            decode_error_count: 0,
            reconnect_count: 0,
            rtt_histogram: Histogram::new_with_bounds(1, 60_000_000, 3)
                .expect("histogram bounds are valid"),
        }
    }

    /// Restart the uptime/recency clocks for a fresh connection.
    pub fn reset(&mut self) {
        let now = Instant::now();
        self.connection_started = now;
        self.last_message_received = now;
    }

    pub fn record_message(&mut self) {
        self.last_message_received = Instant::now();
        self.message_count = self.message_count.saturating_add(1);
    }

    pub fn record_decode_error(&mut self) {
        self.decode_error_count = self.decode_error_count.saturating_add(1);
    }

    pub fn record_reconnect(&mut self) {
        self.reconnect_count = self.reconnect_count.saturating_add(1);
    }

    pub fn record_rtt(&mut self, rtt: Duration) {
        let micros = rtt.as_micros().min(u64::MAX as u128) as u64;
        let _ = self.rtt_histogram.record(micros.max(1));
    }

    pub fn stats(&self) -> SessionStats {
        let rtt_samples = self.rtt_histogram.len();
        let (p50, p99) = if rtt_samples == 0 {
            (0, 0)
        } else {
            (
                self.rtt_histogram.value_at_percentile(50.0),
                self.rtt_histogram.value_at_percentile(99.0),
            )
        };

        SessionStats {
            uptime: self.connection_started.elapsed(),
            messages: self.message_count,
            decode_errors: self.decode_error_count,
            reconnects: self.reconnect_count,
            last_message_age: self.last_message_received.elapsed(),
            p50_rtt_us: p50,
            p99_rtt_us: p99,
            rtt_samples,
        }
    }
}

impl Default for SessionHealth {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn records_rtt_percentiles() {
        let mut health = SessionHealth::new();
        health.record_rtt(Duration::from_micros(100));
        health.record_rtt(Duration::from_micros(200));
        health.record_rtt(Duration::from_micros(300));

        let stats = health.stats();
        assert_eq!(stats.rtt_samples, 3);
        assert_eq!(stats.p50_rtt_us, 200);
        assert_eq!(stats.p99_rtt_us, 300);
    }

    #[test]
    fn counters_accumulate_across_resets() {
        let mut health = SessionHealth::new();
        health.record_message();
        health.record_decode_error();
        health.record_reconnect();
        health.reset();
        health.record_message();

        let stats = health.stats();
        assert_eq!(stats.messages, 2);
        assert_eq!(stats.decode_errors, 1);
        assert_eq!(stats.reconnects, 1);
    }

    #[test]
    fn empty_histogram_reports_zero_percentiles() {
        let stats = SessionHealth::new().stats();
        assert_eq!(stats.rtt_samples, 0);
        assert_eq!(stats.p50_rtt_us, 0);
        assert_eq!(stats.p99_rtt_us, 0);
    }
}
