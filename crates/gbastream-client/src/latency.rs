use std::time::Duration;

use tokio::time::Instant;

/// Floor for the probe period; a zero period would make the driver's ticker
/// panic.
pub const MIN_PROBE_INTERVAL: Duration = Duration::from_millis(1);

/// One round-trip measurement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LatencySample {
    pub sent_at: Instant,
    pub rtt: Duration,
}

impl LatencySample {
    /// Round trip rounded to the nearest millisecond.
    pub fn rtt_millis(&self) -> u64 {
        let micros = self.rtt.as_micros();
        ((micros + 500) / 1000) as u64
    }
}

/// Ping/pong round-trip tracker for one link.
///
/// At most one probe is outstanding; a probe that is never answered is
/// overwritten by the next one.
#[derive(Debug)]
pub struct LatencyMonitor {
    interval: Duration,
    outstanding: Option<Instant>,
    latest: Option<LatencySample>,
}

impl LatencyMonitor {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval: interval.max(MIN_PROBE_INTERVAL),
            outstanding: None,
            latest: None,
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Records a probe sent at `now`, replacing any unanswered one.
    pub fn probe_sent(&mut self, now: Instant) {
        self.outstanding = Some(now);
    }

    /// Matches a pong against the outstanding probe. Unmatched pongs yield
    /// nothing.
    pub fn pong_received(&mut self, now: Instant) -> Option<LatencySample> {
        let sent_at = self.outstanding.take()?;
        let sample = LatencySample {
            sent_at,
            rtt: now.saturating_duration_since(sent_at),
        };
        self.latest = Some(sample);
        Some(sample)
    }

    pub fn latest(&self) -> Option<LatencySample> {
        self.latest
    }
}
