//! Inbound bitrate estimation
//!
//! A tap on the ingestion path. It only counts payload bytes; packets pass
//! through untouched.

use std::time::{Duration, Instant};

use crate::media::FlvTag;

/// How often a new estimate is produced
pub const SAMPLE_INTERVAL: Duration = Duration::from_millis(500);

/// Rolling throughput estimate over fixed sampling windows
#[derive(Debug)]
pub struct BitrateFilter {
    interval: Duration,
    window_bytes: u64,
    window_start: Instant,
    bitrate: f64,
}

impl BitrateFilter {
    pub fn new() -> Self {
        Self::with_interval(SAMPLE_INTERVAL)
    }

    pub fn with_interval(interval: Duration) -> Self {
        Self {
            interval,
            window_bytes: 0,
            window_start: Instant::now(),
            bitrate: 0.0,
        }
    }

    /// Count a packet; returns a fresh estimate (kbit/s) when one is due
    pub fn observe(&mut self, tag: &FlvTag) -> Option<f64> {
        self.observe_at(tag.size(), Instant::now())
    }

    fn observe_at(&mut self, bytes: usize, now: Instant) -> Option<f64> {
        self.window_bytes += bytes as u64;

        let elapsed = now.saturating_duration_since(self.window_start);
        if elapsed < self.interval {
            return None;
        }

        let secs = elapsed.as_secs_f64();
        self.bitrate = (self.window_bytes * 8) as f64 / 1000.0 / secs;
        self.window_bytes = 0;
        self.window_start = now;
        Some(self.bitrate)
    }

    /// Most recent estimate (kbit/s)
    pub fn bitrate(&self) -> f64 {
        self.bitrate
    }
}

impl Default for BitrateFilter {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_no_estimate_within_window() {
        let mut filter = BitrateFilter::new();
        let start = filter.window_start;

        assert_eq!(filter.observe_at(1000, start + Duration::from_millis(100)), None);
        assert_eq!(filter.observe_at(1000, start + Duration::from_millis(400)), None);
        assert_eq!(filter.bitrate(), 0.0);
    }

    #[test]
    fn test_estimate_after_window() {
        let mut filter = BitrateFilter::new();
        let start = filter.window_start;

        filter.observe_at(30_000, start + Duration::from_millis(200));
        let kbps = filter
            .observe_at(32_500, start + Duration::from_millis(500))
            .unwrap();

        // 62,500 bytes * 8 / 1000 / 0.5 s = 1000 kbit/s
        assert!((kbps - 1000.0).abs() < 1e-9);
        assert_eq!(filter.bitrate(), kbps);
    }

    #[test]
    fn test_window_resets() {
        let mut filter = BitrateFilter::with_interval(Duration::from_secs(1));
        let start = filter.window_start;

        filter.observe_at(125_000, start + Duration::from_secs(1)).unwrap();
        let second = filter
            .observe_at(250_000, start + Duration::from_secs(2))
            .unwrap();

        // Only the second window's bytes count
        assert!((second - 2000.0).abs() < 1e-9);
    }
}
