//! Trailing time window of speed samples for a single vehicle.

use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

/// Retention window used when none is configured.
pub const DEFAULT_WINDOW_MS: i64 = 30_000;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SpeedSample {
    pub timestamp: i64,
    pub speed: f64,
}

/// Speed samples ordered by event timestamp, confined to `window_ms`.
///
/// Samples are inserted in timestamp order (a late sample is placed after
/// any sample with the same timestamp), so front eviction stays exact when
/// the transport delivers slightly out of order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WindowedHistory {
    window_ms: i64,
    samples: VecDeque<SpeedSample>,
}

impl Default for WindowedHistory {
    fn default() -> Self {
        Self::new(DEFAULT_WINDOW_MS)
    }
}

impl WindowedHistory {
    pub fn new(window_ms: i64) -> Self {
        Self {
            window_ms,
            samples: VecDeque::new(),
        }
    }

    pub fn window_ms(&self) -> i64 {
        self.window_ms
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Insert a sample, then drop every sample older than
    /// `timestamp - window_ms`.
    pub fn add_sample(&mut self, timestamp: i64, speed: f64) {
        let pos = self.samples.partition_point(|s| s.timestamp <= timestamp);
        self.samples.insert(pos, SpeedSample { timestamp, speed });

        let cutoff = timestamp.saturating_sub(self.window_ms);
        while self.samples.front().is_some_and(|s| s.timestamp < cutoff) {
            self.samples.pop_front();
        }
    }

    /// Samples with `reference - range_ms <= timestamp <= reference`,
    /// oldest first.
    pub fn samples_in_range(&self, reference: i64, range_ms: i64) -> impl Iterator<Item = &SpeedSample> {
        let start = reference.saturating_sub(range_ms);
        self.samples
            .iter()
            .filter(move |s| s.timestamp >= start && s.timestamp <= reference)
    }

    pub fn latest(&self) -> Option<&SpeedSample> {
        self.samples.back()
    }

    pub fn iter(&self) -> impl Iterator<Item = &SpeedSample> {
        self.samples.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn timestamps(h: &WindowedHistory) -> Vec<i64> {
        h.iter().map(|s| s.timestamp).collect()
    }

    #[test]
    fn test_eviction_keeps_window_relative_to_newest() {
        let mut h = WindowedHistory::new(30_000);
        h.add_sample(0, 10.0);
        h.add_sample(10_000, 11.0);
        h.add_sample(30_000, 12.0);
        // exactly on the boundary is retained
        assert_eq!(timestamps(&h), vec![0, 10_000, 30_000]);

        h.add_sample(30_001, 13.0);
        assert_eq!(timestamps(&h), vec![10_000, 30_000, 30_001]);

        h.add_sample(100_000, 14.0);
        assert_eq!(timestamps(&h), vec![100_000]);
    }

    #[test]
    fn test_late_sample_inserted_in_order() {
        let mut h = WindowedHistory::new(30_000);
        h.add_sample(1_000, 10.0);
        h.add_sample(3_000, 12.0);
        h.add_sample(2_000, 11.0);
        assert_eq!(timestamps(&h), vec![1_000, 2_000, 3_000]);

        h.add_sample(2_000, 11.5);
        assert_eq!(h.len(), 4);
        assert_eq!(h.iter().nth(2).map(|s| s.speed), Some(11.5));
        assert_eq!(h.latest().map(|s| s.timestamp), Some(3_000));
    }

    #[test]
    fn test_mild_reordering_never_leaves_stale_front() {
        let mut h = WindowedHistory::new(30_000);
        for ts in [0, 5_000, 4_000, 31_000, 30_500, 36_000] {
            h.add_sample(ts, 1.0);
        }
        // 36_000 - 30_000 = 6_000: everything before it is gone
        assert_eq!(timestamps(&h), vec![30_500, 31_000, 36_000]);
    }

    #[test]
    fn test_range_bounds_inclusive() {
        let mut h = WindowedHistory::new(30_000);
        for ts in [8_000, 9_000, 9_500, 10_000, 10_500] {
            h.add_sample(ts, 1.0);
        }
        let got: Vec<i64> = h.samples_in_range(10_000, 1_000).map(|s| s.timestamp).collect();
        assert_eq!(got, vec![9_000, 9_500, 10_000]);
        assert_eq!(h.samples_in_range(7_000, 500).count(), 0);
    }
}
