//! In-memory latency histogram for the price feed.
//! Records the gap between a tick's source timestamp and its arrival here.

use std::sync::Mutex;

/// Shared latency stats. Feed records, API reads.
/// Values stored in microseconds.
pub struct LatencyStats {
    inner: Mutex<hdrhistogram::Histogram<u64>>,
}

impl LatencyStats {
    /// Tracks 1us to 100s, 3 significant figures.
    pub fn new() -> Self {
        let histogram = hdrhistogram::Histogram::new_with_bounds(1, 100_000_000, 3)
            .expect("valid histogram bounds");
        Self {
            inner: Mutex::new(histogram),
        }
    }

    /// Values above the upper bound are clamped to it.
    pub fn record_us(&self, us: u64) {
        if let Ok(mut h) = self.inner.lock() {
            let _ = h.record(us.clamp(1, 100_000_000));
        }
    }

    /// Return (p50_ms, p95_ms, p99_ms). None if no samples.
    pub fn percentiles_ms(&self) -> Option<(f64, f64, f64)> {
        let h = self.inner.lock().ok()?;
        if h.len() == 0 {
            return None;
        }
        let ms = |q: f64| h.value_at_quantile(q) as f64 / 1000.0;
        Some((ms(0.5), ms(0.95), ms(0.99)))
    }

    pub fn len(&self) -> u64 {
        self.inner.lock().map(|h| h.len()).unwrap_or(0)
    }
}

impl Default for LatencyStats {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_has_no_percentiles() {
        assert!(LatencyStats::new().percentiles_ms().is_none());
    }

    #[test]
    fn percentiles_in_milliseconds() {
        let stats = LatencyStats::new();
        for _ in 0..99 {
            stats.record_us(2_000);
        }
        stats.record_us(500_000);
        let (p50, _, p99) = stats.percentiles_ms().unwrap();
        assert!((p50 - 2.0).abs() < 0.01, "p50={p50}");
        assert!(p99 <= 2.01, "p99={p99}");
        assert_eq!(stats.len(), 100);
    }

    #[test]
    fn zero_and_huge_are_clamped() {
        let stats = LatencyStats::new();
        stats.record_us(0);
        stats.record_us(u64::MAX);
        assert_eq!(stats.len(), 2);
    }
}
