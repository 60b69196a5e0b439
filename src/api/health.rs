//! Shared health state for the /health endpoint.
//! Updated by the price feed and the engine's refresh path.

use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, Ordering};

/// Shared health metrics. Updated by tracker components, read by API.
#[derive(Default)]
pub struct HealthState {
    /// True while the feed socket is open.
    pub feed_connected: AtomicBool,
    /// Receive time of the last routed tick (0 = none).
    pub last_tick_ms: AtomicI64,
    /// Completed catalog refreshes.
    pub refreshes_ok: AtomicU64,
    /// Failed or empty catalog refreshes.
    pub refreshes_failed: AtomicU64,
}

impl HealthState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_feed_connected(&self, v: bool) {
        self.feed_connected.store(v, Ordering::Relaxed);
    }

    pub fn set_last_tick_ms(&self, ms: i64) {
        self.last_tick_ms.store(ms, Ordering::Relaxed);
    }

    pub fn record_refresh(&self, ok: bool) {
        let counter = if ok { &self.refreshes_ok } else { &self.refreshes_failed };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn feed_connected(&self) -> bool {
        self.feed_connected.load(Ordering::Relaxed)
    }

    pub fn last_tick_ms(&self) -> Option<i64> {
        match self.last_tick_ms.load(Ordering::Relaxed) {
            0 => None,
            ms => Some(ms),
        }
    }

    pub fn refreshes(&self) -> (u64, u64) {
        (
            self.refreshes_ok.load(Ordering::Relaxed),
            self.refreshes_failed.load(Ordering::Relaxed),
        )
    }
}
