use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tracing::{debug, info};

use crate::engine::history::PriceHistory;
use crate::types::{EventStatus, PriceTick, TrackedEvent};

// ---------------------------------------------------------------------------
// PriceSnapshotStore
// ---------------------------------------------------------------------------

/// Write-once captured prices, keyed by event slug.
///
/// Shared with the HTTP layer behind an `Arc`; only the tracker writes.
#[derive(Debug, Default)]
pub struct PriceSnapshotStore {
    /// slug → price when the event became active
    price_to_beat: DashMap<String, f64>,
    /// slug → price when the preceding event expired
    last_price: DashMap<String, f64>,
}

impl PriceSnapshotStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn price_to_beat(&self, slug: &str) -> Option<f64> {
        self.price_to_beat.get(slug).map(|v| *v)
    }

    pub fn last_price(&self, slug: &str) -> Option<f64> {
        self.last_price.get(slug).map(|v| *v)
    }

    /// Returns true only on the first capture for `slug`.
    fn capture_price_to_beat(&self, slug: &str, price: f64) -> bool {
        insert_once(&self.price_to_beat, slug, price)
    }

    fn capture_last_price(&self, slug: &str, price: f64) -> bool {
        insert_once(&self.last_price, slug, price)
    }

    pub fn len(&self) -> (usize, usize) {
        (self.price_to_beat.len(), self.last_price.len())
    }
}

fn insert_once(map: &DashMap<String, f64>, slug: &str, price: f64) -> bool {
    match map.entry(slug.to_string()) {
        Entry::Occupied(_) => false,
        Entry::Vacant(v) => {
            v.insert(price);
            true
        }
    }
}

// ---------------------------------------------------------------------------
// Capture outcome
// ---------------------------------------------------------------------------

/// Slugs newly written by one pass of the capture rules.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Captures {
    pub price_to_beat: Option<String>,
    pub last_price: Vec<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum CaptureOutcome {
    /// No price has been received yet; nothing was evaluated.
    Skipped,
    /// Rules ran at `price`. `captures` may be empty when everything was
    /// already recorded.
    Applied { price: f64, captures: Captures },
}

// ---------------------------------------------------------------------------
// SnapshotTracker
// ---------------------------------------------------------------------------

/// Received prices plus the capture rules that write into the store.
pub struct SnapshotTracker {
    store: Arc<PriceSnapshotStore>,
    history: PriceHistory,
}

impl SnapshotTracker {
    pub fn new(store: Arc<PriceSnapshotStore>, history_capacity: usize) -> Self {
        Self {
            store,
            history: PriceHistory::new(history_capacity),
        }
    }

    pub fn store(&self) -> Arc<PriceSnapshotStore> {
        Arc::clone(&self.store)
    }

    /// The most recently received value wins, whatever its embedded timestamp.
    pub fn record_tick(&mut self, tick: PriceTick) {
        debug!(price = tick.value, ts = tick.timestamp_ms, "tick");
        self.history.push(tick);
    }

    pub fn current_price(&self) -> Option<f64> {
        self.history.latest().map(|p| p.value)
    }

    pub fn history(&self) -> &PriceHistory {
        &self.history
    }

    /// Run both capture rules over an ordered, status-derived event list.
    ///
    /// Last-price is checked on every adjacent pair, not only around the
    /// active event: after a feed gap several events may have expired at once.
    pub fn apply_rules(&self, events: &[TrackedEvent]) -> CaptureOutcome {
        let Some(price) = self.current_price() else {
            return CaptureOutcome::Skipped;
        };
        let mut captures = Captures::default();

        if let Some(active) = events.iter().find(|e| e.status == EventStatus::Active) {
            if self.store.capture_price_to_beat(active.slug(), price) {
                info!(slug = %active.slug(), price, "Captured price to beat");
                captures.price_to_beat = Some(active.slug().to_string());
            }
        }

        for pair in events.windows(2) {
            let (previous, current) = (&pair[0], &pair[1]);
            if previous.status == EventStatus::Expired
                && self.store.capture_last_price(current.slug(), price)
            {
                info!(slug = %current.slug(), after = %previous.slug(), price, "Captured last price");
                captures.last_price.push(current.slug().to_string());
            }
        }

        CaptureOutcome::Applied { price, captures }
    }

    /// Expiry-side duplicate of the last-price rule: capture for the event
    /// following `expired_slug`. Returns the slug written, if any.
    pub fn capture_after_expiry(&self, events: &[TrackedEvent], expired_slug: &str) -> Option<String> {
        let price = self.current_price()?;
        let idx = events.iter().position(|e| e.slug() == expired_slug)?;
        let next = events.get(idx + 1)?;
        if self.store.capture_last_price(next.slug(), price) {
            info!(slug = %next.slug(), after = %expired_slug, price, "Captured last price on expiry");
            Some(next.slug().to_string())
        } else {
            None
        }
    }
}
