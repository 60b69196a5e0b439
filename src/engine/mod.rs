//! Event lifecycle and price-capture engine.
//!
//! All mutation happens inside [`runtime::TrackerRuntime`], a single task that
//! reacts to feed events, timer signals and refresh completions one at a time.

pub mod countdown;
pub mod history;
pub mod lifecycle;
pub mod runtime;
pub mod scheduler;
pub mod snapshot;

#[cfg(test)]
pub(crate) mod testing;

use serde::Serialize;

use crate::engine::countdown::CountdownTick;
use crate::engine::lifecycle::derive_events;
use crate::engine::snapshot::PriceSnapshotStore;
use crate::types::{ConnectionStatus, EventDescriptor, EventStatus};

pub use runtime::{TrackerHandle, TrackerRuntime};

/// Which part of the presentation a change affects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ViewScope {
    ActivePanel,
    EventTable,
    Price,
    Connection,
}

/// Hook stream for the presentation layer.
#[derive(Debug, Clone, PartialEq)]
pub enum EngineNotice {
    Changed(ViewScope),
    Countdown(CountdownTick),
    /// Human-readable text; the raw error is only logged.
    CatalogFailed(String),
}

/// An event row as the presentation sees it.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EventView {
    #[serde(flatten)]
    pub descriptor: EventDescriptor,
    pub status: EventStatus,
    pub price_to_beat: Option<f64>,
    pub last_price: Option<f64>,
}

/// Read-only state published after every change.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct TrackerSnapshot {
    /// Ordered, last good event list. Statuses are derived on read.
    pub descriptors: Vec<EventDescriptor>,
    pub current_price: Option<f64>,
    pub price_delta: Option<f64>,
    pub history_len: usize,
    pub connection: ConnectionStatus,
    pub countdown: Option<CountdownTick>,
    pub catalog_error: Option<String>,
    pub updated_at_ms: i64,
}

impl TrackerSnapshot {
    pub fn events_at(&self, now_ms: i64, store: &PriceSnapshotStore) -> Vec<EventView> {
        derive_events(&self.descriptors, now_ms)
            .into_iter()
            .map(|e| EventView {
                price_to_beat: store.price_to_beat(e.slug()),
                last_price: store.last_price(e.slug()),
                status: e.status,
                descriptor: e.descriptor,
            })
            .collect()
    }

    pub fn current_event_index(&self, now_ms: i64) -> Option<usize> {
        self.descriptors
            .iter()
            .position(|d| EventStatus::derive(d.start_time_ms, d.end_time_ms, now_ms) == EventStatus::Active)
    }
}
