use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::api::health::HealthState;
use crate::catalog::EventCatalog;
use crate::config::{Config, CHANNEL_CAPACITY, COUNTDOWN_TICK_MS, NOTICE_CAPACITY};
use crate::engine::countdown::{CountdownDriver, CountdownTick, SyncAction};
use crate::engine::lifecycle::LifecycleEngine;
use crate::engine::scheduler::Ticker;
use crate::engine::snapshot::{CaptureOutcome, PriceSnapshotStore, SnapshotTracker};
use crate::engine::{EngineNotice, TrackerSnapshot, ViewScope};
use crate::error::{AppError, CatalogError, Result};
use crate::types::{now_ms, ConnectionStatus, EventDescriptor, EventStatus, FeedEvent};

/// Source of "now" in Unix milliseconds.
pub type Clock = Arc<dyn Fn() -> i64 + Send + Sync>;

pub fn system_clock() -> Clock {
    Arc::new(now_ms)
}

/// Internal signals processed by the engine loop, one at a time.
#[derive(Debug)]
pub enum Signal {
    CountdownTick(u64),
    AutoRefresh(u64),
    RefreshRequested,
    RefreshDone(std::result::Result<Vec<EventDescriptor>, CatalogError>),
    Shutdown,
}

#[derive(Debug, Clone)]
pub struct RuntimeOptions {
    pub event_count: usize,
    pub auto_refresh: Duration,
    pub countdown_period: Duration,
    pub history_capacity: usize,
}

impl RuntimeOptions {
    pub fn from_config(cfg: &Config) -> Self {
        Self {
            event_count: cfg.event_count,
            auto_refresh: Duration::from_secs(cfg.auto_refresh_secs),
            countdown_period: Duration::from_millis(COUNTDOWN_TICK_MS),
            history_capacity: cfg.history_capacity,
        }
    }
}

// ---------------------------------------------------------------------------
// TrackerHandle
// ---------------------------------------------------------------------------

/// Read side of the engine, plus the two commands presentation may issue.
#[derive(Clone)]
pub struct TrackerHandle {
    signal_tx: mpsc::Sender<Signal>,
    snapshot_rx: watch::Receiver<TrackerSnapshot>,
    notice_tx: broadcast::Sender<EngineNotice>,
    store: Arc<PriceSnapshotStore>,
}

impl TrackerHandle {
    pub fn snapshot(&self) -> TrackerSnapshot {
        self.snapshot_rx.borrow().clone()
    }

    /// Change notification: resolves whenever a new snapshot is published.
    pub fn watch(&self) -> watch::Receiver<TrackerSnapshot> {
        self.snapshot_rx.clone()
    }

    pub fn notices(&self) -> broadcast::Receiver<EngineNotice> {
        self.notice_tx.subscribe()
    }

    pub fn store(&self) -> &PriceSnapshotStore {
        &self.store
    }

    pub fn price_to_beat(&self, slug: &str) -> Option<f64> {
        self.store.price_to_beat(slug)
    }

    pub fn last_price(&self, slug: &str) -> Option<f64> {
        self.store.last_price(slug)
    }

    pub async fn request_refresh(&self) -> Result<()> {
        self.signal_tx
            .send(Signal::RefreshRequested)
            .await
            .map_err(|e| AppError::ChannelSend(e.to_string()))
    }

    pub async fn shutdown(&self) {
        let _ = self.signal_tx.send(Signal::Shutdown).await;
    }
}

/// Reports `CatalogError::Interrupted` if a refresh task unwinds before
/// sending its result, so the engine never waits on a dead fetch.
struct RefreshGuard(Option<mpsc::Sender<Signal>>);

impl RefreshGuard {
    fn disarm(mut self) {
        self.0 = None;
    }
}

impl Drop for RefreshGuard {
    fn drop(&mut self) {
        if let Some(tx) = self.0.take() {
            let _ = tx.try_send(Signal::RefreshDone(Err(CatalogError::Interrupted)));
        }
    }
}

// ---------------------------------------------------------------------------
// TrackerRuntime
// ---------------------------------------------------------------------------

/// Single owner of all engine state.
pub struct TrackerRuntime<C> {
    lifecycle: LifecycleEngine<C>,
    tracker: SnapshotTracker,
    countdown: CountdownDriver,
    countdown_view: Option<CountdownTick>,
    connection: ConnectionStatus,
    catalog_error: Option<String>,
    options: RuntimeOptions,
    refresh_in_flight: bool,
    refresh_pending: bool,
    refresh_task: Option<JoinHandle<()>>,
    countdown_ticker: Ticker<Signal>,
    refresh_ticker: Ticker<Signal>,
    signal_tx: mpsc::Sender<Signal>,
    signal_rx: mpsc::Receiver<Signal>,
    feed_rx: mpsc::Receiver<FeedEvent>,
    snapshot_tx: watch::Sender<TrackerSnapshot>,
    notice_tx: broadcast::Sender<EngineNotice>,
    health: Arc<HealthState>,
    clock: Clock,
}

impl<C: EventCatalog> TrackerRuntime<C> {
    pub fn new(
        catalog: Arc<C>,
        feed_rx: mpsc::Receiver<FeedEvent>,
        options: RuntimeOptions,
        health: Arc<HealthState>,
        clock: Clock,
    ) -> (Self, TrackerHandle) {
        let (signal_tx, signal_rx) = mpsc::channel(CHANNEL_CAPACITY);
        let (snapshot_tx, snapshot_rx) = watch::channel(TrackerSnapshot::default());
        let (notice_tx, _) = broadcast::channel(NOTICE_CAPACITY);
        let store = PriceSnapshotStore::new();

        let handle = TrackerHandle {
            signal_tx: signal_tx.clone(),
            snapshot_rx,
            notice_tx: notice_tx.clone(),
            store: Arc::clone(&store),
        };

        let runtime = Self {
            lifecycle: LifecycleEngine::new(catalog),
            tracker: SnapshotTracker::new(store, options.history_capacity),
            countdown: CountdownDriver::new(),
            countdown_view: None,
            connection: ConnectionStatus::default(),
            catalog_error: None,
            countdown_ticker: Ticker::new(options.countdown_period, signal_tx.clone(), Signal::CountdownTick),
            refresh_ticker: Ticker::new(options.auto_refresh, signal_tx.clone(), Signal::AutoRefresh),
            options,
            refresh_in_flight: false,
            refresh_pending: false,
            refresh_task: None,
            signal_tx,
            signal_rx,
            feed_rx,
            snapshot_tx,
            notice_tx,
            health,
            clock,
        };
        (runtime, handle)
    }

    pub async fn run(mut self) {
        info!(
            event_count = self.options.event_count,
            auto_refresh_secs = self.options.auto_refresh.as_secs(),
            "Tracker engine starting"
        );
        self.request_refresh();
        self.refresh_ticker.start();

        let mut feed_open = true;
        loop {
            tokio::select! {
                event = self.feed_rx.recv(), if feed_open => match event {
                    Some(event) => self.on_feed_event(event),
                    None => {
                        warn!("Feed channel closed; price is frozen at its last value");
                        feed_open = false;
                    }
                },
                signal = self.signal_rx.recv() => match signal {
                    Some(Signal::Shutdown) | None => break,
                    Some(signal) => self.on_signal(signal),
                },
            }
        }

        self.teardown();
        info!("Tracker engine stopped");
    }

    fn teardown(&mut self) {
        self.countdown_ticker.stop();
        self.refresh_ticker.stop();
        if let Some(task) = self.refresh_task.take() {
            task.abort();
        }
    }

    fn now(&self) -> i64 {
        (self.clock)()
    }

    // -----------------------------------------------------------------------
    // Handlers
    // -----------------------------------------------------------------------

    fn on_feed_event(&mut self, event: FeedEvent) {
        let now = self.now();
        match event {
            FeedEvent::Tick(tick) => {
                self.tracker.record_tick(tick);
                self.notify(EngineNotice::Changed(ViewScope::Price));
                self.evaluate(now);
            }
            FeedEvent::Connection(state) => {
                if state.connected {
                    info!(source = ?state.source, "Feed connected");
                } else {
                    warn!(error = ?state.error, "Feed disconnected");
                }
                self.connection = ConnectionStatus {
                    connected: state.connected,
                    source: state.source,
                    last_update_ms: Some(now),
                    error: state.error,
                };
                self.notify(EngineNotice::Changed(ViewScope::Connection));
            }
        }
        self.publish(now);
    }

    fn on_signal(&mut self, signal: Signal) {
        let now = self.now();
        match signal {
            Signal::CountdownTick(generation) => {
                if !self.countdown_ticker.is_current(generation) {
                    debug!(generation, "stale countdown tick dropped");
                    return;
                }
                if let Some(tick) = self.countdown.tick(now) {
                    self.on_countdown(tick, now);
                }
                self.sync_countdown(now);
            }
            Signal::AutoRefresh(generation) => {
                if self.refresh_ticker.is_current(generation) {
                    self.request_refresh();
                }
                return;
            }
            Signal::RefreshRequested => {
                self.request_refresh();
                return;
            }
            Signal::RefreshDone(result) => self.on_refresh_done(result, now),
            Signal::Shutdown => {
                self.teardown();
                return;
            }
        }
        self.publish(now);
    }

    fn on_refresh_done(
        &mut self,
        result: std::result::Result<Vec<EventDescriptor>, CatalogError>,
        now: i64,
    ) {
        self.refresh_in_flight = false;
        self.refresh_task = None;

        match self.lifecycle.apply_fetch(result, now) {
            Ok(_) => {
                self.catalog_error = None;
                self.health.record_refresh(true);
                self.notify(EngineNotice::Changed(ViewScope::EventTable));
                self.evaluate(now);
            }
            Err(e) => {
                warn!(
                    error = %e,
                    kept = self.lifecycle.descriptors().len(),
                    "Catalog refresh failed, serving last good list: {e}"
                );
                let text = e.user_message();
                self.catalog_error = Some(text.clone());
                self.health.record_refresh(false);
                self.notify(EngineNotice::CatalogFailed(text));
            }
        }

        if self.refresh_pending {
            self.refresh_pending = false;
            self.request_refresh();
        }
    }

    /// Run the capture rules against the current list, then reconcile the countdown.
    fn evaluate(&mut self, now: i64) {
        let events = self.lifecycle.events(now);
        if let CaptureOutcome::Applied { captures, .. } = self.tracker.apply_rules(&events) {
            if captures.price_to_beat.is_some() {
                self.notify(EngineNotice::Changed(ViewScope::ActivePanel));
            }
            if !captures.last_price.is_empty() {
                self.notify(EngineNotice::Changed(ViewScope::EventTable));
            }
        }
        self.sync_countdown(now);
    }

    fn sync_countdown(&mut self, now: i64) {
        // An expiry noticed here may be followed by a start on the next event.
        for _ in 0..2 {
            let events = self.lifecycle.events(now);
            let active = events.iter().find(|e| e.status == EventStatus::Active);
            match self.countdown.sync(active, now) {
                SyncAction::Unchanged => break,
                SyncAction::Start(slug) => {
                    info!(slug = %slug, "Countdown started");
                    self.countdown_ticker.start();
                    if let Some(tick) = self.countdown.tick(now) {
                        self.on_countdown(tick, now);
                    }
                    self.notify(EngineNotice::Changed(ViewScope::ActivePanel));
                    break;
                }
                SyncAction::Stop => {
                    info!("No active event, countdown idle");
                    self.countdown_view = None;
                    self.notify(EngineNotice::Changed(ViewScope::ActivePanel));
                    break;
                }
                SyncAction::Expired(tick) => self.on_countdown(tick, now),
            }
        }
        self.settle_countdown_ticker(now);
    }

    /// The cadence runs while a countdown runs, and also while the event that
    /// just expired is still active: flooring reports zero up to a second
    /// before `end_time`, and the next slot must start without waiting for a
    /// tick or a refresh.
    fn settle_countdown_ticker(&mut self, now: i64) {
        let keep = self.countdown.is_running()
            || self
                .lifecycle
                .events(now)
                .iter()
                .any(|e| e.status == EventStatus::Active && self.countdown.last_expired() == Some(e.slug()));
        if !keep {
            self.countdown_ticker.stop();
        } else if !self.countdown_ticker.is_running() {
            self.countdown_ticker.start();
        }
    }

    fn on_countdown(&mut self, tick: CountdownTick, now: i64) {
        self.countdown_view = Some(tick.clone());
        let expired = tick.expired.then(|| tick.slug.clone());
        self.notify(EngineNotice::Countdown(tick));
        if let Some(slug) = expired {
            self.on_expiry(&slug, now);
        }
    }

    fn on_expiry(&mut self, slug: &str, now: i64) {
        info!(slug = %slug, "Event expired, forcing catalog refresh");
        let events = self.lifecycle.events(now);
        if self.tracker.capture_after_expiry(&events, slug).is_some() {
            self.notify(EngineNotice::Changed(ViewScope::EventTable));
        }
        self.request_refresh();
    }

    /// At most one fetch in flight; requests during a fetch collapse into a
    /// single follow-up.
    fn request_refresh(&mut self) {
        if self.refresh_in_flight {
            if !self.refresh_pending {
                debug!("Refresh in flight, queueing one follow-up");
            }
            self.refresh_pending = true;
            return;
        }
        self.refresh_in_flight = true;

        let catalog = self.lifecycle.catalog();
        let tx = self.signal_tx.clone();
        let count = self.options.event_count;
        self.refresh_task = Some(tokio::spawn(async move {
            let guard = RefreshGuard(Some(tx.clone()));
            let result = catalog.fetch_upcoming(count).await;
            guard.disarm();
            let _ = tx.send(Signal::RefreshDone(result)).await;
        }));
    }

    fn notify(&self, notice: EngineNotice) {
        // No subscribers is fine.
        let _ = self.notice_tx.send(notice);
    }

    fn publish(&self, now: i64) {
        let history = self.tracker.history();
        self.snapshot_tx.send_replace(TrackerSnapshot {
            descriptors: self.lifecycle.descriptors().to_vec(),
            current_price: self.tracker.current_price(),
            price_delta: history.delta(),
            history_len: history.len(),
            connection: self.connection.clone(),
            countdown: self.countdown_view.clone(),
            catalog_error: self.catalog_error.clone(),
            updated_at_ms: now,
        });
    }
}
