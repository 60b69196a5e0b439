use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio::time::interval;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, error, info, warn};

use crate::api::health::HealthState;
use crate::api::latency::LatencyStats;
use crate::config::{RECONNECT_BACKOFF_MS, WS_PING_INTERVAL_SECS};
use crate::error::{AppError, FeedError};
use crate::feed::messages::{build_subscribe_msg, build_unsubscribe_msg, parse_price_frame, Subscription};
use crate::types::{now_ms, ConnectionState, FeedEvent, PriceSource};

/// Dynamic subscription management for the running feed.
#[derive(Debug)]
pub enum FeedControl {
    Subscribe(Subscription),
    Unsubscribe(Subscription),
}

/// Cloneable handle used to change what the feed delivers.
#[derive(Clone)]
pub struct FeedHandle {
    control_tx: mpsc::Sender<FeedControl>,
}

impl FeedHandle {
    pub async fn subscribe(&self, sub: Subscription) -> crate::error::Result<()> {
        self.control_tx
            .send(FeedControl::Subscribe(sub))
            .await
            .map_err(|e| AppError::ChannelSend(e.to_string()))
    }

    pub async fn unsubscribe(&self, sub: Subscription) -> crate::error::Result<()> {
        self.control_tx
            .send(FeedControl::Unsubscribe(sub))
            .await
            .map_err(|e| AppError::ChannelSend(e.to_string()))
    }
}

/// Owns the single persistent connection to the real-time price service and
/// normalizes its frames into [`FeedEvent`]s.
pub struct PriceFeed {
    url: String,
    symbol: String,
    subscriptions: Vec<Subscription>,
    event_tx: mpsc::Sender<FeedEvent>,
    control_rx: mpsc::Receiver<FeedControl>,
    latency: Arc<LatencyStats>,
    health: Arc<HealthState>,
    frames_received: AtomicU64,
    ticks_routed: AtomicU64,
}

impl PriceFeed {
    pub fn new(
        url: String,
        symbol: String,
        event_tx: mpsc::Sender<FeedEvent>,
        latency: Arc<LatencyStats>,
        health: Arc<HealthState>,
    ) -> (Self, FeedHandle) {
        let (control_tx, control_rx) = mpsc::channel(16);
        let feed = Self {
            url,
            symbol,
            subscriptions: Vec::new(),
            event_tx,
            control_rx,
            latency,
            health,
            frames_received: AtomicU64::new(0),
            ticks_routed: AtomicU64::new(0),
        };
        (feed, FeedHandle { control_tx })
    }

    /// Source reported in connection notices: the first subscribed price topic.
    fn source(&self) -> Option<PriceSource> {
        self.subscriptions
            .iter()
            .find_map(|s| PriceSource::from_topic(&s.topic))
    }

    /// Records a subscription made on a live socket. Returns a fresh
    /// connected notice when it changes the reported source.
    fn add_subscription(&mut self, sub: Subscription) -> Option<ConnectionState> {
        let before = self.source();
        self.subscriptions.push(sub);
        let after = self.source();
        (after != before).then_some(ConnectionState {
            connected: true,
            source: after,
            error: None,
        })
    }

    pub async fn run(mut self) {
        let mut backoff_idx = 0usize;

        loop {
            info!("Feed connecting to {}", self.url);
            let frames_before = self.frames_received.load(Ordering::Relaxed);
            let outcome = self.connect_once().await;
            self.health.set_feed_connected(false);

            let reason = match outcome {
                Ok(true) => {
                    info!("Feed control channel dropped, shutting down");
                    return;
                }
                Ok(false) => FeedError::Closed,
                Err(e) => e,
            };
            error!(error = %reason, "Feed connection lost: {reason}");

            if !self.notify(ConnectionState {
                connected: false,
                source: self.source(),
                error: Some(reason.user_message()),
            }) {
                return;
            }

            if self.frames_received.load(Ordering::Relaxed) > frames_before {
                backoff_idx = 0;
            }
            let delay_ms = RECONNECT_BACKOFF_MS
                .get(backoff_idx)
                .or(RECONNECT_BACKOFF_MS.last())
                .copied()
                .unwrap_or(1000);
            backoff_idx = (backoff_idx + 1).min(RECONNECT_BACKOFF_MS.len() - 1);

            warn!("Feed reconnecting in {delay_ms}ms");
            tokio::time::sleep(Duration::from_millis(delay_ms)).await;
        }
    }

    /// Runs one connection to completion. `Ok(true)` means the owner is gone
    /// and the feed should stop; `Ok(false)` means the server closed cleanly.
    async fn connect_once(&mut self) -> std::result::Result<bool, FeedError> {
        let (ws_stream, _) = connect_async(&self.url).await.map_err(FeedError::Connect)?;
        let (mut write, mut read) = ws_stream.split();

        if !self.subscriptions.is_empty() {
            write.send(Message::Text(build_subscribe_msg(&self.subscriptions).into())).await?;
            info!("Feed subscribed to {} topic(s)", self.subscriptions.len());
        }

        self.health.set_feed_connected(true);
        if !self.notify(ConnectionState {
            connected: true,
            source: self.source(),
            error: None,
        }) {
            return Ok(true);
        }

        let mut ping_interval = interval(Duration::from_secs(WS_PING_INTERVAL_SECS));
        ping_interval.tick().await; // consume immediate first tick

        loop {
            tokio::select! {
                msg = read.next() => {
                    match msg {
                        Some(Ok(Message::Text(text))) => {
                            if !self.handle_frame(&text) {
                                return Ok(true);
                            }
                        }
                        Some(Ok(Message::Ping(data))) => {
                            write.send(Message::Pong(data)).await?;
                        }
                        Some(Ok(Message::Close(_))) | None => {
                            return Ok(false);
                        }
                        Some(Err(e)) => return Err(e.into()),
                        Some(Ok(_)) => {}
                    }
                }

                _ = ping_interval.tick() => {
                    debug!("Feed ping");
                    write.send(Message::Text("PING".into())).await?;
                }

                ctrl = self.control_rx.recv() => {
                    match ctrl {
                        Some(FeedControl::Subscribe(sub)) => {
                            if !self.subscriptions.contains(&sub) {
                                write.send(Message::Text(build_subscribe_msg(std::slice::from_ref(&sub)).into())).await?;
                                info!(topic = %sub.topic, filters = %sub.filters, "Feed subscribed");
                                if let Some(state) = self.add_subscription(sub) {
                                    if !self.notify(state) {
                                        return Ok(true);
                                    }
                                }
                            }
                        }
                        Some(FeedControl::Unsubscribe(sub)) => {
                            if let Some(pos) = self.subscriptions.iter().position(|s| *s == sub) {
                                self.subscriptions.remove(pos);
                                write.send(Message::Text(build_unsubscribe_msg(std::slice::from_ref(&sub)).into())).await?;
                                info!(topic = %sub.topic, "Feed unsubscribed");
                            }
                        }
                        None => {
                            let _ = write.send(Message::Close(None)).await;
                            return Ok(true);
                        }
                    }
                }
            }
        }
    }

    /// Returns false once the engine side of the channel is gone.
    fn handle_frame(&self, text: &str) -> bool {
        let received_ms = now_ms();
        let total_frames = self.frames_received.fetch_add(1, Ordering::Relaxed) + 1;
        if total_frames % 500 == 0 {
            let routed = self.ticks_routed.load(Ordering::Relaxed);
            info!(frames = total_frames, ticks = routed, "[FEED] {total_frames} frames | ticks={routed}");
        }

        for sub in &self.subscriptions {
            for tick in parse_price_frame(text, &sub.topic, &self.symbol) {
                let lag_ms = received_ms - tick.timestamp_ms;
                if tick.timestamp_ms > 0 && lag_ms >= 0 {
                    self.latency.record_us(lag_ms as u64 * 1000);
                }
                self.health.set_last_tick_ms(received_ms);
                self.ticks_routed.fetch_add(1, Ordering::Relaxed);
                if !self.forward(FeedEvent::Tick(tick)) {
                    return false;
                }
            }
        }
        true
    }

    fn notify(&self, state: ConnectionState) -> bool {
        self.forward(FeedEvent::Connection(state))
    }

    fn forward(&self, event: FeedEvent) -> bool {
        match self.event_tx.try_send(event) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => {
                warn!("feed channel full, dropping event");
                true
            }
            Err(mpsc::error::TrySendError::Closed(_)) => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn feed() -> (PriceFeed, FeedHandle, mpsc::Receiver<FeedEvent>) {
        let (tx, rx) = mpsc::channel(8);
        let (feed, handle) = PriceFeed::new(
            "ws://localhost:0".to_string(),
            "btc/usd".to_string(),
            tx,
            Arc::new(LatencyStats::new()),
            Arc::new(HealthState::new()),
        );
        (feed, handle, rx)
    }

    #[test]
    fn routes_matching_frames_as_ticks() {
        let (mut feed, _handle, mut rx) = feed();
        feed.subscriptions.push(Subscription::price("crypto_prices_chainlink", "btc/usd"));

        let raw = r#"{"topic":"crypto_prices_chainlink","type":"update","payload":{"symbol":"btc/usd","timestamp":1000,"value":65000.0}}"#;
        assert!(feed.handle_frame(raw));

        match rx.try_recv() {
            Ok(FeedEvent::Tick(t)) => assert_eq!(t.value, 65000.0),
            other => panic!("expected tick, got {other:?}"),
        }
        assert!(feed.health.last_tick_ms().is_some());
        assert_eq!(feed.latency.len(), 1);
    }

    #[test]
    fn frames_without_subscription_are_dropped() {
        let (feed, _handle, mut rx) = feed();
        let raw = r#"{"topic":"crypto_prices_chainlink","type":"update","payload":{"symbol":"btc/usd","timestamp":1000,"value":1.0}}"#;
        assert!(feed.handle_frame(raw));
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn closed_receiver_stops_routing() {
        let (mut feed, _handle, rx) = feed();
        feed.subscriptions.push(Subscription::price("crypto_prices_chainlink", "btc/usd"));
        drop(rx);
        let raw = r#"{"topic":"crypto_prices_chainlink","type":"update","payload":{"symbol":"btc/usd","timestamp":1,"value":1.0}}"#;
        assert!(!feed.handle_frame(raw));
    }

    #[test]
    fn source_follows_first_price_topic() {
        let (mut feed, _handle, _rx) = feed();
        assert_eq!(feed.source(), None);
        feed.subscriptions.push(Subscription::price("crypto_prices", "btcusdt"));
        assert_eq!(feed.source(), Some(PriceSource::Binance));
    }

    #[test]
    fn first_price_subscription_announces_source() {
        let (mut feed, _handle, _rx) = feed();
        let state = feed
            .add_subscription(Subscription::price("crypto_prices_chainlink", "btc/usd"))
            .expect("source changed");
        assert!(state.connected);
        assert_eq!(state.source, Some(PriceSource::Chainlink));
        assert!(state.error.is_none());

        // Source stays on the first price topic.
        assert!(feed
            .add_subscription(Subscription::price("crypto_prices", "btcusdt"))
            .is_none());
        assert_eq!(feed.subscriptions.len(), 2);
    }

    #[tokio::test]
    async fn handle_queues_control_messages() {
        let (mut feed, handle, _rx) = feed();
        handle
            .subscribe(Subscription::price("crypto_prices_chainlink", "btc/usd"))
            .await
            .unwrap();
        match feed.control_rx.recv().await {
            Some(FeedControl::Subscribe(s)) => assert_eq!(s.topic, "crypto_prices_chainlink"),
            other => panic!("unexpected {other:?}"),
        }

        handle
            .unsubscribe(Subscription::price("crypto_prices", "btcusdt"))
            .await
            .unwrap();
        match feed.control_rx.recv().await {
            Some(FeedControl::Unsubscribe(s)) => assert_eq!(s.filters, "btcusdt"),
            other => panic!("unexpected {other:?}"),
        }
    }
}
