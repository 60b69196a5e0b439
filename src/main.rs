mod api;
mod catalog;
mod config;
mod engine;
mod error;
mod feed;
mod types;

use std::sync::Arc;

use tokio::sync::{broadcast, mpsc};
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;

use crate::api::health::HealthState;
use crate::api::latency::LatencyStats;
use crate::api::routes::{router, ApiState};
use crate::catalog::GammaCatalog;
use crate::config::{Config, CHANNEL_CAPACITY};
use crate::engine::runtime::{system_clock, RuntimeOptions};
use crate::engine::{EngineNotice, TrackerRuntime};
use crate::error::Result;
use crate::feed::{PriceFeed, Subscription};

#[tokio::main]
async fn main() {
    let cfg = match Config::from_env() {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Config error: {e}");
            std::process::exit(1);
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(&cfg.log_level))
        .init();

    if let Err(e) = run(cfg).await {
        error!("Fatal error: {e}");
        std::process::exit(1);
    }
}

async fn run(cfg: Config) -> Result<()> {
    info!(
        "Tracking {} slots of {} (lookback {}), price {} on {}",
        cfg.event_count, cfg.slug_prefix, cfg.lookback_slots, cfg.price_symbol, cfg.price_topic,
    );

    let latency = Arc::new(LatencyStats::new());
    let health = Arc::new(HealthState::new());

    // --- Channels ---
    let (feed_tx, feed_rx) = mpsc::channel(CHANNEL_CAPACITY);

    // --- Spawn tasks ---

    // Price feed. The handle must outlive the feed: dropping it stops the task.
    let (feed, feed_handle) = PriceFeed::new(
        cfg.rtds_url.clone(),
        cfg.price_symbol.clone(),
        feed_tx,
        Arc::clone(&latency),
        Arc::clone(&health),
    );
    feed_handle
        .subscribe(Subscription::price(&cfg.price_topic, &cfg.price_symbol))
        .await?;
    tokio::spawn(async move { feed.run().await });

    // Tracker engine
    let catalog = Arc::new(GammaCatalog::new(
        cfg.gamma_api_url.clone(),
        cfg.slug_prefix.clone(),
        cfg.lookback_slots,
    )?);
    let (runtime, tracker) = TrackerRuntime::new(
        catalog,
        feed_rx,
        RuntimeOptions::from_config(&cfg),
        Arc::clone(&health),
        system_clock(),
    );
    tokio::spawn(async move { runtime.run().await });

    // Engine notice logger
    let notices = tracker.notices();
    tokio::spawn(async move { notice_logger(notices).await });

    // HTTP API server
    let api_state = ApiState {
        tracker: tracker.clone(),
        health,
        latency,
    };
    let app = router(api_state);
    let bind_addr = format!("0.0.0.0:{}", cfg.api_port);
    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    info!("HTTP API listening on {bind_addr}");

    let served = axum::serve(listener, app).await;
    tracker.shutdown().await;
    drop(feed_handle);
    served?;

    Ok(())
}

/// Logs engine notices: countdown transitions and catalog failures.
async fn notice_logger(mut rx: broadcast::Receiver<EngineNotice>) {
    loop {
        match rx.recv().await {
            Ok(EngineNotice::Countdown(tick)) if tick.expired => {
                info!(slug = %tick.slug, "COUNTDOWN EXPIRED | {}", tick.display);
            }
            Ok(EngineNotice::Countdown(tick)) if tick.remaining_secs % 60 == 0 => {
                info!(slug = %tick.slug, remaining_secs = tick.remaining_secs, "COUNTDOWN | {}", tick.display);
            }
            Ok(EngineNotice::CatalogFailed(text)) => warn!("Catalog: {text}"),
            Ok(notice) => debug!(?notice, "engine notice"),
            Err(broadcast::error::RecvError::Lagged(n)) => {
                warn!("Notice logger lagged, skipped {n} notices");
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}
