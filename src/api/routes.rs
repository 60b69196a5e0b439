use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use serde::Serialize;

use crate::api::health::HealthState;
use crate::api::latency::LatencyStats;
use crate::engine::countdown::CountdownTick;
use crate::engine::{EventView, TrackerHandle};
use crate::error::AppError;
use crate::types::{now_ms, ConnectionStatus};

#[derive(Clone)]
pub struct ApiState {
    pub tracker: TrackerHandle,
    pub health: Arc<HealthState>,
    pub latency: Arc<LatencyStats>,
}

pub fn router(state: ApiState) -> Router {
    Router::new()
        .route("/events", get(get_events))
        .route("/events/current", get(get_current_event))
        .route("/events/:slug/prices", get(get_event_prices))
        .route("/price", get(get_price))
        .route("/health", get(get_health))
        .route("/stats/latency", get(get_stats_latency))
        .route("/refresh", post(post_refresh))
        .with_state(state)
}

// ---------------------------------------------------------------------------
// Response types
// ---------------------------------------------------------------------------

#[derive(Serialize)]
pub struct EventsResponse {
    pub events: Vec<EventView>,
    pub current_index: Option<usize>,
    pub catalog_error: Option<String>,
    pub updated_at_ms: i64,
}

#[derive(Serialize)]
pub struct CurrentEventResponse {
    #[serde(flatten)]
    pub event: EventView,
    pub countdown: Option<CountdownTick>,
    /// Live price minus price to beat.
    pub diff: Option<f64>,
}

#[derive(Serialize)]
pub struct PricesResponse {
    pub slug: String,
    pub price_to_beat: Option<f64>,
    pub last_price: Option<f64>,
}

#[derive(Serialize)]
pub struct PriceResponse {
    pub price: Option<f64>,
    pub delta: Option<f64>,
    pub history_len: usize,
}

#[derive(Serialize)]
pub struct HealthResponse {
    pub connection: ConnectionStatus,
    /// Socket state as seen by the feed task itself.
    pub feed_socket_open: bool,
    pub last_tick_ms: Option<i64>,
    pub refreshes_ok: u64,
    pub refreshes_failed: u64,
    pub catalog_error: Option<String>,
    pub captured: CapturedCounts,
}

#[derive(Serialize)]
pub struct CapturedCounts {
    pub price_to_beat: usize,
    pub last_price: usize,
}

#[derive(Serialize)]
pub struct LatencyResponse {
    pub samples: u64,
    pub p50_ms: Option<f64>,
    pub p95_ms: Option<f64>,
    pub p99_ms: Option<f64>,
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

async fn get_events(State(state): State<ApiState>) -> Json<EventsResponse> {
    let now = now_ms();
    let snap = state.tracker.snapshot();
    Json(EventsResponse {
        events: snap.events_at(now, state.tracker.store()),
        current_index: snap.current_event_index(now),
        catalog_error: snap.catalog_error,
        updated_at_ms: snap.updated_at_ms,
    })
}

async fn get_current_event(
    State(state): State<ApiState>,
) -> Result<Json<CurrentEventResponse>, AppError> {
    current_event_at(&state, now_ms()).map(Json)
}

fn current_event_at(state: &ApiState, now: i64) -> Result<CurrentEventResponse, AppError> {
    let snap = state.tracker.snapshot();
    let index = snap
        .current_event_index(now)
        .ok_or_else(|| AppError::NotFound("no active event".to_string()))?;
    let event = snap.events_at(now, state.tracker.store()).swap_remove(index);

    let diff = match (snap.current_price, event.price_to_beat) {
        (Some(price), Some(target)) => Some(price - target),
        _ => None,
    };
    let countdown = snap.countdown.filter(|c| c.slug == event.descriptor.slug);
    Ok(CurrentEventResponse { event, countdown, diff })
}

async fn get_event_prices(
    State(state): State<ApiState>,
    Path(slug): Path<String>,
) -> Json<PricesResponse> {
    Json(PricesResponse {
        price_to_beat: state.tracker.price_to_beat(&slug),
        last_price: state.tracker.last_price(&slug),
        slug,
    })
}

async fn get_price(State(state): State<ApiState>) -> Json<PriceResponse> {
    let snap = state.tracker.snapshot();
    Json(PriceResponse {
        price: snap.current_price,
        delta: snap.price_delta,
        history_len: snap.history_len,
    })
}

async fn get_health(State(state): State<ApiState>) -> Json<HealthResponse> {
    let snap = state.tracker.snapshot();
    let (refreshes_ok, refreshes_failed) = state.health.refreshes();
    let (price_to_beat, last_price) = state.tracker.store().len();
    Json(HealthResponse {
        connection: snap.connection,
        feed_socket_open: state.health.feed_connected(),
        last_tick_ms: state.health.last_tick_ms(),
        refreshes_ok,
        refreshes_failed,
        catalog_error: snap.catalog_error,
        captured: CapturedCounts { price_to_beat, last_price },
    })
}

async fn get_stats_latency(State(state): State<ApiState>) -> Json<LatencyResponse> {
    let percentiles = state.latency.percentiles_ms();
    Json(LatencyResponse {
        samples: state.latency.len(),
        p50_ms: percentiles.map(|p| p.0),
        p95_ms: percentiles.map(|p| p.1),
        p99_ms: percentiles.map(|p| p.2),
    })
}

async fn post_refresh(State(state): State<ApiState>) -> Result<StatusCode, AppError> {
    state.tracker.request_refresh().await?;
    Ok(StatusCode::ACCEPTED)
}
