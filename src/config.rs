use crate::error::{AppError, Result};

pub const RTDS_URL: &str = "wss://ws-live-data.polymarket.com";
pub const GAMMA_API_URL: &str = "https://gamma-api.polymarket.com";

/// Every tracked event covers one slot of this length.
pub const SLOT_DURATION_SECS: i64 = 900;

/// Countdown cadence while an event is active.
pub const COUNTDOWN_TICK_MS: u64 = 1000;

/// Keepalive interval for the RTDS socket (seconds). The server drops idle
/// connections after roughly ten seconds without a text PING.
pub const WS_PING_INTERVAL_SECS: u64 = 5;

/// Reconnect backoff values in milliseconds.
pub const RECONNECT_BACKOFF_MS: &[u64] = &[100, 200, 400, 800, 1600, 3200];

/// Channel capacity for internal message routing.
pub const CHANNEL_CAPACITY: usize = 1024;

/// Per-request timeout for Gamma catalog calls (seconds).
pub const CATALOG_TIMEOUT_SECS: u64 = 15;

/// Capacity of the presentation notice broadcast.
pub const NOTICE_CAPACITY: usize = 256;

pub mod topics {
    /// Chainlink-sourced prices; the oracle the 15m markets resolve against.
    pub const CHAINLINK: &str = "crypto_prices_chainlink";
    /// Binance-sourced prices.
    pub const BINANCE: &str = "crypto_prices";
}

#[derive(Debug, Clone)]
pub struct Config {
    pub rtds_url: String,
    pub gamma_api_url: String,
    pub log_level: String,
    pub api_port: u16,
    /// RTDS topic to subscribe to (PRICE_TOPIC)
    pub price_topic: String,
    /// Symbol filter inside the topic (PRICE_SYMBOL), e.g. "btc/usd"
    pub price_symbol: String,
    /// Event slug prefix (SLUG_PREFIX); slot start timestamp is appended.
    pub slug_prefix: String,
    /// Slots requested per catalog refresh (EVENT_COUNT)
    pub event_count: usize,
    /// Already-started slots to include before the current one (LOOKBACK_SLOTS)
    pub lookback_slots: usize,
    /// Seconds between scheduled catalog refreshes (AUTO_REFRESH_SECS)
    pub auto_refresh_secs: u64,
    /// Ticks retained for the delta display (HISTORY_CAPACITY)
    pub history_capacity: usize,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            rtds_url: std::env::var("RTDS_URL").unwrap_or_else(|_| RTDS_URL.to_string()),
            gamma_api_url: std::env::var("GAMMA_API_URL")
                .unwrap_or_else(|_| GAMMA_API_URL.to_string()),
            log_level: std::env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
            api_port: std::env::var("API_PORT")
                .unwrap_or_else(|_| "3000".to_string())
                .parse::<u16>()
                .map_err(|_| AppError::Config("API_PORT must be a valid port number".to_string()))?,
            price_topic: std::env::var("PRICE_TOPIC")
                .unwrap_or_else(|_| topics::CHAINLINK.to_string()),
            price_symbol: std::env::var("PRICE_SYMBOL")
                .unwrap_or_else(|_| "btc/usd".to_string())
                .to_lowercase(),
            slug_prefix: std::env::var("SLUG_PREFIX")
                .unwrap_or_else(|_| "btc-updown-15m".to_string()),
            event_count: std::env::var("EVENT_COUNT")
                .unwrap_or_else(|_| "10".to_string())
                .parse::<usize>()
                .unwrap_or(10)
                .max(1),
            lookback_slots: std::env::var("LOOKBACK_SLOTS")
                .unwrap_or_else(|_| "1".to_string())
                .parse::<usize>()
                .unwrap_or(1),
            auto_refresh_secs: std::env::var("AUTO_REFRESH_SECS")
                .unwrap_or_else(|_| "60".to_string())
                .parse::<u64>()
                .unwrap_or(60)
                .max(1),
            history_capacity: std::env::var("HISTORY_CAPACITY")
                .unwrap_or_else(|_| "100".to_string())
                .parse::<usize>()
                .unwrap_or(100)
                .max(1),
        })
    }
}
