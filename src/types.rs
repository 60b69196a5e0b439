use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};

// ---------------------------------------------------------------------------
// Events
// ---------------------------------------------------------------------------

/// One fixed-duration prediction-market event as delivered by the catalog.
/// Times are Unix epoch milliseconds; `start_time_ms < end_time_ms`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventDescriptor {
    pub slug: String,
    pub title: String,
    pub start_time_ms: i64,
    pub end_time_ms: i64,
    pub condition_id: Option<String>,
    pub question_id: Option<String>,
    pub clob_token_ids: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventStatus {
    Upcoming,
    Active,
    Expired,
}

impl EventStatus {
    /// Pure function of the slot bounds and the evaluation instant.
    pub fn derive(start_time_ms: i64, end_time_ms: i64, now_ms: i64) -> Self {
        if now_ms < start_time_ms {
            EventStatus::Upcoming
        } else if now_ms < end_time_ms {
            EventStatus::Active
        } else {
            EventStatus::Expired
        }
    }
}

impl std::fmt::Display for EventStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            EventStatus::Upcoming => "upcoming",
            EventStatus::Active => "active",
            EventStatus::Expired => "expired",
        };
        write!(f, "{s}")
    }
}

/// Descriptor paired with the status derived at one evaluation instant.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TrackedEvent {
    #[serde(flatten)]
    pub descriptor: EventDescriptor,
    pub status: EventStatus,
}

impl TrackedEvent {
    pub fn slug(&self) -> &str {
        &self.descriptor.slug
    }
}

// ---------------------------------------------------------------------------
// Feed events
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PriceSource {
    Chainlink,
    Binance,
}

impl PriceSource {
    pub fn from_topic(topic: &str) -> Option<Self> {
        match topic {
            crate::config::topics::CHAINLINK => Some(PriceSource::Chainlink),
            crate::config::topics::BINANCE => Some(PriceSource::Binance),
            _ => None,
        }
    }
}

impl std::fmt::Display for PriceSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PriceSource::Chainlink => write!(f, "chainlink"),
            PriceSource::Binance => write!(f, "binance"),
        }
    }
}

/// One price update. `timestamp_ms` is the source's own timestamp and may
/// arrive out of order; the receiver treats arrival order as authoritative.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PriceTick {
    pub value: f64,
    pub timestamp_ms: i64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ConnectionState {
    pub connected: bool,
    pub source: Option<PriceSource>,
    /// Human-readable; never the raw transport error.
    pub error: Option<String>,
}

/// Everything the feed adapter pushes into the engine.
#[derive(Debug, Clone)]
pub enum FeedEvent {
    Tick(PriceTick),
    Connection(ConnectionState),
}

/// Presentation view of the feed connection. Replaced wholesale on every
/// transport notification.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ConnectionStatus {
    pub connected: bool,
    pub source: Option<PriceSource>,
    pub last_update_ms: Option<i64>,
    pub error: Option<String>,
}

pub fn now_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as i64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_boundaries_are_half_open() {
        assert_eq!(EventStatus::derive(1_000, 2_000, 999), EventStatus::Upcoming);
        assert_eq!(EventStatus::derive(1_000, 2_000, 1_000), EventStatus::Active);
        assert_eq!(EventStatus::derive(1_000, 2_000, 1_999), EventStatus::Active);
        assert_eq!(EventStatus::derive(1_000, 2_000, 2_000), EventStatus::Expired);
    }

    #[test]
    fn source_from_topic() {
        assert_eq!(PriceSource::from_topic("crypto_prices_chainlink"), Some(PriceSource::Chainlink));
        assert_eq!(PriceSource::from_topic("crypto_prices"), Some(PriceSource::Binance));
        assert_eq!(PriceSource::from_topic("comments"), None);
    }
}
