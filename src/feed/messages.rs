use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::config::topics;
use crate::types::PriceTick;

static PARSE_FAILURES: AtomicU64 = AtomicU64::new(0);

/// One RTDS subscription, keyed by `(topic, type, filters)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Subscription {
    pub topic: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub filters: String,
}

impl Subscription {
    /// Subscription for a single symbol on a price topic.
    /// The Chainlink topic filters on a JSON object, the Binance topic on a bare symbol list.
    pub fn price(topic: &str, symbol: &str) -> Self {
        let filters = if topic == topics::CHAINLINK {
            serde_json::json!({ "symbol": symbol }).to_string()
        } else {
            symbol.to_string()
        };
        Self {
            topic: topic.to_string(),
            kind: "*".to_string(),
            filters,
        }
    }
}

#[derive(Debug, Deserialize)]
struct SnapshotPoint {
    timestamp: i64,
    value: f64,
}

#[derive(Debug, Deserialize)]
struct RawPayload {
    symbol: Option<String>,
    timestamp: Option<i64>,
    value: Option<f64>,
    /// Backfill sent right after subscribing.
    data: Option<Vec<SnapshotPoint>>,
}

/// Raw deserializable shape of an RTDS frame.
#[derive(Debug, Deserialize)]
struct RawFrame {
    topic: Option<String>,
    #[serde(rename = "type")]
    kind: Option<String>,
    timestamp: Option<i64>,
    payload: Option<RawPayload>,
}

/// Parse a raw RTDS text frame into ticks for `symbol` on `topic`.
///
/// Keepalive replies and frames for other topics or symbols yield nothing.
/// Snapshot frames carry a `data` array and produce one tick per point, oldest first.
pub fn parse_price_frame(raw: &str, topic: &str, symbol: &str) -> Vec<PriceTick> {
    let trimmed = raw.trim();
    if trimmed.is_empty() || !trimmed.starts_with('{') {
        return vec![];
    }

    let frame: RawFrame = match serde_json::from_str(trimmed) {
        Ok(f) => f,
        Err(_) => {
            let count = PARSE_FAILURES.fetch_add(1, Ordering::Relaxed) + 1;
            if count <= 10 || count % 1000 == 0 {
                let sample: String = trimmed.chars().take(200).collect();
                warn!(count, "[FEED PARSE] unrecognized frame: {sample}");
            }
            return vec![];
        }
    };

    if frame.topic.as_deref() != Some(topic) {
        return vec![];
    }
    let Some(payload) = frame.payload else {
        return vec![];
    };
    let symbol_matches = payload
        .symbol
        .as_deref()
        .is_some_and(|s| s.eq_ignore_ascii_case(symbol));
    if !symbol_matches {
        return vec![];
    }

    if let Some(mut points) = payload.data {
        points.sort_by_key(|p| p.timestamp);
        return points
            .into_iter()
            .filter(|p| p.value.is_finite())
            .map(|p| PriceTick { value: p.value, timestamp_ms: p.timestamp })
            .collect();
    }

    if frame.kind.as_deref().is_some_and(|k| k != "update") {
        return vec![];
    }
    match payload.value {
        Some(value) if value.is_finite() => {
            let timestamp_ms = payload.timestamp.or(frame.timestamp).unwrap_or(0);
            vec![PriceTick { value, timestamp_ms }]
        }
        _ => vec![],
    }
}

pub fn build_subscribe_msg(subs: &[Subscription]) -> String {
    serde_json::json!({
        "action": "subscribe",
        "subscriptions": subs,
    })
    .to_string()
}

pub fn build_unsubscribe_msg(subs: &[Subscription]) -> String {
    serde_json::json!({
        "action": "unsubscribe",
        "subscriptions": subs,
    })
    .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    const TOPIC: &str = "crypto_prices_chainlink";

    #[test]
    fn parses_update_frame() {
        let raw = r#"{"topic":"crypto_prices_chainlink","type":"update","timestamp":1753314064237,"payload":{"symbol":"btc/usd","timestamp":1753314064213,"value":67234.5}}"#;
        let ticks = parse_price_frame(raw, TOPIC, "btc/usd");
        assert_eq!(ticks, vec![PriceTick { value: 67234.5, timestamp_ms: 1753314064213 }]);
    }

    #[test]
    fn ignores_other_symbols_and_topics() {
        let eth = r#"{"topic":"crypto_prices_chainlink","type":"update","payload":{"symbol":"eth/usd","timestamp":1,"value":3000.0}}"#;
        assert!(parse_price_frame(eth, TOPIC, "btc/usd").is_empty());

        let other = r#"{"topic":"comments","type":"update","payload":{"symbol":"btc/usd","timestamp":1,"value":1.0}}"#;
        assert!(parse_price_frame(other, TOPIC, "btc/usd").is_empty());
    }

    #[test]
    fn ignores_keepalive_and_garbage() {
        assert!(parse_price_frame("PONG", TOPIC, "btc/usd").is_empty());
        assert!(parse_price_frame("", TOPIC, "btc/usd").is_empty());
        assert!(parse_price_frame("{not json", TOPIC, "btc/usd").is_empty());
    }

    #[test]
    fn unparseable_non_ascii_frame_is_dropped() {
        // Multibyte character straddling the log sample cut.
        let raw = format!("{{{}€ garbage", "a".repeat(198));
        assert!(parse_price_frame(&raw, TOPIC, "btc/usd").is_empty());
        assert!(parse_price_frame("{\"topic\":\"é", TOPIC, "btc/usd").is_empty());
    }

    #[test]
    fn snapshot_frame_yields_points_oldest_first() {
        let raw = r#"{"topic":"crypto_prices_chainlink","type":"subscribe","payload":{"symbol":"btc/usd","data":[{"timestamp":20,"value":2.0},{"timestamp":10,"value":1.0}]}}"#;
        let ticks = parse_price_frame(raw, TOPIC, "btc/usd");
        assert_eq!(ticks.len(), 2);
        assert_eq!(ticks[0].timestamp_ms, 10);
        assert_eq!(ticks[1].value, 2.0);
    }

    #[test]
    fn falls_back_to_frame_timestamp() {
        let raw = r#"{"topic":"crypto_prices_chainlink","type":"update","timestamp":55,"payload":{"symbol":"BTC/USD","value":1.5}}"#;
        let ticks = parse_price_frame(raw, TOPIC, "btc/usd");
        assert_eq!(ticks, vec![PriceTick { value: 1.5, timestamp_ms: 55 }]);
    }

    #[test]
    fn chainlink_filter_is_json_object() {
        let sub = Subscription::price(TOPIC, "btc/usd");
        assert_eq!(sub.filters, r#"{"symbol":"btc/usd"}"#);
        let msg = build_subscribe_msg(&[sub]);
        let v: serde_json::Value = serde_json::from_str(&msg).unwrap();
        assert_eq!(v["action"], "subscribe");
        assert_eq!(v["subscriptions"][0]["topic"], TOPIC);
        assert_eq!(v["subscriptions"][0]["type"], "*");
    }

    #[test]
    fn binance_filter_is_bare_symbol() {
        let sub = Subscription::price("crypto_prices", "btcusdt");
        assert_eq!(sub.filters, "btcusdt");
        let msg = build_unsubscribe_msg(&[sub]);
        assert!(msg.contains(r#""action":"unsubscribe""#));
    }
}
