use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDateTime};
use futures_util::future::join_all;
use serde::Deserialize;
use tracing::{debug, info, warn};

use crate::catalog::EventCatalog;
use crate::config::{CATALOG_TIMEOUT_SECS, SLOT_DURATION_SECS};
use crate::error::CatalogError;
use crate::types::{now_ms, EventDescriptor};

/// Gamma REST catalog for rolling up/down series whose slugs end in the
/// slot's start timestamp, e.g. `btc-updown-15m-1760000400`.
pub struct GammaCatalog {
    client: reqwest::Client,
    base_url: String,
    slug_prefix: String,
    lookback_slots: usize,
}

impl GammaCatalog {
    pub fn new(
        base_url: String,
        slug_prefix: String,
        lookback_slots: usize,
    ) -> Result<Self, CatalogError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(CATALOG_TIMEOUT_SECS))
            .build()?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            slug_prefix,
            lookback_slots,
        })
    }

    /// Slot start timestamps (Unix seconds) to request for `count` events at `now_secs`.
    fn slot_starts(&self, now_secs: i64, count: usize) -> Vec<i64> {
        let first = slot_start(now_secs) - self.lookback_slots as i64 * SLOT_DURATION_SECS;
        (0..count as i64)
            .map(|i| first + i * SLOT_DURATION_SECS)
            .collect()
    }

    /// `Ok(None)` when the event does not exist (yet).
    async fn fetch_slot(&self, start_ts: i64) -> Result<Option<EventDescriptor>, CatalogError> {
        let slug = slot_slug(&self.slug_prefix, start_ts);
        let url = format!("{}/events/slug/{}", self.base_url, slug);

        let resp = self.client.get(&url).send().await?;
        let status = resp.status();
        if status == reqwest::StatusCode::NOT_FOUND {
            debug!(slug = %slug, "event not listed yet");
            return Ok(None);
        }
        if !status.is_success() {
            return Err(CatalogError::Status { slug, status: status.as_u16() });
        }

        let body = resp.text().await?;
        parse_event(&slug, start_ts, &body).map(Some)
    }
}

#[async_trait]
impl EventCatalog for GammaCatalog {
    async fn fetch_upcoming(&self, count: usize) -> Result<Vec<EventDescriptor>, CatalogError> {
        let starts = self.slot_starts(now_ms() / 1000, count);
        let results = join_all(starts.iter().map(|&ts| self.fetch_slot(ts))).await;

        let mut events = Vec::with_capacity(count);
        let mut first_err = None;
        let mut failures = 0usize;
        for result in results {
            match result {
                Ok(Some(event)) => events.push(event),
                Ok(None) => {}
                Err(e) => {
                    failures += 1;
                    warn!(error = %e, "catalog slot fetch failed: {e}");
                    first_err.get_or_insert(e);
                }
            }
        }

        // Only a total failure is an error; missing slots make a partial list.
        if events.is_empty() {
            if let Some(e) = first_err {
                return Err(e);
            }
        }

        info!(
            requested = count,
            fetched = events.len(),
            failed = failures,
            "Catalog fetch: {}/{} events ({} failed)",
            events.len(),
            count,
            failures,
        );
        Ok(events)
    }
}

// ---------------------------------------------------------------------------
// Gamma response shapes
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum TokenIds {
    /// Gamma sends the list as a JSON-encoded string.
    Encoded(String),
    List(Vec<String>),
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GammaMarket {
    condition_id: Option<String>,
    #[serde(rename = "questionID")]
    question_id: Option<String>,
    clob_token_ids: Option<TokenIds>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GammaEvent {
    slug: Option<String>,
    title: Option<String>,
    end_date: Option<String>,
    #[serde(default)]
    markets: Vec<GammaMarket>,
}

/// Parse a Gamma `/events/slug/{slug}` body into a descriptor for the slot
/// starting at `start_ts` (Unix seconds).
pub fn parse_event(slug: &str, start_ts: i64, body: &str) -> Result<EventDescriptor, CatalogError> {
    let event: GammaEvent =
        serde_json::from_str(body).map_err(|e| CatalogError::Parse(format!("{slug}: {e}")))?;

    if let Some(s) = event.slug.as_deref() {
        if s != slug {
            return Err(CatalogError::Parse(format!("asked for {slug}, got {s}")));
        }
    }

    let start_time_ms = start_ts * 1000;
    let end_time_ms = event
        .end_date
        .as_deref()
        .and_then(parse_iso_to_unix_secs)
        .map(|secs| secs * 1000)
        .filter(|&end| end > start_time_ms)
        .unwrap_or(start_time_ms + SLOT_DURATION_SECS * 1000);

    let market = event.markets.into_iter().next();
    let (condition_id, question_id, clob_token_ids) = match market {
        Some(m) => {
            let ids = match m.clob_token_ids {
                Some(TokenIds::Encoded(s)) => serde_json::from_str::<Vec<String>>(&s)
                    .map_err(|e| CatalogError::Parse(format!("{slug} clobTokenIds: {e}")))?,
                Some(TokenIds::List(v)) => v,
                None => Vec::new(),
            };
            (m.condition_id, m.question_id, ids)
        }
        None => (None, None, Vec::new()),
    };

    Ok(EventDescriptor {
        slug: slug.to_string(),
        title: event.title.unwrap_or_else(|| slug.to_string()),
        start_time_ms,
        end_time_ms,
        condition_id,
        question_id,
        clob_token_ids,
    })
}

/// Start (Unix seconds) of the slot containing `now_secs`.
pub fn slot_start(now_secs: i64) -> i64 {
    now_secs.div_euclid(SLOT_DURATION_SECS) * SLOT_DURATION_SECS
}

pub fn slot_slug(prefix: &str, start_ts: i64) -> String {
    format!("{prefix}-{start_ts}")
}

/// Parse an RFC 3339 UTC timestamp to Unix seconds. A missing offset is
/// read as UTC.
pub fn parse_iso_to_unix_secs(s: &str) -> Option<i64> {
    let s = s.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.timestamp());
    }
    NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.f")
        .ok()
        .map(|naive| naive.and_utc().timestamp())
}

#[cfg(test)]
mod tests {
    use super::*;

    const BODY: &str = r#"{
        "id": "12345",
        "slug": "btc-updown-15m-1760000400",
        "title": "Bitcoin Up or Down - October 9, 5:00AM-5:15AM ET",
        "endDate": "2025-10-09T09:15:00Z",
        "markets": [{
            "conditionId": "0xabc",
            "questionID": "0xdef",
            "clobTokenIds": "[\"111\", \"222\"]"
        }]
    }"#;

    #[test]
    fn slot_start_floors_to_quarter_hour() {
        assert_eq!(slot_start(1_760_000_400), 1_760_000_400);
        assert_eq!(slot_start(1_760_000_400 + 899), 1_760_000_400);
        assert_eq!(slot_start(1_760_000_400 + 900), 1_760_001_300);
    }

    #[test]
    fn slug_appends_start_ts() {
        let slug = slot_slug("btc-updown-15m", 1_760_000_400);
        assert_eq!(slug, "btc-updown-15m-1760000400");
    }

    #[test]
    fn parses_event_body() {
        let d = parse_event("btc-updown-15m-1760000400", 1_760_000_400, BODY).unwrap();
        assert_eq!(d.title, "Bitcoin Up or Down - October 9, 5:00AM-5:15AM ET");
        assert_eq!(d.start_time_ms, 1_760_000_400_000);
        assert_eq!(d.end_time_ms, 1_760_001_300_000);
        assert_eq!(d.condition_id.as_deref(), Some("0xabc"));
        assert_eq!(d.question_id.as_deref(), Some("0xdef"));
        assert_eq!(d.clob_token_ids, vec!["111".to_string(), "222".to_string()]);
    }

    #[test]
    fn missing_end_date_uses_slot_length() {
        let body = r#"{"slug":"s-100","title":"t","markets":[]}"#;
        let d = parse_event("s-100", 100, body).unwrap();
        assert_eq!(d.end_time_ms, (100 + SLOT_DURATION_SECS) * 1000);
        assert!(d.clob_token_ids.is_empty());
        assert!(d.condition_id.is_none());
    }

    #[test]
    fn end_date_before_start_is_ignored() {
        let body = r#"{"slug":"s-1760000400","endDate":"2020-01-01T00:00:00Z"}"#;
        let d = parse_event("s-1760000400", 1_760_000_400, body).unwrap();
        assert_eq!(d.end_time_ms - d.start_time_ms, SLOT_DURATION_SECS * 1000);
        assert_eq!(d.title, "s-1760000400");
    }

    #[test]
    fn token_ids_accept_plain_array() {
        let body = r#"{"markets":[{"clobTokenIds":["a","b"]}]}"#;
        let d = parse_event("s-0", 0, body).unwrap();
        assert_eq!(d.clob_token_ids, vec!["a".to_string(), "b".to_string()]);
    }

    #[test]
    fn malformed_body_is_parse_error() {
        assert!(matches!(parse_event("s-0", 0, "<html>"), Err(CatalogError::Parse(_))));
        let wrong = r#"{"slug":"other-0"}"#;
        assert!(matches!(parse_event("s-0", 0, wrong), Err(CatalogError::Parse(_))));
    }

    #[test]
    fn iso_parse_handles_fraction_and_offset() {
        assert_eq!(parse_iso_to_unix_secs("1970-01-01T00:00:00Z"), Some(0));
        assert_eq!(parse_iso_to_unix_secs("2025-10-09T09:15:00.000Z"), Some(1_760_001_300));
        assert_eq!(parse_iso_to_unix_secs("2025-10-09T09:15:00+00:00"), Some(1_760_001_300));
        assert_eq!(parse_iso_to_unix_secs("2025-10-09T09:15:00"), Some(1_760_001_300));
        assert_eq!(parse_iso_to_unix_secs("2025-10-09"), None);
    }

    #[test]
    fn non_ascii_dates_are_rejected_not_panicking() {
        assert_eq!(parse_iso_to_unix_secs("2025-10-09T09:1€:00"), None);
        assert_eq!(parse_iso_to_unix_secs("2025-10-09T09:15:00€"), None);

        let body = r#"{"slug":"s-1760000400","endDate":"2025-10-09T09:1€:00Z"}"#;
        let d = parse_event("s-1760000400", 1_760_000_400, body).unwrap();
        assert_eq!(d.end_time_ms - d.start_time_ms, SLOT_DURATION_SECS * 1000);
    }

    #[test]
    fn slot_starts_include_lookback() {
        let catalog = GammaCatalog::new("http://x/".to_string(), "p".to_string(), 1).unwrap();
        let starts = catalog.slot_starts(1_760_000_400 + 60, 3);
        assert_eq!(starts, vec![1_759_999_500, 1_760_000_400, 1_760_001_300]);
        assert_eq!(catalog.base_url, "http://x");
    }
}
