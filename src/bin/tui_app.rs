use serde::Deserialize;

// ---------------------------------------------------------------------------
// API response types (mirror routes.rs shapes)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize, Default)]
pub struct EventsResponse {
    pub events: Vec<EventRow>,
    pub current_index: Option<usize>,
    pub catalog_error: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct EventRow {
    pub slug: String,
    pub title: String,
    pub start_time_ms: i64,
    pub end_time_ms: i64,
    pub status: String,
    pub price_to_beat: Option<f64>,
    pub last_price: Option<f64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Countdown {
    pub remaining_secs: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CurrentEventResponse {
    pub slug: String,
    pub title: String,
    pub price_to_beat: Option<f64>,
    pub countdown: Option<Countdown>,
    pub diff: Option<f64>,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct PriceResponse {
    pub price: Option<f64>,
    pub delta: Option<f64>,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct FeedConnection {
    pub connected: bool,
    pub source: Option<String>,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct HealthResponse {
    pub connection: FeedConnection,
    pub refreshes_failed: u64,
}

// ---------------------------------------------------------------------------
// App state
// ---------------------------------------------------------------------------

/// Reachability of the tracker API itself, not the price feed.
#[derive(Debug, Clone, PartialEq)]
pub enum ApiStatus {
    Connected,
    Error(String),
    Connecting,
}

#[derive(Debug, Clone)]
pub struct AppState {
    pub status: ApiStatus,
    pub events: EventsResponse,
    pub current: Option<CurrentEventResponse>,
    pub price: PriceResponse,
    pub health: HealthResponse,
    pub base_url: String,
}

impl AppState {
    pub fn new(base_url: String) -> Self {
        Self {
            status: ApiStatus::Connecting,
            events: EventsResponse::default(),
            current: None,
            price: PriceResponse::default(),
            health: HealthResponse::default(),
            base_url,
        }
    }

    pub async fn refresh(&mut self, client: &reqwest::Client) {
        let events_url = format!("{}/events", self.base_url);
        let current_url = format!("{}/events/current", self.base_url);
        let price_url = format!("{}/price", self.base_url);
        let health_url = format!("{}/health", self.base_url);

        let (events_res, current_res, price_res, health_res) = tokio::join!(
            client.get(&events_url).send(),
            client.get(&current_url).send(),
            client.get(&price_url).send(),
            client.get(&health_url).send(),
        );

        let events_resp = match events_res {
            Ok(r) => r,
            Err(e) => {
                self.status = ApiStatus::Error(format!("{e}"));
                return;
            }
        };
        match events_resp.json::<EventsResponse>().await {
            Ok(events) => {
                self.events = events;
                self.status = ApiStatus::Connected;
            }
            Err(e) => {
                self.status = ApiStatus::Error(format!("parse error: {e}"));
                return;
            }
        }

        // 404 means no active event.
        self.current = match current_res {
            Ok(r) if r.status().is_success() => r.json::<CurrentEventResponse>().await.ok(),
            _ => None,
        };
        if let Ok(r) = price_res {
            if let Ok(price) = r.json::<PriceResponse>().await {
                self.price = price;
            }
        }
        if let Ok(r) = health_res {
            if let Ok(health) = r.json::<HealthResponse>().await {
                self.health = health;
            }
        }
    }

    /// Ask the tracker for an immediate catalog refresh, then re-poll.
    pub async fn force_refresh(&mut self, client: &reqwest::Client) {
        let url = format!("{}/refresh", self.base_url);
        if let Err(e) = client.post(&url).send().await {
            self.status = ApiStatus::Error(format!("{e}"));
            return;
        }
        self.refresh(client).await;
    }
}

// ---------------------------------------------------------------------------
// Formatting helpers
// ---------------------------------------------------------------------------

/// `HH:MM:SS`, clamped at zero.
pub fn format_countdown(secs: i64) -> String {
    let secs = secs.max(0);
    format!("{:02}:{:02}:{:02}", secs / 3600, (secs / 60) % 60, secs % 60)
}

/// Dollar amount with thousands separators, or a dash when not captured.
pub fn format_price(v: Option<f64>) -> String {
    let Some(v) = v else {
        return "—".to_string();
    };
    let cents = (v.abs() * 100.0).round() as u64;
    let whole = (cents / 100).to_string();
    let mut grouped = String::with_capacity(whole.len() + whole.len() / 3);
    for (i, c) in whole.chars().enumerate() {
        if i > 0 && (whole.len() - i) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(c);
    }
    let sign = if v < 0.0 && cents > 0 { "-" } else { "" };
    format!("{sign}${grouped}.{:02}", cents % 100)
}

/// Signed change with an arrow; flat and unknown render without one.
pub fn format_delta(v: Option<f64>) -> String {
    match v {
        Some(d) if d > 0.0 => format!("▲ +{d:.2}"),
        Some(d) if d < 0.0 => format!("▼ {d:.2}"),
        Some(_) => "0.00".to_string(),
        None => "—".to_string(),
    }
}

/// Convert millisecond epoch timestamp to UTC HH:MM.
pub fn format_time_ms(ms: i64) -> String {
    let secs = ms.div_euclid(1000);
    let h = secs.div_euclid(3600).rem_euclid(24);
    let m = secs.div_euclid(60).rem_euclid(60);
    format!("{h:02}:{m:02}")
}

pub fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let head: String = s.chars().take(max.saturating_sub(1)).collect();
        format!("{head}…")
    }
}
