use axum::{http::StatusCode, response::IntoResponse};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("Channel send error: {0}")]
    ChannelSend(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Catalog error: {0}")]
    Catalog(#[from] CatalogError),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, AppError>;

impl IntoResponse for AppError {
    fn into_response(self) -> axum::response::Response {
        let status = match &self {
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        (status, self.to_string()).into_response()
    }
}

/// Failure of a catalog refresh. The engine keeps serving its last good list.
#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("catalog request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("catalog returned HTTP {status} for {slug}")]
    Status { slug: String, status: u16 },

    #[error("catalog response could not be parsed: {0}")]
    Parse(String),

    /// The refresh task ended without producing a result.
    #[error("catalog refresh task ended unexpectedly")]
    Interrupted,

    /// The fetch succeeded but yielded no descriptors.
    #[error("catalog returned no events")]
    Empty,
}

impl CatalogError {
    /// Short text for the presentation layer.
    pub fn user_message(&self) -> String {
        match self {
            CatalogError::Http(e) if e.is_timeout() => "Event list request timed out".to_string(),
            CatalogError::Http(_) => "Could not reach the event catalog".to_string(),
            CatalogError::Status { status, .. } => format!("Event catalog unavailable (HTTP {status})"),
            CatalogError::Parse(_) => "Event catalog sent an unreadable response".to_string(),
            CatalogError::Interrupted => "Event list refresh failed".to_string(),
            CatalogError::Empty => "No events available yet".to_string(),
        }
    }
}

/// Transport-level feed failure; surfaced as connection status, never fatal.
#[derive(Debug, Error)]
pub enum FeedError {
    #[error("connect failed: {0}")]
    Connect(tokio_tungstenite::tungstenite::Error),

    #[error("connection closed by server")]
    Closed,

    #[error("protocol error: {0}")]
    Protocol(#[from] tokio_tungstenite::tungstenite::Error),
}

impl FeedError {
    pub fn user_message(&self) -> String {
        match self {
            FeedError::Connect(_) => "Price feed unreachable, reconnecting".to_string(),
            FeedError::Closed => "Price feed closed, reconnecting".to_string(),
            FeedError::Protocol(_) => "Price feed interrupted, reconnecting".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_catalog_message_differs_from_payload() {
        let e = CatalogError::Empty;
        assert_eq!(e.user_message(), "No events available yet");
        assert_eq!(e.to_string(), "catalog returned no events");
    }

    #[test]
    fn status_message_mentions_code() {
        let e = CatalogError::Status { slug: "btc-updown-15m-0".to_string(), status: 503 };
        assert!(e.user_message().contains("503"));
        assert!(!e.user_message().contains("btc-updown"));
    }

    #[test]
    fn not_found_maps_to_404() {
        let resp = AppError::NotFound("x".to_string()).into_response();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }
}
