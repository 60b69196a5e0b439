use serde::Serialize;

use crate::types::{EventStatus, TrackedEvent};

/// One countdown render for the active event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CountdownTick {
    pub slug: String,
    pub remaining_secs: i64,
    /// `HH:MM:SS`
    pub display: String,
    /// Set on the single tick that reached zero.
    pub expired: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum State {
    Idle,
    Running { slug: String, end_time_ms: i64 },
}

/// What the owner must do after [`CountdownDriver::sync`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncAction {
    Unchanged,
    /// (Re)start the 1-second cadence for this slug.
    Start(String),
    /// Stop the cadence; nothing is active.
    Stop,
    /// The running event passed its end without a tick noticing; handle the
    /// expiry, then sync again.
    Expired(CountdownTick),
}

/// Idle/Running state machine tracking the active event's remaining time.
///
/// Expiry is reported once per slug: the driver drops to Idle and will not
/// re-arm on a slug it has already expired.
#[derive(Debug)]
pub struct CountdownDriver {
    state: State,
    last_expired: Option<String>,
}

impl Default for CountdownDriver {
    fn default() -> Self {
        Self::new()
    }
}

impl CountdownDriver {
    pub fn new() -> Self {
        Self {
            state: State::Idle,
            last_expired: None,
        }
    }

    pub fn is_running(&self) -> bool {
        matches!(self.state, State::Running { .. })
    }

    pub fn running_slug(&self) -> Option<&str> {
        match &self.state {
            State::Running { slug, .. } => Some(slug),
            State::Idle => None,
        }
    }

    /// Slug of the most recent expiry, if any.
    pub fn last_expired(&self) -> Option<&str> {
        self.last_expired.as_deref()
    }

    /// Reconcile with the event list's active entry at `now_ms`.
    pub fn sync(&mut self, active: Option<&TrackedEvent>, now_ms: i64) -> SyncAction {
        let active = active.filter(|e| e.status == EventStatus::Active);

        if let State::Running { slug, end_time_ms } = &self.state {
            if active.is_some_and(|e| e.slug() == slug) {
                return SyncAction::Unchanged;
            }
            if remaining_secs(*end_time_ms, now_ms) == 0 {
                let slug = slug.clone();
                return SyncAction::Expired(self.expire(slug));
            }
        }

        match active {
            Some(e) if self.last_expired.as_deref() != Some(e.slug()) => {
                self.state = State::Running {
                    slug: e.slug().to_string(),
                    end_time_ms: e.descriptor.end_time_ms,
                };
                SyncAction::Start(e.slug().to_string())
            }
            _ if self.is_running() => {
                self.state = State::Idle;
                SyncAction::Stop
            }
            _ => SyncAction::Unchanged,
        }
    }

    /// Compute the current countdown. Returns `None` while Idle.
    pub fn tick(&mut self, now_ms: i64) -> Option<CountdownTick> {
        let State::Running { slug, end_time_ms } = &self.state else {
            return None;
        };
        let remaining = remaining_secs(*end_time_ms, now_ms);
        if remaining == 0 {
            let slug = slug.clone();
            return Some(self.expire(slug));
        }
        Some(CountdownTick {
            slug: slug.clone(),
            remaining_secs: remaining,
            display: format_hms(remaining),
            expired: false,
        })
    }

    fn expire(&mut self, slug: String) -> CountdownTick {
        self.state = State::Idle;
        self.last_expired = Some(slug.clone());
        CountdownTick {
            slug,
            remaining_secs: 0,
            display: format_hms(0),
            expired: true,
        }
    }
}

/// Whole seconds left, floored and clamped at zero.
pub fn remaining_secs(end_time_ms: i64, now_ms: i64) -> i64 {
    ((end_time_ms - now_ms) / 1000).max(0)
}

pub fn format_hms(secs: i64) -> String {
    let secs = secs.max(0);
    format!("{:02}:{:02}:{:02}", secs / 3600, (secs / 60) % 60, secs % 60)
}
