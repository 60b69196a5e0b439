use std::collections::HashSet;
use std::sync::Arc;

use tracing::{info, warn};

use crate::catalog::EventCatalog;
use crate::error::CatalogError;
use crate::types::{EventDescriptor, EventStatus, TrackedEvent};

/// Holds the last good ordered event list and derives statuses on demand.
///
/// Statuses are never cached: every read evaluates them against the caller's
/// clock, so readers between refreshes still see time-consistent values.
pub struct LifecycleEngine<C> {
    catalog: Arc<C>,
    events: Vec<EventDescriptor>,
}

impl<C: EventCatalog> LifecycleEngine<C> {
    pub fn new(catalog: Arc<C>) -> Self {
        Self {
            catalog,
            events: Vec::new(),
        }
    }

    pub fn catalog(&self) -> Arc<C> {
        Arc::clone(&self.catalog)
    }

    /// Install the result of a catalog call. Failures and empty results keep
    /// the previous list in place.
    pub fn apply_fetch(
        &mut self,
        fetched: Result<Vec<EventDescriptor>, CatalogError>,
        now_ms: i64,
    ) -> Result<Vec<TrackedEvent>, CatalogError> {
        let descriptors = fetched?;
        let ordered = normalize(descriptors);
        if ordered.is_empty() {
            return Err(CatalogError::Empty);
        }

        let previous: HashSet<&str> = self.events.iter().map(|e| e.slug.as_str()).collect();
        let kept = ordered.iter().filter(|e| previous.contains(e.slug.as_str())).count();
        info!(
            total = ordered.len(),
            kept,
            added = ordered.len() - kept,
            "Event list refreshed: {} events ({kept} carried over)",
            ordered.len(),
        );

        self.events = ordered;
        Ok(self.events(now_ms))
    }

    pub fn descriptors(&self) -> &[EventDescriptor] {
        &self.events
    }

    pub fn events(&self, now_ms: i64) -> Vec<TrackedEvent> {
        derive_events(&self.events, now_ms)
    }
}

/// Pair each descriptor with its status at `now_ms`.
pub fn derive_events(descriptors: &[EventDescriptor], now_ms: i64) -> Vec<TrackedEvent> {
    descriptors
        .iter()
        .map(|d| TrackedEvent {
            status: EventStatus::derive(d.start_time_ms, d.end_time_ms, now_ms),
            descriptor: d.clone(),
        })
        .collect()
}

/// Order by start time, drop duplicates (by slug), inverted intervals and
/// anything overlapping an earlier slot. The result has non-overlapping,
/// strictly increasing slots, so at most one can be active at any instant.
fn normalize(mut descriptors: Vec<EventDescriptor>) -> Vec<EventDescriptor> {
    descriptors.sort_by(|a, b| a.start_time_ms.cmp(&b.start_time_ms).then_with(|| a.slug.cmp(&b.slug)));

    let mut seen = HashSet::new();
    let mut out: Vec<EventDescriptor> = Vec::with_capacity(descriptors.len());
    for d in descriptors {
        if d.start_time_ms >= d.end_time_ms {
            warn!(slug = %d.slug, "dropping event with empty interval");
            continue;
        }
        if !seen.insert(d.slug.clone()) {
            continue;
        }
        if let Some(prev) = out.last() {
            if d.start_time_ms < prev.end_time_ms {
                warn!(slug = %d.slug, overlaps = %prev.slug, "dropping overlapping event");
                continue;
            }
        }
        out.push(d);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::testing::{descriptor, slots, ScriptedCatalog, MINUTE_MS};

    async fn refresh(
        engine: &mut LifecycleEngine<ScriptedCatalog>,
        now_ms: i64,
    ) -> Result<Vec<TrackedEvent>, CatalogError> {
        let fetched = engine.catalog().fetch_upcoming(10).await;
        engine.apply_fetch(fetched, now_ms)
    }

    fn active_index(engine: &LifecycleEngine<ScriptedCatalog>, now_ms: i64) -> Option<usize> {
        engine.events(now_ms).iter().position(|e| e.status == EventStatus::Active)
    }

    #[tokio::test]
    async fn minute_seven_has_first_slot_active() {
        let catalog = Arc::new(ScriptedCatalog::new(vec![Ok(slots(0, 10))]));
        let mut engine = LifecycleEngine::new(catalog);

        let events = refresh(&mut engine, 7 * MINUTE_MS).await.unwrap();
        assert_eq!(events.len(), 10);
        assert_eq!(events[0].status, EventStatus::Active);
        assert!(events[1..].iter().all(|e| e.status == EventStatus::Upcoming));
        assert_eq!(active_index(&engine, 7 * MINUTE_MS), Some(0));
    }

    #[tokio::test]
    async fn failed_refresh_keeps_previous_list() {
        let catalog = Arc::new(ScriptedCatalog::new(vec![
            Ok(slots(0, 3)),
            Err(CatalogError::Parse("boom".to_string())),
            Ok(vec![]),
        ]));
        let mut engine = LifecycleEngine::new(catalog);
        let before = refresh(&mut engine, 0).await.unwrap();

        let err = refresh(&mut engine, 0).await.unwrap_err();
        assert!(matches!(err, CatalogError::Parse(_)));
        assert_eq!(engine.events(0), before);

        let err = refresh(&mut engine, 0).await.unwrap_err();
        assert!(matches!(err, CatalogError::Empty));
        assert_eq!(engine.events(0), before);
    }

    #[test]
    fn statuses_follow_the_clock_between_refreshes() {
        let mut engine = LifecycleEngine::new(Arc::new(ScriptedCatalog::new(vec![])));
        engine.apply_fetch(Ok(slots(0, 3)), 0).unwrap();

        let at = |m: i64| -> Vec<EventStatus> { engine.events(m * MINUTE_MS).iter().map(|e| e.status).collect() };
        assert_eq!(at(0), vec![EventStatus::Active, EventStatus::Upcoming, EventStatus::Upcoming]);
        assert_eq!(at(20), vec![EventStatus::Expired, EventStatus::Active, EventStatus::Upcoming]);
        assert_eq!(at(45), vec![EventStatus::Expired, EventStatus::Expired, EventStatus::Expired]);
        assert_eq!(active_index(&engine, 45 * MINUTE_MS), None);
    }

    #[test]
    fn at_most_one_active_and_statuses_monotonic() {
        let mut engine = LifecycleEngine::new(Arc::new(ScriptedCatalog::new(vec![])));
        engine.apply_fetch(Ok(slots(0, 8)), 0).unwrap();

        for now in (-MINUTE_MS..130 * MINUTE_MS).step_by(7_919) {
            let statuses: Vec<EventStatus> = engine.events(now).iter().map(|e| e.status).collect();
            let active = statuses.iter().filter(|s| **s == EventStatus::Active).count();
            assert!(active <= 1, "now={now}: {statuses:?}");
            let rank = |s: &EventStatus| match s {
                EventStatus::Expired => 0,
                EventStatus::Active => 1,
                EventStatus::Upcoming => 2,
            };
            assert!(statuses.windows(2).all(|w| rank(&w[0]) <= rank(&w[1])), "now={now}: {statuses:?}");
        }
    }

    #[test]
    fn unordered_duplicate_and_overlapping_input_is_normalized() {
        let mut engine = LifecycleEngine::new(Arc::new(ScriptedCatalog::new(vec![])));
        let mut input = slots(0, 3);
        input.reverse();
        input.push(descriptor("zz-overlap", 0, 15));
        let repeated = input[2].clone();
        input.push(repeated);
        input.push(descriptor("inverted", 50, 40));
        engine.apply_fetch(Ok(input), 0).unwrap();

        let slugs: Vec<&str> = engine.descriptors().iter().map(|d| d.slug.as_str()).collect();
        assert_eq!(slugs, vec!["slot-0", "slot-15", "slot-30"]);
    }

    #[test]
    fn slugs_survive_refresh_by_identity() {
        let mut engine = LifecycleEngine::new(Arc::new(ScriptedCatalog::new(vec![])));
        engine.apply_fetch(Ok(slots(0, 3)), 0).unwrap();
        engine.apply_fetch(Ok(slots(15, 3)), 20 * MINUTE_MS).unwrap();

        let find = |slug: &str| engine.descriptors().iter().find(|d| d.slug == slug).cloned();
        assert!(find("slot-0").is_none());
        assert_eq!(find("slot-15").map(|d| d.start_time_ms), Some(15 * MINUTE_MS));
        assert_eq!(active_index(&engine, 20 * MINUTE_MS), Some(0));
    }
}
