//! Fixtures shared by the engine tests.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;

use crate::catalog::EventCatalog;
use crate::error::CatalogError;
use crate::types::EventDescriptor;

pub const MINUTE_MS: i64 = 60_000;

/// Descriptor spanning `[start_min, end_min)` minutes after the epoch.
pub fn descriptor(slug: &str, start_min: i64, end_min: i64) -> EventDescriptor {
    EventDescriptor {
        slug: slug.to_string(),
        title: format!("Bitcoin Up or Down {slug}"),
        start_time_ms: start_min * MINUTE_MS,
        end_time_ms: end_min * MINUTE_MS,
        condition_id: None,
        question_id: None,
        clob_token_ids: vec![],
    }
}

/// `count` contiguous 15-minute slots starting at `start_min`, slugged `slot-<start_min>`.
pub fn slots(start_min: i64, count: usize) -> Vec<EventDescriptor> {
    (0..count as i64)
        .map(|i| {
            let start = start_min + i * 15;
            descriptor(&format!("slot-{start}"), start, start + 15)
        })
        .collect()
}

/// Catalog that replays a script of results, then keeps returning the last
/// successful list.
pub struct ScriptedCatalog {
    script: Mutex<VecDeque<Result<Vec<EventDescriptor>, CatalogError>>>,
    last_ok: Mutex<Vec<EventDescriptor>>,
    calls: AtomicUsize,
}

impl ScriptedCatalog {
    pub fn new(script: Vec<Result<Vec<EventDescriptor>, CatalogError>>) -> Self {
        Self {
            script: Mutex::new(script.into()),
            last_ok: Mutex::new(Vec::new()),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl EventCatalog for ScriptedCatalog {
    async fn fetch_upcoming(&self, _count: usize) -> Result<Vec<EventDescriptor>, CatalogError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let next = self.script.lock().unwrap().pop_front();
        match next {
            Some(Ok(events)) => {
                *self.last_ok.lock().unwrap() = events.clone();
                Ok(events)
            }
            Some(Err(e)) => Err(e),
            None => Ok(self.last_ok.lock().unwrap().clone()),
        }
    }
}
