use std::collections::VecDeque;

use serde::Serialize;

use crate::types::PriceTick;

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct PricePoint {
    pub timestamp_ms: i64,
    pub value: f64,
}

/// Bounded FIFO of received ticks, in arrival order.
#[derive(Debug)]
pub struct PriceHistory {
    capacity: usize,
    points: VecDeque<PricePoint>,
}

impl PriceHistory {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            points: VecDeque::with_capacity(capacity),
        }
    }

    pub fn push(&mut self, tick: PriceTick) {
        if self.points.len() == self.capacity {
            self.points.pop_front();
        }
        self.points.push_back(PricePoint {
            timestamp_ms: tick.timestamp_ms,
            value: tick.value,
        });
    }

    pub fn latest(&self) -> Option<PricePoint> {
        self.points.back().copied()
    }

    /// Change between the two most recently received ticks.
    pub fn delta(&self) -> Option<f64> {
        let n = self.points.len();
        if n < 2 {
            return None;
        }
        Some(self.points[n - 1].value - self.points[n - 2].value)
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }
}
