// src/events/buffer.rs — Bounded, timestamp-ordered event buffer

use std::collections::VecDeque;

use super::normalize::NormEvent;

/// Recent events kept in timestamp order; the oldest fall off first.
#[derive(Debug, Clone)]
pub struct EventBuffer {
    events: VecDeque<NormEvent>,
    max_events: usize,
    max_age_ms: i64,
}

impl EventBuffer {
    pub fn new(max_events: usize, max_age_ms: i64) -> Self {
        Self {
            events: VecDeque::new(),
            max_events: max_events.max(1),
            max_age_ms,
        }
    }

    /// Insert keeping timestamp order. Late arrivals are placed after any
    /// event with the same timestamp, so arrival order breaks ties.
    pub fn push(&mut self, event: NormEvent) {
        let in_order = self.events.back().map_or(true, |last| last.ts_ms <= event.ts_ms);
        if in_order {
            self.events.push_back(event);
        } else {
            let at = self.events.partition_point(|e| e.ts_ms <= event.ts_ms);
            self.events.insert(at, event);
        }
        while self.events.len() > self.max_events {
            self.events.pop_front();
        }
    }

    pub fn extend<I: IntoIterator<Item = NormEvent>>(&mut self, events: I) {
        for event in events {
            self.push(event);
        }
    }

    /// Drop events older than the retention window. Returns how many went.
    pub fn expire(&mut self, now_ms: i64) -> usize {
        let cutoff = now_ms - self.max_age_ms;
        let stale = self.events.partition_point(|e| e.ts_ms < cutoff);
        self.events.drain(..stale);
        stale
    }

    /// Owned copy of events with `ts_ms >= since_ms`, in order.
    pub fn snapshot(&self, since_ms: Option<i64>) -> Vec<NormEvent> {
        let start = since_ms.map_or(0, |since| self.events.partition_point(|e| e.ts_ms < since));
        self.events.range(start..).cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn max_age_ms(&self) -> i64 {
        self.max_age_ms
    }

    pub fn oldest_ts(&self) -> Option<i64> {
        self.events.front().map(|e| e.ts_ms)
    }

    pub fn newest_ts(&self) -> Option<i64> {
        self.events.back().map(|e| e.ts_ms)
    }
}
