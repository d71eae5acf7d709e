//! Deduplication & Ordering Buffer
//!
//! Per-session bounded-lateness buffer. Events are held until the watermark
//! (`max timestamp seen - lateness`) passes their timestamp and are then
//! released in `(timestamp, sequence)` order. An event whose timestamp is
//! already behind the watermark when it arrives is flagged late and handed
//! back immediately so the caller can insert it retroactively.

use chrono::{DateTime, Duration, Utc};
use std::collections::{BTreeMap, HashSet};

use crate::models::event::{DedupKey, TelemetryEvent};

/// Result of admitting one event
#[derive(Debug, Clone, PartialEq)]
pub enum Admission {
    /// Held until the watermark passes its timestamp
    Buffered,
    /// Behind the watermark; returned with `late = true`
    Late(TelemetryEvent),
    /// Exact duplicate of an event already admitted
    Duplicate,
}

#[derive(Debug)]
pub struct OrderingBuffer {
    lateness: Duration,
    pending: BTreeMap<(DateTime<Utc>, u64), TelemetryEvent>,
    seen: HashSet<DedupKey>,
    max_timestamp: Option<DateTime<Utc>>,
}

impl OrderingBuffer {
    pub fn new(lateness_ms: i64) -> Self {
        Self {
            lateness: Duration::milliseconds(lateness_ms),
            pending: BTreeMap::new(),
            seen: HashSet::new(),
            max_timestamp: None,
        }
    }

    /// Current watermark, `None` before the first event
    pub fn watermark(&self) -> Option<DateTime<Utc>> {
        self.max_timestamp.map(|ts| ts - self.lateness)
    }

    pub fn has_seen(&self, key: &DedupKey) -> bool {
        self.seen.contains(key)
    }

    /// Record a key without buffering the event (used when rebuilding from the log)
    pub fn mark_seen(&mut self, event: &TelemetryEvent) {
        self.seen.insert(event.dedup_key());
        self.advance(event.timestamp);
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    pub fn admit(&mut self, mut event: TelemetryEvent) -> Admission {
        if !self.seen.insert(event.dedup_key()) {
            return Admission::Duplicate;
        }

        if let Some(watermark) = self.watermark() {
            if event.timestamp < watermark {
                event.late = true;
                return Admission::Late(event);
            }
        }

        self.advance(event.timestamp);
        self.pending.insert(event.order_key(), event);
        Admission::Buffered
    }

    /// Release every buffered event at or behind the watermark
    pub fn drain(&mut self) -> Vec<TelemetryEvent> {
        let Some(watermark) = self.watermark() else {
            return Vec::new();
        };

        // everything from the first key past the watermark stays buffered
        let retained = match self
            .pending
            .keys()
            .find(|(ts, _)| *ts > watermark)
            .copied()
        {
            Some(key) => self.pending.split_off(&key),
            None => BTreeMap::new(),
        };
        let released = std::mem::replace(&mut self.pending, retained);
        released.into_values().collect()
    }

    /// Release everything regardless of the watermark (session end)
    pub fn flush(&mut self) -> Vec<TelemetryEvent> {
        std::mem::take(&mut self.pending).into_values().collect()
    }

    fn advance(&mut self, timestamp: DateTime<Utc>) {
        if self.max_timestamp.is_none_or(|max| timestamp > max) {
            self.max_timestamp = Some(timestamp);
        }
    }
}
