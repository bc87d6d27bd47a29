//! In-memory read table and recent-event log.
//!
//! Nothing here survives a restart. The table only grows between explicit
//! clears; the event log is a newest-first ring capped at [`EVENT_LOG_CAP`].

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use tag_core::{ReadSet, TagId, extract_all_tag_ids};
use tracing::{debug, warn};

pub const EVENT_LOG_CAP: usize = 200;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TagReadRecord {
    pub id: TagId,
    pub count: u64,
    pub last_seen: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EventLogEntry {
    pub time: DateTime<Utc>,
    pub data: Value,
}

/// Decode a raw message as JSON, wrapping undecodable text as `{"raw": text}`.
pub fn decode_event(raw: &str) -> Value {
    serde_json::from_str(raw).unwrap_or_else(|_| serde_json::json!({ "raw": raw }))
}

#[derive(Debug, Default)]
pub struct ReadAggregator {
    events_received: u64,
    total_reads: u64,
    records: HashMap<TagId, TagReadRecord>,
    log: VecDeque<EventLogEntry>,
}

impl ReadAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Process one inbound message stamped with the current time.
    pub fn on_message(&mut self, raw: &str) -> Vec<TagId> {
        self.on_message_at(raw, Utc::now())
    }

    /// Process one inbound message. Returns the tag ids it contributed.
    pub fn on_message_at(&mut self, raw: &str, now: DateTime<Utc>) -> Vec<TagId> {
        let data = decode_event(raw);
        self.events_received += 1;

        let ids = extract_all_tag_ids(&data);

        self.log.push_front(EventLogEntry { time: now, data });
        if self.log.len() > EVENT_LOG_CAP {
            self.log.pop_back();
        }

        for id in &ids {
            self.total_reads += 1;
            self.records
                .entry(id.clone())
                .and_modify(|r| {
                    r.count += 1;
                    r.last_seen = now;
                })
                .or_insert_with(|| TagReadRecord {
                    id: id.clone(),
                    count: 1,
                    last_seen: now,
                });
        }
        debug!(tags = ids.len(), events = self.events_received, "message processed");
        ids
    }

    /// Empty the event log. The read table is untouched.
    pub fn clear(&mut self) {
        self.log.clear();
    }

    /// Empty the read table and reset the total-read counter together.
    pub fn clear_tags(&mut self) {
        self.records.clear();
        self.total_reads = 0;
    }

    pub fn events_received(&self) -> u64 {
        self.events_received
    }

    pub fn total_reads(&self) -> u64 {
        self.total_reads
    }

    pub fn unique_tags(&self) -> usize {
        self.records.len()
    }

    pub fn record(&self, id: &str) -> Option<&TagReadRecord> {
        self.records.get(id)
    }

    /// All records, most recently seen first; ties broken by id.
    pub fn records(&self) -> Vec<TagReadRecord> {
        let mut records: Vec<TagReadRecord> = self.records.values().cloned().collect();
        records.sort_by(|a, b| b.last_seen.cmp(&a.last_seen).then_with(|| a.id.cmp(&b.id)));
        records
    }

    /// Newest first.
    pub fn event_log(&self) -> Vec<EventLogEntry> {
        self.log.iter().cloned().collect()
    }

    pub fn event_log_len(&self) -> usize {
        self.log.len()
    }

    pub fn read_set(&self) -> ReadSet {
        self.records.keys().cloned().collect()
    }
}

/// Aggregator shared between transport tasks and readers.
///
/// The lock is a plain (non-async) mutex held only for the duration of one
/// message, so a message is never observed half-applied.
pub type SharedAggregator = Arc<Mutex<ReadAggregator>>;

/// Lock the shared aggregator. A poisoned lock is logged, cleared and
/// recovered so later messages keep being counted.
pub fn lock_aggregator(shared: &SharedAggregator) -> MutexGuard<'_, ReadAggregator> {
    match shared.lock() {
        Ok(guard) => guard,
        Err(poisoned) => {
            warn!("read aggregator lock was poisoned, recovering");
            shared.clear_poison();
            poisoned.into_inner()
        }
    }
}
