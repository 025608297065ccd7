// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Per-topic record of delivered message ids.
//!
//! Survives reconnects so a server replaying its backlog after a reconnect
//! does not fire callbacks twice. Bounded per topic by `capacity` and aged
//! out after `ttl`. Eviction pops the oldest id from the front.

use std::collections::HashMap;
use std::time::Duration;

use indexmap::IndexMap;
use tokio::time::Instant;

pub struct DedupRecord {
    topics: HashMap<String, IndexMap<String, Instant>>,
    capacity: usize,
    ttl: Duration,
}

impl DedupRecord {
    pub fn new(capacity: usize, ttl: Duration) -> Self {
        Self { topics: HashMap::new(), capacity: capacity.max(1), ttl }
    }

    /// Record a delivery. Returns false if `message_id` was already seen on
    /// `topic` and is still remembered.
    pub fn record(&mut self, topic: &str, message_id: &str, now: Instant) -> bool {
        let seen = self.topics.entry(topic.to_owned()).or_default();

        // Insertion order is delivery order, so expired ids sit at the front.
        while let Some((_, at)) = seen.first() {
            if now.saturating_duration_since(*at) < self.ttl {
                break;
            }
            seen.shift_remove_index(0);
        }

        if seen.contains_key(message_id) {
            return false;
        }
        seen.insert(message_id.to_owned(), now);
        while seen.len() > self.capacity {
            seen.shift_remove_index(0);
        }
        true
    }

    /// Forget everything seen on `topic`.
    pub fn forget(&mut self, topic: &str) {
        self.topics.remove(topic);
    }

    pub fn clear(&mut self) {
        self.topics.clear();
    }

    /// Ids currently remembered for `topic`.
    pub fn len(&self, topic: &str) -> usize {
        self.topics.get(topic).map_or(0, IndexMap::len)
    }
}
