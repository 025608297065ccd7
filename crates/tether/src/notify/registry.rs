// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Topic → callback registry.
//!
//! Topics iterate in the order they were first registered and callbacks in
//! the order they were added, so replay and fan-out are deterministic.

use indexmap::IndexMap;

use crate::notify::Callback;

/// Identifies one registered callback.
pub type SubscriptionId = u64;

/// Result of removing a callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Removal {
    NotFound,
    /// Other callbacks still reference the topic.
    Remaining(usize),
    /// That was the topic's last callback; the topic is gone.
    LastForTopic,
}

#[derive(Default)]
pub struct TopicRegistry {
    topics: IndexMap<String, Vec<(SubscriptionId, Callback)>>,
}

impl TopicRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a callback. Returns true when this is the topic's first one,
    /// meaning an upstream subscribe is needed.
    pub fn add(&mut self, topic: &str, id: SubscriptionId, callback: Callback) -> bool {
        match self.topics.get_mut(topic) {
            Some(callbacks) => {
                callbacks.push((id, callback));
                false
            }
            None => {
                self.topics.insert(topic.to_owned(), vec![(id, callback)]);
                true
            }
        }
    }

    pub fn remove(&mut self, topic: &str, id: SubscriptionId) -> Removal {
        let Some(callbacks) = self.topics.get_mut(topic) else {
            return Removal::NotFound;
        };
        let Some(pos) = callbacks.iter().position(|(cb_id, _)| *cb_id == id) else {
            return Removal::NotFound;
        };
        callbacks.remove(pos);
        if callbacks.is_empty() {
            self.topics.shift_remove(topic);
            Removal::LastForTopic
        } else {
            Removal::Remaining(callbacks.len())
        }
    }

    /// Drop a topic and all of its callbacks. Returns how many were dropped.
    pub fn remove_topic(&mut self, topic: &str) -> usize {
        self.topics.shift_remove(topic).map_or(0, |callbacks| callbacks.len())
    }

    /// Snapshot of a topic's callbacks, in registration order.
    pub fn callbacks(&self, topic: &str) -> Vec<Callback> {
        self.topics
            .get(topic)
            .map(|callbacks| callbacks.iter().map(|(_, cb)| Callback::clone(cb)).collect())
            .unwrap_or_default()
    }

    pub fn topics(&self) -> impl Iterator<Item = &str> {
        self.topics.keys().map(String::as_str)
    }

    pub fn has_topic(&self, topic: &str) -> bool {
        self.topics.contains_key(topic)
    }

    pub fn callback_count(&self) -> usize {
        self.topics.values().map(Vec::len).sum()
    }

    pub fn clear(&mut self) {
        self.topics.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use parking_lot::Mutex;

    use crate::notify::Notification;

    fn recording(log: &Arc<Mutex<Vec<String>>>, tag: &str) -> Callback {
        let log = Arc::clone(log);
        let tag = tag.to_owned();
        Arc::new(move |n: &Notification| log.lock().push(format!("{tag}:{}", n.message_id)))
    }

    fn note(topic: &str, id: &str) -> Notification {
        Notification { topic_id: topic.into(), message_id: id.into(), payload: serde_json::Value::Null }
    }

    #[test]
    fn first_callback_per_topic_requests_subscribe() {
        let log = Arc::new(Mutex::new(vec![]));
        let mut registry = TopicRegistry::new();
        assert!(registry.add("A", 1, recording(&log, "one")));
        assert!(!registry.add("A", 2, recording(&log, "two")));
        assert!(registry.add("B", 3, recording(&log, "three")));
        assert_eq!(registry.callback_count(), 3);
    }

    #[test]
    fn callbacks_fire_in_registration_order() {
        let log = Arc::new(Mutex::new(vec![]));
        let mut registry = TopicRegistry::new();
        registry.add("A", 1, recording(&log, "first"));
        registry.add("A", 2, recording(&log, "second"));

        let n = note("A", "m1");
        for cb in registry.callbacks("A") {
            cb(&n);
        }
        assert_eq!(*log.lock(), vec!["first:m1", "second:m1"]);
    }

    #[test]
    fn removing_one_callback_keeps_the_others() {
        let log = Arc::new(Mutex::new(vec![]));
        let mut registry = TopicRegistry::new();
        registry.add("A", 1, recording(&log, "first"));
        registry.add("A", 2, recording(&log, "second"));

        assert_eq!(registry.remove("A", 1), Removal::Remaining(1));
        assert_eq!(registry.remove("A", 1), Removal::NotFound);
        assert!(registry.has_topic("A"));
        assert_eq!(registry.remove("A", 2), Removal::LastForTopic);
        assert!(!registry.has_topic("A"));
    }

    #[test]
    fn topics_keep_first_registration_order() {
        let log = Arc::new(Mutex::new(vec![]));
        let mut registry = TopicRegistry::new();
        registry.add("C", 1, recording(&log, "x"));
        registry.add("A", 2, recording(&log, "x"));
        registry.add("B", 3, recording(&log, "x"));
        registry.add("C", 4, recording(&log, "x"));
        assert_eq!(registry.topics().collect::<Vec<_>>(), vec!["C", "A", "B"]);

        assert_eq!(registry.remove_topic("A"), 1);
        assert_eq!(registry.topics().collect::<Vec<_>>(), vec!["C", "B"]);
    }
}
