//! Bounded recent cache
//!
//! Per-key sliding windows with a point cap and a TTL. Eviction happens
//! on write; reads filter by cutoff, so an idle key can never serve
//! stale points.

use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use std::collections::VecDeque;

#[derive(Debug, Clone)]
struct Timestamped<T> {
    at: DateTime<Utc>,
    value: T,
}

/// Concurrent per-key window cache with capacity and age bounds
pub struct RecentCache<T> {
    entries: DashMap<String, VecDeque<Timestamped<T>>>,
    capacity: usize,
    ttl: Duration,
}

impl<T: Clone> RecentCache<T> {
    pub fn new(capacity: usize, ttl: Duration) -> Self {
        Self {
            entries: DashMap::new(),
            capacity,
            ttl,
        }
    }

    /// Append a point to a key's window, evicting over-capacity and
    /// expired points
    pub fn push(&self, key: &str, at: DateTime<Utc>, value: T) {
        let mut window = self.entries.entry(key.to_string()).or_default();
        window.push_back(Timestamped { at, value });

        while window.len() > self.capacity {
            window.pop_front();
        }
        let expiry = Utc::now() - self.ttl;
        while window.front().is_some_and(|p| p.at < expiry) {
            window.pop_front();
        }
    }

    /// Points for `key` at or after `cutoff`, oldest first
    pub fn recent(&self, key: &str, cutoff: DateTime<Utc>) -> Vec<T> {
        match self.entries.get(key) {
            Some(window) => window
                .iter()
                .filter(|p| p.at >= cutoff)
                .map(|p| p.value.clone())
                .collect(),
            None => Vec::new(),
        }
    }

    /// Current number of points held for `key`
    pub fn len(&self, key: &str) -> usize {
        self.entries.get(key).map_or(0, |w| w.len())
    }

    pub fn is_empty(&self, key: &str) -> bool {
        self.len(key) == 0
    }
}
