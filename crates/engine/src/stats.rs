// Copyright The AckBus Authors
// SPDX-License-Identifier: Apache-2.0

//! Counter map shared by the bus and its channels.
//!
//! Counters are keyed `<channel_name>_<metric>` (e.g. `orders_delivered`).
//! The map is a plain string-keyed `u64` store behind a mutex; a [`Counters`]
//! value is a cheap handle and every clone observes the same counts.

use ackbus_config::ChannelName;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// Metrics the bus records per channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Metric {
    /// Publishes accepted by the registry facade.
    Published,
    /// Publishes for which every subscriber acked.
    Delivered,
    /// Deliveries routed to the dead-letter queue.
    DeadLettered,
    /// Deliveries nacked without timing out.
    Nacked,
    /// Deliveries nacked by their acknowledgment timeout.
    TimedOut,
    /// Publishes delayed by the throttle.
    Throttled,
}

impl Metric {
    /// Key suffix for this metric.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Metric::Published => "published",
            Metric::Delivered => "delivered",
            Metric::DeadLettered => "dead_lettered",
            Metric::Nacked => "nacked",
            Metric::TimedOut => "timed_out",
            Metric::Throttled => "throttled",
        }
    }
}

impl fmt::Display for Metric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Shared counter map.
#[derive(Clone, Default)]
pub struct Counters {
    inner: Arc<Mutex<HashMap<String, u64>>>,
}

impl Counters {
    /// Creates an empty counter map.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds the key for a channel/metric pair.
    #[must_use]
    pub fn key(channel: &ChannelName, metric: Metric) -> String {
        format!("{channel}_{metric}")
    }

    /// Increments an arbitrary key by one.
    pub fn incr(&self, key: &str) {
        self.incr_by(key, 1);
    }

    /// Increments an arbitrary key by `amount`.
    pub fn incr_by(&self, key: &str, amount: u64) {
        let mut counters = self.inner.lock();
        *counters.entry(key.to_owned()).or_insert(0) += amount;
    }

    /// Increments the counter for a channel/metric pair.
    pub fn record(&self, channel: &ChannelName, metric: Metric) {
        self.incr(&Self::key(channel, metric));
    }

    /// Reads a key; absent keys read as zero.
    #[must_use]
    pub fn get(&self, key: &str) -> u64 {
        self.inner.lock().get(key).copied().unwrap_or(0)
    }

    /// Reads the counter for a channel/metric pair.
    #[must_use]
    pub fn metric(&self, channel: &ChannelName, metric: Metric) -> u64 {
        self.get(&Self::key(channel, metric))
    }

    /// Resets one key to zero.
    pub fn reset(&self, key: &str) {
        let _ = self.inner.lock().remove(key);
    }

    /// Resets every key.
    pub fn reset_all(&self) {
        self.inner.lock().clear();
    }

    /// Snapshot of every counter.
    #[must_use]
    pub fn snapshot(&self) -> HashMap<String, u64> {
        self.inner.lock().clone()
    }
}

impl fmt::Debug for Counters {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Counters")
            .field("keys", &self.inner.lock().len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn absent_keys_read_as_zero() {
        let counters = Counters::new();
        assert_eq!(counters.get("nothing"), 0);
    }

    #[test]
    fn clones_share_counts() {
        let counters = Counters::new();
        let clone = counters.clone();
        counters.incr("orders_published");
        clone.incr("orders_published");
        assert_eq!(counters.get("orders_published"), 2);
    }

    #[test]
    fn keys_follow_the_channel_metric_convention() {
        let name = ChannelName::from("orders");
        assert_eq!(Counters::key(&name, Metric::DeadLettered), "orders_dead_lettered");
        assert_eq!(Counters::key(&name, Metric::TimedOut), "orders_timed_out");
    }

    #[test]
    fn reset_clears_one_key_only() {
        let counters = Counters::new();
        counters.incr("a");
        counters.incr("b");
        counters.reset("a");
        assert_eq!(counters.get("a"), 0);
        assert_eq!(counters.get("b"), 1);
        counters.reset_all();
        assert_eq!(counters.get("b"), 0);
        assert!(counters.snapshot().is_empty());
    }
}
