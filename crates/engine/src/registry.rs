// Copyright The AckBus Authors
// SPDX-License-Identifier: Apache-2.0

//! The named-channel registry facade.
//!
//! A [`Bus`] maps short channel names to [`Channel`]s and fans calls through.
//! All channels created through one bus share its counter map and resolve
//! their settings against the bus configuration tier. The facade holds no
//! delivery logic of its own -- the one thing it adds is the
//! `<name>_published` counter, bumped before delegating each publish.

use crate::channel::{
    Channel, DeadLetterQueue, Delivery, DeliveryTracker, HandlerError, Message, Subscriber,
    SubscriberId, TypeConstraint,
};
use crate::error::{Error, Result};
use crate::stats::{Counters, Metric};
use ackbus_config::{BusConfig, ChannelName, ChannelOverrides, ChannelSettings};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::Arc;

/// Options for creating a channel through the registry.
#[derive(Debug, Default)]
pub struct ChannelOptions {
    /// Optional payload type gate.
    pub constraint: Option<TypeConstraint>,
    /// Per-channel overrides resolved against the bus configuration.
    pub overrides: ChannelOverrides,
}

impl ChannelOptions {
    /// Options constraining the channel to payloads of type `T`.
    #[must_use]
    pub fn constrained<T: std::any::Any>() -> Self {
        Self {
            constraint: Some(TypeConstraint::of::<T>()),
            overrides: ChannelOverrides::default(),
        }
    }

    /// Options carrying the given overrides.
    #[must_use]
    pub fn with_overrides(overrides: ChannelOverrides) -> Self {
        Self {
            constraint: None,
            overrides,
        }
    }
}

/// Registry of named channels.
///
/// Cheaply cloneable handle; clones share the same registry.
#[derive(Clone)]
pub struct Bus {
    inner: Arc<BusInner>,
}

struct BusInner {
    config: BusConfig,
    counters: Counters,
    channels: RwLock<HashMap<ChannelName, Channel>>,
}

impl Bus {
    /// Creates a bus with default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(BusConfig::default())
    }

    /// Creates a bus whose channels resolve their settings against `config`.
    #[must_use]
    pub fn with_config(config: BusConfig) -> Self {
        Self {
            inner: Arc::new(BusInner {
                config,
                counters: Counters::new(),
                channels: RwLock::new(HashMap::new()),
            }),
        }
    }

    /// Creates a channel under `name`.
    ///
    /// Fails with [`Error::ChannelAlreadyExists`] when the name is taken, or
    /// with [`Error::InvalidChannelConfig`] when the resolved settings are
    /// inconsistent.
    pub fn add_channel(
        &self,
        name: impl Into<ChannelName>,
        options: ChannelOptions,
    ) -> Result<Channel> {
        let name: ChannelName = name.into();
        let settings = ChannelSettings::resolve(&self.inner.config, &options.overrides);
        let mut channels = self.inner.channels.write();
        if channels.contains_key(&name) {
            return Err(Error::ChannelAlreadyExists { channel: name });
        }
        let channel = Channel::build(
            name.clone(),
            settings,
            options.constraint,
            self.inner.counters.clone(),
        )?;
        let _ = channels.insert(name, channel.clone());
        Ok(channel)
    }

    /// Unlinks `name` from the registry. No-op when absent. The channel is
    /// not closed; existing handles stay usable.
    pub fn remove_channel(&self, name: impl Into<ChannelName>) {
        let _ = self.inner.channels.write().remove(&name.into());
    }

    /// Publishes to the named channel, bumping its `published` counter first.
    pub async fn publish(
        &self,
        name: impl Into<ChannelName>,
        message: Message,
    ) -> Result<Option<DeliveryTracker>> {
        let channel = self.lookup(name)?;
        self.inner.counters.record(channel.name(), Metric::Published);
        channel.publish(message).await
    }

    /// Subscribes a handler to the named channel.
    pub fn subscribe(
        &self,
        name: impl Into<ChannelName>,
        subscriber: Arc<dyn Subscriber>,
    ) -> Result<SubscriberId> {
        self.lookup(name)?.subscribe(subscriber)
    }

    /// Subscribes an async closure to the named channel.
    pub fn subscribe_fn<F, Fut>(
        &self,
        name: impl Into<ChannelName>,
        handler: F,
    ) -> Result<SubscriberId>
    where
        F: Fn(Delivery) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = std::result::Result<(), HandlerError>> + Send + 'static,
    {
        self.lookup(name)?.subscribe_fn(handler)
    }

    /// Removes a subscriber from the named channel.
    pub fn unsubscribe(&self, name: impl Into<ChannelName>, id: SubscriberId) -> Result<()> {
        self.lookup(name)?.unsubscribe(id);
        Ok(())
    }

    /// Returns `true` while the named channel has unresolved publishes.
    pub fn is_pending(&self, name: impl Into<ChannelName>) -> Result<bool> {
        Ok(self.lookup(name)?.is_pending())
    }

    /// Number of unresolved publishes on the named channel.
    pub fn pending_count(&self, name: impl Into<ChannelName>) -> Result<usize> {
        Ok(self.lookup(name)?.pending_count())
    }

    /// Handle to the named channel's dead-letter queue.
    pub fn dead_letters(&self, name: impl Into<ChannelName>) -> Result<DeadLetterQueue> {
        Ok(self.lookup(name)?.dead_letters())
    }

    /// Closes the named channel.
    pub fn close(&self, name: impl Into<ChannelName>) -> Result<()> {
        self.lookup(name)?.close();
        Ok(())
    }

    /// Closes every channel in the registry.
    pub fn close_all(&self) {
        for channel in self.snapshot() {
            channel.close();
        }
    }

    /// Clears every channel's in-flight state and dead-letter queue.
    /// Counters are left intact.
    pub fn clear(&self) {
        for channel in self.snapshot() {
            channel.clear();
        }
    }

    /// Returns `true` when `name` is registered.
    #[must_use]
    pub fn has_channel(&self, name: impl Into<ChannelName>) -> bool {
        self.inner.channels.read().contains_key(&name.into())
    }

    /// Names of every registered channel.
    #[must_use]
    pub fn channel_names(&self) -> Vec<ChannelName> {
        self.inner.channels.read().keys().cloned().collect()
    }

    /// Looks up a channel without failing on unknown names.
    #[must_use]
    pub fn channel(&self, name: impl Into<ChannelName>) -> Option<Channel> {
        self.inner.channels.read().get(&name.into()).cloned()
    }

    /// Handle to the counter map shared by every channel on this bus.
    #[must_use]
    pub fn counters(&self) -> Counters {
        self.inner.counters.clone()
    }

    fn lookup(&self, name: impl Into<ChannelName>) -> Result<Channel> {
        let name: ChannelName = name.into();
        self.inner
            .channels
            .read()
            .get(&name)
            .cloned()
            .ok_or(Error::UnknownChannel { channel: name })
    }

    fn snapshot(&self) -> Vec<Channel> {
        self.inner.channels.read().values().cloned().collect()
    }
}

impl Default for Bus {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Bus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Bus")
            .field("channels", &self.inner.channels.read().len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ack_all(delivery: Delivery) -> impl Future<Output = std::result::Result<(), HandlerError>> {
        async move {
            delivery.ack()?;
            Ok(())
        }
    }

    #[tokio::test]
    async fn add_channel_rejects_duplicate_names() {
        let bus = Bus::new();
        bus.add_channel("orders", ChannelOptions::default())
            .expect("first add should succeed");
        let err = bus
            .add_channel("orders", ChannelOptions::default())
            .expect_err("second add should fail");
        assert!(matches!(err, Error::ChannelAlreadyExists { .. }));
    }

    #[tokio::test]
    async fn unknown_names_fail_except_for_queries_and_removal() {
        let bus = Bus::new();
        assert!(matches!(
            bus.publish("ghost", Message::new(1u32)).await,
            Err(Error::UnknownChannel { .. })
        ));
        assert!(matches!(
            bus.pending_count("ghost"),
            Err(Error::UnknownChannel { .. })
        ));
        assert!(matches!(
            bus.dead_letters("ghost"),
            Err(Error::UnknownChannel { .. })
        ));
        assert!(matches!(bus.close("ghost"), Err(Error::UnknownChannel { .. })));

        // Pure queries and removal never fail.
        assert!(!bus.has_channel("ghost"));
        assert!(bus.channel("ghost").is_none());
        assert!(bus.channel_names().is_empty());
        bus.remove_channel("ghost");
    }

    #[tokio::test]
    async fn publish_bumps_the_published_counter_before_delegating() {
        let bus = Bus::new();
        bus.add_channel("orders", ChannelOptions::default())
            .expect("channel should be created");
        bus.subscribe_fn("orders", ack_all)
            .expect("subscribe should succeed");

        bus.publish("orders", Message::new(7u32))
            .await
            .expect("publish should succeed");
        assert_eq!(bus.counters().get("orders_published"), 1);

        // A publish refused by the channel still counts as published.
        bus.close("orders").expect("close should succeed");
        let _ = bus.publish("orders", Message::new(8u32)).await;
        assert_eq!(bus.counters().get("orders_published"), 2);
    }

    #[tokio::test]
    async fn remove_channel_unlinks_without_closing() {
        let bus = Bus::new();
        let channel = bus
            .add_channel("orders", ChannelOptions::default())
            .expect("channel should be created");
        bus.remove_channel("orders");
        assert!(!bus.has_channel("orders"));
        assert!(!channel.is_closed(), "removal must not close the channel");
    }

    #[tokio::test]
    async fn close_all_closes_every_channel() {
        let bus = Bus::new();
        let a = bus
            .add_channel("a", ChannelOptions::default())
            .expect("channel should be created");
        let b = bus
            .add_channel("b", ChannelOptions::default())
            .expect("channel should be created");
        bus.close_all();
        assert!(a.is_closed());
        assert!(b.is_closed());
    }

    #[tokio::test]
    async fn channel_names_reports_registered_channels() {
        let bus = Bus::new();
        bus.add_channel("a", ChannelOptions::default())
            .expect("channel should be created");
        bus.add_channel("b", ChannelOptions::default())
            .expect("channel should be created");
        let mut names: Vec<String> = bus
            .channel_names()
            .into_iter()
            .map(|n| n.as_str().to_owned())
            .collect();
        names.sort();
        assert_eq!(names, vec!["a".to_owned(), "b".to_owned()]);
    }
}
