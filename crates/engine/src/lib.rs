// Copyright The AckBus Authors
// SPDX-License-Identifier: Apache-2.0

//! An in-process publish/subscribe bus with per-delivery acknowledgment.
//!
//! Every publish fans out to the channel's current subscribers as individual
//! [`Delivery`] envelopes, each racing an optional acknowledgment timeout
//! against the subscriber's explicit `ack`/`nack`. A per-publish
//! [`DeliveryTracker`] aggregates the outcomes; failed deliveries land in the
//! channel's [`DeadLetterQueue`]. Bounded channels apply backpressure to
//! publishers, optionally preceded by an adaptive throttle that slows
//! publishes down as remaining capacity shrinks.
//!
//! # Example
//!
//! ```
//! use ackbus_engine::{Bus, ChannelOptions, Message};
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> ackbus_engine::Result<()> {
//! let bus = Bus::new();
//! bus.add_channel("greetings", ChannelOptions::default())?;
//!
//! bus.subscribe_fn("greetings", |delivery| async move {
//!     delivery.ack()?;
//!     Ok(())
//! })?;
//!
//! bus.publish("greetings", Message::new("Hi".to_owned())).await?;
//! # Ok(())
//! # }
//! ```
//!
//! # Delivery guarantees
//!
//! At-most-once per subscriber, with explicit failure capture: a delivery
//! resolves exactly once (ack, nack, timeout, or handler fault), and every
//! failed delivery is observable in the dead-letter queue. Nothing is
//! retried; the dead-letter queue exists so callers can decide.

pub mod channel;
pub mod error;
pub mod registry;
pub mod stats;

pub use ackbus_config::{
    BusConfig, BusOverrides, ChannelName, ChannelOverrides, ChannelSettings, GlobalConfig,
    LogLevel, Setting,
};
pub use channel::{
    Channel, DeadLetter, DeadLetterQueue, DeadLetterReason, Delivery, DeliveryTracker,
    HandlerError, Message, Outcome, Subscriber, SubscriberId, TypeConstraint,
};
pub use error::{Error, Result};
pub use registry::{Bus, ChannelOptions};
pub use stats::{Counters, Metric};
