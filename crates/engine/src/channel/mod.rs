// Copyright The AckBus Authors
// SPDX-License-Identifier: Apache-2.0

//! Channel module: fan-out, delivery tracking, flow control, and lifecycle.

#[allow(clippy::module_inception)] // channel/channel.rs holds the core channel internals.
mod channel;
mod dead_letter;
mod delivery;
mod gate;
mod message;
mod subscriber;
mod tracker;
mod types;


pub use channel::Channel;
pub use dead_letter::{DeadLetter, DeadLetterQueue};
pub use delivery::Delivery;
pub use message::{Message, TypeConstraint};
pub use subscriber::{HandlerError, Subscriber};
pub use tracker::DeliveryTracker;
pub use types::{DeadLetterReason, Outcome, SubscriberId};
