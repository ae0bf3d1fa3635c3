// Copyright The AckBus Authors
// SPDX-License-Identifier: Apache-2.0

//! Errors produced by bus operations.

use crate::channel::{Outcome, SubscriberId};
use ackbus_config::ChannelName;

/// Result type alias for bus operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur across the bus.
#[derive(Debug, thiserror::Error, Clone, PartialEq, Eq)]
pub enum Error {
    /// The channel's lifecycle has ended; no further publishes or
    /// subscriptions are accepted.
    #[error("channel `{channel}` is closed")]
    ChannelClosed {
        /// Closed channel name.
        channel: ChannelName,
    },

    /// The payload's type does not match the channel's type constraint.
    #[error("channel `{channel}` accepts `{expected}` payloads, got `{actual}`")]
    TypeMismatch {
        /// Constrained channel name.
        channel: ChannelName,
        /// Type the channel was constrained to at construction.
        expected: &'static str,
        /// Type of the rejected payload.
        actual: &'static str,
    },

    /// Registry lookup failed.
    #[error("channel `{channel}` does not exist")]
    UnknownChannel {
        /// Missing channel name.
        channel: ChannelName,
    },

    /// Registry insertion failed because the name is taken.
    #[error("channel `{channel}` already exists")]
    ChannelAlreadyExists {
        /// Existing channel name.
        channel: ChannelName,
    },

    /// Channel configuration is invalid for construction.
    #[error("invalid configuration for channel `{channel}`: {reason}")]
    InvalidChannelConfig {
        /// Channel name that failed validation.
        channel: ChannelName,
        /// Validation error details.
        reason: String,
    },

    /// A delivery was acked or nacked a second time.
    #[error(
        "delivery to subscriber {subscriber} on `{channel}` already resolved as {resolved_as}"
    )]
    DeliveryAlreadyResolved {
        /// Channel the delivery belongs to.
        channel: ChannelName,
        /// Subscriber the delivery was addressed to.
        subscriber: SubscriberId,
        /// Terminal state reached by the first resolution.
        resolved_as: Outcome,
    },

    /// A tracker slot was acked or nacked a second time.
    #[error(
        "subscriber {subscriber} already resolved as {resolved_as} for this publish on `{channel}`"
    )]
    SubscriberAlreadyResolved {
        /// Channel the publish went to.
        channel: ChannelName,
        /// Subscriber whose slot was already terminal.
        subscriber: SubscriberId,
        /// Terminal state reached by the first resolution.
        resolved_as: Outcome,
    },

    /// An ack or nack referenced a subscriber id outside the publish-time
    /// snapshot.
    #[error("subscriber {subscriber} is not part of this delivery round on `{channel}`")]
    UnknownSubscriber {
        /// Channel the publish went to.
        channel: ChannelName,
        /// The unknown subscriber id.
        subscriber: SubscriberId,
    },
}
