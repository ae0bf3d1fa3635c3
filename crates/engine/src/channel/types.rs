// Copyright The AckBus Authors
// SPDX-License-Identifier: Apache-2.0

//! Core value types shared across the crate.
//!
//! No behavior lives here -- only data definitions and conversions.

use std::fmt;

/// Identifier a channel assigns to a subscriber.
///
/// Ids are handed out monotonically starting at 1 and never reused, so
/// ascending-id iteration over the subscriber map is also insertion order.
/// Id 0 is reserved for the [`UNROUTED`](Self::UNROUTED) sentinel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriberId(u64);

impl SubscriberId {
    /// Sentinel carried by the synthetic delivery of a publish that found no
    /// subscribers.
    pub const UNROUTED: SubscriberId = SubscriberId(0);

    /// The first id a channel hands out.
    pub(crate) const fn first() -> Self {
        SubscriberId(1)
    }

    /// The id following this one.
    pub(crate) const fn next(self) -> Self {
        SubscriberId(self.0 + 1)
    }

    /// Returns the raw id value.
    #[must_use]
    pub const fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for SubscriberId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Resolution state of a delivery, or of one subscriber slot in a tracker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Outcome {
    /// Not yet acknowledged either way.
    #[default]
    Pending,
    /// Positively acknowledged.
    Acked,
    /// Negatively acknowledged (explicitly, by timeout, or by handler fault).
    Nacked,
}

impl Outcome {
    /// Returns `true` when no terminal transition has happened yet.
    #[must_use]
    pub const fn is_pending(self) -> bool {
        matches!(self, Outcome::Pending)
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Outcome::Pending => "pending",
            Outcome::Acked => "acked",
            Outcome::Nacked => "nacked",
        })
    }
}

/// Why a delivery ended up in the dead-letter queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeadLetterReason {
    /// The delivery's acknowledgment timeout elapsed.
    Timeout,
    /// The delivery was nacked without timing out.
    Nack,
}

impl DeadLetterReason {
    /// Textual form recorded with the dead letter.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            DeadLetterReason::Timeout => "timeout",
            DeadLetterReason::Nack => "nack",
        }
    }
}

impl fmt::Display for DeadLetterReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
