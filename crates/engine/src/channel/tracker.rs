// Copyright The AckBus Authors
// SPDX-License-Identifier: Apache-2.0

//! Per-publish outcome aggregation.
//!
//! One [`DeliveryTracker`] exists per publish call. Its subscriber-id set is
//! frozen at construction -- the snapshot of subscribers at publish time --
//! and each slot resolves exactly once. When the last pending slot flips, the
//! tracker resolves exactly once.
//!
//! # Resolution sequence
//!
//! 1. The channel's internal hook runs first (tracker removal, backpressure
//!    signal, delivered counter). It lives in a private slot set once at
//!    publish time, so replacing the public callbacks cannot detach the
//!    channel's bookkeeping.
//! 2. `on_complete` fires iff every slot acked.
//! 3. `on_resolved` fires unconditionally.
//!
//! All callbacks run on the resolving task with every lock released.

use crate::channel::message::Message;
use crate::channel::types::{Outcome, SubscriberId};
use crate::error::{Error, Result};
use ackbus_config::ChannelName;
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

type CompletionFn = Box<dyn FnOnce() + Send>;
type DeadLetterFn = Box<dyn FnMut(SubscriberId) + Send>;

/// Channel-internal hook run at resolution; receives `true` when every slot
/// acked.
pub(crate) type ResolutionHook = Box<dyn FnOnce(bool) + Send>;

/// Aggregates every subscriber's outcome for a single published message.
///
/// Cheaply cloneable handle; clones share the same underlying state.
#[derive(Clone)]
pub struct DeliveryTracker {
    inner: Arc<TrackerInner>,
}

struct TrackerInner {
    message: Message,
    channel: ChannelName,
    state: Mutex<TrackerState>,
}

struct TrackerState {
    outcomes: BTreeMap<SubscriberId, Outcome>,
    pending: usize,
    resolved: bool,
    resolution_hook: Option<ResolutionHook>,
    on_complete: Option<CompletionFn>,
    on_resolved: Option<CompletionFn>,
    on_dead_letter: Option<DeadLetterFn>,
}

/// Callbacks to run after the lock is released, in firing order.
struct Resolution {
    hook: Option<ResolutionHook>,
    on_complete: Option<CompletionFn>,
    on_resolved: Option<CompletionFn>,
    fully_delivered: bool,
}

impl DeliveryTracker {
    pub(crate) fn new(
        message: Message,
        channel: ChannelName,
        subscriber_ids: impl IntoIterator<Item = SubscriberId>,
    ) -> Self {
        let outcomes: BTreeMap<SubscriberId, Outcome> = subscriber_ids
            .into_iter()
            .map(|id| (id, Outcome::Pending))
            .collect();
        let pending = outcomes.len();
        debug_assert!(pending > 0, "a tracker needs at least one subscriber slot");
        Self {
            inner: Arc::new(TrackerInner {
                message,
                channel,
                state: Mutex::new(TrackerState {
                    outcomes,
                    pending,
                    resolved: false,
                    resolution_hook: None,
                    on_complete: None,
                    on_resolved: None,
                    on_dead_letter: None,
                }),
            }),
        }
    }

    pub(crate) fn set_resolution_hook(&self, hook: ResolutionHook) {
        self.inner.state.lock().resolution_hook = Some(hook);
    }

    /// Records a positive acknowledgment for `subscriber`.
    pub fn ack(&self, subscriber: SubscriberId) -> Result<()> {
        self.resolve_slot(subscriber, Outcome::Acked)
    }

    /// Records a negative acknowledgment for `subscriber` and fires the
    /// dead-letter callback.
    pub fn nack(&self, subscriber: SubscriberId) -> Result<()> {
        self.resolve_slot(subscriber, Outcome::Nacked)
    }

    /// Returns `true` once every subscriber acked.
    #[must_use]
    pub fn is_fully_delivered(&self) -> bool {
        let state = self.inner.state.lock();
        state.outcomes.values().all(|o| *o == Outcome::Acked)
    }

    /// Returns `true` once no slot is pending.
    #[must_use]
    pub fn is_resolved(&self) -> bool {
        self.inner.state.lock().resolved
    }

    /// Number of slots still awaiting resolution.
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.inner.state.lock().pending
    }

    /// The outcome recorded for `subscriber`, if it is part of the snapshot.
    #[must_use]
    pub fn outcome(&self, subscriber: SubscriberId) -> Option<Outcome> {
        self.inner.state.lock().outcomes.get(&subscriber).copied()
    }

    /// The subscriber-id snapshot this tracker was built from, ascending.
    #[must_use]
    pub fn subscriber_ids(&self) -> Vec<SubscriberId> {
        self.inner.state.lock().outcomes.keys().copied().collect()
    }

    /// The published payload.
    #[must_use]
    pub fn message(&self) -> &Message {
        &self.inner.message
    }

    /// Name of the channel the message was published to.
    #[must_use]
    pub fn channel(&self) -> &ChannelName {
        &self.inner.channel
    }

    /// Registers the callback fired once when every subscriber acked,
    /// replacing any prior registration.
    pub fn on_complete(&self, callback: impl FnOnce() + Send + 'static) {
        self.inner.state.lock().on_complete = Some(Box::new(callback));
    }

    /// Registers the callback fired once at resolution regardless of
    /// outcomes, replacing any prior registration.
    pub fn on_resolved(&self, callback: impl FnOnce() + Send + 'static) {
        self.inner.state.lock().on_resolved = Some(Box::new(callback));
    }

    /// Registers the callback fired for every nacked slot, replacing any
    /// prior registration.
    pub fn on_dead_letter(&self, callback: impl FnMut(SubscriberId) + Send + 'static) {
        self.inner.state.lock().on_dead_letter = Some(Box::new(callback));
    }

    fn resolve_slot(&self, subscriber: SubscriberId, to: Outcome) -> Result<()> {
        let (dead_letter, resolution) = {
            let mut state = self.inner.state.lock();
            let slot =
                state
                    .outcomes
                    .get_mut(&subscriber)
                    .ok_or_else(|| Error::UnknownSubscriber {
                        channel: self.inner.channel.clone(),
                        subscriber,
                    })?;
            if !slot.is_pending() {
                return Err(Error::SubscriberAlreadyResolved {
                    channel: self.inner.channel.clone(),
                    subscriber,
                    resolved_as: *slot,
                });
            }
            *slot = to;
            state.pending -= 1;

            let dead_letter = if to == Outcome::Nacked {
                state.on_dead_letter.take()
            } else {
                None
            };

            let resolution = if state.pending == 0 && !state.resolved {
                state.resolved = true;
                let fully_delivered = state.outcomes.values().all(|o| *o == Outcome::Acked);
                Some(Resolution {
                    hook: state.resolution_hook.take(),
                    on_complete: if fully_delivered {
                        state.on_complete.take()
                    } else {
                        None
                    },
                    on_resolved: state.on_resolved.take(),
                    fully_delivered,
                })
            } else {
                None
            };

            (dead_letter, resolution)
        };

        if let Some(mut callback) = dead_letter {
            callback(subscriber);
            // Reinstall unless a replacement was registered while it ran.
            let mut state = self.inner.state.lock();
            if state.on_dead_letter.is_none() {
                state.on_dead_letter = Some(callback);
            }
        }

        if let Some(resolution) = resolution {
            if let Some(hook) = resolution.hook {
                hook(resolution.fully_delivered);
            }
            if let Some(on_complete) = resolution.on_complete {
                on_complete();
            }
            if let Some(on_resolved) = resolution.on_resolved {
                on_resolved();
            }
        }

        Ok(())
    }
}

impl fmt::Debug for DeliveryTracker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.inner.state.lock();
        f.debug_struct("DeliveryTracker")
            .field("channel", &self.inner.channel)
            .field("subscribers", &state.outcomes.len())
            .field("pending", &state.pending)
            .field("resolved", &state.resolved)
            .finish()
    }
}
