// Copyright The AckBus Authors
// SPDX-License-Identifier: Apache-2.0

//! Channel internals -- the core of the crate.
//!
//! # Publish protocol
//!
//! One publish runs through: closed check, type gate, throttle, backpressure
//! admission, then fan-out. Admission and fan-out share a single acquisition
//! of the channel lock: the subscriber snapshot, tracker registration, and
//! delivery registration are atomic with respect to every other channel
//! operation. Handler tasks and timeout timers are spawned only after the
//! lock is released, in ascending subscriber-id order.
//!
//! Taking the snapshot and looking up handlers under one lock also closes a
//! gap the protocol otherwise has: a subscriber removed "between snapshot and
//! dispatch" would leave its tracker slot pending forever. Here there is no
//! such window -- an id in the snapshot always has a handler at dispatch
//! time.
//!
//! # Throttle
//!
//! With `throttle` in `(0, 1)` and a bound configured, a publish that finds
//! `remaining_ratio = (max_pending - pending) / max_pending` at or below the
//! threshold sleeps for `1 / (max_pending * remaining_ratio)` seconds -- the
//! delay grows asymptotically as capacity runs out. A full channel skips the
//! formula; the admission wait blocks instead.
//!
//! # Locking
//!
//! All mutable channel state sits behind one mutex. The lock is never held
//! across an `.await`, and no delivery or tracker method is called while
//! holding it; resolution callbacks re-enter the channel lock on their own.

use crate::channel::dead_letter::DeadLetterQueue;
use crate::channel::delivery::{Delivery, ResolveFn};
use crate::channel::gate::Gate;
use crate::channel::message::{Message, TypeConstraint};
use crate::channel::subscriber::{FnSubscriber, HandlerError, Subscriber};
use crate::channel::tracker::DeliveryTracker;
use crate::channel::types::SubscriberId;
use crate::error::{Error, Result};
use crate::stats::{Counters, Metric};
use ackbus_config::{ChannelName, ChannelSettings};
use futures::FutureExt;
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tracing::{debug, error};

/// A named publish/subscribe channel.
///
/// Cheaply cloneable handle; clones share the same underlying state.
#[derive(Clone)]
pub struct Channel {
    inner: Arc<ChannelInner>,
}

struct ChannelInner {
    name: ChannelName,
    constraint: Option<TypeConstraint>,
    timeout: Option<Duration>,
    max_pending: Option<usize>,
    throttle: f64,
    counters: Counters,
    dead_letters: DeadLetterQueue,
    capacity: Gate,
    state: Mutex<ChannelState>,
}

struct ChannelState {
    subscribers: BTreeMap<SubscriberId, Arc<dyn Subscriber>>,
    next_id: SubscriberId,
    // In-flight publishes, keyed by publish sequence. Bounded by max_pending.
    pending: HashMap<u64, DeliveryTracker>,
    // Unresolved deliveries across all pending publishes.
    active: HashMap<(u64, SubscriberId), Delivery>,
    next_publish_seq: u64,
    closed: bool,
}

/// What a publish admission produced under the channel lock.
enum Admitted {
    /// No subscribers; the caller synthesizes the sentinel dead letter.
    Unrouted(Message),
    /// Fan-out registered; the caller arms timers and spawns handlers.
    Dispatch {
        tracker: DeliveryTracker,
        deliveries: Vec<(Delivery, Arc<dyn Subscriber>)>,
    },
}

impl Channel {
    /// Creates a standalone channel with its own counter map.
    ///
    /// Fails with [`Error::InvalidChannelConfig`] when the settings are
    /// inconsistent: a throttle without a bound, a throttle outside `(0, 1)`,
    /// or a zero bound.
    pub fn new(name: impl Into<ChannelName>, settings: ChannelSettings) -> Result<Self> {
        Self::build(name.into(), settings, None, Counters::new())
    }

    /// Creates a standalone channel whose payloads must be of type `T`.
    pub fn with_constraint<T: std::any::Any>(
        name: impl Into<ChannelName>,
        settings: ChannelSettings,
    ) -> Result<Self> {
        Self::build(
            name.into(),
            settings,
            Some(TypeConstraint::of::<T>()),
            Counters::new(),
        )
    }

    pub(crate) fn build(
        name: ChannelName,
        settings: ChannelSettings,
        constraint: Option<TypeConstraint>,
        counters: Counters,
    ) -> Result<Self> {
        if settings.throttle != 0.0 {
            if settings.max_pending.is_none() {
                return Err(Error::InvalidChannelConfig {
                    channel: name,
                    reason: "throttle requires max_pending".to_owned(),
                });
            }
            if settings.throttle <= 0.0 || settings.throttle >= 1.0 {
                return Err(Error::InvalidChannelConfig {
                    channel: name,
                    reason: format!(
                        "throttle must be within (0, 1), got {}",
                        settings.throttle
                    ),
                });
            }
        }
        if settings.max_pending == Some(0) {
            return Err(Error::InvalidChannelConfig {
                channel: name,
                reason: "max_pending must be positive".to_owned(),
            });
        }

        Ok(Self {
            inner: Arc::new(ChannelInner {
                name,
                constraint,
                timeout: settings.timeout,
                max_pending: settings.max_pending,
                throttle: settings.throttle,
                counters,
                dead_letters: DeadLetterQueue::new(),
                capacity: Gate::new(),
                state: Mutex::new(ChannelState {
                    subscribers: BTreeMap::new(),
                    next_id: SubscriberId::first(),
                    pending: HashMap::new(),
                    active: HashMap::new(),
                    next_publish_seq: 0,
                    closed: false,
                }),
            }),
        })
    }

    /// Registers a subscriber and returns its id.
    ///
    /// Ids are monotonic starting at 1 and never reused. Fails with
    /// [`Error::ChannelClosed`] once the channel is closed.
    pub fn subscribe(&self, subscriber: Arc<dyn Subscriber>) -> Result<SubscriberId> {
        let mut state = self.inner.state.lock();
        if state.closed {
            return Err(Error::ChannelClosed {
                channel: self.inner.name.clone(),
            });
        }
        let id = state.next_id;
        state.next_id = id.next();
        let _ = state.subscribers.insert(id, subscriber);
        Ok(id)
    }

    /// Registers an async closure as a subscriber.
    pub fn subscribe_fn<F, Fut>(&self, handler: F) -> Result<SubscriberId>
    where
        F: Fn(Delivery) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = std::result::Result<(), HandlerError>> + Send + 'static,
    {
        self.subscribe(Arc::new(FnSubscriber::new(handler)))
    }

    /// Removes a subscriber by id. No-op when absent. Deliveries already in
    /// flight for this subscriber are unaffected.
    pub fn unsubscribe(&self, id: SubscriberId) {
        let _ = self.inner.state.lock().subscribers.remove(&id);
    }

    /// Removes a subscriber by handler reference (pointer equality). No-op
    /// when absent.
    pub fn unsubscribe_handler(&self, subscriber: &Arc<dyn Subscriber>) {
        self.inner
            .state
            .lock()
            .subscribers
            .retain(|_, existing| !Arc::ptr_eq(existing, subscriber));
    }

    /// Publishes a message to every current subscriber.
    ///
    /// Suspends on the throttle and, when bounded, on the backpressure gate.
    /// Returns the publish's [`DeliveryTracker`], or `None` when the channel
    /// had no subscribers (the message is dead-lettered with the
    /// [`SubscriberId::UNROUTED`] sentinel).
    pub async fn publish(&self, message: Message) -> Result<Option<DeliveryTracker>> {
        if self.is_closed() {
            return Err(Error::ChannelClosed {
                channel: self.inner.name.clone(),
            });
        }

        if let Some(constraint) = &self.inner.constraint {
            if !constraint.admits(&message) {
                return Err(Error::TypeMismatch {
                    channel: self.inner.name.clone(),
                    expected: constraint.name(),
                    actual: message.type_name(),
                });
            }
        }

        self.apply_throttle().await;

        match self.admit(message).await? {
            Admitted::Unrouted(message) => {
                self.dead_letter_unrouted(message)?;
                Ok(None)
            }
            Admitted::Dispatch {
                tracker,
                deliveries,
            } => {
                for (delivery, subscriber) in deliveries {
                    if let Some(timeout) = self.inner.timeout {
                        delivery.arm_timeout(timeout);
                    }
                    self.spawn_handler(subscriber, delivery);
                }
                Ok(Some(tracker))
            }
        }
    }

    /// Closes the channel: every still-pending delivery is nacked (routing it
    /// to the dead-letter queue), and blocked publishers are woken to observe
    /// the closure. Idempotent.
    pub fn close(&self) {
        let victims: Vec<Delivery> = {
            let mut state = self.inner.state.lock();
            if state.closed {
                return;
            }
            state.closed = true;
            state.active.values().cloned().collect()
        };
        debug!(
            channel = %self.inner.name,
            in_flight = victims.len(),
            "closing channel"
        );
        for delivery in victims {
            match delivery.nack() {
                Ok(()) => {}
                // Lost the race against an ack or timeout; already settled.
                Err(Error::DeliveryAlreadyResolved { .. }) => {}
                Err(err) => error!(
                    channel = %self.inner.name,
                    error = %err,
                    "failed to nack delivery during close"
                ),
            }
        }
        self.inner.capacity.signal();
    }

    /// Hard reset: cancels every pending timeout, discards in-flight
    /// deliveries and trackers, empties the dead-letter queue, and wakes
    /// blocked publishers. Does not close the channel.
    pub fn clear(&self) {
        let (active, pending) = {
            let mut state = self.inner.state.lock();
            (
                std::mem::take(&mut state.active),
                std::mem::take(&mut state.pending),
            )
        };
        debug!(
            channel = %self.inner.name,
            in_flight = active.len(),
            publishes = pending.len(),
            "clearing channel"
        );
        for delivery in active.values() {
            delivery.cancel_timeout();
        }
        drop(pending);
        self.inner.dead_letters.clear();
        self.inner.capacity.signal();
    }

    /// Name of this channel.
    #[must_use]
    pub fn name(&self) -> &ChannelName {
        &self.inner.name
    }

    /// Number of current subscribers.
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.inner.state.lock().subscribers.len()
    }

    /// Number of publishes still awaiting full resolution.
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.inner.state.lock().pending.len()
    }

    /// Returns `true` while any publish is awaiting resolution.
    #[must_use]
    pub fn is_pending(&self) -> bool {
        self.pending_count() > 0
    }

    /// Returns `true` once the channel is closed.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.inner.state.lock().closed
    }

    /// Handle to this channel's dead-letter queue.
    #[must_use]
    pub fn dead_letters(&self) -> DeadLetterQueue {
        self.inner.dead_letters.clone()
    }

    /// Handle to the counter map this channel records into.
    #[must_use]
    pub fn counters(&self) -> Counters {
        self.inner.counters.clone()
    }

    /// Cooperatively delays the publish when remaining capacity has shrunk
    /// to the throttle threshold.
    async fn apply_throttle(&self) {
        if self.inner.throttle == 0.0 {
            return;
        }
        let Some(max_pending) = self.inner.max_pending else {
            return;
        };
        let pending = self.pending_count();
        let remaining = max_pending.saturating_sub(pending);
        if remaining == 0 {
            // Full: the admission wait blocks instead of sleeping here.
            return;
        }
        let ratio = remaining as f64 / max_pending as f64;
        if ratio <= self.inner.throttle {
            self.inner
                .counters
                .record(&self.inner.name, Metric::Throttled);
            let delay = 1.0 / (max_pending as f64 * ratio);
            debug!(
                channel = %self.inner.name,
                remaining_ratio = ratio,
                delay_secs = delay,
                "throttling publish"
            );
            tokio::time::sleep(Duration::from_secs_f64(delay)).await;
        }
    }

    /// Waits for capacity (when bounded), then snapshots subscribers and
    /// registers the publish, all under one lock acquisition.
    async fn admit(&self, message: Message) -> Result<Admitted> {
        let mut message = Some(message);
        loop {
            // Arm before checking the predicate so a resolution signaled
            // between the check and the await is never missed.
            let wait = self.inner.capacity.wait();
            {
                let mut state = self.inner.state.lock();
                if state.closed {
                    return Err(Error::ChannelClosed {
                        channel: self.inner.name.clone(),
                    });
                }
                let has_room = self
                    .inner
                    .max_pending
                    .map_or(true, |max| state.pending.len() < max);
                if has_room {
                    let message = message
                        .take()
                        .expect("message is consumed exactly once by admission");
                    return Ok(self.register_publish(&mut state, message));
                }
            }
            wait.await;
        }
    }

    /// Builds and registers the tracker and deliveries for one publish.
    /// Runs under the channel lock owned by the caller.
    fn register_publish(&self, state: &mut ChannelState, message: Message) -> Admitted {
        if state.subscribers.is_empty() {
            return Admitted::Unrouted(message);
        }

        let seq = state.next_publish_seq;
        state.next_publish_seq += 1;

        let tracker = DeliveryTracker::new(
            message.clone(),
            self.inner.name.clone(),
            state.subscribers.keys().copied(),
        );
        tracker.set_resolution_hook({
            let channel = Arc::downgrade(&self.inner);
            Box::new(move |fully_delivered| {
                if let Some(channel) = channel.upgrade() {
                    let _ = channel.state.lock().pending.remove(&seq);
                    if fully_delivered {
                        channel.counters.record(&channel.name, Metric::Delivered);
                    }
                    channel.capacity.signal();
                }
            })
        });
        let _ = state.pending.insert(seq, tracker.clone());

        let mut deliveries = Vec::with_capacity(state.subscribers.len());
        for (&id, subscriber) in &state.subscribers {
            let delivery = Delivery::new(
                message.clone(),
                self.inner.name.clone(),
                id,
                Some(self.on_ack(seq, &tracker)),
                Some(self.on_nack(seq, &tracker)),
            );
            let _ = state.active.insert((seq, id), delivery.clone());
            deliveries.push((delivery, Arc::clone(subscriber)));
        }

        Admitted::Dispatch {
            tracker,
            deliveries,
        }
    }

    /// Resolution callback for an acked delivery: drop it from the active
    /// set, then record the ack in the tracker.
    fn on_ack(&self, seq: u64, tracker: &DeliveryTracker) -> ResolveFn {
        let channel = Arc::downgrade(&self.inner);
        let tracker = tracker.clone();
        Box::new(move |delivery| {
            remove_active(&channel, seq, delivery.subscriber_id());
            tracker.ack(delivery.subscriber_id())
        })
    }

    /// Resolution callback for a nacked delivery: drop it from the active
    /// set, dead-letter it, bump the counters, then record the nack in the
    /// tracker. The dead letter lands before the tracker resolves, so an
    /// observer woken by the resolution always sees it.
    fn on_nack(&self, seq: u64, tracker: &DeliveryTracker) -> ResolveFn {
        let channel = Arc::downgrade(&self.inner);
        let tracker = tracker.clone();
        Box::new(move |delivery| {
            remove_active(&channel, seq, delivery.subscriber_id());
            if let Some(channel) = channel.upgrade() {
                channel.dead_letters.push(delivery.clone());
                channel
                    .counters
                    .record(&channel.name, Metric::DeadLettered);
                let metric = if delivery.timed_out() {
                    Metric::TimedOut
                } else {
                    Metric::Nacked
                };
                channel.counters.record(&channel.name, metric);
            }
            tracker.nack(delivery.subscriber_id())
        })
    }

    /// Dead-letters a publish that found no subscribers, under the
    /// [`SubscriberId::UNROUTED`] sentinel.
    fn dead_letter_unrouted(&self, message: Message) -> Result<()> {
        let delivery = Delivery::new(
            message,
            self.inner.name.clone(),
            SubscriberId::UNROUTED,
            None,
            None,
        );
        delivery.nack()?;
        self.inner.dead_letters.push(delivery);
        self.inner.counters.record(&self.inner.name, Metric::Nacked);
        self.inner
            .counters
            .record(&self.inner.name, Metric::DeadLettered);
        Ok(())
    }

    /// Runs the subscriber handler in its own task. Faults -- errors and
    /// panics alike -- are logged and turn into a nack when the delivery is
    /// still pending.
    fn spawn_handler(&self, subscriber: Arc<dyn Subscriber>, delivery: Delivery) {
        let channel = self.inner.name.clone();
        let _ = tokio::spawn(async move {
            let subscriber_id = delivery.subscriber_id();
            let outcome = AssertUnwindSafe(subscriber.handle(delivery.clone()))
                .catch_unwind()
                .await;
            let fault = match outcome {
                Ok(Ok(())) => None,
                Ok(Err(err)) => Some(err.to_string()),
                Err(panic) => Some(panic_message(panic.as_ref())),
            };
            if let Some(fault) = fault {
                error!(
                    channel = %channel,
                    subscriber = %subscriber_id,
                    fault = %fault,
                    "subscriber handler failed"
                );
                match delivery.nack() {
                    Ok(()) => {}
                    // Resolved concurrently (ack, nack, or timeout) before
                    // the fault path got there.
                    Err(Error::DeliveryAlreadyResolved { .. }) => {}
                    Err(err) => error!(
                        channel = %channel,
                        subscriber = %subscriber_id,
                        error = %err,
                        "failed to nack faulted delivery"
                    ),
                }
            }
        });
    }
}

/// Drops a delivery from the channel's active set, if the channel is still
/// alive.
fn remove_active(channel: &Weak<ChannelInner>, seq: u64, subscriber: SubscriberId) {
    if let Some(channel) = channel.upgrade() {
        let _ = channel.state.lock().active.remove(&(seq, subscriber));
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        (*message).to_owned()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "subscriber handler panicked".to_owned()
    }
}

impl fmt::Debug for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.inner.state.lock();
        f.debug_struct("Channel")
            .field("name", &self.inner.name)
            .field("subscribers", &state.subscribers.len())
            .field("pending", &state.pending.len())
            .field("closed", &state.closed)
            .finish()
    }
}
