// Copyright The AckBus Authors
// SPDX-License-Identifier: Apache-2.0

//! The per-subscriber delivery envelope.
//!
//! One [`Delivery`] exists per (message, subscriber) pair. Its lifecycle is a
//! race: the subscriber's ack or nack against the channel's acknowledgment
//! timeout. Whichever transition happens first wins; the state machine is
//! strictly `Pending -> Acked` or `Pending -> Nacked`, exactly once.
//!
//! # Resolution callbacks
//!
//! The channel wires `on_ack`/`on_nack` at construction. Each is a single
//! `FnOnce` slot consumed by the winning transition, so a callback can never
//! fire twice. Callbacks run on the resolving task with no locks held, and
//! their errors propagate to the `ack`/`nack` caller.
//!
//! # Timeout race
//!
//! The timeout task sleeps, then re-checks the state: finding the delivery
//! already resolved is a no-op. Cancellation via [`Delivery::cancel_timeout`]
//! or a terminal transition is therefore advisory -- the guard handles the
//! race either way.

use crate::channel::message::Message;
use crate::channel::types::{Outcome, SubscriberId};
use crate::error::{Error, Result};
use ackbus_config::ChannelName;
use parking_lot::Mutex;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error};

/// Callback invoked exactly once when a delivery resolves.
pub(crate) type ResolveFn = Box<dyn FnOnce(&Delivery) -> Result<()> + Send>;

/// A single message handed to a single subscriber, awaiting acknowledgment.
///
/// Cheaply cloneable handle; clones share the same underlying state.
#[derive(Clone)]
pub struct Delivery {
    inner: Arc<DeliveryInner>,
}

struct DeliveryInner {
    message: Message,
    channel: ChannelName,
    subscriber_id: SubscriberId,
    state: Mutex<DeliveryState>,
}

struct DeliveryState {
    outcome: Outcome,
    timed_out: bool,
    timeout_task: Option<tokio::task::JoinHandle<()>>,
    on_ack: Option<ResolveFn>,
    on_nack: Option<ResolveFn>,
}

impl Delivery {
    pub(crate) fn new(
        message: Message,
        channel: ChannelName,
        subscriber_id: SubscriberId,
        on_ack: Option<ResolveFn>,
        on_nack: Option<ResolveFn>,
    ) -> Self {
        Self {
            inner: Arc::new(DeliveryInner {
                message,
                channel,
                subscriber_id,
                state: Mutex::new(DeliveryState {
                    outcome: Outcome::Pending,
                    timed_out: false,
                    timeout_task: None,
                    on_ack,
                    on_nack,
                }),
            }),
        }
    }

    /// Positively acknowledges this delivery.
    ///
    /// Fails with [`Error::DeliveryAlreadyResolved`] on a second resolution.
    /// Errors raised by the resolution callback propagate to this caller.
    pub fn ack(&self) -> Result<()> {
        match self.transition(Outcome::Acked, false)? {
            Some(callback) => callback(self),
            None => Ok(()),
        }
    }

    /// Negatively acknowledges this delivery.
    ///
    /// Same contract as [`ack`](Self::ack); the channel's callback routes the
    /// delivery to the dead-letter queue.
    pub fn nack(&self) -> Result<()> {
        match self.transition(Outcome::Nacked, false)? {
            Some(callback) => callback(self),
            None => Ok(()),
        }
    }

    /// Stops the timeout task without resolving the delivery. Idempotent.
    pub fn cancel_timeout(&self) {
        let task = self.inner.state.lock().timeout_task.take();
        if let Some(task) = task {
            task.abort();
        }
    }

    /// Returns `true` while neither ack, nack, nor timeout has happened.
    #[must_use]
    pub fn is_pending(&self) -> bool {
        self.inner.state.lock().outcome.is_pending()
    }

    /// Returns `true` once positively acknowledged.
    #[must_use]
    pub fn is_acked(&self) -> bool {
        self.inner.state.lock().outcome == Outcome::Acked
    }

    /// Returns `true` once negatively acknowledged.
    #[must_use]
    pub fn is_nacked(&self) -> bool {
        self.inner.state.lock().outcome == Outcome::Nacked
    }

    /// Returns `true` when the nack was caused by the acknowledgment timeout.
    #[must_use]
    pub fn timed_out(&self) -> bool {
        self.inner.state.lock().timed_out
    }

    /// The delivered payload.
    #[must_use]
    pub fn message(&self) -> &Message {
        &self.inner.message
    }

    /// Name of the channel this delivery came from.
    #[must_use]
    pub fn channel(&self) -> &ChannelName {
        &self.inner.channel
    }

    /// The subscriber this delivery is addressed to.
    #[must_use]
    pub fn subscriber_id(&self) -> SubscriberId {
        self.inner.subscriber_id
    }

    /// Schedules the auto-nack task: sleep for `timeout`, then nack the
    /// delivery if it is still pending.
    pub(crate) fn arm_timeout(&self, timeout: Duration) {
        let delivery = self.clone();
        let task = tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            delivery.fire_timeout();
        });

        let mut state = self.inner.state.lock();
        if state.outcome.is_pending() && state.timeout_task.is_none() {
            state.timeout_task = Some(task);
        } else {
            // Resolved (or re-armed) before the handle could be stored.
            task.abort();
        }
    }

    fn fire_timeout(&self) {
        match self.transition(Outcome::Nacked, true) {
            Ok(Some(callback)) => {
                debug!(
                    channel = %self.inner.channel,
                    subscriber = %self.inner.subscriber_id,
                    "delivery timed out"
                );
                if let Err(err) = callback(self) {
                    error!(
                        channel = %self.inner.channel,
                        subscriber = %self.inner.subscriber_id,
                        error = %err,
                        "resolution callback failed after timeout"
                    );
                }
            }
            Ok(None) => {}
            // Already resolved while the timer slept; nothing to do.
            Err(_) => {}
        }
    }

    /// Performs the terminal transition under the state lock and returns the
    /// callback to run, which the caller invokes with no locks held.
    fn transition(&self, to: Outcome, from_timeout: bool) -> Result<Option<ResolveFn>> {
        let (task, callback) = {
            let mut state = self.inner.state.lock();
            if !state.outcome.is_pending() {
                return Err(Error::DeliveryAlreadyResolved {
                    channel: self.inner.channel.clone(),
                    subscriber: self.inner.subscriber_id,
                    resolved_as: state.outcome,
                });
            }
            state.outcome = to;
            state.timed_out = from_timeout;
            let callback = match to {
                Outcome::Acked => {
                    state.on_nack = None;
                    state.on_ack.take()
                }
                Outcome::Nacked => {
                    state.on_ack = None;
                    state.on_nack.take()
                }
                Outcome::Pending => None,
            };
            (state.timeout_task.take(), callback)
        };

        if let Some(task) = task {
            // The timeout task aborting itself would be a no-op anyway; skip it.
            if !from_timeout {
                task.abort();
            }
        }
        Ok(callback)
    }
}

impl fmt::Debug for Delivery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.inner.state.lock();
        f.debug_struct("Delivery")
            .field("channel", &self.inner.channel)
            .field("subscriber_id", &self.inner.subscriber_id)
            .field("outcome", &state.outcome)
            .field("timed_out", &state.timed_out)
            .finish()
    }
}
