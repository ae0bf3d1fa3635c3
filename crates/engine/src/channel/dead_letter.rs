// Copyright The AckBus Authors
// SPDX-License-Identifier: Apache-2.0

//! The per-channel dead-letter queue.
//!
//! Failed deliveries -- explicit nacks, timeouts, handler faults, and
//! unrouted publishes -- land here in insertion order with a textual reason.
//! The queue never retries anything; it exists so callers can inspect or
//! replay failures on their own terms.

use crate::channel::delivery::Delivery;
use crate::channel::types::DeadLetterReason;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;
use tracing::warn;

type PushFn = Box<dyn FnMut(&DeadLetter) + Send>;

/// A failed delivery captured for later inspection.
#[derive(Clone)]
pub struct DeadLetter {
    delivery: Delivery,
    reason: DeadLetterReason,
}

impl DeadLetter {
    /// The failed delivery.
    #[must_use]
    pub fn delivery(&self) -> &Delivery {
        &self.delivery
    }

    /// Why it failed: `timeout` when the acknowledgment timeout fired,
    /// `nack` otherwise.
    #[must_use]
    pub fn reason(&self) -> DeadLetterReason {
        self.reason
    }
}

impl fmt::Debug for DeadLetter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeadLetter")
            .field("delivery", &self.delivery)
            .field("reason", &self.reason)
            .finish()
    }
}

/// Insertion-ordered store of failed deliveries.
///
/// Cheaply cloneable handle; clones share the same queue.
#[derive(Clone)]
pub struct DeadLetterQueue {
    inner: Arc<Mutex<QueueState>>,
}

struct QueueState {
    entries: VecDeque<DeadLetter>,
    on_push: Option<PushFn>,
}

impl DeadLetterQueue {
    pub(crate) fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(QueueState {
                entries: VecDeque::new(),
                on_push: None,
            })),
        }
    }

    /// Records a failed delivery. The reason is derived from the delivery's
    /// timed-out flag at push time.
    pub(crate) fn push(&self, delivery: Delivery) {
        let reason = if delivery.timed_out() {
            DeadLetterReason::Timeout
        } else {
            DeadLetterReason::Nack
        };
        warn!(
            channel = %delivery.channel(),
            subscriber = %delivery.subscriber_id(),
            reason = %reason,
            "delivery dead-lettered"
        );
        let entry = DeadLetter { delivery, reason };

        let callback = {
            let mut state = self.inner.lock();
            state.entries.push_back(entry.clone());
            state.on_push.take()
        };
        if let Some(mut callback) = callback {
            callback(&entry);
            let mut state = self.inner.lock();
            if state.on_push.is_none() {
                state.on_push = Some(callback);
            }
        }
    }

    /// Number of stored dead letters.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }

    /// Returns `true` when nothing is stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.lock().entries.is_empty()
    }

    /// Snapshot of the stored dead letters in insertion order.
    #[must_use]
    pub fn entries(&self) -> Vec<DeadLetter> {
        self.inner.lock().entries.iter().cloned().collect()
    }

    /// Empties the queue, returning the previous contents in insertion order.
    pub fn drain(&self) -> Vec<DeadLetter> {
        self.inner.lock().entries.drain(..).collect()
    }

    /// Discards every stored dead letter.
    pub fn clear(&self) {
        self.inner.lock().entries.clear();
    }

    /// Registers the callback fired on every push, replacing any prior
    /// registration.
    pub fn on_push(&self, callback: impl FnMut(&DeadLetter) + Send + 'static) {
        self.inner.lock().on_push = Some(Box::new(callback));
    }
}

impl fmt::Debug for DeadLetterQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeadLetterQueue")
            .field("len", &self.inner.lock().entries.len())
            .finish()
    }
}
