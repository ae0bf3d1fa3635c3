// Copyright The AckBus Authors
// SPDX-License-Identifier: Apache-2.0

//! Cooperative wait/signal condition backing publish backpressure.
//!
//! # No missed wakeups
//!
//! The classic condition-variable hazard is a signal landing between the
//! predicate check and the suspension. [`Gate::wait`] arms the wait by
//! snapshotting an epoch counter *before* the caller re-checks its predicate;
//! [`Gate::signal`] bumps the epoch and wakes everyone. A wait armed before a
//! signal therefore always resolves, even if the caller only polls it after
//! the signal already fired. The gate carries no payload -- callers loop and
//! re-check their predicate (`pending < max_pending || closed`) around each
//! wait.
//!
//! # Waker registration
//!
//! `has_waiters` lets `signal()` skip the mutex entirely when nobody is
//! blocked, the common case on an unconstrained channel. `register()`
//! deduplicates via `Waker::will_wake` so a waiter polled repeatedly between
//! signals does not grow the list.

use parking_lot::Mutex;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::task::{Context, Poll, Waker};

pub(crate) struct Gate {
    epoch: AtomicU64,
    has_waiters: AtomicBool,
    wakers: Mutex<Vec<Waker>>,
}

impl Gate {
    pub(crate) fn new() -> Self {
        Self {
            epoch: AtomicU64::new(0),
            has_waiters: AtomicBool::new(false),
            wakers: Mutex::new(Vec::new()),
        }
    }

    /// Arms a wait against the current epoch. The returned future resolves
    /// once `signal` has been called at least once after this point.
    pub(crate) fn wait(&self) -> GateWait<'_> {
        GateWait {
            gate: self,
            armed_at: self.epoch.load(Ordering::Acquire),
        }
    }

    /// Releases every armed waiter.
    pub(crate) fn signal(&self) {
        let _ = self.epoch.fetch_add(1, Ordering::AcqRel);
        if !self.has_waiters.load(Ordering::Acquire) {
            return;
        }
        let wakers = {
            let mut wakers = self.wakers.lock();
            self.has_waiters.store(false, Ordering::Release);
            std::mem::take(&mut *wakers)
        };
        for waker in wakers {
            waker.wake();
        }
    }

    fn register(&self, waker: &Waker) {
        let mut wakers = self.wakers.lock();
        for existing in wakers.iter_mut() {
            if existing.will_wake(waker) {
                existing.clone_from(waker);
                return;
            }
        }
        wakers.push(waker.clone());
        self.has_waiters.store(true, Ordering::Release);
    }
}

pub(crate) struct GateWait<'a> {
    gate: &'a Gate,
    armed_at: u64,
}

impl Future for GateWait<'_> {
    type Output = ();

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<()> {
        if self.gate.epoch.load(Ordering::Acquire) != self.armed_at {
            return Poll::Ready(());
        }
        self.gate.register(cx.waker());
        // Re-check after registration: a signal may have raced in between the
        // first load and the waker landing in the list.
        if self.gate.epoch.load(Ordering::Acquire) != self.armed_at {
            Poll::Ready(())
        } else {
            Poll::Pending
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    #[tokio::test]
    async fn signal_after_arming_releases_the_waiter() {
        let gate = Arc::new(Gate::new());
        let wait = gate.wait();

        let signaler = Arc::clone(&gate);
        let handle = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            signaler.signal();
        });

        tokio::time::timeout(Duration::from_secs(1), wait)
            .await
            .expect("armed wait should resolve after signal");
        handle.await.expect("signaler task should finish");
    }

    #[tokio::test]
    async fn signal_between_arming_and_polling_is_not_lost() {
        let gate = Gate::new();
        let wait = gate.wait();
        gate.signal();
        tokio::time::timeout(Duration::from_millis(100), wait)
            .await
            .expect("wait armed before the signal must resolve");
    }

    #[tokio::test]
    async fn wait_armed_after_signal_keeps_waiting() {
        let gate = Gate::new();
        gate.signal();
        let wait = gate.wait();
        let outcome = tokio::time::timeout(Duration::from_millis(50), wait).await;
        assert!(outcome.is_err(), "stale signals must not satisfy new waits");
    }

    #[tokio::test]
    async fn one_signal_releases_all_waiters() {
        let gate = Arc::new(Gate::new());
        let mut handles = Vec::new();
        for _ in 0..4 {
            let gate = Arc::clone(&gate);
            handles.push(tokio::spawn(async move { gate.wait().await }));
        }
        // Let every waiter arm and park.
        tokio::time::sleep(Duration::from_millis(20)).await;
        gate.signal();
        for handle in handles {
            tokio::time::timeout(Duration::from_secs(1), handle)
                .await
                .expect("every waiter should be released by one signal")
                .expect("waiter task should not panic");
        }
    }
}
