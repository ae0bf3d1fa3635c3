// Copyright The AckBus Authors
// SPDX-License-Identifier: Apache-2.0

//! Subscriber handler contract.

use crate::channel::delivery::Delivery;
use async_trait::async_trait;
use std::future::Future;

/// Error type subscriber handlers may fail with.
///
/// A failing (or panicking) handler is a local event: the dispatch task logs
/// it and nacks the delivery; nothing reaches the publisher.
pub type HandlerError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Receives deliveries dispatched by a channel.
///
/// The handler must resolve its [`Delivery`] exactly once -- `ack`, `nack`,
/// or let the channel's timeout do it. Returning an error counts as a fault
/// and nacks the delivery if it is still pending.
#[async_trait]
pub trait Subscriber: Send + Sync {
    /// Handles one delivery.
    async fn handle(&self, delivery: Delivery) -> Result<(), HandlerError>;
}

/// Adapter turning an async closure into a [`Subscriber`].
pub(crate) struct FnSubscriber<F> {
    handler: F,
}

impl<F> FnSubscriber<F> {
    pub(crate) fn new(handler: F) -> Self {
        Self { handler }
    }
}

#[async_trait]
impl<F, Fut> Subscriber for FnSubscriber<F>
where
    F: Fn(Delivery) -> Fut + Send + Sync,
    Fut: Future<Output = Result<(), HandlerError>> + Send + 'static,
{
    async fn handle(&self, delivery: Delivery) -> Result<(), HandlerError> {
        (self.handler)(delivery).await
    }
}
