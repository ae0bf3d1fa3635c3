// Copyright The AckBus Authors
// SPDX-License-Identifier: Apache-2.0

//! Dynamically typed payloads and the per-channel type gate.
//!
//! Channels carry opaque payloads; a [`Message`] wraps an arbitrary
//! `Send + Sync` value behind an `Arc` so the same payload is shared by
//! reference across every delivery of one publish -- it is never copied.
//! A channel may carry a [`TypeConstraint`]; compatibility is identity of the
//! payload's top-level type, nothing structural.

use std::any::{Any, TypeId};
use std::fmt;
use std::sync::Arc;

/// An opaque payload published to a channel.
///
/// Cheaply cloneable; clones share the payload.
#[derive(Clone)]
pub struct Message {
    payload: Arc<dyn Any + Send + Sync>,
    type_name: &'static str,
}

impl Message {
    /// Wraps a payload value.
    #[must_use]
    pub fn new<T: Any + Send + Sync>(payload: T) -> Self {
        Self {
            payload: Arc::new(payload),
            type_name: std::any::type_name::<T>(),
        }
    }

    /// Wraps an already-shared payload without copying it.
    #[must_use]
    pub fn from_arc<T: Any + Send + Sync>(payload: Arc<T>) -> Self {
        Self {
            payload,
            type_name: std::any::type_name::<T>(),
        }
    }

    /// Borrows the payload as `T`, if that is its type.
    #[must_use]
    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        self.payload.downcast_ref()
    }

    /// Returns `true` when the payload is a `T`.
    #[must_use]
    pub fn is<T: Any>(&self) -> bool {
        self.payload.is::<T>()
    }

    /// Name of the payload's type, captured at construction.
    #[must_use]
    pub fn type_name(&self) -> &'static str {
        self.type_name
    }

    pub(crate) fn payload_type_id(&self) -> TypeId {
        (*self.payload).type_id()
    }
}

impl fmt::Debug for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Message")
            .field("type_name", &self.type_name)
            .finish()
    }
}

/// A channel's optional payload type gate.
///
/// Built once at channel construction; every publish is checked against it
/// by comparing the payload's top-level `TypeId`.
#[derive(Debug, Clone, Copy)]
pub struct TypeConstraint {
    id: TypeId,
    name: &'static str,
}

impl TypeConstraint {
    /// Constrains a channel to payloads of type `T`.
    #[must_use]
    pub fn of<T: Any>() -> Self {
        Self {
            id: TypeId::of::<T>(),
            name: std::any::type_name::<T>(),
        }
    }

    /// Returns `true` when the message's payload type matches.
    #[must_use]
    pub fn admits(&self, message: &Message) -> bool {
        message.payload_type_id() == self.id
    }

    /// Name of the constrained type, for diagnostics.
    #[must_use]
    pub fn name(&self) -> &'static str {
        self.name
    }
}
