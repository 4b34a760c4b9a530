//! Subscription contracts.
//!
//! Two kinds of subscriber exist:
//! - [`Subscriber`] is bound to exactly one event type and only sees events of
//!   that topic.
//! - [`SmartSubscriber`] is bound to no type. Every channel offers it every
//!   event and it picks what it wants through [`SmartSubscriber::interested`].
//!
//! Both may name an [`Executor`]. With one, reactions are submitted to it and
//! the delivery worker moves on. Without one, reactions run inline on the
//! worker, in order, and a failing reaction is logged and skipped.

mod from_fn;
mod offload;
mod smart_fn;

use std::sync::Arc;

use async_trait::async_trait;

use crate::error::Reaction;
use crate::event::{AnyEvent, Event};
use crate::executor::Executor;

pub use from_fn::*;
pub use offload::*;
pub use smart_fn::*;

/// Type-scoped subscriber.
#[async_trait]
pub trait Subscriber: Send + Sync + 'static {
    /// The single topic this subscriber listens to.
    type Event: Event;

    async fn on_event(&self, event: Arc<Self::Event>) -> Reaction;

    /// Where reactions run. `None` means inline on the delivery worker.
    fn executor(&self) -> Option<Arc<dyn Executor>> {
        None
    }

    /// Name used in logs.
    fn name(&self) -> &'static str {
        std::any::type_name::<Self>()
    }
}

/// Cross-topic subscriber with a per-event interest filter.
#[async_trait]
pub trait SmartSubscriber: Send + Sync + 'static {
    /// Called once per event per channel before [`Self::on_event`].
    fn interested(&self, event: &AnyEvent) -> bool;

    async fn on_event(&self, event: AnyEvent) -> Reaction;

    fn executor(&self) -> Option<Arc<dyn Executor>> {
        None
    }

    fn name(&self) -> &'static str {
        std::any::type_name::<Self>()
    }
}

/// Membership key of a subscriber: the address of its shared allocation.
pub(crate) type SubscriberId = usize;

pub(crate) fn identity<T: ?Sized>(subscriber: &Arc<T>) -> SubscriberId {
    Arc::as_ptr(subscriber).cast::<()>() as usize
}
