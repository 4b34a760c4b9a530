use std::marker::PhantomData;
use std::sync::Arc;

use async_trait::async_trait;

use crate::error::Reaction;
use crate::event::Event;
use crate::subscriber::Subscriber;

/// Type-scoped subscriber backed by an async closure.
pub struct FromFn<E, F> {
    f: F,
    name: &'static str,
    _event: PhantomData<fn(Arc<E>)>,
}

impl<E, F> FromFn<E, F> {
    #[inline]
    pub fn new(f: F) -> Self {
        Self {
            f,
            name: std::any::type_name::<F>(),
            _event: PhantomData,
        }
    }

    /// Replaces the closure's type name in logs.
    #[inline]
    pub fn named(mut self, name: &'static str) -> Self {
        self.name = name;
        self
    }
}

#[async_trait]
impl<E, F, Fut> Subscriber for FromFn<E, F>
where
    E: Event,
    F: Fn(Arc<E>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Reaction> + Send + 'static,
{
    type Event = E;

    #[inline]
    async fn on_event(&self, event: Arc<E>) -> Reaction {
        (self.f)(event).await
    }

    fn name(&self) -> &'static str {
        self.name
    }
}

#[inline]
pub fn from_fn<E, F, Fut>(f: F) -> FromFn<E, F>
where
    E: Event,
    F: Fn(Arc<E>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Reaction> + Send + 'static,
{
    FromFn::new(f)
}
