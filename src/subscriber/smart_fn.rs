use async_trait::async_trait;

use crate::error::Reaction;
use crate::event::AnyEvent;
use crate::subscriber::SmartSubscriber;

/// Smart subscriber built from an interest predicate and an async closure.
pub struct SmartFn<P, F> {
    interested: P,
    f: F,
    name: &'static str,
}

impl<P, F> SmartFn<P, F> {
    #[inline]
    pub fn new(interested: P, f: F) -> Self {
        Self {
            interested,
            f,
            name: std::any::type_name::<F>(),
        }
    }

    #[inline]
    pub fn named(mut self, name: &'static str) -> Self {
        self.name = name;
        self
    }
}

#[async_trait]
impl<P, F, Fut> SmartSubscriber for SmartFn<P, F>
where
    P: Fn(&AnyEvent) -> bool + Send + Sync + 'static,
    F: Fn(AnyEvent) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Reaction> + Send + 'static,
{
    #[inline]
    fn interested(&self, event: &AnyEvent) -> bool {
        (self.interested)(event)
    }

    #[inline]
    async fn on_event(&self, event: AnyEvent) -> Reaction {
        (self.f)(event).await
    }

    fn name(&self) -> &'static str {
        self.name
    }
}

#[inline]
pub fn smart_fn<P, F, Fut>(interested: P, f: F) -> SmartFn<P, F>
where
    P: Fn(&AnyEvent) -> bool + Send + Sync + 'static,
    F: Fn(AnyEvent) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Reaction> + Send + 'static,
{
    SmartFn::new(interested, f)
}
