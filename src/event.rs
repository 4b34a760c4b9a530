use std::any::{Any, TypeId};
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

/// Anything that can travel through the bus. The concrete type is the topic.
pub trait Event: Send + Sync + 'static {}

impl<T: Send + Sync + 'static> Event for T {}

/// Routing key of a channel: the identity of a concrete event type.
#[derive(Clone, Copy)]
pub struct Topic {
    id: TypeId,
    name: &'static str,
}

impl Topic {
    pub fn of<E: Event>() -> Self {
        Self {
            id: TypeId::of::<E>(),
            name: std::any::type_name::<E>(),
        }
    }

    pub fn id(&self) -> TypeId {
        self.id
    }

    pub fn name(&self) -> &'static str {
        self.name
    }
}

impl PartialEq for Topic {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for Topic {}

impl Hash for Topic {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl fmt::Debug for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Topic").field(&self.name).finish()
    }
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name)
    }
}

/// Type-erased view of a published event, handed to smart subscribers.
///
/// Cloning is cheap: the payload is shared with every other subscriber of
/// the same delivery.
#[derive(Clone)]
pub struct AnyEvent {
    topic: Topic,
    payload: Arc<dyn Any + Send + Sync>,
}

impl AnyEvent {
    pub(crate) fn new<E: Event>(payload: Arc<E>) -> Self {
        Self {
            topic: Topic::of::<E>(),
            payload,
        }
    }

    pub fn topic(&self) -> Topic {
        self.topic
    }

    pub fn is<E: Event>(&self) -> bool {
        (*self.payload).is::<E>()
    }

    pub fn downcast_ref<E: Event>(&self) -> Option<&E> {
        (*self.payload).downcast_ref::<E>()
    }

    /// Recovers the typed payload, handing `self` back on a type mismatch.
    pub fn downcast<E: Event>(self) -> Result<Arc<E>, Self> {
        let topic = self.topic;
        self.payload
            .downcast::<E>()
            .map_err(|payload| Self { topic, payload })
    }
}

impl fmt::Debug for AnyEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AnyEvent")
            .field("topic", &self.topic)
            .finish_non_exhaustive()
    }
}
