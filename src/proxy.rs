use crate::channel::Channel;
use crate::event::{Event, Topic};
use std::any::Any;

/// Type-erased channel as stored in the registry.
pub(crate) trait ChannelProxy: Send + Sync + 'static {
    fn as_any(&self) -> &dyn Any;

    fn topic(&self) -> Topic;

    fn stop(&self) -> bool;
}

impl<E: Event> ChannelProxy for Channel<E> {
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn topic(&self) -> Topic {
        Channel::topic(self)
    }

    fn stop(&self) -> bool {
        Channel::stop(self)
    }
}

impl dyn ChannelProxy {
    /// Recovers the typed channel. Registry entries are keyed by the event's
    /// `TypeId`, so the lookup key already guarantees the type.
    pub(crate) fn as_channel<E: Event>(&self) -> Option<&Channel<E>> {
        self.as_any().downcast_ref::<Channel<E>>()
    }
}
