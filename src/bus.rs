use crate::channel::{Channel, EventSupplier, Shared};
use crate::config::BusConfig;
use crate::error::BusError;
use crate::event::{Event, Topic};
use crate::lifecycle::Close;
use crate::proxy::ChannelProxy;
use crate::subscriber::{SmartSubscriber, Subscriber, identity};
use std::any::TypeId;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, OnceLock};
use tracing::{debug, error, info};

static GLOBAL: OnceLock<EventBus> = OnceLock::new();

struct Inner {
    capacity: usize,
    channels: papaya::HashMap<TypeId, Box<dyn ChannelProxy>>,
    shared: Arc<Shared>,
}

impl Inner {
    fn new(config: BusConfig) -> Self {
        Self {
            capacity: config.capacity,
            channels: papaya::HashMap::new(),
            shared: Arc::new(Shared::new(&config)),
        }
    }

    fn channel_or_insert<E: Event>(&self) -> Channel<E> {
        let channels = self.channels.pin();
        let proxy = channels.get_or_insert_with(TypeId::of::<E>(), || {
            Box::new(Channel::<E>::new(self.capacity, Arc::clone(&self.shared)))
                as Box<dyn ChannelProxy>
        });
        match proxy.as_channel::<E>() {
            Some(channel) => channel.clone(),
            None => unreachable!("registry entry for `{}` holds another topic", Topic::of::<E>()),
        }
    }

    fn channel<E: Event>(&self) -> Option<Channel<E>> {
        let channels = self.channels.pin();
        channels
            .get(&TypeId::of::<E>())
            .and_then(|proxy| proxy.as_channel::<E>())
            .cloned()
    }

    /// Stops every channel currently registered. Never panics.
    fn sweep(&self) -> usize {
        let channels = self.channels.pin();
        info!(channels = channels.len(), "stopping channels");

        let mut stopped = 0;
        for (_, proxy) in channels.iter() {
            match std::panic::catch_unwind(AssertUnwindSafe(|| proxy.stop())) {
                Ok(true) => stopped += 1,
                Ok(false) => {}
                Err(_) => error!(topic = %proxy.topic(), "failed to stop channel"),
            }
        }

        info!(stopped, "channel sweep finished");
        stopped
    }
}

impl Drop for Inner {
    fn drop(&mut self) {
        self.sweep();
    }
}

/// Topic registry and public face of the bus.
///
/// Cloning is cheap; clones share channels and subscribers. Dropping the last
/// clone stops every channel.
#[derive(Clone)]
pub struct EventBus {
    inner: Arc<Inner>,
}

impl EventBus {
    pub fn new(config: BusConfig) -> Self {
        Self {
            inner: Arc::new(Inner::new(config)),
        }
    }

    /// Process-wide bus, created with the default configuration on first use.
    ///
    /// It is never dropped; hold a [`ShutdownHook`](crate::ShutdownHook) in
    /// `main` to stop its channels at exit.
    pub fn global() -> &'static EventBus {
        GLOBAL.get_or_init(|| EventBus::new(BusConfig::default()))
    }

    /// Attaches a type-scoped subscriber, creating its channel if needed.
    /// The channel is not started.
    pub fn register_subscriber<E: Event>(&self, subscriber: Arc<dyn Subscriber<Event = E>>) {
        self.inner.channel_or_insert::<E>().attach(subscriber);
    }

    /// Adds a subscriber every channel offers every event to.
    /// Returns `false` if it was already registered.
    pub fn register_smart_subscriber(&self, subscriber: Arc<dyn SmartSubscriber>) -> bool {
        let name = subscriber.name();
        let added = self
            .inner
            .shared
            .smart
            .pin()
            .insert(identity(&subscriber), subscriber)
            .is_none();
        debug!(subscriber = name, added, "smart subscriber registered");
        added
    }

    /// Detaches a type-scoped subscriber. Returns whether it was attached.
    ///
    /// Fails with [`BusError::NoChannel`] when its topic has no channel.
    pub fn deregister_subscriber<S>(&self, subscriber: &Arc<S>) -> Result<bool, BusError>
    where
        S: Subscriber + ?Sized,
    {
        match self.inner.channel::<S::Event>() {
            Some(channel) => Ok(channel.detach(identity(subscriber))),
            None => Err(BusError::NoChannel {
                topic: Topic::of::<S::Event>(),
            }),
        }
    }

    pub fn deregister_smart_subscriber<S>(&self, subscriber: &Arc<S>) -> bool
    where
        S: SmartSubscriber + ?Sized,
    {
        let removed = self
            .inner
            .shared
            .smart
            .pin()
            .remove(&identity(subscriber))
            .is_some();
        debug!(removed, "smart subscriber deregistered");
        removed
    }

    /// Pre-creates the channel of `E` and (re)attaches its default-event
    /// supplier. Idempotent.
    pub fn register_publisher<E, F>(&self, supplier: F) -> Channel<E>
    where
        E: Event,
        F: Fn() -> E + Send + Sync + 'static,
    {
        let channel = self.inner.channel_or_insert::<E>();
        channel.set_supplier(Arc::new(supplier) as EventSupplier<E>);
        channel
    }

    /// Removes and stops the channel of `E`.
    ///
    /// Fails with [`BusError::NoChannel`] when `E` has no channel.
    pub fn deregister_publisher<E: Event>(&self) -> Result<(), BusError> {
        let channels = self.inner.channels.pin();
        match channels.remove(&TypeId::of::<E>()) {
            Some(proxy) => {
                proxy.stop();
                info!(topic = %proxy.topic(), "publisher deregistered");
                Ok(())
            }
            None => Err(BusError::NoChannel {
                topic: Topic::of::<E>(),
            }),
        }
    }

    /// Publishes `event`, starting its channel on first use and waiting for
    /// queue space when the channel is saturated.
    ///
    /// Fails with [`BusError::NoPublisher`] when neither a publisher nor a
    /// subscriber was registered for `E`.
    pub async fn publish<E: Event>(&self, event: E) -> Result<(), BusError> {
        self.started_channel::<E>()?.enqueue(event).await
    }

    /// Like [`EventBus::publish`], but fails with [`BusError::Full`] instead
    /// of waiting.
    pub fn try_publish<E: Event>(&self, event: E) -> Result<(), BusError> {
        self.started_channel::<E>()?.try_enqueue(event)
    }

    /// Like [`EventBus::publish`], for threads outside the async runtime.
    ///
    /// # Panics
    /// Panics when called from within an asynchronous execution context.
    pub fn publish_blocking<E: Event>(&self, event: E) -> Result<(), BusError> {
        self.started_channel::<E>()?.enqueue_blocking(event)
    }

    fn started_channel<E: Event>(&self) -> Result<Channel<E>, BusError> {
        let channel = self.inner.channel::<E>().ok_or(BusError::NoPublisher {
            topic: Topic::of::<E>(),
        })?;
        channel.start()?;
        Ok(channel)
    }

    /// Lets every channel deliver without waiting for a first subscriber.
    /// Irreversible.
    pub fn stop_deferred_delivery(&self) {
        if self.inner.shared.defer_stopped.open() {
            info!("deferred delivery stopped");
        }
    }

    /// Stops every channel registered right now and returns how many were
    /// running or idle. Channels created afterwards are not affected.
    pub fn shutdown(&self) -> usize {
        self.inner.sweep()
    }

    pub fn channel<E: Event>(&self) -> Option<Channel<E>> {
        self.inner.channel::<E>()
    }

    pub fn topics(&self) -> Vec<Topic> {
        let channels = self.inner.channels.pin();
        channels.values().map(|proxy| proxy.topic()).collect()
    }

    pub fn smart_subscriber_count(&self) -> usize {
        self.inner.shared.smart.len()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(BusConfig::default())
    }
}

impl Close for EventBus {
    async fn close(self) {
        let workers = self.inner.shared.workers.clone();
        self.shutdown();
        drop(self);
        workers.close();
        workers.wait().await;
    }
}
