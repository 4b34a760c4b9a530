//! # Per-topic delivery engine.
//!
//! A [`Channel`] buffers the events of one topic and delivers them, in order,
//! to every interested subscriber.
//!
//! ```text
//! producer ─┐
//! producer ─┼─► [bounded queue] ─► delivery worker ─┬─► inline:    subscriber.on_event().await
//! producer ─┘      (FIFO)          (one per topic)  └─► offloaded: executor.execute(job)
//!                                        ▲
//!                     deferred gate ─────┘ opens on: first attach | bus switch | stop
//! ```
//!
//! ## Rules
//! - The worker starts at most once; a stopped channel never restarts.
//! - Events published before the first subscriber stay queued behind the
//!   deferred gate instead of being dropped.
//! - A failing or panicking inline reaction is logged; delivery continues.
//! - Offloaded reactions are fire-and-forget; their failures belong to the
//!   executor.
//! - Stopping closes the queue. The worker still delivers every event that was
//!   already queued, then exits. Offloaded reactions are not awaited.

use std::any::Any;
use std::fmt;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex, OnceLock, PoisonError, RwLock};
use std::time::Duration;

use futures::FutureExt;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, trace};

use crate::config::BusConfig;
use crate::defer::Latch;
use crate::error::{BusError, Reaction};
use crate::event::{AnyEvent, Event, Topic};
use crate::executor::{self, Executor};
use crate::subscriber::{SmartSubscriber, Subscriber, SubscriberId, identity};

/// Produces the default value of a topic's event type.
pub type EventSupplier<E> = Arc<dyn Fn() -> E + Send + Sync>;

/// Bus-wide state every delivery worker reads.
pub(crate) struct Shared {
    pub(crate) smart: papaya::HashMap<SubscriberId, Arc<dyn SmartSubscriber>>,
    pub(crate) defer_stopped: Latch,
    pub(crate) workers: TaskTracker,
    executor: Option<Arc<dyn Executor>>,
    defer_poll_interval: Duration,
}

impl Shared {
    pub(crate) fn new(config: &BusConfig) -> Self {
        Self {
            smart: papaya::HashMap::new(),
            defer_stopped: Latch::default(),
            workers: TaskTracker::new(),
            executor: config.executor.clone(),
            defer_poll_interval: config.defer_poll_interval,
        }
    }
}

/// Handle to the delivery engine of topic `E`. Clones share the same channel.
pub struct Channel<E: Event> {
    inner: Arc<Inner<E>>,
}

struct Inner<E: Event> {
    topic: Topic,
    capacity: usize,
    subscribers: papaya::HashMap<SubscriberId, Arc<dyn Subscriber<Event = E>>>,
    supplier: RwLock<Option<EventSupplier<E>>>,
    sender: OnceLock<mpsc::Sender<Arc<E>>>,
    lifecycle: Mutex<()>,
    attached: Latch,
    shutdown: CancellationToken,
    shared: Arc<Shared>,
}

impl<E: Event> Channel<E> {
    pub(crate) fn new(capacity: usize, shared: Arc<Shared>) -> Self {
        let topic = Topic::of::<E>();
        debug!(topic = %topic, capacity, "channel created");
        Self {
            inner: Arc::new(Inner {
                topic,
                capacity,
                subscribers: papaya::HashMap::new(),
                supplier: RwLock::new(None),
                sender: OnceLock::new(),
                lifecycle: Mutex::new(()),
                attached: Latch::default(),
                shutdown: CancellationToken::new(),
                shared,
            }),
        }
    }

    pub fn topic(&self) -> Topic {
        self.inner.topic
    }

    pub fn is_started(&self) -> bool {
        self.inner.sender.get().is_some()
    }

    pub fn is_stopped(&self) -> bool {
        self.inner.shutdown.is_cancelled()
    }

    /// Number of attached type-scoped subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.inner.subscribers.len()
    }

    /// Whether a type-scoped subscriber has ever attached.
    pub fn has_had_subscriber(&self) -> bool {
        self.inner.attached.is_open()
    }

    pub(crate) fn set_supplier(&self, supplier: EventSupplier<E>) {
        *self
            .inner
            .supplier
            .write()
            .unwrap_or_else(PoisonError::into_inner) = Some(supplier);
    }

    /// Builds a default event from the supplier given at publisher registration.
    pub fn default_event(&self) -> Option<E> {
        let supplier = self
            .inner
            .supplier
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        supplier.map(|supplier| supplier())
    }

    /// Allocates the queue and launches the delivery worker.
    ///
    /// Returns `Ok(true)` for the call that started the channel and
    /// `Ok(false)` when it was already running.
    pub fn start(&self) -> Result<bool, BusError> {
        if self.is_started() {
            return Ok(false);
        }

        let _lifecycle = self
            .inner
            .lifecycle
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if self.is_started() {
            return Ok(false);
        }

        let topic = self.inner.topic;
        if self.is_stopped() {
            return Err(BusError::Stopped { topic });
        }
        if self.inner.capacity == 0 {
            return Err(BusError::InvalidCapacity {
                topic,
                capacity: self.inner.capacity,
            });
        }
        let executor = executor::resolve(self.inner.shared.executor.as_ref())
            .ok_or(BusError::NoRuntime { topic })?;

        let (sender, queue) = mpsc::channel(self.inner.capacity);
        if self.inner.sender.set(sender).is_err() {
            return Ok(false);
        }
        let worker = Worker {
            inner: Arc::clone(&self.inner),
            queue,
        };
        let run = self.inner.shared.workers.track_future(worker.run());
        executor.execute(Box::pin(async move {
            run.await;
            Reaction::Ok(())
        }));

        debug!(topic = %topic, capacity = self.inner.capacity, "delivery worker started");
        Ok(true)
    }

    /// Appends `event` to the queue, waiting for room when it is full.
    pub async fn enqueue(&self, event: E) -> Result<(), BusError> {
        self.sender()?
            .send(Arc::new(event))
            .await
            .map_err(|_| self.stopped())
    }

    /// Appends `event` without waiting; a full queue yields [`BusError::Full`].
    pub fn try_enqueue(&self, event: E) -> Result<(), BusError> {
        self.sender()?
            .try_send(Arc::new(event))
            .map_err(|err| match err {
                mpsc::error::TrySendError::Full(_) => BusError::Full {
                    topic: self.inner.topic,
                },
                mpsc::error::TrySendError::Closed(_) => self.stopped(),
            })
    }

    /// Blocking variant of [`Channel::enqueue`] for threads outside the runtime.
    ///
    /// # Panics
    /// Panics when called from within an asynchronous execution context.
    pub fn enqueue_blocking(&self, event: E) -> Result<(), BusError> {
        self.sender()?
            .blocking_send(Arc::new(event))
            .map_err(|_| self.stopped())
    }

    fn sender(&self) -> Result<&mpsc::Sender<Arc<E>>, BusError> {
        if self.is_stopped() {
            return Err(self.stopped());
        }
        self.inner.sender.get().ok_or(BusError::NotStarted {
            topic: self.inner.topic,
        })
    }

    fn stopped(&self) -> BusError {
        BusError::Stopped {
            topic: self.inner.topic,
        }
    }

    /// Adds `subscriber` to the membership set. Returns `false` if it was
    /// already attached.
    pub(crate) fn attach(&self, subscriber: Arc<dyn Subscriber<Event = E>>) -> bool {
        let name = subscriber.name();
        let added = self
            .inner
            .subscribers
            .pin()
            .insert(identity(&subscriber), subscriber)
            .is_none();
        debug!(topic = %self.inner.topic, subscriber = name, added, "subscriber attached");

        if self.inner.attached.open() {
            debug!(topic = %self.inner.topic, "first subscriber attached, delivery allowed");
        }
        added
    }

    pub(crate) fn detach(&self, id: SubscriberId) -> bool {
        let removed = self.inner.subscribers.pin().remove(&id).is_some();
        debug!(topic = %self.inner.topic, removed, "subscriber detached");
        removed
    }

    /// Stops the channel for good; events already queued are still delivered.
    /// Returns `false` if it was already stopped.
    pub fn stop(&self) -> bool {
        let _lifecycle = self
            .inner
            .lifecycle
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if self.is_stopped() {
            return false;
        }
        self.inner.shutdown.cancel();
        debug!(topic = %self.inner.topic, started = self.is_started(), "channel stopped");
        true
    }
}

impl<E: Event> Clone for Channel<E> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<E: Event> fmt::Debug for Channel<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Channel")
            .field("topic", &self.inner.topic)
            .field("capacity", &self.inner.capacity)
            .field("subscribers", &self.subscriber_count())
            .field("started", &self.is_started())
            .field("stopped", &self.is_stopped())
            .finish()
    }
}

/// One entry of a delivery set.
enum Target<E: Event> {
    Typed(Arc<dyn Subscriber<Event = E>>),
    Smart(Arc<dyn SmartSubscriber>),
}

struct Worker<E: Event> {
    inner: Arc<Inner<E>>,
    queue: mpsc::Receiver<Arc<E>>,
}

impl<E: Event> Worker<E> {
    async fn run(mut self) {
        let mut gate_open = false;

        loop {
            let event = tokio::select! {
                biased;
                _ = self.inner.shutdown.cancelled() => break,
                event = self.queue.recv() => match event {
                    Some(event) => event,
                    None => break,
                },
            };

            if !gate_open {
                self.inner.gate().await;
                gate_open = true;
            }

            self.inner.dispatch(event).await;
        }

        // Stopped: refuse new events, deliver the backlog.
        self.queue.close();
        let mut drained = 0usize;
        while let Some(event) = self.queue.recv().await {
            self.inner.dispatch(event).await;
            drained += 1;
        }

        debug!(topic = %self.inner.topic, drained, "delivery worker exited");
    }
}

impl<E: Event> Inner<E> {
    /// Parks until a subscriber attached, the bus stopped deferring, or the
    /// channel stopped.
    async fn gate(&self) {
        let shared = &self.shared;
        let mut logged = false;

        loop {
            if self.shutdown.is_cancelled()
                || self.attached.is_open()
                || shared.defer_stopped.is_open()
            {
                return;
            }
            if !logged {
                debug!(topic = %self.topic, "no subscriber yet, holding delivery");
                logged = true;
            }

            tokio::select! {
                _ = self.attached.opened() => {}
                _ = shared.defer_stopped.opened() => {}
                _ = self.shutdown.cancelled() => {}
                _ = tokio::time::sleep(shared.defer_poll_interval) => {}
            }
        }
    }

    fn delivery_set(&self) -> Vec<Target<E>> {
        let smart = self.shared.smart.pin();
        let typed = self.subscribers.pin();

        let mut targets = Vec::with_capacity(smart.len() + typed.len());
        targets.extend(smart.values().cloned().map(Target::Smart));
        targets.extend(typed.values().cloned().map(Target::Typed));
        targets
    }

    async fn dispatch(&self, event: Arc<E>) {
        for target in self.delivery_set() {
            match target {
                Target::Smart(subscriber) => {
                    let event = AnyEvent::new(Arc::clone(&event));
                    if !self.interested(subscriber.as_ref(), &event) {
                        continue;
                    }
                    match subscriber.executor() {
                        Some(executor) => executor.execute(Box::pin(async move {
                            subscriber.on_event(event).await
                        })),
                        None => {
                            self.react_inline(subscriber.name(), subscriber.on_event(event))
                                .await
                        }
                    }
                }
                Target::Typed(subscriber) => {
                    let event = Arc::clone(&event);
                    match subscriber.executor() {
                        Some(executor) => executor.execute(Box::pin(async move {
                            subscriber.on_event(event).await
                        })),
                        None => {
                            self.react_inline(subscriber.name(), subscriber.on_event(event))
                                .await
                        }
                    }
                }
            }
        }
    }

    fn interested(&self, subscriber: &dyn SmartSubscriber, event: &AnyEvent) -> bool {
        match std::panic::catch_unwind(AssertUnwindSafe(|| subscriber.interested(event))) {
            Ok(interested) => interested,
            Err(panic) => {
                error!(
                    topic = %self.topic,
                    subscriber = subscriber.name(),
                    panic = %panic_message(panic.as_ref()),
                    "interest predicate panicked, skipping subscriber"
                );
                false
            }
        }
    }

    async fn react_inline(&self, subscriber: &'static str, reaction: impl Future<Output = Reaction>) {
        match AssertUnwindSafe(reaction).catch_unwind().await {
            Ok(Ok(())) => trace!(topic = %self.topic, subscriber, "event delivered"),
            Ok(Err(err)) => {
                error!(topic = %self.topic, subscriber, error = %err, "event callback failed")
            }
            Err(panic) => error!(
                topic = %self.topic,
                subscriber,
                panic = %panic_message(panic.as_ref()),
                "event callback panicked"
            ),
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(msg) = panic.downcast_ref::<&'static str>() {
        (*msg).to_string()
    } else if let Some(msg) = panic.downcast_ref::<String>() {
        msg.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::subscriber::{from_fn, smart_fn};
    use crate::testing::{Recorder, eventually, recording};
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Debug, Clone, PartialEq)]
    struct Ping(u32);

    fn shared(config: BusConfig) -> Arc<Shared> {
        Arc::new(Shared::new(&config))
    }

    fn channel(capacity: usize) -> Channel<Ping> {
        let config = BusConfig::default().with_defer_poll_interval(Duration::from_millis(10));
        Channel::new(capacity, shared(config))
    }

    #[tokio::test]
    async fn enqueue_before_start_is_rejected() {
        let channel = channel(8);

        let err = channel.enqueue(Ping(1)).await.unwrap_err();
        assert_eq!(err, BusError::NotStarted { topic: Topic::of::<Ping>() });
        assert!(channel.try_enqueue(Ping(2)).is_err());
        assert!(!channel.is_started());
    }

    #[tokio::test]
    async fn zero_capacity_is_a_configuration_error() {
        let channel = channel(0);

        assert!(matches!(
            channel.start(),
            Err(BusError::InvalidCapacity { capacity: 0, .. })
        ));
        assert!(!channel.is_started());
    }

    #[test]
    fn start_needs_an_executor() {
        let channel = channel(8);
        assert!(matches!(channel.start(), Err(BusError::NoRuntime { .. })));
    }

    #[tokio::test]
    async fn start_on_configured_executor_outside_its_runtime() {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(1)
            .enable_time()
            .build()
            .unwrap();
        let config = BusConfig::default().with_executor(Arc::new(runtime.handle().clone()));
        let channel = Channel::<Ping>::new(4, shared(config));

        assert_eq!(channel.start(), Ok(true));
        channel.stop();
        runtime.shutdown_background();
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_starts_launch_one_worker() {
        let channel = channel(64);
        let recorder = Recorder::default();
        channel.attach(Arc::new(recording(&recorder, |p: &Ping| p.0)));

        let starters: Vec<_> = (0..8)
            .map(|_| {
                let channel = channel.clone();
                tokio::spawn(async move { channel.start() })
            })
            .collect();
        let mut started = 0;
        for starter in starters {
            if starter.await.unwrap().unwrap() {
                started += 1;
            }
        }
        assert_eq!(started, 1);
        assert_eq!(channel.inner.shared.workers.len(), 1);

        for i in 0..3 {
            channel.enqueue(Ping(i)).await.unwrap();
        }
        eventually("three deliveries", || recorder.len() == 3).await;
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(recorder.snapshot(), vec![0, 1, 2]);
    }

    #[tokio::test]
    async fn events_wait_for_the_first_subscriber() {
        let channel = channel(16);
        channel.start().unwrap();
        for i in 0..5 {
            channel.enqueue(Ping(i)).await.unwrap();
        }

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!channel.has_had_subscriber());

        let recorder = Recorder::default();
        channel.attach(Arc::new(recording(&recorder, |p: &Ping| p.0)));

        eventually("queued events", || recorder.len() == 5).await;
        assert_eq!(recorder.snapshot(), vec![0, 1, 2, 3, 4]);
    }

    #[tokio::test]
    async fn bus_switch_opens_the_gate_without_subscribers() {
        let channel = channel(16);
        let seen = Arc::new(AtomicUsize::new(0));
        channel.inner.shared.smart.pin().insert(
            1,
            Arc::new(smart_fn(|_: &AnyEvent| true, {
                let seen = seen.clone();
                move |_| {
                    seen.fetch_add(1, Ordering::SeqCst);
                    std::future::ready(Ok(()))
                }
            })),
        );

        channel.start().unwrap();
        channel.enqueue(Ping(1)).await.unwrap();
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(seen.load(Ordering::SeqCst), 0);

        channel.inner.shared.defer_stopped.open();
        eventually("delivery after switch", || seen.load(Ordering::SeqCst) == 1).await;
    }

    #[tokio::test]
    async fn failing_inline_subscribers_do_not_stop_delivery() {
        let channel = channel(16);
        let recorder = Recorder::default();
        channel.attach(Arc::new(from_fn(|_: Arc<Ping>| async {
            Err("always fails".into())
        })));
        channel.attach(Arc::new(from_fn(|event: Arc<Ping>| async move {
            if event.0 % 2 == 0 {
                panic!("even ping");
            }
            Ok(())
        })));
        channel.attach(Arc::new(recording(&recorder, |p: &Ping| p.0)));

        channel.start().unwrap();
        for i in 0..4 {
            channel.enqueue(Ping(i)).await.unwrap();
        }

        eventually("all deliveries", || recorder.len() == 4).await;
        assert_eq!(recorder.snapshot(), vec![0, 1, 2, 3]);
    }

    #[tokio::test]
    async fn try_enqueue_reports_a_full_queue() {
        let channel = channel(1);
        channel.start().unwrap();

        channel.try_enqueue(Ping(1)).unwrap();
        // The worker takes the first event and parks at the gate.
        tokio::time::sleep(Duration::from_millis(20)).await;
        channel.try_enqueue(Ping(2)).unwrap();

        assert_eq!(
            channel.try_enqueue(Ping(3)),
            Err(BusError::Full { topic: Topic::of::<Ping>() })
        );
    }

    #[tokio::test]
    async fn stop_is_final() {
        let channel = channel(4);
        channel.start().unwrap();

        assert!(channel.stop());
        assert!(!channel.stop());
        assert_eq!(channel.start(), Ok(false));
        assert!(matches!(channel.enqueue(Ping(1)).await, Err(BusError::Stopped { .. })));

        let shared = channel.inner.shared.clone();
        eventually("worker exit", || shared.workers.len() == 0).await;
    }

    #[tokio::test]
    async fn stopped_channel_cannot_start() {
        let channel = channel(4);
        channel.stop();
        assert!(matches!(channel.start(), Err(BusError::Stopped { .. })));
    }

    #[tokio::test]
    async fn stop_releases_a_parked_worker() {
        let channel = channel(4);
        channel.start().unwrap();
        channel.enqueue(Ping(1)).await.unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(channel.inner.shared.workers.len(), 1);

        channel.stop();
        let shared = channel.inner.shared.clone();
        eventually("worker exit", || shared.workers.len() == 0).await;
    }

    #[tokio::test]
    async fn stop_delivers_the_held_event_and_the_backlog() {
        let channel = channel(8);
        let seen = Recorder::default();
        channel.inner.shared.smart.pin().insert(
            1,
            Arc::new(smart_fn(|_: &AnyEvent| true, {
                let seen = seen.clone();
                move |event: AnyEvent| {
                    seen.push(event.downcast_ref::<Ping>().map(|p| p.0));
                    std::future::ready(Ok(()))
                }
            })),
        );

        channel.start().unwrap();
        for i in 0..3 {
            channel.enqueue(Ping(i)).await.unwrap();
        }
        // The worker holds the first event at the gate.
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(seen.len(), 0);

        channel.stop();

        let shared = channel.inner.shared.clone();
        eventually("worker exit", || shared.workers.len() == 0).await;
        assert_eq!(seen.snapshot(), vec![Some(0), Some(1), Some(2)]);
    }

    #[tokio::test]
    async fn panicking_predicate_skips_only_its_subscriber() {
        let channel = channel(8);
        let smart = channel.inner.shared.smart.pin();
        smart.insert(
            1,
            Arc::new(smart_fn(
                |_: &AnyEvent| -> bool { panic!("broken predicate") },
                |_| std::future::ready(Ok(())),
            )),
        );
        let seen = Arc::new(AtomicUsize::new(0));
        smart.insert(
            2,
            Arc::new(smart_fn(|_: &AnyEvent| true, {
                let seen = seen.clone();
                move |_| {
                    seen.fetch_add(1, Ordering::SeqCst);
                    std::future::ready(Ok(()))
                }
            })),
        );
        drop(smart);
        let recorder = Recorder::default();
        channel.attach(Arc::new(recording(&recorder, |p: &Ping| p.0)));

        channel.start().unwrap();
        for i in 0..3 {
            channel.enqueue(Ping(i)).await.unwrap();
        }

        eventually("typed deliveries", || recorder.len() == 3).await;
        assert_eq!(recorder.snapshot(), vec![0, 1, 2]);
        assert_eq!(seen.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn default_event_uses_the_supplier() {
        let channel = channel(4);
        assert_eq!(channel.default_event(), None);

        channel.set_supplier(Arc::new(|| Ping(0)));
        assert_eq!(channel.default_event(), Some(Ping(0)));
    }

    #[test]
    fn attach_is_idempotent_per_subscriber() {
        let channel = channel(4);
        let subscriber: Arc<dyn Subscriber<Event = Ping>> =
            Arc::new(from_fn(|_: Arc<Ping>| async { Ok(()) }));

        assert!(channel.attach(subscriber.clone()));
        assert!(!channel.attach(subscriber.clone()));
        assert_eq!(channel.subscriber_count(), 1);

        assert!(channel.detach(identity(&subscriber)));
        assert!(!channel.detach(identity(&subscriber)));
        assert_eq!(channel.subscriber_count(), 0);
        assert!(channel.has_had_subscriber());
    }
}
