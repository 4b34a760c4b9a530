//! In-process, typed publish/subscribe event bus.
//!
//! Every concrete event type is a topic with its own [`Channel`]: a bounded
//! FIFO queue drained by one delivery worker. Events published before anyone
//! listens are held back until the first subscriber attaches (or until
//! [`EventBus::stop_deferred_delivery`]), not dropped.
//!
//! ```
//! use std::sync::Arc;
//! use notifier::{EventBus, BusConfig, from_fn};
//!
//! #[derive(Debug)]
//! struct Ping(u32);
//!
//! # #[tokio::main]
//! # async fn main() -> Result<(), notifier::BusError> {
//! let bus = EventBus::new(BusConfig::default());
//! bus.register_publisher(|| Ping(0));
//! bus.publish(Ping(1)).await?;
//!
//! bus.register_subscriber(Arc::new(from_fn(|ping: Arc<Ping>| async move {
//!     println!("got {ping:?}");
//!     Ok(())
//! })));
//! # bus.shutdown();
//! # Ok(())
//! # }
//! ```

mod bus;
mod channel;
mod config;
mod defer;
mod error;
mod event;
mod executor;
mod lifecycle;
mod proxy;
pub mod subscriber;

#[cfg(test)]
mod testing;

pub use {
    bus::EventBus,
    channel::{Channel, EventSupplier},
    config::BusConfig,
    error::{BoxError, BusError, Reaction},
    event::{AnyEvent, Event, Topic},
    executor::{Executor, Job},
    lifecycle::{Close, ShutdownHook, shutdown_on_signal},
    subscriber::{SmartSubscriber, Subscriber, from_fn, offload, smart_fn},
};
