//! # Bus configuration.
//!
//! [`BusConfig`] is read when a channel is created (queue capacity) and when
//! its delivery worker starts (executor, deferred-gate polling).
//!
//! ## Sentinel values
//! - `executor = None` → the tokio runtime current at channel start
//! - `capacity = 0` → rejected with `BusError::InvalidCapacity` at channel start

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use crate::executor::Executor;

#[derive(Clone)]
pub struct BusConfig {
    /// Capacity of each channel's queue.
    ///
    /// A full queue makes `publish` wait for space and `try_publish` fail
    /// with `Full`.
    pub capacity: usize,

    /// Upper bound on how long a parked delivery worker waits before
    /// re-checking its deferred-start conditions.
    ///
    /// Attaching a subscriber, flipping the bus switch and stopping the
    /// channel all wake the worker early; the interval only bounds the
    /// worst case.
    pub defer_poll_interval: Duration,

    /// Execution context for delivery workers.
    pub executor: Option<Arc<dyn Executor>>,
}

impl BusConfig {
    pub fn with_capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity;
        self
    }

    pub fn with_defer_poll_interval(mut self, interval: Duration) -> Self {
        self.defer_poll_interval = interval;
        self
    }

    pub fn with_executor(mut self, executor: Arc<dyn Executor>) -> Self {
        self.executor = Some(executor);
        self
    }
}

impl Default for BusConfig {
    /// - `capacity = 1024`
    /// - `defer_poll_interval = 1s`
    /// - `executor = None` (ambient runtime)
    fn default() -> Self {
        Self {
            capacity: 1024,
            defer_poll_interval: Duration::from_secs(1),
            executor: None,
        }
    }
}

impl fmt::Debug for BusConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BusConfig")
            .field("capacity", &self.capacity)
            .field("defer_poll_interval", &self.defer_poll_interval)
            .field("executor", &self.executor.as_ref().map(|_| "custom"))
            .finish()
    }
}
