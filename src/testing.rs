//! Test helpers shared by the unit tests.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::error::Reaction;
use crate::event::Event;
use crate::subscriber::{FromFn, from_fn};

/// Polls `condition` until it holds, panicking after two seconds.
pub(crate) async fn eventually(what: &str, condition: impl Fn() -> bool) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    while !condition() {
        assert!(
            tokio::time::Instant::now() < deadline,
            "timed out waiting for {what}"
        );
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

/// Shared, append-only log of observed values.
pub(crate) struct Recorder<T>(Arc<Mutex<Vec<T>>>);

impl<T> Default for Recorder<T> {
    fn default() -> Self {
        Self(Arc::new(Mutex::new(Vec::new())))
    }
}

impl<T> Clone for Recorder<T> {
    fn clone(&self) -> Self {
        Self(Arc::clone(&self.0))
    }
}

impl<T: Clone + Send + 'static> Recorder<T> {
    pub fn push(&self, value: T) {
        self.0.lock().unwrap().push(value);
    }

    pub fn snapshot(&self) -> Vec<T> {
        self.0.lock().unwrap().clone()
    }

    pub fn len(&self) -> usize {
        self.0.lock().unwrap().len()
    }
}

/// Type-scoped subscriber appending `map(event)` to `recorder`.
pub(crate) fn recording<E, T>(
    recorder: &Recorder<T>,
    map: fn(&E) -> T,
) -> FromFn<E, impl Fn(Arc<E>) -> std::future::Ready<Reaction> + Send + Sync + 'static>
where
    E: Event,
    T: Clone + Send + 'static,
{
    let recorder = recorder.clone();
    from_fn(move |event: Arc<E>| {
        recorder.push(map(&event));
        std::future::ready(Ok(()))
    })
}
