//! Execution contexts.
//!
//! The bus never sizes or names worker pools; it only submits units of work
//! to an [`Executor`]. Offloaded subscribers bring their own, and every
//! channel runs its delivery worker on the bus executor.

use std::sync::Arc;

use futures::future::BoxFuture;
use tokio::runtime::Handle;

use crate::error::Reaction;

/// A unit of work submitted to an [`Executor`].
pub type Job = BoxFuture<'static, Reaction>;

/// Submit-and-forget task execution.
///
/// The bus does not observe the outcome of a submitted job. What happens to a
/// failed [`Reaction`] is the executor's own policy.
pub trait Executor: Send + Sync + 'static {
    fn execute(&self, job: Job);
}

/// Spawns every job on the runtime and logs failed reactions.
impl Executor for Handle {
    fn execute(&self, job: Job) {
        drop(self.spawn(async move {
            if let Err(err) = job.await {
                tracing::warn!(error = %err, "offloaded reaction failed");
            }
        }));
    }
}

impl<X: Executor + ?Sized> Executor for Arc<X> {
    fn execute(&self, job: Job) {
        (**self).execute(job);
    }
}

/// Resolves the executor for a delivery worker: the configured one, else the
/// runtime the caller is currently running on.
pub(crate) fn resolve(configured: Option<&Arc<dyn Executor>>) -> Option<Arc<dyn Executor>> {
    match configured {
        Some(executor) => Some(Arc::clone(executor)),
        None => Handle::try_current()
            .ok()
            .map(|handle| Arc::new(handle) as Arc<dyn Executor>),
    }
}
