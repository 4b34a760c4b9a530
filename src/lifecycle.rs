//! Stopping a bus.
//!
//! Three ways, from bluntest to most thorough:
//! - [`ShutdownHook`]: drop guard held by `main`, sweeps on scope exit.
//! - [`shutdown_on_signal`]: sweeps once the process is asked to terminate.
//! - [`Close::close`]: sweeps, then waits for every delivery worker to exit.
//!
//! None of them wait for offloaded reactions; those belong to their executor.

use tracing::info;

use crate::bus::EventBus;

#[trait_variant::make(Send)]
pub trait Close {
    async fn close(self);
}

/// Runs [`EventBus::shutdown`] once, when dropped.
///
/// The global bus lives in a static and is never dropped; keep one of these
/// alive for the duration of `main` instead.
#[must_use = "the bus is swept when the hook is dropped"]
pub struct ShutdownHook {
    bus: EventBus,
}

impl ShutdownHook {
    pub fn new(bus: EventBus) -> Self {
        Self { bus }
    }

    /// Hook for [`EventBus::global`].
    pub fn global() -> Self {
        Self::new(EventBus::global().clone())
    }
}

impl Drop for ShutdownHook {
    fn drop(&mut self) {
        let stopped = self.bus.shutdown();
        info!(stopped, "shutdown hook ran");
    }
}

/// Waits for a termination signal, then stops every channel of `bus`.
///
/// On unix this listens for SIGINT, SIGTERM and SIGQUIT; elsewhere only for
/// Ctrl-C. Returns the number of channels stopped.
pub async fn shutdown_on_signal(bus: &EventBus) -> std::io::Result<usize> {
    wait_for_signal().await?;
    info!("termination signal received");
    Ok(bus.shutdown())
}

#[cfg(unix)]
async fn wait_for_signal() -> std::io::Result<()> {
    use tokio::signal::unix::{SignalKind, signal};

    let mut sigint = signal(SignalKind::interrupt())?;
    let mut sigterm = signal(SignalKind::terminate())?;
    let mut sigquit = signal(SignalKind::quit())?;

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {},
        _ = sigint.recv() => {},
        _ = sigterm.recv() => {},
        _ = sigquit.recv() => {},
    }
    Ok(())
}

#[cfg(not(unix))]
async fn wait_for_signal() -> std::io::Result<()> {
    tokio::signal::ctrl_c().await
}
