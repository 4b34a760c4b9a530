use crossbeam_utils::CachePadded;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::Notify;

/// One-way latch: starts closed, opens once, never closes again.
///
/// Used both for the bus-wide "stop deferring" switch and for each channel's
/// "has ever had a subscriber" flag.
#[derive(Debug, Default)]
pub(crate) struct Latch {
    open: CachePadded<AtomicBool>,
    notify: Notify,
}

impl Latch {
    /// Opens the latch. Returns `true` for the call that actually opened it.
    pub fn open(&self) -> bool {
        let opened = !self.open.swap(true, Ordering::AcqRel);
        if opened {
            self.notify.notify_waiters();
        }
        opened
    }

    pub fn is_open(&self) -> bool {
        self.open.load(Ordering::Acquire)
    }

    /// Completes once the latch is open.
    pub async fn opened(&self) {
        let notified = self.notify.notified();
        if self.is_open() {
            return;
        }
        notified.await;
    }
}
