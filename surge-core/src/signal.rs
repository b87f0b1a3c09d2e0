use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::Notify;

/// One-shot broadcast flag. Once fired it stays fired; waiters registered before or after
/// `fire` all observe it.
#[derive(Debug, Default)]
pub struct StopSignal {
    fired: AtomicBool,
    notify: Notify,
}

impl StopSignal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `true` if this call fired the signal.
    pub fn fire(&self) -> bool {
        let first = !self.fired.swap(true, Ordering::AcqRel);
        if first {
            self.notify.notify_waiters();
        }
        first
    }

    pub fn is_fired(&self) -> bool {
        self.fired.load(Ordering::Acquire)
    }

    pub async fn wait(&self) {
        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            // Register before checking the flag so a concurrent `fire` can't slip between.
            notified.as_mut().enable();

            if self.is_fired() {
                return;
            }
            notified.await;
        }
    }
}
