//! Run cancellation token.

use parking_lot::Mutex;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::Notify;
use tracing::{debug, warn};

/// A callback run once when a token is cancelled.
pub type CancelCallback = Box<dyn FnOnce() + Send>;

#[derive(Default)]
struct State {
    reason: Option<String>,
    callbacks: Vec<CancelCallback>,
}

/// Signals a pipeline run to stop.
///
/// The first [`cancel`](Self::cancel) wins: its reason is kept and later calls
/// are ignored. Step workers race their channel operations against
/// [`cancelled`](Self::cancelled), so a blocked send or receive returns as
/// soon as the token fires.
#[derive(Default)]
pub struct CancellationToken {
    fired: AtomicBool,
    state: Mutex<State>,
    notify: Notify,
}

impl CancellationToken {
    /// Creates an untriggered token.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Cancels the token with `reason`. No-op if already cancelled.
    ///
    /// Registered callbacks run on the calling thread after the waiters are
    /// woken. A panicking callback is logged and does not stop the others.
    pub fn cancel(&self, reason: impl Into<String>) {
        let callbacks = {
            let mut state = self.state.lock();
            if self.fired.load(Ordering::Acquire) {
                return;
            }
            let reason = reason.into();
            debug!(%reason, "cancellation requested");
            state.reason = Some(reason);
            self.fired.store(true, Ordering::Release);
            std::mem::take(&mut state.callbacks)
        };
        self.notify.notify_waiters();
        callbacks.into_iter().for_each(run_callback);
    }

    /// Runs `callback` once on cancellation, or right away if the token has
    /// already fired.
    pub fn on_cancel<F>(&self, callback: F)
    where
        F: FnOnce() + Send + 'static,
    {
        {
            let mut state = self.state.lock();
            if !self.fired.load(Ordering::Acquire) {
                state.callbacks.push(Box::new(callback));
                return;
            }
        }
        run_callback(Box::new(callback));
    }

    /// Returns true once the token has fired.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.fired.load(Ordering::Acquire)
    }

    /// Returns the reason given to the first `cancel`.
    #[must_use]
    pub fn reason(&self) -> Option<String> {
        self.state.lock().reason.clone()
    }

    /// Resolves once the token has fired.
    pub async fn cancelled(&self) {
        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            // registered before the flag check so a concurrent cancel is seen
            notified.as_mut().enable();
            if self.is_cancelled() {
                return;
            }
            notified.await;
        }
    }
}

fn run_callback(callback: CancelCallback) {
    if catch_unwind(AssertUnwindSafe(callback)).is_err() {
        warn!("cancellation callback panicked");
    }
}

impl std::fmt::Debug for CancellationToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CancellationToken")
            .field("cancelled", &self.is_cancelled())
            .field("reason", &self.reason())
            .finish_non_exhaustive()
    }
}
