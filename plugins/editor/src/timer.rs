//! Cancellable one-shot timers

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

/// A one-shot delayed action running on the tokio runtime
///
/// Cancelling (or dropping) the timer before it fires guarantees the action
/// never starts. Once the delay has elapsed the action runs to completion
/// and cancellation is a no-op.
#[derive(Debug)]
pub struct Timer {
    armed: Arc<AtomicBool>,
    handle: JoinHandle<()>,
}

impl Timer {
    /// Schedule `action` to run after `delay`
    pub fn start<F, Fut>(delay: Duration, action: F) -> Self
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let armed = Arc::new(AtomicBool::new(true));
        let flag = armed.clone();

        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if flag.swap(false, Ordering::AcqRel) {
                action().await;
            }
        });

        Self { armed, handle }
    }

    /// Cancel the timer if it has not fired yet
    ///
    /// Returns `true` when this call prevented the action from running.
    pub fn cancel(&self) -> bool {
        if self.armed.swap(false, Ordering::AcqRel) {
            self.handle.abort();
            true
        } else {
            false
        }
    }

    /// Whether the timer is still waiting to fire
    pub fn is_pending(&self) -> bool {
        self.armed.load(Ordering::Acquire)
    }
}

impl Drop for Timer {
    fn drop(&mut self) {
        self.cancel();
    }
}

/// Shared flag telling continuations whether their owner is still around
#[derive(Debug, Clone)]
pub struct Liveness(Arc<AtomicBool>);

impl Liveness {
    pub fn new() -> Self {
        Self(Arc::new(AtomicBool::new(true)))
    }

    pub fn is_alive(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }

    /// Mark the owner as torn down; returns whether it was alive before
    pub fn shut_down(&self) -> bool {
        self.0.swap(false, Ordering::AcqRel)
    }
}

impl Default for Liveness {
    fn default() -> Self {
        Self::new()
    }
}
