//! Cooperative cancellation.
//!
//! A single [`CancelFlag`] is shared by the REPL's Ctrl-C handler, the agent
//! loop, every tool execution and the terminal Q&A UI. Unlike a one-shot
//! token it can be reset once the interrupted operation has unwound, so the
//! same flag serves the whole process lifetime.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::Notify;

#[derive(Debug, Default)]
struct Inner {
    cancelled: AtomicBool,
    notify: Notify,
}

/// Clonable handle to a process-wide cancellation flag.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag {
    inner: Arc<Inner>,
}

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation and wake every task awaiting [`cancelled`](Self::cancelled).
    pub fn cancel(&self) {
        self.inner.cancelled.store(true, Ordering::SeqCst);
        self.inner.notify.notify_waiters();
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::SeqCst)
    }

    /// Clear the flag after the cancelled operation has finished unwinding.
    pub fn reset(&self) {
        self.inner.cancelled.store(false, Ordering::SeqCst);
    }

    /// Resolves once the flag is set. Meant to be raced in `tokio::select!`.
    pub async fn cancelled(&self) {
        loop {
            // Register before checking so a concurrent cancel() is not missed.
            let mut notified = std::pin::pin!(self.inner.notify.notified());
            notified.as_mut().enable();
            if self.is_cancelled() {
                return;
            }
            notified.await;
        }
    }
}
