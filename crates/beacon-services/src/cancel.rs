//! Cooperative cancellation for pipeline runs.
//!
//! A token is a shared `watch` flag. Clones observe the same flag. Workers
//! check it at every suspension point and stop as soon as it flips.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::AbortHandle;

#[derive(Debug, Clone)]
pub struct CancelToken {
    tx: Arc<watch::Sender<bool>>,
    rx: watch::Receiver<bool>,
    /// Deadline task of a child token. Shared by its clones.
    timer: Option<Arc<Timer>>,
}

/// Aborts the deadline task once the last clone of its token is gone.
#[derive(Debug)]
struct Timer(AbortHandle);

impl Drop for Timer {
    fn drop(&mut self) {
        self.0.abort();
    }
}

impl Default for CancelToken {
    fn default() -> Self {
        Self::new()
    }
}

impl CancelToken {
    pub fn new() -> Self {
        let (tx, rx) = watch::channel(false);
        Self {
            tx: Arc::new(tx),
            rx,
            timer: None,
        }
    }

    pub fn cancel(&self) {
        if let Some(timer) = &self.timer {
            timer.0.abort();
        }
        self.tx.send_replace(true);
    }

    pub fn is_cancelled(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolves once the token is cancelled.
    pub async fn cancelled(&self) {
        let mut rx = self.rx.clone();
        loop {
            if *rx.borrow_and_update() {
                return;
            }
            if rx.changed().await.is_err() {
                return;
            }
        }
    }

    /// A new token cancelled when `self` is, or after `timeout`, whichever
    /// comes first. Cancelling the child leaves `self` untouched.
    ///
    /// The deadline task ends when the child is cancelled or its last clone
    /// is dropped.
    pub fn child_with_timeout(&self, timeout: Duration) -> CancelToken {
        let child = CancelToken::new();
        let parent = self.clone();
        let tx = child.tx.clone();
        let task = tokio::spawn(async move {
            tokio::select! {
                _ = parent.cancelled() => {}
                _ = tokio::time::sleep(timeout) => {}
            }
            tx.send_replace(true);
        });
        CancelToken {
            timer: Some(Arc::new(Timer(task.abort_handle()))),
            ..child
        }
    }
}
