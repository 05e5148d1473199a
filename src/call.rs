//! Cancellation and deadlines for provider calls.
//!
//! Every I/O operation takes a [`CallContext`]. The core races the provider
//! future against the context's cancellation signal and deadline, so a
//! cancelled caller gets [`Error::Cancelled`] promptly even if the provider
//! is slow to notice.

use std::future::{Future, pending};
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinSet;
use tokio::time::Instant;

use crate::error::{Error, Result};

/// A cloneable, cancellable, deadline-bearing execution context.
///
/// Clones share the same cancellation signals. A derived context is
/// cancelled whenever any of its ancestors is.
#[derive(Debug, Clone, Default)]
pub struct CallContext {
    cancel: Vec<watch::Receiver<bool>>,
    deadline: Option<Instant>,
}

/// Cancels every [`CallContext`] derived from it.
///
/// Dropping the handle without calling [`cancel`](Self::cancel) leaves the
/// contexts uncancelled.
#[derive(Debug)]
pub struct CancelHandle {
    tx: watch::Sender<bool>,
}

impl CancelHandle {
    pub fn cancel(&self) {
        self.tx.send_replace(true);
    }
}

impl CallContext {
    /// A context that is never cancelled and has no deadline.
    pub fn background() -> Self {
        Self::default()
    }

    /// Returns a cancellable copy of this context and its cancel handle.
    ///
    /// The copy keeps this context's deadline and cancellation signals; the
    /// handle cancels the copy only.
    pub fn with_cancel(&self) -> (Self, CancelHandle) {
        let (tx, rx) = watch::channel(false);
        let mut cancel = self.cancel.clone();
        cancel.push(rx);
        let context = Self {
            cancel,
            deadline: self.deadline,
        };
        (context, CancelHandle { tx })
    }

    /// Returns a copy of this context that expires after `timeout`.
    ///
    /// An earlier existing deadline is kept.
    pub fn with_timeout(&self, timeout: Duration) -> Self {
        let deadline = Instant::now() + timeout;
        Self {
            cancel: self.cancel.clone(),
            deadline: Some(self.deadline.map_or(deadline, |current| current.min(deadline))),
        }
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.iter().any(|rx| *rx.borrow())
    }

    /// Returns the error this context would fail with right now, if any.
    pub fn err(&self) -> Option<Error> {
        if self.is_cancelled() {
            Some(Error::Cancelled)
        } else if self.deadline.is_some_and(|deadline| Instant::now() >= deadline) {
            Some(Error::DeadlineExceeded)
        } else {
            None
        }
    }

    /// Drives `operation` to completion unless the context ends first.
    ///
    /// Fails without polling `operation` if the context is already done.
    pub async fn run<T, F>(&self, operation: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        if let Some(error) = self.err() {
            return Err(error);
        }

        let cancel = cancelled(self.cancel.clone());
        let expired = async {
            match self.deadline {
                Some(deadline) => tokio::time::sleep_until(deadline).await,
                None => pending::<()>().await,
            }
        };

        tokio::select! {
            biased;
            _ = cancel => Err(Error::Cancelled),
            _ = expired => Err(Error::DeadlineExceeded),
            result = operation => result,
        }
    }

    /// Drives a mutating `operation` that must not be abandoned once started.
    ///
    /// The context is checked before `operation` is polled. After that the
    /// operation runs to completion, so the returned outcome always matches
    /// what the provider committed; providers observe `self` up to their
    /// commit point.
    pub async fn run_to_commit<T, F>(&self, operation: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        if let Some(error) = self.err() {
            return Err(error);
        }
        operation.await
    }
}

/// Resolves once any of `signals` is set to `true`.
async fn cancelled(mut signals: Vec<watch::Receiver<bool>>) {
    match signals.pop() {
        None => pending::<()>().await,
        Some(rx) if signals.is_empty() => wait_cancelled(rx).await,
        Some(rx) => {
            let mut waiting = JoinSet::new();
            waiting.spawn(wait_cancelled(rx));
            for rx in signals {
                waiting.spawn(wait_cancelled(rx));
            }
            let _ = waiting.join_next().await;
        }
    }
}

/// Resolves once `rx` reads `true`; never resolves if its handle is dropped.
async fn wait_cancelled(mut rx: watch::Receiver<bool>) {
    if rx.wait_for(|cancelled| *cancelled).await.is_err() {
        pending::<()>().await;
    }
}
