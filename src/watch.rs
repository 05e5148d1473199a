//! Change notification for configuration scopes.
//!
//! A [`Watcher`] delivers the change events of exactly one scope (never its
//! descendants) until it is closed, its provider goes away, or the call
//! context passed to [`Watcher::recv`] ends. Watchers on the same scope are
//! independent: each one receives every event (fan-out).
//!
//! Providers build watchers through a [`Notifier`], which owns the per-scope
//! subscriber list and a bounded history used to resume from a revision.

use std::collections::VecDeque;

use parking_lot::Mutex;
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::{RecvError, TryRecvError};
use tracing::trace;

use crate::call::CallContext;
use crate::error::{Error, Result};
use crate::model::{Global, Instance, Network};

/// Default per-watcher buffer size.
pub const DEFAULT_WATCH_BUFFER: usize = 64;

/// Default number of past events a [`Notifier`] keeps for resumption.
pub const DEFAULT_WATCH_HISTORY: usize = 256;

/// Options recognized when opening a watcher.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatcherOptions {
    /// Replay retained events with a revision greater than or equal to this one.
    pub start_revision: Option<u64>,

    /// Emit a synthetic [`WatchEventKind::Initial`] event with the current value.
    pub initial: bool,

    /// Events buffered for this watcher before the oldest are dropped.
    ///
    /// A watcher that falls further behind gets [`Error::WatcherLagged`].
    pub buffer: usize,
}

impl Default for WatcherOptions {
    fn default() -> Self {
        Self {
            start_revision: None,
            initial: false,
            buffer: DEFAULT_WATCH_BUFFER,
        }
    }
}

impl WatcherOptions {
    pub fn with_initial(mut self) -> Self {
        self.initial = true;
        self
    }

    pub fn from_revision(mut self, revision: u64) -> Self {
        self.start_revision = Some(revision);
        self
    }

    pub fn with_buffer(mut self, buffer: usize) -> Self {
        self.buffer = buffer;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchEventKind {
    /// Synthetic event carrying the value current at subscription time.
    Initial,
    /// The record was created or replaced.
    Put,
    /// The record was removed.
    Delete,
}

/// One change to a watched scope.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatchEvent<T> {
    /// Store revision at which the change was committed.
    pub revision: u64,
    pub kind: WatchEventKind,
    /// The record after the change; `None` for deletions or a missing record.
    pub value: Option<T>,
}

/// A subscription to the changes of one scope.
#[derive(Debug)]
pub struct Watcher<T> {
    backlog: VecDeque<WatchEvent<T>>,
    rx: Option<broadcast::Receiver<WatchEvent<T>>>,
}

pub type GlobalWatcher = Watcher<Global>;
pub type InstanceWatcher = Watcher<Instance>;
pub type NetworkWatcher = Watcher<Network>;

impl<T: Clone> Watcher<T> {
    /// Builds a watcher that first yields `backlog`, then events from `rx`.
    pub fn new(backlog: Vec<WatchEvent<T>>, rx: broadcast::Receiver<WatchEvent<T>>) -> Self {
        Self {
            backlog: backlog.into(),
            rx: Some(rx),
        }
    }

    /// A watcher that is already closed.
    pub fn closed() -> Self {
        Self {
            backlog: VecDeque::new(),
            rx: None,
        }
    }

    /// Waits for the next event.
    ///
    /// Returns [`Error::WatcherClosed`] once the watcher is closed or its
    /// provider dropped the scope, and a cancellation error if `ctx` ends.
    /// After [`Error::WatcherLagged`] the watcher remains usable and resumes
    /// with the oldest event still buffered.
    pub async fn recv(&mut self, ctx: &CallContext) -> Result<WatchEvent<T>> {
        if let Some(error) = ctx.err() {
            return Err(error);
        }
        if let Some(event) = self.backlog.pop_front() {
            return Ok(event);
        }
        let rx = self.rx.as_mut().ok_or(Error::WatcherClosed)?;

        let result = ctx
            .run(async {
                match rx.recv().await {
                    Ok(event) => Ok(event),
                    Err(RecvError::Lagged(skipped)) => Err(Error::WatcherLagged(skipped)),
                    Err(RecvError::Closed) => Err(Error::WatcherClosed),
                }
            })
            .await;

        if matches!(result, Err(Error::WatcherClosed)) {
            self.rx = None;
        }
        result
    }

    /// Returns the next event if one is ready, without waiting.
    pub fn try_recv(&mut self) -> Result<Option<WatchEvent<T>>> {
        if let Some(event) = self.backlog.pop_front() {
            return Ok(Some(event));
        }
        let rx = self.rx.as_mut().ok_or(Error::WatcherClosed)?;
        match rx.try_recv() {
            Ok(event) => Ok(Some(event)),
            Err(TryRecvError::Empty) => Ok(None),
            Err(TryRecvError::Lagged(skipped)) => Err(Error::WatcherLagged(skipped)),
            Err(TryRecvError::Closed) => {
                self.rx = None;
                Err(Error::WatcherClosed)
            }
        }
    }

    /// Stops the subscription and discards buffered events.
    pub fn close(&mut self) {
        self.backlog.clear();
        self.rx = None;
    }

    pub fn is_closed(&self) -> bool {
        self.rx.is_none() && self.backlog.is_empty()
    }
}

/// Fan-out of change events for one scope.
///
/// Each subscriber gets its own channel sized by [`WatcherOptions::buffer`],
/// so a slow watcher lags alone without holding back the others.
#[derive(Debug)]
pub struct Notifier<T> {
    inner: Mutex<NotifierState<T>>,
}

#[derive(Debug)]
struct NotifierState<T> {
    subscribers: Vec<broadcast::Sender<WatchEvent<T>>>,
    history: VecDeque<WatchEvent<T>>,
    history_limit: usize,
}

impl<T: Clone> Notifier<T> {
    pub fn new(history_limit: usize) -> Self {
        Self {
            inner: Mutex::new(NotifierState {
                subscribers: Vec::new(),
                history: VecDeque::new(),
                history_limit,
            }),
        }
    }

    /// Records `event` and delivers it to every live subscriber.
    ///
    /// Returns the number of watchers the event was delivered to.
    pub fn publish(&self, event: WatchEvent<T>) -> usize {
        let mut state = self.inner.lock();

        state.subscribers.retain(|tx| tx.receiver_count() > 0);
        let mut delivered = 0;
        for tx in &state.subscribers {
            if tx.send(event.clone()).is_ok() {
                delivered += 1;
            }
        }
        trace!(
            "published revision {} to {} watcher(s)",
            event.revision, delivered
        );

        if state.history_limit > 0 {
            if state.history.len() == state.history_limit {
                state.history.pop_front();
            }
            state.history.push_back(event);
        }

        delivered
    }

    /// Opens a watcher.
    ///
    /// Retained events at or after [`WatcherOptions::start_revision`] come
    /// first, followed by the [`WatchEventKind::Initial`] event when
    /// [`WatcherOptions::initial`] is set, so revisions never go backwards.
    /// `current` is the scope's value and revision at subscription time.
    /// Callers must hold whatever lock orders their writes so no event falls
    /// between the snapshot and the subscription.
    pub fn subscribe(&self, options: &WatcherOptions, current: (u64, Option<T>)) -> Watcher<T> {
        let mut state = self.inner.lock();
        state.subscribers.retain(|tx| tx.receiver_count() > 0);

        let mut backlog = Vec::new();
        if let Some(start) = options.start_revision {
            backlog.extend(
                state
                    .history
                    .iter()
                    .filter(|event| event.revision >= start)
                    .cloned(),
            );
        }
        if options.initial {
            let (revision, value) = current;
            backlog.push(WatchEvent {
                revision,
                kind: WatchEventKind::Initial,
                value,
            });
        }

        let (tx, rx) = broadcast::channel(options.buffer.max(1));
        state.subscribers.push(tx);
        Watcher::new(backlog, rx)
    }

    /// Number of watchers still subscribed.
    pub fn watcher_count(&self) -> usize {
        let state = self.inner.lock();
        state
            .subscribers
            .iter()
            .filter(|tx| tx.receiver_count() > 0)
            .count()
    }

    /// Closes every subscriber; their watchers report [`Error::WatcherClosed`].
    pub fn close_all(&self) {
        self.inner.lock().subscribers.clear();
    }
}

impl<T: Clone> Default for Notifier<T> {
    fn default() -> Self {
        Self::new(DEFAULT_WATCH_HISTORY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn put(revision: u64, value: &str) -> WatchEvent<String> {
        WatchEvent {
            revision,
            kind: WatchEventKind::Put,
            value: Some(value.to_string()),
        }
    }

    #[tokio::test]
    async fn test_fan_out() {
        let ctx = CallContext::background();
        let notifier = Notifier::new(16);
        let mut first = notifier.subscribe(&WatcherOptions::default(), (0, None));
        let mut second = notifier.subscribe(&WatcherOptions::default(), (0, None));

        assert_eq!(notifier.publish(put(1, "a")), 2);

        assert_eq!(first.recv(&ctx).await.unwrap(), put(1, "a"));
        assert_eq!(second.recv(&ctx).await.unwrap(), put(1, "a"));
    }

    #[tokio::test]
    async fn test_initial_event() {
        let ctx = CallContext::background();
        let notifier: Notifier<String> = Notifier::new(16);
        let mut watcher = notifier.subscribe(
            &WatcherOptions::default().with_initial(),
            (4, Some("current".to_string())),
        );

        let event = watcher.recv(&ctx).await.unwrap();
        assert_eq!(event.kind, WatchEventKind::Initial);
        assert_eq!(event.revision, 4);
        assert_eq!(event.value.as_deref(), Some("current"));
    }

    #[tokio::test]
    async fn test_resume_from_revision() {
        let ctx = CallContext::background();
        let notifier = Notifier::new(16);
        notifier.publish(put(1, "a"));
        notifier.publish(put(2, "b"));
        notifier.publish(put(3, "c"));

        let mut watcher =
            notifier.subscribe(&WatcherOptions::default().from_revision(2), (3, None));
        assert_eq!(watcher.recv(&ctx).await.unwrap().revision, 2);
        assert_eq!(watcher.recv(&ctx).await.unwrap().revision, 3);
        assert_eq!(watcher.try_recv().unwrap(), None);

        notifier.publish(put(4, "d"));
        assert_eq!(watcher.recv(&ctx).await.unwrap().revision, 4);
    }

    #[test]
    fn test_resume_with_initial_keeps_revisions_ordered() {
        let notifier = Notifier::new(16);
        notifier.publish(put(1, "a"));
        notifier.publish(put(2, "b"));

        let options = WatcherOptions::default().from_revision(1).with_initial();
        let mut watcher = notifier.subscribe(&options, (2, Some("b".to_string())));

        let mut revisions = vec![];
        while let Some(event) = watcher.try_recv().unwrap() {
            revisions.push((event.revision, event.kind));
        }
        assert_eq!(
            revisions,
            vec![
                (1, WatchEventKind::Put),
                (2, WatchEventKind::Put),
                (2, WatchEventKind::Initial)
            ]
        );
    }

    #[test]
    fn test_subscribe_drops_dead_senders() {
        let notifier: Notifier<String> = Notifier::new(4);
        for _ in 0..100 {
            drop(notifier.subscribe(&WatcherOptions::default(), (0, None)));
        }
        let _live = notifier.subscribe(&WatcherOptions::default(), (0, None));
        assert_eq!(notifier.inner.lock().subscribers.len(), 1);
        assert_eq!(notifier.watcher_count(), 1);
    }

    #[test]
    fn test_history_is_bounded() {
        let notifier = Notifier::new(2);
        for revision in 1..=5 {
            notifier.publish(put(revision, "x"));
        }
        let mut watcher =
            notifier.subscribe(&WatcherOptions::default().from_revision(0), (5, None));
        assert_eq!(watcher.try_recv().unwrap().map(|event| event.revision), Some(4));
        assert_eq!(watcher.try_recv().unwrap().map(|event| event.revision), Some(5));
    }

    #[test]
    fn test_slow_watcher_lags_alone() {
        let notifier = Notifier::new(0);
        let mut slow = notifier.subscribe(&WatcherOptions::default().with_buffer(1), (0, None));
        let mut fast = notifier.subscribe(&WatcherOptions::default().with_buffer(8), (0, None));

        notifier.publish(put(1, "a"));
        notifier.publish(put(2, "b"));

        assert!(matches!(slow.try_recv(), Err(Error::WatcherLagged(1))));
        assert_eq!(slow.try_recv().unwrap().map(|event| event.revision), Some(2));
        assert_eq!(fast.try_recv().unwrap().map(|event| event.revision), Some(1));
        assert_eq!(fast.try_recv().unwrap().map(|event| event.revision), Some(2));
    }

    #[tokio::test]
    async fn test_close() {
        let ctx = CallContext::background();
        let notifier = Notifier::new(4);
        let mut watcher = notifier.subscribe(&WatcherOptions::default(), (0, None));
        assert_eq!(notifier.watcher_count(), 1);

        watcher.close();
        assert!(watcher.is_closed());
        assert!(matches!(watcher.recv(&ctx).await, Err(Error::WatcherClosed)));
        assert_eq!(notifier.watcher_count(), 0);
        assert_eq!(notifier.publish(put(1, "a")), 0);
    }

    #[tokio::test]
    async fn test_close_all_ends_watchers() {
        let ctx = CallContext::background();
        let notifier: Notifier<String> = Notifier::new(4);
        let mut watcher = notifier.subscribe(&WatcherOptions::default(), (0, None));
        notifier.close_all();
        assert!(matches!(watcher.recv(&ctx).await, Err(Error::WatcherClosed)));
        assert!(watcher.is_closed());
    }

    #[tokio::test]
    async fn test_recv_honors_cancellation() {
        let notifier: Notifier<String> = Notifier::new(4);
        let mut watcher = notifier.subscribe(&WatcherOptions::default(), (0, None));
        let (ctx, handle) = CallContext::background().with_cancel();
        handle.cancel();
        assert!(matches!(watcher.recv(&ctx).await, Err(Error::Cancelled)));
        assert!(!watcher.is_closed());
    }
}
