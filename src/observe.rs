//! Snapshot publication and scoped subscriptions.
//!
//! Every observable component keeps its state inside a [`Published`] cell.
//! Writes go through `&mut self`, so only the owning task can mutate; readers
//! get cheap `Arc` snapshots through a `tokio::sync::watch` receiver.

use std::sync::Arc;

use tokio::sync::watch;

/// Observable state owned by exactly one writer.
#[derive(Debug)]
pub struct Published<T> {
    tx: watch::Sender<Arc<T>>,
}

impl<T: Clone> Published<T> {
    #[must_use]
    pub fn new(initial: T) -> Self {
        let (tx, _rx) = watch::channel(Arc::new(initial));
        Self { tx }
    }

    /// Current value as an immutable snapshot.
    #[must_use]
    pub fn snapshot(&self) -> Arc<T> {
        Arc::clone(&self.tx.borrow())
    }

    /// Subscribes to every future publication.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<Arc<T>> {
        self.tx.subscribe()
    }

    /// Mutates the value in place. Receivers are notified only when `f`
    /// reports a change.
    pub fn modify(&mut self, f: impl FnOnce(&mut T) -> bool) -> bool {
        self.tx.send_if_modified(|current| f(Arc::make_mut(current)))
    }

    /// Read access without taking a snapshot.
    pub fn with<R>(&self, f: impl FnOnce(&T) -> R) -> R {
        f(&self.tx.borrow())
    }
}

/// Snapshots that count their own data replacements.
pub trait Revisioned {
    /// Monotonic counter bumped once per data replacement.
    fn revision(&self) -> u64;
}

/// A consumer's position in a [`Published`] stream.
///
/// The subscription remembers the last revision it handed out, so each data
/// replacement is observed exactly once no matter how many status-only
/// publications happen in between. Dropping it stops the tracking.
#[derive(Debug)]
pub struct Subscription<T> {
    rx: watch::Receiver<Arc<T>>,
    seen: u64,
}

impl<T: Revisioned> Subscription<T> {
    #[must_use]
    pub const fn new(rx: watch::Receiver<Arc<T>>) -> Self {
        Self { rx, seen: 0 }
    }

    /// Returns the latest snapshot if its revision is newer than the last one
    /// returned.
    pub fn poll(&mut self) -> Option<Arc<T>> {
        let snapshot = Arc::clone(&self.rx.borrow_and_update());
        let revision = snapshot.revision();
        if revision > self.seen {
            self.seen = revision;
            Some(snapshot)
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, Default)]
    struct Counter {
        revision: u64,
        label: &'static str,
    }

    impl Revisioned for Counter {
        fn revision(&self) -> u64 {
            self.revision
        }
    }

    #[test]
    fn modify_without_change_does_not_notify() {
        let mut cell = Published::new(Counter::default());
        let rx = cell.subscribe();

        assert!(!cell.modify(|_| false));
        assert!(!rx.has_changed().unwrap());

        assert!(cell.modify(|c| {
            c.label = "x";
            true
        }));
        assert!(rx.has_changed().unwrap());
        assert_eq!(cell.snapshot().label, "x");
    }

    #[test]
    fn snapshots_are_isolated_from_later_writes() {
        let mut cell = Published::new(Counter::default());
        let before = cell.snapshot();
        cell.modify(|c| {
            c.label = "after";
            true
        });
        assert_eq!(before.label, "");
        assert_eq!(cell.snapshot().label, "after");
    }

    #[test]
    fn subscription_reports_each_revision_once() {
        let mut cell = Published::new(Counter::default());
        let mut sub = Subscription::new(cell.subscribe());
        assert!(sub.poll().is_none());

        cell.modify(|c| {
            *c = Counter {
                revision: 1,
                label: "one",
            };
            true
        });
        assert_eq!(sub.poll().map(|c| c.label), Some("one"));
        assert!(sub.poll().is_none());

        // Status-only publication keeps the revision.
        cell.modify(|c| {
            c.label = "status";
            true
        });
        assert!(sub.poll().is_none());
        assert_eq!(sub.seen, 1);
    }
}
