// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Per-data-item change notification.
//!
//! Every [`DataItem`](crate::device_model::data_item::DataItem) carries a
//! [`ChangeSignaler`]; the long-poll streamer subscribes a [`ChangeObserver`]
//! to each data item it filters on. Appends signal the observer with the
//! sequence number just assigned, and the observer keeps the *minimum*
//! signaled sequence until reset so the earliest interesting observation
//! wins. A dropped observer unsubscribes itself: signalers hold weak
//! references and prune dead ones while signaling.

use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use tokio::sync::Notify;

#[derive(Debug, Default)]
struct ObserverCore {
    triggered: Mutex<Option<u64>>,
    notify: Notify,
}

impl ObserverCore {
    fn signal(&self, sequence: u64) {
        let mut triggered = self.triggered.lock().unwrap();
        *triggered = Some(match *triggered {
            Some(existing) => existing.min(sequence),
            None => sequence,
        });
        drop(triggered);
        self.notify.notify_one();
    }
}

/// Blocks a streamer until one of its subscribed data items is appended to.
#[derive(Debug, Default)]
pub struct ChangeObserver {
    core: Arc<ObserverCore>,
}

impl ChangeObserver {
    /// Create an unsubscribed observer.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// True once any subscribed data item has signaled since the last reset.
    ///
    /// # Panics
    /// Panics if the observer mutex is poisoned.
    #[must_use]
    pub fn was_signaled(&self) -> bool {
        self.core.triggered.lock().unwrap().is_some()
    }

    /// The earliest signaled sequence since the last reset.
    ///
    /// # Panics
    /// Panics if the observer mutex is poisoned.
    #[must_use]
    pub fn triggered_sequence(&self) -> Option<u64> {
        *self.core.triggered.lock().unwrap()
    }

    /// Clear the triggered sequence. The streamer calls this while holding
    /// the buffer's sequence lock so no append can slip between a read and
    /// the reset.
    ///
    /// # Panics
    /// Panics if the observer mutex is poisoned.
    pub fn reset(&self) {
        *self.core.triggered.lock().unwrap() = None;
    }

    /// Wait up to `timeout` for a signal.
    ///
    /// Returns `true` when the observer woke before the timeout elapsed.
    /// Spurious wakeups are possible; callers must confirm with
    /// [`was_signaled`](Self::was_signaled) and loop for the remainder of
    /// their deadline.
    pub async fn wait(&self, timeout: Duration) -> bool {
        if self.was_signaled() {
            return true;
        }
        tokio::time::timeout(timeout, self.core.notify.notified())
            .await
            .is_ok()
    }

    fn downgrade(&self) -> Weak<ObserverCore> {
        Arc::downgrade(&self.core)
    }

    fn is(&self, core: &Weak<ObserverCore>) -> bool {
        core.upgrade()
            .is_some_and(|core| Arc::ptr_eq(&core, &self.core))
    }
}

/// The signaling side: one per data item, holding the subscribed observers.
#[derive(Debug, Default)]
pub struct ChangeSignaler {
    observers: Mutex<Vec<Weak<ObserverCore>>>,
}

impl ChangeSignaler {
    /// Subscribe an observer. Adding the same observer twice is a no-op.
    ///
    /// # Panics
    /// Panics if the observer-list mutex is poisoned.
    pub fn add_observer(&self, observer: &ChangeObserver) {
        let mut observers = self.observers.lock().unwrap();
        if !observers.iter().any(|existing| observer.is(existing)) {
            observers.push(observer.downgrade());
        }
    }

    /// Unsubscribe an observer.
    ///
    /// # Panics
    /// Panics if the observer-list mutex is poisoned.
    pub fn remove_observer(&self, observer: &ChangeObserver) {
        let mut observers = self.observers.lock().unwrap();
        observers.retain(|existing| !observer.is(existing));
    }

    /// Signal every live observer and drop the dead ones.
    ///
    /// # Panics
    /// Panics if the observer-list mutex is poisoned.
    pub fn signal(&self, sequence: u64) {
        let mut observers = self.observers.lock().unwrap();
        observers.retain(|observer| match observer.upgrade() {
            Some(core) => {
                core.signal(sequence);
                true
            }
            None => false,
        });
    }
}
