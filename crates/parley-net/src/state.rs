//! Worker-owned state published to the rest of the program.
//!
//! The worker is the only writer. Handles and UI code read the latest value
//! or subscribe and await changes.

use tokio::sync::watch;

/// Latest value of a piece of worker state.
///
/// Publishing a value equal to the current one wakes nobody, so subscribers
/// only see real transitions.
#[derive(Debug)]
pub struct StateWatch<T> {
    tx: watch::Sender<T>,
}

impl<T: Default> Default for StateWatch<T> {
    fn default() -> Self {
        Self {
            tx: watch::Sender::new(T::default()),
        }
    }
}

impl<T: Clone + PartialEq> StateWatch<T> {
    pub fn new(initial: T) -> Self {
        Self {
            tx: watch::Sender::new(initial),
        }
    }

    /// Replace the value. Returns whether it changed.
    pub fn publish(&self, value: T) -> bool {
        self.tx.send_if_modified(|current| {
            if *current == value {
                return false;
            }
            *current = value;
            true
        })
    }

    /// Snapshot of the current value.
    pub fn current(&self) -> T {
        self.tx.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<T> {
        self.tx.subscribe()
    }
}
