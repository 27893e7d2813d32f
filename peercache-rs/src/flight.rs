//! Collapses concurrent computations for the same key into a single one.
//!
//! If many tasks miss the cache for the same key at the same time, we only want to load the value
//! once. The first caller for a key becomes the **leader** and actually runs the given loader. All
//! callers which arrive while the leader is still busy become **followers**. They don't run their
//! loader at all but wait for the leader and then receive a clone of its result.
//!
//! Once the leader has published its result, the in-flight record is removed. Therefore a caller
//! which arrives afterwards starts a fresh computation. This also holds for failed computations,
//! as errors are simply part of the published value.
//!
//! If the leader is cancelled (its future is dropped before completing), its record is removed
//! and the followers re-enter the flight, so that one of them takes over.
//!
//! # Examples
//! ```
//! # use peercache::flight::Flight;
//! # #[tokio::main]
//! # async fn main() {
//! let flight = Flight::new();
//!
//! let value = flight.execute("Tom", || async { 630 }).await;
//! assert_eq!(value, 630);
//! assert_eq!(flight.in_flight(), 0);
//! # }
//! ```
use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex};

use tokio::sync::watch;

type Slot<T> = Arc<watch::Sender<Option<T>>>;

/// Keeps track of all computations which are currently in flight.
pub struct Flight<T> {
    calls: Mutex<HashMap<String, Slot<T>>>,
}

enum Role<T> {
    Leader(Slot<T>),
    Follower(watch::Receiver<Option<T>>),
}

/// Removes the record of a leader once it is done (or has been cancelled).
struct CallGuard<'a, T> {
    flight: &'a Flight<T>,
    key: &'a str,
    slot: Slot<T>,
}

impl<T> Drop for CallGuard<'_, T> {
    fn drop(&mut self) {
        let mut calls = self.flight.calls.lock().unwrap();
        if calls
            .get(self.key)
            .map(|slot| Arc::ptr_eq(slot, &self.slot))
            .unwrap_or(false)
        {
            let _ = calls.remove(self.key);
        }
    }
}

impl<T: Clone> Default for Flight<T> {
    fn default() -> Self {
        Flight::new()
    }
}

impl<T: Clone> Flight<T> {
    /// Creates a new flight without any pending calls.
    pub fn new() -> Self {
        Flight {
            calls: Mutex::new(HashMap::new()),
        }
    }

    /// Executes the given loader unless a computation for the same key is already in flight.
    ///
    /// In the latter case, this waits for the pending computation and returns a clone of its
    /// result. The internal lock is only held while registering or looking up the call, never
    /// while the loader runs.
    pub async fn execute<F, Fut>(&self, key: &str, loader: F) -> T
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T>,
    {
        let slot = loop {
            match self.join(key) {
                Role::Leader(slot) => break slot,
                Role::Follower(mut receiver) => {
                    let result = receiver
                        .wait_for(Option::is_some)
                        .await
                        .ok()
                        .and_then(|value| value.clone());

                    if let Some(result) = result {
                        return result;
                    }

                    log::debug!(
                        "The leading call for {} was abandoned. Re-entering the flight...",
                        key
                    );
                }
            }
        };

        let guard = CallGuard {
            flight: self,
            key,
            slot: slot.clone(),
        };

        let result = loader().await;
        let _ = slot.send_replace(Some(result.clone()));
        std::mem::drop(guard);

        result
    }

    /// Either registers a new call for the given key or subscribes to the pending one.
    fn join(&self, key: &str) -> Role<T> {
        let mut calls = self.calls.lock().unwrap();
        if let Some(slot) = calls.get(key) {
            return Role::Follower(slot.subscribe());
        }

        let (sender, _) = watch::channel(None);
        let slot = Arc::new(sender);
        let _ = calls.insert(key.to_owned(), slot.clone());

        Role::Leader(slot)
    }

    /// Returns the number of keys which are currently being computed.
    pub fn in_flight(&self) -> usize {
        self.calls.lock().unwrap().len()
    }
}
