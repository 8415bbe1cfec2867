//! In-flight load tracking
//!
//! A key is marked in flight before its provider call is issued and cleared
//! exactly once when the call finishes. Clearing is tied to the lifetime of
//! an [`InFlightGuard`], so errors, panics and dropped futures all clear the
//! marker. Waiters are woken through a per-key completion signal.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::watch;

use crate::key::AssetKey;

struct InFlightSlot {
    /// Ticket of the guard owning this slot
    ticket: u64,
    /// Flipped to `true` when the load completes
    signal: watch::Sender<bool>,
    /// A release was requested while the load was running
    release_requested: bool,
}

#[derive(Default)]
struct Shared {
    slots: Mutex<HashMap<AssetKey, InFlightSlot>>,
    next_ticket: AtomicU64,
}

/// Registry of keys with an outstanding load
#[derive(Clone, Default)]
pub struct InFlightRegistry {
    shared: Arc<Shared>,
}

impl InFlightRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark `key` as in flight
    ///
    /// Returns `None` when the key is already in flight; the existing
    /// marker is left untouched.
    pub fn mark_in_flight(&self, key: &AssetKey) -> Option<InFlightGuard> {
        let mut slots = self.shared.slots.lock();
        if slots.contains_key(key) {
            return None;
        }

        let ticket = self.shared.next_ticket.fetch_add(1, Ordering::Relaxed);
        let (signal, _) = watch::channel(false);
        slots.insert(
            key.clone(),
            InFlightSlot {
                ticket,
                signal,
                release_requested: false,
            },
        );
        log::trace!("Load started: {}", key);

        Some(InFlightGuard {
            registry: self.clone(),
            key: key.clone(),
            ticket,
        })
    }

    /// Check whether a load for `key` is outstanding
    pub fn is_in_flight(&self, key: &AssetKey) -> bool {
        self.shared.slots.lock().contains_key(key)
    }

    /// Get a waiter for the outstanding load of `key`, if any
    pub fn waiter(&self, key: &AssetKey) -> Option<InFlightWaiter> {
        self.shared
            .slots
            .lock()
            .get(key)
            .map(|slot| InFlightWaiter {
                receiver: slot.signal.subscribe(),
            })
    }

    /// Suspend until `key` is no longer in flight
    ///
    /// Returns immediately when nothing is loading.
    pub async fn wait_until_cleared(&self, key: &AssetKey) {
        if let Some(waiter) = self.waiter(key) {
            waiter.cleared().await;
        }
    }

    /// Wait for any outstanding load of `key`, then mark it in flight
    ///
    /// Serializes work on a key that is not coalesced, such as
    /// instantiation.
    pub async fn acquire(&self, key: &AssetKey) -> InFlightGuard {
        loop {
            if let Some(guard) = self.mark_in_flight(key) {
                return guard;
            }
            self.wait_until_cleared(key).await;
        }
    }

    /// Ask for `key` to be released as soon as its load completes
    ///
    /// Returns `false` when the key is not in flight.
    pub fn request_release(&self, key: &AssetKey) -> bool {
        match self.shared.slots.lock().get_mut(key) {
            Some(slot) => {
                slot.release_requested = true;
                true
            }
            None => false,
        }
    }

    /// Number of outstanding loads
    pub fn len(&self) -> usize {
        self.shared.slots.lock().len()
    }

    /// Check if nothing is loading
    pub fn is_empty(&self) -> bool {
        self.shared.slots.lock().is_empty()
    }

    /// Keys currently in flight
    pub fn keys(&self) -> Vec<AssetKey> {
        self.shared.slots.lock().keys().cloned().collect()
    }

    /// Drop every marker and wake all waiters
    ///
    /// Guards still held by running loads become inert.
    pub fn clear(&self) {
        let drained: Vec<_> = self.shared.slots.lock().drain().collect();
        for (_, slot) in drained {
            slot.signal.send_replace(true);
        }
    }

    fn finish(&self, key: &AssetKey, ticket: u64) {
        let slot = {
            let mut slots = self.shared.slots.lock();
            match slots.get(key) {
                Some(slot) if slot.ticket == ticket => slots.remove(key),
                _ => None,
            }
        };

        if let Some(slot) = slot {
            slot.signal.send_replace(true);
            log::trace!("Load finished: {}", key);
        }
    }

    fn owns_slot(&self, key: &AssetKey, ticket: u64) -> bool {
        self.shared
            .slots
            .lock()
            .get(key)
            .map(|slot| slot.ticket == ticket)
            .unwrap_or(false)
    }

    fn release_requested(&self, key: &AssetKey, ticket: u64) -> bool {
        self.shared
            .slots
            .lock()
            .get(key)
            .map(|slot| slot.ticket == ticket && slot.release_requested)
            .unwrap_or(false)
    }
}

/// Clears its in-flight marker on drop
pub struct InFlightGuard {
    registry: InFlightRegistry,
    key: AssetKey,
    ticket: u64,
}

impl InFlightGuard {
    /// The key being loaded
    pub fn key(&self) -> &AssetKey {
        &self.key
    }

    /// Whether this guard still owns the marker for its key
    ///
    /// `false` once the registry was cleared while the load was running.
    pub fn is_current(&self) -> bool {
        self.registry.owns_slot(&self.key, self.ticket)
    }

    /// Whether a release was requested while this load was running
    pub fn release_requested(&self) -> bool {
        self.registry.release_requested(&self.key, self.ticket)
    }

    /// Clear the marker now
    pub fn clear(self) {}
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.registry.finish(&self.key, self.ticket);
    }
}

impl std::fmt::Debug for InFlightGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InFlightGuard")
            .field("key", &self.key)
            .field("ticket", &self.ticket)
            .finish()
    }
}

/// Resolves once a specific load completes
pub struct InFlightWaiter {
    receiver: watch::Receiver<bool>,
}

impl InFlightWaiter {
    /// Wait for the load to complete
    pub async fn cleared(mut self) {
        // A closed channel means the slot was dropped, which also counts as cleared.
        let _ = self.receiver.wait_for(|done| *done).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(s: &str) -> AssetKey {
        AssetKey::parse(s).unwrap()
    }

    #[test]
    fn test_mark_and_clear() {
        let registry = InFlightRegistry::new();
        let hero = key("hero");

        let guard = registry.mark_in_flight(&hero).unwrap();
        assert!(registry.is_in_flight(&hero));
        assert!(registry.mark_in_flight(&hero).is_none());
        assert_eq!(registry.len(), 1);

        guard.clear();
        assert!(!registry.is_in_flight(&hero));
        assert!(registry.is_empty());
    }

    #[test]
    fn test_stale_guard_is_inert() {
        let registry = InFlightRegistry::new();
        let hero = key("hero");

        let old = registry.mark_in_flight(&hero).unwrap();
        registry.clear();
        let new = registry.mark_in_flight(&hero).unwrap();

        assert!(!old.is_current());
        assert!(new.is_current());
        drop(old);
        assert!(registry.is_in_flight(&hero));
        drop(new);
        assert!(!registry.is_in_flight(&hero));
    }

    #[test]
    fn test_release_request() {
        let registry = InFlightRegistry::new();
        let hero = key("hero");

        assert!(!registry.request_release(&hero));
        let guard = registry.mark_in_flight(&hero).unwrap();
        assert!(!guard.release_requested());
        assert!(registry.request_release(&hero));
        assert!(guard.release_requested());
    }

    #[tokio::test]
    async fn test_wait_until_cleared() {
        let registry = InFlightRegistry::new();
        let hero = key("hero");

        // Nothing loading, resolves immediately
        registry.wait_until_cleared(&hero).await;

        let guard = registry.mark_in_flight(&hero).unwrap();
        let waiter = registry.waiter(&hero).unwrap();

        let wait = tokio::spawn(waiter.cleared());
        tokio::task::yield_now().await;
        assert!(!wait.is_finished());

        drop(guard);
        wait.await.unwrap();
    }

    #[tokio::test]
    async fn test_acquire_serializes() {
        let registry = InFlightRegistry::new();
        let hero = key("hero");

        let first = registry.acquire(&hero).await;
        let second = {
            let registry = registry.clone();
            let hero = hero.clone();
            tokio::spawn(async move {
                let guard = registry.acquire(&hero).await;
                guard.key().clone()
            })
        };

        tokio::task::yield_now().await;
        assert!(!second.is_finished());

        drop(first);
        assert_eq!(second.await.unwrap(), hero);
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn test_clear_wakes_waiters() {
        let registry = InFlightRegistry::new();
        let hero = key("hero");

        let _guard = registry.mark_in_flight(&hero).unwrap();
        let waiter = registry.waiter(&hero).unwrap();
        registry.clear();
        waiter.cleared().await;
        assert!(!registry.is_in_flight(&hero));
    }
}
