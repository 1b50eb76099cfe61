//! Process-wide sound unlock flag with synchronous fan-out.
//!
//! The flag starts locked and flips to unlocked at most once per process. Every
//! subscriber is notified inside the `unlock()` call itself, in subscription
//! order, so an unmuted `play()` issued by a listener still runs within the
//! user-gesture window that triggered the unlock.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, OnceLock, Weak};

use parking_lot::Mutex;
use serde::Serialize;
use tracing::{debug, info};

type Listener = Arc<dyn Fn(&SoundUnlockState) + Send + Sync>;

/// Snapshot of the shared unlock flag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SoundUnlockState {
    pub unlocked: bool,
    /// Bumped once per false -> true transition
    pub version: u64,
}

struct CoordinatorInner {
    unlocked: AtomicBool,
    version: AtomicU64,
    next_subscription: AtomicU64,
    listeners: Mutex<Vec<(u64, Listener)>>,
}

/// Single-writer, many-reader sound unlock state.
///
/// Cloning yields another handle onto the same flag. Use [`global`] for the
/// process-wide instance and [`SoundUnlockCoordinator::new`] for isolated
/// instances in tests.
///
/// [`global`]: SoundUnlockCoordinator::global
#[derive(Clone)]
pub struct SoundUnlockCoordinator {
    inner: Arc<CoordinatorInner>,
}

impl std::fmt::Debug for SoundUnlockCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SoundUnlockCoordinator")
            .field("state", &self.state())
            .field("subscribers", &self.subscriber_count())
            .finish()
    }
}

impl Default for SoundUnlockCoordinator {
    fn default() -> Self {
        Self::new()
    }
}

impl SoundUnlockCoordinator {
    /// Creates an isolated coordinator in the locked state.
    pub fn new() -> Self {
        Self {
            inner: Arc::new(CoordinatorInner {
                unlocked: AtomicBool::new(false),
                version: AtomicU64::new(0),
                next_subscription: AtomicU64::new(1),
                listeners: Mutex::new(Vec::new()),
            }),
        }
    }

    /// Returns the process-wide coordinator, created locked on first use.
    pub fn global() -> &'static SoundUnlockCoordinator {
        static GLOBAL: OnceLock<SoundUnlockCoordinator> = OnceLock::new();
        GLOBAL.get_or_init(SoundUnlockCoordinator::new)
    }

    pub fn is_unlocked(&self) -> bool {
        self.inner.unlocked.load(Ordering::Acquire)
    }

    pub fn state(&self) -> SoundUnlockState {
        SoundUnlockState {
            unlocked: self.is_unlocked(),
            version: self.inner.version.load(Ordering::Acquire),
        }
    }

    /// Flips the flag and notifies every subscriber before returning.
    ///
    /// Calling this when already unlocked is a no-op and notifies nobody.
    pub fn unlock(&self) {
        if self
            .inner
            .unlocked
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            debug!("Sound already unlocked, ignoring repeated unlock");
            return;
        }

        let version = self.inner.version.fetch_add(1, Ordering::AcqRel) + 1;
        let state = SoundUnlockState {
            unlocked: true,
            version,
        };

        // Snapshot so listeners may subscribe or unsubscribe while being notified
        let listeners: Vec<Listener> = self
            .inner
            .listeners
            .lock()
            .iter()
            .map(|(_, listener)| Arc::clone(listener))
            .collect();

        info!(
            "Sound unlocked (version {}), notifying {} subscribers",
            version,
            listeners.len()
        );

        for listener in listeners {
            listener(&state);
        }
    }

    /// Registers a listener called on the unlock transition.
    ///
    /// The listener stays registered until the returned [`Subscription`] is
    /// dropped or explicitly unsubscribed.
    pub fn subscribe<F>(&self, listener: F) -> Subscription
    where
        F: Fn(&SoundUnlockState) + Send + Sync + 'static,
    {
        let id = self.inner.next_subscription.fetch_add(1, Ordering::Relaxed);
        self.inner.listeners.lock().push((id, Arc::new(listener)));
        Subscription {
            id,
            coordinator: Arc::downgrade(&self.inner),
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.inner.listeners.lock().len()
    }
}

/// Handle removing a listener from its coordinator.
#[must_use = "dropping a Subscription unsubscribes the listener immediately"]
pub struct Subscription {
    id: u64,
    coordinator: Weak<CoordinatorInner>,
}

impl Subscription {
    /// Removes the listener now. Equivalent to dropping the handle.
    pub fn unsubscribe(self) {}

    fn remove(&self) {
        if let Some(inner) = self.coordinator.upgrade() {
            inner.listeners.lock().retain(|(id, _)| *id != self.id);
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.remove();
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription").field("id", &self.id).finish()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;

    use super::*;

    #[test]
    fn test_starts_locked() {
        let coordinator = SoundUnlockCoordinator::new();
        assert!(!coordinator.is_unlocked());
        assert_eq!(
            coordinator.state(),
            SoundUnlockState {
                unlocked: false,
                version: 0
            }
        );
    }

    #[test]
    fn test_unlock_notifies_in_subscription_order() {
        let coordinator = SoundUnlockCoordinator::new();
        let order = Arc::new(Mutex::new(Vec::new()));

        let mut subscriptions = Vec::new();
        for name in ["first", "second", "third"] {
            let order = Arc::clone(&order);
            subscriptions.push(coordinator.subscribe(move |state| {
                assert!(state.unlocked);
                order.lock().push(name);
            }));
        }

        coordinator.unlock();

        assert!(coordinator.is_unlocked());
        assert_eq!(*order.lock(), vec!["first", "second", "third"]);
    }

    #[test]
    fn test_unlock_is_idempotent() {
        let coordinator = SoundUnlockCoordinator::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let _subscription = coordinator.subscribe(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        for _ in 0..5 {
            coordinator.unlock();
        }

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(coordinator.state().version, 1);
    }

    #[test]
    fn test_dropped_subscription_is_not_notified() {
        let coordinator = SoundUnlockCoordinator::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let subscription = coordinator.subscribe(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        assert_eq!(coordinator.subscriber_count(), 1);

        subscription.unsubscribe();
        assert_eq!(coordinator.subscriber_count(), 0);

        coordinator.unlock();
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_listener_may_subscribe_during_notification() {
        let coordinator = SoundUnlockCoordinator::new();
        let late = Arc::new(Mutex::new(None));
        let handle = coordinator.clone();
        let slot = Arc::clone(&late);
        let _subscription = coordinator.subscribe(move |_| {
            *slot.lock() = Some(handle.subscribe(|_| {}));
        });

        coordinator.unlock();

        assert!(late.lock().is_some());
        assert_eq!(coordinator.subscriber_count(), 2);
    }

    #[test]
    fn test_clones_share_state() {
        let coordinator = SoundUnlockCoordinator::new();
        let other = coordinator.clone();
        other.unlock();
        assert!(coordinator.is_unlocked());
    }
}
