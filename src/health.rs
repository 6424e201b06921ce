//! # Health registry.
//!
//! [`Health`] tracks a set of named components, each flagged healthy or
//! unhealthy, and broadcasts change notifications to subscribers. The
//! supervisor uses it to gate advancement between priority groups: a
//! priority's processes must report all of their declared keys healthy before
//! the next priority begins to initialize.
//!
//! Notification semantics follow a single-slot model: each subscriber holds at
//! most one pending notification, so bursts of changes collapse and receivers
//! treat any signal as "re-check". A [`Subscription`] unsubscribes when
//! dropped.
//!
//! The registry is a cheap-clone handle; clones share state.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::SystemTime;

use tokio::sync::Notify;

use crate::error::Error;

/// Aggregate registry reporting the current health of application components.
#[derive(Clone, Default, Debug)]
pub struct Health {
    inner: Arc<Mutex<Registry>>,
}

#[derive(Default, Debug)]
struct Registry {
    components: HashMap<String, StatusCell>,
    subscribers: Vec<Option<Arc<Notify>>>,
}

#[derive(Debug)]
struct StatusCell {
    healthy: bool,
    last_updated: Option<SystemTime>,
}

impl Health {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Registry> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Returns true if every registered component is healthy. An empty
    /// registry is healthy.
    pub fn healthy(&self) -> bool {
        self.lock().components.values().all(|cell| cell.healthy)
    }

    /// Registers a fresh component under the given key. New components start
    /// unhealthy. Registration notifies subscribers.
    pub fn register(&self, key: impl Into<String>) -> Result<HealthStatus, Error> {
        let key = key.into();
        let mut registry = self.lock();
        if registry.components.contains_key(&key) {
            return Err(Error::HealthComponentAlreadyRegistered);
        }

        registry.components.insert(
            key.clone(),
            StatusCell {
                healthy: false,
                last_updated: None,
            },
        );
        registry.notify_all();
        drop(registry);

        Ok(HealthStatus {
            health: self.clone(),
            key,
        })
    }

    /// Returns a handle to the component registered under the given key.
    pub fn get(&self, key: &str) -> Option<HealthStatus> {
        if !self.lock().components.contains_key(key) {
            return None;
        }

        Some(HealthStatus {
            health: self.clone(),
            key: key.to_string(),
        })
    }

    /// Returns handles for every given key, atomically over one snapshot of
    /// the registry. Fails if any key is absent.
    pub fn get_all(&self, keys: &[String]) -> Result<Vec<HealthStatus>, Error> {
        let registry = self.lock();

        let mut statuses = Vec::with_capacity(keys.len());
        for key in keys {
            if !registry.components.contains_key(key) {
                return Err(Error::HealthComponentNotRegistered(key.clone()));
            }

            statuses.push(HealthStatus {
                health: self.clone(),
                key: key.clone(),
            });
        }

        Ok(statuses)
    }

    /// Subscribes to change notifications. The subscription is primed with one
    /// pending notification so the subscriber's first check runs immediately.
    pub fn subscribe(&self) -> Subscription {
        let notify = Arc::new(Notify::new());
        notify.notify_one();

        let mut registry = self.lock();
        let index = match registry.subscribers.iter().position(Option::is_none) {
            Some(free) => {
                registry.subscribers[free] = Some(Arc::clone(&notify));
                free
            }
            None => {
                registry.subscribers.push(Some(Arc::clone(&notify)));
                registry.subscribers.len() - 1
            }
        };

        Subscription {
            health: self.clone(),
            index,
            notify,
        }
    }

    fn unsubscribe(&self, index: usize) {
        let mut registry = self.lock();
        if let Some(slot) = registry.subscribers.get_mut(index) {
            *slot = None;
        }
    }
}

impl Registry {
    // Callers must hold the registry lock.
    fn notify_all(&self) {
        for subscriber in self.subscribers.iter().flatten() {
            subscriber.notify_one();
        }
    }
}

/// Handle to the health status of a single registered component.
#[derive(Clone, Debug)]
pub struct HealthStatus {
    health: Health,
    key: String,
}

impl HealthStatus {
    /// The key this component was registered under.
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Returns the component's current health.
    pub fn healthy(&self) -> bool {
        self.health
            .lock()
            .components
            .get(&self.key)
            .map(|cell| cell.healthy)
            .unwrap_or(false)
    }

    /// When the component's status last changed, if it ever did.
    pub fn last_updated(&self) -> Option<SystemTime> {
        self.health
            .lock()
            .components
            .get(&self.key)
            .and_then(|cell| cell.last_updated)
    }

    /// Sets the component's health. A write of the current value is a no-op
    /// and produces no notification.
    pub fn update(&self, healthy: bool) {
        let mut registry = self.health.lock();
        let Some(cell) = registry.components.get_mut(&self.key) else {
            return;
        };
        if cell.healthy == healthy {
            return;
        }

        cell.healthy = healthy;
        cell.last_updated = Some(SystemTime::now());
        registry.notify_all();
    }
}

/// A live subscription to registry change notifications. Dropping it
/// unsubscribes.
pub struct Subscription {
    health: Health,
    index: usize,
    notify: Arc<Notify>,
}

impl Subscription {
    /// Waits for the next notification. Consecutive changes collapse into a
    /// single pending notification.
    pub async fn changed(&self) {
        self.notify.notified().await;
    }

    /// Explicitly ends the subscription. Equivalent to dropping it.
    pub fn unsubscribe(self) {}
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.health.unsubscribe(self.index);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use tokio::time::timeout;

    async fn assert_no_notification(subscription: &Subscription) {
        let pending = timeout(Duration::from_millis(50), subscription.changed()).await;
        assert!(pending.is_err(), "expected no pending notification");
    }

    #[tokio::test]
    async fn duplicate_registration_is_rejected() {
        let health = Health::new();
        health.register("db").expect("fresh key");
        let err = health.register("db").expect_err("duplicate key");
        assert!(matches!(err, Error::HealthComponentAlreadyRegistered));
    }

    #[tokio::test]
    async fn empty_registry_is_healthy() {
        let health = Health::new();
        assert!(health.healthy());

        let status = health.register("db").expect("fresh key");
        assert!(!health.healthy());

        status.update(true);
        assert!(health.healthy());
    }

    #[tokio::test]
    async fn get_all_is_strict() {
        let health = Health::new();
        health.register("db").expect("fresh key");

        let err = health
            .get_all(&["db".to_string(), "cache".to_string()])
            .expect_err("unknown key");
        assert!(matches!(err, Error::HealthComponentNotRegistered(key) if key == "cache"));

        let statuses = health.get_all(&["db".to_string()]).expect("known key");
        assert_eq!(statuses.len(), 1);
        assert_eq!(statuses[0].key(), "db");
    }

    #[tokio::test(start_paused = true)]
    async fn equal_value_update_is_silent() {
        let health = Health::new();
        let status = health.register("db").expect("fresh key");

        let subscription = health.subscribe();
        subscription.changed().await; // primed notification

        status.update(false); // unchanged value
        assert_no_notification(&subscription).await;

        status.update(true);
        subscription.changed().await;
        assert!(status.healthy());
        assert!(status.last_updated().is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn notifications_collapse_to_one_slot() {
        let health = Health::new();
        let status = health.register("db").expect("fresh key");

        let subscription = health.subscribe();
        subscription.changed().await;

        status.update(true);
        status.update(false);

        subscription.changed().await; // both changes collapse into one signal
        assert_no_notification(&subscription).await;
    }

    #[tokio::test(start_paused = true)]
    async fn registration_notifies_subscribers() {
        let health = Health::new();
        let subscription = health.subscribe();
        subscription.changed().await;

        health.register("db").expect("fresh key");
        subscription.changed().await;
    }

    #[tokio::test]
    async fn dropped_subscription_is_removed() {
        let health = Health::new();
        let status = health.register("db").expect("fresh key");

        let first = health.subscribe();
        drop(first);

        // Updates after unsubscribe are delivered to live subscribers only.
        let second = health.subscribe();
        second.changed().await;
        status.update(true);
        second.changed().await;
        second.unsubscribe();

        status.update(false);
    }
}
