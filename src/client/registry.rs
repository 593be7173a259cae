//! Subscription bookkeeping
//!
//! The registry maps each destination to the named handlers interested in
//! it and to the broker-side subscription id, if the broker currently knows
//! about it. Many consumers share one broker SUBSCRIBE per destination; each
//! one owns a handler key and can come and go without disturbing the rest.
//!
//! Handler maps keep insertion order, which is both the dispatch order and
//! the order used when subscriptions are restored after a reconnect. A
//! destination is only present while it has at least one handler.

use std::fmt;
use std::sync::Arc;

use indexmap::IndexMap;
use serde_json::Value;

/// Key under which `subscribe` registers its handler.
pub const DEFAULT_HANDLER_KEY: &str = "default";

pub type Handler = Arc<dyn Fn(&Value) + Send + Sync>;

/// Handler used when a destination has to be created before a keyed handler
/// can be attached to it.
pub fn noop_handler() -> Handler {
    Arc::new(|_: &Value| {})
}

pub struct Subscription {
    destination: String,
    /// `None` while the broker holds no SUBSCRIBE for this destination.
    broker_id: Option<String>,
    handlers: IndexMap<String, Handler>,
}

impl Subscription {
    pub fn destination(&self) -> &str {
        &self.destination
    }

    pub fn broker_id(&self) -> Option<&str> {
        self.broker_id.as_deref()
    }

    pub fn handler_keys(&self) -> impl Iterator<Item = &str> {
        self.handlers.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("destination", &self.destination)
            .field("broker_id", &self.broker_id)
            .field("handlers", &self.handlers.keys().collect::<Vec<_>>())
            .finish()
    }
}

/// Snapshot of one destination's handlers, returned by `subscribe`.
#[derive(Clone)]
pub struct SubscriptionHandle {
    pub destination: String,
    pub handlers: IndexMap<String, Handler>,
}

impl fmt::Debug for SubscriptionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SubscriptionHandle")
            .field("destination", &self.destination)
            .field("handlers", &self.handlers.keys().collect::<Vec<_>>())
            .finish()
    }
}

#[derive(Debug, Default)]
pub struct SubscriptionRegistry {
    subscriptions: IndexMap<String, Subscription>,
    next_id: u64,
}

impl SubscriptionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, destination: &str) -> bool {
        self.subscriptions.contains_key(destination)
    }

    pub fn get(&self, destination: &str) -> Option<&Subscription> {
        self.subscriptions.get(destination)
    }

    pub fn len(&self) -> usize {
        self.subscriptions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.subscriptions.is_empty()
    }

    pub fn destinations(&self) -> impl Iterator<Item = &str> {
        self.subscriptions.keys().map(String::as_str)
    }

    /// Creates `destination` with `handler` under the default key.
    ///
    /// Returns the broker subscription id to SUBSCRIBE with, or `None` when
    /// the destination already exists (nothing is changed in that case).
    pub fn open(&mut self, destination: &str, handler: Handler) -> Option<String> {
        if self.subscriptions.contains_key(destination) {
            return None;
        }

        let id = self.allocate_id();
        let mut handlers = IndexMap::new();
        handlers.insert(DEFAULT_HANDLER_KEY.to_string(), handler);
        self.subscriptions.insert(
            destination.to_string(),
            Subscription {
                destination: destination.to_string(),
                broker_id: Some(id.clone()),
                handlers,
            },
        );
        Some(id)
    }

    /// Adds `handler` under `key`. The first registrant of a key keeps it:
    /// returns `false` for a taken key or an unknown destination.
    pub fn insert_handler(&mut self, destination: &str, key: &str, handler: Handler) -> bool {
        let Some(subscription) = self.subscriptions.get_mut(destination) else {
            return false;
        };
        if subscription.handlers.contains_key(key) {
            return false;
        }
        subscription.handlers.insert(key.to_string(), handler);
        true
    }

    /// Removes one handler and returns how many remain, or `None` if there
    /// was no such handler. An empty destination is left for the caller to
    /// unsubscribe.
    pub fn remove_handler(&mut self, destination: &str, key: &str) -> Option<usize> {
        let subscription = self.subscriptions.get_mut(destination)?;
        subscription.handlers.shift_remove(key)?;
        Some(subscription.handlers.len())
    }

    pub fn remove(&mut self, destination: &str) -> Option<Subscription> {
        self.subscriptions.shift_remove(destination)
    }

    /// Handlers for `destination` in insertion order.
    pub fn handlers(&self, destination: &str) -> Vec<Handler> {
        self.subscriptions
            .get(destination)
            .map(|s| s.handlers.values().cloned().collect())
            .unwrap_or_default()
    }

    pub fn handle(&self, destination: &str) -> Option<SubscriptionHandle> {
        self.subscriptions
            .get(destination)
            .map(|s| SubscriptionHandle {
                destination: s.destination.clone(),
                handlers: s.handlers.clone(),
            })
    }

    /// Forgets every broker-side id after the connection dropped. Local
    /// handlers are untouched.
    pub fn invalidate_broker_ids(&mut self) {
        for subscription in self.subscriptions.values_mut() {
            subscription.broker_id = None;
        }
    }

    /// Assigns a fresh broker id to every destination, in registration
    /// order, and returns `(id, destination)` pairs to SUBSCRIBE with.
    pub fn rebind_all(&mut self) -> Vec<(String, String)> {
        let mut rebound = Vec::with_capacity(self.subscriptions.len());
        for index in 0..self.subscriptions.len() {
            let id = self.allocate_id();
            if let Some((destination, subscription)) = self.subscriptions.get_index_mut(index) {
                subscription.broker_id = Some(id.clone());
                rebound.push((id, destination.clone()));
            }
        }
        rebound
    }

    fn allocate_id(&mut self) -> String {
        let id = format!("sub-{}", self.next_id);
        self.next_id += 1;
        id
    }
}
