//! Subscription registry.
//!
//! Per connection: the channels it listens to, the highest event id already
//! delivered, and the owning session. A reverse index maps each channel to
//! the connections subscribed to it. The registry is the only mutable
//! shared structure of the bus; all mutations happen under one lock and
//! none of them await while holding it.
//!
//! Connections are held weakly. An entry whose connection has been dropped
//! is pruned the next time a lookup touches it, or by [`SubscriptionRegistry::prune`]
//! which the bus runs periodically, so a lost transport never leaks a
//! subscription.
//!
//! Delivery locks are kept per connection rather than per subscription: a
//! connection that is forgotten and subscribes again gets the same lock back,
//! so a delivery still running under the old subscription cannot overlap one
//! under the new.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Weak};

use tokio::sync::{Mutex, RwLock};
use tracing::debug;

use crate::channel::{Channel, NamespacedChannel};
use crate::event::EventId;
use crate::interfaces::{Connection, ConnectionId};

/// Snapshot of a connection's subscription.
#[derive(Debug, Clone, PartialEq)]
pub struct Subscription {
    pub channels: HashSet<NamespacedChannel>,
    pub last_delivered_id: EventId,
    pub session_id: String,
}

struct Entry {
    connection: Weak<dyn Connection>,
    subscription: Subscription,
}

/// Held for the whole delivery routine, serializing deliveries per connection.
/// Lives until the connection itself is dropped.
struct DeliveryLock {
    connection: Weak<dyn Connection>,
    lock: Arc<Mutex<()>>,
}

#[derive(Default)]
struct Inner {
    entries: HashMap<ConnectionId, Entry>,
    index: HashMap<NamespacedChannel, HashSet<ConnectionId>>,
    locks: HashMap<ConnectionId, DeliveryLock>,
}

impl Inner {
    fn index_add(&mut self, channel: &NamespacedChannel, id: ConnectionId) {
        self.index.entry(channel.clone()).or_default().insert(id);
    }

    fn index_remove(&mut self, channel: &NamespacedChannel, id: ConnectionId) {
        let emptied = match self.index.get_mut(channel) {
            Some(ids) => {
                let removed = ids.remove(&id);
                debug_assert!(removed, "reverse index missing {channel} for {id}");
                ids.is_empty()
            }
            None => {
                debug_assert!(false, "reverse index has no entry for {channel}");
                false
            }
        };
        if emptied {
            self.index.remove(channel);
        }
    }

    fn remove_entry(&mut self, id: ConnectionId) -> Option<Subscription> {
        let entry = self.entries.remove(&id)?;
        for channel in &entry.subscription.channels {
            self.index_remove(channel, id);
        }
        Some(entry.subscription)
    }
}

/// Registry of live subscriptions.
pub struct SubscriptionRegistry {
    database: String,
    inner: RwLock<Inner>,
}

impl SubscriptionRegistry {
    /// Create a registry that namespaces channels with `database`.
    pub fn new(database: impl Into<String>) -> Self {
        Self {
            database: database.into(),
            inner: RwLock::new(Inner::default()),
        }
    }

    pub fn database(&self) -> &str {
        &self.database
    }

    /// Namespace raw channels with this registry's database.
    pub fn namespace<I>(&self, channels: I) -> HashSet<NamespacedChannel>
    where
        I: IntoIterator<Item = Channel>,
    {
        channels
            .into_iter()
            .map(|c| c.namespaced(&self.database))
            .collect()
    }

    /// Replace the connection's subscription.
    ///
    /// A fresh subscription starts at `since_id`, or at `tail_id` when none
    /// is given. Replacing an existing one keeps the cursor monotone: the
    /// prior cursor when `since_id` is absent, otherwise the larger of the
    /// two.
    pub async fn set_subscription<I>(
        &self,
        connection: &Arc<dyn Connection>,
        channels: I,
        since_id: Option<EventId>,
        session_id: impl Into<String>,
        tail_id: EventId,
    ) -> Subscription
    where
        I: IntoIterator<Item = Channel>,
    {
        let id = connection.id();
        let channels = self.namespace(channels);
        let session_id = session_id.into();

        let mut inner = self.inner.write().await;

        let (cursor, previous) = match inner.entries.remove(&id) {
            Some(prior) => {
                let cursor = match since_id {
                    Some(since) => since.max(prior.subscription.last_delivered_id),
                    None => prior.subscription.last_delivered_id,
                };
                (cursor, prior.subscription.channels)
            }
            None => (since_id.unwrap_or(tail_id), HashSet::new()),
        };

        inner.locks.entry(id).or_insert_with(|| DeliveryLock {
            connection: Arc::downgrade(connection),
            lock: Arc::new(Mutex::new(())),
        });

        for dropped in previous.difference(&channels) {
            inner.index_remove(dropped, id);
        }
        for added in channels.difference(&previous) {
            inner.index_add(added, id);
        }

        let subscription = Subscription {
            channels,
            last_delivered_id: cursor,
            session_id,
        };

        inner.entries.insert(
            id,
            Entry {
                connection: Arc::downgrade(connection),
                subscription: subscription.clone(),
            },
        );

        debug!(
            connection = %id,
            channels = subscription.channels.len(),
            cursor,
            "Subscription set"
        );

        subscription
    }

    /// Current subscription of a connection, if any.
    pub async fn subscription_of(&self, id: ConnectionId) -> Option<Subscription> {
        let inner = self.inner.read().await;
        inner.entries.get(&id).map(|e| e.subscription.clone())
    }

    /// Live connections subscribed to at least one of `channels`.
    ///
    /// Entries whose connection has been dropped are pruned.
    pub async fn connections_for(&self, channels: &[NamespacedChannel]) -> Vec<Arc<dyn Connection>> {
        let (live, dead) = {
            let inner = self.inner.read().await;
            let ids: HashSet<ConnectionId> = channels
                .iter()
                .filter_map(|c| inner.index.get(c))
                .flatten()
                .copied()
                .collect();
            partition_live(&inner, ids)
        };
        self.prune_ids(dead).await;
        live
    }

    /// Every live connection with a subscription.
    pub async fn connections(&self) -> Vec<Arc<dyn Connection>> {
        let (live, dead) = {
            let inner = self.inner.read().await;
            let ids = inner.entries.keys().copied().collect();
            partition_live(&inner, ids)
        };
        self.prune_ids(dead).await;
        live
    }

    /// Raise the cursor to `new_id` if it is higher. Returns the resulting
    /// cursor, or `None` if the connection has no subscription.
    pub async fn advance_cursor(&self, id: ConnectionId, new_id: EventId) -> Option<EventId> {
        let mut inner = self.inner.write().await;
        let entry = inner.entries.get_mut(&id)?;
        let cursor = &mut entry.subscription.last_delivered_id;
        *cursor = (*cursor).max(new_id);
        Some(*cursor)
    }

    /// Remove the subscription and every reverse-index reference to it.
    ///
    /// The delivery lock stays while the connection is alive, in case it
    /// subscribes again.
    pub async fn forget(&self, id: ConnectionId) -> Option<Subscription> {
        let mut inner = self.inner.write().await;
        let removed = inner.remove_entry(id);
        if inner
            .locks
            .get(&id)
            .is_some_and(|l| l.connection.strong_count() == 0)
        {
            inner.locks.remove(&id);
        }
        drop(inner);

        if removed.is_some() {
            debug!(connection = %id, "Subscription forgotten");
        }
        removed
    }

    /// The lock serializing deliveries to a subscribed connection.
    pub async fn delivery_lock(&self, id: ConnectionId) -> Option<Arc<Mutex<()>>> {
        let inner = self.inner.read().await;
        if !inner.entries.contains_key(&id) {
            return None;
        }
        inner.locks.get(&id).map(|l| Arc::clone(&l.lock))
    }

    /// Drop every entry and delivery lock whose connection is gone. Returns
    /// how many subscriptions were removed.
    pub async fn prune(&self) -> usize {
        let mut inner = self.inner.write().await;
        let dead: Vec<ConnectionId> = inner
            .entries
            .iter()
            .filter(|(_, e)| e.connection.strong_count() == 0)
            .map(|(id, _)| *id)
            .collect();
        for id in &dead {
            inner.remove_entry(*id);
            debug!(connection = %id, "Pruned subscription of dropped connection");
        }
        inner.locks.retain(|_, l| l.connection.strong_count() > 0);
        dead.len()
    }

    /// Number of subscriptions.
    pub async fn len(&self) -> usize {
        self.inner.read().await.entries.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Channels with at least one subscriber.
    pub async fn indexed_channels(&self) -> HashSet<NamespacedChannel> {
        self.inner.read().await.index.keys().cloned().collect()
    }

    async fn prune_ids(&self, dead: Vec<ConnectionId>) {
        if dead.is_empty() {
            return;
        }
        let mut inner = self.inner.write().await;
        for id in dead {
            // Re-check under the write lock: the id may have been re-registered.
            let gone = inner
                .entries
                .get(&id)
                .is_some_and(|e| e.connection.strong_count() == 0);
            if gone {
                inner.remove_entry(id);
                inner.locks.remove(&id);
                debug!(connection = %id, "Pruned subscription of dropped connection");
            }
        }
    }

    #[cfg(test)]
    async fn lock_count(&self) -> usize {
        self.inner.read().await.locks.len()
    }

    #[cfg(test)]
    async fn assert_consistent(&self) {
        let inner = self.inner.read().await;
        for (id, entry) in &inner.entries {
            assert!(inner.locks.contains_key(id), "{id} has no delivery lock");
            for channel in &entry.subscription.channels {
                assert!(
                    inner.index.get(channel).is_some_and(|ids| ids.contains(id)),
                    "{channel} -> {id} missing from index"
                );
            }
        }
        for (channel, ids) in &inner.index {
            assert!(!ids.is_empty(), "empty index entry for {channel}");
            for id in ids {
                assert!(
                    inner
                        .entries
                        .get(id)
                        .is_some_and(|e| e.subscription.channels.contains(channel)),
                    "index {channel} -> {id} has no matching subscription"
                );
            }
        }
    }
}

fn partition_live(
    inner: &Inner,
    ids: HashSet<ConnectionId>,
) -> (Vec<Arc<dyn Connection>>, Vec<ConnectionId>) {
    let mut live = Vec::with_capacity(ids.len());
    let mut dead = Vec::new();
    for id in ids {
        match inner.entries.get(&id).and_then(|e| e.connection.upgrade()) {
            Some(connection) => live.push(connection),
            None => dead.push(id),
        }
    }
    (live, dead)
}
