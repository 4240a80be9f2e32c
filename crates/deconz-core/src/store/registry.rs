// ── Subscription registry ──
//
// Maps subscribers to the device they watch. Indexed by target so a
// dispatch touches only the interested parties; pruned lazily when a sink
// turns out to be gone.

use std::collections::HashMap;
use std::sync::{Arc, Weak};

use dashmap::DashMap;
use tokio::sync::mpsc;
use tracing::{debug, trace};

use crate::model::{DeviceUpdate, SubscriberId, UniqueId};
use crate::stream::DeviceUpdates;

/// Callback-style subscriber.
///
/// The registry holds listeners weakly: dropping the last `Arc` is an
/// implicit unsubscribe.
pub trait StateListener: Send + Sync {
    fn on_update(&self, update: &DeviceUpdate);
}

impl<F> StateListener for F
where
    F: Fn(&DeviceUpdate) + Send + Sync,
{
    fn on_update(&self, update: &DeviceUpdate) {
        self(update);
    }
}

#[derive(Clone)]
enum Sink {
    Channel(mpsc::UnboundedSender<DeviceUpdate>),
    Listener(Weak<dyn StateListener>),
}

impl Sink {
    /// Deliver one update. Returns `false` if the sink is gone.
    fn deliver(&self, update: &DeviceUpdate) -> bool {
        match self {
            Self::Channel(tx) => tx.send(update.clone()).is_ok(),
            Self::Listener(weak) => match weak.upgrade() {
                Some(listener) => {
                    listener.on_update(update);
                    true
                }
                None => false,
            },
        }
    }

    fn is_alive(&self) -> bool {
        match self {
            Self::Channel(tx) => !tx.is_closed(),
            Self::Listener(weak) => weak.strong_count() > 0,
        }
    }
}

/// Outcome of one dispatch pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchReport {
    pub delivered: usize,
    pub pruned: usize,
}

#[derive(Default)]
pub struct SubscriptionRegistry {
    /// target → (subscriber → sink)
    by_target: DashMap<UniqueId, HashMap<SubscriberId, Sink>>,
    /// subscriber → target, for O(1) unsubscribe.
    owners: DashMap<SubscriberId, UniqueId>,
}

impl SubscriptionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `subscriber` for updates to `target` over a channel.
    ///
    /// A subscriber watches one device; subscribing again replaces the
    /// previous subscription (its receiver is closed).
    pub fn subscribe(&self, subscriber: SubscriberId, target: UniqueId) -> DeviceUpdates {
        let (tx, rx) = mpsc::unbounded_channel();
        self.insert(subscriber, target, Sink::Channel(tx));
        DeviceUpdates::new(rx)
    }

    /// Register a weakly-held listener for `target`. Returns the generated
    /// subscriber id for an explicit [`unsubscribe`](Self::unsubscribe).
    pub fn on_state_change<L>(&self, target: UniqueId, listener: &Arc<L>) -> SubscriberId
    where
        L: StateListener + 'static,
    {
        let subscriber = SubscriberId::generate();
        let weak = Arc::downgrade(listener);
        let weak: Weak<dyn StateListener> = weak;
        self.insert(subscriber.clone(), target, Sink::Listener(weak));
        subscriber
    }

    /// Remove a subscriber. Returns `true` if it was registered.
    pub fn unsubscribe(&self, subscriber: &SubscriberId) -> bool {
        let Some((_, target)) = self.owners.remove(subscriber) else {
            return false;
        };
        self.remove_from_target(&target, subscriber);
        debug!(subscriber = %subscriber, unique_id = %target, "unsubscribed");
        true
    }

    /// Deliver `update` to every subscriber of `update.unique_id`.
    ///
    /// Sinks are snapshotted first and the map locks released before
    /// delivery, so a listener may subscribe or unsubscribe from inside its
    /// callback. Dead sinks found along the way are pruned.
    pub fn dispatch(&self, update: &DeviceUpdate) -> DispatchReport {
        let sinks: Vec<(SubscriberId, Sink)> = match self.by_target.get(&update.unique_id) {
            Some(entry) => entry
                .iter()
                .map(|(sid, sink)| (sid.clone(), sink.clone()))
                .collect(),
            None => return DispatchReport::default(),
        };

        let mut report = DispatchReport::default();
        let mut dead = Vec::new();
        for (subscriber, sink) in sinks {
            if sink.deliver(update) {
                report.delivered += 1;
            } else {
                dead.push(subscriber);
            }
        }

        for subscriber in dead {
            if self.prune(&update.unique_id, &subscriber) {
                report.pruned += 1;
            }
        }

        trace!(
            unique_id = %update.unique_id,
            delivered = report.delivered,
            pruned = report.pruned,
            "dispatched"
        );
        report
    }

    /// Number of live registrations for `target`.
    pub fn subscriber_count(&self, target: &UniqueId) -> usize {
        self.by_target.get(target).map_or(0, |entry| entry.len())
    }

    pub fn len(&self) -> usize {
        self.owners.len()
    }

    pub fn is_empty(&self) -> bool {
        self.owners.is_empty()
    }

    // ── Private helpers ──────────────────────────────────────────────

    fn insert(&self, subscriber: SubscriberId, target: UniqueId, sink: Sink) {
        if let Some(previous) = self.owners.insert(subscriber.clone(), target.clone()) {
            if previous != target {
                self.remove_from_target(&previous, &subscriber);
            }
        }
        debug!(subscriber = %subscriber, unique_id = %target, "subscribed");
        self.by_target
            .entry(target)
            .or_default()
            .insert(subscriber, sink);
    }

    fn remove_from_target(&self, target: &UniqueId, subscriber: &SubscriberId) {
        if let Some(mut entry) = self.by_target.get_mut(target) {
            entry.remove(subscriber);
        }
        self.by_target.remove_if(target, |_, subs| subs.is_empty());
    }

    /// Drop `subscriber` from `target` if its current sink is still dead.
    /// A concurrent re-subscribe under the same id is left alone.
    fn prune(&self, target: &UniqueId, subscriber: &SubscriberId) -> bool {
        let removed = match self.by_target.get_mut(target) {
            Some(mut entry) => {
                let dead = entry.get(subscriber).is_some_and(|sink| !sink.is_alive());
                dead && entry.remove(subscriber).is_some()
            }
            None => false,
        };
        if removed {
            self.by_target.remove_if(target, |_, subs| subs.is_empty());
            self.owners.remove_if(subscriber, |_, t| t == target);
            debug!(subscriber = %subscriber, unique_id = %target, "pruned orphaned subscription");
        }
        removed
    }
}
