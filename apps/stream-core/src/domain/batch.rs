//! Subscription Batching State
//!
//! Pure pending-set bookkeeping behind the subscription manager. A topic is
//! in at most one of three sets: `active` (subscribed on the wire),
//! `pending_subscribe` (queued for the next flush), or
//! `pending_unsubscribe`. Subscribing then unsubscribing within one batch
//! window cancels out to nothing on the wire.

use std::collections::BTreeSet;

use super::topic::Topic;

/// The wire work produced by draining a batch: unsubscribes are sent
/// before subscribes.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct FlushPlan {
    /// Topics to unsubscribe, in topic order.
    pub unsubscribe: Vec<Topic>,
    /// Topics to subscribe, in topic order.
    pub subscribe: Vec<Topic>,
}

impl FlushPlan {
    /// Whether the plan carries no wire work.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.unsubscribe.is_empty() && self.subscribe.is_empty()
    }
}

/// Pending-set state for one batching window.
#[derive(Debug, Default)]
pub struct BatchState {
    active: BTreeSet<Topic>,
    pending_subscribe: BTreeSet<Topic>,
    pending_unsubscribe: BTreeSet<Topic>,
}

impl BatchState {
    /// Create empty state.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a subscribe. Returns `false` when the topic is already active
    /// or already queued, in which case nothing changes on the wire.
    ///
    /// A topic queued for unsubscribe moves back to pending-subscribe.
    pub fn record_subscribe(&mut self, topic: Topic) -> bool {
        if self.active.contains(&topic) || self.pending_subscribe.contains(&topic) {
            return false;
        }
        self.pending_unsubscribe.remove(&topic);
        self.pending_subscribe.insert(topic);
        true
    }

    /// Queue an unsubscribe. Returns `false` when the request was a pure
    /// cancel of a queued subscribe or the topic was never known.
    pub fn record_unsubscribe(&mut self, topic: &Topic) -> bool {
        if self.pending_subscribe.remove(topic) {
            // Net-cancel: the subscribe never reached the wire.
            return false;
        }
        if self.active.remove(topic) {
            self.pending_unsubscribe.insert(topic.clone());
            return true;
        }
        false
    }

    /// Whether a flush is needed.
    #[must_use]
    pub fn has_pending(&self) -> bool {
        !self.pending_subscribe.is_empty() || !self.pending_unsubscribe.is_empty()
    }

    /// Take the queued work, promoting pending subscribes to active.
    pub fn drain(&mut self) -> FlushPlan {
        let unsubscribe: Vec<Topic> = std::mem::take(&mut self.pending_unsubscribe)
            .into_iter()
            .collect();
        let subscribe: Vec<Topic> = std::mem::take(&mut self.pending_subscribe)
            .into_iter()
            .collect();
        self.active.extend(subscribe.iter().cloned());
        FlushPlan {
            unsubscribe,
            subscribe,
        }
    }

    /// Topics currently subscribed on the wire.
    #[must_use]
    pub fn active(&self) -> Vec<Topic> {
        self.active.iter().cloned().collect()
    }

    /// Whether a topic is currently subscribed on the wire.
    #[must_use]
    pub fn is_active(&self, topic: &Topic) -> bool {
        self.active.contains(topic)
    }
}

// =============================================================================
// Tests
// =============================================================================
