//! Subscription Batching
//!
//! [`SubscriptionManager`] coalesces rapid subscribe/unsubscribe calls into
//! one flush per batching window. Within a window, a subscribe followed by
//! an unsubscribe of the same topic cancels out to nothing on the wire;
//! at flush time unsubscribes are sent before subscribes. After a
//! reconnect the manager resends its active set.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tracing::debug;

use crate::application::ports::TopicSink;
use crate::application::registry::{HandlerHandle, Registry};
use crate::domain::batch::BatchState;
use crate::domain::topic::Topic;
use crate::infrastructure::connection::{ConnectionManager, ConnectionState};

struct SubscriptionInner {
    sink: Arc<dyn TopicSink>,
    batch_window: Duration,
    batch: Mutex<BatchState>,
    flush_timer: Mutex<Option<JoinHandle<()>>>,
    changed: Registry<Vec<Topic>>,
    recovering: AtomicBool,
    state_handle: Mutex<Option<HandlerHandle<ConnectionState>>>,
    disposed: AtomicBool,
}

/// Batches topic subscription changes over a flush window.
///
/// Cheap to clone; all clones share one batch.
#[derive(Clone)]
pub struct SubscriptionManager {
    inner: Arc<SubscriptionInner>,
}

impl SubscriptionManager {
    /// Create a manager over a connection, with reconnect recovery: when
    /// the connection drops and comes back, the active set is resent.
    #[must_use]
    pub fn new(connection: &ConnectionManager, batch_window: Duration) -> Self {
        let manager = Self::detached(Arc::new(connection.clone()), batch_window);

        let weak = Arc::downgrade(&manager.inner);
        let handle = connection.on_state_change(move |state: &ConnectionState| {
            let Some(inner) = weak.upgrade() else { return };
            match state {
                ConnectionState::Reconnecting => {
                    inner.recovering.store(true, Ordering::SeqCst);
                }
                ConnectionState::Connected => {
                    if inner.recovering.swap(false, Ordering::SeqCst) {
                        let active = inner.batch.lock().active();
                        debug!(topics = active.len(), "recovering subscriptions");
                        for topic in &active {
                            inner.sink.subscribe_topic(topic);
                        }
                    }
                }
                _ => {}
            }
        });
        *manager.inner.state_handle.lock() = Some(handle);

        manager
    }

    /// Create a manager over an arbitrary sink, without reconnect
    /// recovery.
    #[must_use]
    pub fn detached(sink: Arc<dyn TopicSink>, batch_window: Duration) -> Self {
        Self {
            inner: Arc::new(SubscriptionInner {
                sink,
                batch_window,
                batch: Mutex::new(BatchState::new()),
                flush_timer: Mutex::new(None),
                changed: Registry::new(),
                recovering: AtomicBool::new(false),
                state_handle: Mutex::new(None),
                disposed: AtomicBool::new(false),
            }),
        }
    }

    /// Queue a subscribe for the next flush. Idempotent within and across
    /// windows.
    pub fn subscribe(&self, topic: Topic) {
        if self.inner.disposed.load(Ordering::SeqCst) {
            return;
        }
        self.inner.batch.lock().record_subscribe(topic);
        self.schedule_flush();
    }

    /// Queue several subscribes.
    pub fn subscribe_many(&self, topics: impl IntoIterator<Item = Topic>) {
        if self.inner.disposed.load(Ordering::SeqCst) {
            return;
        }
        {
            let mut batch = self.inner.batch.lock();
            for topic in topics {
                batch.record_subscribe(topic);
            }
        }
        self.schedule_flush();
    }

    /// Queue an unsubscribe for the next flush. Cancels a queued
    /// subscribe of the same topic.
    pub fn unsubscribe(&self, topic: &Topic) {
        if self.inner.disposed.load(Ordering::SeqCst) {
            return;
        }
        self.inner.batch.lock().record_unsubscribe(topic);
        self.schedule_flush();
    }

    /// Queue several unsubscribes.
    pub fn unsubscribe_many<'a>(&self, topics: impl IntoIterator<Item = &'a Topic>) {
        if self.inner.disposed.load(Ordering::SeqCst) {
            return;
        }
        {
            let mut batch = self.inner.batch.lock();
            for topic in topics {
                batch.record_unsubscribe(topic);
            }
        }
        self.schedule_flush();
    }

    /// Topics currently subscribed on the wire.
    #[must_use]
    pub fn active_topics(&self) -> Vec<Topic> {
        self.inner.batch.lock().active()
    }

    /// Whether a topic is currently subscribed on the wire.
    #[must_use]
    pub fn is_active(&self, topic: &Topic) -> bool {
        self.inner.batch.lock().is_active(topic)
    }

    /// Observe the active set after each flush that changed the wire.
    pub fn on_change<F>(&self, callback: F) -> HandlerHandle<Vec<Topic>>
    where
        F: Fn(&Vec<Topic>) + Send + Sync + 'static,
    {
        self.inner.changed.register(callback)
    }

    /// Stop the flush timer and detach from the connection. Idempotent;
    /// a disposed manager ignores further calls.
    pub fn dispose(&self) {
        if self.inner.disposed.swap(true, Ordering::SeqCst) {
            return;
        }
        if let Some(timer) = self.inner.flush_timer.lock().take() {
            timer.abort();
        }
        if let Some(handle) = self.inner.state_handle.lock().take() {
            handle.unregister();
        }
        self.inner.changed.clear();
    }

    /// Arm the flush timer if there is pending work and no timer yet.
    fn schedule_flush(&self) {
        if !self.inner.batch.lock().has_pending() {
            return;
        }
        let mut timer = self.inner.flush_timer.lock();
        if timer.is_some() {
            return;
        }

        let weak = Arc::downgrade(&self.inner);
        // Capture the deadline now, so the window is measured from the
        // moment the timer is armed rather than the task's first poll.
        let sleep = tokio::time::sleep(self.inner.batch_window);
        *timer = Some(tokio::spawn(async move {
            sleep.await;
            let Some(inner) = weak.upgrade() else { return };
            *inner.flush_timer.lock() = None;
            flush(&inner);
        }));
    }
}

// Services that manage topics (the private-topic router) go through the
// batching layer rather than straight to the connection.
impl TopicSink for SubscriptionManager {
    fn subscribe_topic(&self, topic: &Topic) {
        self.subscribe(topic.clone());
    }

    fn unsubscribe_topic(&self, topic: &Topic) {
        self.unsubscribe(topic);
    }
}

/// Drain the batch onto the wire: unsubscribes first, then subscribes,
/// then one change notification. An empty plan notifies nobody.
fn flush(inner: &Arc<SubscriptionInner>) {
    let plan = inner.batch.lock().drain();
    if plan.is_empty() {
        return;
    }
    for topic in &plan.unsubscribe {
        inner.sink.unsubscribe_topic(topic);
    }
    for topic in &plan.subscribe {
        inner.sink.subscribe_topic(topic);
    }
    inner.changed.emit(&inner.batch.lock().active());
}

// =============================================================================
// Tests
// =============================================================================
