//! Private Topic Router
//!
//! Gates the private collections (`positions`, `orders`, `portfolio`)
//! behind authentication, decodes their envelopes into typed events, and
//! fans them out to registered observers. When an order update reports an
//! execution, the router synthesizes a [`Fill`] carrying the order's own
//! side and position link.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::application::ports::TopicSink;
use crate::application::registry::{HandlerHandle, Registry};
use crate::domain::envelope::Envelope;
use crate::domain::events::{Fill, OrderUpdate, PortfolioUpdate, PositionUpdate};
use crate::domain::topic::{Collection, Topic};
use crate::infrastructure::connection::{AuthState, ConnectionManager};

/// Router tuning.
#[derive(Debug, Clone, Copy)]
pub struct RouterConfig {
    /// Subscribe the private collections as soon as authentication
    /// succeeds.
    pub auto_subscribe: bool,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            auto_subscribe: true,
        }
    }
}

struct RouterInner {
    sink: Arc<dyn TopicSink>,
    config: RouterConfig,
    subscribed: AtomicBool,
    positions: Registry<PositionUpdate>,
    orders: Registry<OrderUpdate>,
    portfolio: Registry<PortfolioUpdate>,
    fills: Registry<Fill>,
    message_handles: Mutex<Vec<HandlerHandle<Envelope>>>,
    auth_handle: Mutex<Option<HandlerHandle<AuthState>>>,
    disposed: AtomicBool,
}

/// Decodes and fans out the authenticated data streams.
///
/// Cheap to clone; all clones share one router.
#[derive(Clone)]
pub struct PrivateTopicRouter {
    inner: Arc<RouterInner>,
}

impl PrivateTopicRouter {
    /// Attach a router to a connection. Topic subscriptions go through
    /// `sink` so they participate in batching.
    #[must_use]
    pub fn new(
        connection: &ConnectionManager,
        sink: Arc<dyn TopicSink>,
        config: RouterConfig,
    ) -> Self {
        let inner = Arc::new(RouterInner {
            sink,
            config,
            subscribed: AtomicBool::new(false),
            positions: Registry::new(),
            orders: Registry::new(),
            portfolio: Registry::new(),
            fills: Registry::new(),
            message_handles: Mutex::new(Vec::new()),
            auth_handle: Mutex::new(None),
            disposed: AtomicBool::new(false),
        });

        let mut handles = Vec::new();
        for collection in [Collection::Positions, Collection::Orders, Collection::Portfolio] {
            let weak = Arc::downgrade(&inner);
            handles.push(connection.add_message_handler(collection, move |envelope: &Envelope| {
                if let Some(inner) = weak.upgrade() {
                    route(&inner, envelope);
                }
            }));
        }
        *inner.message_handles.lock() = handles;

        let weak = Arc::downgrade(&inner);
        let auth_handle = connection.on_auth_change(move |auth: &AuthState| {
            let Some(inner) = weak.upgrade() else { return };
            match auth {
                AuthState::Authenticated => {
                    if inner.config.auto_subscribe {
                        subscribe_all(&inner);
                    }
                }
                // The wire subscriptions died with the socket (or were
                // refused); a fresh handshake must subscribe again.
                AuthState::Unauthenticated | AuthState::Failed(_) => {
                    inner.subscribed.store(false, Ordering::SeqCst);
                }
                AuthState::Authenticating => {}
            }
        });
        *inner.auth_handle.lock() = Some(auth_handle);

        Self { inner }
    }

    // -------------------------------------------------------------------------
    // Subscriptions
    // -------------------------------------------------------------------------

    /// Subscribe the three private collections. Idempotent.
    pub fn subscribe_to_private_topics(&self) {
        subscribe_all(&self.inner);
    }

    /// Unsubscribe the three private collections. Idempotent.
    pub fn unsubscribe_from_private_topics(&self) {
        if self.inner.subscribed.swap(false, Ordering::SeqCst) {
            for topic in Topic::private_collections() {
                self.inner.sink.unsubscribe_topic(&topic);
            }
        }
    }

    /// Whether the private collections are currently requested.
    #[must_use]
    pub fn is_subscribed(&self) -> bool {
        self.inner.subscribed.load(Ordering::SeqCst)
    }

    /// Subscribe updates for one position.
    pub fn subscribe_to_position(&self, position_id: u64) {
        self.inner.sink.subscribe_topic(&Topic::position(position_id));
    }

    /// Unsubscribe updates for one position.
    pub fn unsubscribe_from_position(&self, position_id: u64) {
        self.inner.sink.unsubscribe_topic(&Topic::position(position_id));
    }

    /// Subscribe updates for one order.
    pub fn subscribe_to_order(&self, order_id: u64) {
        self.inner.sink.subscribe_topic(&Topic::order(order_id));
    }

    /// Unsubscribe updates for one order.
    pub fn unsubscribe_from_order(&self, order_id: u64) {
        self.inner.sink.unsubscribe_topic(&Topic::order(order_id));
    }

    // -------------------------------------------------------------------------
    // Observers
    // -------------------------------------------------------------------------

    /// Observe position updates.
    pub fn on_position_update<F>(&self, callback: F) -> HandlerHandle<PositionUpdate>
    where
        F: Fn(&PositionUpdate) + Send + Sync + 'static,
    {
        self.inner.positions.register(callback)
    }

    /// Observe order updates.
    pub fn on_order_update<F>(&self, callback: F) -> HandlerHandle<OrderUpdate>
    where
        F: Fn(&OrderUpdate) + Send + Sync + 'static,
    {
        self.inner.orders.register(callback)
    }

    /// Observe portfolio updates.
    pub fn on_portfolio_update<F>(&self, callback: F) -> HandlerHandle<PortfolioUpdate>
    where
        F: Fn(&PortfolioUpdate) + Send + Sync + 'static,
    {
        self.inner.portfolio.register(callback)
    }

    /// Observe synthesized fills.
    pub fn on_fill<F>(&self, callback: F) -> HandlerHandle<Fill>
    where
        F: Fn(&Fill) + Send + Sync + 'static,
    {
        self.inner.fills.register(callback)
    }

    /// Unsubscribe the private collections and detach from the
    /// connection. Idempotent.
    pub fn dispose(&self) {
        if self.inner.disposed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.unsubscribe_from_private_topics();
        for handle in self.inner.message_handles.lock().drain(..) {
            handle.unregister();
        }
        if let Some(handle) = self.inner.auth_handle.lock().take() {
            handle.unregister();
        }
        self.inner.positions.clear();
        self.inner.orders.clear();
        self.inner.portfolio.clear();
        self.inner.fills.clear();
    }
}

fn subscribe_all(inner: &Arc<RouterInner>) {
    if inner.disposed.load(Ordering::SeqCst) {
        return;
    }
    if !inner.subscribed.swap(true, Ordering::SeqCst) {
        for topic in Topic::private_collections() {
            inner.sink.subscribe_topic(&topic);
        }
    }
}

fn route(inner: &Arc<RouterInner>, envelope: &Envelope) {
    match envelope.topic.collection() {
        Collection::Positions => match serde_json::from_value::<PositionUpdate>(envelope.payload.clone()) {
            Ok(update) => inner.positions.emit(&update),
            Err(error) => warn!(topic = %envelope.topic, error = %error, "dropping malformed position update"),
        },
        Collection::Orders => match serde_json::from_value::<OrderUpdate>(envelope.payload.clone()) {
            Ok(update) => {
                inner.orders.emit(&update);
                if let Some(fill) = Fill::from_order(&update) {
                    debug!(order_id = fill.order_id, "order executed, synthesizing fill");
                    inner.fills.emit(&fill);
                }
            }
            Err(error) => warn!(topic = %envelope.topic, error = %error, "dropping malformed order update"),
        },
        Collection::Portfolio => match serde_json::from_value::<PortfolioUpdate>(envelope.payload.clone()) {
            Ok(update) => inner.portfolio.emit(&update),
            Err(error) => warn!(topic = %envelope.topic, error = %error, "dropping malformed portfolio update"),
        },
        _ => {}
    }
}

// =============================================================================
// Tests
// =============================================================================
