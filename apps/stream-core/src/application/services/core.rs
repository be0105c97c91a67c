//! Composition Root
//!
//! [`StreamingCore`] wires the whole stack together: one connection, the
//! batching subscription manager over it, the private-topic router and
//! quote store fed by it, and the alerts engine over the store. Callers
//! construct a core explicitly, start it, use the service accessors, and
//! stop it; nothing lives in module-level state.

use std::sync::Arc;

use crate::application::ports::{TopicSink, Transport};
use crate::application::registry::HandlerHandle;
use crate::application::services::alerts::{AlertSettings, AlertsEngine};
use crate::application::services::quotes::QuoteStore;
use crate::application::services::router::{PrivateTopicRouter, RouterConfig};
use crate::application::services::subscriptions::SubscriptionManager;
use crate::domain::envelope::Envelope;
use crate::domain::topic::Collection;
use crate::infrastructure::config::StreamConfig;
use crate::infrastructure::connection::{ConnectionConfig, ConnectionManager};
use crate::infrastructure::websocket::WebSocketTransport;

/// The assembled streaming stack.
pub struct StreamingCore {
    connection: ConnectionManager,
    subscriptions: SubscriptionManager,
    router: PrivateTopicRouter,
    quotes: Arc<QuoteStore>,
    alerts: AlertsEngine,
    quote_feed: HandlerHandle<Envelope>,
}

impl StreamingCore {
    /// Assemble the stack over the production WebSocket transport.
    #[must_use]
    pub fn new(config: StreamConfig) -> Self {
        Self::with_transport(config, Arc::new(WebSocketTransport::new()))
    }

    /// Assemble the stack over any transport. Tests use this with an
    /// in-memory fake.
    #[must_use]
    pub fn with_transport(config: StreamConfig, transport: Arc<dyn Transport>) -> Self {
        let connection = ConnectionManager::new(
            ConnectionConfig {
                url: config.url,
                credentials: config.credentials,
                backoff: config.backoff,
            },
            transport,
        );

        let subscriptions = SubscriptionManager::new(&connection, config.batch_window);

        // Private-topic subscriptions flow through the batching layer.
        let router = PrivateTopicRouter::new(
            &connection,
            Arc::new(subscriptions.clone()) as Arc<dyn TopicSink>,
            RouterConfig::default(),
        );

        let quotes = Arc::new(QuoteStore::new());
        let quote_feed = {
            let store = Arc::clone(&quotes);
            connection.add_message_handler(Collection::Quotes, move |envelope: &Envelope| {
                store.ingest(envelope);
            })
        };

        let alerts = AlertsEngine::new(
            Arc::clone(&quotes),
            AlertSettings {
                cooldown: config.alert_cooldown,
                staleness_poll_interval: config.staleness_poll_interval,
            },
        );

        Self {
            connection,
            subscriptions,
            router,
            quotes,
            alerts,
            quote_feed,
        }
    }

    /// Open the connection. The handshake, private-topic subscription,
    /// and tracked-topic replay follow on their own.
    pub fn start(&self) {
        self.connection.connect();
    }

    /// Disconnect and tear the services down. A stopped core does not
    /// restart; build a new one instead.
    pub fn stop(&self) {
        self.alerts.dispose();
        self.router.dispose();
        self.subscriptions.dispose();
        self.quote_feed.unregister();
        self.connection.disconnect();
    }

    /// The connection layer.
    #[must_use]
    pub const fn connection(&self) -> &ConnectionManager {
        &self.connection
    }

    /// The batching subscription manager.
    #[must_use]
    pub const fn subscriptions(&self) -> &SubscriptionManager {
        &self.subscriptions
    }

    /// The private feed router.
    #[must_use]
    pub const fn router(&self) -> &PrivateTopicRouter {
        &self.router
    }

    /// The quote cache.
    #[must_use]
    pub fn quotes(&self) -> &Arc<QuoteStore> {
        &self.quotes
    }

    /// The alerts engine.
    #[must_use]
    pub const fn alerts(&self) -> &AlertsEngine {
        &self.alerts
    }
}
