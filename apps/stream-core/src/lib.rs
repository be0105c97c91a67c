//! Stream Core - Authenticated Multi-Topic Streaming
//!
//! Client-side core for a topic-oriented market data feed: one managed
//! WebSocket connection with an auth handshake and capped-exponential
//! reconnect, batched topic subscriptions, auth-gated private streams,
//! a latest-quote cache, and a threshold/staleness alerts engine.
//!
//! # Architecture
//!
//! Three layers:
//!
//! - **domain** - pure types and logic: topics, envelopes, quotes,
//!   private-feed events, alert rules, batching state.
//! - **application** - services composed over the connection: observer
//!   registries, ports, subscription batching, the private-topic router,
//!   the quote store, the alerts engine, and the [`StreamingCore`]
//!   composition root.
//! - **infrastructure** - the connection state machine and its async
//!   driver, the tokio-tungstenite transport, and configuration.
//!
//! # Data flow
//!
//! ```text
//! socket ──> ConnectionManager ──> per-collection dispatch
//!                                   ├─ quotes    ──> QuoteStore ──> AlertsEngine
//!                                   └─ positions/orders/portfolio
//!                                                ──> PrivateTopicRouter ──> typed observers
//! consumer ──> SubscriptionManager (50 ms batch) ──> ConnectionManager ──> socket
//! ```
//!
//! # Example
//!
//! ```no_run
//! use stream_core::{Credentials, StreamConfig, StreamingCore, Topic};
//!
//! # fn main() -> Result<(), stream_core::ConfigError> {
//! let credentials = Credentials::new("api-key", "user-key")?;
//! let core = StreamingCore::new(StreamConfig::new("wss://feed.example.com/stream", credentials));
//!
//! core.start();
//! core.subscriptions().subscribe(Topic::quote(1001));
//! # Ok(())
//! # }
//! ```

#![cfg_attr(
    test,
    allow(
        clippy::unwrap_used,
        clippy::expect_used,
        clippy::float_cmp,
        clippy::significant_drop_tightening
    )
)]

/// Application layer.
pub mod application;

/// Domain layer.
pub mod domain;

/// Infrastructure layer.
pub mod infrastructure;

pub use application::ports::{TopicSink, Transport, TransportError, WireEvent, WireFrame, WireSink, WireSource};
pub use application::registry::{HandlerHandle, Registry};
pub use application::services::alerts::{AlertSettings, AlertsEngine};
pub use application::services::core::StreamingCore;
pub use application::services::quotes::QuoteStore;
pub use application::services::router::{PrivateTopicRouter, RouterConfig};
pub use application::services::subscriptions::SubscriptionManager;
pub use domain::alert::{Alert, AlertEvent, AlertId, AlertRule};
pub use domain::batch::{BatchState, FlushPlan};
pub use domain::envelope::{AuthResponse, Envelope, EnvelopeKind};
pub use domain::events::{Fill, OrderStatus, OrderUpdate, PortfolioUpdate, PositionUpdate, TradeSide};
pub use domain::quote::{Quote, QuoteUpdate};
pub use domain::topic::{Collection, InstrumentId, Topic};
pub use infrastructure::config::{ConfigError, Credentials, StreamConfig};
pub use infrastructure::connection::backoff::{Backoff, BackoffConfig};
pub use infrastructure::connection::{
    AuthState, ConnectionConfig, ConnectionManager, ConnectionState,
};
pub use infrastructure::websocket::WebSocketTransport;
