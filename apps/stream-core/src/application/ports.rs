//! Ports
//!
//! Seams between the application services and the outside world. The
//! [`Transport`] port abstracts the socket so tests drive the whole stack
//! with an in-memory fake; [`TopicSink`] abstracts "something that accepts
//! topic subscriptions" so the batching layer does not depend on the
//! connection type directly.

use std::pin::Pin;

use async_trait::async_trait;
use futures::{Sink, Stream};
use thiserror::Error;

use crate::domain::topic::Topic;

// =============================================================================
// Wire model
// =============================================================================

/// A frame going out to the socket.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WireFrame {
    /// Text payload (one JSON envelope).
    Text(String),
    /// Close handshake initiated by this side.
    Close {
        /// WebSocket close code.
        code: u16,
    },
}

/// An event coming in from the socket.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WireEvent {
    /// Text payload (one JSON envelope).
    Text(String),
    /// The peer closed the connection.
    Closed {
        /// WebSocket close code; 1000 is a clean shutdown.
        code: u16,
    },
}

/// Transport-level failures.
#[derive(Debug, Clone, Error)]
pub enum TransportError {
    /// The connection could not be established.
    #[error("connect failed: {0}")]
    Connect(String),

    /// The established socket failed.
    #[error("socket error: {0}")]
    Socket(String),
}

/// Boxed outbound half of a connected socket.
pub type WireSink = Pin<Box<dyn Sink<WireFrame, Error = TransportError> + Send>>;

/// Boxed inbound half of a connected socket.
pub type WireSource = Pin<Box<dyn Stream<Item = Result<WireEvent, TransportError>> + Send>>;

// =============================================================================
// Ports
// =============================================================================

/// Dials the feed endpoint and yields the two socket halves.
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    /// Establish a connection to `url`.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::Connect`] when the endpoint cannot be
    /// reached or refuses the handshake.
    async fn connect(&self, url: &str) -> Result<(WireSink, WireSource), TransportError>;
}

/// Accepts topic subscription changes.
pub trait TopicSink: Send + Sync {
    /// Request delivery for a topic.
    fn subscribe_topic(&self, topic: &Topic);

    /// Stop delivery for a topic.
    fn unsubscribe_topic(&self, topic: &Topic);
}
