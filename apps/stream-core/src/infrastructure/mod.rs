//! Infrastructure layer - Connection, transport, and configuration.

/// Settings and credentials.
pub mod config;

/// Connection lifecycle and the socket driver.
pub mod connection;

/// tokio-tungstenite transport adapter.
pub mod websocket;
