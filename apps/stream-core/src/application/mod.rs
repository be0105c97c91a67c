//! Application layer - Services composed over the connection.

/// Observer registries and handles.
pub mod registry;

/// Transport and topic-sink ports.
pub mod ports;

/// The streaming services and composition root.
pub mod services;
