//! Streaming services.

/// Threshold and staleness alerting.
pub mod alerts;

/// The composition root.
pub mod core;

/// Latest-quote cache.
pub mod quotes;

/// Auth-gated private feed fan-out.
pub mod router;

/// Batched topic subscriptions.
pub mod subscriptions;
