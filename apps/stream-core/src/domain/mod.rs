//! Domain layer - Core streaming types and pure logic.

/// Topic identifiers and public/private classification.
pub mod topic;

/// Wire envelope and auth payloads.
pub mod envelope;

/// Market quote cache entry and overwrite-merge payload.
pub mod quote;

/// Typed private-feed events (positions, orders, portfolio, fills).
pub mod events;

/// Alert rules and firing records.
pub mod alert;

/// Pending-set state for subscribe/unsubscribe batching.
pub mod batch;
