//! Quote Store
//!
//! Latest-value cache for instrument quotes. Updates overwrite-merge into
//! the cached entry and restamp `received_at` from the local monotonic
//! clock; staleness is always a question about the local clock, never
//! about feed timestamps. Per-instrument observers fire after the cache
//! is updated.

use std::collections::HashMap;
use std::time::Duration;

use parking_lot::RwLock;
use tokio::time::Instant;
use tracing::warn;

use crate::application::registry::{HandlerHandle, Registry};
use crate::domain::envelope::Envelope;
use crate::domain::quote::{Quote, QuoteUpdate};
use crate::domain::topic::InstrumentId;

/// Cache of the latest quote per instrument.
#[derive(Default)]
pub struct QuoteStore {
    quotes: RwLock<HashMap<InstrumentId, Quote>>,
    subscribers: RwLock<HashMap<InstrumentId, Registry<Quote>>>,
}

impl QuoteStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Merge an update into the cache and notify the instrument's
    /// observers with the merged quote.
    pub fn update_quote(&self, instrument_id: InstrumentId, update: &QuoteUpdate) {
        let now = Instant::now();
        let merged = {
            let mut quotes = self.quotes.write();
            let quote = quotes
                .entry(instrument_id)
                .or_insert_with(|| Quote::new(instrument_id, now));
            quote.apply(update, now);
            quote.clone()
        };

        let registry = self.subscribers.read().get(&instrument_id).cloned();
        if let Some(registry) = registry {
            registry.emit(&merged);
        }
    }

    /// Latest quote for an instrument, if any update has arrived.
    #[must_use]
    pub fn get_quote(&self, instrument_id: InstrumentId) -> Option<Quote> {
        self.quotes.read().get(&instrument_id).cloned()
    }

    /// Observe updates for one instrument.
    pub fn subscribe<F>(&self, instrument_id: InstrumentId, callback: F) -> HandlerHandle<Quote>
    where
        F: Fn(&Quote) + Send + Sync + 'static,
    {
        self.subscribers
            .write()
            .entry(instrument_id)
            .or_default()
            .register(callback)
    }

    /// Whether the instrument's quote is older than `threshold`. An
    /// instrument with no quote at all is stale by definition.
    #[must_use]
    pub fn is_stale(&self, instrument_id: InstrumentId, threshold: Duration) -> bool {
        self.quotes
            .read()
            .get(&instrument_id)
            .is_none_or(|quote| quote.age(Instant::now()) > threshold)
    }

    /// Ingest a quotes data envelope. The instrument id comes from the
    /// payload when present, else from the topic scope; frames with
    /// neither are dropped.
    pub fn ingest(&self, envelope: &Envelope) {
        let update: QuoteUpdate = match serde_json::from_value(envelope.payload.clone()) {
            Ok(update) => update,
            Err(error) => {
                warn!(topic = %envelope.topic, error = %error, "dropping malformed quote");
                return;
            }
        };
        let Some(instrument_id) = update.instrument_id.or_else(|| envelope.topic.instrument_id())
        else {
            warn!(topic = %envelope.topic, "dropping quote without instrument id");
            return;
        };
        self.update_quote(instrument_id, &update);
    }
}

// =============================================================================
// Tests
// =============================================================================
