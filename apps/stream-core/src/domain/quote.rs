//! Quote Cache Entry
//!
//! `Quote` is the latest-value cache record for one instrument. Updates from
//! the feed are sparse; fields absent from a [`QuoteUpdate`] keep their
//! previous value. `received_at` is stamped from the local monotonic clock
//! at ingestion time so staleness never depends on feed timestamps.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Deserialize;
use tokio::time::Instant;

use super::topic::InstrumentId;

/// Latest known market state for one instrument.
#[derive(Debug, Clone, PartialEq)]
pub struct Quote {
    /// Instrument the quote belongs to.
    pub instrument_id: InstrumentId,
    /// Best bid.
    pub bid: Decimal,
    /// Best ask.
    pub ask: Decimal,
    /// Last traded price, once a trade has been seen.
    pub last_price: Option<Decimal>,
    /// Absolute change since the reference price.
    pub change: Decimal,
    /// Percent change since the reference price.
    pub change_percent: Decimal,
    /// Feed-side timestamp of the most recent update.
    pub timestamp: DateTime<Utc>,
    /// Local monotonic instant at which the most recent update was ingested.
    pub received_at: Instant,
}

impl Quote {
    /// Create an empty entry for an instrument that has not traded yet.
    #[must_use]
    pub fn new(instrument_id: InstrumentId, received_at: Instant) -> Self {
        Self {
            instrument_id,
            bid: Decimal::ZERO,
            ask: Decimal::ZERO,
            last_price: None,
            change: Decimal::ZERO,
            change_percent: Decimal::ZERO,
            timestamp: DateTime::<Utc>::MIN_UTC,
            received_at,
        }
    }

    /// Overwrite-merge an update: present fields replace, absent fields
    /// keep their previous value. Always restamps `received_at`.
    pub fn apply(&mut self, update: &QuoteUpdate, received_at: Instant) {
        if let Some(bid) = update.bid {
            self.bid = bid;
        }
        if let Some(ask) = update.ask {
            self.ask = ask;
        }
        if let Some(last_price) = update.last_price {
            self.last_price = Some(last_price);
        }
        if let Some(change) = update.change {
            self.change = change;
        }
        if let Some(change_percent) = update.change_percent {
            self.change_percent = change_percent;
        }
        if let Some(timestamp) = update.timestamp {
            self.timestamp = timestamp;
        }
        self.received_at = received_at;
    }

    /// Age of the entry relative to `now`.
    #[must_use]
    pub fn age(&self, now: Instant) -> std::time::Duration {
        now.saturating_duration_since(self.received_at)
    }
}

/// Sparse quote payload from the feed. All fields optional.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuoteUpdate {
    /// Instrument id; may also come from the topic scope.
    #[serde(default)]
    pub instrument_id: Option<InstrumentId>,
    /// Best bid.
    #[serde(default)]
    pub bid: Option<Decimal>,
    /// Best ask.
    #[serde(default)]
    pub ask: Option<Decimal>,
    /// Last traded price.
    #[serde(default)]
    pub last_price: Option<Decimal>,
    /// Absolute change.
    #[serde(default)]
    pub change: Option<Decimal>,
    /// Percent change.
    #[serde(default)]
    pub change_percent: Option<Decimal>,
    /// Feed-side timestamp.
    #[serde(default)]
    pub timestamp: Option<DateTime<Utc>>,
}
