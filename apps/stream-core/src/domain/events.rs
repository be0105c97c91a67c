//! Private Feed Events
//!
//! Typed payloads for the authenticated collections (`positions`, `orders`,
//! `portfolio`) plus the `Fill` record synthesized when an order reaches
//! the executed state.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::topic::InstrumentId;

// =============================================================================
// Shared enums
// =============================================================================

/// Direction of a position or order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TradeSide {
    /// Long.
    Buy,
    /// Short.
    Sell,
}

/// Lifecycle state of a working order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderStatus {
    /// Accepted, not yet filled.
    Pending,
    /// Filled at `executed_rate`.
    Executed,
    /// Cancelled before fill.
    Cancelled,
    /// Rejected by the venue.
    Rejected,
}

// =============================================================================
// Update payloads
// =============================================================================

/// Snapshot of one open position.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PositionUpdate {
    /// Position identifier.
    pub position_id: u64,
    /// Instrument held.
    pub instrument_id: InstrumentId,
    /// Direction.
    pub side: TradeSide,
    /// Position size.
    pub amount: Decimal,
    /// Rate at open.
    pub open_rate: Decimal,
    /// Current mark rate, when the feed includes it.
    #[serde(default)]
    pub current_rate: Option<Decimal>,
    /// Unrealized profit or loss.
    #[serde(default)]
    pub profit_loss: Option<Decimal>,
}

/// Snapshot of one order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderUpdate {
    /// Order identifier.
    pub order_id: u64,
    /// Instrument traded.
    pub instrument_id: InstrumentId,
    /// Position the order belongs to, when the venue links it.
    #[serde(default)]
    pub position_id: Option<u64>,
    /// Direction.
    pub side: TradeSide,
    /// Order size.
    pub amount: Decimal,
    /// Requested rate.
    pub rate: Decimal,
    /// Lifecycle state.
    pub status: OrderStatus,
    /// Fill rate; present once the order is executed.
    #[serde(default)]
    pub executed_rate: Option<Decimal>,
    /// Fill time; present once the order is executed.
    #[serde(default)]
    pub executed_at: Option<DateTime<Utc>>,
}

/// Account-level summary pushed on the `portfolio` topic.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PortfolioUpdate {
    /// Cash balance.
    pub balance: Decimal,
    /// Balance plus open P&L.
    pub equity: Decimal,
    /// Margin currently committed.
    #[serde(default)]
    pub margin_used: Option<Decimal>,
    /// Aggregate open profit or loss.
    #[serde(default)]
    pub profit_loss: Option<Decimal>,
}

// =============================================================================
// Fill
// =============================================================================

/// A completed execution, derived from an executed [`OrderUpdate`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Fill {
    /// Order that filled.
    pub order_id: u64,
    /// Position linked by the venue, if any.
    pub position_id: Option<u64>,
    /// Instrument traded.
    pub instrument_id: InstrumentId,
    /// Direction, taken from the order.
    pub side: TradeSide,
    /// Filled size.
    pub amount: Decimal,
    /// Fill rate.
    pub rate: Decimal,
    /// Fill time.
    pub executed_at: DateTime<Utc>,
}

impl Fill {
    /// Derive a fill from an order update. Returns `None` unless the order
    /// is executed with both a fill rate and a fill time.
    #[must_use]
    pub fn from_order(order: &OrderUpdate) -> Option<Self> {
        if order.status != OrderStatus::Executed {
            return None;
        }
        let rate = order.executed_rate?;
        let executed_at = order.executed_at?;
        Some(Self {
            order_id: order.order_id,
            position_id: order.position_id,
            instrument_id: order.instrument_id,
            side: order.side,
            amount: order.amount,
            rate,
            executed_at,
        })
    }
}

// =============================================================================
// Tests
// =============================================================================
