//! Alert Rules
//!
//! An alert watches one instrument with one rule. Price rules are evaluated
//! reactively on every quote update; staleness rules are evaluated by a
//! shared poll. A fired alert enters a cooldown during which it will not
//! fire again, and `last_triggered_at` uses the local monotonic clock for
//! the same reason quote staleness does.

use std::time::Duration;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use tokio::time::Instant;
use uuid::Uuid;

use super::topic::InstrumentId;

/// Unique alert identifier.
pub type AlertId = Uuid;

// =============================================================================
// Rule
// =============================================================================

/// The condition an alert watches for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlertRule {
    /// Fire when the last price rises strictly above the threshold.
    PriceAbove {
        /// Price the last trade must exceed.
        threshold: Decimal,
    },
    /// Fire when the last price falls strictly below the threshold.
    PriceBelow {
        /// Price the last trade must undercut.
        threshold: Decimal,
    },
    /// Fire when no quote has arrived for the given duration.
    Stale {
        /// Maximum tolerated quote age.
        after: Duration,
    },
}

impl AlertRule {
    /// Whether this rule is evaluated by the staleness poll rather than on
    /// quote arrival.
    #[must_use]
    pub const fn is_staleness(&self) -> bool {
        matches!(self, Self::Stale { .. })
    }

    /// Evaluate a price rule against the latest traded price. Comparisons
    /// are strict: a price sitting exactly on the threshold does not match.
    /// Staleness rules never match here.
    #[must_use]
    pub fn price_matches(&self, last_price: Decimal) -> bool {
        match self {
            Self::PriceAbove { threshold } => last_price > *threshold,
            Self::PriceBelow { threshold } => last_price < *threshold,
            Self::Stale { .. } => false,
        }
    }
}

// =============================================================================
// Alert
// =============================================================================

/// One registered alert.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Alert {
    /// Alert identifier.
    pub id: AlertId,
    /// Instrument watched.
    pub instrument_id: InstrumentId,
    /// Condition watched for.
    pub rule: AlertRule,
    /// Wall-clock creation time.
    pub created_at: DateTime<Utc>,
    /// Monotonic instant of the most recent firing.
    pub last_triggered_at: Option<Instant>,
    /// Disabled alerts are kept but never fire.
    pub enabled: bool,
}

impl Alert {
    /// Register a new enabled alert.
    #[must_use]
    pub fn new(instrument_id: InstrumentId, rule: AlertRule) -> Self {
        Self {
            id: Uuid::new_v4(),
            instrument_id,
            rule,
            created_at: Utc::now(),
            last_triggered_at: None,
            enabled: true,
        }
    }

    /// Whether the alert may fire at `now` given the cooldown window.
    #[must_use]
    pub fn ready(&self, now: Instant, cooldown: Duration) -> bool {
        if !self.enabled {
            return false;
        }
        match self.last_triggered_at {
            None => true,
            Some(last) => now.saturating_duration_since(last) >= cooldown,
        }
    }
}

/// Record of one alert firing, delivered to observers.
#[derive(Debug, Clone)]
pub struct AlertEvent {
    /// The alert as it was when it fired.
    pub alert: Alert,
    /// Last traded price at firing time; `None` for staleness alerts.
    pub current_value: Option<Decimal>,
    /// Wall-clock firing time.
    pub triggered_at: DateTime<Utc>,
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use std::str::FromStr;

    use test_case::test_case;

    use super::*;

    fn dec(value: &str) -> Decimal {
        Decimal::from_str(value).unwrap()
    }

    #[test_case("100", "100", false; "above ignores threshold itself")]
    #[test_case("100", "100.01", true; "above matches past threshold")]
    #[test_case("100", "99.99", false; "above rejects below threshold")]
    fn price_above(threshold: &str, price: &str, expected: bool) {
        let rule = AlertRule::PriceAbove {
            threshold: dec(threshold),
        };
        assert_eq!(rule.price_matches(dec(price)), expected);
    }

    #[test_case("100", "100", false; "below ignores threshold itself")]
    #[test_case("100", "99", true; "below matches under threshold")]
    #[test_case("100", "101", false; "below rejects above threshold")]
    fn price_below(threshold: &str, price: &str, expected: bool) {
        let rule = AlertRule::PriceBelow {
            threshold: dec(threshold),
        };
        assert_eq!(rule.price_matches(dec(price)), expected);
    }

    #[test]
    fn staleness_rule_never_matches_prices() {
        let rule = AlertRule::Stale {
            after: Duration::from_secs(30),
        };
        assert!(rule.is_staleness());
        assert!(!rule.price_matches(dec("100")));
    }

    #[tokio::test(start_paused = true)]
    async fn cooldown_gates_readiness() {
        let cooldown = Duration::from_secs(300);
        let mut alert = Alert::new(1001, AlertRule::PriceAbove { threshold: dec("1") });

        let now = Instant::now();
        assert!(alert.ready(now, cooldown));

        alert.last_triggered_at = Some(now);
        assert!(!alert.ready(now + Duration::from_secs(299), cooldown));
        assert!(alert.ready(now + Duration::from_secs(300), cooldown));
    }

    #[test]
    fn disabled_alert_is_never_ready() {
        let mut alert = Alert::new(1001, AlertRule::PriceAbove { threshold: dec("1") });
        alert.enabled = false;
        assert!(!alert.ready(Instant::now(), Duration::ZERO));
    }
}
