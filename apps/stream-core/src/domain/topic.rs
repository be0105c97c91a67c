//! Topic Identifiers
//!
//! A topic names one stream of data on the feed connection. Topics come in
//! two shapes: a *collection* topic (`quotes`, `positions`, `orders`,
//! `portfolio`) and a *scoped* topic parameterized by an entity id
//! (`quotes.1001`, `orders.42`). The collection before the first `.`
//! determines whether the topic is public or requires authentication.
//!
//! Topics are parsed once at the wire boundary into a tagged form so that
//! dispatch and classification never re-scan strings.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Numeric identifier for a tradable instrument.
pub type InstrumentId = u64;

// =============================================================================
// Collection
// =============================================================================

/// The collection a topic belongs to.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Collection {
    /// Market quotes (public).
    Quotes,
    /// Open positions (private).
    Positions,
    /// Working orders (private).
    Orders,
    /// Account portfolio summary (private).
    Portfolio,
    /// Reserved handshake channel.
    Auth,
    /// Any collection this core does not know about (treated as public).
    Other(String),
}

impl Collection {
    /// Parse a collection name.
    #[must_use]
    pub fn parse(name: &str) -> Self {
        match name {
            "quotes" => Self::Quotes,
            "positions" => Self::Positions,
            "orders" => Self::Orders,
            "portfolio" => Self::Portfolio,
            "auth" => Self::Auth,
            other => Self::Other(other.to_string()),
        }
    }

    /// Get the wire name of the collection.
    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            Self::Quotes => "quotes",
            Self::Positions => "positions",
            Self::Orders => "orders",
            Self::Portfolio => "portfolio",
            Self::Auth => "auth",
            Self::Other(name) => name,
        }
    }

    /// Whether topics in this collection carry account-specific data and
    /// are only deliverable after authentication.
    #[must_use]
    pub const fn is_private(&self) -> bool {
        matches!(self, Self::Positions | Self::Orders | Self::Portfolio)
    }
}

// =============================================================================
// Topic
// =============================================================================

/// A parsed topic: collection plus optional entity scope.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Topic {
    collection: Collection,
    scope: Option<String>,
}

impl Topic {
    /// The collection-wide quotes topic.
    #[must_use]
    pub const fn quotes() -> Self {
        Self {
            collection: Collection::Quotes,
            scope: None,
        }
    }

    /// The quote topic for a single instrument.
    #[must_use]
    pub fn quote(instrument_id: InstrumentId) -> Self {
        Self {
            collection: Collection::Quotes,
            scope: Some(instrument_id.to_string()),
        }
    }

    /// The collection-wide positions topic.
    #[must_use]
    pub const fn positions() -> Self {
        Self {
            collection: Collection::Positions,
            scope: None,
        }
    }

    /// The topic for a single position.
    #[must_use]
    pub fn position(position_id: u64) -> Self {
        Self {
            collection: Collection::Positions,
            scope: Some(position_id.to_string()),
        }
    }

    /// The collection-wide orders topic.
    #[must_use]
    pub const fn orders() -> Self {
        Self {
            collection: Collection::Orders,
            scope: None,
        }
    }

    /// The topic for a single order.
    #[must_use]
    pub fn order(order_id: u64) -> Self {
        Self {
            collection: Collection::Orders,
            scope: Some(order_id.to_string()),
        }
    }

    /// The portfolio topic.
    #[must_use]
    pub const fn portfolio() -> Self {
        Self {
            collection: Collection::Portfolio,
            scope: None,
        }
    }

    /// The reserved authentication handshake topic.
    #[must_use]
    pub const fn auth() -> Self {
        Self {
            collection: Collection::Auth,
            scope: None,
        }
    }

    /// The three private collection topics, subscribed as a unit.
    #[must_use]
    pub const fn private_collections() -> [Self; 3] {
        [Self::positions(), Self::orders(), Self::portfolio()]
    }

    /// Get the topic's collection.
    #[must_use]
    pub const fn collection(&self) -> &Collection {
        &self.collection
    }

    /// Get the entity scope, if any.
    #[must_use]
    pub fn scope(&self) -> Option<&str> {
        self.scope.as_deref()
    }

    /// Parse the scope as an instrument/entity id.
    #[must_use]
    pub fn instrument_id(&self) -> Option<InstrumentId> {
        self.scope.as_ref().and_then(|s| s.parse().ok())
    }

    /// Whether this topic requires authentication.
    #[must_use]
    pub const fn is_private(&self) -> bool {
        self.collection.is_private()
    }
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.scope {
            Some(scope) => write!(f, "{}.{scope}", self.collection.as_str()),
            None => write!(f, "{}", self.collection.as_str()),
        }
    }
}

impl From<&str> for Topic {
    fn from(s: &str) -> Self {
        let (name, scope) = match s.split_once('.') {
            Some((name, rest)) if !rest.is_empty() => (name, Some(rest.to_string())),
            Some((name, _)) => (name, None),
            None => (s, None),
        };
        Self {
            collection: Collection::parse(name),
            scope,
        }
    }
}

impl FromStr for Topic {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self::from(s))
    }
}

impl Serialize for Topic {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Topic {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Ok(Self::from(raw.as_str()))
    }
}

// =============================================================================
// Tests
// =============================================================================
