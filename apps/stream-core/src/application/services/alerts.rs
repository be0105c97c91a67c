//! Alerts Engine
//!
//! Evaluates alert rules against the quote store. Price rules are checked
//! reactively on every quote update for the watched instrument; staleness
//! rules are checked by one shared poll task regardless of how many
//! staleness alerts exist. A fired alert is silenced for the cooldown
//! window so a price hovering around a threshold produces one event, not
//! a stream of them.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info};

use crate::application::registry::{HandlerHandle, Registry};
use crate::application::services::quotes::QuoteStore;
use crate::domain::alert::{Alert, AlertEvent, AlertId, AlertRule};
use crate::domain::quote::Quote;
use crate::domain::topic::InstrumentId;

/// Engine tuning.
#[derive(Debug, Clone)]
pub struct AlertSettings {
    /// Minimum time between firings of the same alert.
    pub cooldown: Duration,
    /// Cadence of the shared staleness poll.
    pub staleness_poll_interval: Duration,
}

impl Default for AlertSettings {
    fn default() -> Self {
        Self {
            cooldown: Duration::from_secs(300),
            staleness_poll_interval: Duration::from_secs(1),
        }
    }
}

struct AlertsInner {
    store: Arc<QuoteStore>,
    settings: AlertSettings,
    alerts: Mutex<HashMap<AlertId, Alert>>,
    quote_subs: Mutex<HashMap<InstrumentId, HandlerHandle<Quote>>>,
    poll_task: Mutex<Option<JoinHandle<()>>>,
    observers: Registry<AlertEvent>,
    disposed: AtomicBool,
}

/// Watches quotes for threshold crossings and data gaps.
///
/// Cheap to clone; all clones share one engine.
#[derive(Clone)]
pub struct AlertsEngine {
    inner: Arc<AlertsInner>,
}

impl AlertsEngine {
    /// Create an engine over a quote store.
    #[must_use]
    pub fn new(store: Arc<QuoteStore>, settings: AlertSettings) -> Self {
        Self {
            inner: Arc::new(AlertsInner {
                store,
                settings,
                alerts: Mutex::new(HashMap::new()),
                quote_subs: Mutex::new(HashMap::new()),
                poll_task: Mutex::new(None),
                observers: Registry::new(),
                disposed: AtomicBool::new(false),
            }),
        }
    }

    // -------------------------------------------------------------------------
    // Alert management
    // -------------------------------------------------------------------------

    /// Register an alert and start watching its instrument. A disposed
    /// engine ignores the request; the returned id names nothing.
    pub fn create_alert(&self, instrument_id: InstrumentId, rule: AlertRule) -> AlertId {
        let alert = Alert::new(instrument_id, rule);
        let id = alert.id;
        if self.inner.disposed.load(Ordering::SeqCst) {
            return id;
        }
        info!(%id, instrument_id, rule = ?rule, "creating alert");

        self.inner.alerts.lock().insert(id, alert);
        self.ensure_quote_subscription(instrument_id);
        if rule.is_staleness() {
            self.ensure_poll_task();
        }
        id
    }

    /// Remove an alert, releasing its instrument subscription and the
    /// poll task when nothing references them anymore.
    pub fn delete_alert(&self, id: &AlertId) -> bool {
        let Some(removed) = self.inner.alerts.lock().remove(id) else {
            return false;
        };
        debug!(%id, "deleted alert");

        let (instrument_referenced, any_staleness) = {
            let alerts = self.inner.alerts.lock();
            (
                alerts
                    .values()
                    .any(|alert| alert.instrument_id == removed.instrument_id),
                alerts.values().any(|alert| alert.rule.is_staleness()),
            )
        };
        if !instrument_referenced {
            if let Some(handle) = self.inner.quote_subs.lock().remove(&removed.instrument_id) {
                handle.unregister();
            }
        }
        if !any_staleness {
            if let Some(task) = self.inner.poll_task.lock().take() {
                task.abort();
            }
        }
        true
    }

    /// Remove every alert and stop all watching.
    pub fn clear_alerts(&self) {
        self.inner.alerts.lock().clear();
        for (_, handle) in self.inner.quote_subs.lock().drain() {
            handle.unregister();
        }
        if let Some(task) = self.inner.poll_task.lock().take() {
            task.abort();
        }
    }

    /// Enable or disable an alert without removing it.
    pub fn set_enabled(&self, id: &AlertId, enabled: bool) -> bool {
        match self.inner.alerts.lock().get_mut(id) {
            Some(alert) => {
                alert.enabled = enabled;
                true
            }
            None => false,
        }
    }

    /// Look up one alert.
    #[must_use]
    pub fn get_alert(&self, id: &AlertId) -> Option<Alert> {
        self.inner.alerts.lock().get(id).cloned()
    }

    /// All registered alerts.
    #[must_use]
    pub fn alerts(&self) -> Vec<Alert> {
        self.inner.alerts.lock().values().cloned().collect()
    }

    /// Observe alert firings.
    pub fn on_alert<F>(&self, callback: F) -> HandlerHandle<AlertEvent>
    where
        F: Fn(&AlertEvent) + Send + Sync + 'static,
    {
        self.inner.observers.register(callback)
    }

    /// Stop all watching and drop all observers. Idempotent; nothing
    /// fires after dispose returns.
    pub fn dispose(&self) {
        if self.inner.disposed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.clear_alerts();
        self.inner.observers.clear();
    }

    // -------------------------------------------------------------------------
    // Watch plumbing
    // -------------------------------------------------------------------------

    /// One shared quote subscription per instrument, however many alerts
    /// watch it.
    fn ensure_quote_subscription(&self, instrument_id: InstrumentId) {
        let mut subs = self.inner.quote_subs.lock();
        if subs.contains_key(&instrument_id) {
            return;
        }
        let weak = Arc::downgrade(&self.inner);
        let handle = self.inner.store.subscribe(instrument_id, move |quote: &Quote| {
            if let Some(inner) = weak.upgrade() {
                evaluate_quote(&inner, quote);
            }
        });
        subs.insert(instrument_id, handle);
    }

    /// One shared poll task for every staleness alert.
    fn ensure_poll_task(&self) {
        let mut task = self.inner.poll_task.lock();
        if task.is_some() {
            return;
        }
        let weak = Arc::downgrade(&self.inner);
        let interval = self.inner.settings.staleness_poll_interval;
        *task = Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let Some(inner) = weak.upgrade() else { break };
                evaluate_staleness(&inner);
            }
        }));
    }
}

/// Check every price alert on the quote's instrument. Skipped entirely
/// until the instrument has traded at least once. Fired events are
/// emitted after the alerts lock is released.
fn evaluate_quote(inner: &Arc<AlertsInner>, quote: &Quote) {
    let Some(last_price) = quote.last_price else {
        return;
    };
    let now = Instant::now();
    let cooldown = inner.settings.cooldown;

    let fired: Vec<AlertEvent> = {
        let mut alerts = inner.alerts.lock();
        alerts
            .values_mut()
            .filter(|alert| alert.instrument_id == quote.instrument_id)
            .filter(|alert| !alert.rule.is_staleness())
            .filter(|alert| alert.rule.price_matches(last_price))
            .filter(|alert| alert.ready(now, cooldown))
            .map(|alert| {
                alert.last_triggered_at = Some(now);
                AlertEvent {
                    alert: alert.clone(),
                    current_value: Some(last_price),
                    triggered_at: Utc::now(),
                }
            })
            .collect()
    };

    for event in fired {
        info!(id = %event.alert.id, value = ?event.current_value, "alert fired");
        inner.observers.emit(&event);
    }
}

/// Check every staleness alert against the store. An instrument with no
/// quote at all is stale by definition.
fn evaluate_staleness(inner: &Arc<AlertsInner>) {
    let now = Instant::now();
    let cooldown = inner.settings.cooldown;

    let fired: Vec<AlertEvent> = {
        let mut alerts = inner.alerts.lock();
        alerts
            .values_mut()
            .filter_map(|alert| {
                let AlertRule::Stale { after } = alert.rule else {
                    return None;
                };
                if !alert.ready(now, cooldown) {
                    return None;
                }
                if !inner.store.is_stale(alert.instrument_id, after) {
                    return None;
                }
                alert.last_triggered_at = Some(now);
                Some(AlertEvent {
                    alert: alert.clone(),
                    current_value: None,
                    triggered_at: Utc::now(),
                })
            })
            .collect()
    };

    for event in fired {
        info!(id = %event.alert.id, instrument_id = event.alert.instrument_id, "staleness alert fired");
        inner.observers.emit(&event);
    }
}

// =============================================================================
// Tests
// =============================================================================
