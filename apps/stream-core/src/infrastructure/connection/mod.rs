//! Connection Management
//!
//! [`ConnectionManager`] drives the [`Session`] state machine over a real
//! socket: it owns the connect task, the writer pump, the reconnect timer,
//! and the observer registries, and it translates socket events into
//! session inputs and session effects back into socket work.
//!
//! All public methods are non-blocking and must be called from within a
//! Tokio runtime; socket work happens on spawned tasks.

pub mod backoff;
pub mod codec;
mod session;

pub use session::{AuthState, CLOSE_NORMAL, ConnectionState};

use std::collections::HashMap;
use std::sync::Arc;

use futures_util::{SinkExt, StreamExt};
use parking_lot::{Mutex, RwLock};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::application::ports::{TopicSink, Transport, WireFrame};
use crate::application::registry::{HandlerHandle, Registry};
use crate::domain::envelope::Envelope;
use crate::domain::topic::{Collection, Topic};
use crate::infrastructure::config::Credentials;

use backoff::BackoffConfig;
use codec::EnvelopeCodec;
use session::{Effect, Input, Session};

// =============================================================================
// Configuration
// =============================================================================

/// Settings for one managed connection.
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    /// Feed endpoint, e.g. `wss://stream.example.com/feed`.
    pub url: String,
    /// Handshake credentials.
    pub credentials: Credentials,
    /// Reconnect schedule.
    pub backoff: BackoffConfig,
}

// =============================================================================
// ConnectionManager
// =============================================================================

struct ConnectionInner {
    url: String,
    transport: Arc<dyn Transport>,
    codec: EnvelopeCodec,
    session: Mutex<Session>,
    writer: Mutex<Option<mpsc::UnboundedSender<WireFrame>>>,
    socket_cancel: Mutex<Option<CancellationToken>>,
    retry_timer: Mutex<Option<JoinHandle<()>>>,
    state_handlers: Registry<ConnectionState>,
    auth_handlers: Registry<AuthState>,
    error_handlers: Registry<String>,
    message_handlers: RwLock<HashMap<Collection, Registry<Envelope>>>,
}

/// Owns the feed socket and its lifecycle.
///
/// Cheap to clone; all clones share one session.
#[derive(Clone)]
pub struct ConnectionManager {
    inner: Arc<ConnectionInner>,
}

impl ConnectionManager {
    /// Create a manager over the given transport. No socket is opened
    /// until [`connect`](Self::connect).
    #[must_use]
    pub fn new(config: ConnectionConfig, transport: Arc<dyn Transport>) -> Self {
        Self {
            inner: Arc::new(ConnectionInner {
                url: config.url,
                transport,
                codec: EnvelopeCodec,
                session: Mutex::new(Session::new(config.credentials, config.backoff)),
                writer: Mutex::new(None),
                socket_cancel: Mutex::new(None),
                retry_timer: Mutex::new(None),
                state_handlers: Registry::new(),
                auth_handlers: Registry::new(),
                error_handlers: Registry::new(),
                message_handlers: RwLock::new(HashMap::new()),
            }),
        }
    }

    // -------------------------------------------------------------------------
    // Lifecycle
    // -------------------------------------------------------------------------

    /// Open the connection. Idempotent while connecting or connected;
    /// supersedes a pending reconnect timer.
    pub fn connect(&self) {
        apply(&self.inner, Input::Connect);
    }

    /// Close the connection and cancel any pending reconnect.
    pub fn disconnect(&self) {
        apply(&self.inner, Input::Disconnect);
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        self.inner.session.lock().state()
    }

    /// Current authentication state.
    #[must_use]
    pub fn auth_state(&self) -> AuthState {
        self.inner.session.lock().auth_state()
    }

    /// Whether the socket is open.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    /// Whether the handshake succeeded on the current socket.
    #[must_use]
    pub fn is_authenticated(&self) -> bool {
        self.auth_state() == AuthState::Authenticated
    }

    /// The rejection reason from the most recent failed handshake.
    #[must_use]
    pub fn auth_error(&self) -> Option<String> {
        match self.auth_state() {
            AuthState::Failed(reason) => Some(reason),
            _ => None,
        }
    }

    // -------------------------------------------------------------------------
    // Subscriptions
    // -------------------------------------------------------------------------

    /// Track a topic and subscribe it on the wire. Private topics queue
    /// until authentication succeeds; all tracked topics replay after a
    /// reconnect.
    pub fn subscribe(&self, topic: Topic) {
        apply(&self.inner, Input::Subscribe(topic));
    }

    /// Stop tracking a topic and unsubscribe it on the wire.
    pub fn unsubscribe(&self, topic: &Topic) {
        apply(&self.inner, Input::Unsubscribe(topic.clone()));
    }

    /// Topics currently tracked for replay.
    #[must_use]
    pub fn tracked_topics(&self) -> Vec<Topic> {
        self.inner.session.lock().tracked()
    }

    // -------------------------------------------------------------------------
    // Observers
    // -------------------------------------------------------------------------

    /// Observe lifecycle state changes.
    pub fn on_state_change<F>(&self, callback: F) -> HandlerHandle<ConnectionState>
    where
        F: Fn(&ConnectionState) + Send + Sync + 'static,
    {
        self.inner.state_handlers.register(callback)
    }

    /// Observe authentication state changes.
    pub fn on_auth_change<F>(&self, callback: F) -> HandlerHandle<AuthState>
    where
        F: Fn(&AuthState) + Send + Sync + 'static,
    {
        self.inner.auth_handlers.register(callback)
    }

    /// Observe transport-level errors.
    pub fn on_error<F>(&self, callback: F) -> HandlerHandle<String>
    where
        F: Fn(&String) + Send + Sync + 'static,
    {
        self.inner.error_handlers.register(callback)
    }

    /// Observe data envelopes for one collection.
    pub fn add_message_handler<F>(&self, collection: Collection, callback: F) -> HandlerHandle<Envelope>
    where
        F: Fn(&Envelope) + Send + Sync + 'static,
    {
        self.inner
            .message_handlers
            .write()
            .entry(collection)
            .or_default()
            .register(callback)
    }

    /// Push an envelope through the message handlers as the read loop
    /// would.
    #[cfg(test)]
    pub(crate) fn dispatch_for_tests(&self, envelope: &Envelope) {
        dispatch(&self.inner, envelope);
    }
}

impl TopicSink for ConnectionManager {
    fn subscribe_topic(&self, topic: &Topic) {
        self.subscribe(topic.clone());
    }

    fn unsubscribe_topic(&self, topic: &Topic) {
        self.unsubscribe(topic);
    }
}

// =============================================================================
// Effect execution
// =============================================================================

/// Feed one input through the session and perform the resulting effects.
/// The session lock is released before any effect runs, so observers may
/// call back into the manager.
fn apply(inner: &Arc<ConnectionInner>, input: Input) {
    let effects = inner.session.lock().handle(input);
    run_effects(inner, effects);
}

fn run_effects(inner: &Arc<ConnectionInner>, effects: Vec<Effect>) {
    for effect in effects {
        match effect {
            Effect::OpenSocket => spawn_connect(Arc::clone(inner)),
            Effect::TeardownSocket { close_code } => teardown_socket(inner, close_code),
            Effect::Send(envelope) => send_envelope(inner, &envelope),
            Effect::ScheduleRetry(delay) => {
                debug!(?delay, "scheduling reconnect");
                let weak = Arc::downgrade(inner);
                let handle = tokio::spawn(async move {
                    tokio::time::sleep(delay).await;
                    if let Some(inner) = weak.upgrade() {
                        apply(&inner, Input::RetryTimerFired);
                    }
                });
                if let Some(previous) = inner.retry_timer.lock().replace(handle) {
                    previous.abort();
                }
            }
            Effect::CancelRetry => {
                if let Some(handle) = inner.retry_timer.lock().take() {
                    handle.abort();
                }
            }
            Effect::NotifyState(state) => {
                info!(state = ?state, "connection state changed");
                inner.state_handlers.emit(&state);
            }
            Effect::NotifyAuth(auth) => {
                info!(auth = ?auth, "auth state changed");
                inner.auth_handlers.emit(&auth);
            }
            Effect::Dispatch(envelope) => dispatch(inner, &envelope),
        }
    }
}

fn spawn_connect(inner: Arc<ConnectionInner>) {
    tokio::spawn(async move {
        match inner.transport.connect(&inner.url).await {
            Ok((sink, source)) => run_socket(inner, sink, source).await,
            Err(error) => {
                warn!(error = %error, "connect attempt failed");
                inner.error_handlers.emit(&error.to_string());
                apply(&inner, Input::OpenFailed);
            }
        }
    });
}

async fn run_socket(
    inner: Arc<ConnectionInner>,
    mut sink: crate::application::ports::WireSink,
    mut source: crate::application::ports::WireSource,
) {
    use crate::application::ports::WireEvent;

    let cancel = CancellationToken::new();
    let (tx, mut rx) = mpsc::unbounded_channel::<WireFrame>();
    *inner.writer.lock() = Some(tx);
    *inner.socket_cancel.lock() = Some(cancel.clone());

    // Writer pump: serializes all outbound frames onto the sink.
    tokio::spawn(async move {
        while let Some(frame) = rx.recv().await {
            if sink.send(frame).await.is_err() {
                break;
            }
        }
        let _ = sink.close().await;
    });

    apply(&inner, Input::Opened);

    loop {
        tokio::select! {
            () = cancel.cancelled() => break,
            event = source.next() => match event {
                Some(Ok(WireEvent::Text(text))) => match inner.codec.decode(&text) {
                    Ok(envelope) => apply(&inner, Input::Inbound(envelope)),
                    Err(error) => warn!(error = %error, "dropping malformed frame"),
                },
                Some(Ok(WireEvent::Closed { code })) => {
                    apply(&inner, Input::Closed { code });
                    break;
                }
                // Socket errors surface to observers; only close events
                // change the lifecycle state.
                Some(Err(error)) => {
                    warn!(error = %error, "socket error");
                    inner.error_handlers.emit(&error.to_string());
                }
                None => {
                    apply(&inner, Input::Closed { code: 1006 });
                    break;
                }
            }
        }
    }
}

fn teardown_socket(inner: &Arc<ConnectionInner>, close_code: Option<u16>) {
    let writer = inner.writer.lock().take();
    if let (Some(writer), Some(code)) = (writer.as_ref(), close_code) {
        let _ = writer.send(WireFrame::Close { code });
    }
    drop(writer);
    if let Some(cancel) = inner.socket_cancel.lock().take() {
        cancel.cancel();
    }
}

fn send_envelope(inner: &Arc<ConnectionInner>, envelope: &Envelope) {
    let Some(writer) = inner.writer.lock().clone() else {
        debug!(topic = %envelope.topic, "dropping outbound frame without socket");
        return;
    };
    match inner.codec.encode(envelope) {
        Ok(text) => {
            let _ = writer.send(WireFrame::Text(text));
        }
        Err(error) => warn!(error = %error, "failed to encode outbound frame"),
    }
}

fn dispatch(inner: &Arc<ConnectionInner>, envelope: &Envelope) {
    let registry = inner
        .message_handlers
        .read()
        .get(envelope.topic.collection())
        .cloned();
    match registry {
        Some(registry) => registry.emit(envelope),
        None => debug!(topic = %envelope.topic, "no handler for collection"),
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use async_trait::async_trait;
    use parking_lot::Mutex;

    use crate::application::ports::{TransportError, WireSink, WireSource};

    use super::*;

    /// Transport that always refuses to connect.
    struct RefusingTransport {
        attempts: Arc<Mutex<u32>>,
    }

    #[async_trait]
    impl Transport for RefusingTransport {
        async fn connect(&self, _url: &str) -> Result<(WireSink, WireSource), TransportError> {
            *self.attempts.lock() += 1;
            Err(TransportError::Connect("refused".to_string()))
        }
    }

    fn manager(transport: Arc<dyn Transport>) -> ConnectionManager {
        ConnectionManager::new(
            ConnectionConfig {
                url: "wss://feed.test/stream".to_string(),
                credentials: Credentials::new("k", "u").unwrap(),
                backoff: BackoffConfig::default(),
            },
            transport,
        )
    }

    async fn settle() {
        for _ in 0..20 {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test(start_paused = true)]
    async fn failed_connect_schedules_backoff_retries() {
        let attempts = Arc::new(Mutex::new(0));
        let manager = manager(Arc::new(RefusingTransport {
            attempts: Arc::clone(&attempts),
        }));

        manager.connect();
        settle().await;
        assert_eq!(*attempts.lock(), 1);
        assert_eq!(manager.state(), ConnectionState::Reconnecting);

        tokio::time::advance(std::time::Duration::from_millis(1000)).await;
        settle().await;
        assert_eq!(*attempts.lock(), 2);

        tokio::time::advance(std::time::Duration::from_millis(2000)).await;
        settle().await;
        assert_eq!(*attempts.lock(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn disconnect_stops_retrying() {
        let attempts = Arc::new(Mutex::new(0));
        let manager = manager(Arc::new(RefusingTransport {
            attempts: Arc::clone(&attempts),
        }));

        manager.connect();
        settle().await;
        manager.disconnect();
        settle().await;
        let frozen = *attempts.lock();

        tokio::time::advance(std::time::Duration::from_secs(120)).await;
        settle().await;
        assert_eq!(*attempts.lock(), frozen);
        assert_eq!(manager.state(), ConnectionState::Disconnected);
    }

    #[tokio::test(start_paused = true)]
    async fn errors_reach_observers() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let manager = manager(Arc::new(RefusingTransport {
            attempts: Arc::new(Mutex::new(0)),
        }));

        let handle = {
            let seen = Arc::clone(&seen);
            manager.on_error(move |error: &String| seen.lock().push(error.clone()))
        };

        manager.connect();
        settle().await;
        assert_eq!(seen.lock().len(), 1);
        handle.unregister();
        drop(manager);
    }
}
