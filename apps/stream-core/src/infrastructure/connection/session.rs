//! Connection Session State Machine
//!
//! `Session` is the synchronous heart of the connection layer: every
//! socket event, timer firing, and consumer call becomes an [`Input`], and
//! `handle` returns the [`Effect`]s the async driver must perform. Keeping
//! the machine synchronous makes every lifecycle rule unit-testable
//! without a socket or a runtime.
//!
//! Lifecycle: `Disconnected -> Connecting -> Connected`, with any abnormal
//! socket loss moving to `Reconnecting` until a retry succeeds or the
//! attempt budget runs out. Authentication rides on the reserved `auth`
//! topic inside `Connected`; private topics queue until the handshake
//! verdict arrives.

use std::collections::BTreeSet;
use std::time::Duration;

use tracing::{debug, warn};

use crate::domain::envelope::{AuthResponse, Envelope, EnvelopeKind};
use crate::domain::topic::{Collection, Topic};
use crate::infrastructure::config::Credentials;

use super::backoff::{Backoff, BackoffConfig};

/// WebSocket close code for a clean shutdown.
pub const CLOSE_NORMAL: u16 = 1000;

// =============================================================================
// States
// =============================================================================

/// Connection lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionState {
    /// No socket and no retry pending.
    #[default]
    Disconnected,
    /// A connect attempt is in flight.
    Connecting,
    /// The socket is open.
    Connected,
    /// The socket was lost; a retry timer is pending.
    Reconnecting,
}

/// Authentication state within a connection.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum AuthState {
    /// No handshake attempted on the current socket.
    #[default]
    Unauthenticated,
    /// Credentials sent, verdict pending.
    Authenticating,
    /// Credentials accepted; private topics flow.
    Authenticated,
    /// Credentials rejected with a reason.
    Failed(String),
}

// =============================================================================
// Inputs and effects
// =============================================================================

/// Everything that can happen to a session.
#[derive(Debug, Clone)]
pub(crate) enum Input {
    /// Consumer asked to connect.
    Connect,
    /// The socket opened.
    Opened,
    /// The connect attempt failed before a socket existed.
    OpenFailed,
    /// The socket closed with the given code.
    Closed {
        /// WebSocket close code.
        code: u16,
    },
    /// The reconnect delay elapsed.
    RetryTimerFired,
    /// Consumer asked to disconnect.
    Disconnect,
    /// Consumer asked to subscribe a topic.
    Subscribe(Topic),
    /// Consumer asked to unsubscribe a topic.
    Unsubscribe(Topic),
    /// A decoded envelope arrived from the socket.
    Inbound(Envelope),
}

/// Work the driver must perform after a transition.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Effect {
    /// Dial the endpoint.
    OpenSocket,
    /// Drop the socket, optionally sending a close frame first.
    TeardownSocket {
        /// Close code to send, or `None` to drop without a handshake.
        close_code: Option<u16>,
    },
    /// Write an envelope to the socket.
    Send(Envelope),
    /// Arm the retry timer.
    ScheduleRetry(Duration),
    /// Disarm the retry timer.
    CancelRetry,
    /// Tell state observers.
    NotifyState(ConnectionState),
    /// Tell auth observers.
    NotifyAuth(AuthState),
    /// Hand a data envelope to the message dispatchers.
    Dispatch(Envelope),
}

// =============================================================================
// Session
// =============================================================================

/// The synchronous connection state machine.
pub(crate) struct Session {
    credentials: Credentials,
    state: ConnectionState,
    auth: AuthState,
    tracked: BTreeSet<Topic>,
    pending_private: Vec<Topic>,
    backoff: Backoff,
}

impl Session {
    pub(crate) fn new(credentials: Credentials, backoff: BackoffConfig) -> Self {
        Self {
            credentials,
            state: ConnectionState::default(),
            auth: AuthState::default(),
            tracked: BTreeSet::new(),
            pending_private: Vec::new(),
            backoff: Backoff::new(backoff),
        }
    }

    pub(crate) const fn state(&self) -> ConnectionState {
        self.state
    }

    pub(crate) fn auth_state(&self) -> AuthState {
        self.auth.clone()
    }

    pub(crate) fn tracked(&self) -> Vec<Topic> {
        self.tracked.iter().cloned().collect()
    }

    /// Process one input, returning the effects to perform. Effects are
    /// ordered; the driver runs them front to back.
    pub(crate) fn handle(&mut self, input: Input) -> Vec<Effect> {
        match input {
            Input::Connect => self.on_connect(),
            Input::Opened => self.on_opened(),
            Input::OpenFailed => self.on_open_failed(),
            Input::Closed { code } => self.on_closed(code),
            Input::RetryTimerFired => self.on_retry_timer(),
            Input::Disconnect => self.on_disconnect(),
            Input::Subscribe(topic) => self.on_subscribe(topic),
            Input::Unsubscribe(topic) => self.on_unsubscribe(&topic),
            Input::Inbound(envelope) => self.on_inbound(envelope),
        }
    }

    // -------------------------------------------------------------------------
    // Lifecycle transitions
    // -------------------------------------------------------------------------

    fn on_connect(&mut self) -> Vec<Effect> {
        match self.state {
            ConnectionState::Connected | ConnectionState::Connecting => Vec::new(),
            ConnectionState::Disconnected => {
                self.state = ConnectionState::Connecting;
                vec![
                    Effect::NotifyState(ConnectionState::Connecting),
                    Effect::OpenSocket,
                ]
            }
            ConnectionState::Reconnecting => {
                // Manual connect supersedes the pending retry.
                self.state = ConnectionState::Connecting;
                vec![
                    Effect::CancelRetry,
                    Effect::NotifyState(ConnectionState::Connecting),
                    Effect::OpenSocket,
                ]
            }
        }
    }

    fn on_opened(&mut self) -> Vec<Effect> {
        if self.state != ConnectionState::Connecting {
            // A disconnect won the race against the connect attempt; the
            // freshly opened socket is unwanted.
            debug!(state = ?self.state, "closing socket opened outside connecting");
            return vec![Effect::TeardownSocket {
                close_code: Some(CLOSE_NORMAL),
            }];
        }

        self.backoff.reset();
        self.state = ConnectionState::Connected;
        self.auth = AuthState::Authenticating;

        let mut effects = vec![
            Effect::NotifyState(ConnectionState::Connected),
            Effect::NotifyAuth(AuthState::Authenticating),
            Effect::Send(Envelope::auth_request(
                self.credentials.api_key(),
                self.credentials.user_key(),
            )),
        ];

        // Replay every tracked topic: public topics go straight out,
        // private ones wait for the handshake verdict.
        for topic in self.tracked.iter().cloned().collect::<Vec<_>>() {
            if topic.is_private() {
                self.queue_private(topic);
            } else {
                effects.push(Effect::Send(Envelope::subscribe(topic)));
            }
        }

        effects
    }

    fn on_open_failed(&mut self) -> Vec<Effect> {
        if self.state != ConnectionState::Connecting {
            debug!(state = ?self.state, "ignoring stale open failure");
            return Vec::new();
        }
        self.fail_socket()
    }

    fn on_closed(&mut self, code: u16) -> Vec<Effect> {
        if code == CLOSE_NORMAL {
            return self.clean_close();
        }
        match self.state {
            ConnectionState::Connected | ConnectionState::Connecting => self.fail_socket(),
            // A pending retry timer is the single reconnect source; stale
            // close events do not reschedule it.
            ConnectionState::Reconnecting | ConnectionState::Disconnected => {
                debug!(code, state = ?self.state, "ignoring stale close event");
                Vec::new()
            }
        }
    }

    fn on_retry_timer(&mut self) -> Vec<Effect> {
        if self.state != ConnectionState::Reconnecting {
            return Vec::new();
        }
        self.backoff.advance();
        self.state = ConnectionState::Connecting;
        vec![
            Effect::NotifyState(ConnectionState::Connecting),
            Effect::OpenSocket,
        ]
    }

    fn on_disconnect(&mut self) -> Vec<Effect> {
        let mut effects = vec![
            Effect::CancelRetry,
            Effect::TeardownSocket {
                close_code: Some(CLOSE_NORMAL),
            },
        ];
        self.pending_private.clear();
        self.backoff.reset();

        if self.state != ConnectionState::Disconnected {
            self.state = ConnectionState::Disconnected;
            effects.push(Effect::NotifyState(ConnectionState::Disconnected));
        }
        if self.auth != AuthState::Unauthenticated {
            self.auth = AuthState::Unauthenticated;
            effects.push(Effect::NotifyAuth(AuthState::Unauthenticated));
        }
        effects
    }

    /// Peer-initiated clean close: no reconnect.
    fn clean_close(&mut self) -> Vec<Effect> {
        let mut effects = vec![
            Effect::CancelRetry,
            Effect::TeardownSocket { close_code: None },
        ];
        self.pending_private.clear();
        self.backoff.reset();

        if self.state != ConnectionState::Disconnected {
            self.state = ConnectionState::Disconnected;
            effects.push(Effect::NotifyState(ConnectionState::Disconnected));
        }
        if self.auth != AuthState::Unauthenticated {
            self.auth = AuthState::Unauthenticated;
            effects.push(Effect::NotifyAuth(AuthState::Unauthenticated));
        }
        effects
    }

    /// Abnormal socket loss: tear down and schedule a retry, or give up
    /// when the attempt budget is spent.
    fn fail_socket(&mut self) -> Vec<Effect> {
        let mut effects = vec![
            Effect::TeardownSocket { close_code: None },
            Effect::CancelRetry,
        ];
        self.pending_private.clear();

        if self.auth != AuthState::Unauthenticated {
            self.auth = AuthState::Unauthenticated;
            effects.push(Effect::NotifyAuth(AuthState::Unauthenticated));
        }

        match self.backoff.next_delay() {
            Some(delay) => {
                self.state = ConnectionState::Reconnecting;
                effects.push(Effect::NotifyState(ConnectionState::Reconnecting));
                effects.push(Effect::ScheduleRetry(delay));
            }
            None => {
                warn!(
                    attempts = self.backoff.attempts(),
                    "reconnect budget exhausted, giving up"
                );
                self.state = ConnectionState::Disconnected;
                effects.push(Effect::NotifyState(ConnectionState::Disconnected));
            }
        }
        effects
    }

    // -------------------------------------------------------------------------
    // Subscriptions
    // -------------------------------------------------------------------------

    fn on_subscribe(&mut self, topic: Topic) -> Vec<Effect> {
        let newly_tracked = self.tracked.insert(topic.clone());

        if self.state != ConnectionState::Connected {
            return Vec::new();
        }
        if topic.is_private() && self.auth != AuthState::Authenticated {
            self.queue_private(topic);
            return Vec::new();
        }
        // An already-tracked topic is live on this socket (replayed at
        // open or sent earlier); resubscribing would duplicate it.
        if !newly_tracked {
            return Vec::new();
        }
        vec![Effect::Send(Envelope::subscribe(topic))]
    }

    fn on_unsubscribe(&mut self, topic: &Topic) -> Vec<Effect> {
        let was_tracked = self.tracked.remove(topic);
        let was_queued = if let Some(at) = self.pending_private.iter().position(|t| t == topic) {
            self.pending_private.remove(at);
            true
        } else {
            false
        };

        if !was_tracked || self.state != ConnectionState::Connected {
            return Vec::new();
        }
        // A queued private topic never reached the wire.
        if was_queued || (topic.is_private() && self.auth != AuthState::Authenticated) {
            return Vec::new();
        }
        vec![Effect::Send(Envelope::unsubscribe(topic.clone()))]
    }

    fn queue_private(&mut self, topic: Topic) {
        if !self.pending_private.contains(&topic) {
            self.pending_private.push(topic);
        }
    }

    // -------------------------------------------------------------------------
    // Inbound frames
    // -------------------------------------------------------------------------

    fn on_inbound(&mut self, envelope: Envelope) -> Vec<Effect> {
        if envelope.topic.collection() == &Collection::Auth {
            return self.on_auth_frame(&envelope);
        }
        match envelope.kind {
            EnvelopeKind::Data => vec![Effect::Dispatch(envelope)],
            EnvelopeKind::Error => {
                warn!(topic = %envelope.topic, payload = %envelope.payload, "server reported topic error");
                Vec::new()
            }
            EnvelopeKind::Subscribe | EnvelopeKind::Unsubscribe => {
                debug!(topic = %envelope.topic, "ignoring control echo");
                Vec::new()
            }
        }
    }

    fn on_auth_frame(&mut self, envelope: &Envelope) -> Vec<Effect> {
        if self.auth != AuthState::Authenticating {
            debug!(auth = ?self.auth, "ignoring auth frame outside handshake");
            return Vec::new();
        }

        let verdict = AuthResponse::from_payload(&envelope.payload);
        match verdict {
            Ok(response) if response.success => {
                self.auth = AuthState::Authenticated;
                let mut effects = vec![Effect::NotifyAuth(AuthState::Authenticated)];
                for topic in self.pending_private.drain(..) {
                    effects.push(Effect::Send(Envelope::subscribe(topic)));
                }
                effects
            }
            Ok(response) => {
                let reason = response
                    .error
                    .unwrap_or_else(|| "authentication rejected".to_string());
                self.auth_failed(reason)
            }
            Err(error) => self.auth_failed(format!("malformed auth response: {error}")),
        }
    }

    /// Queued private topics are discarded for good: they also leave the
    /// tracked set, so a later successful handshake will not resurrect
    /// them. The consumer observes `Failed` and decides.
    fn auth_failed(&mut self, reason: String) -> Vec<Effect> {
        warn!(reason = %reason, "authentication failed");
        for topic in self.pending_private.drain(..) {
            self.tracked.remove(&topic);
        }
        self.auth = AuthState::Failed(reason.clone());
        vec![Effect::NotifyAuth(AuthState::Failed(reason))]
    }
}

// =============================================================================
// Tests
// =============================================================================
