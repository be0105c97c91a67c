//! End-to-end tests over an in-memory transport.
//!
//! The fake transport hands the connection a pair of channels per connect
//! attempt, so tests see every frame the client writes and can feed it
//! frames as the server. Time is paused; batching windows, reconnect
//! delays, and staleness polls are driven with `tokio::time::advance`.

use std::collections::VecDeque;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::SinkExt;
use futures::channel::mpsc as fmpsc;
use parking_lot::Mutex;
use rust_decimal::Decimal;
use serde_json::json;
use tokio::time::Instant;

use stream_core::{
    AlertRule, AuthState, BackoffConfig, ConnectionConfig, ConnectionManager, ConnectionState,
    Credentials, Envelope, EnvelopeKind, Fill, StreamConfig, StreamingCore, Topic, TradeSide,
    Transport, TransportError, WireEvent, WireFrame, WireSink, WireSource,
};

// =============================================================================
// Fake transport
// =============================================================================

/// One established socket: the frames the client wrote, and a sender for
/// feeding it server frames.
struct FakeLink {
    outbound: fmpsc::UnboundedReceiver<WireFrame>,
    inbound: fmpsc::UnboundedSender<Result<WireEvent, TransportError>>,
}

impl FakeLink {
    /// Frames written so far, decoded to envelopes. Close frames are
    /// skipped.
    fn envelopes(&mut self) -> Vec<Envelope> {
        let mut frames = Vec::new();
        while let Ok(Some(frame)) = self.outbound.try_next() {
            if let WireFrame::Text(text) = frame {
                frames.push(serde_json::from_str(&text).unwrap());
            }
        }
        frames
    }

    /// Whether the client sent a close frame with the given code.
    fn saw_close(&mut self, code: u16) -> bool {
        while let Ok(Some(frame)) = self.outbound.try_next() {
            if frame == (WireFrame::Close { code }) {
                return true;
            }
        }
        false
    }

    fn send_envelope(&self, envelope: &Envelope) {
        let text = serde_json::to_string(envelope).unwrap();
        self.inbound
            .unbounded_send(Ok(WireEvent::Text(text)))
            .unwrap();
    }

    fn send_auth_success(&self) {
        self.send_envelope(&Envelope::data(Topic::auth(), json!({ "success": true })));
    }

    fn send_auth_failure(&self, reason: &str) {
        self.send_envelope(&Envelope::data(
            Topic::auth(),
            json!({ "success": false, "error": reason }),
        ));
    }

    fn send_close(&self, code: u16) {
        self.inbound
            .unbounded_send(Ok(WireEvent::Closed { code }))
            .unwrap();
    }
}

#[derive(Default)]
struct FakeShared {
    fail_connects: u32,
    connect_count: u32,
    attempt_at: Vec<Instant>,
    links: VecDeque<FakeLink>,
}

#[derive(Clone, Default)]
struct FakeTransport {
    shared: Arc<Mutex<FakeShared>>,
}

impl FakeTransport {
    fn failing_first(attempts: u32) -> Self {
        let transport = Self::default();
        transport.shared.lock().fail_connects = attempts;
        transport
    }

    fn connect_count(&self) -> u32 {
        self.shared.lock().connect_count
    }

    fn attempt_times(&self) -> Vec<Instant> {
        self.shared.lock().attempt_at.clone()
    }

    /// The most recent established socket.
    fn link(&self) -> FakeLink {
        self.shared.lock().links.pop_back().unwrap()
    }
}

#[async_trait]
impl Transport for FakeTransport {
    async fn connect(&self, _url: &str) -> Result<(WireSink, WireSource), TransportError> {
        let mut shared = self.shared.lock();
        shared.connect_count += 1;
        shared.attempt_at.push(Instant::now());
        if shared.fail_connects > 0 {
            shared.fail_connects -= 1;
            return Err(TransportError::Connect("refused".to_string()));
        }

        let (out_tx, out_rx) = fmpsc::unbounded::<WireFrame>();
        let (in_tx, in_rx) = fmpsc::unbounded::<Result<WireEvent, TransportError>>();
        shared.links.push_back(FakeLink {
            outbound: out_rx,
            inbound: in_tx,
        });

        let sink: WireSink =
            Box::pin(out_tx.sink_map_err(|error| TransportError::Socket(error.to_string())));
        let source: WireSource = Box::pin(in_rx);
        Ok((sink, source))
    }
}

// =============================================================================
// Helpers
// =============================================================================

async fn settle() {
    for _ in 0..32 {
        tokio::task::yield_now().await;
    }
}

/// Advance past the subscription batching window.
async fn run_batch_window() {
    tokio::time::advance(Duration::from_millis(51)).await;
    settle().await;
}

fn dec(value: &str) -> Decimal {
    Decimal::from_str(value).unwrap()
}

fn connection(transport: &FakeTransport) -> ConnectionManager {
    ConnectionManager::new(
        ConnectionConfig {
            url: "wss://feed.test/stream".to_string(),
            credentials: Credentials::new("api-key", "user-key").unwrap(),
            backoff: BackoffConfig::default(),
        },
        Arc::new(transport.clone()),
    )
}

fn core(transport: &FakeTransport) -> StreamingCore {
    StreamingCore::with_transport(
        StreamConfig::new(
            "wss://feed.test/stream",
            Credentials::new("api-key", "user-key").unwrap(),
        ),
        Arc::new(transport.clone()),
    )
}

fn subscribes_of(frames: &[Envelope], topic: &Topic) -> usize {
    frames
        .iter()
        .filter(|frame| frame.kind == EnvelopeKind::Subscribe && &frame.topic == topic)
        .count()
}

// =============================================================================
// Connection lifecycle
// =============================================================================

#[tokio::test(start_paused = true)]
async fn auth_handshake_precedes_subscriptions() {
    let transport = FakeTransport::default();
    let conn = connection(&transport);

    conn.subscribe(Topic::quote(1001));
    conn.connect();
    settle().await;

    let mut link = transport.link();
    let frames = link.envelopes();

    assert_eq!(frames[0].topic, Topic::auth());
    assert_eq!(frames[0].payload["apiKey"], "api-key");
    assert_eq!(subscribes_of(&frames, &Topic::quote(1001)), 1);
    assert_eq!(conn.auth_state(), AuthState::Authenticating);

    link.send_auth_success();
    settle().await;
    assert_eq!(conn.auth_state(), AuthState::Authenticated);
}

#[tokio::test(start_paused = true)]
async fn private_topic_waits_for_auth_verdict() {
    let transport = FakeTransport::default();
    let conn = connection(&transport);

    conn.connect();
    settle().await;
    let mut link = transport.link();
    link.envelopes();

    conn.subscribe(Topic::positions());
    settle().await;
    assert!(link.envelopes().is_empty());

    link.send_auth_success();
    settle().await;
    let frames = link.envelopes();
    assert_eq!(subscribes_of(&frames, &Topic::positions()), 1);
}

#[tokio::test(start_paused = true)]
async fn auth_failure_discards_private_queue_across_reconnect() {
    let transport = FakeTransport::default();
    let conn = connection(&transport);

    conn.connect();
    settle().await;
    let mut first = transport.link();
    conn.subscribe(Topic::orders());
    settle().await;

    first.send_auth_failure("bad key");
    settle().await;
    assert_eq!(conn.auth_state(), AuthState::Failed("bad key".to_string()));

    // Lose the socket; the reconnect succeeds and authenticates, but the
    // discarded topic stays gone.
    first.send_close(1006);
    settle().await;
    assert_eq!(conn.state(), ConnectionState::Reconnecting);

    tokio::time::advance(Duration::from_millis(1001)).await;
    settle().await;

    let mut second = transport.link();
    second.send_auth_success();
    settle().await;

    let frames = second.envelopes();
    assert_eq!(subscribes_of(&frames, &Topic::orders()), 0);
    assert!(conn.tracked_topics().is_empty());
}

#[tokio::test(start_paused = true)]
async fn reconnect_delays_double_up_to_the_cap() {
    let transport = FakeTransport::failing_first(4);
    let conn = connection(&transport);

    conn.connect();
    settle().await;
    // Step the clock one second at a time so each attempt is stamped at
    // the instant its timer fired.
    for _ in 0..16 {
        tokio::time::advance(Duration::from_secs(1)).await;
        settle().await;
    }

    let times = transport.attempt_times();
    assert_eq!(times.len(), 5);
    let gaps: Vec<Duration> = times.windows(2).map(|pair| pair[1] - pair[0]).collect();
    assert_eq!(gaps[0], Duration::from_secs(1));
    assert_eq!(gaps[1], Duration::from_secs(2));
    assert_eq!(gaps[2], Duration::from_secs(4));
    assert_eq!(gaps[3], Duration::from_secs(8));
    assert_eq!(conn.state(), ConnectionState::Connected);
}

#[tokio::test(start_paused = true)]
async fn tracked_topics_replay_once_after_reconnect() {
    let transport = FakeTransport::default();
    let conn = connection(&transport);

    conn.connect();
    settle().await;
    let mut first = transport.link();
    first.send_auth_success();
    settle().await;
    conn.subscribe(Topic::quote(7));
    settle().await;

    first.send_close(1006);
    settle().await;
    tokio::time::advance(Duration::from_millis(1001)).await;
    settle().await;

    let mut second = transport.link();
    let frames = second.envelopes();
    assert_eq!(subscribes_of(&frames, &Topic::quote(7)), 1);
}

#[tokio::test(start_paused = true)]
async fn clean_close_does_not_reconnect() {
    let transport = FakeTransport::default();
    let conn = connection(&transport);

    conn.connect();
    settle().await;
    let link = transport.link();
    link.send_close(1000);
    settle().await;

    assert_eq!(conn.state(), ConnectionState::Disconnected);
    tokio::time::advance(Duration::from_secs(120)).await;
    settle().await;
    assert_eq!(transport.connect_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn disconnect_sends_close_and_stops() {
    let transport = FakeTransport::default();
    let conn = connection(&transport);

    conn.connect();
    settle().await;
    let mut link = transport.link();
    link.envelopes();

    conn.disconnect();
    settle().await;

    assert!(link.saw_close(1000));
    assert_eq!(conn.state(), ConnectionState::Disconnected);
    tokio::time::advance(Duration::from_secs(120)).await;
    settle().await;
    assert_eq!(transport.connect_count(), 1);
}

// =============================================================================
// Assembled stack
// =============================================================================

#[tokio::test(start_paused = true)]
async fn router_auto_subscribes_private_collections_after_auth() {
    let transport = FakeTransport::default();
    let core = core(&transport);

    core.start();
    settle().await;
    let mut link = transport.link();
    link.send_auth_success();
    settle().await;
    run_batch_window().await;

    let frames = link.envelopes();
    assert_eq!(subscribes_of(&frames, &Topic::positions()), 1);
    assert_eq!(subscribes_of(&frames, &Topic::orders()), 1);
    assert_eq!(subscribes_of(&frames, &Topic::portfolio()), 1);
}

#[tokio::test(start_paused = true)]
async fn reconnect_resubscribes_each_topic_exactly_once() {
    let transport = FakeTransport::default();
    let core = core(&transport);

    core.start();
    settle().await;
    let mut first = transport.link();
    first.send_auth_success();
    settle().await;
    run_batch_window().await;

    core.subscriptions().subscribe(Topic::quote(7));
    run_batch_window().await;
    first.envelopes();

    // Lose the socket; both the connection's replay and the subscription
    // manager's recovery want the same topics back, but each topic must
    // reach the new socket once, after the handshake frame.
    first.send_close(1006);
    settle().await;
    tokio::time::advance(Duration::from_millis(1001)).await;
    settle().await;

    let mut second = transport.link();
    second.send_auth_success();
    settle().await;
    run_batch_window().await;

    let frames = second.envelopes();
    assert_eq!(frames[0].topic, Topic::auth());
    assert_eq!(subscribes_of(&frames, &Topic::quote(7)), 1);
    assert_eq!(subscribes_of(&frames, &Topic::positions()), 1);
    assert_eq!(subscribes_of(&frames, &Topic::orders()), 1);
    assert_eq!(subscribes_of(&frames, &Topic::portfolio()), 1);
}

#[tokio::test(start_paused = true)]
async fn batching_coalesces_and_net_cancels() {
    let transport = FakeTransport::default();
    let core = core(&transport);

    core.start();
    settle().await;
    let mut link = transport.link();
    link.send_auth_success();
    settle().await;
    run_batch_window().await;
    link.envelopes();

    core.subscriptions().subscribe(Topic::quote(1));
    core.subscriptions().subscribe(Topic::quote(2));
    core.subscriptions().subscribe(Topic::quote(3));
    core.subscriptions().unsubscribe(&Topic::quote(3));
    run_batch_window().await;

    let frames = link.envelopes();
    assert_eq!(subscribes_of(&frames, &Topic::quote(1)), 1);
    assert_eq!(subscribes_of(&frames, &Topic::quote(2)), 1);
    assert_eq!(subscribes_of(&frames, &Topic::quote(3)), 0);
    assert!(!frames.iter().any(|f| f.kind == EnvelopeKind::Unsubscribe));
}

#[tokio::test(start_paused = true)]
async fn quote_updates_flow_into_alerts() {
    let transport = FakeTransport::default();
    let core = core(&transport);
    let fired = Arc::new(Mutex::new(Vec::new()));
    let _handle = {
        let fired = Arc::clone(&fired);
        core.alerts()
            .on_alert(move |event| fired.lock().push(event.clone()))
    };
    core.alerts()
        .create_alert(1001, AlertRule::PriceAbove { threshold: dec("100") });

    core.start();
    settle().await;
    let link = transport.link();
    link.send_auth_success();
    settle().await;

    link.send_envelope(&Envelope::data(
        Topic::quote(1001),
        json!({ "bid": "100.5", "ask": "101.5", "lastPrice": "101" }),
    ));
    settle().await;

    assert_eq!(
        core.quotes().get_quote(1001).unwrap().last_price,
        Some(dec("101"))
    );
    let fired = fired.lock();
    assert_eq!(fired.len(), 1);
    assert_eq!(fired[0].current_value, Some(dec("101")));
}

#[tokio::test(start_paused = true)]
async fn executed_order_yields_fill_with_order_fields() {
    let transport = FakeTransport::default();
    let core = core(&transport);
    let fills: Arc<Mutex<Vec<Fill>>> = Arc::new(Mutex::new(Vec::new()));
    let _handle = {
        let fills = Arc::clone(&fills);
        core.router().on_fill(move |fill| fills.lock().push(fill.clone()))
    };

    core.start();
    settle().await;
    let link = transport.link();
    link.send_auth_success();
    settle().await;
    run_batch_window().await;

    link.send_envelope(&Envelope::data(
        Topic::orders(),
        json!({
            "orderId": 42,
            "instrumentId": 1001,
            "positionId": 7,
            "side": "sell",
            "amount": "100",
            "rate": "1.10",
            "status": "executed",
            "executedRate": "1.099",
            "executedAt": "2026-08-24T12:00:00Z"
        }),
    ));
    settle().await;

    let fills = fills.lock();
    assert_eq!(fills.len(), 1);
    assert_eq!(fills[0].side, TradeSide::Sell);
    assert_eq!(fills[0].position_id, Some(7));
    assert_eq!(fills[0].rate, dec("1.099"));
}

#[tokio::test(start_paused = true)]
async fn staleness_alert_fires_after_quiet_period() {
    let transport = FakeTransport::default();
    let core = core(&transport);
    let fired = Arc::new(Mutex::new(0_u32));
    let _handle = {
        let fired = Arc::clone(&fired);
        core.alerts().on_alert(move |_| *fired.lock() += 1)
    };
    core.start();
    settle().await;
    let link = transport.link();
    link.send_auth_success();
    settle().await;

    // Feed one quote before arming the alert; an instrument with no
    // quote at all is stale by definition and would fire immediately.
    link.send_envelope(&Envelope::data(Topic::quote(1001), json!({ "bid": "1" })));
    settle().await;
    core.alerts().create_alert(
        1001,
        AlertRule::Stale {
            after: Duration::from_secs(30),
        },
    );

    tokio::time::advance(Duration::from_secs(29)).await;
    settle().await;
    assert_eq!(*fired.lock(), 0);

    tokio::time::advance(Duration::from_secs(5)).await;
    settle().await;
    assert_eq!(*fired.lock(), 1);
}

#[tokio::test(start_paused = true)]
async fn stop_freezes_all_activity() {
    let transport = FakeTransport::default();
    let core = core(&transport);
    let fired = Arc::new(Mutex::new(0_u32));
    let _handle = {
        let fired = Arc::clone(&fired);
        core.alerts().on_alert(move |_| *fired.lock() += 1)
    };
    core.alerts().create_alert(
        1001,
        AlertRule::Stale {
            after: Duration::from_secs(1),
        },
    );

    core.start();
    settle().await;
    let link = transport.link();
    link.send_auth_success();
    settle().await;

    core.stop();
    settle().await;
    drop(link);
    let fired_before_stop = *fired.lock();

    // Past the alert cooldown: a live engine would have fired again.
    tokio::time::advance(Duration::from_secs(400)).await;
    settle().await;

    assert_eq!(*fired.lock(), fired_before_stop);
    assert_eq!(transport.connect_count(), 1);
    assert_eq!(core.connection().state(), ConnectionState::Disconnected);
}
