use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde_json::{Value, json};

use super::connection::ConnectFuture;
use super::event::{ClientEvent, TimerId};
use super::registry::{DEFAULT_HANDLER_KEY, SubscriptionRegistry, noop_handler};
use super::scheduler::Scheduler;
use super::{ConnectionState, StompClient};
use crate::config::Settings;
use crate::frame::{Command, Frame, decode};
use crate::transport::{Transport, TransportEvent, TransportFactory, TransportId, TransportKind};
use crate::utils::{ConnectError, TransportError};

// ---- test doubles -------------------------------------------------------

#[derive(Debug, Default)]
struct Wire {
    created: Vec<(TransportId, TransportKind)>,
    sent: Vec<(TransportId, String)>,
    closed: Vec<TransportId>,
}

type SharedWire = Arc<Mutex<Wire>>;

struct FakeTransport {
    id: TransportId,
    kind: TransportKind,
    wire: SharedWire,
}

impl Transport for FakeTransport {
    fn kind(&self) -> TransportKind {
        self.kind
    }

    fn send(&mut self, text: String) -> Result<(), TransportError> {
        self.wire.lock().unwrap().sent.push((self.id, text));
        Ok(())
    }

    fn close(&mut self) {
        self.wire.lock().unwrap().closed.push(self.id);
    }
}

struct FakeFactory {
    wire: SharedWire,
    native_available: bool,
}

impl TransportFactory for FakeFactory {
    fn create(&mut self, prefer_fallback: bool, id: TransportId) -> Box<dyn Transport> {
        let kind = if prefer_fallback || !self.native_available {
            TransportKind::Fallback
        } else {
            TransportKind::Native
        };
        self.wire.lock().unwrap().created.push((id, kind));
        Box::new(FakeTransport {
            id,
            kind,
            wire: Arc::clone(&self.wire),
        })
    }
}

#[derive(Debug, Default)]
struct Timers {
    scheduled: Vec<(TimerId, Duration)>,
    cancelled: Vec<TimerId>,
}

struct ManualScheduler {
    timers: Arc<Mutex<Timers>>,
}

impl Scheduler for ManualScheduler {
    fn schedule(&mut self, delay: Duration) -> TimerId {
        let mut timers = self.timers.lock().unwrap();
        let id = TimerId(timers.scheduled.len() as u64);
        timers.scheduled.push((id, delay));
        id
    }

    fn cancel(&mut self, id: TimerId) {
        self.timers.lock().unwrap().cancelled.push(id);
    }
}

type Calls = Arc<Mutex<Vec<(String, Value)>>>;

fn recorder(calls: &Calls, label: &str) -> impl Fn(&Value) + Send + Sync + 'static {
    let calls = Arc::clone(calls);
    let label = label.to_string();
    move |payload: &Value| calls.lock().unwrap().push((label.clone(), payload.clone()))
}

fn labels(calls: &Calls) -> Vec<String> {
    calls.lock().unwrap().iter().map(|(l, _)| l.clone()).collect()
}

struct Harness {
    client: StompClient,
    wire: SharedWire,
    timers: Arc<Mutex<Timers>>,
}

impl Harness {
    fn new() -> Self {
        Self::build(Settings::default(), true)
    }

    fn build(settings: Settings, native_available: bool) -> Self {
        let wire = SharedWire::default();
        let timers = Arc::new(Mutex::new(Timers::default()));
        let client = StompClient::new(
            Box::new(FakeFactory {
                wire: Arc::clone(&wire),
                native_available,
            }),
            Box::new(ManualScheduler {
                timers: Arc::clone(&timers),
            }),
            &settings,
        );
        Self {
            client,
            wire,
            timers,
        }
    }

    fn current(&self) -> TransportId {
        self.wire.lock().unwrap().created.last().expect("no transport").0
    }

    fn created(&self) -> Vec<(TransportId, TransportKind)> {
        self.wire.lock().unwrap().created.clone()
    }

    fn event(&mut self, id: TransportId, event: TransportEvent) {
        self.client.handle_event(ClientEvent::transport(id, event));
    }

    fn open(&mut self) {
        let id = self.current();
        self.event(id, TransportEvent::Open);
    }

    fn deliver(&mut self, text: &str) {
        let id = self.current();
        self.event(id, TransportEvent::Message(text.to_string()));
    }

    fn accept_handshake(&mut self) {
        self.open();
        self.deliver("CONNECTED\nversion:1.2\nserver:stub\n\n\0");
    }

    fn drop_transport(&mut self) {
        let id = self.current();
        self.event(id, TransportEvent::Closed(Some("connection reset".to_string())));
    }

    fn connect(&mut self) {
        let mut pending = self.client.connect(false);
        self.accept_handshake();
        assert_eq!(pending.try_result(), Some(Ok(())));
    }

    fn message(&mut self, destination: &str, body: &str) {
        self.deliver(&format!(
            "MESSAGE\ndestination:{destination}\nsubscription:sub-x\nmessage-id:1\n\n{body}\0"
        ));
    }

    fn frames(&self) -> Vec<(TransportId, Frame)> {
        self.wire
            .lock()
            .unwrap()
            .sent
            .iter()
            .map(|(id, text)| (*id, decode(text).unwrap().remove(0)))
            .collect()
    }

    fn frames_of(&self, command: Command) -> Vec<Frame> {
        self.frames()
            .into_iter()
            .filter(|(_, f)| f.command == command)
            .map(|(_, f)| f)
            .collect()
    }

    fn scheduled(&self) -> Vec<(TimerId, Duration)> {
        self.timers.lock().unwrap().scheduled.clone()
    }

    fn cancelled(&self) -> Vec<TimerId> {
        self.timers.lock().unwrap().cancelled.clone()
    }

    fn fire_last_timer(&mut self) {
        let (id, _) = *self.scheduled().last().expect("no timer scheduled");
        self.client.handle_event(ClientEvent::ReconnectTimer(id));
    }

    fn reconnect(&mut self) {
        self.drop_transport();
        self.fire_last_timer();
        self.accept_handshake();
    }
}

fn pending(future: &mut ConnectFuture) -> bool {
    future.try_result().is_none()
}

// ---- registry -----------------------------------------------------------

#[test]
fn test_registry_open_registers_default_handler() {
    let mut registry = SubscriptionRegistry::new();
    let id = registry.open("/topic/a", noop_handler());
    assert_eq!(id.as_deref(), Some("sub-0"));
    assert!(registry.open("/topic/a", noop_handler()).is_none());

    let subscription = registry.get("/topic/a").unwrap();
    assert_eq!(subscription.broker_id(), Some("sub-0"));
    assert_eq!(
        subscription.handler_keys().collect::<Vec<_>>(),
        vec![DEFAULT_HANDLER_KEY]
    );
}

#[test]
fn test_registry_first_registrant_keeps_key() {
    let mut registry = SubscriptionRegistry::new();
    registry.open("/topic/a", noop_handler());
    assert!(registry.insert_handler("/topic/a", "k", noop_handler()));
    assert!(!registry.insert_handler("/topic/a", "k", noop_handler()));
    assert!(!registry.insert_handler("/topic/missing", "k", noop_handler()));
    assert_eq!(registry.get("/topic/a").unwrap().len(), 2);
}

#[test]
fn test_registry_remove_handler_reports_remaining() {
    let mut registry = SubscriptionRegistry::new();
    registry.open("/topic/a", noop_handler());
    registry.insert_handler("/topic/a", "k", noop_handler());

    assert_eq!(registry.remove_handler("/topic/a", "nope"), None);
    assert_eq!(registry.remove_handler("/topic/a", DEFAULT_HANDLER_KEY), Some(1));
    assert_eq!(registry.remove_handler("/topic/a", "k"), Some(0));
    assert_eq!(registry.remove_handler("/topic/b", "k"), None);
}

#[test]
fn test_registry_rebind_keeps_order_and_handlers() {
    let mut registry = SubscriptionRegistry::new();
    registry.open("/topic/b", noop_handler());
    registry.open("/topic/a", noop_handler());
    registry.insert_handler("/topic/b", "audit", noop_handler());

    registry.invalidate_broker_ids();
    assert_eq!(registry.get("/topic/b").unwrap().broker_id(), None);

    let rebound = registry.rebind_all();
    assert_eq!(
        rebound,
        vec![
            ("sub-2".to_string(), "/topic/b".to_string()),
            ("sub-3".to_string(), "/topic/a".to_string()),
        ]
    );
    assert_eq!(
        registry.get("/topic/b").unwrap().handler_keys().collect::<Vec<_>>(),
        vec![DEFAULT_HANDLER_KEY, "audit"]
    );
}

// ---- connection ---------------------------------------------------------

#[test]
fn test_send_before_connect_is_dropped() {
    let mut h = Harness::new();
    assert!(!h.client.send("/topic/z", "body"));
    assert!(h.frames_of(Command::Send).is_empty());
    assert!(h.created().is_empty());
}

#[test]
fn test_connect_sends_connect_frame_with_default_headers() {
    let mut settings = Settings::default();
    settings.transport.hostname = "ambari.local".to_string();
    settings
        .connection
        .connect_headers
        .insert("login".to_string(), "admin".to_string());
    let mut h = Harness::build(settings, true);

    let mut future = h.client.connect(false);
    assert_eq!(h.client.state(), ConnectionState::Connecting);
    assert!(pending(&mut future));

    h.open();
    let connect = h.frames_of(Command::Connect);
    assert_eq!(connect.len(), 1);
    assert_eq!(connect[0].get("host"), Some("ambari.local"));
    assert_eq!(connect[0].get("login"), Some("admin"));
    assert_eq!(connect[0].get("accept-version"), Some("1.2,1.1,1.0"));

    h.deliver("CONNECTED\nversion:1.2\nserver:stub\n\n\0");
    assert_eq!(future.try_result(), Some(Ok(())));
    assert_eq!(h.client.state(), ConnectionState::Connected);

    let session = h.client.session().unwrap();
    assert_eq!(session.version.as_deref(), Some("1.2"));
    assert_eq!(session.server.as_deref(), Some("stub"));
    assert_eq!(session.kind, TransportKind::Native);
}

#[test]
fn test_second_connect_while_connecting_is_rejected() {
    let mut h = Harness::new();
    let mut first = h.client.connect(false);
    let mut second = h.client.connect(false);

    assert_eq!(second.try_result(), Some(Err(ConnectError::AlreadyConnecting)));
    assert_eq!(h.created().len(), 1);

    h.accept_handshake();
    assert_eq!(first.try_result(), Some(Ok(())));
    assert_eq!(h.client.connect(false).try_result(), Some(Ok(())));
    assert_eq!(h.created().len(), 1);
}

#[test]
fn test_first_handshake_failure_retries_once_over_fallback() {
    let mut h = Harness::new();
    let mut future = h.client.connect(false);
    h.drop_transport();

    let created = h.created();
    assert_eq!(created.len(), 2);
    assert_eq!(created[0].1, TransportKind::Native);
    assert_eq!(created[1].1, TransportKind::Fallback);
    assert_eq!(h.client.state(), ConnectionState::Connecting);
    assert!(pending(&mut future));

    h.drop_transport();
    assert_eq!(
        future.try_result(),
        Some(Err(ConnectError::HandshakeFailed("connection reset".to_string())))
    );
    assert_eq!(h.client.state(), ConnectionState::Disconnected);
    assert_eq!(h.created().len(), 2);
    assert!(h.scheduled().is_empty());
}

#[test]
fn test_fallback_retry_success_is_sticky() {
    let mut h = Harness::new();
    let mut future = h.client.connect(false);
    h.drop_transport();
    h.accept_handshake();

    assert_eq!(future.try_result(), Some(Ok(())));
    assert!(h.client.connection().prefers_fallback());
    assert_eq!(h.client.session().unwrap().kind, TransportKind::Fallback);

    h.reconnect();
    assert_eq!(h.created().last().unwrap().1, TransportKind::Fallback);
    assert!(h.client.is_connected());
}

#[test]
fn test_error_frame_fails_handshake() {
    let mut h = Harness::new();
    let mut future = h.client.connect(false);
    h.open();
    h.deliver("ERROR\nmessage:bad credentials\n\n\0");
    assert_eq!(h.created().len(), 2);

    h.open();
    h.deliver("ERROR\nmessage:bad credentials\n\n\0");
    assert_eq!(
        future.try_result(),
        Some(Err(ConnectError::HandshakeFailed("bad credentials".to_string())))
    );
}

#[test]
fn test_native_unavailable_selects_fallback_without_error() {
    let mut h = Harness::build(Settings::default(), false);
    h.connect();
    assert_eq!(h.created(), vec![(TransportId(0), TransportKind::Fallback)]);
    assert!(h.client.connection().prefers_fallback());
}

#[test]
fn test_fallback_first_attempt_failure_does_not_retry() {
    let mut h = Harness::new();
    let mut future = h.client.connect(true);
    h.drop_transport();
    assert!(matches!(
        future.try_result(),
        Some(Err(ConnectError::HandshakeFailed(_)))
    ));
    assert_eq!(h.created().len(), 1);
}

#[test]
fn test_stale_transport_events_are_ignored() {
    let mut h = Harness::new();
    let mut future = h.client.connect(false);
    let stale = h.current();
    h.drop_transport();

    h.event(stale, TransportEvent::Open);
    h.event(
        stale,
        TransportEvent::Message("CONNECTED\nversion:1.2\n\n\0".to_string()),
    );
    assert!(pending(&mut future));
    assert!(h.frames_of(Command::Connect).is_empty());
    assert_eq!(h.client.state(), ConnectionState::Connecting);
}

#[test]
fn test_send_emits_frame_when_connected() {
    let mut h = Harness::new();
    h.connect();

    let mut headers = std::collections::BTreeMap::new();
    headers.insert("content-type".to_string(), "application/json".to_string());
    assert!(h.client.send_with_headers("/app/ping", "{\"p\":1}", &headers));

    let sends = h.frames_of(Command::Send);
    assert_eq!(sends.len(), 1);
    assert_eq!(sends[0].destination(), Some("/app/ping"));
    assert_eq!(sends[0].get("content-type"), Some("application/json"));
    assert_eq!(sends[0].body, "{\"p\":1}");
}

#[test]
fn test_send_while_reconnecting_is_dropped() {
    let mut h = Harness::new();
    h.connect();
    h.drop_transport();
    assert!(!h.client.send("/app/ping", "{}"));
    assert!(h.frames_of(Command::Send).is_empty());
}

// ---- subscriptions ------------------------------------------------------

#[test]
fn test_subscribe_requires_connection() {
    let mut h = Harness::new();
    assert!(h.client.subscribe("/topic/x", |_| {}).is_none());
    assert!(h.client.registry().is_empty());
}

#[test]
fn test_subscribe_twice_emits_one_subscribe() {
    let mut h = Harness::new();
    h.connect();
    let calls = Calls::default();

    let first = h.client.subscribe("/topic/x", recorder(&calls, "h1")).unwrap();
    let second = h.client.subscribe("/topic/x", recorder(&calls, "h2")).unwrap();
    assert_eq!(first.destination, "/topic/x");
    assert_eq!(second.handlers.len(), 1);

    let subscribes = h.frames_of(Command::Subscribe);
    assert_eq!(subscribes.len(), 1);
    assert_eq!(subscribes[0].destination(), Some("/topic/x"));
    assert_eq!(subscribes[0].get("id"), Some("sub-0"));

    h.message("/topic/x", "1");
    assert_eq!(labels(&calls), vec!["h1"]);
}

#[test]
fn test_dispatch_follows_insertion_order() {
    let mut h = Harness::new();
    h.connect();
    let calls = Calls::default();

    h.client.subscribe("/topic/x", recorder(&calls, "h1"));
    assert!(h.client.add_handler("/topic/x", "audit", recorder(&calls, "h2")));
    h.message("/topic/x", "{\"a\":1}");

    let calls = calls.lock().unwrap().clone();
    assert_eq!(
        calls,
        vec![
            ("h1".to_string(), json!({"a": 1})),
            ("h2".to_string(), json!({"a": 1})),
        ]
    );
}

#[test]
fn test_duplicate_handler_key_keeps_first() {
    let mut h = Harness::new();
    h.connect();
    let calls = Calls::default();

    assert!(h.client.add_handler("/topic/d", "k", recorder(&calls, "h1")));
    assert!(!h.client.add_handler("/topic/d", "k", recorder(&calls, "h2")));
    h.message("/topic/d", "true");

    assert_eq!(labels(&calls), vec!["h1"]);
    assert_eq!(h.frames_of(Command::Subscribe).len(), 1);
}

#[test]
fn test_add_handler_subscribes_with_noop_default() {
    let mut h = Harness::new();
    h.connect();
    assert!(h.client.add_handler("/topic/n", "k1", |_| {}));

    let handle = h.client.subscription("/topic/n").unwrap();
    assert_eq!(
        handle.handlers.keys().map(String::as_str).collect::<Vec<_>>(),
        vec![DEFAULT_HANDLER_KEY, "k1"]
    );
    assert_eq!(h.frames_of(Command::Subscribe).len(), 1);
}

#[test]
fn test_add_handler_while_disconnected_is_ignored() {
    let mut h = Harness::new();
    assert!(!h.client.add_handler("/topic/n", "k1", |_| {}));
    assert!(h.client.registry().is_empty());
}

#[test]
fn test_removing_all_handlers_unsubscribes_once() {
    let mut h = Harness::new();
    h.connect();

    h.client.add_handler("/topic/r", "k1", |_| {});
    h.client.add_handler("/topic/r", "k2", |_| {});
    h.client.remove_handler("/topic/r", "k1");
    h.client.remove_handler("/topic/r", "k2");
    assert!(h.frames_of(Command::Unsubscribe).is_empty());

    h.client.remove_handler("/topic/r", DEFAULT_HANDLER_KEY);
    h.client.remove_handler("/topic/r", DEFAULT_HANDLER_KEY);

    let unsubscribes = h.frames_of(Command::Unsubscribe);
    assert_eq!(unsubscribes.len(), 1);
    assert_eq!(unsubscribes[0].get("id"), Some("sub-0"));
    assert!(!h.client.registry().contains("/topic/r"));
}

#[test]
fn test_unsubscribe_reports_presence() {
    let mut h = Harness::new();
    h.connect();
    assert!(!h.client.unsubscribe("/topic/none"));

    h.client.subscribe("/topic/u", |_| {});
    assert!(h.client.unsubscribe("/topic/u"));
    assert!(!h.client.unsubscribe("/topic/u"));
    assert_eq!(h.frames_of(Command::Unsubscribe).len(), 1);
}

#[test]
fn test_messages_without_listener_or_json_are_discarded() {
    let mut h = Harness::new();
    h.connect();
    let calls = Calls::default();
    h.client.subscribe("/topic/x", recorder(&calls, "h1"));

    h.message("/topic/other", "{}");
    h.message("/topic/x", "not json");
    assert!(labels(&calls).is_empty());
    assert_eq!(h.client.dispatcher().discarded(), 2);

    h.message("/topic/x", "[1,2]");
    assert_eq!(labels(&calls), vec!["h1"]);
    assert_eq!(h.client.dispatcher().delivered(), 1);
}

// ---- reconnection -------------------------------------------------------

#[test]
fn test_drop_schedules_fixed_delay_reconnect() {
    let mut h = Harness::new();
    h.connect();
    h.drop_transport();

    assert_eq!(h.client.state(), ConnectionState::Reconnecting);
    assert_eq!(h.scheduled(), vec![(TimerId(0), Duration::from_millis(6000))]);
    assert_eq!(h.created().len(), 1);

    h.fire_last_timer();
    assert_eq!(h.created().len(), 2);
    assert_eq!(h.created()[1].1, TransportKind::Native);
    assert_eq!(h.client.state(), ConnectionState::Reconnecting);
}

#[test]
fn test_failed_reconnect_reschedules_without_limit() {
    let mut h = Harness::new();
    h.connect();
    h.drop_transport();

    for attempt in 1..=5 {
        h.fire_last_timer();
        h.drop_transport();
        assert_eq!(h.client.state(), ConnectionState::Reconnecting);
        assert_eq!(h.scheduled().len(), attempt + 1);
    }
    assert!(h.scheduled().iter().all(|(_, d)| *d == Duration::from_millis(6000)));
    assert!(h.created().iter().all(|(_, kind)| *kind == TransportKind::Native));

    h.fire_last_timer();
    h.accept_handshake();
    assert!(h.client.is_connected());
    assert_eq!(h.client.connection().reconnect_attempts(), 0);
}

#[test]
fn test_connect_while_reconnecting_is_rejected() {
    let mut h = Harness::new();
    h.connect();
    h.drop_transport();
    assert_eq!(
        h.client.connect(false).try_result(),
        Some(Err(ConnectError::AlreadyConnecting))
    );
    assert_eq!(h.created().len(), 1);
}

#[test]
fn test_reconnect_restores_subscription() {
    let mut h = Harness::new();
    h.connect();
    let calls = Calls::default();
    h.client.subscribe("/topic/y", recorder(&calls, "h1"));

    h.reconnect();
    let new_transport = h.current();
    let resubscribes: Vec<Frame> = h
        .frames()
        .into_iter()
        .filter(|(id, f)| *id == new_transport && f.command == Command::Subscribe)
        .map(|(_, f)| f)
        .collect();
    assert_eq!(resubscribes.len(), 1);
    assert_eq!(resubscribes[0].destination(), Some("/topic/y"));
    assert_eq!(resubscribes[0].get("id"), Some("sub-1"));

    h.message("/topic/y", "{\"v\":2}");
    assert_eq!(labels(&calls), vec!["h1"]);
}

#[test]
fn test_reconnect_restores_every_handler_in_order() {
    let mut h = Harness::new();
    h.connect();
    let calls = Calls::default();

    h.client.add_handler("/topic/d1", "k1", recorder(&calls, "k1"));
    h.client.add_handler("/topic/d1", "k2", recorder(&calls, "k2"));
    h.client.subscribe("/topic/d2", recorder(&calls, "d2-default"));

    h.reconnect();
    let new_transport = h.current();
    let destinations: Vec<String> = h
        .frames()
        .into_iter()
        .filter(|(id, f)| *id == new_transport && f.command == Command::Subscribe)
        .filter_map(|(_, f)| f.destination().map(str::to_owned))
        .collect();
    assert_eq!(destinations, vec!["/topic/d1", "/topic/d2"]);

    h.message("/topic/d1", "1");
    h.message("/topic/d2", "2");
    assert_eq!(labels(&calls), vec!["k1", "k2", "d2-default"]);
}

#[test]
fn test_handler_removed_while_reconnecting_is_not_restored() {
    let mut h = Harness::new();
    h.connect();
    h.client.subscribe("/topic/gone", |_| {});
    h.client.subscribe("/topic/kept", |_| {});

    h.drop_transport();
    h.client.remove_handler("/topic/gone", DEFAULT_HANDLER_KEY);
    assert!(h.frames_of(Command::Unsubscribe).is_empty());
    assert!(!h.client.registry().contains("/topic/gone"));

    h.fire_last_timer();
    h.accept_handshake();
    let new_transport = h.current();
    let restored: Vec<String> = h
        .frames()
        .into_iter()
        .filter(|(id, f)| *id == new_transport && f.command == Command::Subscribe)
        .filter_map(|(_, f)| f.destination().map(str::to_owned))
        .collect();
    assert_eq!(restored, vec!["/topic/kept"]);
}

#[test]
fn test_disconnect_cancels_pending_reconnect() {
    let mut h = Harness::new();
    h.connect();
    h.drop_transport();
    let (timer, _) = h.scheduled()[0];

    h.client.disconnect();
    assert_eq!(h.client.state(), ConnectionState::Closed);
    assert_eq!(h.cancelled(), vec![timer]);

    // A timer that raced the cancellation must not reconnect.
    h.client.handle_event(ClientEvent::ReconnectTimer(timer));
    assert_eq!(h.created().len(), 1);
    assert_eq!(h.client.state(), ConnectionState::Closed);
}

#[test]
fn test_disconnect_sends_disconnect_and_closes() {
    let mut h = Harness::new();
    h.connect();
    let id = h.current();

    h.client.disconnect();
    assert_eq!(h.frames_of(Command::Disconnect).len(), 1);
    assert_eq!(h.wire.lock().unwrap().closed, vec![id]);
    assert_eq!(
        h.client.connect(false).try_result(),
        Some(Err(ConnectError::Closed))
    );
    assert!(!h.client.send("/app/x", "{}"));
}

#[test]
fn test_disconnect_rejects_pending_connect() {
    let mut h = Harness::new();
    let mut future = h.client.connect(false);
    h.client.disconnect();
    assert_eq!(future.try_result(), Some(Err(ConnectError::Closed)));
}

#[test]
fn test_clients_do_not_share_state() {
    let mut a = Harness::new();
    let mut b = Harness::new();
    a.connect();
    b.connect();

    a.client.subscribe("/topic/shared", |_| {});
    assert!(a.client.registry().contains("/topic/shared"));
    assert!(b.client.registry().is_empty());
    assert!(b.frames_of(Command::Subscribe).is_empty());
}

#[tokio::test]
async fn test_connect_future_resolves_when_awaited() {
    let mut h = Harness::new();
    let future = h.client.connect(false);
    h.accept_handshake();
    assert_eq!(future.await, Ok(()));
}

#[test]
fn test_connected_hook_runs_after_each_handshake() {
    let mut h = Harness::new();
    let seen: Arc<Mutex<Vec<(TransportKind, bool)>>> = Arc::default();
    let sink = Arc::clone(&seen);
    h.client
        .on_connected(move |session, resumed| sink.lock().unwrap().push((session.kind, resumed)));

    h.connect();
    h.client.subscribe("/topic/h", |_| {});
    h.reconnect();

    assert_eq!(
        *seen.lock().unwrap(),
        vec![(TransportKind::Native, false), (TransportKind::Native, true)]
    );
    // Subscriptions are restored before the hook runs.
    assert_eq!(h.frames_of(Command::Subscribe).len(), 2);
}

#[test]
fn test_panicking_handler_does_not_stop_dispatch() {
    let mut h = Harness::new();
    h.connect();
    let calls = Calls::default();

    h.client.subscribe("/topic/bad", |_| panic!("handler failure"));
    h.client.add_handler("/topic/bad", "after", recorder(&calls, "after"));
    h.client.subscribe("/topic/good", recorder(&calls, "good"));

    h.message("/topic/bad", "1");
    h.message("/topic/good", "2");
    // Siblings on the failing message are skipped, other messages are not.
    assert_eq!(labels(&calls), vec!["good"]);

    h.drop_transport();
    assert_eq!(h.client.state(), ConnectionState::Reconnecting);
    assert_eq!(h.scheduled().len(), 1);
}

#[test]
fn test_process_event_defers_handlers() {
    let mut h = Harness::new();
    h.connect();
    let calls = Calls::default();
    h.client.subscribe("/topic/later", recorder(&calls, "h1"));

    let id = h.current();
    let deliveries = h.client.process_event(ClientEvent::transport(
        id,
        TransportEvent::Message(
            "MESSAGE\ndestination:/topic/later\nsubscription:sub-0\n\n{\"k\":true}\0".to_string(),
        ),
    ));
    assert!(labels(&calls).is_empty());
    assert_eq!(deliveries.len(), 1);
    assert_eq!(deliveries[0].destination(), "/topic/later");
    assert_eq!(deliveries[0].payload(), &json!({"k": true}));

    // The handler may now use the client freely.
    assert!(h.client.unsubscribe("/topic/later"));
    let completed: usize = deliveries.into_iter().map(|d| d.run()).sum();
    assert_eq!(completed, 1);
    assert_eq!(labels(&calls), vec!["h1"]);
}

#[test]
fn test_disconnect_keeps_no_closing_task_for_plain_transports() {
    let mut h = Harness::new();
    h.connect();
    h.client.disconnect();
    assert!(h.client.take_closing_task().is_none());
}
