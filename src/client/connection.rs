//! Connection lifecycle
//!
//! `ConnectionManager` owns the active transport, runs the STOMP handshake
//! and drives the reconnection loop. It is a plain state machine: every
//! transition happens inside [`connect`](ConnectionManager::connect),
//! [`disconnect`](ConnectionManager::disconnect) or one of the event
//! handlers, and time only enters through the injected [`Scheduler`].
//!
//! ```text
//! Disconnected ──connect──▶ Connecting ──CONNECTED──▶ Connected
//!      ▲                        │                        │ transport lost
//!      └─── fallback failed ────┘                        ▼
//!                              Connected ◀──CONNECTED── Reconnecting ◀─┐
//!                                                        │ failed      │
//!                                                        └─ retry ─────┘
//! any state ──disconnect──▶ Closed
//! ```
//!
//! Failure handling:
//! - the very first handshake of a client, if it went over the native
//!   transport, is retried exactly once over the fallback transport and never
//!   enters the reconnection loop;
//! - a session that was established and then dropped is retried on a fixed
//!   delay with no attempt limit until `disconnect()`.

use std::collections::BTreeMap;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

use super::event::TimerId;
use super::scheduler::Scheduler;
use crate::config::ConnectionSettings;
use crate::frame::{Command, Frame, decode};
use crate::transport::{Transport, TransportEvent, TransportFactory, TransportId, TransportKind};
use crate::utils::ConnectError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
    Closed,
}

impl ConnectionState {
    pub fn is_connected(self) -> bool {
        self == ConnectionState::Connected
    }
}

/// What the broker told us in its CONNECTED frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionInfo {
    pub version: Option<String>,
    pub server: Option<String>,
    pub heart_beat: Option<String>,
    pub kind: TransportKind,
    pub connected_at: DateTime<Utc>,
}

type ConnectReply = oneshot::Sender<Result<(), ConnectError>>;

/// Resolves once the handshake started by `connect()` succeeds or fails.
#[derive(Debug)]
pub struct ConnectFuture {
    inner: ConnectFutureInner,
}

#[derive(Debug)]
enum ConnectFutureInner {
    Ready(Option<Result<(), ConnectError>>),
    Pending(oneshot::Receiver<Result<(), ConnectError>>),
}

impl ConnectFuture {
    fn ready(result: Result<(), ConnectError>) -> Self {
        Self {
            inner: ConnectFutureInner::Ready(Some(result)),
        }
    }

    fn pending(rx: oneshot::Receiver<Result<(), ConnectError>>) -> Self {
        Self {
            inner: ConnectFutureInner::Pending(rx),
        }
    }

    /// Returns the outcome without waiting, or `None` while the handshake
    /// is still running.
    pub fn try_result(&mut self) -> Option<Result<(), ConnectError>> {
        match &mut self.inner {
            ConnectFutureInner::Ready(result) => result.take(),
            ConnectFutureInner::Pending(rx) => match rx.try_recv() {
                Ok(result) => Some(result),
                Err(oneshot::error::TryRecvError::Empty) => None,
                Err(oneshot::error::TryRecvError::Closed) => Some(Err(ConnectError::Closed)),
            },
        }
    }
}

impl Future for ConnectFuture {
    type Output = Result<(), ConnectError>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match &mut self.get_mut().inner {
            ConnectFutureInner::Ready(result) => {
                Poll::Ready(result.take().unwrap_or(Err(ConnectError::Closed)))
            }
            ConnectFutureInner::Pending(rx) => Pin::new(rx)
                .poll(cx)
                .map(|r| r.unwrap_or(Err(ConnectError::Closed))),
        }
    }
}

/// What a transport event meant for the layers above the connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionOutcome {
    /// A handshake completed. `resumed` is set when an earlier session was
    /// lost, so broker-side subscriptions must be restored.
    Established { resumed: bool },
    /// An established session dropped; reconnection is scheduled.
    Lost,
    /// A frame that arrived on the established session.
    Inbound(Frame),
}

struct Handshake {
    kind: TransportKind,
    reply: Option<ConnectReply>,
}

pub struct ConnectionManager {
    state: ConnectionState,
    factory: Box<dyn TransportFactory>,
    scheduler: Box<dyn Scheduler>,
    transport: Option<Box<dyn Transport>>,
    transport_id: TransportId,
    next_transport_id: u64,
    host: String,
    connect_headers: BTreeMap<String, String>,
    reconnect_delay: Duration,
    /// Sticky for the rest of the run once a fallback transport was used.
    prefer_fallback: bool,
    fallback_retry_used: bool,
    has_connected: bool,
    handshake: Option<Handshake>,
    reconnect_timer: Option<TimerId>,
    reconnect_attempts: u32,
    session: Option<SessionInfo>,
    closing: Option<JoinHandle<()>>,
}

impl ConnectionManager {
    pub fn new(
        factory: Box<dyn TransportFactory>,
        scheduler: Box<dyn Scheduler>,
        host: impl Into<String>,
        settings: &ConnectionSettings,
    ) -> Self {
        Self {
            state: ConnectionState::Disconnected,
            factory,
            scheduler,
            transport: None,
            transport_id: TransportId(0),
            next_transport_id: 0,
            host: host.into(),
            connect_headers: settings.connect_headers.clone(),
            reconnect_delay: Duration::from_millis(settings.reconnect_delay_ms),
            prefer_fallback: false,
            fallback_retry_used: false,
            has_connected: false,
            handshake: None,
            reconnect_timer: None,
            reconnect_attempts: 0,
            session: None,
            closing: None,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn is_connected(&self) -> bool {
        self.state.is_connected()
    }

    pub fn session(&self) -> Option<&SessionInfo> {
        self.session.as_ref()
    }

    /// Whether later attempts will go straight to the fallback transport.
    pub fn prefers_fallback(&self) -> bool {
        self.prefer_fallback
    }

    /// Reconnection attempts scheduled since the last established session.
    pub fn reconnect_attempts(&self) -> u32 {
        self.reconnect_attempts
    }

    /// Task flushing the transport closed by `disconnect()`, if it has one.
    pub fn take_closing_task(&mut self) -> Option<JoinHandle<()>> {
        self.closing.take()
    }

    pub fn pending_reconnect(&self) -> Option<TimerId> {
        self.reconnect_timer
    }

    /// Starts a handshake. Only one may run at a time; a call while one is
    /// in flight or a reconnect is pending resolves to
    /// [`ConnectError::AlreadyConnecting`].
    pub fn connect(&mut self, prefer_fallback: bool) -> ConnectFuture {
        match self.state {
            ConnectionState::Closed => return ConnectFuture::ready(Err(ConnectError::Closed)),
            ConnectionState::Connected => return ConnectFuture::ready(Ok(())),
            ConnectionState::Connecting | ConnectionState::Reconnecting => {
                tracing::debug!(state = ?self.state, "connect ignored, handshake already in progress");
                return ConnectFuture::ready(Err(ConnectError::AlreadyConnecting));
            }
            ConnectionState::Disconnected => {}
        }

        let (tx, rx) = oneshot::channel();
        self.state = ConnectionState::Connecting;
        let prefer_fallback = prefer_fallback || self.prefer_fallback;
        self.start_handshake(prefer_fallback, Some(tx));
        ConnectFuture::pending(rx)
    }

    /// Shuts the connection down for good and stops any pending reconnect.
    pub fn disconnect(&mut self) {
        if self.state == ConnectionState::Closed {
            return;
        }

        if let Some(timer) = self.reconnect_timer.take() {
            self.scheduler.cancel(timer);
        }
        if self.state == ConnectionState::Connected {
            self.write(&Frame::disconnect());
        }
        if let Some(handshake) = self.handshake.take() {
            if let Some(reply) = handshake.reply {
                let _ = reply.send(Err(ConnectError::Closed));
            }
        }
        if let Some(mut transport) = self.transport.take() {
            transport.close();
            self.closing = transport.closing_task();
        }
        self.session = None;
        self.state = ConnectionState::Closed;
        tracing::info!("disconnected");
    }

    /// Writes `frame` if the session is established. Returns `false` and
    /// drops the frame otherwise.
    pub fn send_frame(&mut self, frame: &Frame) -> bool {
        if self.state != ConnectionState::Connected {
            return false;
        }
        self.write(frame)
    }

    pub fn handle_transport_event(
        &mut self,
        id: TransportId,
        event: TransportEvent,
    ) -> Vec<ConnectionOutcome> {
        if id != self.transport_id || self.transport.is_none() {
            tracing::trace!(transport_id = %id, "ignoring event from stale transport");
            return Vec::new();
        }

        match event {
            TransportEvent::Open => {
                if self.handshake.is_some() {
                    let frame = Frame::connect(&self.host, &self.connect_headers);
                    if !self.write(&frame) {
                        self.fail_handshake("could not send CONNECT".to_string());
                    }
                } else {
                    tracing::debug!(transport_id = %id, "unexpected open event");
                }
                Vec::new()
            }
            TransportEvent::Message(text) => self.handle_message(&text),
            TransportEvent::Closed(reason) => self.handle_closed(reason),
        }
    }

    pub fn handle_timer(&mut self, id: TimerId) {
        if self.reconnect_timer != Some(id) {
            tracing::trace!(timer = %id, "ignoring cancelled timer");
            return;
        }
        self.reconnect_timer = None;

        if self.state != ConnectionState::Reconnecting || self.handshake.is_some() {
            return;
        }
        tracing::info!(attempt = self.reconnect_attempts, "reconnecting");
        self.start_handshake(self.prefer_fallback, None);
    }

    fn start_handshake(&mut self, prefer_fallback: bool, reply: Option<ConnectReply>) {
        self.close_transport();

        let id = TransportId(self.next_transport_id);
        self.next_transport_id += 1;

        let transport = self.factory.create(prefer_fallback, id);
        let kind = transport.kind();
        if kind == TransportKind::Fallback && !self.prefer_fallback {
            tracing::info!(transport_id = %id, "fallback transport in use for the rest of the session");
            self.prefer_fallback = true;
        }
        tracing::info!(transport_id = %id, %kind, host = %self.host, "connecting");

        self.transport = Some(transport);
        self.transport_id = id;
        self.handshake = Some(Handshake { kind, reply });
    }

    fn handle_message(&mut self, text: &str) -> Vec<ConnectionOutcome> {
        let frames = match decode(text) {
            Ok(frames) => frames,
            Err(e) => {
                tracing::warn!(transport_id = %self.transport_id, "dropping undecodable payload: {e}");
                return Vec::new();
            }
        };

        let mut outcomes = Vec::new();
        for frame in frames {
            match frame.command {
                Command::Connected if self.handshake.is_some() => {
                    outcomes.push(self.complete_handshake(&frame));
                }
                Command::Error if self.handshake.is_some() => {
                    let message = frame.get("message").unwrap_or("broker rejected CONNECT");
                    self.fail_handshake(message.to_string());
                    break;
                }
                Command::Error => {
                    tracing::error!(
                        message = frame.get("message").unwrap_or_default(),
                        body = %frame.body,
                        "broker reported an error"
                    );
                }
                _ if self.state == ConnectionState::Connected => {
                    outcomes.push(ConnectionOutcome::Inbound(frame));
                }
                command => {
                    tracing::debug!(%command, state = ?self.state, "ignoring frame outside a session");
                }
            }
        }
        outcomes
    }

    fn handle_closed(&mut self, reason: Option<String>) -> Vec<ConnectionOutcome> {
        let reason = reason.unwrap_or_else(|| "transport closed".to_string());

        if self.handshake.is_some() {
            self.fail_handshake(reason);
            return Vec::new();
        }
        if self.state != ConnectionState::Connected {
            return Vec::new();
        }

        tracing::warn!(transport_id = %self.transport_id, reason = %reason, "connection lost");
        self.transport = None;
        self.session = None;
        self.state = ConnectionState::Reconnecting;
        self.schedule_reconnect();
        vec![ConnectionOutcome::Lost]
    }

    fn complete_handshake(&mut self, frame: &Frame) -> ConnectionOutcome {
        let resumed = self.has_connected;
        let kind = self
            .handshake
            .take()
            .map(|handshake| {
                if let Some(reply) = handshake.reply {
                    let _ = reply.send(Ok(()));
                }
                handshake.kind
            })
            .unwrap_or(TransportKind::Native);

        let session = SessionInfo {
            version: frame.get("version").map(str::to_owned),
            server: frame.get("server").map(str::to_owned),
            heart_beat: frame.get("heart-beat").map(str::to_owned),
            kind,
            connected_at: Utc::now(),
        };
        tracing::info!(
            transport_id = %self.transport_id,
            %kind,
            version = session.version.as_deref().unwrap_or("unknown"),
            resumed,
            "connected"
        );

        self.state = ConnectionState::Connected;
        self.has_connected = true;
        self.reconnect_attempts = 0;
        self.session = Some(session);
        ConnectionOutcome::Established { resumed }
    }

    fn fail_handshake(&mut self, reason: String) {
        let Some(handshake) = self.handshake.take() else {
            return;
        };
        self.close_transport();

        if self.has_connected {
            tracing::warn!(reason = %reason, "reconnect attempt failed");
            self.state = ConnectionState::Reconnecting;
            self.schedule_reconnect();
            return;
        }

        if handshake.kind == TransportKind::Native && !self.fallback_retry_used {
            self.fallback_retry_used = true;
            tracing::warn!(reason = %reason, "first handshake failed, retrying over fallback transport");
            self.start_handshake(true, handshake.reply);
            return;
        }

        tracing::warn!(reason = %reason, "handshake failed");
        self.state = ConnectionState::Disconnected;
        if let Some(reply) = handshake.reply {
            let _ = reply.send(Err(ConnectError::HandshakeFailed(reason)));
        }
    }

    fn schedule_reconnect(&mut self) {
        if let Some(previous) = self.reconnect_timer.take() {
            self.scheduler.cancel(previous);
        }
        self.reconnect_attempts += 1;
        let timer = self.scheduler.schedule(self.reconnect_delay);
        tracing::info!(
            delay_ms = self.reconnect_delay.as_millis() as u64,
            attempt = self.reconnect_attempts,
            "reconnect scheduled"
        );
        self.reconnect_timer = Some(timer);
    }

    fn write(&mut self, frame: &Frame) -> bool {
        let Some(transport) = self.transport.as_mut() else {
            return false;
        };
        match transport.send(frame.encode()) {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!(transport_id = %self.transport_id, command = %frame.command, "write failed: {e}");
                false
            }
        }
    }

    fn close_transport(&mut self) {
        if let Some(mut transport) = self.transport.take() {
            transport.close();
        }
    }
}

impl fmt::Debug for ConnectionManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionManager")
            .field("state", &self.state)
            .field("transport_id", &self.transport_id)
            .field("prefer_fallback", &self.prefer_fallback)
            .field("has_connected", &self.has_connected)
            .field("reconnect_timer", &self.reconnect_timer)
            .field("reconnect_attempts", &self.reconnect_attempts)
            .finish_non_exhaustive()
    }
}
