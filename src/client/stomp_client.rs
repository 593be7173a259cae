//! Public client API
//!
//! `StompClient` ties the connection, the subscription registry and the
//! dispatcher together. It never blocks and never spawns: transports and
//! timers report back through [`ClientEvent`]s that must be fed to
//! [`StompClient::handle_event`] one at a time (see [`Session`] for the
//! tokio driver).
//!
//! [`Session`]: super::session::Session

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use serde_json::Value;
use tokio::task::JoinHandle;

use super::connection::{
    ConnectFuture, ConnectionManager, ConnectionOutcome, ConnectionState, SessionInfo,
};
use super::dispatcher::{Delivery, MessageDispatcher};
use super::event::ClientEvent;
use super::registry::{Handler, SubscriptionHandle, SubscriptionRegistry, noop_handler};
use super::scheduler::Scheduler;
use crate::config::Settings;
use crate::frame::{Command, Frame};
use crate::transport::TransportFactory;

/// Called after every completed handshake with the new session and whether
/// it replaced one that was lost.
pub type ConnectedHook = Box<dyn Fn(&SessionInfo, bool) + Send>;

pub struct StompClient {
    connection: ConnectionManager,
    registry: SubscriptionRegistry,
    dispatcher: MessageDispatcher,
    on_connected: Option<ConnectedHook>,
}

impl StompClient {
    pub fn new(
        factory: Box<dyn TransportFactory>,
        scheduler: Box<dyn Scheduler>,
        settings: &Settings,
    ) -> Self {
        Self {
            connection: ConnectionManager::new(
                factory,
                scheduler,
                settings.transport.hostname.clone(),
                &settings.connection,
            ),
            registry: SubscriptionRegistry::new(),
            dispatcher: MessageDispatcher::new(),
            on_connected: None,
        }
    }

    /// Installs the hook run after each handshake, replacing any earlier one.
    /// It runs once restored subscriptions have been re-issued.
    pub fn on_connected<F>(&mut self, hook: F)
    where
        F: Fn(&SessionInfo, bool) + Send + 'static,
    {
        self.on_connected = Some(Box::new(hook));
    }

    pub fn connect(&mut self, prefer_fallback: bool) -> ConnectFuture {
        self.connection.connect(prefer_fallback)
    }

    pub fn disconnect(&mut self) {
        self.connection.disconnect();
        self.registry.invalidate_broker_ids();
    }

    pub fn send(&mut self, destination: &str, body: &str) -> bool {
        self.send_with_headers(destination, body, &BTreeMap::new())
    }

    /// Sends a SEND frame. Returns `false`, and sends nothing, unless the
    /// session is established. Nothing is queued for later.
    pub fn send_with_headers(
        &mut self,
        destination: &str,
        body: &str,
        headers: &BTreeMap<String, String>,
    ) -> bool {
        if !self.connection.is_connected() {
            tracing::debug!(destination, "send dropped, not connected");
            return false;
        }
        self.connection
            .send_frame(&Frame::send(destination, body, headers))
    }

    /// Registers `handler` under the default key, subscribing at the broker
    /// if this is the first interest in `destination`. Returns `None` when
    /// not connected.
    pub fn subscribe<F>(&mut self, destination: &str, handler: F) -> Option<SubscriptionHandle>
    where
        F: Fn(&Value) + Send + Sync + 'static,
    {
        self.subscribe_handler(destination, Arc::new(handler))
    }

    /// Attaches `handler` to `destination` under `key`, subscribing first if
    /// needed. A key that is already taken keeps its first handler.
    ///
    /// Returns `true` when the handler was added.
    pub fn add_handler<F>(&mut self, destination: &str, key: &str, handler: F) -> bool
    where
        F: Fn(&Value) + Send + Sync + 'static,
    {
        if !self.registry.contains(destination)
            && self.subscribe_handler(destination, noop_handler()).is_none()
        {
            tracing::warn!(destination, key, "cannot add handler while not connected");
            return false;
        }

        if !self.registry.insert_handler(destination, key, Arc::new(handler)) {
            tracing::error!(destination, key, "handler key already registered, ignoring");
            return false;
        }
        tracing::debug!(destination, key, "handler added");
        true
    }

    /// Detaches one handler; the last one out unsubscribes the destination.
    pub fn remove_handler(&mut self, destination: &str, key: &str) {
        match self.registry.remove_handler(destination, key) {
            Some(0) => {
                self.unsubscribe(destination);
            }
            Some(remaining) => {
                tracing::debug!(destination, key, remaining, "handler removed");
            }
            None => {
                tracing::debug!(destination, key, "no such handler");
            }
        }
    }

    /// Drops every handler of `destination` and tells the broker. Returns
    /// `false` if the destination was not subscribed.
    pub fn unsubscribe(&mut self, destination: &str) -> bool {
        let Some(subscription) = self.registry.remove(destination) else {
            return false;
        };

        if let Some(id) = subscription.broker_id() {
            self.connection
                .send_frame(&Frame::unsubscribe(id, destination));
        }
        tracing::info!(destination, "unsubscribed");
        true
    }

    /// Applies one transport or timer event, calling message handlers
    /// before returning.
    pub fn handle_event(&mut self, event: ClientEvent) {
        for delivery in self.process_event(event) {
            delivery.run();
        }
    }

    /// Applies one event but hands inbound messages back instead of calling
    /// the handlers, so the caller can run them once it no longer holds the
    /// client.
    pub fn process_event(&mut self, event: ClientEvent) -> Vec<Delivery> {
        let mut deliveries = Vec::new();
        match event {
            ClientEvent::Transport { id, event } => {
                for outcome in self.connection.handle_transport_event(id, event) {
                    if let Some(delivery) = self.apply(outcome) {
                        deliveries.push(delivery);
                    }
                }
            }
            ClientEvent::ReconnectTimer(id) => self.connection.handle_timer(id),
        }
        deliveries
    }

    /// Task still flushing the transport closed by `disconnect()`, if any.
    pub fn take_closing_task(&mut self) -> Option<JoinHandle<()>> {
        self.connection.take_closing_task()
    }

    pub fn state(&self) -> ConnectionState {
        self.connection.state()
    }

    pub fn is_connected(&self) -> bool {
        self.connection.is_connected()
    }

    pub fn session(&self) -> Option<&SessionInfo> {
        self.connection.session()
    }

    pub fn connection(&self) -> &ConnectionManager {
        &self.connection
    }

    pub fn registry(&self) -> &SubscriptionRegistry {
        &self.registry
    }

    pub fn dispatcher(&self) -> &MessageDispatcher {
        &self.dispatcher
    }

    pub fn subscription(&self, destination: &str) -> Option<SubscriptionHandle> {
        self.registry.handle(destination)
    }

    fn subscribe_handler(
        &mut self,
        destination: &str,
        handler: Handler,
    ) -> Option<SubscriptionHandle> {
        if !self.connection.is_connected() {
            tracing::debug!(destination, "subscribe ignored, not connected");
            return None;
        }

        match self.registry.open(destination, handler) {
            Some(id) => {
                self.connection
                    .send_frame(&Frame::subscribe(&id, destination));
                tracing::info!(destination, subscription_id = %id, "subscribed");
            }
            None => {
                tracing::debug!(destination, "already subscribed");
            }
        }
        self.registry.handle(destination)
    }

    fn apply(&mut self, outcome: ConnectionOutcome) -> Option<Delivery> {
        match outcome {
            ConnectionOutcome::Established { resumed } => {
                if resumed {
                    self.restore_subscriptions();
                }
                if let (Some(hook), Some(session)) =
                    (self.on_connected.as_ref(), self.connection.session())
                {
                    hook(session, resumed);
                }
                None
            }
            ConnectionOutcome::Lost => {
                self.registry.invalidate_broker_ids();
                None
            }
            ConnectionOutcome::Inbound(frame) => match frame.command {
                Command::Message => self.dispatcher.prepare(&self.registry, &frame),
                Command::Receipt => {
                    tracing::debug!(receipt = frame.get("receipt-id").unwrap_or_default(), "receipt");
                    None
                }
                command => {
                    tracing::debug!(%command, "ignoring unexpected frame");
                    None
                }
            },
        }
    }

    /// Re-issues SUBSCRIBE for every retained destination. Handler maps were
    /// never cleared, so every key comes back in its original order without
    /// going through duplicate-key checks again.
    fn restore_subscriptions(&mut self) {
        let rebound = self.registry.rebind_all();
        for (id, destination) in &rebound {
            self.connection
                .send_frame(&Frame::subscribe(id, destination));
        }
        tracing::info!(count = rebound.len(), "subscriptions restored");
    }
}

impl fmt::Debug for StompClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StompClient")
            .field("connection", &self.connection)
            .field("registry", &self.registry)
            .field("dispatcher", &self.dispatcher)
            .field("on_connected", &self.on_connected.is_some())
            .finish()
    }
}
