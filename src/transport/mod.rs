//! The `transport` module owns the duplex channel between the client and the
//! broker.
//!
//! A transport only moves text. It reports what happens to it as
//! [`TransportEvent`]s tagged with the [`TransportId`] it was created with,
//! and the client decides what those events mean. Two kinds exist: the
//! native WebSocket and a SockJS xhr-polling fallback for environments where
//! WebSockets are unavailable.

pub mod factory;
pub mod sockjs;
pub mod url;
pub mod websocket;

use std::fmt;

use tokio::task::JoinHandle;

use crate::utils::TransportError;

pub use factory::DefaultTransportFactory;
pub use sockjs::SockJsTransport;
pub use websocket::WebSocketTransport;

/// Generation number of a transport within one client.
///
/// Each connect attempt gets a fresh id, so events still in flight from a
/// transport that was replaced can be told apart and dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TransportId(pub u64);

impl fmt::Display for TransportId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "t{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportKind {
    Native,
    Fallback,
}

impl fmt::Display for TransportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransportKind::Native => f.write_str("websocket"),
            TransportKind::Fallback => f.write_str("sockjs"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// The channel is ready to carry frames.
    Open,
    /// One inbound text message, possibly holding several frames.
    Message(String),
    /// The channel is gone, or never came up.
    Closed(Option<String>),
}

pub trait Transport: Send {
    fn kind(&self) -> TransportKind;

    /// Queues `text` for delivery. Never blocks.
    fn send(&mut self, text: String) -> Result<(), TransportError>;

    /// Tears the channel down. Events emitted afterwards may still arrive.
    fn close(&mut self);

    /// After `close`, the task still delivering frames queued before it.
    /// Awaiting it waits for those frames to leave.
    fn closing_task(&mut self) -> Option<JoinHandle<()>> {
        None
    }
}

/// Builds transports on demand for a client.
pub trait TransportFactory: Send {
    /// Creates a transport, native unless `prefer_fallback` is set or the
    /// native kind is unavailable. Check [`Transport::kind`] on the result to
    /// learn which one was built.
    fn create(&mut self, prefer_fallback: bool, id: TransportId) -> Box<dyn Transport>;
}
