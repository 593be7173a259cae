//! Inbox of a [`StompClient`](super::StompClient).
//!
//! Transports and timers never touch client state directly; they post a
//! [`ClientEvent`] and whoever drives the client feeds it to
//! [`StompClient::handle_event`](super::StompClient::handle_event), one at a
//! time.

use std::fmt;

use tokio::sync::mpsc::UnboundedSender;

use crate::transport::{TransportEvent, TransportId};

/// Identifies a scheduled reconnection timer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TimerId(pub u64);

impl fmt::Display for TimerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "timer-{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientEvent {
    Transport {
        id: TransportId,
        event: TransportEvent,
    },
    ReconnectTimer(TimerId),
}

impl ClientEvent {
    pub fn transport(id: TransportId, event: TransportEvent) -> Self {
        ClientEvent::Transport { id, event }
    }
}

pub type EventSender = UnboundedSender<ClientEvent>;
