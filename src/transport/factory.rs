//! Transport selection.
//!
//! The native WebSocket is preferred. It is skipped when the caller asks
//! for the fallback, when `force_fallback` is configured, when the
//! environment reports no WebSocket support, or when the native URL cannot
//! be built. None of these are errors: the fallback is simply used, and the
//! caller learns which kind it got from [`Transport::kind`].

use super::url::for_kind;
use super::{
    SockJsTransport, Transport, TransportEvent, TransportFactory, TransportId, TransportKind,
    WebSocketTransport,
};
use crate::client::event::{ClientEvent, EventSender};
use crate::config::TransportSettings;
use crate::utils::TransportError;

#[derive(Debug)]
pub struct DefaultTransportFactory {
    settings: TransportSettings,
    events: EventSender,
}

impl DefaultTransportFactory {
    pub fn new(settings: TransportSettings, events: EventSender) -> Self {
        Self { settings, events }
    }

    fn native_allowed(&self, prefer_fallback: bool) -> bool {
        !prefer_fallback && !self.settings.force_fallback && self.settings.native_supported
    }
}

impl TransportFactory for DefaultTransportFactory {
    fn create(&mut self, prefer_fallback: bool, id: TransportId) -> Box<dyn Transport> {
        if self.native_allowed(prefer_fallback) {
            match for_kind(&self.settings, TransportKind::Native) {
                Ok(url) => {
                    tracing::debug!(transport_id = %id, url = %url, "creating websocket transport");
                    return Box::new(WebSocketTransport::spawn(url, id, self.events.clone()));
                }
                Err(e) => {
                    tracing::warn!(transport_id = %id, "websocket unavailable, using fallback: {e}");
                }
            }
        } else if !prefer_fallback && !self.settings.native_supported {
            tracing::warn!(transport_id = %id, "websocket not supported, using fallback");
        }

        match for_kind(&self.settings, TransportKind::Fallback) {
            Ok(url) => {
                tracing::debug!(transport_id = %id, url = %url, "creating sockjs transport");
                Box::new(SockJsTransport::spawn(url, id, self.events.clone()))
            }
            Err(e) => {
                tracing::error!(transport_id = %id, "fallback transport unavailable: {e}");
                Box::new(UnreachableTransport::new(id, &self.events, e))
            }
        }
    }
}

/// Stand-in for a transport whose URL could not be built. It reports
/// `Closed` immediately so the failure flows through the normal handshake
/// path.
#[derive(Debug)]
struct UnreachableTransport;

impl UnreachableTransport {
    fn new(id: TransportId, events: &EventSender, error: TransportError) -> Self {
        let _ = events.send(ClientEvent::transport(
            id,
            TransportEvent::Closed(Some(error.to_string())),
        ));
        Self
    }
}

impl Transport for UnreachableTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::Fallback
    }

    fn send(&mut self, _text: String) -> Result<(), TransportError> {
        Err(TransportError::ChannelClosed)
    }

    fn close(&mut self) {}
}
