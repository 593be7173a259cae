//! Native WebSocket transport
//!
//! Each transport owns one spawned task. The task connects, then splits the
//! stream: a forwarding loop drains the outbound channel into the socket
//! while the task itself reads inbound messages and hands them to the
//! client as [`TransportEvent`]s. A failed connect and a finished read loop
//! are both reported as `Closed`.

use futures_util::{SinkExt, StreamExt};
use tokio::spawn;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::connect_async;
use tungstenite::protocol::Message as WsMessage;
use url::Url;

use super::{Transport, TransportEvent, TransportId, TransportKind};
use crate::client::event::{ClientEvent, EventSender};
use crate::utils::TransportError;

#[derive(Debug)]
pub struct WebSocketTransport {
    id: TransportId,
    outbound: Option<mpsc::UnboundedSender<WsMessage>>,
    task: Option<JoinHandle<()>>,
}

impl WebSocketTransport {
    /// Starts connecting to `url` in the background.
    pub fn spawn(url: Url, id: TransportId, events: EventSender) -> Self {
        let (tx, rx) = mpsc::unbounded_channel::<WsMessage>();
        let task = spawn(run(url, id, rx, events));
        Self {
            id,
            outbound: Some(tx),
            task: Some(task),
        }
    }
}

impl Transport for WebSocketTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::Native
    }

    fn send(&mut self, text: String) -> Result<(), TransportError> {
        let outbound = self.outbound.as_ref().ok_or(TransportError::ChannelClosed)?;
        outbound
            .send(WsMessage::text(text))
            .map_err(|_| TransportError::ChannelClosed)
    }

    fn close(&mut self) {
        if let Some(outbound) = self.outbound.take() {
            // The forwarding loop stops after the close frame.
            let _ = outbound.send(WsMessage::Close(None));
            tracing::debug!(transport_id = %self.id, "websocket transport closing");
        }
    }

    fn closing_task(&mut self) -> Option<JoinHandle<()>> {
        if self.outbound.is_some() {
            return None;
        }
        self.task.take()
    }
}

impl Drop for WebSocketTransport {
    // A closed transport finishes the close handshake on its own.
    fn drop(&mut self) {
        if self.outbound.is_some() {
            if let Some(task) = self.task.take() {
                task.abort();
            }
        }
    }
}

async fn run(
    url: Url,
    id: TransportId,
    mut rx: mpsc::UnboundedReceiver<WsMessage>,
    events: EventSender,
) {
    let ws_stream = match connect_async(url.as_str()).await {
        Ok((ws, _)) => ws,
        Err(e) => {
            tracing::warn!(transport_id = %id, url = %url, "websocket connect failed: {e}");
            let _ = events.send(ClientEvent::transport(
                id,
                TransportEvent::Closed(Some(e.to_string())),
            ));
            return;
        }
    };

    tracing::debug!(transport_id = %id, url = %url, "websocket open");
    if events
        .send(ClientEvent::transport(id, TransportEvent::Open))
        .is_err()
    {
        return;
    }

    let (mut ws_sender, mut ws_receiver) = ws_stream.split();

    // Forward messages from the client to the socket
    let writer = spawn(async move {
        while let Some(msg) = rx.recv().await {
            let closing = msg.is_close();
            if let Err(e) = ws_sender.send(msg).await {
                tracing::warn!(transport_id = %id, "websocket send failed: {e}");
                break;
            }
            if closing {
                break;
            }
        }
    });

    let reason = loop {
        let text = match ws_receiver.next().await {
            Some(Ok(WsMessage::Text(text))) => text.as_str().to_owned(),
            Some(Ok(WsMessage::Binary(bytes))) => match String::from_utf8(bytes.to_vec()) {
                Ok(text) => text,
                Err(_) => {
                    tracing::warn!(transport_id = %id, "dropping non-utf8 binary message");
                    continue;
                }
            },
            Some(Ok(WsMessage::Close(frame))) => {
                break frame.map(|f| format!("{} {}", u16::from(f.code), f.reason.as_str()));
            }
            Some(Ok(_)) => continue,
            Some(Err(e)) => break Some(e.to_string()),
            None => break None,
        };

        if events
            .send(ClientEvent::transport(id, TransportEvent::Message(text)))
            .is_err()
        {
            break None;
        }
    };

    writer.abort();
    tracing::debug!(transport_id = %id, "websocket closed");
    let _ = events.send(ClientEvent::transport(id, TransportEvent::Closed(reason)));
}
