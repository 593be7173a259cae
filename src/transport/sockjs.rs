//! SockJS xhr-polling fallback transport
//!
//! Used when a native WebSocket cannot be opened. A session lives under
//! `{base}/{server}/{session}`; the receive loop long-polls `…/xhr` and the
//! send loop posts JSON string arrays to `…/xhr_send`, one request at a
//! time so frames reach the broker in order.
//!
//! Every poll response carries exactly one SockJS frame:
//! - `o` session open
//! - `h` heartbeat
//! - `a["…", …]` one or more messages
//! - `c[code,"reason"]` session closed

use reqwest::header::CONTENT_TYPE;
use tokio::spawn;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use url::Url;
use uuid::Uuid;

use super::{Transport, TransportEvent, TransportId, TransportKind};
use crate::client::event::{ClientEvent, EventSender};
use crate::utils::TransportError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SockJsFrame {
    Open,
    Heartbeat,
    Messages(Vec<String>),
    Close { code: u16, reason: String },
}

/// Parses the body of one poll response.
pub fn parse_frame(raw: &str) -> Result<SockJsFrame, TransportError> {
    let raw = raw.trim_end_matches(['\n', '\r']);
    let Some(kind) = raw.chars().next() else {
        return Err(TransportError::Protocol("empty response".to_string()));
    };
    let payload = &raw[kind.len_utf8()..];

    match kind {
        'o' => Ok(SockJsFrame::Open),
        'h' => Ok(SockJsFrame::Heartbeat),
        'a' => serde_json::from_str::<Vec<String>>(payload)
            .map(SockJsFrame::Messages)
            .map_err(|e| TransportError::Protocol(format!("{raw}: {e}"))),
        'c' => serde_json::from_str::<(u16, String)>(payload)
            .map(|(code, reason)| SockJsFrame::Close { code, reason })
            .map_err(|e| TransportError::Protocol(format!("{raw}: {e}"))),
        _ => Err(TransportError::Protocol(raw.to_string())),
    }
}

/// Builds a fresh session URL below `base`.
pub fn session_url(base: &Url) -> String {
    let session = Uuid::new_v4();
    let server = session.as_u128() % 1000;
    format!(
        "{}/{server:03}/{}",
        base.as_str().trim_end_matches('/'),
        session.simple()
    )
}

#[derive(Debug)]
pub struct SockJsTransport {
    id: TransportId,
    outbound: Option<mpsc::UnboundedSender<String>>,
    receiver: JoinHandle<()>,
    sender: Option<JoinHandle<()>>,
}

impl SockJsTransport {
    pub fn spawn(base: Url, id: TransportId, events: EventSender) -> Self {
        let session = session_url(&base);
        let client = reqwest::Client::new();
        let (tx, rx) = mpsc::unbounded_channel::<String>();

        // Nothing is queued before the client has seen `Open`.
        let sender = spawn(send_loop(client.clone(), format!("{session}/xhr_send"), id, rx));
        let receiver = spawn(run(client, session, id, events));
        Self {
            id,
            outbound: Some(tx),
            receiver,
            sender: Some(sender),
        }
    }
}

impl Transport for SockJsTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::Fallback
    }

    fn send(&mut self, text: String) -> Result<(), TransportError> {
        let outbound = self.outbound.as_ref().ok_or(TransportError::ChannelClosed)?;
        outbound.send(text).map_err(|_| TransportError::ChannelClosed)
    }

    fn close(&mut self) {
        // Dropping the sender lets the send loop flush what is queued and exit.
        self.outbound.take();
        self.receiver.abort();
        tracing::debug!(transport_id = %self.id, "sockjs transport closed");
    }

    fn closing_task(&mut self) -> Option<JoinHandle<()>> {
        if self.outbound.is_some() {
            return None;
        }
        self.sender.take()
    }
}

impl Drop for SockJsTransport {
    fn drop(&mut self) {
        self.receiver.abort();
        if self.outbound.is_some() {
            if let Some(sender) = self.sender.take() {
                sender.abort();
            }
        }
    }
}

async fn run(client: reqwest::Client, session: String, id: TransportId, events: EventSender) {
    let poll_url = format!("{session}/xhr");
    let mut opened = false;

    let reason = loop {
        let body = match poll(&client, &poll_url).await {
            Ok(body) => body,
            Err(e) => {
                tracing::warn!(transport_id = %id, "sockjs poll failed: {e}");
                break Some(e.to_string());
            }
        };

        let event = match parse_frame(&body) {
            Ok(SockJsFrame::Open) if !opened => {
                opened = true;
                vec![TransportEvent::Open]
            }
            Ok(SockJsFrame::Open | SockJsFrame::Heartbeat) => Vec::new(),
            Ok(SockJsFrame::Messages(messages)) => {
                messages.into_iter().map(TransportEvent::Message).collect()
            }
            Ok(SockJsFrame::Close { code, reason }) => break Some(format!("{code} {reason}")),
            Err(e) => break Some(e.to_string()),
        };

        if event
            .into_iter()
            .any(|ev| events.send(ClientEvent::transport(id, ev)).is_err())
        {
            break None;
        }
    };

    tracing::debug!(transport_id = %id, "sockjs session ended");
    let _ = events.send(ClientEvent::transport(id, TransportEvent::Closed(reason)));
}

async fn poll(client: &reqwest::Client, url: &str) -> Result<String, TransportError> {
    let response = client.post(url).send().await?.error_for_status()?;
    Ok(response.text().await?)
}

async fn send_loop(
    client: reqwest::Client,
    url: String,
    id: TransportId,
    mut rx: mpsc::UnboundedReceiver<String>,
) {
    while let Some(text) = rx.recv().await {
        let body = match serde_json::to_string(&[text]) {
            Ok(body) => body,
            Err(e) => {
                tracing::error!(transport_id = %id, "failed to encode sockjs payload: {e}");
                continue;
            }
        };

        let result = client
            .post(&url)
            .header(CONTENT_TYPE, "text/plain;charset=UTF-8")
            .body(body)
            .send()
            .await
            .and_then(|r| r.error_for_status());

        if let Err(e) = result {
            tracing::warn!(transport_id = %id, "sockjs send failed: {e}");
            break;
        }
    }
}
