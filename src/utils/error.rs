//! The `error` module defines the error types used within `stompmux`.
//!
//! None of these are fatal to the client. Transport and handshake failures
//! end up in the reconnection loop or a rejected connect future; frame
//! errors are logged and the offending payload is dropped.

use thiserror::Error;

/// A STOMP frame could not be decoded.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum FrameError {
    #[error("frame has no command line")]
    MissingCommand,

    #[error("unknown frame command: {0}")]
    UnknownCommand(String),

    #[error("malformed header line: {0}")]
    MalformedHeader(String),

    #[error("invalid escape sequence in header: {0}")]
    InvalidEscape(String),

    #[error("frame body is not terminated by NUL")]
    MissingTerminator,
}

/// A transport could not deliver or receive data.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("websocket error: {0}")]
    WebSocket(#[from] tungstenite::Error),

    #[error("invalid transport url: {0}")]
    InvalidUrl(String),

    #[error("unexpected sockjs frame: {0}")]
    Protocol(String),

    #[error("transport channel closed")]
    ChannelClosed,
}

/// Outcome of a `connect()` future that did not establish a session.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConnectError {
    #[error("a handshake is already in progress")]
    AlreadyConnecting,

    #[error("handshake failed: {0}")]
    HandshakeFailed(String),

    #[error("client is closed")]
    Closed,
}
