//! # stompmux
//!
//! `stompmux` is a STOMP 1.2 client for single-page-style consumers that
//! want one broker subscription per destination shared by many independent
//! listeners. It talks to the broker over a WebSocket, falls back to SockJS
//! xhr-polling where WebSockets are unavailable, and restores every
//! subscription by itself after the connection drops.
//!
//! ## Modules
//!
//! - `frame`: STOMP frame encoding and decoding.
//! - `transport`: the WebSocket and SockJS channels and the factory choosing between them.
//! - `client`: connection lifecycle, subscription registry and message dispatch.
//! - `config`: loading settings from files and the environment.
//! - `utils`: error types and logging setup.
//!
//! ```no_run
//! use stompmux::{Session, load_config};
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let settings = load_config()?;
//! let session = Session::start(&settings);
//! session.connect(false).await?;
//! session.with_client(|client| {
//!     client.subscribe("/events/hosts", |payload| println!("{payload}"));
//! });
//! # Ok(())
//! # }
//! ```

pub mod client;
pub mod config;
pub mod frame;
pub mod transport;
pub mod utils;

pub use client::{ConnectionState, Session, StompClient};
pub use crate::config::{Settings, load_config};
pub use utils::{ConnectError, FrameError, TransportError};
