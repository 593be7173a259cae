//! The `client` module is the STOMP client itself.
//!
//! - `connection`: handshake, connection state and the reconnection loop.
//! - `registry`: which handlers listen to which destination.
//! - `dispatcher`: delivery of inbound messages to those handlers.
//! - `stomp_client`: the public API composed from the three above.
//! - `session`: a tokio event loop driving a client with real transports.

pub mod connection;
pub mod dispatcher;
pub mod event;
pub mod registry;
pub mod scheduler;
pub mod session;
pub mod stomp_client;

pub use connection::{ConnectFuture, ConnectionManager, ConnectionState, SessionInfo};
pub use dispatcher::{Delivery, MessageDispatcher};
pub use event::{ClientEvent, EventSender, TimerId};
pub use registry::{DEFAULT_HANDLER_KEY, Handler, SubscriptionHandle, SubscriptionRegistry};
pub use scheduler::{Scheduler, TokioScheduler};
pub use session::{Session, SharedClient};
pub use stomp_client::{ConnectedHook, StompClient};

#[cfg(test)]
mod tests;
