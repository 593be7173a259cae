//! Fan-out of inbound MESSAGE frames.
//!
//! The body is parsed as JSON once and every handler registered for the
//! frame's destination is called with it, in insertion order. A frame for a
//! destination nobody listens to any more is dropped quietly.
//!
//! Dispatch happens in two steps. [`MessageDispatcher::prepare`] resolves the
//! handlers against the registry and yields a [`Delivery`]; running it calls
//! the handlers. [`Session`](super::Session) runs deliveries after releasing
//! the client lock, so a handler may call back into the client.
//!
//! A panicking handler is not isolated from the ones after it on the same
//! message: the rest of that fan-out is skipped. The panic is caught at the
//! fan-out boundary and logged, and dispatch of later messages continues.

use std::fmt;
use std::panic::{AssertUnwindSafe, catch_unwind};

use serde_json::Value;

use super::registry::{Handler, SubscriptionRegistry};
use crate::frame::Frame;

/// Handlers resolved for one message, ready to be called.
pub struct Delivery {
    destination: String,
    payload: Value,
    handlers: Vec<Handler>,
}

impl Delivery {
    pub fn destination(&self) -> &str {
        &self.destination
    }

    pub fn payload(&self) -> &Value {
        &self.payload
    }

    /// Calls every handler in order. Returns how many ran to completion.
    pub fn run(self) -> usize {
        let mut completed = 0;
        let outcome = catch_unwind(AssertUnwindSafe(|| {
            for handler in &self.handlers {
                handler(&self.payload);
                completed += 1;
            }
        }));

        if let Err(panic) = outcome {
            let reason = panic
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| panic.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "non-string panic payload".to_string());
            tracing::error!(
                destination = %self.destination,
                completed,
                skipped = self.handlers.len() - completed - 1,
                "message handler panicked: {reason}"
            );
        }
        completed
    }
}

impl fmt::Debug for Delivery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Delivery")
            .field("destination", &self.destination)
            .field("payload", &self.payload)
            .field("handlers", &self.handlers.len())
            .finish()
    }
}

#[derive(Debug, Default)]
pub struct MessageDispatcher {
    delivered: u64,
    discarded: u64,
}

impl MessageDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Resolves the handlers for `frame`, or `None` when it is discarded.
    pub fn prepare(&mut self, registry: &SubscriptionRegistry, frame: &Frame) -> Option<Delivery> {
        let Some(destination) = frame.destination() else {
            tracing::warn!("MESSAGE frame without destination");
            self.discarded += 1;
            return None;
        };

        let handlers = registry.handlers(destination);
        if handlers.is_empty() {
            tracing::trace!(destination, "no subscription, discarding message");
            self.discarded += 1;
            return None;
        }

        let payload: Value = match serde_json::from_str(&frame.body) {
            Ok(payload) => payload,
            Err(e) => {
                tracing::warn!(destination, "discarding message with invalid JSON body: {e}");
                self.discarded += 1;
                return None;
            }
        };

        self.delivered += 1;
        Some(Delivery {
            destination: destination.to_string(),
            payload,
            handlers,
        })
    }

    /// Delivers `frame` right away and returns the number of handlers that
    /// completed.
    pub fn dispatch(&mut self, registry: &SubscriptionRegistry, frame: &Frame) -> usize {
        self.prepare(registry, frame).map_or(0, Delivery::run)
    }

    /// Messages handed to at least one handler.
    pub fn delivered(&self) -> u64 {
        self.delivered
    }

    pub fn discarded(&self) -> u64 {
        self.discarded
    }
}
