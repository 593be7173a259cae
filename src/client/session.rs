//! Tokio driver for a [`StompClient`].
//!
//! The client sits behind an `Arc<Mutex<_>>` and a single task pumps
//! [`ClientEvent`]s into it, so every state change happens one event at a
//! time. Message handlers run on that task after the lock is released, so
//! they may call back into the client (to unsubscribe, say). The
//! `on_connected` hook still runs under the lock.
//!
//! No event can stop the loop: a panic while handling one is logged and the
//! next event is processed.

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::timeout;

use super::event::ClientEvent;
use super::scheduler::TokioScheduler;
use super::stomp_client::StompClient;
use crate::config::Settings;
use crate::transport::DefaultTransportFactory;
use crate::utils::ConnectError;

pub type SharedClient = Arc<Mutex<StompClient>>;

/// How long `shutdown` waits for queued frames to leave.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

#[derive(Debug)]
pub struct Session {
    client: SharedClient,
    event_loop: JoinHandle<()>,
}

impl Session {
    /// Builds a client with the default transports and starts its event
    /// loop. Must be called from within a tokio runtime.
    pub fn start(settings: &Settings) -> Self {
        let (tx, rx) = mpsc::unbounded_channel::<ClientEvent>();
        let factory = DefaultTransportFactory::new(settings.transport.clone(), tx.clone());
        let scheduler = TokioScheduler::new(tx);
        let client = Arc::new(Mutex::new(StompClient::new(
            Box::new(factory),
            Box::new(scheduler),
            settings,
        )));

        let event_loop = tokio::spawn(run_event_loop(Arc::clone(&client), rx));
        Self { client, event_loop }
    }

    pub fn client(&self) -> SharedClient {
        Arc::clone(&self.client)
    }

    /// Runs `f` with the client locked.
    pub fn with_client<R>(&self, f: impl FnOnce(&mut StompClient) -> R) -> R {
        let mut client = lock(&self.client);
        f(&mut client)
    }

    pub async fn connect(&self, prefer_fallback: bool) -> Result<(), ConnectError> {
        let pending = self.with_client(|client| client.connect(prefer_fallback));
        pending.await
    }

    /// Disconnects the client, waits for frames already queued on the
    /// transport (DISCONNECT included) to be written, then stops the event
    /// loop.
    pub async fn shutdown(self) {
        let closing = self.with_client(|client| {
            client.disconnect();
            client.take_closing_task()
        });

        if let Some(task) = closing {
            match timeout(SHUTDOWN_GRACE, task).await {
                Ok(_) => tracing::debug!("transport flushed"),
                Err(_) => tracing::warn!(
                    grace_ms = SHUTDOWN_GRACE.as_millis() as u64,
                    "transport did not close in time"
                ),
            }
        }
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.event_loop.abort();
    }
}

/// Feeds events to `client` until every sender is gone.
pub async fn run_event_loop(client: SharedClient, mut events: mpsc::UnboundedReceiver<ClientEvent>) {
    while let Some(event) = events.recv().await {
        let processed = catch_unwind(AssertUnwindSafe(|| lock(&client).process_event(event)));
        match processed {
            Ok(deliveries) => {
                for delivery in deliveries {
                    delivery.run();
                }
            }
            Err(_) => tracing::error!("panic while handling client event, continuing"),
        }
    }
    tracing::debug!("event loop finished");
}

fn lock(client: &SharedClient) -> MutexGuard<'_, StompClient> {
    client.lock().unwrap_or_else(PoisonError::into_inner)
}
