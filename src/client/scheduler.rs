//! Timers for the reconnection loop.

use std::collections::HashMap;
use std::time::Duration;

use tokio::task::JoinHandle;

use super::event::{ClientEvent, EventSender, TimerId};

/// Schedules one-shot timers that fire as [`ClientEvent::ReconnectTimer`].
pub trait Scheduler: Send {
    fn schedule(&mut self, delay: Duration) -> TimerId;

    /// Cancels a pending timer. Cancelling a fired or unknown timer is a no-op.
    fn cancel(&mut self, id: TimerId);
}

/// Scheduler backed by spawned `tokio::time::sleep` tasks.
#[derive(Debug)]
pub struct TokioScheduler {
    events: EventSender,
    next_id: u64,
    timers: HashMap<TimerId, JoinHandle<()>>,
}

impl TokioScheduler {
    pub fn new(events: EventSender) -> Self {
        Self {
            events,
            next_id: 0,
            timers: HashMap::new(),
        }
    }
}

impl Scheduler for TokioScheduler {
    fn schedule(&mut self, delay: Duration) -> TimerId {
        self.timers.retain(|_, task| !task.is_finished());

        let id = TimerId(self.next_id);
        self.next_id += 1;

        let events = self.events.clone();
        let task = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = events.send(ClientEvent::ReconnectTimer(id));
        });
        self.timers.insert(id, task);
        id
    }

    fn cancel(&mut self, id: TimerId) {
        if let Some(task) = self.timers.remove(&id) {
            task.abort();
        }
    }
}

impl Drop for TokioScheduler {
    fn drop(&mut self) {
        for (_, task) in self.timers.drain() {
            task.abort();
        }
    }
}
