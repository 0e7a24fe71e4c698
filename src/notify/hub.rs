//! Publish/subscribe hub for run progress.
//!
//! Subscribers register interest in runs and open one or more bounded
//! connections. Publishing never awaits: a connection that is closed or
//! whose buffer is full is dropped from the registry and the remaining
//! connections still receive the event.

use super::events::Event;
use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, MutexGuard};
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// Default buffer size for a connection.
pub const DEFAULT_CONNECTION_CAPACITY: usize = 256;

/// Outcome of a publish call. Callers may inspect it but never have to.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PublishReport {
    /// Connections that accepted the event.
    pub delivered: usize,
    /// Connections that failed and were removed.
    pub dropped: usize,
}

struct Connection {
    id: u64,
    tx: mpsc::Sender<Event>,
}

#[derive(Default)]
struct Registry {
    /// run id -> subscriber ids
    runs: HashMap<String, HashSet<String>>,
    /// subscriber id -> live connections
    connections: HashMap<String, Vec<Connection>>,
    next_connection_id: u64,
}

/// Receiving half of one subscriber connection.
pub struct EventStream {
    subscriber_id: String,
    connection_id: u64,
    rx: mpsc::Receiver<Event>,
}

impl EventStream {
    pub fn subscriber_id(&self) -> &str {
        &self.subscriber_id
    }

    pub fn connection_id(&self) -> u64 {
        self.connection_id
    }

    /// Wait for the next event. Returns `None` once the connection is gone.
    pub async fn recv(&mut self) -> Option<Event> {
        self.rx.recv().await
    }

    /// Take an already-buffered event without waiting.
    pub fn try_recv(&mut self) -> Option<Event> {
        self.rx.try_recv().ok()
    }

    /// Drain every buffered event.
    pub fn drain(&mut self) -> Vec<Event> {
        let mut events = Vec::new();
        while let Some(event) = self.try_recv() {
            events.push(event);
        }
        events
    }
}

/// Fan-out broadcaster of run events.
#[derive(Default)]
pub struct Notifier {
    registry: Mutex<Registry>,
}

impl Notifier {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Registry> {
        self.registry.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Open a new connection for a subscriber.
    pub fn connect(&self, subscriber_id: &str, capacity: usize) -> EventStream {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let mut registry = self.lock();
        let id = registry.next_connection_id;
        registry.next_connection_id += 1;
        registry
            .connections
            .entry(subscriber_id.to_string())
            .or_default()
            .push(Connection { id, tx });
        debug!("Subscriber {} opened connection {}", subscriber_id, id);

        EventStream {
            subscriber_id: subscriber_id.to_string(),
            connection_id: id,
            rx,
        }
    }

    /// Close a single connection of a subscriber.
    pub fn close_connection(&self, subscriber_id: &str, connection_id: u64) {
        let mut registry = self.lock();
        if let Some(conns) = registry.connections.get_mut(subscriber_id) {
            conns.retain(|c| c.id != connection_id);
            if conns.is_empty() {
                registry.connections.remove(subscriber_id);
            }
        }
    }

    /// Register a subscriber's interest in a run.
    pub fn subscribe(&self, subscriber_id: &str, run_id: &str) {
        let mut registry = self.lock();
        registry
            .runs
            .entry(run_id.to_string())
            .or_default()
            .insert(subscriber_id.to_string());
        debug!("Subscriber {} subscribed to run {}", subscriber_id, run_id);
    }

    /// Remove a subscriber's interest in a run.
    pub fn unsubscribe(&self, subscriber_id: &str, run_id: &str) {
        let mut registry = self.lock();
        if let Some(subscribers) = registry.runs.get_mut(run_id) {
            subscribers.remove(subscriber_id);
            if subscribers.is_empty() {
                registry.runs.remove(run_id);
            }
        }
    }

    /// Subscriber went away: drop all its connections and subscriptions.
    pub fn disconnect(&self, subscriber_id: &str) {
        let mut registry = self.lock();
        registry.connections.remove(subscriber_id);
        registry.runs.retain(|_, subscribers| {
            subscribers.remove(subscriber_id);
            !subscribers.is_empty()
        });
        debug!("Subscriber {} disconnected", subscriber_id);
    }

    /// Deliver an event to every live connection of every subscriber of the run.
    ///
    /// Publishing to a run with no subscribers is a no-op.
    pub fn publish(&self, run_id: &str, event: Event) -> PublishReport {
        let mut report = PublishReport::default();
        let mut registry = self.lock();

        let subscribers: Vec<String> = match registry.runs.get(run_id) {
            Some(subs) => subs.iter().cloned().collect(),
            None => return report,
        };

        for subscriber in subscribers {
            let Some(conns) = registry.connections.get_mut(&subscriber) else {
                continue;
            };

            conns.retain(|conn| match conn.tx.try_send(event.clone()) {
                Ok(()) => {
                    report.delivered += 1;
                    true
                }
                Err(e) => {
                    warn!(
                        "Dropping connection {} of subscriber {} for run {}: {}",
                        conn.id, subscriber, run_id, e
                    );
                    report.dropped += 1;
                    false
                }
            });

            if conns.is_empty() {
                registry.connections.remove(&subscriber);
            }
        }

        report
    }

    /// Number of subscribers registered for a run.
    pub fn subscriber_count(&self, run_id: &str) -> usize {
        self.lock().runs.get(run_id).map_or(0, HashSet::len)
    }

    /// Number of live connections held by a subscriber.
    pub fn connection_count(&self, subscriber_id: &str) -> usize {
        self.lock().connections.get(subscriber_id).map_or(0, Vec::len)
    }

    /// Number of runs with at least one subscriber.
    pub fn active_runs(&self) -> usize {
        self.lock().runs.len()
    }
}
