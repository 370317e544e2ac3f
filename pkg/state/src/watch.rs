use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::RwLock;
use tokio::sync::broadcast;

/// Type of event in the watch stream.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum EventType {
    Put,
    Delete,
}

/// A single watch event representing a state change.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct WatchEvent {
    pub seq: u64,
    pub event_type: EventType,
    pub key: String,
}

/// In-memory log of store mutations with monotonic sequence numbers.
///
/// Reconcilers subscribe to it; the recent-event buffer lets a subscriber
/// that fell behind catch up from the last sequence number it saw.
#[derive(Clone)]
pub struct EventLog {
    inner: Arc<RwLock<EventLogInner>>,
    sender: broadcast::Sender<WatchEvent>,
}

struct EventLogInner {
    seq: u64,
    events: VecDeque<WatchEvent>,
    max_events: usize,
}

impl EventLog {
    pub fn new(max_events: usize) -> Self {
        let (sender, _) = broadcast::channel(1024);
        Self {
            inner: Arc::new(RwLock::new(EventLogInner {
                seq: 0,
                events: VecDeque::with_capacity(max_events),
                max_events,
            })),
            sender,
        }
    }

    /// Record a new event. Called by StateStore on put/delete.
    pub async fn emit(&self, event_type: EventType, key: &str) {
        let mut inner = self.inner.write().await;
        inner.seq += 1;
        let event = WatchEvent {
            seq: inner.seq,
            event_type,
            key: key.to_string(),
        };
        if inner.events.len() >= inner.max_events {
            inner.events.pop_front();
        }
        inner.events.push_back(event.clone());
        // no receivers is fine
        let _ = self.sender.send(event);
    }

    pub async fn current_seq(&self) -> u64 {
        self.inner.read().await.seq
    }

    /// Events after `from_seq` whose key starts with `prefix`, or `None` when
    /// some of them were already evicted from the buffer.
    pub async fn events_since(&self, from_seq: u64, prefix: &str) -> Option<Vec<WatchEvent>> {
        let inner = self.inner.read().await;
        let oldest = inner.events.front().map_or(inner.seq + 1, |e| e.seq);
        if from_seq + 1 < oldest {
            return None;
        }
        Some(
            inner
                .events
                .iter()
                .filter(|e| e.seq > from_seq && e.key.starts_with(prefix))
                .cloned()
                .collect(),
        )
    }

    pub fn subscribe(&self) -> broadcast::Receiver<WatchEvent> {
        self.sender.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn buffer_is_capped_and_filterable() {
        let log = EventLog::new(2);
        log.emit(EventType::Put, "/registry/namespaces/a").await;
        log.emit(EventType::Put, "/registry/subnamespaces/a/b").await;
        log.emit(EventType::Delete, "/registry/namespaces/c").await;

        assert_eq!(log.current_seq().await, 3);
        // seq 1 was evicted
        assert!(log.events_since(0, "/registry/").await.is_none());
        let all = log.events_since(1, "/registry/").await.unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].seq, 2);
        let ns = log.events_since(1, "/registry/namespaces/").await.unwrap();
        assert_eq!(ns.len(), 1);
        assert_eq!(ns[0].event_type, EventType::Delete);
        assert!(log.events_since(3, "/registry/").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn empty_log_replays_nothing() {
        let log = EventLog::new(4);
        assert_eq!(log.events_since(0, "/registry/").await, Some(Vec::new()));
    }

    #[tokio::test]
    async fn subscribers_receive_new_events() {
        let log = EventLog::new(8);
        let mut rx = log.subscribe();
        log.emit(EventType::Put, "/registry/namespaces/a").await;
        let ev = rx.recv().await.unwrap();
        assert_eq!(ev.key, "/registry/namespaces/a");
    }
}
