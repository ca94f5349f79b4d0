use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::{Event, EventKind};

/// Per-subscriber queue depth. A subscriber that falls this far behind starts
/// losing events rather than stalling publishers.
pub const SUBSCRIBER_QUEUE_CAPACITY: usize = 100;

const KEEPALIVE_INTERVAL: Duration = Duration::from_secs(30);

struct Inner {
    subscribers: HashMap<u64, mpsc::Sender<Event>>,
    replay: VecDeque<Event>,
    next_id: u64,
}

/// Thread-safe pub/sub bus. Cheap to clone via `Arc`.
pub struct EventBus {
    inner: Arc<Mutex<Inner>>,
    replay_size: usize,
}

impl EventBus {
    pub fn new(replay_size: usize) -> Self {
        info!(replay_size, "event bus initialized");
        Self {
            inner: Arc::new(Mutex::new(Inner {
                subscribers: HashMap::new(),
                replay: VecDeque::with_capacity(replay_size),
                next_id: 0,
            })),
            replay_size,
        }
    }

    /// Publish an event to every live subscriber and append it to the replay
    /// ring. Never blocks: full queues drop the event for that subscriber,
    /// closed queues are reaped.
    pub fn publish(&self, kind: EventKind, data: serde_json::Value) {
        let event = Event::new(kind, data);

        let mut inner = self.inner.lock().unwrap();
        if inner.replay.len() == self.replay_size {
            inner.replay.pop_front();
        }
        inner.replay.push_back(event.clone());

        let mut dead: Vec<u64> = Vec::new();
        for (id, tx) in &inner.subscribers {
            match tx.try_send(event.clone()) {
                Ok(()) => {}
                Err(mpsc::error::TrySendError::Full(_)) => {
                    warn!(subscriber = *id, event = %kind, "subscriber queue full, dropping event");
                }
                Err(mpsc::error::TrySendError::Closed(_)) => {
                    dead.push(*id);
                }
            }
        }
        for id in dead {
            inner.subscribers.remove(&id);
            debug!(subscriber = id, "reaped closed subscriber");
        }
        drop(inner);

        debug!(event = %kind, "published");
    }

    /// Register a new subscriber. When `replay` is set, a snapshot of the
    /// current replay ring is queued ahead of live delivery.
    pub fn subscribe(&self, replay: bool) -> Subscription {
        let (tx, rx) = mpsc::channel(SUBSCRIBER_QUEUE_CAPACITY);

        let mut inner = self.inner.lock().unwrap();
        inner.next_id += 1;
        let id = inner.next_id;

        if replay {
            for event in inner.replay.iter() {
                if tx.try_send(event.clone()).is_err() {
                    break;
                }
            }
        }
        inner.subscribers.insert(id, tx);
        drop(inner);

        info!(subscriber = id, replay, "new subscriber");
        Subscription {
            id,
            rx,
            inner: Arc::clone(&self.inner),
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.inner.lock().unwrap().subscribers.len()
    }
}

impl Clone for EventBus {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
            replay_size: self.replay_size,
        }
    }
}

/// One subscriber's view of the bus. Dropping it deregisters the queue.
pub struct Subscription {
    id: u64,
    rx: mpsc::Receiver<Event>,
    inner: Arc<Mutex<Inner>>,
}

impl Subscription {
    /// Wait for the next event. After 30 s without one, a keepalive event is
    /// synthesized so idle SSE connections are not dropped by proxies.
    /// Returns `None` only when the bus itself is gone.
    pub async fn recv(&mut self) -> Option<Event> {
        match tokio::time::timeout(KEEPALIVE_INTERVAL, self.rx.recv()).await {
            Ok(Some(event)) => Some(event),
            Ok(None) => None,
            Err(_) => Some(Event::keepalive()),
        }
    }

    /// Non-blocking drain, used by tests and the non-SSE status paths.
    pub fn try_recv(&mut self) -> Option<Event> {
        self.rx.try_recv().ok()
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Ok(mut inner) = self.inner.lock() {
            inner.subscribers.remove(&self.id);
        }
        info!(subscriber = self.id, "subscriber disconnected");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn delivers_in_publish_order() {
        let bus = EventBus::new(50);
        let mut sub = bus.subscribe(false);

        bus.publish(EventKind::AiTypingStart, json!({}));
        bus.publish(EventKind::MessageAdded, json!({"n": 1}));
        bus.publish(EventKind::AiTypingEnd, json!({}));

        assert_eq!(sub.try_recv().unwrap().kind, EventKind::AiTypingStart);
        assert_eq!(sub.try_recv().unwrap().kind, EventKind::MessageAdded);
        assert_eq!(sub.try_recv().unwrap().kind, EventKind::AiTypingEnd);
        assert!(sub.try_recv().is_none());
    }

    #[tokio::test]
    async fn replay_drains_ring_before_live() {
        let bus = EventBus::new(50);
        bus.publish(EventKind::ChatSwitched, json!({"chat": "default"}));
        bus.publish(EventKind::PromptChanged, json!({}));

        let mut with_replay = bus.subscribe(true);
        let mut without = bus.subscribe(false);

        assert_eq!(with_replay.try_recv().unwrap().kind, EventKind::ChatSwitched);
        assert_eq!(with_replay.try_recv().unwrap().kind, EventKind::PromptChanged);
        assert!(without.try_recv().is_none());
    }

    #[tokio::test]
    async fn ring_is_bounded() {
        let bus = EventBus::new(2);
        bus.publish(EventKind::AiTypingStart, json!({}));
        bus.publish(EventKind::AiTypingEnd, json!({}));
        bus.publish(EventKind::MessageAdded, json!({}));

        let mut sub = bus.subscribe(true);
        // Oldest event fell out of the ring.
        assert_eq!(sub.try_recv().unwrap().kind, EventKind::AiTypingEnd);
        assert_eq!(sub.try_recv().unwrap().kind, EventKind::MessageAdded);
        assert!(sub.try_recv().is_none());
    }

    #[tokio::test]
    async fn full_queue_drops_without_blocking() {
        let bus = EventBus::new(10);
        let mut sub = bus.subscribe(false);

        for _ in 0..(SUBSCRIBER_QUEUE_CAPACITY + 20) {
            bus.publish(EventKind::MessageAdded, json!({}));
        }

        let mut received = 0;
        while sub.try_recv().is_some() {
            received += 1;
        }
        assert_eq!(received, SUBSCRIBER_QUEUE_CAPACITY);
    }

    #[tokio::test]
    async fn dropped_subscription_is_reaped() {
        let bus = EventBus::new(10);
        let sub = bus.subscribe(false);
        assert_eq!(bus.subscriber_count(), 1);
        drop(sub);
        assert_eq!(bus.subscriber_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn idle_stream_yields_keepalive() {
        let bus = EventBus::new(10);
        let mut sub = bus.subscribe(false);

        let recv = tokio::spawn(async move { sub.recv().await });
        tokio::time::advance(Duration::from_secs(31)).await;
        let event = recv.await.unwrap().unwrap();
        assert_eq!(event.kind, EventKind::Keepalive);
    }
}
