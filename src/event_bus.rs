// =============================================================================
// Event Bus — topic-based fan-out with per-subscriber bounded queues
// =============================================================================
//
// Each subscription owns an independent ring buffer. Publication never
// blocks the producer: when a subscriber's queue is full the oldest entry
// is evicted to make room for the new one (drop-oldest). Ordering per
// (topic, subscriber) is FIFO; delivery is at-most-once per subscriber.
// =============================================================================

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::Notify;
use tracing::warn;

const DEFAULT_QUEUE_CAPACITY: usize = 10_000;

/// A single subscriber's queue plus the waker consumers block on.
struct Subscription {
    consumer_name: String,
    queue: Mutex<VecDeque<Value>>,
    capacity: usize,
    notify: Notify,
}

/// Handle returned by `subscribe`; clone freely, all clones see the same
/// underlying queue.
#[derive(Clone)]
pub struct Queue {
    inner: Arc<Subscription>,
}

impl Queue {
    /// Pop the oldest pending event, if any.
    pub fn try_recv(&self) -> Option<Value> {
        self.inner.queue.lock().pop_front()
    }

    /// Wait for the next event, or return `None` once `cancel` is set.
    /// Polls the queue on a short interval so cooperative shutdown is
    /// always observed promptly even if `notify` is missed.
    pub async fn recv(&self, cancel: &std::sync::Arc<std::sync::atomic::AtomicBool>) -> Option<Value> {
        use std::sync::atomic::Ordering;
        loop {
            if let Some(v) = self.try_recv() {
                return Some(v);
            }
            if cancel.load(Ordering::Relaxed) {
                return None;
            }
            tokio::select! {
                _ = self.inner.notify.notified() => continue,
                _ = tokio::time::sleep(std::time::Duration::from_secs(1)) => continue,
            }
        }
    }

    pub fn consumer_name(&self) -> &str {
        &self.inner.consumer_name
    }

    pub fn len(&self) -> usize {
        self.inner.queue.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Topic-keyed fan-out bus. Subscribe/unsubscribe are guarded by a mutex;
/// publish itself only takes the lock to read the subscriber list, then
/// mutates each subscriber's own queue independently.
pub struct EventBus {
    subscribers: Mutex<HashMap<String, Vec<Arc<Subscription>>>>,
    default_capacity: usize,
}

impl EventBus {
    pub fn new(default_capacity: usize) -> Self {
        Self {
            subscribers: Mutex::new(HashMap::new()),
            default_capacity,
        }
    }

    /// Subscribe a named consumer to a topic, returning its queue handle.
    pub fn subscribe(&self, topic: &str, consumer_name: &str) -> Queue {
        let sub = Arc::new(Subscription {
            consumer_name: consumer_name.to_string(),
            queue: Mutex::new(VecDeque::with_capacity(self.default_capacity.min(256))),
            capacity: self.default_capacity,
            notify: Notify::new(),
        });
        self.subscribers
            .lock()
            .entry(topic.to_string())
            .or_default()
            .push(sub.clone());
        Queue { inner: sub }
    }

    /// Publish a payload to every subscriber of `topic`. Drop-oldest is
    /// applied independently per subscriber queue; publication never
    /// blocks and never fails from the caller's perspective.
    pub fn publish(&self, topic: &str, payload: Value) {
        let subs = {
            let map = self.subscribers.lock();
            match map.get(topic) {
                Some(v) => v.clone(),
                None => return,
            }
        };
        for sub in subs {
            let mut q = sub.queue.lock();
            if q.len() >= sub.capacity {
                q.pop_front();
                warn!(topic, consumer = %sub.consumer_name, "event bus backpressure: dropped oldest");
            }
            q.push_back(payload.clone());
            drop(q);
            sub.notify.notify_one();
        }
    }

    /// Discard all subscribers of a topic, or every subscriber on every
    /// topic when `topic` is `None`.
    pub fn unsubscribe_all(&self, topic: Option<&str>) {
        let mut map = self.subscribers.lock();
        match topic {
            Some(t) => {
                map.remove(t);
            }
            None => map.clear(),
        }
    }

    pub fn subscriber_count(&self, topic: &str) -> usize {
        self.subscribers.lock().get(topic).map(|v| v.len()).unwrap_or(0)
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_QUEUE_CAPACITY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn publish_delivers_fifo_per_subscriber() {
        let bus = EventBus::new(10);
        let q = bus.subscribe("tick", "consumer_a");
        bus.publish("tick", serde_json::json!({"n": 1}));
        bus.publish("tick", serde_json::json!({"n": 2}));
        assert_eq!(q.try_recv().unwrap()["n"], 1);
        assert_eq!(q.try_recv().unwrap()["n"], 2);
        assert!(q.try_recv().is_none());
    }

    #[test]
    fn publish_with_no_subscribers_is_a_noop() {
        let bus = EventBus::new(10);
        bus.publish("tick", serde_json::json!({"n": 1}));
    }

    #[test]
    fn drop_oldest_evicts_first_item_when_full() {
        let bus = EventBus::new(2);
        let q = bus.subscribe("tick", "consumer_a");
        bus.publish("tick", serde_json::json!({"n": 1}));
        bus.publish("tick", serde_json::json!({"n": 2}));
        bus.publish("tick", serde_json::json!({"n": 3}));
        assert_eq!(q.len(), 2);
        assert_eq!(q.try_recv().unwrap()["n"], 2);
        assert_eq!(q.try_recv().unwrap()["n"], 3);
    }

    #[test]
    fn subscribers_on_different_topics_are_isolated() {
        let bus = EventBus::new(10);
        let q_tick = bus.subscribe("tick", "a");
        let q_candle = bus.subscribe("candle", "b");
        bus.publish("tick", serde_json::json!({"kind": "tick"}));
        assert!(q_tick.try_recv().is_some());
        assert!(q_candle.try_recv().is_none());
    }

    #[test]
    fn unsubscribe_all_for_topic_removes_only_that_topic() {
        let bus = EventBus::new(10);
        let q_tick = bus.subscribe("tick", "a");
        let q_candle = bus.subscribe("candle", "b");
        bus.unsubscribe_all(Some("tick"));
        bus.publish("tick", serde_json::json!({"n": 1}));
        bus.publish("candle", serde_json::json!({"n": 1}));
        assert!(q_tick.try_recv().is_none());
        assert!(q_candle.try_recv().is_some());
    }

    #[test]
    fn multiple_subscribers_each_get_their_own_copy() {
        let bus = EventBus::new(10);
        let q1 = bus.subscribe("signal", "a");
        let q2 = bus.subscribe("signal", "b");
        bus.publish("signal", serde_json::json!({"id": "s1"}));
        assert!(q1.try_recv().is_some());
        assert!(q2.try_recv().is_some());
    }
}
