// crates/server/src/events.rs
//! Project-scoped SSE fan-out.
//!
//! Subscribers get a bounded mpsc queue each; publishing is non-blocking
//! (`try_send`) and drop-on-full, so a stalled browser tab can never stall a
//! pipeline handler. Delivery is best-effort by design.

use std::collections::HashMap;
use std::sync::Mutex;

use serde_json::Value;
use tokio::sync::mpsc;

/// Queue depth per subscriber. Progress events are small; a subscriber this
/// far behind is effectively gone.
const SUBSCRIBER_QUEUE_DEPTH: usize = 64;

/// One outbound SSE record.
#[derive(Debug, Clone)]
pub struct ProjectEvent {
    pub event: String,
    pub data: Value,
}

/// Handle returned by `subscribe`; dropping the receiver unregisters the
/// subscriber lazily on the next publish.
pub struct Subscription {
    pub receiver: mpsc::Receiver<ProjectEvent>,
}

/// Process-wide subscriber registry keyed by project id.
#[derive(Default)]
pub struct EventBroadcaster {
    subscribers: Mutex<HashMap<String, Vec<mpsc::Sender<ProjectEvent>>>>,
}

impl EventBroadcaster {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self, project_id: &str) -> Subscription {
        let (tx, rx) = mpsc::channel(SUBSCRIBER_QUEUE_DEPTH);
        let mut map = self.subscribers.lock().expect("subscriber map lock");
        map.entry(project_id.to_string()).or_default().push(tx);
        Subscription { receiver: rx }
    }

    /// Deliver an event to every live subscriber of the project. The payload
    /// is stamped with `project_id`. Full or closed queues drop the event.
    pub fn publish(&self, project_id: &str, event: &str, mut data: Value) {
        if let Value::Object(ref mut map) = data {
            map.insert("project_id".into(), Value::String(project_id.to_string()));
        }

        let mut map = self.subscribers.lock().expect("subscriber map lock");
        let Some(senders) = map.get_mut(project_id) else {
            return;
        };

        senders.retain(|sender| {
            match sender.try_send(ProjectEvent {
                event: event.to_string(),
                data: data.clone(),
            }) {
                Ok(()) => true,
                Err(mpsc::error::TrySendError::Full(_)) => {
                    tracing::warn!(project_id, event, "subscriber queue full, dropping event");
                    true
                }
                Err(mpsc::error::TrySendError::Closed(_)) => false,
            }
        });

        if senders.is_empty() {
            map.remove(project_id);
        }
    }

    pub fn subscriber_count(&self, project_id: &str) -> usize {
        self.subscribers
            .lock()
            .expect("subscriber map lock")
            .get(project_id)
            .map(|v| v.len())
            .unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn events_reach_only_the_projects_subscribers() {
        let broadcaster = EventBroadcaster::new();
        let mut sub_a = broadcaster.subscribe("a");
        let mut sub_b = broadcaster.subscribe("b");

        broadcaster.publish("a", "link_updated", json!({ "url": "https://example.test" }));

        let event = sub_a.receiver.recv().await.unwrap();
        assert_eq!(event.event, "link_updated");
        assert_eq!(event.data["project_id"], "a");
        assert!(sub_b.receiver.try_recv().is_err());
    }

    #[tokio::test]
    async fn same_subscriber_sees_emission_order() {
        let broadcaster = EventBroadcaster::new();
        let mut sub = broadcaster.subscribe("p");

        for i in 0..5 {
            broadcaster.publish("p", "job_status_update", json!({ "seq": i }));
        }
        for i in 0..5 {
            let event = sub.receiver.recv().await.unwrap();
            assert_eq!(event.data["seq"], i);
        }
    }

    #[tokio::test]
    async fn dropped_subscribers_are_pruned_on_publish() {
        let broadcaster = EventBroadcaster::new();
        let sub = broadcaster.subscribe("p");
        assert_eq!(broadcaster.subscriber_count("p"), 1);

        drop(sub);
        broadcaster.publish("p", "ping", json!({}));
        assert_eq!(broadcaster.subscriber_count("p"), 0);
    }

    #[tokio::test]
    async fn full_queue_drops_event_but_keeps_subscriber() {
        let broadcaster = EventBroadcaster::new();
        let mut sub = broadcaster.subscribe("p");

        for i in 0..(SUBSCRIBER_QUEUE_DEPTH + 10) {
            broadcaster.publish("p", "job_status_update", json!({ "seq": i }));
        }
        assert_eq!(broadcaster.subscriber_count("p"), 1);

        // The queue holds the first SUBSCRIBER_QUEUE_DEPTH events; the rest
        // were dropped, not queued out of order.
        let first = sub.receiver.recv().await.unwrap();
        assert_eq!(first.data["seq"], 0);
    }
}
