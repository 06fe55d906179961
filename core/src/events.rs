//! In-process job event bus
//!
//! Every committed job change is published once. Subscribers register a
//! filter and receive matching events through their own bounded queue; a
//! full queue drops its oldest event instead of blocking the publisher.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use tokio::sync::Notify;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::types::{Job, JobStatus};

/// Default number of undelivered events kept per subscriber
pub const DEFAULT_QUEUE_CAPACITY: usize = 256;

/// Kind of change that produced an event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventAction {
    Create,
    UpdateStatus,
    UpdateDefinition,
    AddTags,
    DeleteTags,
    Delete,
}

impl EventAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Create => "CREATE",
            Self::UpdateStatus => "UPDATE_STATUS",
            Self::UpdateDefinition => "UPDATE_DEFINITION",
            Self::AddTags => "ADD_TAGS",
            Self::DeleteTags => "DELETE_TAGS",
            Self::Delete => "DELETE",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "CREATE" => Some(Self::Create),
            "UPDATE_STATUS" => Some(Self::UpdateStatus),
            "UPDATE_DEFINITION" => Some(Self::UpdateDefinition),
            "ADD_TAGS" => Some(Self::AddTags),
            "DELETE_TAGS" => Some(Self::DeleteTags),
            "DELETE" => Some(Self::Delete),
            _ => None,
        }
    }
}

/// Immutable record of one committed job change
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobEvent {
    pub action: EventAction,
    pub job_id: String,
    pub client_id: String,
    pub workflow: String,
    pub tags: Vec<String>,
    pub new_status: JobStatus,
    pub timestamp: DateTime<Utc>,
}

impl JobEvent {
    pub fn from_job(action: EventAction, job: &Job) -> Self {
        Self {
            action,
            job_id: job.id.clone(),
            client_id: job.client_id.clone(),
            workflow: job.workflow.name.clone(),
            tags: job.tags.clone(),
            new_status: job.status.clone(),
            timestamp: Utc::now(),
        }
    }
}

/// Subscription filter.
///
/// Populated dimensions are combined with AND, values within a dimension
/// with OR. An empty filter matches everything.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EventFilter {
    pub job_ids: HashSet<String>,
    pub client_ids: HashSet<String>,
    pub workflows: HashSet<String>,
    pub tags: HashSet<String>,
    pub actions: HashSet<EventAction>,
}

impl EventFilter {
    pub fn is_empty(&self) -> bool {
        self.job_ids.is_empty()
            && self.client_ids.is_empty()
            && self.workflows.is_empty()
            && self.tags.is_empty()
            && self.actions.is_empty()
    }

    pub fn matches(&self, event: &JobEvent) -> bool {
        (self.job_ids.is_empty() || self.job_ids.contains(&event.job_id))
            && (self.client_ids.is_empty() || self.client_ids.contains(&event.client_id))
            && (self.workflows.is_empty() || self.workflows.contains(&event.workflow))
            && (self.tags.is_empty() || event.tags.iter().any(|t| self.tags.contains(t)))
            && (self.actions.is_empty() || self.actions.contains(&event.action))
    }
}

/// Bounded drop-oldest queue owned by one subscriber
struct Queue {
    events: Mutex<VecDeque<JobEvent>>,
    capacity: usize,
    notify: Notify,
    dropped: AtomicU64,
    closed: AtomicBool,
}

impl Queue {
    fn new(capacity: usize) -> Self {
        Self {
            events: Mutex::new(VecDeque::with_capacity(capacity.min(64))),
            capacity: capacity.max(1),
            notify: Notify::new(),
            dropped: AtomicU64::new(0),
            closed: AtomicBool::new(false),
        }
    }

    /// Returns false if the oldest event had to be dropped
    fn push(&self, event: JobEvent) -> bool {
        let mut overflowed = false;
        {
            let mut events = self.events.lock();
            if events.len() >= self.capacity {
                events.pop_front();
                overflowed = true;
            }
            events.push_back(event);
        }
        if overflowed {
            self.dropped.fetch_add(1, Ordering::Relaxed);
        }
        self.notify.notify_one();
        !overflowed
    }

    fn pop(&self) -> Option<JobEvent> {
        self.events.lock().pop_front()
    }

    fn close(&self) {
        self.closed.store(true, Ordering::Release);
        self.notify.notify_one();
    }
}

struct Subscriber {
    filter: EventFilter,
    queue: Arc<Queue>,
}

struct Inner {
    subscribers: DashMap<Uuid, Subscriber>,
    capacity: usize,
}

/// Publish/subscribe hub for job events
///
/// Cheap to clone; all clones share the same subscriber registry.
#[derive(Clone)]
pub struct EventBus {
    inner: Arc<Inner>,
}

impl EventBus {
    /// Create a bus whose subscribers buffer at most `capacity` events
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Arc::new(Inner {
                subscribers: DashMap::new(),
                capacity,
            }),
        }
    }

    /// Deliver `event` to every matching subscriber without waiting on any of them
    pub fn publish(&self, event: JobEvent) {
        let mut delivered = 0usize;
        for entry in self.inner.subscribers.iter() {
            if !entry.filter.matches(&event) {
                continue;
            }
            delivered += 1;
            if !entry.queue.push(event.clone()) {
                warn!(
                    subscriber_id = %entry.key(),
                    job_id = %event.job_id,
                    "Subscriber queue full, dropped oldest event"
                );
            }
        }
        debug!(
            job_id = %event.job_id,
            action = event.action.as_str(),
            delivered,
            "Published job event"
        );
    }

    /// Register a new subscriber
    pub fn subscribe(&self, filter: EventFilter) -> Subscription {
        let id = Uuid::new_v4();
        let queue = Arc::new(Queue::new(self.inner.capacity));
        info!(subscriber_id = %id, ?filter, "Adding subscriber for job events");
        self.inner.subscribers.insert(
            id,
            Subscriber {
                filter,
                queue: queue.clone(),
            },
        );
        Subscription {
            id,
            queue,
            bus: Arc::downgrade(&self.inner),
        }
    }

    /// Stop delivery to `subscription` and release its queue
    pub fn unsubscribe(&self, subscription: Subscription) {
        drop(subscription);
    }

    /// Close every subscription; receivers drain their queue and then end
    pub fn shutdown(&self) {
        info!(count = self.subscriber_count(), "Shutting down subscribers");
        let ids: Vec<Uuid> = self.inner.subscribers.iter().map(|e| *e.key()).collect();
        for id in ids {
            if let Some((_, sub)) = self.inner.subscribers.remove(&id) {
                sub.queue.close();
            }
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.inner.subscribers.len()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_QUEUE_CAPACITY)
    }
}

/// Handle to one subscription; unsubscribes when dropped
pub struct Subscription {
    id: Uuid,
    queue: Arc<Queue>,
    bus: Weak<Inner>,
}

impl Subscription {
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Wait for the next matching event.
    ///
    /// Returns `None` once the bus has closed this subscription and the
    /// queue is drained.
    pub async fn recv(&self) -> Option<JobEvent> {
        loop {
            let notified = self.queue.notify.notified();
            if let Some(event) = self.queue.pop() {
                return Some(event);
            }
            if self.queue.closed.load(Ordering::Acquire) {
                return None;
            }
            notified.await;
        }
    }

    /// Non-blocking variant of [`recv`](Self::recv)
    pub fn try_recv(&self) -> Option<JobEvent> {
        self.queue.pop()
    }

    /// Number of events dropped since the last call
    pub fn take_dropped(&self) -> u64 {
        self.queue.dropped.swap(0, Ordering::Relaxed)
    }

    pub fn is_closed(&self) -> bool {
        self.queue.closed.load(Ordering::Acquire)
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.queue.close();
        if let Some(inner) = self.bus.upgrade() {
            if inner.subscribers.remove(&self.id).is_some() {
                info!(subscriber_id = %self.id, "Removed subscriber");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn event(job_id: &str, client_id: &str, workflow: &str, tags: &[&str], state: &str) -> JobEvent {
        JobEvent {
            action: EventAction::UpdateStatus,
            job_id: job_id.to_string(),
            client_id: client_id.to_string(),
            workflow: workflow.to_string(),
            tags: tags.iter().map(|t| t.to_string()).collect(),
            new_status: JobStatus::initial(state),
            timestamp: Utc::now(),
        }
    }

    fn set(values: &[&str]) -> HashSet<String> {
        values.iter().map(|v| v.to_string()).collect()
    }

    #[test]
    fn test_empty_filter_matches_everything() {
        let filter = EventFilter::default();
        assert!(filter.is_empty());
        assert!(filter.matches(&event("1", "c", "wf", &[], "A")));
    }

    #[test]
    fn test_filter_or_within_and_across() {
        let filter = EventFilter {
            job_ids: set(&["1", "2"]),
            client_ids: set(&["alice"]),
            ..Default::default()
        };
        assert!(filter.matches(&event("1", "alice", "wf", &[], "A")));
        assert!(filter.matches(&event("2", "alice", "wf", &[], "A")));
        assert!(!filter.matches(&event("3", "alice", "wf", &[], "A")));
        assert!(!filter.matches(&event("1", "bob", "wf", &[], "A")));
    }

    #[test]
    fn test_filter_tags_and_actions() {
        let filter = EventFilter {
            tags: set(&["prod", "eu"]),
            actions: [EventAction::UpdateStatus].into_iter().collect(),
            ..Default::default()
        };
        assert!(filter.matches(&event("1", "c", "wf", &["eu", "x"], "A")));
        assert!(!filter.matches(&event("1", "c", "wf", &["us"], "A")));
        assert!(!filter.matches(&event("1", "c", "wf", &[], "A")));

        let mut created = event("1", "c", "wf", &["prod"], "A");
        created.action = EventAction::Create;
        assert!(!filter.matches(&created));
    }

    #[test]
    fn test_event_serialization() {
        let json = serde_json::to_value(event("1", "c", "wf", &["t"], "A")).unwrap();
        assert_eq!(json["action"], "UPDATE_STATUS");
        assert_eq!(json["jobId"], "1");
        assert_eq!(json["clientId"], "c");
        assert_eq!(json["newStatus"]["state"], "A");
    }

    #[tokio::test]
    async fn test_subscriber_receives_only_matching_events() {
        let bus = EventBus::new(16);
        let sub = bus.subscribe(EventFilter {
            workflows: set(&["kanban"]),
            ..Default::default()
        });

        bus.publish(event("1", "c", "other", &[], "A"));
        bus.publish(event("2", "c", "kanban", &[], "B"));

        let received = sub.recv().await.unwrap();
        assert_eq!(received.job_id, "2");
        assert!(sub.try_recv().is_none());
    }

    #[tokio::test]
    async fn test_per_job_order_is_preserved() {
        let bus = EventBus::new(64);
        let sub = bus.subscribe(EventFilter::default());

        for i in 0..20 {
            let job = if i % 2 == 0 { "even" } else { "odd" };
            bus.publish(event(job, "c", "wf", &[], &i.to_string()));
        }

        let mut last: std::collections::HashMap<String, i32> = Default::default();
        while let Some(ev) = sub.try_recv() {
            let n: i32 = ev.new_status.state.parse().unwrap();
            if let Some(prev) = last.insert(ev.job_id.clone(), n) {
                assert!(n > prev, "out of order for {}", ev.job_id);
            }
        }
        assert_eq!(last.len(), 2);
    }

    #[tokio::test]
    async fn test_full_queue_drops_oldest() {
        let bus = EventBus::new(2);
        let sub = bus.subscribe(EventFilter::default());

        bus.publish(event("1", "c", "wf", &[], "A"));
        bus.publish(event("1", "c", "wf", &[], "B"));
        bus.publish(event("1", "c", "wf", &[], "C"));

        assert_eq!(sub.take_dropped(), 1);
        assert_eq!(sub.take_dropped(), 0);
        assert_eq!(sub.recv().await.unwrap().new_status.state, "B");
        assert_eq!(sub.recv().await.unwrap().new_status.state, "C");
    }

    #[tokio::test]
    async fn test_slow_subscriber_does_not_affect_others() {
        let bus = EventBus::new(1);
        let slow = bus.subscribe(EventFilter::default());
        let fast = bus.subscribe(EventFilter::default());

        for state in ["A", "B", "C"] {
            bus.publish(event("1", "c", "wf", &[], state));
            assert_eq!(fast.recv().await.unwrap().new_status.state, state);
        }
        assert_eq!(slow.take_dropped(), 2);
        assert_eq!(slow.recv().await.unwrap().new_status.state, "C");
    }

    #[tokio::test]
    async fn test_recv_waits_for_publish() {
        let bus = EventBus::new(8);
        let sub = bus.subscribe(EventFilter::default());

        let publisher = bus.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            publisher.publish(event("1", "c", "wf", &[], "A"));
        });

        let received = tokio::time::timeout(Duration::from_secs(2), sub.recv())
            .await
            .unwrap();
        assert_eq!(received.unwrap().job_id, "1");
    }

    #[tokio::test]
    async fn test_unsubscribe_releases_subscriber() {
        let bus = EventBus::new(8);
        let sub = bus.subscribe(EventFilter::default());
        let other = bus.subscribe(EventFilter::default());
        assert_eq!(bus.subscriber_count(), 2);

        bus.unsubscribe(sub);
        assert_eq!(bus.subscriber_count(), 1);

        drop(other);
        assert_eq!(bus.subscriber_count(), 0);

        // publishing without subscribers is a no-op
        bus.publish(event("1", "c", "wf", &[], "A"));
    }

    #[tokio::test]
    async fn test_shutdown_closes_after_drain() {
        let bus = EventBus::new(8);
        let sub = bus.subscribe(EventFilter::default());
        bus.publish(event("1", "c", "wf", &[], "A"));

        bus.shutdown();
        assert_eq!(bus.subscriber_count(), 0);
        assert!(sub.is_closed());
        assert!(sub.recv().await.is_some());
        assert!(sub.recv().await.is_none());
    }
}
