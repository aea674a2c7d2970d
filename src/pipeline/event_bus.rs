//! In-process publish/subscribe for pipeline stage progress.
//!
//! Grounded in the teacher's `llm::scheduler` single-writer channel
//! discipline, generalized from one request/response `oneshot` pair to a
//! fan-out `Vec` of per-subscriber queues. Unlike a plain bounded
//! `tokio::sync::mpsc`, a full subscriber queue here drops its OLDEST
//! queued event rather than blocking the publisher or applying
//! backpressure — per §9 the pipeline object is authoritative for state,
//! so a dropped event is never a correctness problem, only a missed
//! progress tick.

use crate::config::defaults::EVENT_CHANNEL_CAPACITY;
use crate::types::{PipelineId, StageId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use tokio::sync::Notify;

/// The fixed event taxonomy from spec §4.6.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventKind {
    StageStarted,
    StageProgress,
    StageCompleted,
    StageFailed,
    PipelineStarted,
    PipelineCompleted,
    PipelineFailed,
}

/// Payload carried alongside the event envelope; most kinds carry none.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum EventPayload {
    Progress { progress: f64, details: Option<String> },
    Error { message: String },
    None,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineEvent {
    pub kind: EventKind,
    pub pipeline_id: PipelineId,
    pub stage_id: Option<StageId>,
    pub timestamp: DateTime<Utc>,
    pub payload: EventPayload,
}

impl PipelineEvent {
    pub fn new(kind: EventKind, pipeline_id: PipelineId, stage_id: Option<StageId>, timestamp: DateTime<Utc>) -> Self {
        Self { kind, pipeline_id, stage_id, timestamp, payload: EventPayload::None }
    }

    pub fn with_payload(mut self, payload: EventPayload) -> Self {
        self.payload = payload;
        self
    }
}

struct Queue {
    events: Mutex<VecDeque<PipelineEvent>>,
    closed: Mutex<bool>,
    notify: Notify,
}

/// A subscriber's drop-oldest bounded queue. Cloneable and cheap to hand
/// out; the coordinator never mutates a subscriber's queue directly, only
/// through [`EventBus::publish`].
#[derive(Clone)]
pub struct EventSubscriber {
    queue: Arc<Queue>,
}

impl EventSubscriber {
    fn push(&self, event: PipelineEvent) {
        let mut events = self.queue.events.lock().unwrap_or_else(|e| e.into_inner());
        if events.len() >= EVENT_CHANNEL_CAPACITY {
            events.pop_front();
        }
        events.push_back(event);
        drop(events);
        self.queue.notify.notify_one();
    }

    fn close(&self) {
        *self.queue.closed.lock().unwrap_or_else(|e| e.into_inner()) = true;
        self.queue.notify.notify_one();
    }

    /// Await the next event, in publish order. Returns `None` only once the
    /// bus that fed this subscriber has been dropped and no event remains
    /// queued.
    pub async fn recv(&mut self) -> Option<PipelineEvent> {
        loop {
            {
                let mut events = self.queue.events.lock().unwrap_or_else(|e| e.into_inner());
                if let Some(event) = events.pop_front() {
                    return Some(event);
                }
                if *self.queue.closed.lock().unwrap_or_else(|e| e.into_inner()) {
                    return None;
                }
            }
            self.queue.notify.notified().await;
        }
    }

    /// Drain whatever is queued right now without waiting, oldest first.
    pub fn drain(&mut self) -> Vec<PipelineEvent> {
        let mut events = self.queue.events.lock().unwrap_or_else(|e| e.into_inner());
        events.drain(..).collect()
    }
}

/// In-process publish/subscribe bus owned by the pipeline coordinator for
/// the lifetime of one run. Subscribers receive immutable event payloads
/// and cannot mutate the pipeline through this handle.
#[derive(Default)]
pub struct EventBus {
    subscribers: Vec<EventSubscriber>,
}

impl EventBus {
    pub fn new() -> Self {
        Self { subscribers: Vec::new() }
    }

    pub fn subscribe(&mut self) -> EventSubscriber {
        let sub = EventSubscriber {
            queue: Arc::new(Queue { events: Mutex::new(VecDeque::new()), closed: Mutex::new(false), notify: Notify::new() }),
        };
        self.subscribers.push(sub.clone());
        sub
    }

    /// Deliver `event` to every subscriber. At-most-once per subscriber;
    /// never blocks.
    pub fn publish(&self, event: PipelineEvent) {
        for sub in &self.subscribers {
            sub.push(event.clone());
        }
    }
}

impl Drop for EventBus {
    /// Wakes every subscriber still parked in `recv` so it can observe the
    /// queue is closed instead of waiting forever on an event that will
    /// never come.
    fn drop(&mut self) {
        for sub in &self.subscribers {
            sub.close();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn event(kind: EventKind) -> PipelineEvent {
        PipelineEvent::new(kind, Uuid::new_v4(), Some(StageId::Validation), Utc::now())
    }

    #[tokio::test]
    async fn subscriber_receives_in_publish_order() {
        let mut bus = EventBus::new();
        let mut sub = bus.subscribe();
        bus.publish(event(EventKind::StageStarted));
        bus.publish(event(EventKind::StageProgress));
        bus.publish(event(EventKind::StageCompleted));

        assert_eq!(sub.recv().await.unwrap().kind, EventKind::StageStarted);
        assert_eq!(sub.recv().await.unwrap().kind, EventKind::StageProgress);
        assert_eq!(sub.recv().await.unwrap().kind, EventKind::StageCompleted);
    }

    #[tokio::test]
    async fn late_subscriber_misses_earlier_events() {
        let mut bus = EventBus::new();
        bus.publish(event(EventKind::PipelineStarted));
        let mut sub = bus.subscribe();
        bus.publish(event(EventKind::PipelineCompleted));
        assert_eq!(sub.recv().await.unwrap().kind, EventKind::PipelineCompleted);
    }

    #[tokio::test]
    async fn recv_returns_none_after_bus_dropped_and_drained() {
        let mut bus = EventBus::new();
        let mut sub = bus.subscribe();
        bus.publish(event(EventKind::PipelineStarted));
        drop(bus);

        assert_eq!(sub.recv().await.unwrap().kind, EventKind::PipelineStarted);
        assert!(sub.recv().await.is_none());
    }

    #[test]
    fn full_queue_drops_oldest_not_newest() {
        let mut bus = EventBus::new();
        let mut sub = bus.subscribe();
        for _ in 0..(EVENT_CHANNEL_CAPACITY + 5) {
            bus.publish(event(EventKind::StageProgress));
        }
        bus.publish(event(EventKind::StageCompleted));
        let drained = sub.drain();
        assert_eq!(drained.len(), EVENT_CHANNEL_CAPACITY);
        assert_eq!(drained.last().unwrap().kind, EventKind::StageCompleted);
    }
}
