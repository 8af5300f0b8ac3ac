use crate::state::TaskState;
use crate::{Error, Map, PodId, Result, Set, TaskId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::Mutex;

/// State change of one pod, reported by the host-agent adapter.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PodEvent {
    pub pod_id: PodId,
    pub task_id: TaskId,
    pub actual_state: TaskState,
    pub desired_state: TaskState,
    pub hostname: String,
    pub message: String,
    pub timestamp: DateTime<Utc>,
}

/// A pod event as it sits in the stream.
///
/// Offsets grow strictly monotonically per stream. The event id is minted
/// by the producer and stays stable across redelivery, which is what lets
/// consumers deduplicate.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Event {
    pub offset: u64,
    pub event_id: String,
    pub payload: PodEvent,
}

struct Cursor {
    next: u64,
    acked: Option<u64>,
}

struct StreamInner {
    events: VecDeque<Event>,
    first_offset: u64,
    next_offset: u64,
    consumers: Map<String, Cursor>,
}

/// Append-only, in-process log of pod events with per-consumer cursors.
///
/// Consumers poll in offset order and acknowledge a high-water mark; the
/// producer may purge everything at or below the lowest acknowledged offset
/// across all consumers.
pub struct EventStream {
    name: String,
    inner: Mutex<StreamInner>,
}

impl EventStream {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            inner: Mutex::new(StreamInner {
                events: VecDeque::new(),
                first_offset: 0,
                next_offset: 0,
                consumers: Map::default(),
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Appends an event; returns the offset it was assigned.
    pub fn publish(&self, event_id: impl Into<String>, payload: PodEvent) -> u64 {
        let mut inner = self.inner.lock().unwrap();
        let offset = inner.next_offset;
        inner.next_offset += 1;
        inner.events.push_back(Event {
            offset,
            event_id: event_id.into(),
            payload,
        });
        offset
    }

    /// Registers a consumer starting at the oldest retained event.
    pub fn subscribe(&self, consumer: impl Into<String>) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        let consumer = consumer.into();
        if inner.consumers.contains_key(&consumer) {
            return Err(Error::already_exists(format!(
                "consumer {consumer} already subscribed to stream {}",
                self.name
            )));
        }
        let next = inner.first_offset;
        inner.consumers.insert(
            consumer,
            Cursor {
                next,
                acked: None,
            },
        );
        Ok(())
    }

    pub fn unsubscribe(&self, consumer: &str) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        inner
            .consumers
            .remove(consumer)
            .map(|_| ())
            .ok_or_else(|| Error::not_found(format!("consumer {consumer} not subscribed")))
    }

    /// Returns up to `max` events in offset order and advances the cursor.
    pub fn poll(&self, consumer: &str, max: usize) -> Result<Vec<Event>> {
        if max == 0 {
            return Err(Error::invalid_argument("poll limit must be greater than zero"));
        }
        let mut inner = self.inner.lock().unwrap();
        let first_offset = inner.first_offset;
        let cursor = inner
            .consumers
            .get_mut(consumer)
            .ok_or_else(|| Error::not_found(format!("consumer {consumer} not subscribed")))?;
        // A cursor below the retention window can only happen after a purge
        // raced the consumer; resume at the oldest retained event.
        if cursor.next < first_offset {
            cursor.next = first_offset;
        }
        let start = (cursor.next - first_offset) as usize;
        let from = cursor.next;
        let events: Vec<Event> = inner
            .events
            .iter()
            .skip(start)
            .take(max)
            .cloned()
            .collect();
        if let Some(last) = events.last() {
            let next = last.offset + 1;
            inner
                .consumers
                .get_mut(consumer)
                .expect("consumer disappeared under the lock")
                .next = next;
            log::debug!(
                "stream {}: consumer {consumer} polled offsets {from}..{next}",
                self.name
            );
        }
        Ok(events)
    }

    /// Moves a consumer's cursor back for redelivery; events keep their
    /// offsets and event ids.
    pub fn rewind(&self, consumer: &str, offset: u64) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        let first_offset = inner.first_offset;
        let cursor = inner
            .consumers
            .get_mut(consumer)
            .ok_or_else(|| Error::not_found(format!("consumer {consumer} not subscribed")))?;
        cursor.next = offset.max(first_offset);
        Ok(())
    }

    /// Acknowledges everything at or below `offset` for the consumer.
    pub fn ack(&self, consumer: &str, offset: u64) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        let cursor = inner
            .consumers
            .get_mut(consumer)
            .ok_or_else(|| Error::not_found(format!("consumer {consumer} not subscribed")))?;
        cursor.acked = Some(cursor.acked.map_or(offset, |acked| acked.max(offset)));
        Ok(())
    }

    /// Drops events every consumer has acknowledged; returns how many were
    /// dropped. A consumer that never acked pins the stream.
    pub fn purge(&self) -> usize {
        let mut inner = self.inner.lock().unwrap();
        if inner.consumers.is_empty() {
            return 0;
        }
        let mut min_acked: Option<u64> = None;
        for cursor in inner.consumers.values() {
            match cursor.acked {
                // A consumer that never acked pins everything.
                None => return 0,
                Some(acked) => min_acked = Some(min_acked.map_or(acked, |m| m.min(acked))),
            }
        }
        let Some(min_acked) = min_acked else {
            return 0;
        };
        let mut dropped = 0;
        while inner
            .events
            .front()
            .map(|event| event.offset <= min_acked)
            .unwrap_or(false)
        {
            inner.events.pop_front();
            dropped += 1;
        }
        inner.first_offset = min_acked + 1;
        if dropped > 0 {
            log::debug!("stream {}: purged {dropped} events", self.name);
        }
        dropped
    }

    pub fn len(&self) -> usize {
        self.inner.lock().unwrap().events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().unwrap().events.is_empty()
    }
}

/// Gives a consumer exactly-once effect over an at-least-once stream by
/// keying on the producer-stable event id.
#[derive(Default)]
pub struct DedupFilter {
    seen: Set<String>,
}

impl DedupFilter {
    pub fn new() -> Self {
        Self::default()
    }

    /// True the first time an event id is seen, false on redelivery.
    pub fn accept(&mut self, event: &Event) -> bool {
        self.seen.insert(event.event_id.clone())
    }
}
