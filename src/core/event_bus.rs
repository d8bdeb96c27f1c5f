//! Lifecycle events
//!
//! Publishing never waits on consumers: events go out on a broadcast channel
//! (a lagging receiver loses the oldest events, the publisher never blocks)
//! and into a bounded history kept for diagnostics.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::{broadcast, Mutex};
use uuid::Uuid;

const DEFAULT_HISTORY: usize = 1000;
const DEFAULT_CHANNEL: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventType {
    SystemStarted,
    SystemShutdown,

    RuleHandlerStarted,
    RuleHandlerFinished,
    RuleHandlerFailed,
    RuleHandlerAborted,

    CollectionMediaAdded,
    CollectionMediaRemoved,
    CollectionMediaHandled,

    QueueStatusUpdated,
}

/// Who caused an event
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum EventSource {
    System,
    User(String),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub id: String,
    /// Position in publish order, assigned by the bus
    pub sequence: u64,
    pub event_type: EventType,
    pub timestamp: DateTime<Utc>,
    pub source: EventSource,
    pub data: Value,
}

impl Event {
    pub fn new(event_type: EventType, source: EventSource, data: Value) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            sequence: 0,
            event_type,
            timestamp: Utc::now(),
            source,
            data,
        }
    }

    pub fn system(event_type: EventType, data: Value) -> Self {
        Self::new(event_type, EventSource::System, data)
    }

    /// Event about one rule group; the id is merged into an object payload,
    /// any other payload is wrapped under `detail`
    pub fn rule_handler(event_type: EventType, rule_group_id: i64, data: Value) -> Self {
        let data = match data {
            Value::Object(mut map) => {
                map.insert("rule_group_id".to_string(), Value::from(rule_group_id));
                Value::Object(map)
            }
            other => json!({ "rule_group_id": rule_group_id, "detail": other }),
        };
        Self::system(event_type, data)
    }

    pub fn rule_group_id(&self) -> Option<i64> {
        self.data.get("rule_group_id").and_then(Value::as_i64)
    }
}

/// Selects events from the history; unset fields match everything
#[derive(Debug, Clone, Default)]
pub struct EventFilter {
    pub event_types: Option<Vec<EventType>>,
    pub rule_group_id: Option<i64>,
    pub after_sequence: Option<u64>,
    pub limit: Option<usize>,
}

impl EventFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_event_types(mut self, event_types: Vec<EventType>) -> Self {
        self.event_types = Some(event_types);
        self
    }

    pub fn with_rule_group(mut self, rule_group_id: i64) -> Self {
        self.rule_group_id = Some(rule_group_id);
        self
    }

    /// Only events published after `sequence`, for resuming a feed
    pub fn after(mut self, sequence: u64) -> Self {
        self.after_sequence = Some(sequence);
        self
    }

    /// Keep only the most recent `limit` events
    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    fn matches(&self, event: &Event) -> bool {
        self.event_types
            .as_ref()
            .map_or(true, |types| types.contains(&event.event_type))
            && self
                .rule_group_id
                .map_or(true, |id| event.rule_group_id() == Some(id))
            && self.after_sequence.map_or(true, |seq| event.sequence > seq)
    }
}

pub struct EventBus {
    tx: broadcast::Sender<Event>,
    history: Mutex<VecDeque<Event>>,
    history_capacity: usize,
    sequence: AtomicU64,
}

impl EventBus {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_HISTORY, DEFAULT_CHANNEL)
    }

    pub fn with_capacity(history_capacity: usize, channel_capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(channel_capacity.max(1));
        Self {
            tx,
            history: Mutex::new(VecDeque::with_capacity(history_capacity.max(1))),
            history_capacity: history_capacity.max(1),
            sequence: AtomicU64::new(0),
        }
    }

    /// Receive every event published from now on
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.tx.subscribe()
    }

    pub fn receiver_count(&self) -> usize {
        self.tx.receiver_count()
    }

    pub async fn publish(&self, mut event: Event) {
        event.sequence = self.sequence.fetch_add(1, Ordering::Relaxed) + 1;
        tracing::debug!(
            event_type = ?event.event_type,
            sequence = event.sequence,
            rule_group_id = ?event.rule_group_id(),
            "Publishing event"
        );

        {
            let mut history = self.history.lock().await;
            if history.len() == self.history_capacity {
                history.pop_front();
            }
            history.push_back(event.clone());
        }

        // no receivers is not an error
        let _ = self.tx.send(event);
    }

    /// Matching events, oldest first
    pub async fn get_history(&self, filter: EventFilter) -> Vec<Event> {
        let history = self.history.lock().await;
        let mut events: Vec<Event> = history.iter().filter(|e| filter.matches(e)).cloned().collect();

        if let Some(limit) = filter.limit {
            let skip = events.len().saturating_sub(limit);
            events.drain(..skip);
        }
        events
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}
