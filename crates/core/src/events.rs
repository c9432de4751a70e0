use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    Token,
    Status,
    Final,
    Error,
    Resync,
    Speaking,
    ToolCall,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventRole {
    Assistant,
    System,
}

/// One broadcast event. `id` and `seq` carry the same per-session counter,
/// assigned at emission time; `id` is the ordering key clients resync on.
/// Immutable once emitted.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SessionEvent {
    pub id: u64,
    pub seq: u64,
    #[serde(rename = "type")]
    pub event_type: EventType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(rename = "turnId", skip_serializing_if = "Option::is_none")]
    pub turn_id: Option<u64>,
    #[serde(rename = "messageId", skip_serializing_if = "Option::is_none")]
    pub message_id: Option<Uuid>,
    pub role: EventRole,
    #[serde(rename = "correlationId", skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<String>,
    pub at: DateTime<Utc>,
}

/// Everything an emitter supplies; the log fills in `id`/`seq`/`at`.
#[derive(Clone, Debug, Default)]
pub struct EventDraft {
    pub text: Option<String>,
    pub data: Option<Value>,
    pub turn_id: Option<u64>,
    pub message_id: Option<Uuid>,
    pub role: Option<EventRole>,
    pub correlation_id: Option<String>,
}

impl EventDraft {
    pub fn text(text: impl Into<String>) -> Self {
        Self { text: Some(text.into()), ..Self::default() }
    }

    pub fn with_data(mut self, data: Value) -> Self {
        self.data = Some(data);
        self
    }

    pub fn with_turn(mut self, turn_id: u64, message_id: Uuid) -> Self {
        self.turn_id = Some(turn_id);
        self.message_id = Some(message_id);
        self
    }

    pub fn with_role(mut self, role: EventRole) -> Self {
        self.role = Some(role);
        self
    }

    pub fn with_correlation_id(mut self, correlation_id: impl Into<String>) -> Self {
        self.correlation_id = Some(correlation_id.into());
        self
    }
}

/// Bounded per-session event history. Oldest events are dropped once the
/// capacity is exceeded, which makes old resync requests necessarily partial.
#[derive(Debug)]
pub struct EventLog {
    capacity: usize,
    next_id: u64,
    events: VecDeque<SessionEvent>,
}

impl EventLog {
    pub fn new(capacity: usize) -> Self {
        Self { capacity: capacity.max(1), next_id: 1, events: VecDeque::new() }
    }

    /// Assign the next id/seq and retain the event in the ring buffer.
    pub fn record(&mut self, event_type: EventType, draft: EventDraft) -> SessionEvent {
        let id = self.next_id;
        self.next_id += 1;

        let event = SessionEvent {
            id,
            seq: id,
            event_type,
            text: draft.text,
            data: draft.data,
            turn_id: draft.turn_id,
            message_id: draft.message_id,
            role: draft.role.unwrap_or(EventRole::Assistant),
            correlation_id: draft.correlation_id,
            at: Utc::now(),
        };

        if self.events.len() == self.capacity {
            self.events.pop_front();
        }
        self.events.push_back(event.clone());
        event
    }

    /// Buffered events with `id > last_event_id`, in emission order. The
    /// second value is true when the requested id predates the oldest
    /// retained event: some history may be missing, which callers must treat
    /// as a partial resync rather than an error.
    pub fn since(&self, last_event_id: Option<u64>) -> (Vec<SessionEvent>, bool) {
        let floor = last_event_id.unwrap_or(0);
        let gap = match self.events.front() {
            Some(oldest) => floor + 1 < oldest.id,
            None => floor + 1 < self.next_id,
        };
        let events =
            self.events.iter().filter(|event| event.id > floor).cloned().collect::<Vec<_>>();
        (events, gap)
    }

    pub fn last_event_id(&self) -> u64 {
        self.next_id - 1
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }
}
