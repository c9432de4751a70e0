//! Per-session event bus: the bounded log plus the live broadcast set.

use std::collections::HashMap;
use std::sync::Mutex;

use tokio::sync::mpsc::UnboundedSender;
use uuid::Uuid;

use frontdesk_core::events::{EventDraft, EventLog, EventType, SessionEvent};

pub type ConnectionId = Uuid;

struct BusInner {
    log: EventLog,
    connections: HashMap<ConnectionId, UnboundedSender<String>>,
}

/// One bus per session. The id counter and ring buffer live here, scoped to
/// the session; emission assigns ordering and broadcasts under one lock, so
/// no two events can ever reach a connection out of id order.
pub struct EventBus {
    inner: Mutex<BusInner>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(BusInner {
                log: EventLog::new(capacity),
                connections: HashMap::new(),
            }),
        }
    }

    pub fn register(&self, sender: UnboundedSender<String>) -> ConnectionId {
        let connection_id = Uuid::new_v4();
        self.inner.lock().expect("bus lock poisoned").connections.insert(connection_id, sender);
        connection_id
    }

    pub fn unregister(&self, connection_id: ConnectionId) {
        self.inner.lock().expect("bus lock poisoned").connections.remove(&connection_id);
    }

    /// Record the event and fan it out. A connection whose send fails is
    /// dead and gets pruned on the spot; there is no retry.
    pub fn emit(&self, event_type: EventType, draft: EventDraft) -> SessionEvent {
        let mut inner = self.inner.lock().expect("bus lock poisoned");
        let event = inner.log.record(event_type, draft);

        match serde_json::to_string(&event) {
            Ok(payload) => {
                inner.connections.retain(|connection_id, sender| {
                    let alive = sender.send(payload.clone()).is_ok();
                    if !alive {
                        tracing::debug!(
                            event_name = "bus.connection_pruned",
                            connection_id = %connection_id,
                        );
                    }
                    alive
                });
            }
            Err(error) => {
                tracing::error!(event_name = "bus.serialize_failed", error = %error);
            }
        }
        event
    }

    pub fn events_since(&self, last_event_id: Option<u64>) -> (Vec<SessionEvent>, bool) {
        self.inner.lock().expect("bus lock poisoned").log.since(last_event_id)
    }

    pub fn last_event_id(&self) -> u64 {
        self.inner.lock().expect("bus lock poisoned").log.last_event_id()
    }

    pub fn connection_count(&self) -> usize {
        self.inner.lock().expect("bus lock poisoned").connections.len()
    }
}
