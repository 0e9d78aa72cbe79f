//! Event-store collaborator.
//!
//! The backing store appends room events and stamps each one with a
//! room-scoped, strictly increasing `sequence_number`. It is the only state
//! shared between sessions; everything else is local.

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// Who performed an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PerformerType {
    Counselor,
    #[default]
    Visitor,
    System,
}

/// An event as submitted to the store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewRoomEvent {
    pub room_id: String,
    pub event_type: String,
    pub card_id: Option<String>,
    pub event_data: Option<Value>,
    pub performer_id: Option<String>,
    pub performer_type: PerformerType,
    pub performer_name: Option<String>,
    pub notes: Option<String>,
}

impl NewRoomEvent {
    pub fn new(room_id: impl Into<String>, event_type: impl Into<String>) -> Self {
        Self {
            room_id: room_id.into(),
            event_type: event_type.into(),
            card_id: None,
            event_data: None,
            performer_id: None,
            performer_type: PerformerType::default(),
            performer_name: None,
            notes: None,
        }
    }

    pub fn with_card(mut self, card_id: impl Into<String>) -> Self {
        self.card_id = Some(card_id.into());
        self
    }

    pub fn with_data(mut self, data: Value) -> Self {
        self.event_data = Some(data);
        self
    }

    pub fn with_performer(mut self, performer: &Performer) -> Self {
        self.performer_id = performer.id.clone();
        self.performer_type = performer.kind;
        self.performer_name = performer.name.clone();
        self
    }
}

/// Identity stamped onto events a session submits.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Performer {
    pub id: Option<String>,
    pub kind: PerformerType,
    pub name: Option<String>,
}

impl Performer {
    pub fn new(id: impl Into<String>, kind: PerformerType, name: impl Into<String>) -> Self {
        Self {
            id: Some(id.into()),
            kind,
            name: Some(name.into()),
        }
    }
}

/// A confirmed event returned by the store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoomEvent {
    pub id: i64,
    pub room_id: String,
    pub event_type: String,
    pub card_id: Option<String>,
    #[serde(default)]
    pub event_data: Option<Value>,
    pub performer_id: Option<String>,
    pub performer_type: PerformerType,
    pub performer_name: Option<String>,
    pub notes: Option<String>,
    pub sequence_number: u64,
    pub created_at: DateTime<Utc>,
}

/// Store errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    #[error("Event store unavailable: {0}")]
    Unavailable(String),

    #[error("Event rejected: {0}")]
    Rejected(String),

    #[error("Storage I/O error: {0}")]
    Io(String),

    #[error("Stored data is malformed: {0}")]
    Malformed(String),
}

/// Append/poll contract of the remote event store.
#[allow(async_fn_in_trait)]
pub trait EventStore {
    /// Append an event; the store assigns `id`, `sequence_number` and `created_at`.
    async fn create_event(&self, event: NewRoomEvent) -> Result<RoomEvent, StoreError>;

    /// The newest `limit` events for a room, in any order.
    async fn get_latest_events(&self, room_id: &str, limit: usize)
        -> Result<Vec<RoomEvent>, StoreError>;
}

#[derive(Debug, Default)]
struct MemoryStoreInner {
    events: Vec<RoomEvent>,
    next_id: i64,
    sequences: HashMap<String, u64>,
    fail_creates: usize,
}

/// In-process event store with per-room sequence numbers.
///
/// Clones share the same log, so several sessions can append to and poll
/// one store.
#[derive(Debug, Clone, Default)]
pub struct MemoryEventStore {
    inner: Rc<RefCell<MemoryStoreInner>>,
}

impl MemoryEventStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `count` `create_event` calls fail.
    pub fn fail_next_creates(&self, count: usize) {
        self.inner.borrow_mut().fail_creates = count;
    }

    /// Total events stored across all rooms.
    pub fn len(&self) -> usize {
        self.inner.borrow().events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Events for a room in sequence order.
    pub fn events_for(&self, room_id: &str) -> Vec<RoomEvent> {
        let mut events: Vec<RoomEvent> = self
            .inner
            .borrow()
            .events
            .iter()
            .filter(|e| e.room_id == room_id)
            .cloned()
            .collect();
        events.sort_by_key(|e| e.sequence_number);
        events
    }
}

impl EventStore for MemoryEventStore {
    async fn create_event(&self, event: NewRoomEvent) -> Result<RoomEvent, StoreError> {
        let mut inner = self.inner.borrow_mut();
        if inner.fail_creates > 0 {
            inner.fail_creates -= 1;
            return Err(StoreError::Unavailable("injected failure".into()));
        }

        inner.next_id += 1;
        let id = inner.next_id;
        let sequence = inner.sequences.entry(event.room_id.clone()).or_insert(0);
        *sequence += 1;
        let sequence_number = *sequence;

        let stored = RoomEvent {
            id,
            room_id: event.room_id,
            event_type: event.event_type,
            card_id: event.card_id,
            event_data: event.event_data,
            performer_id: event.performer_id,
            performer_type: event.performer_type,
            performer_name: event.performer_name,
            notes: event.notes,
            sequence_number,
            created_at: Utc::now(),
        };
        inner.events.push(stored.clone());
        Ok(stored)
    }

    async fn get_latest_events(
        &self,
        room_id: &str,
        limit: usize,
    ) -> Result<Vec<RoomEvent>, StoreError> {
        let mut events = self.events_for(room_id);
        let skip = events.len().saturating_sub(limit);
        // Newest first, like a `created_at DESC` query
        let mut latest = events.split_off(skip);
        latest.reverse();
        Ok(latest)
    }
}
