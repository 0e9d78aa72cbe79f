//! Card state synchronization.
//!
//! [`CardSyncEngine`] keeps a local cache of per-card visual state that two
//! write paths converge on:
//!
//! - **Optimistic**: a local submission is visible immediately as a pending
//!   overlay, then confirmed or rolled back once the store answers.
//! - **Reconciliation**: confirmed events (polled, or pushed over the card
//!   channel) are applied in ascending `sequence_number` order behind a
//!   monotonic watermark. Anything at or below the watermark is dropped.
//!
//! Each card keeps its confirmed state separately from the optimistic
//! overlay. Remote events only ever touch the confirmed state; the overlay
//! stays visible until its own write resolves. Rolling back therefore
//! restores the last confirmed values rather than just clearing the flag.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, trace, warn};

use super::channel::ChannelMessage;
use super::config::SyncConfig;
use super::store::{EventStore, NewRoomEvent, Performer, RoomEvent, StoreError};

/// Channel event carrying a freshly confirmed [`RoomEvent`].
pub const EVENT_INSERTED: &str = "event_inserted";

/// Card event types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CardEventType {
    CardFlipped,
    CardMoved,
    CardSelected,
    CardArranged,
    AreaCleared,
    /// Anything else the store carries; ignored when applied
    #[serde(other)]
    Unknown,
}

impl CardEventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::CardFlipped => "CARD_FLIPPED",
            Self::CardMoved => "CARD_MOVED",
            Self::CardSelected => "CARD_SELECTED",
            Self::CardArranged => "CARD_ARRANGED",
            Self::AreaCleared => "AREA_CLEARED",
            Self::Unknown => "UNKNOWN",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "CARD_FLIPPED" => Self::CardFlipped,
            "CARD_MOVED" => Self::CardMoved,
            "CARD_SELECTED" => Self::CardSelected,
            "CARD_ARRANGED" => Self::CardArranged,
            "AREA_CLEARED" => Self::AreaCleared,
            _ => Self::Unknown,
        }
    }
}

/// 2D board position.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Position {
    pub x: f64,
    pub y: f64,
}

impl Position {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }
}

/// Field values carried by a card event. Absent fields are left alone.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CardEventData {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_face_up: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub position: Option<Position>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_selected: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rotation: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scale: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub z_index: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reset: Option<bool>,
}

impl CardEventData {
    /// Flip to an explicit side, or toggle when `None`.
    pub fn flip(face_up: Option<bool>) -> Self {
        Self {
            is_face_up: face_up,
            ..Self::default()
        }
    }

    pub fn moved(position: Position) -> Self {
        Self {
            position: Some(position),
            ..Self::default()
        }
    }

    pub fn selected(selected: bool) -> Self {
        Self {
            is_selected: Some(selected),
            ..Self::default()
        }
    }

    pub fn reset() -> Self {
        Self {
            reset: Some(true),
            ..Self::default()
        }
    }

    /// Decode an event's data. `None` if the data is present but malformed.
    fn from_event(event: &RoomEvent) -> Option<Self> {
        match &event.event_data {
            None | Some(Value::Null) => Some(Self::default()),
            Some(value) => match serde_json::from_value(value.clone()) {
                Ok(data) => Some(data),
                Err(e) => {
                    warn!(
                        target: "consult_sync.cards",
                        sequence_number = event.sequence_number,
                        error = %e,
                        "Malformed event data"
                    );
                    None
                }
            },
        }
    }
}

/// Visual and interaction state of one card.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncedCardState {
    pub card_id: String,
    pub position: Position,
    pub is_face_up: bool,
    pub is_selected: bool,
    pub rotation: f64,
    pub scale: f64,
    pub z_index: i64,
    /// Id of the last confirmed event applied to this card
    pub last_event_id: Option<i64>,
    pub last_updated: DateTime<Utc>,
    /// True while an optimistic write is unconfirmed
    pub pending: bool,
}

impl SyncedCardState {
    pub fn new(card_id: impl Into<String>) -> Self {
        Self {
            card_id: card_id.into(),
            position: Position::default(),
            is_face_up: false,
            is_selected: false,
            rotation: 0.0,
            scale: 1.0,
            z_index: 0,
            last_event_id: None,
            last_updated: Utc::now(),
            pending: false,
        }
    }

    /// Apply an event's field values. Only a flip without `isFaceUp` is
    /// relative to the current state.
    fn apply(&mut self, event_type: CardEventType, data: &CardEventData) {
        match event_type {
            CardEventType::CardFlipped => {
                self.is_face_up = data.is_face_up.unwrap_or(!self.is_face_up);
            }
            CardEventType::CardMoved => {
                if let Some(position) = data.position {
                    self.position = position;
                }
            }
            CardEventType::CardSelected => {
                if let Some(selected) = data.is_selected {
                    self.is_selected = selected;
                }
            }
            CardEventType::CardArranged => {
                if let Some(position) = data.position {
                    self.position = position;
                }
                if let Some(rotation) = data.rotation {
                    self.rotation = rotation;
                }
                if let Some(scale) = data.scale {
                    self.scale = scale;
                }
                if let Some(z_index) = data.z_index {
                    self.z_index = z_index;
                }
            }
            CardEventType::AreaCleared | CardEventType::Unknown => {}
        }
    }
}

/// Handle for an optimistic write awaiting the store's answer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingWrite {
    pub write_id: u64,
    pub card_id: String,
}

#[derive(Debug, Clone)]
struct CardEntry {
    confirmed: SyncedCardState,
    optimistic: Option<(u64, SyncedCardState)>,
}

impl CardEntry {
    fn new(card_id: &str) -> Self {
        Self {
            confirmed: SyncedCardState::new(card_id),
            optimistic: None,
        }
    }

    fn visible(&self) -> &SyncedCardState {
        match &self.optimistic {
            Some((_, state)) => state,
            None => &self.confirmed,
        }
    }
}

/// Card sync errors.
#[derive(Debug, Error)]
pub enum SyncError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("Failed to encode event data: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Per-room card cache with ordered reconciliation and optimistic writes.
#[derive(Debug)]
pub struct CardSyncEngine<S: EventStore> {
    room_id: String,
    store: S,
    performer: Performer,
    poll_limit: usize,
    cards: HashMap<String, CardEntry>,
    watermark: u64,
    next_write_id: u64,
    needs_resync: bool,
}

impl<S: EventStore> CardSyncEngine<S> {
    pub fn new(
        room_id: impl Into<String>,
        store: S,
        performer: Performer,
        config: &SyncConfig,
    ) -> Self {
        Self {
            room_id: room_id.into(),
            store,
            performer,
            poll_limit: config.poll_limit,
            cards: HashMap::new(),
            watermark: 0,
            next_write_id: 0,
            needs_resync: false,
        }
    }

    pub fn room_id(&self) -> &str {
        &self.room_id
    }

    /// Highest sequence number applied so far.
    pub fn watermark(&self) -> u64 {
        self.watermark
    }

    /// Visible state of every known card, ordered by card id.
    pub fn get_cards(&self) -> Vec<SyncedCardState> {
        let mut cards: Vec<SyncedCardState> =
            self.cards.values().map(|e| e.visible().clone()).collect();
        cards.sort_by(|a, b| a.card_id.cmp(&b.card_id));
        cards
    }

    /// Visible state of one card.
    pub fn card(&self, card_id: &str) -> Option<&SyncedCardState> {
        self.cards.get(card_id).map(CardEntry::visible)
    }

    /// Last confirmed state of one card, ignoring any optimistic overlay.
    pub fn confirmed_card(&self, card_id: &str) -> Option<&SyncedCardState> {
        self.cards.get(card_id).map(|e| &e.confirmed)
    }

    pub fn has_pending(&self) -> bool {
        self.cards.values().any(|e| e.optimistic.is_some())
    }

    /// Set when a superseded write failed and the visible state may carry
    /// its effect; cleared by the next successful poll.
    pub fn needs_resync(&self) -> bool {
        self.needs_resync
    }

    /// Apply a local change immediately as a pending overlay.
    ///
    /// A newer overlay for the same card supersedes the previous one.
    pub fn apply_optimistic(
        &mut self,
        card_id: &str,
        event_type: CardEventType,
        data: &CardEventData,
    ) -> PendingWrite {
        self.next_write_id += 1;
        let write_id = self.next_write_id;

        let entry = self
            .cards
            .entry(card_id.to_string())
            .or_insert_with(|| CardEntry::new(card_id));
        let mut state = entry.visible().clone();
        state.apply(event_type, data);
        state.pending = true;
        state.last_updated = Utc::now();
        if let Some((superseded, _)) = entry.optimistic.replace((write_id, state)) {
            trace!(
                target: "consult_sync.cards",
                card_id,
                superseded,
                write_id,
                "Optimistic write superseded"
            );
        }

        PendingWrite {
            write_id,
            card_id: card_id.to_string(),
        }
    }

    /// Resolve an optimistic write with the store's confirmed event.
    ///
    /// If other events were stamped between the watermark and this one, the
    /// watermark is left alone so the next poll still fetches them; the
    /// card's confirmed fields are updated directly and a resync is flagged.
    pub fn confirm(&mut self, write: &PendingWrite, event: &RoomEvent) {
        if event.sequence_number == self.watermark + 1 {
            self.apply_event(event);
        } else if event.sequence_number > self.watermark {
            debug!(
                target: "consult_sync.cards",
                sequence_number = event.sequence_number,
                watermark = self.watermark,
                "Confirmed event is ahead of watermark, resync required"
            );
            self.apply_to_card(event);
            self.needs_resync = true;
        }
        if let Some(entry) = self.cards.get_mut(&write.card_id) {
            if matches!(entry.optimistic, Some((id, _)) if id == write.write_id) {
                entry.optimistic = None;
            }
        }
    }

    /// Roll back a failed optimistic write to the last confirmed state.
    pub fn revert(&mut self, write: &PendingWrite) {
        let Some(entry) = self.cards.get_mut(&write.card_id) else {
            return;
        };
        match entry.optimistic {
            Some((id, _)) if id == write.write_id => {
                entry.optimistic = None;
                debug!(
                    target: "consult_sync.cards",
                    card_id = %write.card_id,
                    write_id = write.write_id,
                    "Optimistic write reverted"
                );
            }
            Some(_) => {
                // A newer overlay was built on top of this one
                self.needs_resync = true;
                warn!(
                    target: "consult_sync.cards",
                    card_id = %write.card_id,
                    write_id = write.write_id,
                    "Superseded write failed, resync required"
                );
            }
            None => {}
        }
    }

    /// Apply one confirmed event if it is above the watermark.
    /// Returns true if it advanced the watermark.
    pub fn apply_event(&mut self, event: &RoomEvent) -> bool {
        if event.sequence_number <= self.watermark {
            trace!(
                target: "consult_sync.cards",
                sequence_number = event.sequence_number,
                watermark = self.watermark,
                "Stale or duplicate event dropped"
            );
            return false;
        }

        let event_type = CardEventType::parse(&event.event_type);
        let data = CardEventData::from_event(event).unwrap_or_default();

        match (event_type, event.card_id.as_deref()) {
            (CardEventType::AreaCleared, _) => {
                if data.reset == Some(true) {
                    debug!(
                        target: "consult_sync.cards",
                        room_id = %self.room_id,
                        cards = self.cards.len(),
                        "Room reset, dropping card cache"
                    );
                    self.cards.clear();
                }
            }
            (CardEventType::Unknown, _) => {
                trace!(
                    target: "consult_sync.cards",
                    event_type = %event.event_type,
                    "Ignoring unknown event type"
                );
            }
            (_, None) => {
                trace!(
                    target: "consult_sync.cards",
                    sequence_number = event.sequence_number,
                    "Card event without card id ignored"
                );
            }
            (_, Some(_)) => self.apply_to_card(event),
        }

        self.watermark = event.sequence_number;
        true
    }

    fn apply_to_card(&mut self, event: &RoomEvent) {
        let Some(card_id) = event.card_id.as_deref() else {
            return;
        };
        // Malformed data must not fall through to a toggle flip
        let Some(data) = CardEventData::from_event(event) else {
            return;
        };
        let event_type = CardEventType::parse(&event.event_type);
        let entry = self
            .cards
            .entry(card_id.to_string())
            .or_insert_with(|| CardEntry::new(card_id));
        entry.confirmed.apply(event_type, &data);
        entry.confirmed.last_event_id = Some(event.id);
        entry.confirmed.last_updated = event.created_at;
    }

    /// Apply a batch in ascending sequence order regardless of arrival order.
    /// Returns how many events were applied.
    pub fn apply_events(&mut self, mut events: Vec<RoomEvent>) -> usize {
        events.sort_by_key(|e| e.sequence_number);
        events.iter().filter(|e| self.apply_event(e)).count()
    }

    /// Handle a message from the room's card channel.
    pub fn handle_message(&mut self, message: &ChannelMessage) -> bool {
        if message.event != EVENT_INSERTED {
            return false;
        }
        self.handle_inserted(&message.payload)
    }

    /// Apply an `event_inserted` payload.
    ///
    /// Realtime delivery may skip or reorder events. An event past the next
    /// expected sequence number is held back and a resync is flagged, so the
    /// following poll applies the whole range in order.
    pub fn handle_inserted(&mut self, payload: &Value) -> bool {
        match serde_json::from_value::<RoomEvent>(payload.clone()) {
            Ok(event) if event.room_id == self.room_id => {
                if event.sequence_number > self.watermark + 1 {
                    debug!(
                        target: "consult_sync.cards",
                        sequence_number = event.sequence_number,
                        watermark = self.watermark,
                        "Gap in realtime events, resync required"
                    );
                    self.needs_resync = true;
                    return false;
                }
                self.apply_event(&event)
            }
            Ok(event) => {
                trace!(
                    target: "consult_sync.cards",
                    room_id = %event.room_id,
                    "Event for another room ignored"
                );
                false
            }
            Err(e) => {
                warn!(target: "consult_sync.cards", error = %e, "Malformed inserted event");
                false
            }
        }
    }

    /// Optimistically apply a card event, then persist it.
    ///
    /// A toggle flip is stored with the side it resolved to locally, so the
    /// persisted event is safe to re-apply. On failure the card returns to
    /// its last confirmed state and the error is returned; the write is not
    /// retried.
    pub async fn submit_card_event(
        &mut self,
        card_id: &str,
        event_type: CardEventType,
        mut data: CardEventData,
    ) -> Result<RoomEvent, SyncError> {
        let write = self.apply_optimistic(card_id, event_type, &data);
        if event_type == CardEventType::CardFlipped && data.is_face_up.is_none() {
            data.is_face_up = self.card(card_id).map(|c| c.is_face_up);
        }
        let result = self.persist(Some(card_id), event_type, &data).await;
        match result {
            Ok(event) => {
                self.confirm(&write, &event);
                Ok(event)
            }
            Err(e) => {
                warn!(
                    target: "consult_sync.cards",
                    card_id,
                    event_type = event_type.as_str(),
                    error = %e,
                    "Card event rejected by store"
                );
                self.revert(&write);
                Err(e)
            }
        }
    }

    /// Clear the whole board for every session in the room.
    pub async fn reset_room(&mut self) -> Result<RoomEvent, SyncError> {
        let event = self
            .persist(None, CardEventType::AreaCleared, &CardEventData::reset())
            .await?;
        self.apply_event(&event);
        Ok(event)
    }

    async fn persist(
        &self,
        card_id: Option<&str>,
        event_type: CardEventType,
        data: &CardEventData,
    ) -> Result<RoomEvent, SyncError> {
        let mut new_event = NewRoomEvent::new(self.room_id.clone(), event_type.as_str())
            .with_data(serde_json::to_value(data)?)
            .with_performer(&self.performer);
        if let Some(card_id) = card_id {
            new_event = new_event.with_card(card_id);
        }
        Ok(self.store.create_event(new_event).await?)
    }

    /// Fetch events newer than the watermark and apply them in order.
    pub async fn poll_changes(&mut self) -> Result<usize, SyncError> {
        let events = self
            .store
            .get_latest_events(&self.room_id, self.poll_limit)
            .await?;
        let fetched = events.len();
        let fresh: Vec<RoomEvent> = events
            .into_iter()
            .filter(|e| e.sequence_number > self.watermark)
            .collect();

        if fetched == self.poll_limit && fresh.len() == fetched && self.watermark > 0 {
            debug!(
                target: "consult_sync.cards",
                room_id = %self.room_id,
                poll_limit = self.poll_limit,
                "Poll window full, older events may be skipped"
            );
        }

        let applied = self.apply_events(fresh);
        self.needs_resync = false;
        if applied > 0 {
            debug!(
                target: "consult_sync.cards",
                room_id = %self.room_id,
                applied,
                watermark = self.watermark,
                "Applied polled events"
            );
        }
        Ok(applied)
    }

    /// Drop the local cache and watermark; the next poll rebuilds it.
    pub fn clear(&mut self) {
        self.cards.clear();
        self.watermark = 0;
        self.needs_resync = false;
    }
}
