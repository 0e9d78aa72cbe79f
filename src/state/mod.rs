//! Room synchronization for consult sessions.
//!
//! This module provides the building blocks and the [`RoomSync`] bundle
//! that wires them together for one room:
//!
//! - `channel` - Resilient subscription to a named pub/sub channel
//! - `mode` - Owner-to-mirror broadcast of the game mode
//! - `cards` - Ordered, optimistic per-card state over the event store
//! - `store` - Event-store contract and an in-memory store
//! - `zones` / `rules` - Rule-driven card zones
//! - `ledger` - Constrained token allocation
//! - `config` - Retry and sync settings
//!
//! # Architecture
//!
//! ```text
//! ┌───────────────────────────────────────────────────────────────────┐
//! │                             RoomSync                              │
//! │                                                                   │
//! │  room:<id>:mode                     room:<id>:cards               │
//! │  ┌──────────────────┐               ┌──────────────────┐          │
//! │  │  ModeCoordinator │               │  ChannelSession  │          │
//! │  │  (ChannelSession)│               │  event_inserted ─┼──┐       │
//! │  └────────┬─────────┘               └──────────────────┘  │       │
//! │           │ game_rule                                     ▼       │
//! │  ┌────────▼─────────┐               ┌──────────────────────────┐  │
//! │  │    ZoneEngine    │               │      CardSyncEngine      │  │
//! │  │    GameState     │               │ watermark, optimistic    │  │
//! │  └──────────────────┘               └────────────┬─────────────┘  │
//! │                                                  │ create / poll  │
//! └──────────────────────────────────────────────────┼────────────────┘
//!                                                    ▼
//!                                               EventStore
//! ```
//!
//! `AllocationLedger` is standalone; game modes that use it record its
//! changes as ordinary card events.
//!
//! Everything here is single-threaded and sans-IO: the host feeds in
//! subscribe outcomes, inbound messages and the current time, and awaits
//! store calls on its own executor.

pub mod cards;
pub mod channel;
pub mod config;
pub mod ledger;
pub mod mode;
pub mod rules;
pub mod store;
pub mod zones;

use std::cell::RefCell;
use std::rc::Rc;
use std::time::Instant;

use serde_json::Value;
use thiserror::Error;
use tracing::{debug, info};

// Re-export commonly used types
pub use cards::{
    CardEventData, CardEventType, CardSyncEngine, PendingWrite, Position, SyncError,
    SyncedCardState, EVENT_INSERTED,
};
pub use channel::{
    room_topic, ChannelError, ChannelErrorType, ChannelMessage, ChannelSession, ChannelStatusView,
    ConnectionStatus, ListenerRegistry, MemoryTransport, RealtimeTransport, StatusOutcome,
    SubscribeStatus,
};
pub use config::{ConfigError, RetryConfig, SyncConfig};
pub use ledger::{
    AllocationLedger, LedgerConstraints, LedgerError, LedgerSnapshot, LedgerValidation,
    SubscriptionId, TransferRecord, Violation,
};
pub use mode::{
    FileModeStore, GameModeState, MemoryModeStore, MirrorSync, ModeCoordinator, ModeError,
    ModePhase, ModeSnapshot, ModeStore, SessionRole,
};
pub use rules::{LayoutHint, RuleConstraints, RuleDefinition, RuleError, RuleRegistry, ZoneTemplate};
pub use store::{
    EventStore, MemoryEventStore, NewRoomEvent, Performer, PerformerType, RoomEvent, StoreError,
};
pub use zones::{ActionKind, GameAction, GameState, Rejection, Zone, ZoneEngine, ZoneError};

/// Topic suffix of the room's card channel.
pub const CARDS_TOPIC: &str = "cards";

/// Errors from room-level operations.
#[derive(Debug, Error)]
pub enum RoomError {
    #[error("This session cannot interact yet")]
    ReadOnly,

    #[error("No board has been started")]
    NoBoard,

    #[error(transparent)]
    Mode(#[from] ModeError),

    #[error(transparent)]
    Zone(#[from] ZoneError),
}

/// One session's view of a room: mode, cards and board.
///
/// The transport is cloned for the two channels; real transports multiplex
/// topics over one connection.
pub struct RoomSync<T, M, S>
where
    T: RealtimeTransport + Clone,
    M: ModeStore,
    S: EventStore,
{
    room_id: String,
    mode: ModeCoordinator<T, M>,
    card_channel: ChannelSession<T>,
    inbox: Rc<RefCell<Vec<Value>>>,
    cards: CardSyncEngine<S>,
    zones: ZoneEngine,
    board: Option<GameState>,
    catch_up: bool,
}

impl<T, M, S> RoomSync<T, M, S>
where
    T: RealtimeTransport + Clone,
    M: ModeStore,
    S: EventStore,
{
    pub fn new(
        room_id: impl Into<String>,
        role: SessionRole,
        performer: Performer,
        transport: T,
        mode_store: M,
        event_store: S,
        config: &SyncConfig,
    ) -> Self {
        let room_id = room_id.into();
        let mode =
            ModeCoordinator::new(room_id.clone(), role, transport.clone(), mode_store, config);

        let inbox: Rc<RefCell<Vec<Value>>> = Rc::new(RefCell::new(Vec::new()));
        let setup_inbox = Rc::clone(&inbox);
        let card_channel = ChannelSession::connect(
            room_topic(&room_id, CARDS_TOPIC),
            transport,
            config.retry.clone(),
            move |listeners| {
                let inbox = Rc::clone(&setup_inbox);
                listeners.on(EVENT_INSERTED, move |payload| {
                    inbox.borrow_mut().push(payload.clone());
                });
            },
        );

        let cards = CardSyncEngine::new(room_id.clone(), event_store, performer, config);

        info!(target: "consult_sync.room", room_id = %room_id, ?role, "Room session created");
        Self {
            room_id,
            mode,
            card_channel,
            inbox,
            cards,
            zones: ZoneEngine::with_builtin(),
            board: None,
            catch_up: true,
        }
    }

    pub fn room_id(&self) -> &str {
        &self.room_id
    }

    pub fn mode_topic(&self) -> &str {
        self.mode.session().topic()
    }

    pub fn cards_topic(&self) -> &str {
        self.card_channel.topic()
    }

    /// Route a subscribe outcome to the channel it belongs to.
    pub fn handle_status(
        &mut self,
        topic: &str,
        status: SubscribeStatus,
        error: Option<&str>,
        now: Instant,
    ) -> Option<StatusOutcome> {
        if topic == self.mode_topic() {
            return Some(self.mode.handle_status(status, error, now));
        }
        if topic == self.cards_topic() {
            let outcome = self.card_channel.handle_status(status, error, now);
            if outcome == StatusOutcome::Connected {
                // Events inserted while we were away never reach the channel
                self.catch_up = true;
            }
            return Some(outcome);
        }
        None
    }

    /// Route an inbound message; returns how many listeners handled it.
    pub fn handle_message(&mut self, topic: &str, message: &ChannelMessage) -> usize {
        if topic == self.mode_topic() {
            return self.mode.handle_message(message);
        }
        if topic != self.cards_topic() {
            return 0;
        }

        let handled = self.card_channel.dispatch(message);
        let payloads = std::mem::take(&mut *self.inbox.borrow_mut());
        for payload in payloads {
            self.cards.handle_inserted(&payload);
        }
        handled
    }

    pub fn poll_timers(&mut self, now: Instant) {
        self.mode.poll_timers(now);
        self.card_channel.poll_timers(now);
    }

    /// Whether a [`RoomSync::sync`] call would poll the store.
    pub fn needs_sync(&self) -> bool {
        self.catch_up || self.cards.needs_resync()
    }

    /// Poll the store if the card cache may have missed events.
    pub async fn sync(&mut self) -> Result<usize, SyncError> {
        if !self.needs_sync() {
            return Ok(0);
        }
        let applied = self.cards.poll_changes().await?;
        self.catch_up = false;
        debug!(target: "consult_sync.room", room_id = %self.room_id, applied, "Card cache synced");
        Ok(applied)
    }

    pub fn can_interact(&self) -> bool {
        self.mode.can_interact()
    }

    /// Start a board for the currently selected rule.
    pub fn start_board(&mut self) -> Result<&GameState, RoomError> {
        let rule_id = self.mode.synced_state().game_rule;
        let state = self.zones.create_initial_state(&rule_id)?;
        info!(
            target: "consult_sync.room",
            room_id = %self.room_id,
            rule_id = %rule_id,
            "Board started"
        );
        Ok(&*self.board.insert(state))
    }

    /// Validate and apply an action to the board.
    pub fn execute_action(&mut self, action: &GameAction) -> Result<&GameState, RoomError> {
        if !self.can_interact() {
            return Err(RoomError::ReadOnly);
        }
        let current = self.board.as_ref().ok_or(RoomError::NoBoard)?;
        let next = self.zones.execute_action(action, current)?;
        Ok(&*self.board.insert(next))
    }

    /// Leave the game (owner only) and drop the board.
    pub fn exit_game(&mut self) -> Result<(), RoomError> {
        self.mode.exit_game()?;
        self.board = None;
        Ok(())
    }

    pub fn mode(&self) -> &ModeCoordinator<T, M> {
        &self.mode
    }

    pub fn mode_mut(&mut self) -> &mut ModeCoordinator<T, M> {
        &mut self.mode
    }

    pub fn cards(&self) -> &CardSyncEngine<S> {
        &self.cards
    }

    pub fn cards_mut(&mut self) -> &mut CardSyncEngine<S> {
        &mut self.cards
    }

    pub fn zones(&self) -> &ZoneEngine {
        &self.zones
    }

    pub fn zones_mut(&mut self) -> &mut ZoneEngine {
        &mut self.zones
    }

    pub fn board(&self) -> Option<&GameState> {
        self.board.as_ref()
    }

    pub fn card_channel_status(&self) -> ChannelStatusView {
        self.card_channel.status_view()
    }

    /// Reconnect both channels, clearing any terminal errors.
    pub fn reconnect(&mut self) {
        self.mode.reconnect();
        self.card_channel.reconnect();
    }

    pub fn dispose(&mut self) {
        self.mode.dispose();
        self.card_channel.dispose();
        self.inbox.borrow_mut().clear();
    }
}
