//! Game mode coordination.
//!
//! One session in a room (the counselor) owns the `{deck, gameRule,
//! gameMode}` state; every other session mirrors it. The protocol runs over
//! the room's `mode` channel:
//!
//! | Event          | Sender  | Meaning                                   |
//! |----------------|---------|-------------------------------------------|
//! | `mode_changed` | owner   | full snapshot after a change or exit      |
//! | `game_started` | owner   | full snapshot with `gameStarted = true`   |
//! | `request_state`| mirror  | late joiner asking for the current state  |
//! | `current_state`| owner   | reply to `request_state`, or announcement |
//!
//! Listeners read the shared state cell when a message arrives, never a copy
//! taken when they were registered, so a reply always carries the latest
//! state.
//!
//! # Phases
//!
//! ```text
//! Uninitialized ──▶ Connected ──▶ ModeSelected ──▶ GameStarted
//!                      ▲               ▲               │
//!                      └───────────────┴──── exit ─────┘
//! ```

use std::cell::RefCell;
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::rc::Rc;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, info, trace, warn};

use super::channel::{
    room_topic, ChannelMessage, ChannelSession, ChannelStatusView, ListenerRegistry,
    RealtimeTransport, StatusOutcome, SubscribeStatus,
};
use super::config::SyncConfig;
use super::store::StoreError;

/// Channel topic suffix for mode coordination.
pub const MODE_TOPIC: &str = "mode";

pub const MODE_CHANGED: &str = "mode_changed";
pub const GAME_STARTED: &str = "game_started";
pub const REQUEST_STATE: &str = "request_state";
pub const CURRENT_STATE: &str = "current_state";

/// Which deck, rule, and mode are active.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GameModeState {
    pub deck: String,
    pub game_rule: String,
    pub game_mode: String,
}

impl GameModeState {
    pub fn new(
        deck: impl Into<String>,
        game_rule: impl Into<String>,
        game_mode: impl Into<String>,
    ) -> Self {
        Self {
            deck: deck.into(),
            game_rule: game_rule.into(),
            game_mode: game_mode.into(),
        }
    }

    /// The reset state: a deck and no rule or mode.
    pub fn default_for(deck: impl Into<String>) -> Self {
        Self::new(deck, "", "")
    }

    pub fn has_mode(&self) -> bool {
        !self.game_mode.is_empty()
    }
}

/// Full mode state as broadcast and persisted.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModeSnapshot {
    pub state: GameModeState,
    #[serde(default)]
    pub game_started: bool,
}

/// Whether this session writes the mode state or mirrors it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionRole {
    Owner,
    Mirror,
}

/// Coordinator phase, derived from connection and mode state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModePhase {
    Uninitialized,
    /// Connected, no mode selected
    Connected,
    ModeSelected,
    GameStarted,
}

/// A mirror's knowledge of the owner's state.
///
/// `Synced` with an empty `gameMode` means the owner answered and has not
/// picked a mode; `AwaitingOwner` means nobody has answered yet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MirrorSync {
    AwaitingOwner,
    Synced,
}

/// Mode coordination errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ModeError {
    #[error("Only the room owner can change the game mode")]
    NotOwner,

    #[error("A game mode must be selected before starting")]
    NoModeSelected,
}

/// Durable per-room storage for the owner's mode state.
pub trait ModeStore {
    fn load(&self, room_id: &str) -> Result<Option<ModeSnapshot>, StoreError>;

    fn save(&self, room_id: &str, snapshot: &ModeSnapshot) -> Result<(), StoreError>;
}

/// Mode store kept in memory. Clones share contents.
#[derive(Debug, Clone, Default)]
pub struct MemoryModeStore {
    rooms: Rc<RefCell<HashMap<String, ModeSnapshot>>>,
}

impl MemoryModeStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ModeStore for MemoryModeStore {
    fn load(&self, room_id: &str) -> Result<Option<ModeSnapshot>, StoreError> {
        Ok(self.rooms.borrow().get(room_id).cloned())
    }

    fn save(&self, room_id: &str, snapshot: &ModeSnapshot) -> Result<(), StoreError> {
        self.rooms
            .borrow_mut()
            .insert(room_id.to_string(), snapshot.clone());
        Ok(())
    }
}

/// Mode store writing one JSON file per room into a directory.
#[derive(Debug, Clone)]
pub struct FileModeStore {
    dir: PathBuf,
}

impl FileModeStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Room ids are hex-encoded, so distinct ids never share a file.
    fn path_for(&self, room_id: &str) -> PathBuf {
        self.dir.join(format!("mode-{}.json", hex::encode(room_id)))
    }
}

impl ModeStore for FileModeStore {
    fn load(&self, room_id: &str) -> Result<Option<ModeSnapshot>, StoreError> {
        let path = self.path_for(room_id);
        let raw = match fs::read_to_string(&path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(StoreError::Io(e.to_string())),
        };
        serde_json::from_str(&raw)
            .map(Some)
            .map_err(|e| StoreError::Malformed(e.to_string()))
    }

    fn save(&self, room_id: &str, snapshot: &ModeSnapshot) -> Result<(), StoreError> {
        fs::create_dir_all(&self.dir).map_err(|e| StoreError::Io(e.to_string()))?;
        let raw =
            serde_json::to_string(snapshot).map_err(|e| StoreError::Malformed(e.to_string()))?;
        fs::write(self.path_for(room_id), raw).map_err(|e| StoreError::Io(e.to_string()))
    }
}

/// State shared between the coordinator and its channel listeners.
#[derive(Debug)]
struct ModeShared {
    role: SessionRole,
    snapshot: ModeSnapshot,
    sync: MirrorSync,
    outbox: Vec<(&'static str, ModeSnapshot)>,
}

fn register_listeners(listeners: &mut ListenerRegistry, shared: &Rc<RefCell<ModeShared>>) {
    let responder = Rc::clone(shared);
    listeners.on(REQUEST_STATE, move |_| {
        let mut shared = responder.borrow_mut();
        if shared.role != SessionRole::Owner {
            return;
        }
        let snapshot = shared.snapshot.clone();
        trace!(target: "consult_sync.mode", "Answering state request");
        shared.outbox.push((CURRENT_STATE, snapshot));
    });

    for event in [CURRENT_STATE, MODE_CHANGED, GAME_STARTED] {
        let mirror = Rc::clone(shared);
        listeners.on(event, move |payload: &Value| {
            let mut shared = mirror.borrow_mut();
            // The owner hears its own broadcasts; applying them would loop
            if shared.role == SessionRole::Owner {
                return;
            }
            match serde_json::from_value::<ModeSnapshot>(payload.clone()) {
                Ok(snapshot) => {
                    debug!(
                        target: "consult_sync.mode",
                        event,
                        game_mode = %snapshot.state.game_mode,
                        game_started = snapshot.game_started,
                        "Mirrored mode state"
                    );
                    shared.snapshot = snapshot;
                    shared.sync = MirrorSync::Synced;
                }
                Err(e) => {
                    warn!(target: "consult_sync.mode", event, error = %e, "Malformed mode payload");
                }
            }
        });
    }
}

/// Single-writer broadcast of the room's game mode.
pub struct ModeCoordinator<T: RealtimeTransport, M: ModeStore> {
    room_id: String,
    role: SessionRole,
    session: ChannelSession<T>,
    store: M,
    shared: Rc<RefCell<ModeShared>>,
    default_deck: String,
    request_interval: Duration,
    last_request_at: Option<Instant>,
    connected_once: bool,
}

impl<T: RealtimeTransport, M: ModeStore> ModeCoordinator<T, M> {
    /// Create a coordinator and start subscribing to the room's mode channel.
    ///
    /// An owner restores its persisted state first, so a reload picks up
    /// where it left off.
    pub fn new(
        room_id: impl Into<String>,
        role: SessionRole,
        transport: T,
        store: M,
        config: &SyncConfig,
    ) -> Self {
        let room_id = room_id.into();
        let fallback = ModeSnapshot {
            state: GameModeState::default_for(config.default_deck.clone()),
            game_started: false,
        };

        let snapshot = match role {
            SessionRole::Owner => match store.load(&room_id) {
                Ok(Some(saved)) => {
                    info!(
                        target: "consult_sync.mode",
                        room_id = %room_id,
                        game_mode = %saved.state.game_mode,
                        "Restored persisted mode state"
                    );
                    saved
                }
                Ok(None) => fallback,
                Err(e) => {
                    warn!(
                        target: "consult_sync.mode",
                        room_id = %room_id,
                        error = %e,
                        "Failed to load persisted mode state"
                    );
                    fallback
                }
            },
            SessionRole::Mirror => fallback,
        };

        let shared = Rc::new(RefCell::new(ModeShared {
            role,
            snapshot,
            sync: match role {
                SessionRole::Owner => MirrorSync::Synced,
                SessionRole::Mirror => MirrorSync::AwaitingOwner,
            },
            outbox: Vec::new(),
        }));

        let setup_shared = Rc::clone(&shared);
        let session = ChannelSession::connect(
            room_topic(&room_id, MODE_TOPIC),
            transport,
            config.retry.clone(),
            move |listeners| register_listeners(listeners, &setup_shared),
        );

        Self {
            room_id,
            role,
            session,
            store,
            shared,
            default_deck: config.default_deck.clone(),
            request_interval: config.state_request_interval(),
            last_request_at: None,
            connected_once: false,
        }
    }

    /// Feed a subscribe outcome; on connect, mirrors ask for state and the
    /// owner announces its own.
    pub fn handle_status(
        &mut self,
        status: SubscribeStatus,
        error: Option<&str>,
        now: Instant,
    ) -> StatusOutcome {
        let outcome = self.session.handle_status(status, error, now);
        if outcome == StatusOutcome::Connected {
            self.connected_once = true;
            match self.role {
                SessionRole::Owner => {
                    let snapshot = self.shared.borrow().snapshot.clone();
                    self.broadcast(CURRENT_STATE, &snapshot);
                }
                SessionRole::Mirror => self.request_state(now),
            }
        }
        outcome
    }

    /// Route an inbound message, then send any replies it produced.
    pub fn handle_message(&mut self, message: &ChannelMessage) -> usize {
        let handled = self.session.dispatch(message);
        self.flush();
        handled
    }

    /// Drive the retry timer and the mirror's re-request timer.
    pub fn poll_timers(&mut self, now: Instant) {
        self.session.poll_timers(now);

        if self.role == SessionRole::Mirror
            && self.mirror_sync() == MirrorSync::AwaitingOwner
            && self.session.is_connected()
        {
            let due = match self.last_request_at {
                Some(at) => now.duration_since(at) >= self.request_interval,
                None => true,
            };
            if due {
                self.request_state(now);
            }
        }
    }

    fn request_state(&mut self, now: Instant) {
        self.last_request_at = Some(now);
        debug!(target: "consult_sync.mode", room_id = %self.room_id, "Requesting mode state");
        if let Err(e) = self.session.send(REQUEST_STATE, Value::Null) {
            warn!(target: "consult_sync.mode", error = %e, "Failed to request mode state");
        }
    }

    fn flush(&mut self) {
        let outbox = std::mem::take(&mut self.shared.borrow_mut().outbox);
        for (event, snapshot) in outbox {
            self.broadcast(event, &snapshot);
        }
    }

    fn broadcast(&mut self, event: &str, snapshot: &ModeSnapshot) {
        if !self.session.is_connected() {
            debug!(
                target: "consult_sync.mode",
                event,
                "Not connected, state will be announced on connect"
            );
            return;
        }
        let payload = match serde_json::to_value(snapshot) {
            Ok(payload) => payload,
            Err(e) => {
                warn!(
                    target: "consult_sync.mode",
                    event,
                    error = %e,
                    "Failed to encode mode state"
                );
                return;
            }
        };
        if let Err(e) = self.session.send(event, payload) {
            warn!(target: "consult_sync.mode", event, error = %e, "Mode broadcast failed");
        }
    }

    fn ensure_owner(&self) -> Result<(), ModeError> {
        match self.role {
            SessionRole::Owner => Ok(()),
            SessionRole::Mirror => Err(ModeError::NotOwner),
        }
    }

    /// Persist and broadcast a new snapshot.
    fn publish(&mut self, event: &str, snapshot: ModeSnapshot) {
        if let Err(e) = self.store.save(&self.room_id, &snapshot) {
            warn!(
                target: "consult_sync.mode",
                room_id = %self.room_id,
                error = %e,
                "Failed to persist mode state"
            );
        }
        self.shared.borrow_mut().snapshot = snapshot.clone();
        self.broadcast(event, &snapshot);
    }

    /// Select a deck, rule, and mode (owner only).
    pub fn change_game_mode(
        &mut self,
        deck: impl Into<String>,
        game_rule: impl Into<String>,
        game_mode: impl Into<String>,
    ) -> Result<(), ModeError> {
        self.ensure_owner()?;
        let mut snapshot = self.shared.borrow().snapshot.clone();
        snapshot.state = GameModeState::new(deck, game_rule, game_mode);
        info!(
            target: "consult_sync.mode",
            room_id = %self.room_id,
            deck = %snapshot.state.deck,
            game_rule = %snapshot.state.game_rule,
            game_mode = %snapshot.state.game_mode,
            "Game mode changed"
        );
        self.publish(MODE_CHANGED, snapshot);
        Ok(())
    }

    /// Start the selected game (owner only).
    pub fn start_game(&mut self) -> Result<(), ModeError> {
        self.ensure_owner()?;
        let mut snapshot = self.shared.borrow().snapshot.clone();
        if !snapshot.state.has_mode() {
            return Err(ModeError::NoModeSelected);
        }
        snapshot.game_started = true;
        info!(target: "consult_sync.mode", room_id = %self.room_id, "Game started");
        self.publish(GAME_STARTED, snapshot);
        Ok(())
    }

    /// Leave the game and reset to the default deck with no mode (owner only).
    pub fn exit_game(&mut self) -> Result<(), ModeError> {
        self.ensure_owner()?;
        let snapshot = ModeSnapshot {
            state: GameModeState::default_for(self.default_deck.clone()),
            game_started: false,
        };
        info!(target: "consult_sync.mode", room_id = %self.room_id, "Game exited");
        self.publish(MODE_CHANGED, snapshot);
        Ok(())
    }

    pub fn reconnect(&mut self) {
        self.session.reconnect();
    }

    /// Unsubscribe and stop all timers. Idempotent.
    pub fn dispose(&mut self) {
        self.session.dispose();
    }

    pub fn room_id(&self) -> &str {
        &self.room_id
    }

    pub fn role(&self) -> SessionRole {
        self.role
    }

    pub fn is_owner(&self) -> bool {
        self.role == SessionRole::Owner
    }

    pub fn synced_state(&self) -> GameModeState {
        self.shared.borrow().snapshot.state.clone()
    }

    pub fn snapshot(&self) -> ModeSnapshot {
        self.shared.borrow().snapshot.clone()
    }

    pub fn game_started(&self) -> bool {
        self.shared.borrow().snapshot.game_started
    }

    pub fn mirror_sync(&self) -> MirrorSync {
        self.shared.borrow().sync
    }

    /// The owner can always interact; a mirror once it has heard from the
    /// owner and the game is running.
    pub fn can_interact(&self) -> bool {
        match self.role {
            SessionRole::Owner => true,
            SessionRole::Mirror => {
                self.mirror_sync() == MirrorSync::Synced && self.game_started()
            }
        }
    }

    pub fn phase(&self) -> ModePhase {
        if !self.connected_once {
            return ModePhase::Uninitialized;
        }
        let shared = self.shared.borrow();
        if shared.snapshot.game_started {
            ModePhase::GameStarted
        } else if shared.snapshot.state.has_mode() {
            ModePhase::ModeSelected
        } else {
            ModePhase::Connected
        }
    }

    pub fn channel_status(&self) -> ChannelStatusView {
        self.session.status_view()
    }

    pub fn session(&self) -> &ChannelSession<T> {
        &self.session
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::channel::MemoryTransport;
    use crate::state::config::RetryConfig;
    use pretty_assertions::assert_eq;

    const ROOM: &str = "42";
    const TOPIC: &str = "room:42:mode";

    fn config() -> SyncConfig {
        SyncConfig {
            retry: RetryConfig {
                jitter_ratio: 0.0,
                ..RetryConfig::default()
            },
            ..SyncConfig::default()
        }
    }

    type Coordinator = ModeCoordinator<MemoryTransport, MemoryModeStore>;

    fn make(role: SessionRole, store: &MemoryModeStore) -> (Coordinator, MemoryTransport) {
        let transport = MemoryTransport::new();
        let coordinator =
            ModeCoordinator::new(ROOM, role, transport.clone(), store.clone(), &config());
        (coordinator, transport)
    }

    /// Deliver everything `from` has sent to `to`.
    fn relay(from: &MemoryTransport, to: &mut Coordinator) {
        for (_, message) in from.take_sent() {
            to.handle_message(&message);
        }
    }

    fn connect(coordinator: &mut Coordinator, now: Instant) {
        assert_eq!(
            coordinator.handle_status(SubscribeStatus::Subscribed, None, now),
            StatusOutcome::Connected
        );
    }

    #[test]
    fn test_owner_change_broadcasts_and_persists() {
        let store = MemoryModeStore::new();
        let (mut owner, transport) = make(SessionRole::Owner, &store);
        assert_eq!(owner.phase(), ModePhase::Uninitialized);
        connect(&mut owner, Instant::now());
        transport.take_sent();

        owner.change_game_mode("values", "three_piles", "sorting").unwrap();

        let sent = transport.sent_on(TOPIC);
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].event, MODE_CHANGED);
        assert_eq!(sent[0].payload["state"]["gameMode"], "sorting");
        assert_eq!(
            store.load(ROOM).unwrap().unwrap().state,
            GameModeState::new("values", "three_piles", "sorting")
        );
        assert_eq!(owner.phase(), ModePhase::ModeSelected);
    }

    #[test]
    fn test_mirror_cannot_write() {
        let store = MemoryModeStore::new();
        let (mut mirror, _) = make(SessionRole::Mirror, &store);
        assert_eq!(mirror.change_game_mode("a", "b", "c"), Err(ModeError::NotOwner));
        assert_eq!(mirror.start_game(), Err(ModeError::NotOwner));
        assert_eq!(mirror.exit_game(), Err(ModeError::NotOwner));
    }

    #[test]
    fn test_reply_uses_latest_state() {
        let store = MemoryModeStore::new();
        let now = Instant::now();
        let (mut owner, owner_tx) = make(SessionRole::Owner, &store);
        connect(&mut owner, now);

        // Changed after listeners were registered
        owner.change_game_mode("career", "value_ranking", "ranking").unwrap();
        owner.change_game_mode("career", "skill_grid", "grid").unwrap();
        owner_tx.take_sent();

        let (mut mirror, mirror_tx) = make(SessionRole::Mirror, &MemoryModeStore::new());
        connect(&mut mirror, now);
        assert_eq!(mirror.mirror_sync(), MirrorSync::AwaitingOwner);

        relay(&mirror_tx, &mut owner);
        let replies = owner_tx.sent_on(TOPIC);
        assert_eq!(replies.len(), 1);
        assert_eq!(replies[0].event, CURRENT_STATE);
        assert_eq!(replies[0].payload["state"]["gameRule"], "skill_grid");

        relay(&owner_tx, &mut mirror);
        assert_eq!(mirror.mirror_sync(), MirrorSync::Synced);
        assert_eq!(mirror.synced_state(), GameModeState::new("career", "skill_grid", "grid"));
        assert_eq!(mirror.phase(), ModePhase::ModeSelected);
    }

    #[test]
    fn test_no_mode_yet_is_distinct_from_no_answer() {
        let store = MemoryModeStore::new();
        let now = Instant::now();
        let (mut mirror, mirror_tx) = make(SessionRole::Mirror, &store);
        connect(&mut mirror, now);
        assert_eq!(mirror.mirror_sync(), MirrorSync::AwaitingOwner);

        // Owner not online yet: the mirror keeps asking
        mirror_tx.take_sent();
        mirror.poll_timers(now + Duration::from_millis(1_000));
        assert!(mirror_tx.sent_on(TOPIC).is_empty());
        mirror.poll_timers(now + config().state_request_interval());
        assert_eq!(mirror_tx.sent_on(TOPIC)[0].event, REQUEST_STATE);

        // Owner comes online without choosing a mode and announces itself
        let (mut owner, owner_tx) = make(SessionRole::Owner, &store);
        connect(&mut owner, now);
        relay(&owner_tx, &mut mirror);

        assert_eq!(mirror.mirror_sync(), MirrorSync::Synced);
        assert_eq!(mirror.synced_state().game_mode, "");
        assert_eq!(mirror.phase(), ModePhase::Connected);
        assert!(!mirror.can_interact());
    }

    #[test]
    fn test_start_and_exit() {
        let store = MemoryModeStore::new();
        let now = Instant::now();
        let (mut owner, owner_tx) = make(SessionRole::Owner, &store);
        let (mut mirror, _) = make(SessionRole::Mirror, &MemoryModeStore::new());
        connect(&mut owner, now);
        connect(&mut mirror, now);

        assert_eq!(owner.start_game(), Err(ModeError::NoModeSelected));

        owner.change_game_mode("career", "three_piles", "sorting").unwrap();
        owner.start_game().unwrap();
        relay(&owner_tx, &mut mirror);
        assert!(mirror.game_started());
        assert!(mirror.can_interact());
        assert_eq!(mirror.phase(), ModePhase::GameStarted);

        owner.exit_game().unwrap();
        let last = owner_tx.sent_on(TOPIC).pop().unwrap();
        assert_eq!(last.event, MODE_CHANGED);
        relay(&owner_tx, &mut mirror);

        assert_eq!(mirror.synced_state(), GameModeState::default_for("career"));
        assert!(!mirror.game_started());
        assert_eq!(owner.phase(), ModePhase::Connected);
        assert_eq!(store.load(ROOM).unwrap().unwrap(), owner.snapshot());
    }

    #[test]
    fn test_owner_ignores_echo_and_mirror_ignores_requests() {
        let store = MemoryModeStore::new();
        let now = Instant::now();
        let (mut owner, _) = make(SessionRole::Owner, &store);
        connect(&mut owner, now);
        owner.change_game_mode("career", "three_piles", "sorting").unwrap();

        let bogus = ModeSnapshot {
            state: GameModeState::new("other", "x", "y"),
            game_started: true,
        };
        owner.handle_message(&ChannelMessage::new(
            MODE_CHANGED,
            serde_json::to_value(&bogus).unwrap(),
        ));
        assert_eq!(owner.synced_state().deck, "career");

        let (mut mirror, mirror_tx) = make(SessionRole::Mirror, &MemoryModeStore::new());
        connect(&mut mirror, now);
        mirror_tx.take_sent();
        mirror.handle_message(&ChannelMessage::new(REQUEST_STATE, Value::Null));
        assert!(mirror_tx.sent_on(TOPIC).is_empty());
    }

    #[test]
    fn test_owner_restores_after_reload() {
        let store = MemoryModeStore::new();
        let now = Instant::now();
        {
            let (mut owner, _) = make(SessionRole::Owner, &store);
            connect(&mut owner, now);
            owner.change_game_mode("career", "value_ranking", "ranking").unwrap();
            owner.start_game().unwrap();
        }

        let (mut owner, transport) = make(SessionRole::Owner, &store);
        assert!(owner.game_started());
        connect(&mut owner, now);
        let announced = transport.sent_on(TOPIC);
        assert_eq!(announced[0].event, CURRENT_STATE);
        assert_eq!(announced[0].payload["gameStarted"], true);
    }

    #[test]
    fn test_change_while_disconnected_is_announced_later() {
        let store = MemoryModeStore::new();
        let (mut owner, transport) = make(SessionRole::Owner, &store);
        owner.change_game_mode("career", "three_piles", "sorting").unwrap();
        assert!(transport.sent_on(TOPIC).is_empty());

        connect(&mut owner, Instant::now());
        let sent = transport.sent_on(TOPIC);
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].payload["state"]["gameMode"], "sorting");
    }

    #[test]
    fn test_malformed_payload_ignored() {
        let (mut mirror, _) = make(SessionRole::Mirror, &MemoryModeStore::new());
        mirror.handle_message(&ChannelMessage::new(CURRENT_STATE, serde_json::json!("junk")));
        assert_eq!(mirror.mirror_sync(), MirrorSync::AwaitingOwner);
    }

    #[test]
    fn test_dispose_stops_retries() {
        let (mut owner, transport) = make(SessionRole::Owner, &MemoryModeStore::new());
        let now = Instant::now();
        owner.handle_status(SubscribeStatus::TimedOut, None, now);
        owner.dispose();
        owner.poll_timers(now + Duration::from_secs(120));
        assert_eq!(transport.subscribe_count(TOPIC), 1);
    }

    #[test]
    fn test_file_store_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileModeStore::new(dir.path().join("modes"));
        assert_eq!(store.load("room/1").unwrap(), None);

        let snapshot = ModeSnapshot {
            state: GameModeState::new("career", "three_piles", "sorting"),
            game_started: true,
        };
        store.save("room/1", &snapshot).unwrap();
        assert_eq!(store.load("room/1").unwrap(), Some(snapshot));
        assert!(dir.path().join("modes").join("mode-726f6f6d2f31.json").exists());

        fs::write(dir.path().join("modes").join("mode-626164.json"), "{").unwrap();
        assert!(matches!(store.load("bad"), Err(StoreError::Malformed(_))));
    }

    #[test]
    fn test_file_store_keeps_similar_room_ids_apart() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileModeStore::new(dir.path());

        let started = ModeSnapshot {
            state: GameModeState::new("career", "three_piles", "sorting"),
            game_started: true,
        };
        let ranking = ModeSnapshot {
            state: GameModeState::new("values", "value_ranking", "ranking"),
            game_started: false,
        };
        store.save("room/1", &started).unwrap();
        assert_eq!(store.load("room_1").unwrap(), None);
        assert_eq!(store.load("room.1").unwrap(), None);

        store.save("room_1", &ranking).unwrap();
        assert_eq!(store.load("room/1").unwrap(), Some(started));
        assert_eq!(store.load("room_1").unwrap(), Some(ranking));
    }
}
