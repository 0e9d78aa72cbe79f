//! Two sessions sharing one room over an in-process transport and store.

use std::time::{Duration, Instant};

use consult_sync::{
    CardEventData, CardEventType, ChannelErrorType, ChannelMessage, GameAction, MemoryEventStore,
    MemoryModeStore, MemoryTransport, MirrorSync, ModePhase, Performer, PerformerType, Position,
    RetryConfig, RoomEvent, RoomSync, SessionRole, StatusOutcome, SubscribeStatus, SyncConfig,
    EVENT_INSERTED,
};
use pretty_assertions::assert_eq;

type Room = RoomSync<MemoryTransport, MemoryModeStore, MemoryEventStore>;

const ROOM: &str = "room-9";

fn config() -> SyncConfig {
    SyncConfig {
        retry: RetryConfig {
            jitter_ratio: 0.0,
            ..RetryConfig::default()
        },
        ..SyncConfig::default()
    }
}

fn counselor(store: &MemoryEventStore) -> (Room, MemoryTransport) {
    let transport = MemoryTransport::new();
    let room = RoomSync::new(
        ROOM,
        SessionRole::Owner,
        Performer::new("c-1", PerformerType::Counselor, "Dana"),
        transport.clone(),
        MemoryModeStore::new(),
        store.clone(),
        &config(),
    );
    (room, transport)
}

fn visitor(store: &MemoryEventStore) -> (Room, MemoryTransport) {
    let transport = MemoryTransport::new();
    let room = RoomSync::new(
        ROOM,
        SessionRole::Mirror,
        Performer::new("v-1", PerformerType::Visitor, "Sam"),
        transport.clone(),
        MemoryModeStore::new(),
        store.clone(),
        &config(),
    );
    (room, transport)
}

fn connect(room: &mut Room, now: Instant) {
    for topic in [room.mode_topic().to_string(), room.cards_topic().to_string()] {
        assert_eq!(
            room.handle_status(&topic, SubscribeStatus::Subscribed, None, now),
            Some(StatusOutcome::Connected)
        );
    }
}

/// Deliver everything sent through `from` to `to`.
fn relay(from: &MemoryTransport, to: &mut Room) {
    for (topic, message) in from.take_sent() {
        to.handle_message(&topic, &message);
    }
}

fn inserted(event: &RoomEvent) -> ChannelMessage {
    ChannelMessage::new(EVENT_INSERTED, serde_json::to_value(event).unwrap())
}

#[test]
fn late_joiner_receives_current_mode() {
    let store = MemoryEventStore::new();
    let (mut owner, owner_tx) = counselor(&store);
    let now = Instant::now();
    connect(&mut owner, now);

    owner.mode_mut().change_game_mode("career", "value_ranking", "ranking").unwrap();
    owner.mode_mut().start_game().unwrap();
    // Nobody was listening yet
    owner_tx.take_sent();

    let (mut guest, guest_tx) = visitor(&store);
    connect(&mut guest, now);
    assert_eq!(guest.mode().mirror_sync(), MirrorSync::AwaitingOwner);
    assert!(!guest.can_interact());

    relay(&guest_tx, &mut owner);
    relay(&owner_tx, &mut guest);

    assert_eq!(guest.mode().mirror_sync(), MirrorSync::Synced);
    assert_eq!(guest.mode().synced_state(), owner.mode().synced_state());
    assert_eq!(guest.mode().phase(), ModePhase::GameStarted);
    assert!(guest.can_interact());
}

#[test]
fn owner_without_mode_answers_with_default() {
    let store = MemoryEventStore::new();
    let (mut guest, guest_tx) = visitor(&store);
    let now = Instant::now();
    connect(&mut guest, now);

    // Owner offline: the guest keeps asking, and knows nobody answered
    guest.poll_timers(now + Duration::from_secs(4));
    assert_eq!(guest_tx.sent_on("room:room-9:mode").len(), 2);
    assert_eq!(guest.mode().mirror_sync(), MirrorSync::AwaitingOwner);

    let (mut owner, owner_tx) = counselor(&store);
    connect(&mut owner, now);
    relay(&guest_tx, &mut owner);
    relay(&owner_tx, &mut guest);

    // Answered, but no mode picked
    assert_eq!(guest.mode().mirror_sync(), MirrorSync::Synced);
    assert!(!guest.mode().synced_state().has_mode());
    assert_eq!(guest.mode().synced_state().deck, "career");
    assert_eq!(guest.mode().phase(), ModePhase::Connected);

    // Synced, so no more requests
    guest.poll_timers(now + Duration::from_secs(10));
    assert!(guest_tx.take_sent().is_empty());
}

#[tokio::test]
async fn card_state_converges_under_reordering() {
    let store = MemoryEventStore::new();
    let (mut owner, _) = counselor(&store);
    let (mut guest, _) = visitor(&store);
    let now = Instant::now();
    connect(&mut owner, now);
    connect(&mut guest, now);
    owner.sync().await.unwrap();
    guest.sync().await.unwrap();

    let mut events = Vec::new();
    events.push(
        owner
            .cards_mut()
            .submit_card_event(
                "card-1",
                CardEventType::CardMoved,
                CardEventData::moved(Position::new(1.0, 1.0)),
            )
            .await
            .unwrap(),
    );
    events.push(
        guest
            .cards_mut()
            .submit_card_event("card-1", CardEventType::CardFlipped, CardEventData::flip(None))
            .await
            .unwrap(),
    );
    events.push(
        owner
            .cards_mut()
            .submit_card_event(
                "card-1",
                CardEventType::CardMoved,
                CardEventData::moved(Position::new(5.0, 2.0)),
            )
            .await
            .unwrap(),
    );

    // Guest hears about them newest first
    let cards_topic = guest.cards_topic().to_string();
    for event in events.iter().rev() {
        guest.handle_message(&cards_topic, &inserted(event));
    }
    let owner_topic = owner.cards_topic().to_string();
    for event in &events {
        owner.handle_message(&owner_topic, &inserted(event));
    }

    guest.sync().await.unwrap();
    owner.sync().await.unwrap();
    assert!(!guest.needs_sync());
    assert_eq!(guest.cards().watermark(), 3);
    assert_eq!(owner.cards().watermark(), 3);

    let card = guest.cards().card("card-1").unwrap().clone();
    assert_eq!(card.position, Position::new(5.0, 2.0));
    assert!(card.is_face_up);
    assert_eq!(guest.cards().get_cards(), owner.cards().get_cards());
}

#[test]
fn rate_limited_channel_stops_until_reconnect() {
    let store = MemoryEventStore::new();
    let (mut guest, guest_tx) = visitor(&store);
    let now = Instant::now();
    let topic = guest.cards_topic().to_string();

    let outcome = guest.handle_status(
        &topic,
        SubscribeStatus::ChannelError,
        Some("429 Too Many Requests"),
        now,
    );
    assert_eq!(outcome, Some(StatusOutcome::Terminal(ChannelErrorType::RateLimited)));

    let status = guest.card_channel_status();
    assert!(status.retry_exhausted);
    assert_eq!(status.error_type, Some(ChannelErrorType::RateLimited));

    guest.poll_timers(now + Duration::from_secs(120));
    assert_eq!(guest_tx.subscribe_count(&topic), 1);

    guest.reconnect();
    assert_eq!(guest_tx.subscribe_count(&topic), 2);
    assert!(!guest.card_channel_status().retry_exhausted);
}

#[test]
fn shared_board_rejects_duplicate_placement() {
    let store = MemoryEventStore::new();
    let (mut owner, _) = counselor(&store);
    connect(&mut owner, Instant::now());
    owner.mode_mut().change_game_mode("career", "three_piles", "sorting").unwrap();
    owner.mode_mut().start_game().unwrap();
    owner.start_board().unwrap();

    owner.execute_action(&GameAction::place("c1", "like")).unwrap();
    assert!(owner.execute_action(&GameAction::place("c1", "neutral")).is_err());

    let board = owner
        .execute_action(&GameAction::move_card("c1", "like", "neutral"))
        .unwrap();
    assert_eq!(board.zone_of("c1"), Some("neutral"));
    assert_eq!(board.placed_count(), 1);
}
