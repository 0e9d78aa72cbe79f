//! Consult Sync Library
//!
//! Realtime collaboration state for a counselor and a visitor sharing a
//! card board.
//!
//! # Overview
//!
//! The state module provides:
//!
//! - **Channel Sessions** - Subscriptions to `room:<id>:<topic>` channels with
//!   classified retry and backoff. Rate limits and auth failures stop retrying.
//!
//! - **Mode Coordination** - The counselor owns the game mode and broadcasts
//!   it; visitors mirror it and ask for it when they join late.
//!
//! - **Card Sync** - A per-room card cache that applies store events in
//!   sequence order and overlays optimistic local writes.
//!
//! - **Zones** - Rule-driven zones with capacity limits and one zone per card.
//!
//! - **Allocation Ledger** - A fixed token pool over named areas.
//!
//! # Design Principles
//!
//! 1. **Sans-IO** - Sessions are fed subscribe outcomes, messages and the
//!    current time. The crate never spawns tasks or reads the clock for timers.
//!
//! 2. **Transport errors are state** - Connection problems show up in
//!    [`ChannelStatusView`], not as `Err`.
//!
//! 3. **Validation is local** - Zone and ledger checks are synchronous and
//!    leave state untouched on failure.
//!
//! 4. **Serialization-ready** - Wire and persisted types derive serde.
//!
//! # Example
//!
//! ```rust
//! use std::time::Instant;
//! use consult_sync::{
//!     GameAction, MemoryModeStore, MemoryEventStore, MemoryTransport, Performer,
//!     PerformerType, RoomSync, SessionRole, SubscribeStatus, SyncConfig,
//! };
//!
//! let config = SyncConfig::default();
//! let mut room = RoomSync::new(
//!     "42",
//!     SessionRole::Owner,
//!     Performer::new("c-1", PerformerType::Counselor, "Dana"),
//!     MemoryTransport::new(),
//!     MemoryModeStore::new(),
//!     MemoryEventStore::new(),
//!     &config,
//! );
//!
//! let topic = room.mode_topic().to_string();
//! room.handle_status(&topic, SubscribeStatus::Subscribed, None, Instant::now());
//!
//! room.mode_mut().change_game_mode("career", "three_piles", "sorting").unwrap();
//! room.mode_mut().start_game().unwrap();
//! room.start_board().unwrap();
//! room.execute_action(&GameAction::place("card-1", "like")).unwrap();
//! assert_eq!(room.board().unwrap().zone_of("card-1"), Some("like"));
//! ```

pub mod state;

// Re-export everything from state module at crate root
pub use state::*;
