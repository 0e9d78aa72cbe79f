//! Zone state machine.
//!
//! Validates and applies player actions against a set of named,
//! capacity-bounded zones. The engine is pure: `apply` takes a state and
//! returns a new one, leaving the input untouched.
//!
//! A card id lives in at most one zone across the whole state.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, trace};

use super::rules::{LayoutHint, RuleDefinition, RuleRegistry};

/// A capacity-bounded container of card ids.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Zone {
    pub id: String,
    pub name: String,
    /// Card ids in display order
    pub cards: Vec<String>,
    pub min_cards: Option<usize>,
    pub max_cards: Option<usize>,
    pub layout: LayoutHint,
}

impl Zone {
    pub fn contains(&self, card_id: &str) -> bool {
        self.cards.iter().any(|c| c == card_id)
    }

    pub fn len(&self) -> usize {
        self.cards.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cards.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.max_cards.is_some_and(|max| self.cards.len() >= max)
    }

    fn insert(&mut self, card_id: String, index: Option<usize>) {
        match index {
            Some(i) => {
                let idx = i.min(self.cards.len());
                self.cards.insert(idx, card_id);
            }
            None => self.cards.push(card_id),
        }
    }

    fn remove(&mut self, card_id: &str) {
        self.cards.retain(|c| c != card_id);
    }
}

/// Board state for one game.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GameState {
    pub rule_id: String,
    pub zones: BTreeMap<String, Zone>,
    /// Incremented on every applied action
    pub version: u64,
    pub turn_count: u64,
    /// Cap on cards placed across all zones
    pub total_limit: Option<usize>,
    pub unique_positions: bool,
    /// Applied actions, oldest first
    pub actions: Vec<GameAction>,
}

impl GameState {
    fn from_rule(rule: &RuleDefinition) -> Self {
        let zones = rule
            .zones
            .iter()
            .map(|t| {
                let zone = Zone {
                    id: t.id.clone(),
                    name: t.name.clone(),
                    cards: Vec::new(),
                    min_cards: t.min_cards,
                    max_cards: t.max_cards.or(rule.constraints.max_per_zone),
                    layout: t.layout,
                };
                (t.id.clone(), zone)
            })
            .collect();

        Self {
            rule_id: rule.id.clone(),
            zones,
            version: 0,
            turn_count: 0,
            total_limit: rule.constraints.total_limit,
            unique_positions: rule.constraints.unique_positions,
            actions: Vec::new(),
        }
    }

    pub fn zone(&self, zone_id: &str) -> Option<&Zone> {
        self.zones.get(zone_id)
    }

    /// The zone currently holding a card.
    pub fn zone_of(&self, card_id: &str) -> Option<&str> {
        self.zones
            .values()
            .find(|z| z.contains(card_id))
            .map(|z| z.id.as_str())
    }

    /// Cards placed across all zones.
    pub fn placed_count(&self) -> usize {
        self.zones.values().map(Zone::len).sum()
    }

    /// Zones holding fewer cards than their minimum, as `(zone, have, need)`.
    pub fn missing_minimums(&self) -> Vec<(String, usize, usize)> {
        self.zones
            .values()
            .filter_map(|z| match z.min_cards {
                Some(min) if z.len() < min => Some((z.id.clone(), z.len(), min)),
                _ => None,
            })
            .collect()
    }
}

/// What a player did.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ActionKind {
    Place {
        card_id: String,
        to_zone: String,
        #[serde(default)]
        index: Option<usize>,
    },
    Remove {
        card_id: String,
        from_zone: String,
    },
    Move {
        card_id: String,
        from_zone: String,
        to_zone: String,
        #[serde(default)]
        index: Option<usize>,
    },
    Flip {
        card_id: String,
    },
    Arrange {
        card_id: String,
        #[serde(default)]
        data: Value,
    },
}

impl ActionKind {
    pub fn card_id(&self) -> &str {
        match self {
            Self::Place { card_id, .. }
            | Self::Remove { card_id, .. }
            | Self::Move { card_id, .. }
            | Self::Flip { card_id }
            | Self::Arrange { card_id, .. } => card_id,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Place { .. } => "PLACE",
            Self::Remove { .. } => "REMOVE",
            Self::Move { .. } => "MOVE",
            Self::Flip { .. } => "FLIP",
            Self::Arrange { .. } => "ARRANGE",
        }
    }
}

/// An action with who made it and when.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GameAction {
    #[serde(flatten)]
    pub kind: ActionKind,
    pub player_id: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl GameAction {
    pub fn new(kind: ActionKind) -> Self {
        Self {
            kind,
            player_id: None,
            timestamp: Utc::now(),
        }
    }

    pub fn by(mut self, player_id: impl Into<String>) -> Self {
        self.player_id = Some(player_id.into());
        self
    }

    pub fn place(card_id: impl Into<String>, to_zone: impl Into<String>) -> Self {
        Self::new(ActionKind::Place {
            card_id: card_id.into(),
            to_zone: to_zone.into(),
            index: None,
        })
    }

    pub fn remove(card_id: impl Into<String>, from_zone: impl Into<String>) -> Self {
        Self::new(ActionKind::Remove {
            card_id: card_id.into(),
            from_zone: from_zone.into(),
        })
    }

    pub fn move_card(
        card_id: impl Into<String>,
        from_zone: impl Into<String>,
        to_zone: impl Into<String>,
    ) -> Self {
        Self::new(ActionKind::Move {
            card_id: card_id.into(),
            from_zone: from_zone.into(),
            to_zone: to_zone.into(),
            index: None,
        })
    }

    pub fn flip(card_id: impl Into<String>) -> Self {
        Self::new(ActionKind::Flip {
            card_id: card_id.into(),
        })
    }

    pub fn arrange(card_id: impl Into<String>, data: Value) -> Self {
        Self::new(ActionKind::Arrange {
            card_id: card_id.into(),
            data,
        })
    }

    /// Insert at `index` in the target zone instead of appending.
    pub fn at_index(mut self, at: usize) -> Self {
        match &mut self.kind {
            ActionKind::Place { index, .. } | ActionKind::Move { index, .. } => *index = Some(at),
            _ => {}
        }
        self
    }
}

/// Why an action was rejected.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Rejection {
    #[error("Zone {0} does not exist")]
    ZoneNotFound(String),

    #[error("Zone {0} is full")]
    ZoneFull(String),

    #[error("Card {card_id} is already in zone {zone_id}")]
    AlreadyPlaced { card_id: String, zone_id: String },

    #[error("Card {card_id} is not in zone {zone_id}")]
    NotInZone { card_id: String, zone_id: String },

    #[error("Board already holds its limit of {0} cards")]
    TotalLimitReached(usize),
}

/// Zone engine errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ZoneError {
    #[error("Unknown rule: {0}")]
    UnknownRule(String),

    #[error("Invalid action: {0}")]
    InvalidAction(#[from] Rejection),
}

/// Validates and applies actions per registered rules.
#[derive(Debug, Clone, Default)]
pub struct ZoneEngine {
    registry: RuleRegistry,
}

impl ZoneEngine {
    pub fn new(registry: RuleRegistry) -> Self {
        Self { registry }
    }

    /// An engine with the built-in rules.
    pub fn with_builtin() -> Self {
        Self::new(RuleRegistry::with_builtin())
    }

    pub fn registry(&self) -> &RuleRegistry {
        &self.registry
    }

    pub fn registry_mut(&mut self) -> &mut RuleRegistry {
        &mut self.registry
    }

    /// Empty board for a rule.
    pub fn create_initial_state(&self, rule_id: &str) -> Result<GameState, ZoneError> {
        let rule = self
            .registry
            .get(rule_id)
            .ok_or_else(|| ZoneError::UnknownRule(rule_id.to_string()))?;
        Ok(GameState::from_rule(rule))
    }

    /// Check an action against a state, with the reason if it is rejected.
    pub fn check_action(&self, action: &GameAction, state: &GameState) -> Result<(), Rejection> {
        let existing_zone = |zone_id: &str| {
            state
                .zone(zone_id)
                .ok_or_else(|| Rejection::ZoneNotFound(zone_id.to_string()))
        };

        match &action.kind {
            ActionKind::Place { card_id, to_zone, .. } => {
                let target = existing_zone(to_zone)?;
                if target.is_full() {
                    return Err(Rejection::ZoneFull(to_zone.clone()));
                }
                if let Some(zone_id) = state.zone_of(card_id) {
                    return Err(Rejection::AlreadyPlaced {
                        card_id: card_id.clone(),
                        zone_id: zone_id.to_string(),
                    });
                }
                if let Some(limit) = state.total_limit {
                    if state.placed_count() >= limit {
                        return Err(Rejection::TotalLimitReached(limit));
                    }
                }
                Ok(())
            }
            ActionKind::Remove { card_id, from_zone } => {
                let source = existing_zone(from_zone)?;
                if !source.contains(card_id) {
                    return Err(Rejection::NotInZone {
                        card_id: card_id.clone(),
                        zone_id: from_zone.clone(),
                    });
                }
                Ok(())
            }
            ActionKind::Move {
                card_id,
                from_zone,
                to_zone,
                ..
            } => {
                let source = existing_zone(from_zone)?;
                let target = existing_zone(to_zone)?;
                if !source.contains(card_id) {
                    return Err(Rejection::NotInZone {
                        card_id: card_id.clone(),
                        zone_id: from_zone.clone(),
                    });
                }
                // Reordering within one zone never changes its size
                if from_zone != to_zone && target.is_full() {
                    return Err(Rejection::ZoneFull(to_zone.clone()));
                }
                Ok(())
            }
            ActionKind::Flip { .. } | ActionKind::Arrange { .. } => Ok(()),
        }
    }

    pub fn validate_action(&self, action: &GameAction, state: &GameState) -> bool {
        self.check_action(action, state).is_ok()
    }

    /// Apply an action to a copy of `state`.
    ///
    /// Fails with [`ZoneError::InvalidAction`] if the action does not
    /// validate; callers are expected to have checked first.
    pub fn apply(&self, action: &GameAction, state: &GameState) -> Result<GameState, ZoneError> {
        self.check_action(action, state)?;

        let mut next = state.clone();
        match &action.kind {
            ActionKind::Place {
                card_id,
                to_zone,
                index,
            } => {
                if let Some(zone) = next.zones.get_mut(to_zone) {
                    zone.insert(card_id.clone(), *index);
                }
            }
            ActionKind::Remove { card_id, from_zone } => {
                if let Some(zone) = next.zones.get_mut(from_zone) {
                    zone.remove(card_id);
                }
            }
            ActionKind::Move {
                card_id,
                from_zone,
                to_zone,
                index,
            } => {
                if let Some(zone) = next.zones.get_mut(from_zone) {
                    zone.remove(card_id);
                }
                if let Some(zone) = next.zones.get_mut(to_zone) {
                    zone.insert(card_id.clone(), *index);
                }
            }
            ActionKind::Flip { .. } | ActionKind::Arrange { .. } => {}
        }

        next.version += 1;
        next.turn_count += 1;
        next.actions.push(action.clone());
        trace!(
            target: "consult_sync.zones",
            action = action.kind.as_str(),
            card_id = action.kind.card_id(),
            version = next.version,
            "Action applied"
        );
        Ok(next)
    }

    /// Validate and apply, logging rejections.
    pub fn execute_action(
        &self,
        action: &GameAction,
        state: &GameState,
    ) -> Result<GameState, ZoneError> {
        self.apply(action, state).map_err(|e| {
            debug!(
                target: "consult_sync.zones",
                rule_id = %state.rule_id,
                action = action.kind.as_str(),
                error = %e,
                "Action rejected"
            );
            e
        })
    }
}
