//! Rule definitions for board games.
//!
//! A rule is a record, not code: it lists the zones a game starts with and
//! a few declarative constraints. Adding a game mode means registering
//! another [`RuleDefinition`].

use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// How the presentation layer should lay a zone out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LayoutHint {
    #[default]
    Stack,
    Row,
    Column,
    Grid,
    /// Ordered; a card's index in the zone is its rank
    Ranked,
}

/// Blueprint for one zone.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ZoneTemplate {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub min_cards: Option<usize>,
    #[serde(default)]
    pub max_cards: Option<usize>,
    #[serde(default)]
    pub layout: LayoutHint,
}

impl ZoneTemplate {
    pub fn new(id: impl Into<String>, name: impl Into<String>, layout: LayoutHint) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            min_cards: None,
            max_cards: None,
            layout,
        }
    }

    pub fn with_bounds(mut self, min_cards: Option<usize>, max_cards: Option<usize>) -> Self {
        self.min_cards = min_cards;
        self.max_cards = max_cards;
        self
    }
}

/// Declarative constraints applied across a rule's zones.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RuleConstraints {
    /// Capacity for zones whose template sets no `max_cards`
    pub max_per_zone: Option<usize>,

    /// Cap on cards placed across all zones
    pub total_limit: Option<usize>,

    /// Each card holds a distinct slot (its index in a ranked zone)
    pub unique_positions: bool,
}

/// A named game rule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuleDefinition {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub zones: Vec<ZoneTemplate>,
    #[serde(default)]
    pub constraints: RuleConstraints,
}

/// Rule registration errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RuleError {
    #[error("Rule {0} is already registered")]
    Duplicate(String),

    #[error("Rule {0} defines no zones")]
    NoZones(String),

    #[error("Rule {rule} defines zone {zone} more than once")]
    DuplicateZone { rule: String, zone: String },

    #[error("Rule {rule} zone {zone} has min_cards above max_cards")]
    InvalidBounds { rule: String, zone: String },

    #[error("Failed to parse rule: {0}")]
    Parse(String),
}

impl RuleDefinition {
    /// Parse a rule record from JSON.
    pub fn from_json_str(input: &str) -> Result<Self, RuleError> {
        let rule: Self = serde_json::from_str(input).map_err(|e| RuleError::Parse(e.to_string()))?;
        rule.check()?;
        Ok(rule)
    }

    /// Check the record is internally consistent.
    pub fn check(&self) -> Result<(), RuleError> {
        if self.zones.is_empty() {
            return Err(RuleError::NoZones(self.id.clone()));
        }
        let mut seen = HashSet::new();
        for zone in &self.zones {
            if !seen.insert(zone.id.as_str()) {
                return Err(RuleError::DuplicateZone {
                    rule: self.id.clone(),
                    zone: zone.id.clone(),
                });
            }
            if let (Some(min), Some(max)) = (zone.min_cards, zone.max_cards) {
                if min > max {
                    return Err(RuleError::InvalidBounds {
                        rule: self.id.clone(),
                        zone: zone.id.clone(),
                    });
                }
            }
        }
        Ok(())
    }
}

/// Sort cards into three piles by reaction.
pub fn three_piles() -> RuleDefinition {
    RuleDefinition {
        id: "three_piles".into(),
        name: "Three Piles".into(),
        description: "Sort each card into like, neutral, or dislike".into(),
        zones: vec![
            ZoneTemplate::new("like", "Like", LayoutHint::Stack),
            ZoneTemplate::new("neutral", "Neutral", LayoutHint::Stack),
            ZoneTemplate::new("dislike", "Dislike", LayoutHint::Stack),
        ],
        constraints: RuleConstraints::default(),
    }
}

/// Pick and rank the five values that matter most.
pub fn value_ranking() -> RuleDefinition {
    RuleDefinition {
        id: "value_ranking".into(),
        name: "Value Ranking".into(),
        description: "Rank your top five values".into(),
        zones: vec![
            ZoneTemplate::new("top_values", "Top Values", LayoutHint::Ranked)
                .with_bounds(Some(5), Some(5)),
            ZoneTemplate::new("set_aside", "Set Aside", LayoutHint::Stack),
        ],
        constraints: RuleConstraints {
            unique_positions: true,
            ..RuleConstraints::default()
        },
    }
}

/// Place skills on an enjoyment / proficiency grid.
pub fn skill_grid() -> RuleDefinition {
    RuleDefinition {
        id: "skill_grid".into(),
        name: "Skill Grid".into(),
        description: "Place skills by how much you enjoy them and how good you are".into(),
        zones: vec![
            ZoneTemplate::new("enjoy_strong", "Enjoy / Strong", LayoutHint::Grid),
            ZoneTemplate::new("enjoy_developing", "Enjoy / Developing", LayoutHint::Grid),
            ZoneTemplate::new("avoid_strong", "Avoid / Strong", LayoutHint::Grid),
            ZoneTemplate::new("avoid_developing", "Avoid / Developing", LayoutHint::Grid),
        ],
        constraints: RuleConstraints {
            max_per_zone: Some(10),
            total_limit: Some(20),
            unique_positions: false,
        },
    }
}

/// Rules available to the zone engine, by id.
#[derive(Debug, Clone, Default)]
pub struct RuleRegistry {
    rules: HashMap<String, RuleDefinition>,
}

impl RuleRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry holding the built-in rules.
    pub fn with_builtin() -> Self {
        let mut registry = Self::new();
        for rule in [three_piles(), value_ranking(), skill_grid()] {
            registry.rules.insert(rule.id.clone(), rule);
        }
        registry
    }

    pub fn register(&mut self, rule: RuleDefinition) -> Result<(), RuleError> {
        rule.check()?;
        if self.rules.contains_key(&rule.id) {
            return Err(RuleError::Duplicate(rule.id));
        }
        self.rules.insert(rule.id.clone(), rule);
        Ok(())
    }

    pub fn get(&self, rule_id: &str) -> Option<&RuleDefinition> {
        self.rules.get(rule_id)
    }

    /// Registered rule ids, sorted.
    pub fn ids(&self) -> Vec<&str> {
        let mut ids: Vec<&str> = self.rules.keys().map(String::as_str).collect();
        ids.sort_unstable();
        ids
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}
