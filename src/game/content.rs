//! Static Content Tables
//!
//! Immutable card, event and reward definitions, the deck lists and the board
//! layout. Loaded once per session (built-in set or JSON) and shared behind an
//! `Arc`; the engine only ever reads it.

use std::collections::BTreeMap;
use std::fmt;
use serde::{Serialize, Deserialize};
use thiserror::Error;

use crate::core::hash::{hash_with_domain, StateHash};
use crate::game::state::{Resource, Resources, StatusKind, TileClass, TileKind};

// =============================================================================
// KEYS
// =============================================================================

macro_rules! content_key {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub String);

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self(s.to_string())
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }
    };
}

content_key!(
    /// Key of a [`CardDefinition`].
    CardKey
);
content_key!(
    /// Key of an [`EventCardData`].
    EventKey
);
content_key!(
    /// Key of a [`RewardCardData`].
    RewardKey
);

// =============================================================================
// DEFINITIONS
// =============================================================================

/// One primitive step of a card, event or passive.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CardAction {
    /// Change one of the target's resources.
    Resource { resource: Resource, delta: i64 },
    /// Change a resource for every other solvent player.
    ResourceOthers { resource: Resource, delta: i64 },
    /// Move the target forward.
    Advance { tiles: u16 },
    /// Apply a status to the target.
    Status { status: StatusKind, turns: u32 },
    /// Raise or lower the global hazard level.
    Hazard { delta: i64 },
    /// Queue a reward grant for the target.
    Reward { reward: RewardKey },
    /// Queue an event for the target.
    Event { event: EventKey },
    /// Draw a card from the deck.
    DrawCard,
}

/// What a held card watches for.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PassiveTrigger {
    /// Holder's resource increased.
    ResourceGained { resource: Resource },
    /// Holder landed on a tile of this class.
    LandedOn { tile: TileClass },
    /// Holder passed or landed on start.
    PassedStart,
    /// Global hazard level rose.
    HazardRaised,
}

/// A passive ability carried by a card while it sits in a hand.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PassiveDefinition {
    pub trigger: PassiveTrigger,
    /// Applied to the holder.
    pub actions: Vec<CardAction>,
}

fn default_charges() -> u32 {
    1
}

/// Immutable card definition.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CardDefinition {
    pub key: CardKey,
    pub name: String,
    /// Actions when played. Empty means the card is held only for its passive.
    #[serde(default)]
    pub actions: Vec<CardAction>,
    /// Plays before discard.
    #[serde(default = "default_charges")]
    pub charges: u32,
    /// Played immediately when drawn.
    #[serde(default)]
    pub auto_play: bool,
    #[serde(default)]
    pub passive: Option<PassiveDefinition>,
}

impl CardDefinition {
    pub fn is_playable(&self) -> bool {
        !self.actions.is_empty()
    }
}

/// Immutable event card.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventCardData {
    pub key: EventKey,
    pub name: String,
    /// Applied to the player who triggered the event.
    pub actions: Vec<CardAction>,
}

/// Immutable reward card.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RewardCardData {
    pub key: RewardKey,
    pub name: String,
    #[serde(default)]
    pub resources: Resources,
    /// Cards drawn on grant.
    #[serde(default)]
    pub draw_cards: u32,
}

/// Board tiles plus the start reward.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BoardLayout {
    pub tiles: Vec<TileKind>,
    /// Granted on passing start.
    #[serde(default)]
    pub start_reward: Option<RewardKey>,
}

// =============================================================================
// REGISTRY
// =============================================================================

/// Content loading errors.
#[derive(Debug, Error)]
pub enum ContentError {
    #[error("invalid content json: {0}")]
    Json(#[from] serde_json::Error),

    #[error("duplicate {kind} key: {key}")]
    DuplicateKey { kind: &'static str, key: String },

    #[error("unknown {kind} referenced: {key}")]
    UnknownReference { kind: &'static str, key: String },

    #[error("board must contain a start tile at index 0")]
    MissingStart,
}

/// Serialized form of the content tables.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ContentTables {
    pub cards: Vec<CardDefinition>,
    pub events: Vec<EventCardData>,
    pub rewards: Vec<RewardCardData>,
    pub card_deck: Vec<CardKey>,
    pub event_deck: Vec<EventKey>,
    pub board: BoardLayout,
}

/// Read-only registry of all static content.
#[derive(Clone, Debug)]
pub struct ContentRegistry {
    cards: BTreeMap<CardKey, CardDefinition>,
    events: BTreeMap<EventKey, EventCardData>,
    rewards: BTreeMap<RewardKey, RewardCardData>,
    card_deck: Vec<CardKey>,
    event_deck: Vec<EventKey>,
    board: BoardLayout,
    fingerprint: StateHash,
}

impl ContentRegistry {
    /// Build and validate a registry from tables.
    pub fn from_tables(tables: ContentTables) -> Result<Self, ContentError> {
        let fingerprint = hash_with_domain(
            b"BOARDSYNC_CONTENT_V1",
            &serde_json::to_vec(&tables)?,
        );

        let mut cards = BTreeMap::new();
        for card in tables.cards {
            if cards.contains_key(&card.key) {
                return Err(ContentError::DuplicateKey { kind: "card", key: card.key.0 });
            }
            cards.insert(card.key.clone(), card);
        }

        let mut events = BTreeMap::new();
        for event in tables.events {
            if events.contains_key(&event.key) {
                return Err(ContentError::DuplicateKey { kind: "event", key: event.key.0 });
            }
            events.insert(event.key.clone(), event);
        }

        let mut rewards = BTreeMap::new();
        for reward in tables.rewards {
            if rewards.contains_key(&reward.key) {
                return Err(ContentError::DuplicateKey { kind: "reward", key: reward.key.0 });
            }
            rewards.insert(reward.key.clone(), reward);
        }

        if tables.board.tiles.first() != Some(&TileKind::Start) {
            return Err(ContentError::MissingStart);
        }

        let registry = Self {
            cards,
            events,
            rewards,
            card_deck: tables.card_deck,
            event_deck: tables.event_deck,
            board: tables.board,
            fingerprint,
        };
        registry.check_references()?;
        Ok(registry)
    }

    /// Parse tables from JSON.
    pub fn from_json(json: &str) -> Result<Self, ContentError> {
        let tables: ContentTables = serde_json::from_str(json)?;
        Self::from_tables(tables)
    }

    fn check_references(&self) -> Result<(), ContentError> {
        for key in &self.card_deck {
            if !self.cards.contains_key(key) {
                return Err(ContentError::UnknownReference { kind: "card", key: key.0.clone() });
            }
        }
        for key in &self.event_deck {
            if !self.events.contains_key(key) {
                return Err(ContentError::UnknownReference { kind: "event", key: key.0.clone() });
            }
        }

        let mut actions: Vec<&CardAction> = Vec::new();
        for card in self.cards.values() {
            actions.extend(card.actions.iter());
            if let Some(passive) = &card.passive {
                actions.extend(passive.actions.iter());
            }
        }
        for event in self.events.values() {
            actions.extend(event.actions.iter());
        }
        for action in actions {
            match action {
                CardAction::Reward { reward } => self.require_reward(reward)?,
                CardAction::Event { event } if !self.events.contains_key(event) => {
                    return Err(ContentError::UnknownReference { kind: "event", key: event.0.clone() });
                }
                _ => {}
            }
        }

        for tile in &self.board.tiles {
            if let TileKind::Reward { reward } = tile {
                self.require_reward(reward)?;
            }
        }
        if let Some(reward) = &self.board.start_reward {
            self.require_reward(reward)?;
        }
        Ok(())
    }

    fn require_reward(&self, key: &RewardKey) -> Result<(), ContentError> {
        if self.rewards.contains_key(key) {
            Ok(())
        } else {
            Err(ContentError::UnknownReference { kind: "reward", key: key.0.clone() })
        }
    }

    pub fn card(&self, key: &CardKey) -> Option<&CardDefinition> {
        self.cards.get(key)
    }

    pub fn event(&self, key: &EventKey) -> Option<&EventCardData> {
        self.events.get(key)
    }

    pub fn reward(&self, key: &RewardKey) -> Option<&RewardCardData> {
        self.rewards.get(key)
    }

    pub fn card_deck(&self) -> &[CardKey] {
        &self.card_deck
    }

    pub fn event_deck(&self) -> &[EventKey] {
        &self.event_deck
    }

    pub fn board(&self) -> &BoardLayout {
        &self.board
    }

    /// Hash of the tables; replicas must hold the same content.
    pub fn fingerprint(&self) -> StateHash {
        self.fingerprint
    }

    /// The built-in content set.
    pub fn standard() -> Self {
        match Self::from_tables(standard_tables()) {
            Ok(registry) => registry,
            Err(e) => unreachable!("built-in content is invalid: {e}"),
        }
    }
}

// =============================================================================
// BUILT-IN CONTENT
// =============================================================================

fn card(key: &str, name: &str, actions: Vec<CardAction>) -> CardDefinition {
    CardDefinition {
        key: key.into(),
        name: name.to_string(),
        actions,
        charges: 1,
        auto_play: false,
        passive: None,
    }
}

fn gain(resource: Resource, delta: i64) -> CardAction {
    CardAction::Resource { resource, delta }
}

/// The standard card, event and reward tables with a 20-tile board.
pub fn standard_tables() -> ContentTables {
    let cards = vec![
        card("windfall", "Windfall", vec![gain(Resource::Gold, 6)]),
        card("lumber_contract", "Lumber Contract", vec![gain(Resource::Wood, 3), gain(Resource::Gold, 1)]),
        card("quarry_rights", "Quarry Rights", vec![gain(Resource::Stone, 3)]),
        card("tailwind", "Tailwind", vec![CardAction::Advance { tiles: 3 }]),
        card("aegis", "Aegis", vec![CardAction::Status { status: StatusKind::Shielded, turns: 3 }]),
        card("blessing", "Blessing", vec![CardAction::Status { status: StatusKind::Blessed, turns: 2 }]),
        card("sprint", "Sprint", vec![CardAction::Status { status: StatusKind::Hastened, turns: 1 }]),
        card("sabotage", "Sabotage", vec![CardAction::Hazard { delta: 2 }]),
        card(
            "tax_collector",
            "Tax Collector",
            vec![
                CardAction::ResourceOthers { resource: Resource::Gold, delta: -2 },
                gain(Resource::Gold, 3),
            ],
        ),
        CardDefinition {
            charges: 2,
            ..card("caravan", "Caravan", vec![gain(Resource::Food, 2), gain(Resource::Gold, 2)])
        },
        CardDefinition {
            passive: Some(PassiveDefinition {
                trigger: PassiveTrigger::ResourceGained { resource: Resource::Gold },
                actions: vec![gain(Resource::Food, 1)],
            }),
            ..card("merchant_guild", "Merchant Guild", Vec::new())
        },
        CardDefinition {
            passive: Some(PassiveDefinition {
                trigger: PassiveTrigger::PassedStart,
                actions: vec![gain(Resource::Gold, 3)],
            }),
            ..card("pilgrim_charm", "Pilgrim Charm", Vec::new())
        },
        CardDefinition {
            passive: Some(PassiveDefinition {
                trigger: PassiveTrigger::HazardRaised,
                actions: vec![gain(Resource::Stone, 1)],
            }),
            ..card("storm_ward", "Storm Ward", Vec::new())
        },
        CardDefinition {
            auto_play: true,
            ..card(
                "storm_totem",
                "Storm Totem",
                vec![CardAction::Hazard { delta: 1 }, CardAction::Event { event: "storm".into() }],
            )
        },
        CardDefinition {
            auto_play: true,
            ..card("treasure_map", "Treasure Map", vec![CardAction::Reward { reward: "treasure".into() }])
        },
    ];

    let events = vec![
        EventCardData {
            key: "storm".into(),
            name: "Storm".into(),
            actions: vec![CardAction::Hazard { delta: 1 }, gain(Resource::Food, -2)],
        },
        EventCardData {
            key: "harvest".into(),
            name: "Harvest".into(),
            actions: vec![gain(Resource::Food, 3), gain(Resource::Wood, 1)],
        },
        EventCardData {
            key: "bandits".into(),
            name: "Bandits".into(),
            actions: vec![gain(Resource::Gold, -4)],
        },
        EventCardData {
            key: "festival".into(),
            name: "Festival".into(),
            actions: vec![CardAction::Reward { reward: "festival_purse".into() }],
        },
        EventCardData {
            key: "tailwinds".into(),
            name: "Tailwinds".into(),
            actions: vec![CardAction::Advance { tiles: 2 }],
        },
    ];

    let rewards = vec![
        RewardCardData {
            key: "start_bonus".into(),
            name: "Start Bonus".into(),
            resources: Resources::gold(10),
            draw_cards: 0,
        },
        RewardCardData {
            key: "festival_purse".into(),
            name: "Festival Purse".into(),
            resources: Resources { gold: 5, food: 2, ..Default::default() },
            draw_cards: 0,
        },
        RewardCardData {
            key: "treasure".into(),
            name: "Treasure".into(),
            resources: Resources::gold(8),
            draw_cards: 1,
        },
        RewardCardData {
            key: "market_day".into(),
            name: "Market Day".into(),
            resources: Resources { gold: 3, wood: 1, stone: 1, food: 1 },
            draw_cards: 0,
        },
    ];

    let card_deck = [
        "windfall", "windfall", "lumber_contract", "quarry_rights", "tailwind", "aegis",
        "blessing", "sprint", "sabotage", "tax_collector", "caravan", "merchant_guild",
        "pilgrim_charm", "storm_ward", "storm_totem", "treasure_map",
    ]
    .iter()
    .map(|k| CardKey::from(*k))
    .collect();

    let event_deck = ["storm", "harvest", "bandits", "festival", "tailwinds", "harvest"]
        .iter()
        .map(|k| EventKey::from(*k))
        .collect();

    let property = |price, rent| TileKind::Property { price, rent };
    let tiles = vec![
        TileKind::Start,
        property(12, 3),
        TileKind::CardDraw,
        property(14, 4),
        TileKind::Hazard { damage: 3 },
        TileKind::EventDraw,
        property(18, 5),
        TileKind::Reward { reward: "market_day".into() },
        property(20, 6),
        TileKind::CardDraw,
        TileKind::Rest,
        property(24, 7),
        TileKind::EventDraw,
        TileKind::Hazard { damage: 4 },
        property(26, 8),
        TileKind::CardDraw,
        property(30, 9),
        TileKind::Reward { reward: "market_day".into() },
        TileKind::EventDraw,
        property(35, 10),
    ];

    ContentTables {
        cards,
        events,
        rewards,
        card_deck,
        event_deck,
        board: BoardLayout {
            tiles,
            start_reward: Some("start_bonus".into()),
        },
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_standard_content_is_consistent() {
        let content = ContentRegistry::standard();
        assert_eq!(content.board().tiles.len(), 20);
        assert!(content.card_deck().iter().all(|k| content.card(k).is_some()));
        assert!(content.event_deck().iter().all(|k| content.event(k).is_some()));
        assert!(content.card(&"merchant_guild".into()).is_some_and(|c| !c.is_playable()));
    }

    #[test]
    fn test_json_roundtrip_keeps_fingerprint() {
        let json = serde_json::to_string(&standard_tables()).expect("serialize");
        let loaded = ContentRegistry::from_json(&json).expect("load");
        assert_eq!(loaded.fingerprint(), ContentRegistry::standard().fingerprint());
    }

    #[test]
    fn test_duplicate_key_rejected() {
        let mut tables = standard_tables();
        let dup = tables.cards[0].clone();
        tables.cards.push(dup);
        assert!(matches!(
            ContentRegistry::from_tables(tables),
            Err(ContentError::DuplicateKey { kind: "card", .. })
        ));
    }

    #[test]
    fn test_unknown_reference_rejected() {
        let mut tables = standard_tables();
        tables.card_deck.push("missing".into());
        assert!(matches!(
            ContentRegistry::from_tables(tables),
            Err(ContentError::UnknownReference { kind: "card", .. })
        ));

        let mut tables = standard_tables();
        tables.board.start_reward = Some("nope".into());
        assert!(matches!(
            ContentRegistry::from_tables(tables),
            Err(ContentError::UnknownReference { kind: "reward", .. })
        ));
    }

    #[test]
    fn test_board_must_start_with_start_tile() {
        let mut tables = standard_tables();
        tables.board.tiles.swap(0, 1);
        assert!(matches!(ContentRegistry::from_tables(tables), Err(ContentError::MissingStart)));
    }

    #[test]
    fn test_card_json_defaults() {
        let json = r#"{"key":"x","name":"X","actions":[{"resource":{"resource":"gold","delta":1}}]}"#;
        let card: CardDefinition = serde_json::from_str(json).expect("parse");
        assert_eq!(card.charges, 1);
        assert!(!card.auto_play);
        assert!(card.passive.is_none());
    }
}
