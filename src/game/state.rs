//! Game State Definitions
//!
//! The PlayerState store and board state owned by the turn engine.
//! Players live in a `Vec` indexed by seat so iteration order is fixed and
//! the whole state serializes cleanly to both JSON and bincode.

use std::fmt;
use serde::{Serialize, Deserialize};

use crate::core::rng::DeterministicRng;
use crate::core::hash::{StateHash, StateHasher, compute_state_hash};
use crate::game::content::{CardKey, ContentRegistry, RewardKey};
use crate::game::effects::TradeOffer;
use crate::game::turn::TurnPhase;

// =============================================================================
// PLAYER ID
// =============================================================================

/// Unique player identifier (UUID as bytes).
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[derive(Default)]
pub struct PlayerId(pub [u8; 16]);

impl PlayerId {
    /// Create from raw bytes.
    pub const fn new(bytes: [u8; 16]) -> Self {
        Self(bytes)
    }

    /// Create a random id.
    pub fn random() -> Self {
        Self(*uuid::Uuid::new_v4().as_bytes())
    }

    /// Create from UUID string.
    pub fn from_uuid_str(s: &str) -> Option<Self> {
        uuid::Uuid::parse_str(s)
            .ok()
            .map(|u| Self(*u.as_bytes()))
    }

    /// Convert to UUID string.
    pub fn to_uuid_string(&self) -> String {
        uuid::Uuid::from_bytes(self.0).to_string()
    }

    /// Get raw bytes.
    pub fn as_bytes(&self) -> &[u8; 16] {
        &self.0
    }
}

impl fmt::Display for PlayerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(&self.0[..4]))
    }
}

// =============================================================================
// RESOURCES
// =============================================================================

/// Resource counters tracked per player.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Resource {
    Gold,
    Wood,
    Stone,
    Food,
}

impl Resource {
    /// All resources in hashing order.
    pub const ALL: [Resource; 4] = [Resource::Gold, Resource::Wood, Resource::Stone, Resource::Food];
}

/// A bundle of resource amounts.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resources {
    #[serde(default)]
    pub gold: i64,
    #[serde(default)]
    pub wood: i64,
    #[serde(default)]
    pub stone: i64,
    #[serde(default)]
    pub food: i64,
}

impl Resources {
    /// Bundle holding only gold.
    pub const fn gold(amount: i64) -> Self {
        Self { gold: amount, wood: 0, stone: 0, food: 0 }
    }

    pub fn get(&self, resource: Resource) -> i64 {
        match resource {
            Resource::Gold => self.gold,
            Resource::Wood => self.wood,
            Resource::Stone => self.stone,
            Resource::Food => self.food,
        }
    }

    pub fn get_mut(&mut self, resource: Resource) -> &mut i64 {
        match resource {
            Resource::Gold => &mut self.gold,
            Resource::Wood => &mut self.wood,
            Resource::Stone => &mut self.stone,
            Resource::Food => &mut self.food,
        }
    }

    /// Apply `delta` without going below zero. Returns the delta actually applied.
    pub fn apply_clamped(&mut self, resource: Resource, delta: i64) -> i64 {
        let slot = self.get_mut(resource);
        let before = *slot;
        *slot = before.saturating_add(delta).max(0);
        slot.saturating_sub(before)
    }

    /// True if every counter is at least the amount in `other`.
    pub fn covers(&self, other: &Resources) -> bool {
        Resource::ALL.iter().all(|r| self.get(*r) >= other.get(*r))
    }

    /// True if every counter is zero.
    pub fn is_empty(&self) -> bool {
        Resource::ALL.iter().all(|r| self.get(*r) == 0)
    }

    /// True if any counter is negative.
    pub fn has_negative(&self) -> bool {
        Resource::ALL.iter().any(|r| self.get(*r) < 0)
    }

    /// Non-zero entries in a fixed order.
    pub fn entries(&self) -> impl Iterator<Item = (Resource, i64)> + '_ {
        Resource::ALL.iter().map(|r| (*r, self.get(*r))).filter(|(_, v)| *v != 0)
    }

    /// Scale every counter.
    pub fn scaled(&self, factor: i64) -> Resources {
        Resources {
            gold: self.gold.saturating_mul(factor),
            wood: self.wood.saturating_mul(factor),
            stone: self.stone.saturating_mul(factor),
            food: self.food.saturating_mul(factor),
        }
    }

    fn hash_into(&self, hasher: &mut StateHasher) {
        for r in Resource::ALL {
            hasher.update_i64(self.get(r));
        }
    }
}

// =============================================================================
// STATUS EFFECTS
// =============================================================================

/// Timed status flags.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StatusKind {
    /// Ignores hazard, surge and event losses.
    Shielded,
    /// Reward grants are doubled.
    Blessed,
    /// Moves extra tiles.
    Hastened,
}

/// A status with its remaining duration.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusEffect {
    pub kind: StatusKind,
    /// Turns of the holder left, counting the current one.
    pub remaining_turns: u32,
}

// =============================================================================
// CONNECTION
// =============================================================================

/// Connection status as seen by the authority.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[derive(Default)]
pub enum ConnectionStatus {
    #[default]
    Connected,
    Disconnected,
    Reconnecting,
}

// =============================================================================
// CARDS
// =============================================================================

/// Session-unique card instance identifier.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct CardInstanceId(pub u64);

impl fmt::Display for CardInstanceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// A card held by a player.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CardInstance {
    pub id: CardInstanceId,
    /// Key of the immutable definition.
    pub key: CardKey,
    /// Plays left before the card is discarded.
    pub charges: u32,
}

// =============================================================================
// PLAYER STATE
// =============================================================================

/// State of a single seated player.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PlayerState {
    /// Unique player ID
    pub id: PlayerId,

    /// Seat index (turn order)
    pub seat: u8,

    /// Resource counters
    pub resources: Resources,

    /// Board tile index
    pub position: u16,

    /// Owned card instances, in acquisition order
    pub hand: Vec<CardInstance>,

    /// Active statuses
    pub statuses: Vec<StatusEffect>,

    /// Connection status
    pub connection: ConnectionStatus,

    /// True only for the player whose turn it is
    pub is_active_turn: bool,

    /// Out of the game
    pub bankrupt: bool,

    /// Highest intent sequence number accepted from this player
    pub last_intent_seq: u64,
}

impl PlayerState {
    /// Create a new player at the start tile.
    pub fn new(id: PlayerId, seat: u8, resources: Resources) -> Self {
        Self {
            id,
            seat,
            resources,
            position: 0,
            hand: Vec::new(),
            statuses: Vec::new(),
            connection: ConnectionStatus::Connected,
            is_active_turn: false,
            bankrupt: false,
            last_intent_seq: 0,
        }
    }

    pub fn gold(&self) -> i64 {
        self.resources.gold
    }

    pub fn has_status(&self, kind: StatusKind) -> bool {
        self.statuses.iter().any(|s| s.kind == kind && s.remaining_turns > 0)
    }

    /// Apply a status, keeping the longer of the old and new durations.
    pub fn apply_status(&mut self, kind: StatusKind, turns: u32) {
        match self.statuses.iter_mut().find(|s| s.kind == kind) {
            Some(existing) => existing.remaining_turns = existing.remaining_turns.max(turns),
            None => self.statuses.push(StatusEffect { kind, remaining_turns: turns }),
        }
    }

    /// Tick statuses down at the end of this player's turn.
    pub fn decay_statuses(&mut self) {
        for status in &mut self.statuses {
            status.remaining_turns = status.remaining_turns.saturating_sub(1);
        }
        self.statuses.retain(|s| s.remaining_turns > 0);
    }

    pub fn card(&self, id: CardInstanceId) -> Option<&CardInstance> {
        self.hand.iter().find(|c| c.id == id)
    }

    pub fn is_connected(&self) -> bool {
        self.connection == ConnectionStatus::Connected
    }

    fn hash_into(&self, hasher: &mut StateHasher) {
        hasher.update_id(&self.id.0);
        hasher.update_u8(self.seat);
        self.resources.hash_into(hasher);
        hasher.update_u16(self.position);

        hasher.update_u32(self.hand.len() as u32);
        for card in &self.hand {
            hasher.update_u64(card.id.0);
            hasher.update_str(&card.key.0);
            hasher.update_u32(card.charges);
        }

        hasher.update_u32(self.statuses.len() as u32);
        for status in &self.statuses {
            hasher.update_u8(status.kind as u8);
            hasher.update_u32(status.remaining_turns);
        }

        hasher.update_u8(self.connection as u8);
        hasher.update_bool(self.is_active_turn);
        hasher.update_bool(self.bankrupt);
        hasher.update_u64(self.last_intent_seq);
    }
}

// =============================================================================
// BOARD
// =============================================================================

/// Tile behaviour.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TileKind {
    /// Passing or landing grants the start reward.
    Start,
    /// Purchasable; visitors pay rent to the owner.
    Property { price: i64, rent: i64 },
    /// Draw from the card deck.
    CardDraw,
    /// Draw from the event deck.
    EventDraw,
    /// Lose gold and raise the hazard level.
    Hazard { damage: i64 },
    /// Grant a fixed reward.
    Reward { reward: RewardKey },
    /// Nothing happens.
    Rest,
}

impl TileKind {
    /// Discriminant for hashing and passive matching.
    pub fn class(&self) -> TileClass {
        match self {
            TileKind::Start => TileClass::Start,
            TileKind::Property { .. } => TileClass::Property,
            TileKind::CardDraw => TileClass::CardDraw,
            TileKind::EventDraw => TileClass::EventDraw,
            TileKind::Hazard { .. } => TileClass::Hazard,
            TileKind::Reward { .. } => TileClass::Reward,
            TileKind::Rest => TileClass::Rest,
        }
    }
}

/// Tile kind without payload.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TileClass {
    Start,
    Property,
    CardDraw,
    EventDraw,
    Hazard,
    Reward,
    Rest,
}

/// A board tile.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tile {
    pub kind: TileKind,
    pub owner: Option<PlayerId>,
}

/// Shared board state.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct BoardState {
    pub tiles: Vec<Tile>,
    /// Global hazard counter
    pub hazard_level: i64,
    /// Next card instance id to hand out
    pub next_card_id: u64,
}

impl BoardState {
    /// Build an unowned board from a layout.
    pub fn from_layout(kinds: &[TileKind]) -> Self {
        Self {
            tiles: kinds
                .iter()
                .map(|kind| Tile { kind: kind.clone(), owner: None })
                .collect(),
            hazard_level: 0,
            next_card_id: 1,
        }
    }

    pub fn len(&self) -> u16 {
        self.tiles.len() as u16
    }

    pub fn is_empty(&self) -> bool {
        self.tiles.is_empty()
    }

    pub fn tile(&self, index: u16) -> Option<&Tile> {
        self.tiles.get(index as usize)
    }

    /// Hand out a fresh card instance id.
    pub fn allocate_card_id(&mut self) -> CardInstanceId {
        let id = CardInstanceId(self.next_card_id);
        self.next_card_id += 1;
        id
    }

    fn hash_into(&self, hasher: &mut StateHasher) {
        hasher.update_u32(self.tiles.len() as u32);
        for tile in &self.tiles {
            hasher.update_u8(tile.kind.class() as u8);
            hasher.update_option(tile.owner, |h, owner| h.update_id(&owner.0));
        }
        hasher.update_i64(self.hazard_level);
        hasher.update_u64(self.next_card_id);
    }
}

// =============================================================================
// GAME STATE
// =============================================================================

/// Complete authoritative game state.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct GameState {
    /// Players by seat
    pub players: Vec<PlayerState>,

    /// Board tiles and counters
    pub board: BoardState,

    /// Deterministic RNG (state + draw cursor)
    pub rng: DeterministicRng,

    /// Seed the RNG was created from
    pub rng_seed: u64,

    /// Current turn, starting at 1 once the game starts
    pub turn_number: u64,

    /// Current phase
    pub phase: TurnPhase,

    /// Seat of the active player
    pub active_seat: u8,

    /// Trade offers issued this turn (open and closed)
    pub trade_offers: Vec<TradeOffer>,

    /// Next trade offer id
    pub next_offer_id: u64,
}

impl GameState {
    /// Create a fresh state. Seats follow the order of `players`.
    pub fn new(
        players: &[PlayerId],
        rng_seed: u64,
        content: &ContentRegistry,
        starting: Resources,
    ) -> Self {
        Self {
            players: players
                .iter()
                .enumerate()
                .map(|(seat, id)| PlayerState::new(*id, seat as u8, starting))
                .collect(),
            board: BoardState::from_layout(&content.board().tiles),
            rng: DeterministicRng::new(rng_seed),
            rng_seed,
            turn_number: 0,
            phase: TurnPhase::AwaitingRoll,
            active_seat: 0,
            trade_offers: Vec::new(),
            next_offer_id: 1,
        }
    }

    pub fn player(&self, id: &PlayerId) -> Option<&PlayerState> {
        self.players.iter().find(|p| p.id == *id)
    }

    pub fn player_mut(&mut self, id: &PlayerId) -> Option<&mut PlayerState> {
        self.players.iter_mut().find(|p| p.id == *id)
    }

    /// The player whose turn it is, if the game is in progress.
    pub fn active_player(&self) -> Option<&PlayerState> {
        if self.phase.is_game_over() {
            return None;
        }
        self.players.get(self.active_seat as usize)
    }

    pub fn active_player_id(&self) -> Option<PlayerId> {
        self.active_player().map(|p| p.id)
    }

    /// Players still in the game.
    pub fn solvent_players(&self) -> impl Iterator<Item = &PlayerState> {
        self.players.iter().filter(|p| !p.bankrupt)
    }

    /// Number of players flagged active. At most one by invariant.
    pub fn active_flag_count(&self) -> usize {
        self.players.iter().filter(|p| p.is_active_turn).count()
    }

    /// Richest solvent player; lowest seat breaks ties.
    pub fn richest(&self) -> Option<PlayerId> {
        let mut best: Option<&PlayerState> = None;
        for player in self.solvent_players() {
            match best {
                Some(b) if b.gold() >= player.gold() => {}
                _ => best = Some(player),
            }
        }
        best.map(|p| p.id)
    }

    pub fn offer(&self, id: u64) -> Option<&TradeOffer> {
        self.trade_offers.iter().find(|o| o.id == id)
    }

    pub fn offer_mut(&mut self, id: u64) -> Option<&mut TradeOffer> {
        self.trade_offers.iter_mut().find(|o| o.id == id)
    }

    /// Compute deterministic hash of game state.
    pub fn compute_hash(&self) -> StateHash {
        compute_state_hash(self.turn_number, self.rng_seed, |hasher| {
            let rng_state = self.rng.state();
            hasher.update_u64(rng_state[0]);
            hasher.update_u64(rng_state[1]);
            hasher.update_u64(self.rng.draws());

            self.phase.hash_into(hasher);
            hasher.update_u8(self.active_seat);

            hasher.update_u32(self.players.len() as u32);
            for player in &self.players {
                player.hash_into(hasher);
            }

            self.board.hash_into(hasher);

            hasher.update_u32(self.trade_offers.len() as u32);
            for offer in &self.trade_offers {
                offer.hash_into(hasher);
            }
            hasher.update_u64(self.next_offer_id);
        })
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn pid(n: u8) -> PlayerId {
        PlayerId::new([n; 16])
    }

    fn test_state() -> GameState {
        let content = ContentRegistry::standard();
        GameState::new(&[pid(1), pid(2), pid(3)], 42, &content, Resources::gold(20))
    }

    #[test]
    fn test_player_id_uuid_roundtrip() {
        let id = PlayerId::random();
        let parsed = PlayerId::from_uuid_str(&id.to_uuid_string());
        assert_eq!(parsed, Some(id));
        assert_eq!(format!("{}", pid(0xab)), "abababab");
    }

    #[test]
    fn test_resources_clamp_at_zero() {
        let mut res = Resources::gold(5);
        assert_eq!(res.apply_clamped(Resource::Gold, -8), -5);
        assert_eq!(res.gold, 0);
        assert_eq!(res.apply_clamped(Resource::Food, 3), 3);
        assert!(res.covers(&Resources { food: 3, ..Default::default() }));
        assert!(!res.covers(&Resources::gold(1)));
    }

    #[test]
    fn test_extreme_deltas_saturate() {
        let mut res = Resources::gold(5);
        assert_eq!(res.apply_clamped(Resource::Gold, i64::MAX), i64::MAX - 5);
        assert_eq!(res.gold, i64::MAX);
        assert_eq!(res.apply_clamped(Resource::Gold, 1), 0);
        assert_eq!(res.apply_clamped(Resource::Gold, i64::MIN), -i64::MAX);
        assert_eq!(res.gold, 0);
        assert_eq!(Resources::gold(i64::MAX).scaled(2).gold, i64::MAX);
    }

    #[test]
    fn test_status_refresh_and_decay() {
        let mut player = PlayerState::new(pid(1), 0, Resources::default());
        player.apply_status(StatusKind::Shielded, 2);
        player.apply_status(StatusKind::Shielded, 1);
        assert_eq!(player.statuses.len(), 1);
        assert_eq!(player.statuses[0].remaining_turns, 2);

        player.decay_statuses();
        assert!(player.has_status(StatusKind::Shielded));
        player.decay_statuses();
        assert!(!player.has_status(StatusKind::Shielded));
        assert!(player.statuses.is_empty());
    }

    #[test]
    fn test_new_state_seats_in_order() {
        let state = test_state();
        assert_eq!(state.players.len(), 3);
        for (i, p) in state.players.iter().enumerate() {
            assert_eq!(p.seat as usize, i);
            assert_eq!(p.position, 0);
            assert!(!p.is_active_turn);
        }
        assert_eq!(state.turn_number, 0);
        assert_eq!(state.rng.draws(), 0);
    }

    #[test]
    fn test_state_hash_determinism() {
        let a = test_state();
        let b = test_state();
        assert_eq!(a.compute_hash(), b.compute_hash());

        let mut c = test_state();
        c.players[1].resources.wood += 1;
        assert_ne!(a.compute_hash(), c.compute_hash());

        let mut d = test_state();
        d.rng.next_u64();
        assert_ne!(a.compute_hash(), d.compute_hash());
    }

    #[test]
    fn test_richest_tie_breaks_by_seat() {
        let mut state = test_state();
        state.players[1].resources.gold = 50;
        state.players[2].resources.gold = 50;
        assert_eq!(state.richest(), Some(pid(2)));

        state.players[1].bankrupt = true;
        assert_eq!(state.richest(), Some(pid(3)));
    }

    #[test]
    fn test_state_json_roundtrip() {
        let state = test_state();
        let json = serde_json::to_string(&state).expect("serialize");
        let back: GameState = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(back.compute_hash(), state.compute_hash());
    }
}
