//! Effects and Their Resolvers
//!
//! The closed set of effects the pipeline can run, the state changes they
//! report, and one resolution function per effect tag.
//!
//! Every resolver checks its preconditions against the current state before
//! it mutates anything. A failed precondition returns
//! [`EngineError::PreconditionNoLongerMet`] and leaves the state untouched.

use serde::{Serialize, Deserialize};

use crate::config::RulesConfig;
use crate::core::hash::StateHasher;
use crate::error::EngineError;
use crate::game::content::{CardAction, ContentRegistry, EventKey, RewardKey, CardKey};
use crate::game::state::{
    CardInstance, CardInstanceId, GameState, PlayerId, Resource, Resources, StatusKind, TileKind,
};

// =============================================================================
// EFFECTS
// =============================================================================

/// Board-level passives.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BoardPassive {
    /// Hazard level reached the surge threshold.
    HazardSurge,
}

/// Where a passive effect comes from.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PassiveSource {
    /// A card sitting in `holder`'s hand.
    Card { holder: PlayerId, card: CardInstanceId },
    /// The board itself.
    Board { passive: BoardPassive },
}

/// A unit of work for the resolution pipeline.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Effect {
    CardPlay { player: PlayerId, card: CardInstanceId },
    TileLanding { player: PlayerId, tile: u16 },
    EventTrigger { player: PlayerId, event: EventKey },
    RewardGrant { player: PlayerId, reward: RewardKey },
    Passive { source: PassiveSource },
    Trade { offer_id: u64, acceptor: PlayerId },
    TilePurchase { player: PlayerId, tile: u16 },
}

impl Effect {
    /// Short tag for logs.
    pub fn tag(&self) -> &'static str {
        match self {
            Effect::CardPlay { .. } => "card_play",
            Effect::TileLanding { .. } => "tile_landing",
            Effect::EventTrigger { .. } => "event_trigger",
            Effect::RewardGrant { .. } => "reward_grant",
            Effect::Passive { .. } => "passive",
            Effect::Trade { .. } => "trade",
            Effect::TilePurchase { .. } => "tile_purchase",
        }
    }
}

/// An observable change produced by an effect.
///
/// Resource deltas are the amounts actually applied after clamping.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StateChange {
    Resource { player: PlayerId, resource: Resource, delta: i64 },
    Moved { player: PlayerId, from: u16, to: u16, passed_start: bool },
    StatusApplied { player: PlayerId, status: StatusKind, turns: u32 },
    CardDrawn { player: PlayerId, card: CardInstanceId, key: CardKey },
    CardConsumed { player: PlayerId, card: CardInstanceId, removed: bool },
    CardTransferred { from: PlayerId, to: PlayerId, card: CardInstanceId },
    TileOwned { player: PlayerId, tile: u16 },
    Hazard { level: i64, delta: i64 },
    RentPaid { payer: PlayerId, owner: PlayerId, amount: i64 },
    Bankrupt { player: PlayerId },
    OfferClosed { offer_id: u64 },
}

/// Result status of one resolved effect.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutcomeStatus {
    Applied,
    Failed { error: EngineError },
}

/// One entry of a turn's ordered outcome list.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EffectOutcome {
    /// Position within the turn
    pub index: u32,
    pub effect: Effect,
    pub status: OutcomeStatus,
    pub changes: Vec<StateChange>,
}

impl EffectOutcome {
    pub fn is_applied(&self) -> bool {
        self.status == OutcomeStatus::Applied
    }
}

// =============================================================================
// TRADES
// =============================================================================

/// What the proposer gives and wants.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TradeTerms {
    #[serde(default)]
    pub give: Resources,
    #[serde(default)]
    pub want: Resources,
    /// Card the proposer hands over.
    #[serde(default)]
    pub card: Option<CardInstanceId>,
}

/// A trade offer issued during the current turn.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TradeOffer {
    pub id: u64,
    pub proposer: PlayerId,
    /// Only this player may accept, if set.
    pub target: Option<PlayerId>,
    pub terms: TradeTerms,
    pub open: bool,
}

impl TradeOffer {
    pub(crate) fn hash_into(&self, hasher: &mut StateHasher) {
        hasher.update_u64(self.id);
        hasher.update_id(&self.proposer.0);
        hasher.update_option(self.target, |h, t| h.update_id(&t.0));
        for r in Resource::ALL {
            hasher.update_i64(self.terms.give.get(r));
            hasher.update_i64(self.terms.want.get(r));
        }
        hasher.update_option(self.terms.card, |h, c| h.update_u64(c.0));
        hasher.update_bool(self.open);
    }
}

// =============================================================================
// RESOLUTION
// =============================================================================

/// Read-only inputs shared by all resolvers.
#[derive(Clone, Copy)]
pub struct ResolveCtx<'a> {
    pub content: &'a ContentRegistry,
    pub rules: &'a RulesConfig,
}

/// Output of one successful resolution.
#[derive(Debug, Default)]
pub struct Resolved {
    pub changes: Vec<StateChange>,
    /// Effects appended to the back of the queue.
    pub follow_ups: Vec<Effect>,
}

fn precondition(msg: impl Into<String>) -> EngineError {
    EngineError::PreconditionNoLongerMet(msg.into())
}

/// Resolve one effect against `state`.
pub fn resolve_effect(
    state: &mut GameState,
    effect: &Effect,
    ctx: ResolveCtx<'_>,
) -> Result<Resolved, EngineError> {
    match effect {
        Effect::CardPlay { player, card } => resolve_card_play(state, *player, *card, ctx),
        Effect::TileLanding { player, tile } => resolve_tile_landing(state, *player, *tile, ctx),
        Effect::EventTrigger { player, event } => resolve_event(state, *player, event, ctx),
        Effect::RewardGrant { player, reward } => resolve_reward(state, *player, reward, ctx),
        Effect::Passive { source } => resolve_passive(state, source, ctx),
        Effect::Trade { offer_id, acceptor } => resolve_trade(state, *offer_id, *acceptor),
        Effect::TilePurchase { player, tile } => resolve_tile_purchase(state, *player, *tile),
    }
}

fn require_solvent(state: &GameState, player: PlayerId) -> Result<(), EngineError> {
    match state.player(&player) {
        Some(p) if !p.bankrupt => Ok(()),
        Some(_) => Err(precondition(format!("player {player} is bankrupt"))),
        None => Err(precondition(format!("player {player} left the game"))),
    }
}

fn resolve_card_play(
    state: &mut GameState,
    player: PlayerId,
    card: CardInstanceId,
    ctx: ResolveCtx<'_>,
) -> Result<Resolved, EngineError> {
    require_solvent(state, player)?;
    let key = state
        .player(&player)
        .and_then(|p| p.card(card))
        .map(|c| c.key.clone())
        .ok_or_else(|| precondition(format!("card {card} no longer in hand")))?;
    let def = ctx
        .content
        .card(&key)
        .filter(|d| d.is_playable())
        .ok_or_else(|| precondition(format!("card {key} is not playable")))?;

    let mut out = Resolved::default();

    if let Some(holder) = state.player_mut(&player) {
        if let Some(pos) = holder.hand.iter().position(|c| c.id == card) {
            holder.hand[pos].charges = holder.hand[pos].charges.saturating_sub(1);
            let removed = holder.hand[pos].charges == 0;
            if removed {
                holder.hand.remove(pos);
            }
            out.changes.push(StateChange::CardConsumed { player, card, removed });
        }
    }

    apply_actions(state, player, &def.actions, false, ctx, &mut out);
    Ok(out)
}

fn resolve_tile_landing(
    state: &mut GameState,
    player: PlayerId,
    tile: u16,
    ctx: ResolveCtx<'_>,
) -> Result<Resolved, EngineError> {
    require_solvent(state, player)?;
    if state.player(&player).map(|p| p.position) != Some(tile) {
        return Err(precondition(format!("player {player} is no longer on tile {tile}")));
    }
    let (kind, owner) = match state.board.tile(tile) {
        Some(t) => (t.kind.clone(), t.owner),
        None => return Err(precondition(format!("tile {tile} does not exist"))),
    };

    let mut out = Resolved::default();
    match kind {
        TileKind::Start | TileKind::Rest => {}
        TileKind::Property { rent, .. } => {
            if let Some(owner) = owner {
                let owner_solvent = state.player(&owner).is_some_and(|p| !p.bankrupt);
                if owner != player && owner_solvent {
                    charge_rent(state, player, owner, rent, &mut out);
                }
            }
        }
        TileKind::CardDraw => draw_card(state, player, ctx, &mut out),
        TileKind::EventDraw => {
            if let Some(event) = state.rng.choose(ctx.content.event_deck()).cloned() {
                out.follow_ups.push(Effect::EventTrigger { player, event });
            }
        }
        TileKind::Hazard { damage } => {
            let shielded = state.player(&player).is_some_and(|p| p.has_status(StatusKind::Shielded));
            if !shielded {
                apply_resource(state, player, Resource::Gold, -damage, &mut out);
            }
            adjust_hazard(state, 1, &mut out);
        }
        TileKind::Reward { reward } => {
            out.follow_ups.push(Effect::RewardGrant { player, reward });
        }
    }
    Ok(out)
}

fn resolve_event(
    state: &mut GameState,
    player: PlayerId,
    event: &EventKey,
    ctx: ResolveCtx<'_>,
) -> Result<Resolved, EngineError> {
    require_solvent(state, player)?;
    let def = ctx
        .content
        .event(event)
        .ok_or_else(|| precondition(format!("unknown event {event}")))?;

    let mut out = Resolved::default();
    apply_actions(state, player, &def.actions, true, ctx, &mut out);
    Ok(out)
}

fn resolve_reward(
    state: &mut GameState,
    player: PlayerId,
    reward: &RewardKey,
    ctx: ResolveCtx<'_>,
) -> Result<Resolved, EngineError> {
    require_solvent(state, player)?;
    let def = ctx
        .content
        .reward(reward)
        .ok_or_else(|| precondition(format!("unknown reward {reward}")))?;

    let blessed = state.player(&player).is_some_and(|p| p.has_status(StatusKind::Blessed));
    let grant = if blessed { def.resources.scaled(2) } else { def.resources };

    let mut out = Resolved::default();
    for (resource, amount) in grant.entries() {
        apply_resource(state, player, resource, amount, &mut out);
    }
    for _ in 0..def.draw_cards {
        draw_card(state, player, ctx, &mut out);
    }
    Ok(out)
}

fn resolve_passive(
    state: &mut GameState,
    source: &PassiveSource,
    ctx: ResolveCtx<'_>,
) -> Result<Resolved, EngineError> {
    let mut out = Resolved::default();
    match source {
        PassiveSource::Card { holder, card } => {
            require_solvent(state, *holder)?;
            let key = state
                .player(holder)
                .and_then(|p| p.card(*card))
                .map(|c| c.key.clone())
                .ok_or_else(|| precondition(format!("card {card} left {holder}'s hand")))?;
            let passive = ctx
                .content
                .card(&key)
                .and_then(|d| d.passive.as_ref())
                .ok_or_else(|| precondition(format!("card {key} has no passive")))?;
            apply_actions(state, *holder, &passive.actions, false, ctx, &mut out);
        }
        PassiveSource::Board { passive: BoardPassive::HazardSurge } => {
            let level = state.board.hazard_level;
            if level < ctx.rules.hazard_surge_threshold {
                return Err(precondition("hazard level below surge threshold"));
            }
            let victims: Vec<PlayerId> = state
                .solvent_players()
                .filter(|p| !p.has_status(StatusKind::Shielded))
                .map(|p| p.id)
                .collect();
            for victim in victims {
                apply_resource(state, victim, Resource::Gold, -ctx.rules.hazard_surge_damage, &mut out);
            }
            adjust_hazard(state, -level, &mut out);
        }
    }
    Ok(out)
}

fn resolve_trade(
    state: &mut GameState,
    offer_id: u64,
    acceptor: PlayerId,
) -> Result<Resolved, EngineError> {
    let offer = match state.offer(offer_id) {
        Some(o) if o.open => o.clone(),
        Some(_) => return Err(precondition(format!("offer {offer_id} already closed"))),
        None => return Err(precondition(format!("offer {offer_id} withdrawn"))),
    };
    require_solvent(state, offer.proposer)?;
    require_solvent(state, acceptor)?;

    let proposer_ok = state.player(&offer.proposer).is_some_and(|p| {
        p.resources.covers(&offer.terms.give)
            && offer.terms.card.map_or(true, |c| p.card(c).is_some())
    });
    if !proposer_ok {
        return Err(precondition(format!("proposer can no longer honour offer {offer_id}")));
    }
    let acceptor_ok = state
        .player(&acceptor)
        .is_some_and(|p| p.resources.covers(&offer.terms.want));
    if !acceptor_ok {
        return Err(precondition(format!("acceptor cannot pay for offer {offer_id}")));
    }

    let mut out = Resolved::default();
    for (resource, amount) in offer.terms.give.entries() {
        apply_resource(state, offer.proposer, resource, -amount, &mut out);
        apply_resource(state, acceptor, resource, amount, &mut out);
    }
    for (resource, amount) in offer.terms.want.entries() {
        apply_resource(state, acceptor, resource, -amount, &mut out);
        apply_resource(state, offer.proposer, resource, amount, &mut out);
    }

    if let Some(card) = offer.terms.card {
        let moved = state.player_mut(&offer.proposer).and_then(|p| {
            let pos = p.hand.iter().position(|c| c.id == card)?;
            Some(p.hand.remove(pos))
        });
        if let (Some(instance), Some(to)) = (moved, state.player_mut(&acceptor)) {
            to.hand.push(instance);
            out.changes.push(StateChange::CardTransferred { from: offer.proposer, to: acceptor, card });
        }
    }

    if let Some(o) = state.offer_mut(offer_id) {
        o.open = false;
    }
    out.changes.push(StateChange::OfferClosed { offer_id });
    Ok(out)
}

fn resolve_tile_purchase(
    state: &mut GameState,
    player: PlayerId,
    tile: u16,
) -> Result<Resolved, EngineError> {
    require_solvent(state, player)?;
    if state.player(&player).map(|p| p.position) != Some(tile) {
        return Err(precondition(format!("player {player} is no longer on tile {tile}")));
    }
    let price = match state.board.tile(tile) {
        Some(t) if t.owner.is_none() => match t.kind {
            TileKind::Property { price, .. } => price,
            _ => return Err(precondition(format!("tile {tile} is not a property"))),
        },
        _ => return Err(precondition(format!("tile {tile} already owned"))),
    };
    if state.player(&player).map_or(0, |p| p.gold()) < price {
        return Err(precondition(format!("player {player} can no longer afford tile {tile}")));
    }

    let mut out = Resolved::default();
    apply_resource(state, player, Resource::Gold, -price, &mut out);
    if let Some(t) = state.board.tiles.get_mut(tile as usize) {
        t.owner = Some(player);
    }
    out.changes.push(StateChange::TileOwned { player, tile });
    Ok(out)
}

// =============================================================================
// PRIMITIVES
// =============================================================================

/// Apply a list of content actions to `target`.
///
/// With `shield_losses`, negative resource actions are skipped for Shielded
/// targets.
fn apply_actions(
    state: &mut GameState,
    target: PlayerId,
    actions: &[CardAction],
    shield_losses: bool,
    ctx: ResolveCtx<'_>,
    out: &mut Resolved,
) {
    for action in actions {
        match action {
            CardAction::Resource { resource, delta } => {
                let shielded = shield_losses
                    && *delta < 0
                    && state.player(&target).is_some_and(|p| p.has_status(StatusKind::Shielded));
                if !shielded {
                    apply_resource(state, target, *resource, *delta, out);
                }
            }
            CardAction::ResourceOthers { resource, delta } => {
                let others: Vec<PlayerId> = state
                    .solvent_players()
                    .filter(|p| p.id != target)
                    .filter(|p| *delta >= 0 || !p.has_status(StatusKind::Shielded))
                    .map(|p| p.id)
                    .collect();
                for other in others {
                    apply_resource(state, other, *resource, *delta, out);
                }
            }
            CardAction::Advance { tiles } => {
                let (change, follow_ups) = move_player(state, target, *tiles, ctx.content);
                out.changes.extend(change);
                out.follow_ups.extend(follow_ups);
            }
            CardAction::Status { status, turns } => {
                if let Some(p) = state.player_mut(&target) {
                    p.apply_status(*status, *turns);
                    out.changes.push(StateChange::StatusApplied {
                        player: target,
                        status: *status,
                        turns: *turns,
                    });
                }
            }
            CardAction::Hazard { delta } => adjust_hazard(state, *delta, out),
            CardAction::Reward { reward } => out.follow_ups.push(Effect::RewardGrant {
                player: target,
                reward: reward.clone(),
            }),
            CardAction::Event { event } => out.follow_ups.push(Effect::EventTrigger {
                player: target,
                event: event.clone(),
            }),
            CardAction::DrawCard => draw_card(state, target, ctx, out),
        }
    }
}

fn apply_resource(
    state: &mut GameState,
    player: PlayerId,
    resource: Resource,
    delta: i64,
    out: &mut Resolved,
) {
    if let Some(p) = state.player_mut(&player) {
        let applied = p.resources.apply_clamped(resource, delta);
        if applied != 0 {
            out.changes.push(StateChange::Resource { player, resource, delta: applied });
        }
    }
}

fn adjust_hazard(state: &mut GameState, delta: i64, out: &mut Resolved) {
    let before = state.board.hazard_level;
    state.board.hazard_level = before.saturating_add(delta).max(0);
    let applied = state.board.hazard_level.saturating_sub(before);
    if applied != 0 {
        out.changes.push(StateChange::Hazard { level: state.board.hazard_level, delta: applied });
    }
}

fn charge_rent(state: &mut GameState, payer: PlayerId, owner: PlayerId, rent: i64, out: &mut Resolved) {
    let available = state.player(&payer).map_or(0, |p| p.gold());
    let amount = rent.min(available);
    apply_resource(state, payer, Resource::Gold, -amount, out);
    apply_resource(state, owner, Resource::Gold, amount, out);
    out.changes.push(StateChange::RentPaid { payer, owner, amount });

    if available < rent {
        if let Some(p) = state.player_mut(&payer) {
            p.bankrupt = true;
        }
        for tile in &mut state.board.tiles {
            if tile.owner == Some(payer) {
                tile.owner = None;
            }
        }
        state.trade_offers.retain(|o| o.proposer != payer);
        out.changes.push(StateChange::Bankrupt { player: payer });
    }
}

fn draw_card(state: &mut GameState, player: PlayerId, ctx: ResolveCtx<'_>, out: &mut Resolved) {
    let key = match state.rng.choose(ctx.content.card_deck()) {
        Some(k) => k.clone(),
        None => return,
    };
    let def = match ctx.content.card(&key) {
        Some(d) => d,
        None => return,
    };
    let id = state.board.allocate_card_id();
    if let Some(p) = state.player_mut(&player) {
        p.hand.push(CardInstance { id, key: key.clone(), charges: def.charges.max(1) });
        out.changes.push(StateChange::CardDrawn { player, card: id, key });
        if def.auto_play && def.is_playable() {
            out.follow_ups.push(Effect::CardPlay { player, card: id });
        }
    }
}

/// Move `player` forward `steps` tiles.
///
/// Returns the movement change (if the player exists) and the follow-up
/// effects: the start reward when start was passed, then the landing.
pub fn move_player(
    state: &mut GameState,
    player: PlayerId,
    steps: u16,
    content: &ContentRegistry,
) -> (Option<StateChange>, Vec<Effect>) {
    let len = state.board.len().max(1) as u32;
    let p = match state.player_mut(&player) {
        Some(p) => p,
        None => return (None, Vec::new()),
    };

    let from = p.position;
    let total = from as u32 + steps as u32;
    let to = (total % len) as u16;
    let passed_start = steps > 0 && total >= len;
    p.position = to;

    let mut follow_ups = Vec::new();
    if passed_start {
        if let Some(reward) = &content.board().start_reward {
            follow_ups.push(Effect::RewardGrant { player, reward: reward.clone() });
        }
    }
    follow_ups.push(Effect::TileLanding { player, tile: to });

    (Some(StateChange::Moved { player, from, to, passed_start }), follow_ups)
}

// =============================================================================
// TESTS
// =============================================================================
