//! Passive Observers
//!
//! After every pipeline step the observer list is checked against the state
//! changes that step produced. Observers never mutate; they only name the
//! passive effects that should run next.

use crate::config::RulesConfig;
use crate::game::content::{ContentRegistry, PassiveTrigger};
use crate::game::effects::{BoardPassive, Effect, PassiveSource, StateChange};
use crate::game::state::{GameState, PlayerId};

/// Something that reacts to state changes with passive effects.
pub trait PassiveObserver: Send + Sync {
    /// Name for diagnostics.
    fn name(&self) -> &'static str;

    /// Append triggered passives to `triggered`, in a stable order.
    fn observe(
        &self,
        state: &GameState,
        content: &ContentRegistry,
        changes: &[StateChange],
        triggered: &mut Vec<Effect>,
    );
}

/// Card passives held in hands. Scans seats in order, then each hand in
/// acquisition order. A card fires at most once per step.
pub struct CardPassives;

impl CardPassives {
    fn matches(trigger: &PassiveTrigger, holder: PlayerId, state: &GameState, change: &StateChange) -> bool {
        match (trigger, change) {
            (PassiveTrigger::ResourceGained { resource }, StateChange::Resource { player, resource: r, delta }) => {
                *player == holder && r == resource && *delta > 0
            }
            (PassiveTrigger::LandedOn { tile }, StateChange::Moved { player, to, .. }) => {
                *player == holder
                    && state.board.tile(*to).is_some_and(|t| t.kind.class() == *tile)
            }
            (PassiveTrigger::PassedStart, StateChange::Moved { player, passed_start, .. }) => {
                *player == holder && *passed_start
            }
            (PassiveTrigger::HazardRaised, StateChange::Hazard { delta, .. }) => *delta > 0,
            _ => false,
        }
    }
}

impl PassiveObserver for CardPassives {
    fn name(&self) -> &'static str {
        "card_passives"
    }

    fn observe(
        &self,
        state: &GameState,
        content: &ContentRegistry,
        changes: &[StateChange],
        triggered: &mut Vec<Effect>,
    ) {
        for player in state.solvent_players() {
            for card in &player.hand {
                let passive = match content.card(&card.key).and_then(|d| d.passive.as_ref()) {
                    Some(p) => p,
                    None => continue,
                };
                if changes
                    .iter()
                    .any(|c| Self::matches(&passive.trigger, player.id, state, c))
                {
                    triggered.push(Effect::Passive {
                        source: PassiveSource::Card { holder: player.id, card: card.id },
                    });
                }
            }
        }
    }
}

/// Board passive: when the hazard level rises to the threshold, every
/// unshielded player takes damage and the level resets.
pub struct HazardSurge {
    pub threshold: i64,
}

impl PassiveObserver for HazardSurge {
    fn name(&self) -> &'static str {
        "hazard_surge"
    }

    fn observe(
        &self,
        state: &GameState,
        _content: &ContentRegistry,
        changes: &[StateChange],
        triggered: &mut Vec<Effect>,
    ) {
        let raised = changes
            .iter()
            .any(|c| matches!(c, StateChange::Hazard { delta, .. } if *delta > 0));
        if raised && state.board.hazard_level >= self.threshold {
            triggered.push(Effect::Passive {
                source: PassiveSource::Board { passive: BoardPassive::HazardSurge },
            });
        }
    }
}

/// Ordered observer list.
pub struct PassiveObservers {
    observers: Vec<Box<dyn PassiveObserver>>,
}

impl PassiveObservers {
    /// Card passives first, then board passives.
    pub fn standard(rules: &RulesConfig) -> Self {
        Self {
            observers: vec![
                Box::new(CardPassives),
                Box::new(HazardSurge { threshold: rules.hazard_surge_threshold }),
            ],
        }
    }

    /// Passives triggered by `changes`, in execution order.
    pub fn triggered(
        &self,
        state: &GameState,
        content: &ContentRegistry,
        changes: &[StateChange],
    ) -> Vec<Effect> {
        let mut triggered = Vec::new();
        if changes.is_empty() {
            return triggered;
        }
        for observer in &self.observers {
            observer.observe(state, content, changes, &mut triggered);
        }
        triggered
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.observers.iter().map(|o| o.name()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::content::CardKey;
    use crate::game::state::{CardInstance, CardInstanceId, Resource, Resources};

    fn pid(n: u8) -> PlayerId {
        PlayerId::new([n; 16])
    }

    fn give(state: &mut GameState, seat: usize, id: u64, key: &str) {
        state.players[seat].hand.push(CardInstance {
            id: CardInstanceId(id),
            key: CardKey::from(key),
            charges: 1,
        });
    }

    #[test]
    fn test_card_passive_fires_for_holder_only() {
        let content = ContentRegistry::standard();
        let observers = PassiveObservers::standard(&RulesConfig::default());
        let mut state = GameState::new(&[pid(1), pid(2)], 1, &content, Resources::default());
        give(&mut state, 1, 7, "merchant_guild");

        let mine = [StateChange::Resource { player: pid(2), resource: Resource::Gold, delta: 3 }];
        let theirs = [StateChange::Resource { player: pid(1), resource: Resource::Gold, delta: 3 }];
        let loss = [StateChange::Resource { player: pid(2), resource: Resource::Gold, delta: -3 }];

        assert_eq!(
            observers.triggered(&state, &content, &mine),
            vec![Effect::Passive {
                source: PassiveSource::Card { holder: pid(2), card: CardInstanceId(7) }
            }]
        );
        assert!(observers.triggered(&state, &content, &theirs).is_empty());
        assert!(observers.triggered(&state, &content, &loss).is_empty());
    }

    #[test]
    fn test_order_is_seat_then_hand_then_board() {
        let content = ContentRegistry::standard();
        let rules = RulesConfig::default();
        let observers = PassiveObservers::standard(&rules);
        let mut state = GameState::new(&[pid(1), pid(2)], 1, &content, Resources::default());
        give(&mut state, 1, 5, "storm_ward");
        give(&mut state, 0, 9, "storm_ward");
        give(&mut state, 0, 3, "storm_ward");
        state.board.hazard_level = rules.hazard_surge_threshold;

        let changes = [StateChange::Hazard { level: rules.hazard_surge_threshold, delta: 1 }];
        let triggered = observers.triggered(&state, &content, &changes);

        let order: Vec<_> = triggered
            .iter()
            .map(|e| match e {
                Effect::Passive { source: PassiveSource::Card { card, .. } } => card.0,
                _ => 0,
            })
            .collect();
        assert_eq!(order, vec![9, 3, 5, 0]);
        assert_eq!(observers.names(), vec!["card_passives", "hazard_surge"]);
    }
}
