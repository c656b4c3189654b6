//! Effect Resolution Pipeline
//!
//! Runs a batch of effects to completion on a scratch copy of the state.
//!
//! Ordering:
//! 1. Effects run FIFO.
//! 2. After each effect, passive observers are checked against the changes it
//!    produced; triggered passives jump ahead of the remaining queue.
//! 3. Follow-up effects (rewards, landings, events) are appended to the back.
//!
//! The total number of effects enqueued in one resolution is bounded. When the
//! bound is exceeded the scratch state is dropped, so the caller's state
//! (RNG included) is exactly what it was before resolution began.

use std::collections::VecDeque;

use crate::config::RulesConfig;
use crate::error::EngineError;
use crate::game::content::ContentRegistry;
use crate::game::effects::{resolve_effect, Effect, EffectOutcome, OutcomeStatus, ResolveCtx, StateChange};
use crate::game::passive::PassiveObservers;
use crate::game::state::GameState;

/// Pipeline with its observer list and depth bound.
pub struct EffectPipeline {
    max_depth: usize,
    observers: PassiveObservers,
}

impl EffectPipeline {
    pub fn new(rules: &RulesConfig) -> Self {
        Self {
            max_depth: rules.max_resolution_depth,
            observers: PassiveObservers::standard(rules),
        }
    }

    pub fn observers(&self) -> &PassiveObservers {
        &self.observers
    }

    /// Resolve `initial` against `state`.
    ///
    /// `prior` holds changes made just before resolution (for example a
    /// move); passives they trigger run before `initial`. Outcome indices
    /// start at `first_index`.
    pub fn resolve(
        &self,
        state: &mut GameState,
        content: &ContentRegistry,
        rules: &RulesConfig,
        prior: &[StateChange],
        initial: Vec<Effect>,
        first_index: u32,
    ) -> Result<Vec<EffectOutcome>, EngineError> {
        let ctx = ResolveCtx { content, rules };
        let mut scratch = state.clone();
        let mut queue: VecDeque<Effect> = VecDeque::new();
        let mut enqueued = 0usize;

        let passives = self.observers.triggered(&scratch, content, prior);
        self.push_front(&mut queue, passives, &mut enqueued)?;
        self.push_back(&mut queue, initial, &mut enqueued)?;

        let mut outcomes = Vec::new();
        while let Some(effect) = queue.pop_front() {
            let index = first_index + outcomes.len() as u32;

            match resolve_effect(&mut scratch, &effect, ctx) {
                Ok(resolved) => {
                    #[cfg(feature = "debug-tracing")]
                    tracing::trace!(
                        index,
                        tag = effect.tag(),
                        changes = resolved.changes.len(),
                        follow_ups = resolved.follow_ups.len(),
                        "effect applied"
                    );

                    let passives = self.observers.triggered(&scratch, content, &resolved.changes);
                    self.push_front(&mut queue, passives, &mut enqueued)?;
                    self.push_back(&mut queue, resolved.follow_ups, &mut enqueued)?;

                    outcomes.push(EffectOutcome {
                        index,
                        effect,
                        status: OutcomeStatus::Applied,
                        changes: resolved.changes,
                    });
                }
                Err(error) => {
                    #[cfg(feature = "debug-tracing")]
                    tracing::trace!(index, tag = effect.tag(), %error, "effect failed");

                    outcomes.push(EffectOutcome {
                        index,
                        effect,
                        status: OutcomeStatus::Failed { error },
                        changes: Vec::new(),
                    });
                }
            }
        }

        *state = scratch;
        Ok(outcomes)
    }

    fn charge(&self, enqueued: &mut usize, count: usize) -> Result<(), EngineError> {
        *enqueued += count;
        if *enqueued > self.max_depth {
            return Err(EngineError::EffectLoopDetected {
                enqueued: *enqueued,
                limit: self.max_depth,
            });
        }
        Ok(())
    }

    /// Queue `effects` ahead of everything, keeping their relative order.
    fn push_front(
        &self,
        queue: &mut VecDeque<Effect>,
        effects: Vec<Effect>,
        enqueued: &mut usize,
    ) -> Result<(), EngineError> {
        self.charge(enqueued, effects.len())?;
        for effect in effects.into_iter().rev() {
            queue.push_front(effect);
        }
        Ok(())
    }

    fn push_back(
        &self,
        queue: &mut VecDeque<Effect>,
        effects: Vec<Effect>,
        enqueued: &mut usize,
    ) -> Result<(), EngineError> {
        self.charge(enqueued, effects.len())?;
        queue.extend(effects);
        Ok(())
    }
}

// =============================================================================
// TESTS
// =============================================================================
