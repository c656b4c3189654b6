//! Engine Configuration
//!
//! Plain structs with defaults and `BOARDSYNC_*` environment overrides.

use std::time::Duration;

use crate::game::state::Resources;

/// Game rules that affect simulation. Must match on authority and replicas.
#[derive(Clone, Debug, PartialEq)]
pub struct RulesConfig {
    /// Resources every player starts with.
    pub starting_resources: Resources,
    /// Faces on the movement die.
    pub dice_sides: u8,
    /// Gold that wins the game outright.
    pub victory_gold: i64,
    /// Turns before the richest player wins.
    pub max_turns: u64,
    /// Effects one resolution may enqueue before it is aborted.
    pub max_resolution_depth: usize,
    /// Hazard level that fires the hazard surge.
    pub hazard_surge_threshold: i64,
    /// Gold every unshielded player loses on a surge.
    pub hazard_surge_damage: i64,
    /// Extra tiles moved while Hastened.
    pub haste_bonus: u16,
    /// Minimum seats to start.
    pub min_players: usize,
    /// Maximum seats.
    pub max_players: usize,
}

impl Default for RulesConfig {
    fn default() -> Self {
        Self {
            starting_resources: Resources {
                gold: 20,
                wood: 2,
                stone: 2,
                food: 5,
            },
            dice_sides: 6,
            victory_gold: 100,
            max_turns: 60,
            max_resolution_depth: 64,
            hazard_surge_threshold: 5,
            hazard_surge_damage: 3,
            haste_bonus: 2,
            min_players: 2,
            max_players: 6,
        }
    }
}

/// Phase deadlines and connection timing.
#[derive(Clone, Debug, PartialEq)]
pub struct TimingConfig {
    /// Deadline for `RollDice`; `None` waits forever.
    pub roll_deadline: Option<Duration>,
    /// Deadline for `Move`.
    pub move_deadline: Option<Duration>,
    /// Deadline for the free-action window.
    pub free_action_deadline: Option<Duration>,
    /// Deadline used instead while the active player is not connected.
    pub disconnected_timeout: Duration,
    /// How long a dropped player may rejoin.
    pub reconnect_window: Duration,
    /// How long a replica waits for a silent authority.
    pub grace_period: Duration,
    /// Authority heartbeat cadence.
    pub heartbeat_interval: Duration,
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            roll_deadline: Some(Duration::from_secs(30)),
            move_deadline: Some(Duration::from_secs(10)),
            free_action_deadline: Some(Duration::from_secs(60)),
            disconnected_timeout: Duration::from_secs(5),
            reconnect_window: Duration::from_secs(300),
            grace_period: Duration::from_secs(30),
            heartbeat_interval: Duration::from_secs(5),
        }
    }
}

/// Checkpoint cadence and retention.
#[derive(Clone, Debug, PartialEq)]
pub struct JournalConfig {
    /// Capture a checkpoint every N records.
    pub checkpoint_interval: u64,
    /// Checkpoints kept; older records are pruned with them.
    pub retained_checkpoints: usize,
}

impl Default for JournalConfig {
    fn default() -> Self {
        Self {
            checkpoint_interval: 5,
            retained_checkpoints: 4,
        }
    }
}

/// Full engine configuration.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct EngineConfig {
    pub rules: RulesConfig,
    pub timing: TimingConfig,
    pub journal: JournalConfig,
}

impl EngineConfig {
    /// Create config from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Create config from `BOARDSYNC_*` keys resolved by `lookup`.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(v) = parse_key(&lookup, "BOARDSYNC_VICTORY_GOLD") {
            config.rules.victory_gold = v;
        }
        if let Some(v) = parse_key(&lookup, "BOARDSYNC_MAX_TURNS") {
            config.rules.max_turns = v;
        }
        if let Some(v) = parse_key(&lookup, "BOARDSYNC_MAX_RESOLUTION_DEPTH") {
            config.rules.max_resolution_depth = v;
        }
        if let Some(v) = parse_key(&lookup, "BOARDSYNC_STARTING_GOLD") {
            config.rules.starting_resources.gold = v;
        }

        if let Some(v) = parse_deadline(&lookup, "BOARDSYNC_ROLL_DEADLINE_SECS") {
            config.timing.roll_deadline = v;
        }
        if let Some(v) = parse_deadline(&lookup, "BOARDSYNC_MOVE_DEADLINE_SECS") {
            config.timing.move_deadline = v;
        }
        if let Some(v) = parse_deadline(&lookup, "BOARDSYNC_FREE_ACTION_DEADLINE_SECS") {
            config.timing.free_action_deadline = v;
        }
        if let Some(v) = parse_key(&lookup, "BOARDSYNC_DISCONNECTED_TIMEOUT_SECS") {
            config.timing.disconnected_timeout = Duration::from_secs(v);
        }
        if let Some(v) = parse_key(&lookup, "BOARDSYNC_RECONNECT_WINDOW_SECS") {
            config.timing.reconnect_window = Duration::from_secs(v);
        }
        if let Some(v) = parse_key(&lookup, "BOARDSYNC_GRACE_PERIOD_SECS") {
            config.timing.grace_period = Duration::from_secs(v);
        }

        if let Some(v) = parse_key(&lookup, "BOARDSYNC_CHECKPOINT_INTERVAL") {
            config.journal.checkpoint_interval = v;
        }
        if let Some(v) = parse_key(&lookup, "BOARDSYNC_RETAINED_CHECKPOINTS") {
            config.journal.retained_checkpoints = v;
        }

        config
    }
}

fn parse_key<T: std::str::FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Option<T> {
    lookup(key).and_then(|v| v.parse().ok())
}

/// `0` disables the deadline.
fn parse_deadline(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Option<Option<Duration>> {
    parse_key::<u64>(lookup, key).map(|secs| (secs > 0).then(|| Duration::from_secs(secs)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_sane() {
        let config = EngineConfig::default();
        assert_eq!(config.rules.dice_sides, 6);
        assert!(config.rules.max_resolution_depth > 0);
        assert!(config.timing.disconnected_timeout < config.timing.roll_deadline.unwrap_or_default());
        assert!(config.journal.checkpoint_interval > 0);
    }

    #[test]
    fn test_lookup_overrides() {
        let vars = [
            ("BOARDSYNC_CHECKPOINT_INTERVAL", "9"),
            ("BOARDSYNC_FREE_ACTION_DEADLINE_SECS", "0"),
            ("BOARDSYNC_MAX_TURNS", "not a number"),
        ];
        let config = EngineConfig::from_lookup(|key| {
            vars.iter().find(|(k, _)| *k == key).map(|(_, v)| v.to_string())
        });
        assert_eq!(config.journal.checkpoint_interval, 9);
        assert_eq!(config.timing.free_action_deadline, None);
        assert_eq!(config.rules.max_turns, RulesConfig::default().max_turns);
        assert_eq!(config.timing.roll_deadline, TimingConfig::default().roll_deadline);
    }
}
