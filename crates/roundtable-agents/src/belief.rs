use std::collections::BTreeMap;

use roundtable_models::{BattlePhase, BeliefUpdate, Camp};

/// Latest belief per agent. Later updates (by turn, then by position) win.
pub fn latest_by_agent(updates: &[BeliefUpdate]) -> BTreeMap<String, BeliefUpdate> {
    let mut latest: BTreeMap<String, BeliefUpdate> = BTreeMap::new();
    for update in updates {
        let replace = latest
            .get(&update.source)
            .map_or(true, |current| update.turn >= current.turn);
        if replace {
            latest.insert(update.source.clone(), update.clone());
        }
    }
    latest
}

pub fn camp_from_direction(direction: &str) -> Camp {
    Camp::from_direction(direction)
}

/// Inputs to battle-phase inference.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BattleInputs {
    pub has_leader: bool,
    pub has_draft: bool,
    pub bull: usize,
    pub bear: usize,
    pub agent_count: usize,
}

/// Duel when both camps are populated and together reach `min(4, max(2, agents))`;
/// otherwise Synthesis once a leader or draft exists; otherwise Gathering.
pub fn infer_battle_phase(inputs: &BattleInputs) -> BattlePhase {
    let duel_floor = inputs.agent_count.clamp(2, 4);
    if inputs.bull > 0 && inputs.bear > 0 && inputs.bull + inputs.bear >= duel_floor {
        return BattlePhase::Duel;
    }
    if inputs.has_leader || inputs.has_draft {
        return BattlePhase::Synthesis;
    }
    BattlePhase::Gathering
}

/// Recomputable view of the panel's current stances.
#[derive(Debug, Default)]
pub struct BeliefTracker {
    latest: BTreeMap<String, BeliefUpdate>,
}

impl BeliefTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn update(&mut self, update: BeliefUpdate) {
        let replace = self
            .latest
            .get(&update.source)
            .map_or(true, |current| update.turn >= current.turn);
        if replace {
            self.latest.insert(update.source.clone(), update);
        }
    }

    pub fn latest(&self) -> &BTreeMap<String, BeliefUpdate> {
        &self.latest
    }

    /// (bull, bear) agent counts.
    pub fn camp_counts(&self) -> (usize, usize) {
        self.latest
            .values()
            .fold((0, 0), |(bull, bear), update| match update.camp() {
                Camp::Bull => (bull + 1, bear),
                Camp::Bear => (bull, bear + 1),
                Camp::Neutral => (bull, bear),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use rust_decimal_macros::dec;

    fn update(source: &str, direction: &str, turn: u32) -> BeliefUpdate {
        BeliefUpdate {
            source: source.to_string(),
            direction: direction.to_string(),
            confidence: dec!(0.6),
            posteriors: None,
            turn,
            timestamp: Utc::now(),
        }
    }

    #[test]
    fn camp_classification() {
        assert_eq!(camp_from_direction("LONG"), Camp::Bull);
        assert_eq!(camp_from_direction("short"), Camp::Bear);
        assert_eq!(camp_from_direction("WAIT"), Camp::Neutral);
        assert_eq!(camp_from_direction("garbage"), Camp::Neutral);
    }

    #[test]
    fn duel_with_two_per_camp_in_six_agents() {
        let phase = infer_battle_phase(&BattleInputs {
            bull: 2,
            bear: 2,
            agent_count: 6,
            ..Default::default()
        });
        assert_eq!(phase, BattlePhase::Duel);
    }

    #[test]
    fn leader_with_one_bull_is_synthesis() {
        let phase = infer_battle_phase(&BattleInputs {
            has_leader: true,
            bull: 1,
            agent_count: 3,
            ..Default::default()
        });
        assert_eq!(phase, BattlePhase::Synthesis);
    }

    #[test]
    fn nothing_is_gathering() {
        assert_eq!(
            infer_battle_phase(&BattleInputs::default()),
            BattlePhase::Gathering
        );
    }

    #[test]
    fn duel_floor_scales_with_small_panels() {
        // Two agents: one per camp is enough.
        let two = BattleInputs {
            bull: 1,
            bear: 1,
            agent_count: 2,
            ..Default::default()
        };
        assert_eq!(infer_battle_phase(&two), BattlePhase::Duel);

        // Five agents: need four committed.
        let five = BattleInputs {
            bull: 2,
            bear: 1,
            agent_count: 5,
            has_draft: true,
            ..Default::default()
        };
        assert_eq!(infer_battle_phase(&five), BattlePhase::Synthesis);
    }

    #[test]
    fn one_sided_panel_never_duels() {
        let phase = infer_battle_phase(&BattleInputs {
            bull: 4,
            bear: 0,
            agent_count: 4,
            ..Default::default()
        });
        assert_eq!(phase, BattlePhase::Gathering);
    }

    #[test]
    fn latest_by_agent_keeps_newest() {
        let updates = vec![
            update("bull", "LONG", 1),
            update("bear", "SHORT", 1),
            update("bull", "WAIT", 2),
        ];
        let latest = latest_by_agent(&updates);
        assert_eq!(latest.len(), 2);
        assert_eq!(latest["bull"].direction, "WAIT");
    }

    #[test]
    fn tracker_counts_camps() {
        let mut tracker = BeliefTracker::new();
        tracker.update(update("a", "LONG", 1));
        tracker.update(update("b", "bearish", 1));
        tracker.update(update("c", "WAIT", 1));
        tracker.update(update("a", "SHORT", 2));
        assert_eq!(tracker.camp_counts(), (0, 2));

        tracker.update(update("a", "LONG", 1));
        assert_eq!(tracker.latest()["a"].direction, "SHORT");
    }
}
