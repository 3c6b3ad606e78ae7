use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Latest directional stance reported by one agent.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BeliefUpdate {
    pub source: String,
    /// Raw direction as emitted (LONG/SHORT/WAIT or equivalent).
    pub direction: String,
    /// Clamped to [0, 1].
    pub confidence: Decimal,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub posteriors: Option<BTreeMap<String, Decimal>>,
    pub turn: u32,
    pub timestamp: DateTime<Utc>,
}

impl BeliefUpdate {
    pub fn camp(&self) -> Camp {
        Camp::from_direction(&self.direction)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "UPPERCASE")]
pub enum Camp {
    Bull,
    Bear,
    Neutral,
}

impl Camp {
    /// Classify a raw direction string. Total over all inputs: LONG/BULL map to the
    /// bullish camp, SHORT/BEAR to the bearish camp, everything else is neutral.
    pub fn from_direction(direction: &str) -> Self {
        let upper = direction.to_ascii_uppercase();
        let bull = upper.contains("LONG") || upper.contains("BULL");
        let bear = upper.contains("SHORT") || upper.contains("BEAR");
        match (bull, bear) {
            (true, false) => Camp::Bull,
            (false, true) => Camp::Bear,
            _ => Camp::Neutral,
        }
    }
}

/// Deliberation state inferred from leadership and camp sizes.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "snake_case")]
pub enum BattlePhase {
    #[default]
    Gathering,
    Synthesis,
    Duel,
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn camp_from_direction_examples() {
        assert_eq!(Camp::from_direction("LONG"), Camp::Bull);
        assert_eq!(Camp::from_direction("short"), Camp::Bear);
        assert_eq!(Camp::from_direction("WAIT"), Camp::Neutral);
        assert_eq!(Camp::from_direction("garbage"), Camp::Neutral);
        assert_eq!(Camp::from_direction("bullish"), Camp::Bull);
        assert_eq!(Camp::from_direction("Bearish"), Camp::Bear);
        assert_eq!(Camp::from_direction(""), Camp::Neutral);
    }

    #[test]
    fn contradictory_direction_is_neutral() {
        assert_eq!(Camp::from_direction("LONG/SHORT straddle"), Camp::Neutral);
    }

    #[test]
    fn camp_serializes_uppercase() {
        assert_eq!(serde_json::to_string(&Camp::Bull).unwrap(), "\"BULL\"");
        assert_eq!(serde_json::to_string(&Camp::Neutral).unwrap(), "\"NEUTRAL\"");
    }

    #[test]
    fn belief_camp_uses_direction() {
        let update = BeliefUpdate {
            source: "bear".to_string(),
            direction: "SHORT".to_string(),
            confidence: dec!(0.7),
            posteriors: None,
            turn: 1,
            timestamp: Utc::now(),
        };
        assert_eq!(update.camp(), Camp::Bear);
    }
}
