use std::collections::BTreeMap;

use chrono::{DateTime, Utc};

#[derive(Copy, Clone, Debug, serde::Serialize, serde::Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum GameMode {
    #[serde(rename = "flashcard")]
    Flashcard,
    #[serde(rename = "match")]
    Match,
    #[serde(rename = "quiz")]
    Quiz,
    #[serde(rename = "fill-blank")]
    FillBlank,
}

impl GameMode {
    pub const ALL: [GameMode; 4] = [
        GameMode::Flashcard,
        GameMode::Match,
        GameMode::Quiz,
        GameMode::FillBlank,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            GameMode::Flashcard => "flashcard",
            GameMode::Match => "match",
            GameMode::Quiz => "quiz",
            GameMode::FillBlank => "fill-blank",
        }
    }
}

impl std::fmt::Display for GameMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for GameMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        GameMode::ALL
            .into_iter()
            .find(|mode| mode.as_str() == s)
            .ok_or_else(|| format!("unknown game mode `{s}`"))
    }
}

/// One finished round of a game.
#[derive(Clone, Debug, serde::Serialize, serde::Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PracticeSession {
    pub set_id: String,
    pub game_mode: GameMode,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub score: Option<f64>,
    pub completed_at: DateTime<Utc>,
}

#[derive(Clone, Debug, Default, serde::Serialize, serde::Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct PracticeStats {
    pub total_count: u32,
    pub by_mode: BTreeMap<GameMode, u32>,
}

impl PracticeStats {
    pub fn record(&mut self, mode: GameMode) {
        self.total_count += 1;
        *self.by_mode.entry(mode).or_insert(0) += 1;
    }

    pub fn count(&self, mode: GameMode) -> u32 {
        self.by_mode.get(&mode).copied().unwrap_or(0)
    }
}

/// Aggregates raw sessions into per-set statistics.
pub fn tally<'a>(
    sessions: impl IntoIterator<Item = (&'a str, GameMode)>,
) -> BTreeMap<String, PracticeStats> {
    let mut stats: BTreeMap<String, PracticeStats> = BTreeMap::new();
    for (set_id, mode) in sessions {
        stats.entry(set_id.to_string()).or_default().record(mode);
    }
    stats
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_game_mode_wire_names() {
        assert_eq!(
            serde_json::to_string(&GameMode::FillBlank).unwrap(),
            "\"fill-blank\""
        );
        assert_eq!("match".parse::<GameMode>(), Ok(GameMode::Match));
        assert!("memory".parse::<GameMode>().is_err());
    }

    #[test]
    fn test_tally_groups_by_set_and_mode() {
        let stats = tally([
            ("a", GameMode::Quiz),
            ("a", GameMode::Quiz),
            ("a", GameMode::Flashcard),
            ("b", GameMode::Match),
        ]);

        let a = &stats["a"];
        assert_eq!(a.total_count, 3);
        assert_eq!(a.count(GameMode::Quiz), 2);
        assert_eq!(a.count(GameMode::Flashcard), 1);
        assert_eq!(a.count(GameMode::FillBlank), 0);
        assert_eq!(stats["b"].total_count, 1);
    }
}
