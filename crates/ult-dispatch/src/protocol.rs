use serde::{Deserialize, Serialize};
use std::fmt;
use ult_data::Player;

pub type MatchId = u64;

/// Participant id. The dispatcher sends numbers or strings depending on where the
/// pairing came from.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PlayerId {
    Number(i64),
    Text(String),
}

impl fmt::Display for PlayerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PlayerId::Number(n) => write!(f, "{}", n),
            PlayerId::Text(s) => f.write_str(s),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlayerMeta {
    pub id: PlayerId,
    pub name: String,
    pub character: String,
    /// Costume index; a random one is used when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub color: Option<u8>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temporary: Option<bool>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Ruleset {
    Chaotic,
    #[default]
    Fair,
    Other,
}

/// The single pairing currently authorized to be played.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MatchAssignment {
    pub match_id: MatchId,
    pub first: PlayerMeta,
    pub second: PlayerMeta,
    #[serde(default)]
    pub is_custom_match: bool,
    #[serde(default)]
    pub ruleset: Ruleset,
}

impl MatchAssignment {
    pub fn player(&self, player: Player) -> &PlayerMeta {
        match player {
            Player::One => &self.first,
            Player::Two => &self.second,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WinnerReport {
    pub match_id: MatchId,
    pub winner: PlayerMeta,
    pub loser: PlayerMeta,
    pub is_winner_first_player: bool,
}

impl WinnerReport {
    pub fn new(assignment: &MatchAssignment, winner: Player) -> Self {
        Self {
            match_id: assignment.match_id,
            winner: assignment.player(winner).clone(),
            loser: assignment.player(winner.other()).clone(),
            is_winner_first_player: winner == Player::One,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identify {
    pub key: String,
    pub reconnecting: bool,
}

/// Events the dispatcher sends us. Framed as `{"event": ..., "data": ...}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "lowercase")]
pub enum InboundEvent {
    Match(MatchAssignment),
    /// The pairing is recorded on the dispatcher side; the match may start
    StartMatch,
}

/// Events we send to the dispatcher.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "lowercase")]
pub enum OutboundEvent {
    Identify(Identify),
    /// Ask for the last assignment again
    ReemitLast,
    Winner(WinnerReport),
}
