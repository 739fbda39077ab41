// Copyright (C) 2026 StarHuntingGames
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License
// along with this program.  If not, see <https://www.gnu.org/licenses/>.

use std::{fmt, sync::LazyLock};

use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub const DEFAULT_RECRUITMENT_TIMEOUT_SECONDS: u64 = 600;
pub const DEFAULT_BET_COLLECTION_TIMEOUT_SECONDS: u64 = 180;
pub const DEFAULT_GAME_DURATION_TIMEOUT_SECONDS: u64 = 3600;
pub const DEFAULT_MAX_PARTICIPANTS: usize = 10;
pub const DEFAULT_MIN_PARTICIPANTS: usize = 2;
pub const DEFAULT_PARTICIPATION_REWARD: i64 = 100;

/// Reaction users add to the recruitment announcement to join.
pub const JOIN_REACTION: &str = "🎮";

pub type UserId = u64;
pub type ChannelId = u64;
pub type MessageId = u64;
pub type RoleId = u64;

/// One of the two sides of a custom game. Serialized as `1` or `2`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(try_from = "u8", into = "u8")]
pub enum Side {
    One,
    Two,
}

/// Both sides in display order.
pub const ALL_SIDES: [Side; 2] = [Side::One, Side::Two];

impl Side {
    pub fn number(self) -> u8 {
        match self {
            Side::One => 1,
            Side::Two => 2,
        }
    }

    /// Zero-based position, used to index team label pairs.
    pub fn index(self) -> usize {
        match self {
            Side::One => 0,
            Side::Two => 1,
        }
    }
}

impl TryFrom<u8> for Side {
    type Error = String;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(Side::One),
            2 => Ok(Side::Two),
            other => Err(format!("side must be 1 or 2, got {other}")),
        }
    }
}

impl From<Side> for u8 {
    fn from(side: Side) -> Self {
        side.number()
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.number())
    }
}

/// Identity of a session: the channel it was started in and its announcement message.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionKey {
    pub channel_id: ChannelId,
    pub message_id: MessageId,
}

impl SessionKey {
    pub fn new(channel_id: ChannelId, message_id: MessageId) -> Self {
        Self {
            channel_id,
            message_id,
        }
    }

    /// The string that scopes bets in the ledger.
    pub fn game_id(&self) -> String {
        format!("{}:{}", self.channel_id, self.message_id)
    }
}

impl fmt::Display for SessionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.channel_id, self.message_id)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct BetRecord {
    pub bet_id: String,
    pub user_id: UserId,
    pub game_id: String,
    pub side: Side,
    pub amount: i64,
    pub created_at: DateTime<Utc>,
}

impl BetRecord {
    pub fn new(user_id: UserId, game_id: impl Into<String>, side: Side, amount: i64) -> Self {
        Self {
            bet_id: Uuid::new_v4().to_string(),
            user_id,
            game_id: game_id.into(),
            side,
            amount,
            created_at: Utc::now(),
        }
    }
}

/// The member acting on an interactive control, with the roles the gateway saw on them.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Actor {
    pub user_id: UserId,
    #[serde(default)]
    pub role_ids: Vec<RoleId>,
}

impl Actor {
    pub fn has_role(&self, role_id: Option<RoleId>) -> bool {
        role_id.is_some_and(|role| self.role_ids.contains(&role))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "command", rename_all = "snake_case")]
pub enum InteractionCommand {
    StartRecruitment {
        channel_id: ChannelId,
        actor: Actor,
        game: String,
        #[serde(default)]
        voice_channel_id: Option<ChannelId>,
    },
    Join {
        session: SessionKey,
        user_id: UserId,
    },
    Leave {
        session: SessionKey,
        user_id: UserId,
    },
    StopRecruitment {
        session: SessionKey,
        actor: Actor,
    },
    PlaceBet {
        session: SessionKey,
        actor: Actor,
        side: Side,
        /// Raw text the bettor typed into the stake form.
        amount: String,
    },
    CloseBetting {
        session: SessionKey,
        actor: Actor,
    },
    DeclareWinner {
        session: SessionKey,
        actor: Actor,
        side: Side,
    },
    Refund {
        session: SessionKey,
        actor: Actor,
    },
}

impl InteractionCommand {
    pub fn kind(&self) -> &'static str {
        match self {
            InteractionCommand::StartRecruitment { .. } => "start_recruitment",
            InteractionCommand::Join { .. } => "join",
            InteractionCommand::Leave { .. } => "leave",
            InteractionCommand::StopRecruitment { .. } => "stop_recruitment",
            InteractionCommand::PlaceBet { .. } => "place_bet",
            InteractionCommand::CloseBetting { .. } => "close_betting",
            InteractionCommand::DeclareWinner { .. } => "declare_winner",
            InteractionCommand::Refund { .. } => "refund",
        }
    }

    pub fn session(&self) -> Option<SessionKey> {
        match self {
            InteractionCommand::StartRecruitment { .. } => None,
            InteractionCommand::Join { session, .. }
            | InteractionCommand::Leave { session, .. }
            | InteractionCommand::StopRecruitment { session, .. }
            | InteractionCommand::PlaceBet { session, .. }
            | InteractionCommand::CloseBetting { session, .. }
            | InteractionCommand::DeclareWinner { session, .. }
            | InteractionCommand::Refund { session, .. } => Some(*session),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InteractionEnvelope {
    pub interaction_id: String,
    /// Present when the gateway expects an ephemeral reply to a button or form.
    #[serde(default)]
    pub interaction_token: Option<String>,
    pub command: InteractionCommand,
    pub sent_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InteractionResponse {
    pub interaction_id: String,
    pub accepted: bool,
    pub reason: Option<String>,
    pub notice: String,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SessionEventType {
    RecruitmentStarted,
    ParticipantJoined,
    ParticipantLeft,
    RecruitmentClosed,
    SessionAbandoned,
    TeamsAssigned,
    BettingOpened,
    BetPlaced,
    BettingClosed,
    SessionSettled,
    SessionRefunded,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionEvent {
    pub event_id: String,
    pub game_id: String,
    pub event_type: SessionEventType,
    #[serde(default)]
    pub payload: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

impl SessionEvent {
    pub fn new(key: SessionKey, event_type: SessionEventType, payload: serde_json::Value) -> Self {
        Self {
            event_id: Uuid::new_v4().to_string(),
            game_id: key.game_id(),
            event_type,
            payload,
            created_at: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct GameMap {
    pub name: String,
    pub image_url: String,
}

/// Built-in team labels keyed by normalized game name.
const TEAM_LABELS: [(&str, [&str; 2]); 4] = [
    ("valorant", ["Attack", "Defense"]),
    ("dota 2", ["Radiant", "Dire"]),
    ("league of legends", ["Blue", "Red"]),
    ("cs", ["CT", "T"]),
];

pub const DEFAULT_TEAM_LABELS: [&str; 2] = ["Team 1", "Team 2"];

pub fn normalize_game_name(game: &str) -> String {
    game.trim().to_lowercase()
}

/// Resolve the two team labels for a free-text game name.
pub fn team_labels(game: &str) -> [String; 2] {
    let normalized = normalize_game_name(game);
    let labels = TEAM_LABELS
        .iter()
        .find(|(name, _)| *name == normalized)
        .map(|(_, labels)| *labels)
        .unwrap_or(DEFAULT_TEAM_LABELS);
    labels.map(str::to_string)
}

pub fn valorant_maps() -> Vec<GameMap> {
    const IMAGE_BASE: &str = "https://cmsassets.rgpub.io/sanity/images/dsfx7636/news";
    [
        ("Ascent", "5cb7e65c04a489eccd725ce693fdc11e99982e10-3840x2160.png"),
        ("Bind", "7df1e6ee284810ef0cbf8db369c214a8cbf6578c-3840x2160.png"),
        ("Breeze", "a4a0374222f9cc79f97e03dbb1122056e794176a-3840x2160.png"),
        ("Fracture", "983a6d66978aabd3ccd4e51517298d9a0b5467d9-3840x2160.png"),
        ("Haven", "bccc7b5f8647a4f654d4bb359247bce6e82c77ab-3840x2160.png"),
        ("Sunset", "5101e4ee241fbfca261bf8150230236c46c8b991-3840x2160.png"),
    ]
    .into_iter()
    .map(|(name, file)| GameMap {
        name: name.to_string(),
        image_url: format!("{IMAGE_BASE}/{file}"),
    })
    .collect()
}

pub fn format_currency(amount: i64) -> String {
    format!("{amount}💰")
}

pub fn mention(user_id: UserId) -> String {
    format!("<@{user_id}>")
}

static ENV_VAR_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)\}").expect("env var pattern is a valid regex")
});

/// Replace `${VAR_NAME}` patterns in a string with values from environment variables.
/// Unknown or unset variables are replaced with an empty string.
pub fn expand_env_vars(input: &str) -> String {
    expand_vars_with(input, |name| std::env::var(name).ok())
}

pub fn expand_vars_with(input: &str, lookup: impl Fn(&str) -> Option<String>) -> String {
    ENV_VAR_PATTERN
        .replace_all(input, |caps: &regex::Captures| {
            lookup(&caps[1]).unwrap_or_default()
        })
        .into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn team_labels_match_known_games_case_insensitively() {
        assert_eq!(team_labels("Valorant"), ["Attack", "Defense"]);
        assert_eq!(team_labels("  DOTA 2 "), ["Radiant", "Dire"]);
        assert_eq!(team_labels("cs"), ["CT", "T"]);
    }

    #[test]
    fn team_labels_fall_back_to_numbered_teams() {
        assert_eq!(team_labels("chess"), ["Team 1", "Team 2"]);
        assert_eq!(team_labels(""), ["Team 1", "Team 2"]);
    }

    #[test]
    fn game_id_joins_channel_and_message() {
        let key = SessionKey::new(1234, 98765);
        assert_eq!(key.game_id(), "1234:98765");
        assert_eq!(key.to_string(), key.game_id());
    }

    #[test]
    fn side_serializes_as_number() {
        assert_eq!(serde_json::to_string(&Side::Two).unwrap(), "2");
        assert_eq!(serde_json::from_str::<Side>("1").unwrap(), Side::One);
        assert!(serde_json::from_str::<Side>("3").is_err());
    }

    #[test]
    fn interaction_command_uses_snake_case_tag() {
        let raw = r#"{
            "command": "place_bet",
            "session": {"channel_id": 1, "message_id": 2},
            "actor": {"user_id": 7},
            "side": 2,
            "amount": "150"
        }"#;
        let command: InteractionCommand = serde_json::from_str(raw).unwrap();
        assert_eq!(command.kind(), "place_bet");
        assert_eq!(command.session(), Some(SessionKey::new(1, 2)));
        match command {
            InteractionCommand::PlaceBet {
                actor, side, amount, ..
            } => {
                assert_eq!(actor.user_id, 7);
                assert!(actor.role_ids.is_empty());
                assert_eq!(side, Side::Two);
                assert_eq!(amount, "150");
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn actor_role_check_ignores_unset_roles() {
        let actor = Actor {
            user_id: 1,
            role_ids: vec![10, 20],
        };
        assert!(actor.has_role(Some(20)));
        assert!(!actor.has_role(Some(30)));
        assert!(!actor.has_role(None));
    }

    #[test]
    fn expand_vars_replaces_known_and_blanks_unknown() {
        let expanded = expand_vars_with("bets=${BETS} admin=${MISSING}", |name| {
            (name == "BETS").then(|| "42".to_string())
        });
        assert_eq!(expanded, "bets=42 admin=");
    }

    #[test]
    fn valorant_pool_has_unique_names() {
        let maps = valorant_maps();
        let mut names: Vec<_> = maps.iter().map(|map| map.name.as_str()).collect();
        names.sort_unstable();
        names.dedup();
        assert_eq!(names.len(), maps.len());
    }
}
