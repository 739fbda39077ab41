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

use std::{collections::HashMap, fmt::Display, str::FromStr, time::Duration};

use hatori_common::{
    ChannelId, DEFAULT_BET_COLLECTION_TIMEOUT_SECONDS, DEFAULT_GAME_DURATION_TIMEOUT_SECONDS,
    DEFAULT_MAX_PARTICIPANTS, DEFAULT_MIN_PARTICIPANTS, DEFAULT_PARTICIPATION_REWARD,
    DEFAULT_RECRUITMENT_TIMEOUT_SECONDS, GameMap, RoleId, expand_env_vars, normalize_game_name,
    team_labels, valorant_maps,
};
use serde::Deserialize;
use tracing::{info, warn};

/// Everything the session engine needs to run a custom game.
#[derive(Debug, Clone)]
pub struct EngineSettings {
    pub recruitment_timeout: Duration,
    pub bet_collection_timeout: Duration,
    pub game_duration_timeout: Duration,
    pub max_participants: usize,
    pub min_participants: usize,
    pub participation_reward: i64,
    /// Close recruitment as soon as the participant limit is reached.
    pub close_when_full: bool,
    pub admin_role_id: Option<RoleId>,
    pub manager_role_id: Option<RoleId>,
    /// Channel holding the live odds summaries. Summaries are skipped when unset.
    pub bets_channel_id: Option<ChannelId>,
    pub catalog: GameCatalog,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            recruitment_timeout: Duration::from_secs(DEFAULT_RECRUITMENT_TIMEOUT_SECONDS),
            bet_collection_timeout: Duration::from_secs(DEFAULT_BET_COLLECTION_TIMEOUT_SECONDS),
            game_duration_timeout: Duration::from_secs(DEFAULT_GAME_DURATION_TIMEOUT_SECONDS),
            max_participants: DEFAULT_MAX_PARTICIPANTS,
            min_participants: DEFAULT_MIN_PARTICIPANTS,
            participation_reward: DEFAULT_PARTICIPATION_REWARD,
            close_when_full: false,
            admin_role_id: None,
            manager_role_id: None,
            bets_channel_id: None,
            catalog: GameCatalog::default(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct KafkaSettings {
    pub enabled: bool,
    pub bootstrap_servers: String,
    pub interaction_topic: String,
    pub event_topic: String,
    pub consumer_group_id: String,
}

#[derive(Debug, Clone)]
pub struct LedgerSettings {
    pub dynamo_enabled: bool,
    pub users_table: String,
    pub bets_table: String,
}

#[derive(Debug, Clone)]
pub struct Settings {
    pub bind: String,
    pub platform_bridge_base_url: String,
    pub engine: EngineSettings,
    pub kafka: KafkaSettings,
    pub ledger: LedgerSettings,
}

impl Settings {
    pub fn from_env() -> anyhow::Result<Self> {
        let mut settings = Self::from_lookup(|name| std::env::var(name).ok())?;
        settings.engine.catalog = load_game_catalog();
        Ok(settings)
    }

    /// Build settings from any variable source. Malformed numbers are errors, unset
    /// variables fall back to defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> anyhow::Result<Self> {
        let text = |name: &str, default: &str| {
            lookup(name)
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
                .unwrap_or_else(|| default.to_string())
        };

        let seconds = |name: &str, default: u64| -> anyhow::Result<Duration> {
            let value = parse_var::<u64>(&lookup, name)?.unwrap_or(default);
            anyhow::ensure!(value > 0, "environment variable {name} must be positive");
            Ok(Duration::from_secs(value))
        };

        let max_participants =
            parse_var::<usize>(&lookup, "MAX_PARTICIPANTS")?.unwrap_or(DEFAULT_MAX_PARTICIPANTS);
        let min_participants =
            parse_var::<usize>(&lookup, "MIN_PARTICIPANTS")?.unwrap_or(DEFAULT_MIN_PARTICIPANTS);
        anyhow::ensure!(
            min_participants >= 2 && min_participants <= max_participants,
            "MIN_PARTICIPANTS must be between 2 and MAX_PARTICIPANTS ({max_participants})"
        );
        let participation_reward = parse_var::<i64>(&lookup, "PARTICIPATION_REWARD")?
            .unwrap_or(DEFAULT_PARTICIPATION_REWARD);
        anyhow::ensure!(
            participation_reward >= 0,
            "PARTICIPATION_REWARD cannot be negative"
        );

        let engine = EngineSettings {
            recruitment_timeout: seconds(
                "RECRUITMENT_TIMEOUT_SECONDS",
                DEFAULT_RECRUITMENT_TIMEOUT_SECONDS,
            )?,
            bet_collection_timeout: seconds(
                "BET_COLLECTION_TIMEOUT_SECONDS",
                DEFAULT_BET_COLLECTION_TIMEOUT_SECONDS,
            )?,
            game_duration_timeout: seconds(
                "GAME_DURATION_TIMEOUT_SECONDS",
                DEFAULT_GAME_DURATION_TIMEOUT_SECONDS,
            )?,
            max_participants,
            min_participants,
            participation_reward,
            close_when_full: parse_var::<bool>(&lookup, "CLOSE_RECRUITMENT_WHEN_FULL")?
                .unwrap_or(false),
            admin_role_id: parse_var(&lookup, "ADMIN_ROLE_ID")?,
            manager_role_id: parse_var(&lookup, "CUSTOM_GAME_MANAGER_ROLE_ID")?,
            bets_channel_id: parse_var(&lookup, "BETS_CHANNEL_ID")?,
            catalog: GameCatalog::default(),
        };

        let kafka = KafkaSettings {
            enabled: parse_var::<bool>(&lookup, "KAFKA_ENABLED")?.unwrap_or(true),
            bootstrap_servers: text("KAFKA_BOOTSTRAP_SERVERS", "kafka:9092"),
            interaction_topic: text("INTERACTION_TOPIC", "hatori.interactions.v1"),
            event_topic: text("SESSION_EVENT_TOPIC", "hatori.custom_game.events.v1"),
            consumer_group_id: text("CUSTOM_GAME_CONSUMER_GROUP_ID", "custom-game-service-v1"),
        };

        let ledger = LedgerSettings {
            dynamo_enabled: lookup("DYNAMODB_ENDPOINT").is_some()
                || lookup("AWS_REGION").is_some(),
            users_table: text("LEDGER_USERS_TABLE", "users"),
            bets_table: text("LEDGER_BETS_TABLE", "bets"),
        };

        Ok(Self {
            bind: text("CUSTOM_GAME_BIND", "0.0.0.0:8095"),
            platform_bridge_base_url: text(
                "PLATFORM_BRIDGE_BASE_URL",
                "http://platform-bridge:8090",
            ),
            engine,
            kafka,
            ledger,
        })
    }
}

fn parse_var<T>(lookup: &impl Fn(&str) -> Option<String>, name: &str) -> anyhow::Result<Option<T>>
where
    T: FromStr,
    T::Err: Display,
{
    let Some(raw) = lookup(name) else {
        return Ok(None);
    };
    let value = raw.trim();
    if value.is_empty() {
        return Ok(None);
    }
    value
        .parse::<T>()
        .map(Some)
        .map_err(|error| anyhow::anyhow!("environment variable {name} is invalid ({value}): {error}"))
}

/// Team labels and map pools per game, keyed by normalized game name.
#[derive(Debug, Clone)]
pub struct GameCatalog {
    games: HashMap<String, GameProfile>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct GameProfile {
    #[serde(default)]
    pub team_labels: Option<[String; 2]>,
    #[serde(default)]
    pub maps: Vec<GameMap>,
}

#[derive(Debug, Deserialize)]
struct GameCatalogFile {
    #[serde(default)]
    games: HashMap<String, GameProfile>,
}

impl Default for GameCatalog {
    fn default() -> Self {
        let mut games = HashMap::new();
        games.insert(
            "valorant".to_string(),
            GameProfile {
                team_labels: None,
                maps: valorant_maps(),
            },
        );
        Self { games }
    }
}

impl GameCatalog {
    pub fn from_yaml(raw: &str) -> anyhow::Result<Self> {
        let parsed: GameCatalogFile = serde_yaml::from_str(raw)?;
        let mut catalog = Self::default();
        for (name, profile) in parsed.games {
            catalog.games.insert(normalize_game_name(&name), profile);
        }
        Ok(catalog)
    }

    pub fn team_labels(&self, game: &str) -> [String; 2] {
        self.games
            .get(&normalize_game_name(game))
            .and_then(|profile| profile.team_labels.clone())
            .unwrap_or_else(|| team_labels(game))
    }

    pub fn maps(&self, game: &str) -> &[GameMap] {
        self.games
            .get(&normalize_game_name(game))
            .map(|profile| profile.maps.as_slice())
            .unwrap_or(&[])
    }
}

fn load_game_catalog() -> GameCatalog {
    let Some(path) = std::env::var("GAME_CATALOG_CONFIG_PATH")
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
    else {
        return GameCatalog::default();
    };

    let raw = match std::fs::read_to_string(&path) {
        Ok(raw) => raw,
        Err(error) => {
            warn!(path = %path, error = %error, "failed to read game catalog config file");
            return GameCatalog::default();
        }
    };

    match GameCatalog::from_yaml(&expand_env_vars(&raw)) {
        Ok(catalog) => {
            info!(path = %path, games = catalog.games.len(), "loaded game catalog config");
            catalog
        }
        Err(error) => {
            warn!(path = %path, error = %error, "failed to parse game catalog yaml");
            GameCatalog::default()
        }
    }
}
