use config::{Config, Environment, File, FileFormat};
use serde::Deserialize;
use std::collections::BTreeSet;
use std::fmt;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;
use tracing::level_filters::LevelFilter;
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::error::{FleetError, Result};
use crate::orchestrator::OrchestratorConfig;
use crate::session::{AccountId, MaintenanceTask};

/// Main configuration structure
#[derive(Debug, Clone, Deserialize)]
pub struct FleetConfig {
    /// Admins global to every bot; merged into each bot's own list
    #[serde(default)]
    pub admins: Vec<u64>,
    /// One entry per bot, in pool order
    pub bots: Vec<BotConfig>,
    /// Service API key, used by bots that don't carry their own
    #[serde(default)]
    pub api_key: String,
    /// Main log file (in addition to stdout)
    #[serde(default)]
    pub main_log: Option<String>,
    /// Craft duplicate weapons into metal after login
    #[serde(default)]
    pub auto_craft_weapons: bool,
    /// Delete crates after login
    #[serde(default)]
    pub delete_crates: bool,
    /// Crate series excluded from deletion
    #[serde(default)]
    pub delete_crate_exclusions: Vec<u32>,
    #[serde(default)]
    pub orchestrator: OrchestratorConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub dry_run: DryRunConfig,
}

/// Per-bot entry as written in the settings file
#[derive(Debug, Clone, Deserialize)]
pub struct BotConfig {
    pub username: String,
    pub password: String,
    /// Role classification: "collector" or "giver"
    pub role: String,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default)]
    pub display_name_prefix: Option<String>,
    /// Canned reply for chat messages and friend-accept follow-ups
    #[serde(default)]
    pub chat_response: Option<String>,
    #[serde(default)]
    pub log_file: Option<String>,
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Maximum time a trade may take, in seconds
    #[serde(default = "default_maximum_trade_time")]
    pub maximum_trade_time: u64,
    /// Maximum idle gap inside a trade, in seconds
    #[serde(default = "default_maximum_action_gap")]
    pub maximum_action_gap: u64,
    /// Trade status polling interval in milliseconds
    #[serde(default = "default_trade_polling_interval")]
    pub trade_polling_interval: u64,
    /// Delay before the follow-up message once a friend request is accepted (ms)
    #[serde(default = "default_friend_accept_grace")]
    pub friend_accept_grace_ms: u64,
    #[serde(default)]
    pub admins: Vec<u64>,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_maximum_trade_time() -> u64 {
    180
}

fn default_maximum_action_gap() -> u64 {
    30
}

fn default_trade_polling_interval() -> u64 {
    800
}

fn default_friend_accept_grace() -> u64 {
    1000
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Enable JSON formatted logs
    #[serde(default)]
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

/// Offline simulation of the trading service
#[derive(Debug, Clone, Deserialize)]
pub struct DryRunConfig {
    /// Run against the in-memory service instead of a real one
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_collector_capacity")]
    pub collector_capacity: usize,
    #[serde(default)]
    pub collector_items: usize,
    #[serde(default = "default_giver_items")]
    pub giver_items: usize,
    /// Simulated login time in milliseconds
    #[serde(default = "default_login_delay")]
    pub login_delay_ms: u64,
}

fn default_collector_capacity() -> usize {
    50
}

fn default_giver_items() -> usize {
    10
}

fn default_login_delay() -> u64 {
    500
}

impl Default for DryRunConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            collector_capacity: default_collector_capacity(),
            collector_items: 0,
            giver_items: default_giver_items(),
            login_delay_ms: default_login_delay(),
        }
    }
}

/// The two roles a bot can play in a handoff
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    Collector,
    Giver,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Collector => "collector",
            Role::Giver => "giver",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = FleetError;

    fn from_str(raw: &str) -> Result<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "collector" => Ok(Role::Collector),
            "giver" => Ok(Role::Giver),
            _ => Err(FleetError::UnknownRole(raw.to_string())),
        }
    }
}

/// Login secret; never printed, wiped on drop
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct Credential(String);

impl Credential {
    pub fn new(secret: impl Into<String>) -> Self {
        Self(secret.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Credential(***)")
    }
}

/// Resolved, immutable configuration of one agent
#[derive(Debug, Clone)]
pub struct AgentConfig {
    /// Position in the settings file
    pub index: usize,
    pub username: String,
    pub credential: Credential,
    pub api_key: String,
    pub role: Role,
    /// Bot-specific admins merged with the global list
    pub admins: BTreeSet<AccountId>,
    pub display_name: Option<String>,
    pub display_name_prefix: Option<String>,
    pub chat_response: Option<String>,
    pub log_file: Option<String>,
    pub log_level: LevelFilter,
    pub trade_polling_interval: Duration,
    pub maximum_trade_time: Duration,
    pub maximum_action_gap: Duration,
    pub friend_accept_grace: Duration,
}

impl AgentConfig {
    pub fn is_admin(&self, account: AccountId) -> bool {
        self.admins.contains(&account)
    }

    /// Case-insensitive identity match used by operator commands
    pub fn matches_name(&self, name: &str) -> bool {
        self.username.eq_ignore_ascii_case(name.trim())
    }
}

/// Post-login housekeeping switches shared by every bot
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MaintenanceSettings {
    pub auto_craft_weapons: bool,
    pub delete_crates: bool,
    pub delete_crate_exclusions: Vec<u32>,
}

impl MaintenanceSettings {
    /// Tasks to run after login, in order
    pub fn tasks(&self) -> Vec<MaintenanceTask> {
        let mut tasks = Vec::new();
        if self.auto_craft_weapons {
            tasks.push(MaintenanceTask::CraftWeapons);
        }
        if self.delete_crates {
            tasks.push(MaintenanceTask::DeleteCrates {
                exclusions: self.delete_crate_exclusions.clone(),
            });
        }
        tasks.push(MaintenanceTask::CombineMetal);
        tasks
    }
}

impl FleetConfig {
    /// Load configuration from a JSON settings file, with `ITEMFLEET__*`
    /// environment overrides.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        if !path.is_file() {
            return Err(FleetError::InvalidConfig(format!(
                "configuration file {} does not exist",
                path.display()
            )));
        }

        let builder = Config::builder()
            .set_default("logging.level", "info")?
            .set_default("logging.json", false)?
            .add_source(File::from(path).format(FileFormat::Json).required(true))
            .add_source(
                Environment::with_prefix("ITEMFLEET")
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            );

        let config: FleetConfig = builder.build()?.try_deserialize()?;
        config.agents()?;
        Ok(config)
    }

    /// Parse and validate configuration from a JSON string
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: FleetConfig = Config::builder()
            .add_source(File::from_str(json, FileFormat::Json))
            .build()?
            .try_deserialize()?;
        config.agents()?;
        Ok(config)
    }

    pub fn maintenance(&self) -> MaintenanceSettings {
        MaintenanceSettings {
            auto_craft_weapons: self.auto_craft_weapons,
            delete_crates: self.delete_crates,
            delete_crate_exclusions: self.delete_crate_exclusions.clone(),
        }
    }

    /// Validate every bot entry and resolve it into an `AgentConfig`.
    ///
    /// Fails on an unknown role, an unparsable log level, an empty username,
    /// or when no bot has the collector role.
    pub fn agents(&self) -> Result<Vec<AgentConfig>> {
        let mut agents = Vec::with_capacity(self.bots.len());

        for (index, bot) in self.bots.iter().enumerate() {
            let role: Role = bot.role.parse()?;

            if bot.username.trim().is_empty() {
                return Err(FleetError::InvalidConfig(format!(
                    "bot at index {index} has an empty username"
                )));
            }

            let log_level = LevelFilter::from_str(&bot.log_level).map_err(|_| {
                FleetError::InvalidConfig(format!(
                    "bot {} has invalid log_level {:?}",
                    bot.username, bot.log_level
                ))
            })?;

            let admins = bot
                .admins
                .iter()
                .chain(self.admins.iter())
                .copied()
                .map(AccountId)
                .collect();

            agents.push(AgentConfig {
                index,
                username: bot.username.clone(),
                credential: Credential::new(bot.password.clone()),
                api_key: bot.api_key.clone().unwrap_or_else(|| self.api_key.clone()),
                role,
                admins,
                display_name: bot.display_name.clone(),
                display_name_prefix: bot.display_name_prefix.clone(),
                chat_response: bot.chat_response.clone(),
                log_file: bot.log_file.clone(),
                log_level,
                trade_polling_interval: Duration::from_millis(bot.trade_polling_interval),
                maximum_trade_time: Duration::from_secs(bot.maximum_trade_time),
                maximum_action_gap: Duration::from_secs(bot.maximum_action_gap),
                friend_accept_grace: Duration::from_millis(bot.friend_accept_grace_ms),
            });
        }

        if !agents.iter().any(|a| a.role == Role::Collector) {
            return Err(FleetError::NoCollectors);
        }

        Ok(agents)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"{
        "admins": [76561198000000001],
        "api_key": "GLOBALKEY",
        "delete_crates": true,
        "delete_crate_exclusions": [7, 12],
        "bots": [
            { "username": "Collector1", "password": "pw1", "role": "collector",
              "admins": [76561198000000002] },
            { "username": "giver1", "password": "pw2", "role": "Giver",
              "api_key": "OWNKEY", "log_level": "debug", "friend_accept_grace_ms": 250 }
        ]
    }"#;

    #[test]
    fn test_parse_and_resolve_agents() {
        let config = FleetConfig::from_json_str(SAMPLE).unwrap();
        let agents = config.agents().unwrap();
        assert_eq!(agents.len(), 2);

        assert_eq!(agents[0].role, Role::Collector);
        assert_eq!(agents[0].api_key, "GLOBALKEY");
        assert_eq!(agents[1].role, Role::Giver);
        assert_eq!(agents[1].api_key, "OWNKEY");
        assert_eq!(agents[1].log_level, LevelFilter::DEBUG);
        assert_eq!(agents[1].friend_accept_grace, Duration::from_millis(250));
        assert_eq!(agents[1].maximum_trade_time, Duration::from_secs(180));
    }

    #[test]
    fn test_global_admins_are_merged() {
        let config = FleetConfig::from_json_str(SAMPLE).unwrap();
        let agents = config.agents().unwrap();

        assert!(agents[0].is_admin(AccountId(76561198000000001)));
        assert!(agents[0].is_admin(AccountId(76561198000000002)));
        assert!(agents[1].is_admin(AccountId(76561198000000001)));
        assert!(!agents[1].is_admin(AccountId(76561198000000002)));
    }

    #[test]
    fn test_zero_collectors_is_fatal() {
        let json = r#"{ "bots": [
            { "username": "g", "password": "p", "role": "giver" }
        ] }"#;
        let err = FleetConfig::from_json_str(json).unwrap_err();
        assert!(matches!(err, FleetError::NoCollectors));
    }

    #[test]
    fn test_unknown_role_is_fatal_and_named() {
        let json = r#"{ "bots": [
            { "username": "c", "password": "p", "role": "collector" },
            { "username": "x", "password": "p", "role": "seller" }
        ] }"#;
        match FleetConfig::from_json_str(json).unwrap_err() {
            FleetError::UnknownRole(name) => assert_eq!(name, "seller"),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_malformed_json_is_rejected() {
        assert!(FleetConfig::from_json_str("{ \"bots\": [ ").is_err());
    }

    #[test]
    fn test_missing_file_is_rejected() {
        let err = FleetConfig::load("/nonexistent/settings.json").unwrap_err();
        assert!(matches!(err, FleetError::InvalidConfig(_)));
    }

    #[test]
    fn test_maintenance_tasks_order() {
        let config = FleetConfig::from_json_str(SAMPLE).unwrap();
        assert_eq!(
            config.maintenance().tasks(),
            vec![
                MaintenanceTask::DeleteCrates { exclusions: vec![7, 12] },
                MaintenanceTask::CombineMetal,
            ]
        );
    }

    #[test]
    fn test_credential_is_redacted() {
        let credential = Credential::new("hunter2");
        assert_eq!(format!("{credential:?}"), "Credential(***)");
        assert_eq!(credential.expose(), "hunter2");
    }

    #[test]
    fn test_name_match_is_case_insensitive() {
        let config = FleetConfig::from_json_str(SAMPLE).unwrap();
        let agents = config.agents().unwrap();
        assert!(agents[0].matches_name("collector1"));
        assert!(agents[0].matches_name("COLLECTOR1"));
        assert!(!agents[0].matches_name("collector"));
    }
}
