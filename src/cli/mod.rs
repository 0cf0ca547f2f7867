//! Itemfleet CLI
//!
//! Commands:
//! - `itemfleet` - start the fleet and open the operator shell
//! - `itemfleet check` - validate the settings file and print a summary

pub mod shell;

use clap::{Parser, Subcommand};
use std::path::PathBuf;

use crate::config::{FleetConfig, Role};
use crate::error::Result;

/// Collector/giver trade bot fleet
#[derive(Parser, Debug)]
#[command(name = "itemfleet")]
#[command(author, version, about = "Runs a fleet of item-collecting and item-giving trade bots")]
pub struct Cli {
    /// Settings file
    #[arg(short, long, default_value = "settings.json", env = "ITEMFLEET_CONFIG")]
    pub config: PathBuf,

    /// Run against the in-memory service simulation
    #[arg(long)]
    pub dry_run: bool,

    /// Don't start collection automatically; wait for operator commands
    #[arg(long)]
    pub no_auto: bool,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Commands {
    /// Validate the settings file and exit
    Check,
}

/// One-screen summary of a validated settings file
pub fn config_summary(config: &FleetConfig) -> Result<String> {
    let agents = config.agents()?;
    let count = |role| agents.iter().filter(|a| a.role == role).count();

    let mut lines = vec![format!(
        "{} bots: {} collectors, {} givers",
        agents.len(),
        count(Role::Collector),
        count(Role::Giver)
    )];
    for agent in &agents {
        lines.push(format!(
            "  [{}] {} ({}, {} admins, log level {})",
            agent.index,
            agent.username,
            agent.role,
            agent.admins.len(),
            agent.log_level
        ));
    }
    lines.push(format!(
        "maintenance: craft weapons={}, delete crates={}",
        config.auto_craft_weapons, config.delete_crates
    ));
    Ok(lines.join("\n"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_defaults() {
        let cli = Cli::try_parse_from(["itemfleet"]).unwrap();
        assert_eq!(cli.config, PathBuf::from("settings.json"));
        assert!(!cli.dry_run);
        assert!(!cli.no_auto);
        assert!(cli.command.is_none());
    }

    #[test]
    fn test_cli_check_subcommand() {
        let cli = Cli::try_parse_from(["itemfleet", "--config", "bots.json", "--dry-run", "check"])
            .unwrap();
        assert_eq!(cli.config, PathBuf::from("bots.json"));
        assert!(cli.dry_run);
        assert_eq!(cli.command, Some(Commands::Check));
    }

    #[test]
    fn test_summary_counts_roles() {
        let config = FleetConfig::from_json_str(
            r#"{ "bots": [
                { "username": "c1", "password": "p", "role": "collector" },
                { "username": "g1", "password": "p", "role": "giver" },
                { "username": "g2", "password": "p", "role": "giver" }
            ] }"#,
        )
        .unwrap();
        let summary = config_summary(&config).unwrap();
        assert!(summary.starts_with("3 bots: 1 collectors, 2 givers"));
        assert!(summary.contains("[2] g2 (giver"));
    }
}
