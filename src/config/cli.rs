use crate::config::toml_config::TomlConfig;
use crate::utils::error::Result;
use clap::{Parser, Subcommand};

#[derive(Debug, Clone, Parser)]
#[command(name = "threat-intel")]
#[command(about = "Keeps the local threat-intel domain database up to date")]
pub struct CliConfig {
    /// Path to TOML configuration file (defaults are used when omitted)
    #[arg(short, long)]
    pub config: Option<String>,

    /// Override store.path from the configuration
    #[arg(long)]
    pub db_path: Option<String>,

    /// Enable verbose output
    #[arg(short, long)]
    pub verbose: bool,

    /// Emit logs as JSON lines
    #[arg(long)]
    pub json_logs: bool,

    /// Log CPU and memory usage after each pipeline phase
    #[arg(long)]
    pub monitor: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Clone, Subcommand)]
pub enum Command {
    /// Fetch and merge block lists once, now
    RunNow,
    /// Ask the privacy policy service to revoke unused permissions once, now
    RevokeNow,
    /// Run both jobs on their periodic schedule until interrupted
    Daemon,
    /// Print store statistics
    Stats,
    /// Load and validate the configuration, then print a summary
    CheckConfig,
}

impl CliConfig {
    pub fn load_settings(&self) -> Result<TomlConfig> {
        let mut config = match &self.config {
            Some(path) => TomlConfig::from_file(path)?,
            None => TomlConfig::default(),
        };

        if let Some(db_path) = &self.db_path {
            config.store.path = db_path.clone();
        }

        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_run_now_with_override() {
        let cli = CliConfig::parse_from(["threat-intel", "--db-path", "/tmp/x.db", "run-now"]);

        assert!(matches!(cli.command, Command::RunNow));
        let config = cli.load_settings().unwrap();
        assert_eq!(config.store.path, "/tmp/x.db");
    }

    #[test]
    fn test_missing_config_file_is_an_error() {
        let cli = CliConfig::parse_from([
            "threat-intel",
            "--config",
            "/nonexistent/threat-intel.toml",
            "stats",
        ]);
        assert!(cli.load_settings().is_err());
    }
}
