//! Configuration management

use clap::Parser;
use config::{Config as ConfigBuilder, ConfigError as BuilderError, Environment, File};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid database configuration: {0}")]
    InvalidDatabase(String),

    #[error("Invalid logging configuration: {0}")]
    InvalidLogging(String),

    #[error("Invalid rules configuration: {0}")]
    InvalidRules(String),

    #[error("Invalid reconciliation configuration: {0}")]
    InvalidReconciliation(String),

    #[error("Invalid media server configuration: {0}")]
    InvalidMediaServer(String),

    #[error("Invalid companion service configuration: {0}")]
    InvalidCompanion(String),

    #[error("Failed to load configuration: {0}")]
    LoadError(String),

    #[error("Configuration file not found: {0}")]
    FileNotFound(String),
}

impl From<BuilderError> for ConfigError {
    fn from(err: BuilderError) -> Self {
        ConfigError::LoadError(err.to_string())
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub database: DatabaseConfig,
    pub logging: LoggingConfig,
    pub rules: RulesConfig,
    pub reconciliation: ReconciliationConfig,
    pub media_server: MediaServerConfig,
    pub rules_engine: RulesEngineConfig,
    #[serde(default)]
    pub tmdb: TmdbConfig,
    #[serde(default)]
    pub radarr: Vec<CompanionConfig>,
    #[serde(default)]
    pub sonarr: Vec<CompanionConfig>,
}

fn with_defaults(
    builder: config::builder::ConfigBuilder<config::builder::DefaultState>,
) -> Result<config::builder::ConfigBuilder<config::builder::DefaultState>, ConfigError> {
    Ok(builder
        .set_default("database.path", "./data/mediasweep.db")?
        .set_default("database.connection_pool_size", 4)?
        .set_default("database.busy_timeout", 5000)?
        .set_default("logging.level", "info")?
        .set_default("logging.format", "text")?
        .set_default("logging.output", "stdout")?
        .set_default("logging.max_file_size", 10485760)? // 10 MB
        .set_default("logging.max_backups", 5)?
        .set_default("rules.page_size", 50)?
        .set_default("rules.global_schedule", "0 */8 * * *")?
        .set_default("rules.shutdown_timeout", 60)?
        .set_default("rules.log_cleanup_interval", 86400)?
        .set_default("reconciliation.manual_sync_min_children", 1)?
        .set_default("reconciliation.manual_sync_settle_delay", 0)?
        .set_default("media_server.url", "http://127.0.0.1:32400")?
        .set_default("media_server.token", "")?
        .set_default("media_server.timeout", 30)?
        .set_default("rules_engine.url", "http://127.0.0.1:6247")?
        .set_default("rules_engine.timeout", 300)?)
}

impl Config {
    /// Load configuration with precedence: CLI args > Environment variables > Config file > Defaults
    pub fn load() -> Result<Self, ConfigError> {
        let cli_args = CliArgs::parse();
        Self::load_with_args(&cli_args)
    }

    /// Load configuration using already-parsed command-line arguments
    pub fn load_with_args(cli_args: &CliArgs) -> Result<Self, ConfigError> {
        // 1. Defaults (lowest priority)
        let mut builder = with_defaults(ConfigBuilder::builder())?;

        // 2. Config file (medium priority)
        if let Some(config_path) = &cli_args.config {
            if !config_path.exists() {
                return Err(ConfigError::FileNotFound(config_path.display().to_string()));
            }
            builder = builder.add_source(File::from(config_path.as_path()));
        }

        // 3. Environment variables, e.g. MEDIASWEEP_RULES__PAGE_SIZE=100
        builder = builder.add_source(
            Environment::with_prefix("MEDIASWEEP")
                .separator("__")
                .try_parsing(true),
        );

        // 4. CLI arguments (highest priority)
        if let Some(db_path) = &cli_args.database {
            builder = builder.set_override("database.path", db_path.display().to_string())?;
        }
        if let Some(log_level) = &cli_args.log_level {
            builder = builder.set_override("logging.level", log_level.clone())?;
        }
        if let Some(page_size) = cli_args.page_size {
            builder = builder.set_override("rules.page_size", page_size)?;
        }

        let config: Config = builder.build()?.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a specific file path, on top of the defaults
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Err(ConfigError::FileNotFound(path.display().to_string()));
        }

        let config: Config = with_defaults(ConfigBuilder::builder())?
            .add_source(File::from(path))
            .build()?
            .try_deserialize()?;

        config.validate()?;
        Ok(config)
    }

    /// Validate all configuration parameters
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.database.validate()?;
        self.logging.validate()?;
        self.rules.validate()?;
        self.reconciliation.validate()?;
        self.media_server.validate()?;
        self.rules_engine.validate()?;

        let mut names = std::collections::HashSet::new();
        for companion in self.radarr.iter().chain(self.sonarr.iter()) {
            companion.validate()?;
            if !names.insert(companion.name.as_str()) {
                return Err(ConfigError::InvalidCompanion(format!(
                    "duplicate companion service name: {}",
                    companion.name
                )));
            }
        }
        Ok(())
    }
}

/// Command-line arguments for configuration override
#[derive(Debug, Default, Parser)]
#[command(name = "mediasweep")]
#[command(about = "Rule-driven media collection reconciliation and cleanup", long_about = None)]
pub struct CliArgs {
    /// Path to configuration file (TOML format)
    #[arg(short, long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Database file path
    #[arg(short, long, value_name = "PATH")]
    pub database: Option<PathBuf>,

    /// Log level (debug, info, warn, error)
    #[arg(short, long, value_name = "LEVEL")]
    pub log_level: Option<String>,

    /// Library page size used during rule evaluation
    #[arg(long, value_name = "ITEMS")]
    pub page_size: Option<u64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    pub path: PathBuf,
    pub connection_pool_size: usize,
    pub busy_timeout: u64, // milliseconds
}

impl DatabaseConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.path.as_os_str().is_empty() {
            return Err(ConfigError::InvalidDatabase("path cannot be empty".to_string()));
        }

        if self.connection_pool_size == 0 {
            return Err(ConfigError::InvalidDatabase(
                "connection_pool_size must be greater than 0".to_string(),
            ));
        }

        if self.busy_timeout == 0 {
            return Err(ConfigError::InvalidDatabase(
                "busy_timeout must be greater than 0".to_string(),
            ));
        }

        Ok(())
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    pub level: String,
    pub format: String,
    pub output: String,
    pub log_file: Option<PathBuf>,
    pub max_file_size: usize, // bytes
    pub max_backups: usize,
}

impl LoggingConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        let valid_levels = ["debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.level.as_str()) {
            return Err(ConfigError::InvalidLogging(format!(
                "level must be one of: {:?}",
                valid_levels
            )));
        }

        let valid_formats = ["json", "text"];
        if !valid_formats.contains(&self.format.as_str()) {
            return Err(ConfigError::InvalidLogging(format!(
                "format must be one of: {:?}",
                valid_formats
            )));
        }

        let valid_outputs = ["stdout", "file"];
        if !valid_outputs.contains(&self.output.as_str()) {
            return Err(ConfigError::InvalidLogging(format!(
                "output must be one of: {:?}",
                valid_outputs
            )));
        }

        if self.output == "file" && self.log_file.is_none() {
            return Err(ConfigError::InvalidLogging(
                "log_file must be specified when output is 'file'".to_string(),
            ));
        }

        if self.max_file_size == 0 {
            return Err(ConfigError::InvalidLogging(
                "max_file_size must be greater than 0".to_string(),
            ));
        }

        if self.max_backups == 0 {
            return Err(ConfigError::InvalidLogging(
                "max_backups must be greater than 0".to_string(),
            ));
        }

        Ok(())
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct RulesConfig {
    /// Library items fetched and evaluated per page
    pub page_size: usize,
    /// Cron expression that sweeps every active rule group without its own schedule
    pub global_schedule: String,
    pub shutdown_timeout: u64,     // seconds
    pub log_cleanup_interval: u64, // seconds
}

impl RulesConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.page_size == 0 {
            return Err(ConfigError::InvalidRules(
                "page_size must be greater than 0".to_string(),
            ));
        }

        if let Err(e) = crate::core::scheduler::parse_schedule(&self.global_schedule) {
            return Err(ConfigError::InvalidRules(format!(
                "global_schedule is not a valid cron expression: {}",
                e
            )));
        }

        if self.log_cleanup_interval == 0 {
            return Err(ConfigError::InvalidRules(
                "log_cleanup_interval must be greater than 0".to_string(),
            ));
        }

        Ok(())
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ReconciliationConfig {
    /// Manual-change detection is skipped while the external collection reports fewer children
    pub manual_sync_min_children: usize,
    /// Re-read delay before trusting a collection that reports too few children
    pub manual_sync_settle_delay: u64, // milliseconds
}

impl ReconciliationConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.manual_sync_settle_delay > 60_000 {
            return Err(ConfigError::InvalidReconciliation(
                "manual_sync_settle_delay must not exceed 60000 ms".to_string(),
            ));
        }
        Ok(())
    }
}

impl Default for ReconciliationConfig {
    fn default() -> Self {
        Self {
            manual_sync_min_children: 1,
            manual_sync_settle_delay: 0,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct MediaServerConfig {
    pub url: String,
    pub token: String,
    pub timeout: u64, // seconds
}

impl MediaServerConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.url.is_empty() {
            return Err(ConfigError::InvalidMediaServer("url cannot be empty".to_string()));
        }
        if self.timeout == 0 {
            return Err(ConfigError::InvalidMediaServer(
                "timeout must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct RulesEngineConfig {
    pub url: String,
    pub timeout: u64, // seconds
}

impl RulesEngineConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.url.is_empty() {
            return Err(ConfigError::InvalidRules(
                "rules_engine.url cannot be empty".to_string(),
            ));
        }
        if self.timeout == 0 {
            return Err(ConfigError::InvalidRules(
                "rules_engine.timeout must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct TmdbConfig {
    pub api_key: Option<String>,
}

/// A named radarr or sonarr instance that collections can bind to
#[derive(Debug, Clone, Deserialize)]
pub struct CompanionConfig {
    pub name: String,
    pub url: String,
    pub api_key: String,
    #[serde(default = "default_companion_timeout")]
    pub timeout: u64, // seconds
}

fn default_companion_timeout() -> u64 {
    30
}

impl CompanionConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.name.trim().is_empty() {
            return Err(ConfigError::InvalidCompanion("name cannot be empty".to_string()));
        }
        if self.url.is_empty() {
            return Err(ConfigError::InvalidCompanion(format!(
                "{}: url cannot be empty",
                self.name
            )));
        }
        if self.api_key.is_empty() {
            return Err(ConfigError::InvalidCompanion(format!(
                "{}: api_key cannot be empty",
                self.name
            )));
        }
        if self.timeout == 0 {
            return Err(ConfigError::InvalidCompanion(format!(
                "{}: timeout must be greater than 0",
                self.name
            )));
        }
        Ok(())
    }
}
