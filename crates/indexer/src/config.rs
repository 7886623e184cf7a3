//! Configuration management for the TipJar indexer.
//!
//! This module handles loading configuration from:
//! - TOML files
//! - Environment variables (`${VAR}` placeholders inside the TOML)
//! - Default values (fallbacks)

use alloy::primitives::Address;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Main configuration for the indexer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Network configuration
    pub network: NetworkConfig,

    /// Contract addresses
    pub contracts: ContractsConfig,

    /// Database configuration
    pub database: DatabaseConfig,

    /// Sync configuration
    #[serde(default)]
    pub sync: SyncConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Network configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkConfig {
    /// Ethereum RPC URL
    pub rpc_url: String,

    /// Chain ID (e.g., 84532 for Base Sepolia)
    pub chain_id: u64,
}

/// Contract addresses configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContractsConfig {
    /// TipJar contract address (TipSent and TipMessage events)
    pub tip_jar: Address,
}

/// Database configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// Database URL (e.g., "sqlite://tipjar.db")
    pub url: String,

    /// Maximum number of connections in the pool
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,

    /// Minimum number of connections in the pool
    #[serde(default = "default_min_connections")]
    pub min_connections: u32,
}

/// Sync configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncConfig {
    /// First block that may contain TipJar events (usually the deployment block)
    #[serde(default)]
    pub start_block: u64,

    /// Polling interval in seconds once caught up
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,

    /// Maximum number of blocks per batch
    #[serde(default = "default_batch_size")]
    pub batch_size: u64,

    /// Number of blocks to stay behind head
    #[serde(default = "default_confirmations")]
    pub confirmations: u64,

    /// First retry delay after a failed batch
    #[serde(default = "default_retry_backoff_secs")]
    pub retry_backoff_secs: u64,

    /// Retry delay ceiling
    #[serde(default = "default_max_backoff_secs")]
    pub max_backoff_secs: u64,

    /// Number of batch checkpoints kept for reorg detection
    #[serde(default = "default_checkpoint_history")]
    pub checkpoint_history: u64,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            start_block: 0,
            poll_interval_secs: default_poll_interval_secs(),
            batch_size: default_batch_size(),
            confirmations: default_confirmations(),
            retry_backoff_secs: default_retry_backoff_secs(),
            max_backoff_secs: default_max_backoff_secs(),
            checkpoint_history: default_checkpoint_history(),
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level: trace, debug, info, warn, error
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log format: json or pretty
    #[serde(default = "default_log_format")]
    pub format: String,
}

// Default value functions
fn default_confirmations() -> u64 {
    5
}

fn default_max_connections() -> u32 {
    5
}

fn default_min_connections() -> u32 {
    1
}

fn default_poll_interval_secs() -> u64 {
    2 // Base block time
}

fn default_batch_size() -> u64 {
    1000
}

fn default_retry_backoff_secs() -> u64 {
    1
}

fn default_max_backoff_secs() -> u64 {
    60
}

fn default_checkpoint_history() -> u64 {
    128
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

/// Quoting context while scanning TOML for placeholders.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Scan {
    Bare,
    Comment,
    Basic,
    Literal,
    MultilineBasic,
    MultilineLiteral,
}

impl Config {
    /// Load configuration from a TOML file.
    ///
    /// Environment variables can be referenced using `${VAR_NAME}` syntax.
    /// For example: `rpc_url = "${BASE_SEPOLIA_RPC_URL}"`
    ///
    /// # Example
    /// ```no_run
    /// # use tipjar_indexer::config::Config;
    /// let config = Config::from_file("indexer.toml")?;
    /// # Ok::<(), anyhow::Error>(())
    /// ```
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let expanded = Self::expand_env_vars(&contents)?;

        let config: Config = toml::from_str(&expanded)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        config.validate()?;

        Ok(config)
    }

    /// Load configuration from a TOML string.
    pub fn from_toml_str(toml: &str) -> Result<Self> {
        let config: Config = toml::from_str(toml).context("Failed to parse TOML configuration")?;

        config.validate()?;

        Ok(config)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<()> {
        if self.network.rpc_url.is_empty() {
            anyhow::bail!("Network RPC URL cannot be empty");
        }

        if self.network.chain_id == 0 {
            anyhow::bail!("Chain ID must be non-zero");
        }

        if self.contracts.tip_jar == Address::ZERO {
            anyhow::bail!("TipJar address cannot be zero");
        }

        if self.database.url.is_empty() {
            anyhow::bail!("Database URL cannot be empty");
        }

        if self.database.max_connections == 0 {
            anyhow::bail!("Database max_connections must be at least 1");
        }

        if self.database.min_connections > self.database.max_connections {
            anyhow::bail!(
                "Database min_connections ({}) exceeds max_connections ({})",
                self.database.min_connections,
                self.database.max_connections
            );
        }

        if self.sync.batch_size == 0 {
            anyhow::bail!("Sync batch_size must be at least 1");
        }

        if self.sync.poll_interval_secs == 0 {
            anyhow::bail!("Sync poll_interval_secs must be at least 1");
        }

        if self.sync.retry_backoff_secs == 0 {
            anyhow::bail!("Sync retry_backoff_secs must be at least 1");
        }

        if self.sync.max_backoff_secs < self.sync.retry_backoff_secs {
            anyhow::bail!(
                "Sync max_backoff_secs ({}) is below retry_backoff_secs ({})",
                self.sync.max_backoff_secs,
                self.sync.retry_backoff_secs
            );
        }

        if self.sync.checkpoint_history == 0 {
            anyhow::bail!("Sync checkpoint_history must be at least 1");
        }

        match self.logging.format.as_str() {
            "json" | "pretty" => {}
            other => anyhow::bail!("Unknown log format '{}': use json or pretty", other),
        }

        Ok(())
    }

    /// Expand environment variables in the format `${VAR_NAME}`.
    ///
    /// Placeholders after a `#` that is outside every TOML string form are
    /// comments and stay untouched. Placeholders inside strings are expanded.
    ///
    /// # Errors
    /// Returns an error if a placeholder is unclosed, empty, or names an unset variable.
    fn expand_env_vars(input: &str) -> Result<String> {
        let mut result = String::with_capacity(input.len());
        let mut scan = Scan::Bare;
        let mut escape_next = false;
        let mut pos = 0;

        while let Some(ch) = input[pos..].chars().next() {
            let rest = &input[pos..];

            if escape_next {
                escape_next = false;
                result.push(ch);
                pos += ch.len_utf8();
                continue;
            }

            if ch == '$' && scan != Scan::Comment && rest.starts_with("${") {
                let Some(close) = rest[2..].find('}') else {
                    anyhow::bail!(
                        "Unclosed environment variable placeholder at position {}",
                        pos
                    );
                };

                let var_name = &rest[2..2 + close];
                if var_name.is_empty() {
                    anyhow::bail!("Empty environment variable name at position {}", pos);
                }

                let value = std::env::var(var_name).map_err(|_| {
                    anyhow::anyhow!(
                        "Environment variable '{}' is not set (referenced at position {})",
                        var_name,
                        pos
                    )
                })?;
                result.push_str(&value);
                pos += close + 3;
                continue;
            }

            let triple = match ch {
                '"' => rest.starts_with(r#"""""#),
                '\'' => rest.starts_with("'''"),
                _ => false,
            };

            let (next, width) = match (scan, ch) {
                (Scan::Basic | Scan::MultilineBasic, '\\') => {
                    escape_next = true;
                    (scan, 1)
                }
                (Scan::Bare, '#') => (Scan::Comment, 1),
                (Scan::Comment, '\n') => (Scan::Bare, 1),
                (Scan::Bare, '"') if triple => (Scan::MultilineBasic, 3),
                (Scan::MultilineBasic, '"') if triple => (Scan::Bare, 3),
                (Scan::Bare, '"') => (Scan::Basic, 1),
                (Scan::Basic, '"') => (Scan::Bare, 1),
                (Scan::Bare, '\'') if triple => (Scan::MultilineLiteral, 3),
                (Scan::MultilineLiteral, '\'') if triple => (Scan::Bare, 3),
                (Scan::Bare, '\'') => (Scan::Literal, 1),
                (Scan::Literal, '\'') => (Scan::Bare, 1),
                (scan, _) => (scan, ch.len_utf8()),
            };

            scan = next;
            result.push_str(&rest[..width]);
            pos += width;
        }

        Ok(result)
    }
}
