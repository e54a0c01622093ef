//! CLI + TOML configuration, overlaying a `clap::Parser` struct on top of
//! an optional config file, following the same default/validate shape as
//! other daemons in this workspace: a `defaults` module of named constants,
//! a typed config struct with `#[serde(default = "...")]` fields, and a
//! `validate()` pass that rejects out-of-range values rather than silently
//! clamping them.

use std::path::{Path, PathBuf};

use ethers_core::types::Address;
use serde::Deserialize;

use crate::error::MonitoringError;

/// Named defaults for every optional configuration field.
pub mod defaults {
    pub const REQUIRED_CONFIRMATIONS: u64 = 1;
    pub const POLL_INTERVAL_SECONDS: u64 = 5;
    pub const MONITOR_WINDOW_RATIO: f64 = 0.8;
    pub const RISK_FACTOR: u64 = 2;
    pub const SYNC_START_BLOCK: u64 = 0;
    pub const LOG_LEVEL: &str = "info";
}

fn default_required_confirmations() -> u64 {
    defaults::REQUIRED_CONFIRMATIONS
}
fn default_poll_interval_seconds() -> u64 {
    defaults::POLL_INTERVAL_SECONDS
}
fn default_monitor_window_ratio() -> f64 {
    defaults::MONITOR_WINDOW_RATIO
}
fn default_risk_factor() -> u64 {
    defaults::RISK_FACTOR
}
fn default_sync_start_block() -> u64 {
    defaults::SYNC_START_BLOCK
}
fn default_log_level() -> String {
    defaults::LOG_LEVEL.to_string()
}

/// The three contract addresses the service needs to know about.
#[derive(Clone, Debug, Deserialize)]
pub struct ContractsConfig {
    pub token_network_registry: Address,
    pub monitoring_service: Address,
    pub user_deposit: Address,
}

/// Recognized configuration set. Every field here can come from the TOML
/// file pointed to by `--config`; command-line flags (see [`CliArgs`])
/// override whatever the file sets.
#[derive(Clone, Debug, Deserialize)]
pub struct Config {
    pub chain_rpc_url: String,
    pub private_key: String,
    pub db_path: PathBuf,

    #[serde(default = "default_required_confirmations")]
    pub required_confirmations: u64,

    #[serde(default = "default_poll_interval_seconds")]
    pub poll_interval_seconds: u64,

    #[serde(default = "default_sync_start_block")]
    pub sync_start_block: u64,

    pub min_reward: u64,

    #[serde(default = "default_monitor_window_ratio")]
    pub monitor_window_ratio: f64,

    #[serde(default = "default_risk_factor")]
    pub risk_factor: u64,

    #[serde(default = "default_log_level")]
    pub log_level: String,

    pub contracts: ContractsConfig,
}

impl Config {
    /// Loads and validates the TOML file at `path`.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, MonitoringError> {
        let content = std::fs::read_to_string(path.as_ref()).map_err(|e| {
            MonitoringError::Config(format!(
                "failed to read config file '{}': {e}",
                path.as_ref().display()
            ))
        })?;
        let config: Config = toml::from_str(&content)
            .map_err(|e| MonitoringError::Config(format!("failed to parse config file: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Rejects out-of-range values rather than silently clamping them, so
    /// a misconfigured deployment fails fast at startup instead of running
    /// with a nonsensical gate.
    pub fn validate(&self) -> Result<(), MonitoringError> {
        if !(0.0..1.0).contains(&self.monitor_window_ratio) {
            return Err(MonitoringError::Config(format!(
                "monitor_window_ratio must be in [0, 1), got {}",
                self.monitor_window_ratio
            )));
        }
        if self.poll_interval_seconds == 0 {
            return Err(MonitoringError::Config(
                "poll_interval_seconds must be non-zero".into(),
            ));
        }
        if self.risk_factor == 0 {
            return Err(MonitoringError::Config(
                "risk_factor must be non-zero".into(),
            ));
        }
        Ok(())
    }
}

/// Command-line overlay. Every field is optional so that an omitted flag
/// falls back to the config file (or, failing that, to [`defaults`]).
#[derive(Clone, Debug, clap::Parser)]
#[command(name = "monitoring-service")]
#[command(about = "Monitoring Service for a payment-channel network")]
pub struct CliArgs {
    /// Path to a TOML configuration file.
    #[arg(long)]
    pub config: Option<PathBuf>,

    #[arg(long)]
    pub chain_rpc_url: Option<String>,

    #[arg(long)]
    pub private_key: Option<String>,

    #[arg(long)]
    pub db_path: Option<PathBuf>,

    #[arg(long)]
    pub required_confirmations: Option<u64>,

    #[arg(long)]
    pub poll_interval_seconds: Option<u64>,

    #[arg(long)]
    pub sync_start_block: Option<u64>,

    #[arg(long)]
    pub min_reward: Option<u64>,

    #[arg(long)]
    pub monitor_window_ratio: Option<f64>,

    #[arg(long)]
    pub risk_factor: Option<u64>,

    /// `trace`, `debug`, `info`, `warn` or `error`.
    #[arg(long)]
    pub log_level: Option<String>,

    #[arg(long)]
    pub token_network_registry: Option<String>,

    #[arg(long)]
    pub monitoring_service_contract: Option<String>,

    #[arg(long)]
    pub user_deposit_contract: Option<String>,
}

fn parse_address(field: &str, value: &str) -> Result<Address, MonitoringError> {
    value
        .parse()
        .map_err(|_| MonitoringError::Config(format!("{field}: invalid address '{value}'")))
}

impl CliArgs {
    /// Merges this overlay onto `base` (loaded from `--config`, if given),
    /// then validates the result. Any field set on the CLI wins.
    pub fn merge_onto(self, base: Option<Config>) -> Result<Config, MonitoringError> {
        let mut config = match base {
            Some(c) => c,
            None => Config {
                chain_rpc_url: self.chain_rpc_url.clone().ok_or_else(|| {
                    MonitoringError::Config("chain_rpc_url is required".into())
                })?,
                private_key: self
                    .private_key
                    .clone()
                    .ok_or_else(|| MonitoringError::Config("private_key is required".into()))?,
                db_path: self
                    .db_path
                    .clone()
                    .ok_or_else(|| MonitoringError::Config("db_path is required".into()))?,
                required_confirmations: default_required_confirmations(),
                poll_interval_seconds: default_poll_interval_seconds(),
                sync_start_block: default_sync_start_block(),
                min_reward: self
                    .min_reward
                    .ok_or_else(|| MonitoringError::Config("min_reward is required".into()))?,
                monitor_window_ratio: default_monitor_window_ratio(),
                risk_factor: default_risk_factor(),
                log_level: default_log_level(),
                contracts: ContractsConfig {
                    token_network_registry: parse_address(
                        "contracts.token_network_registry",
                        &self.token_network_registry.clone().ok_or_else(|| {
                            MonitoringError::Config(
                                "contracts.token_network_registry is required".into(),
                            )
                        })?,
                    )?,
                    monitoring_service: parse_address(
                        "contracts.monitoring_service",
                        &self.monitoring_service_contract.clone().ok_or_else(|| {
                            MonitoringError::Config(
                                "contracts.monitoring_service is required".into(),
                            )
                        })?,
                    )?,
                    user_deposit: parse_address(
                        "contracts.user_deposit",
                        &self.user_deposit_contract.clone().ok_or_else(|| {
                            MonitoringError::Config("contracts.user_deposit is required".into())
                        })?,
                    )?,
                },
            },
        };

        if let Some(v) = self.chain_rpc_url {
            config.chain_rpc_url = v;
        }
        if let Some(v) = self.private_key {
            config.private_key = v;
        }
        if let Some(v) = self.db_path {
            config.db_path = v;
        }
        if let Some(v) = self.required_confirmations {
            config.required_confirmations = v;
        }
        if let Some(v) = self.poll_interval_seconds {
            config.poll_interval_seconds = v;
        }
        if let Some(v) = self.sync_start_block {
            config.sync_start_block = v;
        }
        if let Some(v) = self.min_reward {
            config.min_reward = v;
        }
        if let Some(v) = self.monitor_window_ratio {
            config.monitor_window_ratio = v;
        }
        if let Some(v) = self.risk_factor {
            config.risk_factor = v;
        }
        if let Some(v) = self.log_level {
            config.log_level = v;
        }
        if let Some(v) = self.token_network_registry {
            config.contracts.token_network_registry =
                parse_address("contracts.token_network_registry", &v)?;
        }
        if let Some(v) = self.monitoring_service_contract {
            config.contracts.monitoring_service = parse_address("contracts.monitoring_service", &v)?;
        }
        if let Some(v) = self.user_deposit_contract {
            config.contracts.user_deposit = parse_address("contracts.user_deposit", &v)?;
        }

        config.validate()?;
        Ok(config)
    }
}
