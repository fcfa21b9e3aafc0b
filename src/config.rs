use std::time::Duration;

use clap::{Args, Parser, Subcommand};

#[derive(Parser, Debug, Clone)]
#[command(
    name = "snapback",
    about = "Cache node snapshot backup orchestrator",
    version = crate::version::VERSION,
    disable_help_subcommand = true
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Command>,

    #[command(flatten)]
    pub config: Config,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Run one backup pass: snapshot, export to the bucket, clean up (default).
    Run,
}

#[derive(Args, Debug, Clone)]
pub struct Config {
    /// Identifier of the cache node (read replica) to snapshot.
    #[arg(
        long = "node-id",
        global = true,
        env = "SNAPBACK_NODE_ID",
        value_name = "ID",
        default_value = ""
    )]
    pub node_id: String,

    /// Destination bucket for exported snapshots.
    #[arg(
        long,
        global = true,
        env = "SNAPBACK_S3_BUCKET",
        value_name = "NAME",
        default_value = ""
    )]
    pub bucket: String,

    #[arg(
        long = "api-base-url",
        global = true,
        env = "SNAPBACK_API_BASE_URL",
        value_name = "ORIGIN",
        default_value = ""
    )]
    pub api_base_url: String,

    #[arg(
        long = "api-token",
        global = true,
        env = "SNAPBACK_API_TOKEN",
        value_name = "TOKEN",
        hide_env_values = true
    )]
    pub api_token: Option<String>,

    #[arg(
        long = "availability-poll-interval-secs",
        global = true,
        env = "SNAPBACK_AVAILABILITY_POLL_INTERVAL_SECS",
        value_name = "SECS",
        default_value_t = 30,
        value_parser = clap::value_parser!(u64).range(1..=300)
    )]
    pub availability_poll_interval_secs: u64,

    #[arg(
        long = "availability-max-wait-secs",
        global = true,
        env = "SNAPBACK_AVAILABILITY_MAX_WAIT_SECS",
        value_name = "SECS",
        default_value_t = 1800,
        value_parser = clap::value_parser!(u64).range(10..=21600)
    )]
    pub availability_max_wait_secs: u64,

    #[arg(
        long = "export-poll-interval-secs",
        global = true,
        env = "SNAPBACK_EXPORT_POLL_INTERVAL_SECS",
        value_name = "SECS",
        default_value_t = 30,
        value_parser = clap::value_parser!(u64).range(1..=300)
    )]
    pub export_poll_interval_secs: u64,

    #[arg(
        long = "export-max-wait-secs",
        global = true,
        env = "SNAPBACK_EXPORT_MAX_WAIT_SECS",
        value_name = "SECS",
        default_value_t = 300,
        value_parser = clap::value_parser!(u64).range(10..=3600)
    )]
    pub export_max_wait_secs: u64,

    /// Overall execution budget; polls are cut short when it runs out so
    /// compensating cleanup can still happen.
    #[arg(
        long = "deadline-secs",
        global = true,
        env = "SNAPBACK_DEADLINE_SECS",
        value_name = "SECS"
    )]
    pub deadline_secs: Option<u64>,
}

/// Validated configuration value handed to the orchestrator. Required
/// fields are checked here, at construction, not at first use.
#[derive(Debug, Clone)]
pub struct Settings {
    pub node_id: String,
    pub bucket: String,
    pub api_base_url: String,
    pub api_token: Option<String>,
    pub availability_poll_interval: Duration,
    pub availability_max_wait: Duration,
    pub export_poll_interval: Duration,
    pub export_max_wait: Duration,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigError {
    MissingNodeId,
    MissingBucket,
    MissingApiBaseUrl,
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::MissingNodeId => {
                write!(f, "node id is required (--node-id / SNAPBACK_NODE_ID)")
            }
            Self::MissingBucket => {
                write!(f, "bucket is required (--bucket / SNAPBACK_S3_BUCKET)")
            }
            Self::MissingApiBaseUrl => write!(
                f,
                "api base url is required (--api-base-url / SNAPBACK_API_BASE_URL)"
            ),
        }
    }
}

impl std::error::Error for ConfigError {}

impl Config {
    pub fn settings(&self) -> Result<Settings, ConfigError> {
        if self.node_id.trim().is_empty() {
            return Err(ConfigError::MissingNodeId);
        }
        if self.bucket.trim().is_empty() {
            return Err(ConfigError::MissingBucket);
        }
        if self.api_base_url.trim().is_empty() {
            return Err(ConfigError::MissingApiBaseUrl);
        }

        Ok(Settings {
            node_id: self.node_id.trim().to_string(),
            bucket: self.bucket.trim().to_string(),
            api_base_url: self.api_base_url.trim().to_string(),
            api_token: self.api_token.clone(),
            availability_poll_interval: Duration::from_secs(self.availability_poll_interval_secs),
            availability_max_wait: Duration::from_secs(self.availability_max_wait_secs),
            export_poll_interval: Duration::from_secs(self.export_poll_interval_secs),
            export_max_wait: Duration::from_secs(self.export_max_wait_secs),
        })
    }
}
